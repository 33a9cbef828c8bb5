//! Kernel command line
//!
//! An ordered list of `key[=value]` words. Double quotes group a value that
//! contains spaces and are kept verbatim.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

pub const PROC_CMDLINE: &str = "/proc/cmdline";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Param {
    key: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmdline {
    params: Vec<Param>,
}

impl Cmdline {
    pub fn parse(line: &str) -> Self {
        let params = split(line)
            .into_iter()
            .map(|word| match word.split_once('=') {
                Some((key, value)) => Param {
                    key: key.to_string(),
                    value: Some(value.to_string()),
                },
                None => Param {
                    key: word,
                    value: None,
                },
            })
            .collect();
        Self { params }
    }

    /// Read and parse a command line file such as `/proc/cmdline`
    pub fn read(path: &Path) -> Result<Self> {
        let line = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::parse(&line))
    }

    /// Value of the first `key`; a bare flag yields `Some("")`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_deref().unwrap_or(""))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.iter().any(|p| p.key == key)
    }

    /// Replace the first `key` in place, or append it
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = Some(value.into());
        match self.params.iter_mut().find(|p| p.key == key) {
            Some(param) => param.value = value,
            None => self.params.push(Param {
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Drop every occurrence of `key`
    pub fn remove(&mut self, key: &str) {
        self.params.retain(|p| p.key != key);
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl fmt::Display for Cmdline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match &param.value {
                Some(value) => write!(f, "{}={}", param.key, value)?,
                None => f.write_str(&param.key)?,
            }
        }
        Ok(())
    }
}

fn split(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                word.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}
