//! cairn: install and upgrade a node's disks

mod logger;

use std::error::Error as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use cairn_core::cmdline::PROC_CMDLINE;
use cairn_core::discovery::Discovery;
use cairn_core::disk::BlockDevice;
use cairn_core::fs::Linux;
use cairn_core::gpt::{guid, PartitionTable};
use cairn_installer::{grow_ephemeral, host_context, install, InstallRequest};
use cairn_updater::{Result, UpgradeOptions, UpgradeRequest, Upgrader};
use clap::{Parser, Subcommand};
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cairn", version, about = "Partition, install and upgrade node disks")]
struct Cli {
    /// More output: -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Partition, format and populate disks from an install request
    Install {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Install a new system into the inactive root slot
    Upgrade {
        #[arg(long)]
        rootfs: String,
        #[arg(long)]
        kernel: String,
        #[arg(long)]
        initramfs: String,
        #[arg(long, default_value = PROC_CMDLINE)]
        cmdline_path: PathBuf,
        #[arg(long, default_value = "/boot")]
        boot_mount: PathBuf,
        /// Download timeout in seconds
        #[arg(long, default_value_t = 300)]
        fetch_timeout: u64,
    },
    /// List block devices, partitions and filesystem labels
    Probe,
    /// Print a device's GPT
    Show { device: PathBuf },
    /// Grow the last partition of a device and its mounted XFS
    Grow {
        device: PathBuf,
        mount_point: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mut message = err.to_string();
            let mut source = err.source();
            while let Some(cause) = source {
                message.push_str(": ");
                message.push_str(&cause.to_string());
                source = cause.source();
            }
            error!("{}", message);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    let system = Linux;
    match command {
        Command::Install { config } => {
            let request = InstallRequest::load(&config)?;
            let ctx = host_context(&system, &request)?;
            install(&ctx, &request)?;
        }
        Command::Upgrade {
            rootfs,
            kernel,
            initramfs,
            cmdline_path,
            boot_mount,
            fetch_timeout,
        } => {
            let options = UpgradeOptions {
                cmdline_path,
                boot_mount,
                fetch_timeout: Duration::from_secs(fetch_timeout.max(1)),
                ..UpgradeOptions::default()
            };
            let upgrader = Upgrader::new(&system, Discovery::default(), options)?;
            let next = upgrader.upgrade(&UpgradeRequest {
                rootfs,
                kernel,
                initramfs,
            })?;
            info!("reboot to start slot {}", next);
        }
        Command::Probe => probe()?,
        Command::Show { device } => show(&device)?,
        Command::Grow {
            device,
            mount_point,
        } => {
            let grown = grow_ephemeral(&system, &device, &mount_point)?;
            info!(
                "partition {} now ends at LBA {}",
                grown.number, grown.last_lba
            );
        }
    }
    Ok(())
}

fn probe() -> Result<()> {
    for found in Discovery::default().enumerate()? {
        let fs = found
            .superblock
            .as_ref()
            .map(|sb| sb.filesystem.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<6} {:<16} {}",
            found.node.display(),
            fs,
            found.label().unwrap_or("-"),
            found.partition_name.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn show(device: &Path) -> Result<()> {
    let mut bd = BlockDevice::open_read_only(device)?;
    let table = PartitionTable::read(&mut bd)?;
    let header = table.header();

    println!("Disk {}: {:?}", device.display(), table.state());
    println!("  GUID:          {}", header.disk_guid);
    println!(
        "  Usable LBAs:   {}..={}",
        header.first_usable_lba, header.last_usable_lba
    );
    println!("  Backup LBA:    {}", header.backup_lba);
    println!(
        "  Entries:       {} x {} bytes",
        header.entry_count, header.entry_size
    );
    println!();
    println!(
        "{:>3} {:>12} {:>12} {:>12}  {:<20} {}",
        "#", "Start", "End", "Sectors", "Type", "Name"
    );
    for p in table.partitions() {
        println!(
            "{:>3} {:>12} {:>12} {:>12}  {:<20} {}",
            p.number,
            p.first_lba,
            p.last_lba,
            p.length_lba(),
            guid::type_name(&p.type_guid),
            p.name
        );
    }
    Ok(())
}
