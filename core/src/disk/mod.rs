// Block devices, block sizes and the ioctls behind them

pub mod device;
pub mod ioctl;
pub mod lba;

pub use device::{partition_node, BlockDevice, DeviceKind};
pub use lba::{LogicalBlockAddresser, Range};
