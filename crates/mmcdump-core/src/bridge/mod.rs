//! Bridge layer module.

pub mod ftdi;
pub mod mock;
pub mod mpsse;
pub mod traits;

pub use ftdi::{FtdiBridge, FtdiHandle};
pub use mock::{DumpOutcome, MockBridge, MockCall, MockHandle, MockStep};
pub use traits::{BridgeDriver, BridgeError};
