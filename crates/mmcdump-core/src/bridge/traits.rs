//! Bridge driver abstraction.
//!
//! Defines the `BridgeDriver` trait for the USB-to-GPIO bridge chip,
//! allowing different implementations (FTDI over nusb, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Device not found: {id:?}")]
    DeviceNotFound { id: String },

    #[error("USB enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Control request 0x{request:02X} failed: {message}")]
    ControlFailed { request: u8, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("MPSSE sync failed: expected {expected:02X?}, got {actual:02X?}")]
    SyncMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error("Port cycle failed: {0}")]
    CycleFailed(String),

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract bridge driver interface.
///
/// Every step of the session setup sequence is a separate method so the
/// session manager can tell the caller exactly which one failed.
/// `close_device` consumes the handle: a released handle cannot be used
/// again.
pub trait BridgeDriver {
    /// Open hardware session.
    type Handle;

    /// Find the bridge whose identifying string matches `id`.
    ///
    /// Returns the device index to pass to [`BridgeDriver::open_device`], or
    /// `None` when no attached device matches.
    fn locate_device(&mut self, id: &str) -> Result<Option<u32>, BridgeError>;

    /// Open the device found at `index`.
    fn open_device(&mut self, index: u32) -> Result<Self::Handle, BridgeError>;

    /// Configure port parameters (reset, latency, bit mode).
    fn configure_port(&mut self, handle: &mut Self::Handle) -> Result<(), BridgeError>;

    /// Synchronize with the protocol engine on the bridge.
    fn synchronize(&mut self, handle: &mut Self::Handle) -> Result<(), BridgeError>;

    /// Apply the final clock and pin settings.
    fn apply_settings(&mut self, handle: &mut Self::Handle) -> Result<(), BridgeError>;

    /// Close the device.
    fn close_device(&mut self, handle: Self::Handle) -> Result<(), BridgeError>;

    /// Emulate a physical unplug/replug of the bridge.
    ///
    /// The handle is unusable afterwards and must be closed.
    fn cycle_port(&mut self, handle: &mut Self::Handle) -> Result<(), BridgeError>;
}
