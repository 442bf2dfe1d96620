//! mmcdump-core: fault-tolerant raw dumping of MMC cards over a USB bridge.
//!
//! The crate drives an MMC card through a USB-to-GPIO bridge and keeps a
//! long raw dump going across transient USB and card failures: every failed
//! dump resumes from the first cluster that was not written, after the
//! bridge has been power-cycled and acquired again.
//!
//! # Architecture
//!
//! - **Bridge**: `BridgeDriver` trait, FTDI MPSSE backend (nusb), mock
//! - **Card**: `CardProtocol` trait, MMC SPI-mode driver, image writer
//! - **Session**: acquire/release of one configured bridge handle
//! - **Dump**: resumable dump controller with port-cycle recovery
//! - **Dispatch**: maps a run mode to its procedure
//! - **Events**: Observer pattern for UI decoupling
//! - **Config**: TOML configuration with defaults for every field
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use mmcdump_core::{
//!     Dispatcher, DumperConfig, FtdiBridge, RunMode, RunRequest, StopFlag, ThreadSleeper,
//!     TracingObserver,
//! };
//!
//! let config = DumperConfig::default();
//! let mut bridge = FtdiBridge::new(config.bridge.clone(), config.card.clone());
//! let request = RunRequest {
//!     mode: RunMode::DumpCard,
//!     output: PathBuf::from("card.img"),
//!     start_cluster: 0,
//! };
//!
//! Dispatcher::new(&mut bridge, &config, &ThreadSleeper, &TracingObserver, StopFlag::new())
//!     .run(&request)
//!     .expect("dump failed");
//! ```

pub mod bridge;
pub mod card;
pub mod config;
pub mod dispatch;
pub mod dump;
pub mod error;
pub mod events;
pub mod parse;
pub mod recovery;
pub mod retry;
pub mod session;

// Re-exports for convenience
pub use bridge::{BridgeDriver, BridgeError, FtdiBridge, MockBridge};
pub use card::{CardError, CardInfo, CardProtocol, DumpFailure, DumpRequest, DumpSummary};
pub use config::{
    AcquirePolicy, BackoffCurve, DEFAULT_ACQUIRE_BACKOFF_MS, DEFAULT_DEVICE_ID, DumperConfig,
};
pub use dispatch::{Dispatcher, RunMode, RunOutcome, RunRequest, UnknownMode};
pub use dump::{DumpController, DumpReport, DumpState};
pub use error::RunError;
pub use events::{DumpEvent, DumpObserver, DumpPhase, LogLevel, NullObserver, TracingObserver};
pub use parse::{ParseClusterError, parse_cluster};
pub use retry::{RecordingSleeper, Sleeper, StopFlag, ThreadSleeper};
pub use session::{HardwareSession, SessionError};
