//! Event system for UI decoupling.
//!
//! Lets the CLI (or any embedder) follow a run without the core knowing how
//! progress is displayed.

use std::fmt;
use std::sync::Mutex;

use crate::dispatch::RunMode;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Dump controller phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpPhase {
    /// Opening and configuring the bridge.
    Acquiring,
    /// Raw block dump in progress.
    Dumping,
    /// Power-cycling the bridge after a failed dump.
    Cycling,
    /// Releasing the bridge after a finished dump.
    Closing,
    Complete,
    Failed,
}

impl fmt::Display for DumpPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpPhase::Acquiring => write!(f, "Acquiring"),
            DumpPhase::Dumping => write!(f, "Dumping"),
            DumpPhase::Cycling => write!(f, "Cycling"),
            DumpPhase::Closing => write!(f, "Closing"),
            DumpPhase::Complete => write!(f, "Complete"),
            DumpPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpEvent {
    /// A mode run is starting.
    RunStarted { mode: RunMode },
    /// A mode run ended.
    RunFinished { mode: RunMode, success: bool },
    PhaseChanged { from: DumpPhase, to: DumpPhase },
    /// Acquiring the bridge failed; the controller will wait `retry_in_ms`.
    AcquireFailed {
        attempt: u32,
        error: String,
        retry_in_ms: u64,
    },
    DeviceAcquired { device_index: u32 },
    /// A raw dump attempt is starting at `start_cluster`.
    DumpStarted {
        attempt: u32,
        start_cluster: u32,
        low_frequency: bool,
    },
    /// A raw dump attempt stopped; the next one resumes at `failed_cluster`.
    DumpInterrupted { failed_cluster: u32, error: String },
    PortCycled,
    /// Later dump attempts use the slow clock.
    LowFrequencyEnabled { after_failures: u32 },
    DumpFinished {
        start_cluster: u32,
        end_cluster: u32,
        attempts: u32,
    },
    CardInitialized { ocr: u32 },
    Log { level: LogLevel, message: String },
}

/// Observer trait for receiving run events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DumpObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DumpEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DumpObserver for NullObserver {
    fn on_event(&self, _event: &DumpEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DumpObserver for TracingObserver {
    fn on_event(&self, event: &DumpEvent) {
        match event {
            DumpEvent::RunStarted { mode } => {
                tracing::info!(mode = %mode, "Run started");
            }
            DumpEvent::RunFinished { mode, success } => {
                tracing::info!(mode = %mode, success, "Run finished");
            }
            DumpEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Phase changed");
            }
            DumpEvent::AcquireFailed {
                attempt,
                error,
                retry_in_ms,
            } => {
                tracing::debug!(attempt, retry_in_ms, error = %error, "Acquire failed");
            }
            DumpEvent::DeviceAcquired { device_index } => {
                tracing::debug!(device_index, "Device acquired");
            }
            DumpEvent::DumpStarted {
                attempt,
                start_cluster,
                low_frequency,
            } => {
                tracing::info!(
                    attempt,
                    start = %format!("0x{:X}", start_cluster),
                    low_frequency,
                    "Dump started"
                );
            }
            DumpEvent::DumpInterrupted {
                failed_cluster,
                error,
            } => {
                tracing::warn!(at = %format!("0x{:X}", failed_cluster), error = %error, "Dump interrupted");
            }
            DumpEvent::PortCycled => {
                tracing::info!("Bridge port cycled");
            }
            DumpEvent::LowFrequencyEnabled { after_failures } => {
                tracing::warn!(after_failures, "Switching to low frequency clock");
            }
            DumpEvent::DumpFinished {
                start_cluster,
                end_cluster,
                attempts,
            } => {
                tracing::info!(
                    start = %format!("0x{:X}", start_cluster),
                    end = %format!("0x{:X}", end_cluster),
                    attempts,
                    "Dump finished"
                );
            }
            DumpEvent::CardInitialized { ocr } => {
                tracing::info!(ocr = %format!("0x{:08X}", ocr), "Card initialized");
            }
            DumpEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }
}

/// Observer that keeps every event, for assertions in tests.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<DumpEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DumpEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DumpObserver for RecordingObserver {
    fn on_event(&self, event: &DumpEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
