//! Resumable dump controller.
//!
//! Drives raw block dumps until one completes. A failed dump moves the
//! cursor to the cluster the card layer reported, power-cycles the bridge
//! and starts over from acquiring the device.

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::bridge::BridgeDriver;
use crate::card::{CardProtocol, DumpRequest};
use crate::config::DumperConfig;
use crate::error::RunError;
use crate::events::{DumpEvent, DumpObserver, DumpPhase};
use crate::recovery;
use crate::retry::{Sleeper, StopFlag};
use crate::session::HardwareSession;

/// Mutable state of one dump run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpState {
    /// Next cluster to read.
    pub cursor: u32,
    pub phase: DumpPhase,
    pub low_frequency: bool,
    /// Raw dump calls made so far.
    pub dump_attempts: u32,
    /// Consecutive failed dumps that did not move the cursor forward.
    pub stalled_failures: u32,
    pub port_cycles: u32,
    /// Failed acquire attempts over the whole run.
    pub acquire_failures: u32,
}

impl DumpState {
    pub fn new(start_cluster: u32) -> Self {
        Self {
            cursor: start_cluster,
            phase: DumpPhase::Acquiring,
            low_frequency: false,
            dump_attempts: 0,
            stalled_failures: 0,
            port_cycles: 0,
            acquire_failures: 0,
        }
    }
}

/// Summary of a completed dump run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpReport {
    pub start_cluster: u32,
    /// One past the last cluster written.
    pub end_cluster: u32,
    pub attempts: u32,
    pub port_cycles: u32,
    pub acquire_failures: u32,
    pub low_frequency: bool,
}

pub struct DumpController<'a, D: CardProtocol> {
    driver: &'a mut D,
    config: &'a DumperConfig,
    sleeper: &'a dyn Sleeper,
    observer: &'a dyn DumpObserver,
    stop: StopFlag,
    state: DumpState,
}

impl<'a, D: CardProtocol> DumpController<'a, D> {
    pub fn new(
        driver: &'a mut D,
        config: &'a DumperConfig,
        sleeper: &'a dyn Sleeper,
        observer: &'a dyn DumpObserver,
        stop: StopFlag,
    ) -> Self {
        Self {
            driver,
            config,
            sleeper,
            observer,
            stop,
            state: DumpState::new(0),
        }
    }

    /// State as of the end of the last run.
    pub fn state(&self) -> &DumpState {
        &self.state
    }

    /// Dump the card from `start_cluster` into `output`.
    #[instrument(skip(self, output), fields(start = %format!("0x{:X}", start_cluster)))]
    pub fn run(&mut self, start_cluster: u32, output: &Path) -> Result<DumpReport, RunError> {
        self.state = DumpState::new(start_cluster);
        let result = self.drive(start_cluster, output);
        match &result {
            Ok(_) => self.set_phase(DumpPhase::Complete),
            Err(e) => {
                warn!(error = %e, cursor = %format!("0x{:X}", self.state.cursor), "Dump run failed");
                self.set_phase(DumpPhase::Failed);
            }
        }
        result
    }

    fn drive(&mut self, start_cluster: u32, output: &Path) -> Result<DumpReport, RunError> {
        loop {
            self.set_phase(DumpPhase::Acquiring);
            let mut session = self.acquire()?;

            self.set_phase(DumpPhase::Dumping);
            self.state.dump_attempts += 1;
            let request = DumpRequest {
                start_cluster: self.state.cursor,
                end_cluster: self.config.end_cluster,
                output,
                low_frequency: self.state.low_frequency,
            };
            self.emit(DumpEvent::DumpStarted {
                attempt: self.state.dump_attempts,
                start_cluster: request.start_cluster,
                low_frequency: request.low_frequency,
            });

            match self.driver.raw_block_dump(session.handle_mut(), &request) {
                Ok(summary) => {
                    self.set_phase(DumpPhase::Closing);
                    session.release(self.driver).map_err(RunError::CloseFailure)?;

                    let report = DumpReport {
                        start_cluster,
                        end_cluster: summary.end_cluster,
                        attempts: self.state.dump_attempts,
                        port_cycles: self.state.port_cycles,
                        acquire_failures: self.state.acquire_failures,
                        low_frequency: self.state.low_frequency,
                    };
                    self.emit(DumpEvent::DumpFinished {
                        start_cluster,
                        end_cluster: report.end_cluster,
                        attempts: report.attempts,
                    });
                    return Ok(report);
                }
                Err(failure) => {
                    self.emit(DumpEvent::DumpInterrupted {
                        failed_cluster: failure.failed_cluster,
                        error: failure.source.to_string(),
                    });
                    self.record_failure(failure.failed_cluster);

                    self.set_phase(DumpPhase::Cycling);
                    recovery::cycle_and_release(self.driver, session)?;
                    self.state.port_cycles += 1;
                    self.emit(DumpEvent::PortCycled);
                }
            }
        }
    }

    /// Retry acquiring the bridge under the configured policy.
    fn acquire(&mut self) -> Result<HardwareSession<<D as BridgeDriver>::Handle>, RunError> {
        let config = self.config;
        let policy = &config.acquire;
        let mut failures = 0u32;
        loop {
            if self.stop.is_stop_requested() {
                return Err(RunError::Cancelled);
            }

            match HardwareSession::acquire(self.driver, &config.device_id) {
                Ok(session) => {
                    self.emit(DumpEvent::DeviceAcquired {
                        device_index: session.device_index(),
                    });
                    return Ok(session);
                }
                Err(e) => {
                    failures += 1;
                    self.state.acquire_failures += 1;
                    if !policy.allows_retry(failures) {
                        return Err(RunError::AcquireExhausted {
                            attempts: failures,
                            last: e,
                        });
                    }

                    let delay = policy.delay_after(failures);
                    self.emit(DumpEvent::AcquireFailed {
                        attempt: failures,
                        error: e.to_string(),
                        retry_in_ms: delay.as_millis() as u64,
                    });
                    if self.stop.is_stop_requested() {
                        return Err(RunError::Cancelled);
                    }
                    self.sleeper.sleep(delay);
                }
            }
        }
    }

    /// Move the cursor to the failure marker and update the escalation
    /// counters.
    fn record_failure(&mut self, marker: u32) {
        let cursor = self.state.cursor;
        if marker < cursor {
            warn!(
                cursor = %format!("0x{:X}", cursor),
                marker = %format!("0x{:X}", marker),
                "Failure marker is behind the cursor"
            );
        }

        if marker > cursor {
            self.state.stalled_failures = 0;
        } else {
            self.state.stalled_failures += 1;
        }
        self.state.cursor = marker;

        if let Some(limit) = self.config.escalate_low_freq_after
            && !self.state.low_frequency
            && self.state.stalled_failures >= limit
        {
            self.state.low_frequency = true;
            info!(after_failures = self.state.stalled_failures, "Escalating to low frequency");
            self.emit(DumpEvent::LowFrequencyEnabled {
                after_failures: self.state.stalled_failures,
            });
        }
    }

    fn set_phase(&mut self, to: DumpPhase) {
        let from = self.state.phase;
        if from != to {
            self.state.phase = to;
            self.emit(DumpEvent::PhaseChanged { from, to });
        }
    }

    fn emit(&self, event: DumpEvent) {
        self.observer.on_event(&event);
    }
}
