//! Mode dispatcher.
//!
//! Maps a [`RunMode`] to its hardware procedure. The single-shot modes make
//! exactly one acquire/release pair; dumping is handed to the
//! [`DumpController`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::{error, instrument};

use crate::card::{CardError, CardInfo, CardProtocol};
use crate::config::DumperConfig;
use crate::dump::{DumpController, DumpReport};
use crate::error::RunError;
use crate::events::{DumpEvent, DumpObserver, LogLevel};
use crate::retry::{Sleeper, StopFlag};
use crate::session::HardwareSession;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid mode is specified")]
pub struct UnknownMode(pub String);

/// What a run does, fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    EnterDumpableMode = 0,
    DumpCard = 1,
    StandaloneInitializeCard = 2,
}

impl TryFrom<u32> for RunMode {
    type Error = UnknownMode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RunMode::EnterDumpableMode),
            1 => Ok(RunMode::DumpCard),
            2 => Ok(RunMode::StandaloneInitializeCard),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl FromStr for RunMode {
    type Err = UnknownMode;

    /// Modes are decimal numbers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s.parse().map_err(|_| UnknownMode(s.to_string()))?;
        RunMode::try_from(value)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::EnterDumpableMode => write!(f, "enter dumpable mode"),
            RunMode::DumpCard => write!(f, "dump card"),
            RunMode::StandaloneInitializeCard => write!(f, "initialize card"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub mode: RunMode,
    /// Image file, used by [`RunMode::DumpCard`] only.
    pub output: PathBuf,
    pub start_cluster: u32,
}

#[derive(Debug)]
pub enum RunOutcome {
    DumpableModeEntered,
    Dumped(DumpReport),
    /// Standalone initialization ran; the card result is reported as is.
    Initialized(Result<CardInfo, CardError>),
}

pub struct Dispatcher<'a, D: CardProtocol> {
    driver: &'a mut D,
    config: &'a DumperConfig,
    sleeper: &'a dyn Sleeper,
    observer: &'a dyn DumpObserver,
    stop: StopFlag,
}

impl<'a, D: CardProtocol> Dispatcher<'a, D> {
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
        }
    }

    #[instrument(skip(self), fields(mode = %request.mode))]
    pub fn run(&mut self, request: &RunRequest) -> Result<RunOutcome, RunError> {
        match request.mode {
            RunMode::EnterDumpableMode => self.enter_dumpable_mode(),
            RunMode::DumpCard => self.dump(request),
            RunMode::StandaloneInitializeCard => self.initialize_card(),
        }
    }

    fn enter_dumpable_mode(&mut self) -> Result<RunOutcome, RunError> {
        let mut session = HardwareSession::acquire(self.driver, &self.config.device_id)?;
        let entered = self.driver.enter_dumpable_mode(session.handle_mut());
        let released = session.release(self.driver);

        match (entered, released) {
            (Ok(()), Ok(())) => {
                self.log(LogLevel::Info, "Target is in dumpable mode".to_string());
                Ok(RunOutcome::DumpableModeEntered)
            }
            (Ok(()), Err(e)) => Err(RunError::CloseFailure(e)),
            (Err(e), released) => {
                if let Err(close_err) = released {
                    error!(error = %close_err, "Close after failed mode switch also failed");
                }
                Err(RunError::EnterDumpableMode(e))
            }
        }
    }

    fn dump(&mut self, request: &RunRequest) -> Result<RunOutcome, RunError> {
        let mode = request.mode;
        self.observer.on_event(&DumpEvent::RunStarted { mode });

        let result = DumpController::new(
            self.driver,
            self.config,
            self.sleeper,
            self.observer,
            self.stop.clone(),
        )
        .run(request.start_cluster, &request.output);

        self.observer.on_event(&DumpEvent::RunFinished {
            mode,
            success: result.is_ok(),
        });
        result.map(RunOutcome::Dumped)
    }

    fn initialize_card(&mut self) -> Result<RunOutcome, RunError> {
        let mut session = HardwareSession::acquire(self.driver, &self.config.device_id)?;
        let card = self.driver.initialize_card(session.handle_mut());
        session.release(self.driver).map_err(RunError::CloseFailure)?;

        match card {
            Ok(info) => {
                self.observer
                    .on_event(&DumpEvent::CardInitialized { ocr: info.ocr });
                Ok(RunOutcome::Initialized(Ok(info)))
            }
            Err(e) if self.config.strict_init => Err(RunError::InitializeCard(e)),
            Err(e) => {
                self.log(LogLevel::Error, format!("Card initialization failed: {e}"));
                Ok(RunOutcome::Initialized(Err(e)))
            }
        }
    }

    fn log(&self, level: LogLevel, message: String) {
        self.observer.on_event(&DumpEvent::Log { level, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{DumpOutcome, MockBridge, MockStep};
    use crate::events::{NullObserver, RecordingObserver};
    use crate::retry::RecordingSleeper;
    use crate::session::SessionError;

    fn request(mode: RunMode) -> RunRequest {
        RunRequest {
            mode,
            output: PathBuf::from("card.img"),
            start_cluster: 0x100,
        }
    }

    fn dispatch(
        bridge: &mut MockBridge,
        config: &DumperConfig,
        mode: RunMode,
    ) -> Result<RunOutcome, RunError> {
        let sleeper = RecordingSleeper::new();
        Dispatcher::new(bridge, config, &sleeper, &NullObserver, StopFlag::new())
            .run(&request(mode))
    }

    fn assert_one_pair(bridge: &MockBridge) {
        assert_eq!(bridge.count(MockStep::Open), 1);
        assert_eq!(bridge.count(MockStep::Close), 1);
        assert!(bridge.open_handles().is_empty());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("0".parse(), Ok(RunMode::EnterDumpableMode));
        assert_eq!("1".parse(), Ok(RunMode::DumpCard));
        assert_eq!("2".parse(), Ok(RunMode::StandaloneInitializeCard));
        assert_eq!(
            "3".parse::<RunMode>(),
            Err(UnknownMode("3".to_string()))
        );
        assert!("0x1".parse::<RunMode>().is_err());
        assert!("".parse::<RunMode>().is_err());
        assert_eq!(
            UnknownMode("7".to_string()).to_string(),
            "Invalid mode is specified"
        );
    }

    #[test]
    fn test_enter_dumpable_mode() {
        let mut bridge = MockBridge::new();
        let config = DumperConfig::default();
        let outcome = dispatch(&mut bridge, &config, RunMode::EnterDumpableMode).unwrap();
        assert!(matches!(outcome, RunOutcome::DumpableModeEntered));
        assert_eq!(bridge.count(MockStep::EnterDumpable), 1);
        assert_one_pair(&bridge);
    }

    #[test]
    fn test_enter_dumpable_mode_failure_still_releases() {
        let mut bridge = MockBridge::new();
        bridge.fail_next(MockStep::EnterDumpable, 1);
        let config = DumperConfig::default();
        let err = dispatch(&mut bridge, &config, RunMode::EnterDumpableMode).unwrap_err();
        assert!(matches!(err, RunError::EnterDumpableMode(_)));
        assert_one_pair(&bridge);
    }

    #[test]
    fn test_single_shot_modes_do_not_retry_acquire() {
        for mode in [RunMode::EnterDumpableMode, RunMode::StandaloneInitializeCard] {
            let mut bridge = MockBridge::new();
            bridge.fail_next(MockStep::Locate, 1);
            let config = DumperConfig::default();
            let err = dispatch(&mut bridge, &config, mode).unwrap_err();
            assert!(matches!(
                err,
                RunError::Session(SessionError::DeviceNotFound { .. })
            ));
            assert_eq!(bridge.count(MockStep::Locate), 1);
            assert_eq!(bridge.count(MockStep::Open), 0);
        }
    }

    #[test]
    fn test_close_failure_is_fatal() {
        let mut bridge = MockBridge::new();
        bridge.fail_next(MockStep::Close, 1);
        let config = DumperConfig::default();
        let err = dispatch(&mut bridge, &config, RunMode::EnterDumpableMode).unwrap_err();
        assert!(matches!(err, RunError::CloseFailure(_)));
    }

    #[test]
    fn test_standalone_init_reports_card() {
        let mut bridge = MockBridge::new();
        let config = DumperConfig::default();
        let observer = RecordingObserver::new();
        let sleeper = RecordingSleeper::new();
        let outcome = Dispatcher::new(&mut bridge, &config, &sleeper, &observer, StopFlag::new())
            .run(&request(RunMode::StandaloneInitializeCard))
            .unwrap();

        let RunOutcome::Initialized(Ok(info)) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(
            observer.events(),
            vec![DumpEvent::CardInitialized { ocr: info.ocr }]
        );
        assert_eq!(bridge.count(MockStep::InitializeCard), 1);
        assert_one_pair(&bridge);
    }

    #[test]
    fn test_standalone_init_failure_is_surfaced() {
        let mut bridge = MockBridge::new();
        bridge.fail_next(MockStep::InitializeCard, 1);
        let config = DumperConfig::default();
        let outcome = dispatch(&mut bridge, &config, RunMode::StandaloneInitializeCard).unwrap();
        assert!(matches!(outcome, RunOutcome::Initialized(Err(_))));
        assert_one_pair(&bridge);
    }

    #[test]
    fn test_strict_init_makes_failure_fatal() {
        let mut bridge = MockBridge::new();
        bridge.fail_next(MockStep::InitializeCard, 1);
        let config = DumperConfig {
            strict_init: true,
            ..DumperConfig::default()
        };
        let err = dispatch(&mut bridge, &config, RunMode::StandaloneInitializeCard).unwrap_err();
        assert!(matches!(err, RunError::InitializeCard(_)));
        assert_one_pair(&bridge);
    }

    #[test]
    fn test_dump_is_bracketed_by_run_events() {
        let mut bridge = MockBridge::new();
        bridge.set_card_end(0x200);
        bridge.queue_dump(DumpOutcome::Fail {
            failed_cluster: 0x180,
        });
        let config = DumperConfig::default();
        let observer = RecordingObserver::new();
        let sleeper = RecordingSleeper::new();

        let outcome = Dispatcher::new(&mut bridge, &config, &sleeper, &observer, StopFlag::new())
            .run(&request(RunMode::DumpCard))
            .unwrap();
        let RunOutcome::Dumped(report) = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(report.end_cluster, 0x200);
        assert_eq!(bridge.dump_starts(), vec![0x100, 0x180]);

        let events = observer.events();
        assert_eq!(
            events.first(),
            Some(&DumpEvent::RunStarted {
                mode: RunMode::DumpCard
            })
        );
        assert_eq!(
            events.last(),
            Some(&DumpEvent::RunFinished {
                mode: RunMode::DumpCard,
                success: true
            })
        );
    }

    #[test]
    fn test_failed_dump_reports_unsuccessful_finish() {
        let mut bridge = MockBridge::new();
        bridge.queue_dump(DumpOutcome::Fail { failed_cluster: 0 });
        bridge.fail_next(MockStep::Cycle, 1);
        let config = DumperConfig::default();
        let observer = RecordingObserver::new();
        let sleeper = RecordingSleeper::new();

        let err = Dispatcher::new(&mut bridge, &config, &sleeper, &observer, StopFlag::new())
            .run(&request(RunMode::DumpCard))
            .unwrap_err();
        assert!(matches!(err, RunError::CycleFailure(_)));
        assert_eq!(
            observer.events().last(),
            Some(&DumpEvent::RunFinished {
                mode: RunMode::DumpCard,
                success: false
            })
        );
    }
}
