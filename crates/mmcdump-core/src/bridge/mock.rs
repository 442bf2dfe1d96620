//! Scripted bridge for testing.

use std::collections::{HashMap, VecDeque};

use super::traits::{BridgeDriver, BridgeError};
use crate::card::{
    Addressing, CardError, CardInfo, CardProtocol, DumpFailure, DumpRequest, DumpSummary,
};

/// A step that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    /// Locate reports "no such device".
    Locate,
    /// Locate fails to list devices at all.
    Enumerate,
    Open,
    Configure,
    Synchronize,
    ApplySettings,
    Close,
    Cycle,
    InitializeCard,
    EnterDumpable,
}

/// One recorded call into the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Locate { id: String },
    Open { index: u32 },
    Configure { handle: u32 },
    Synchronize { handle: u32 },
    ApplySettings { handle: u32 },
    Close { handle: u32 },
    Cycle { handle: u32 },
    InitializeCard { handle: u32 },
    EnterDumpable { handle: u32 },
    RawDump {
        handle: u32,
        start: u32,
        low_frequency: bool,
    },
}

/// Scripted result of one `raw_block_dump` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutcome {
    /// Stop with the given failure marker.
    Fail { failed_cluster: u32 },
    /// Finish at `end_cluster`.
    Complete { end_cluster: u32 },
}

#[derive(Debug)]
pub struct MockHandle {
    id: u32,
}

impl MockHandle {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Mock bridge and card for unit testing the controller logic.
///
/// Every call is recorded. Steps succeed unless scripted to fail with
/// [`MockBridge::fail_next`]; raw dumps consume the queued outcomes and
/// complete at `card_end` once the queue is empty.
#[derive(Debug)]
pub struct MockBridge {
    failures: HashMap<MockStep, u32>,
    after_cycle: Vec<(MockStep, u32)>,
    dump_outcomes: VecDeque<DumpOutcome>,
    card_end: u32,
    calls: Vec<MockCall>,
    next_handle: u32,
    open: Vec<u32>,
}

impl MockBridge {
    pub fn new() -> Self {
        Self {
            failures: HashMap::new(),
            after_cycle: Vec::new(),
            dump_outcomes: VecDeque::new(),
            card_end: 0x1000,
            calls: Vec::new(),
            next_handle: 1,
            open: Vec::new(),
        }
    }

    /// Make the next `times` calls of `step` fail.
    pub fn fail_next(&mut self, step: MockStep, times: u32) {
        *self.failures.entry(step).or_insert(0) += times;
    }

    /// Make `step` fail `times` more after every successful port cycle.
    pub fn fail_after_cycle(&mut self, step: MockStep, times: u32) {
        self.after_cycle.push((step, times));
    }

    /// Queue the outcome of the next raw dump.
    pub fn queue_dump(&mut self, outcome: DumpOutcome) {
        self.dump_outcomes.push_back(outcome);
    }

    /// Cluster at which unscripted dumps complete.
    pub fn set_card_end(&mut self, end: u32) {
        self.card_end = end;
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    /// Number of recorded calls of `step`.
    pub fn count(&self, step: MockStep) -> usize {
        self.calls
            .iter()
            .filter(|call| match (step, call) {
                (MockStep::Locate | MockStep::Enumerate, MockCall::Locate { .. }) => true,
                (MockStep::Open, MockCall::Open { .. }) => true,
                (MockStep::Configure, MockCall::Configure { .. }) => true,
                (MockStep::Synchronize, MockCall::Synchronize { .. }) => true,
                (MockStep::ApplySettings, MockCall::ApplySettings { .. }) => true,
                (MockStep::Close, MockCall::Close { .. }) => true,
                (MockStep::Cycle, MockCall::Cycle { .. }) => true,
                (MockStep::InitializeCard, MockCall::InitializeCard { .. }) => true,
                (MockStep::EnterDumpable, MockCall::EnterDumpable { .. }) => true,
                _ => false,
            })
            .count()
    }

    /// Start clusters of every raw dump, in call order.
    pub fn dump_starts(&self) -> Vec<u32> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                MockCall::RawDump { start, .. } => Some(*start),
                _ => None,
            })
            .collect()
    }

    /// Low-frequency flag of every raw dump, in call order.
    pub fn dump_frequencies(&self) -> Vec<bool> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                MockCall::RawDump { low_frequency, .. } => Some(*low_frequency),
                _ => None,
            })
            .collect()
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> &[u32] {
        &self.open
    }

    fn should_fail(&mut self, step: MockStep) -> bool {
        match self.failures.get_mut(&step) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn step(&mut self, step: MockStep, call: MockCall) -> Result<(), BridgeError> {
        self.calls.push(call);
        if self.should_fail(step) {
            return Err(BridgeError::ControlFailed {
                request: 0,
                message: format!("scripted {step:?} failure"),
            });
        }
        Ok(())
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeDriver for MockBridge {
    type Handle = MockHandle;

    fn locate_device(&mut self, id: &str) -> Result<Option<u32>, BridgeError> {
        self.calls.push(MockCall::Locate { id: id.to_string() });
        if self.should_fail(MockStep::Enumerate) {
            return Err(BridgeError::EnumerationFailed("scripted".to_string()));
        }
        if self.should_fail(MockStep::Locate) {
            return Ok(None);
        }
        Ok(Some(0))
    }

    fn open_device(&mut self, index: u32) -> Result<MockHandle, BridgeError> {
        self.calls.push(MockCall::Open { index });
        if self.should_fail(MockStep::Open) {
            return Err(BridgeError::OpenFailed("scripted".to_string()));
        }
        let id = self.next_handle;
        self.next_handle += 1;
        self.open.push(id);
        Ok(MockHandle { id })
    }

    fn configure_port(&mut self, handle: &mut MockHandle) -> Result<(), BridgeError> {
        self.step(MockStep::Configure, MockCall::Configure { handle: handle.id })
    }

    fn synchronize(&mut self, handle: &mut MockHandle) -> Result<(), BridgeError> {
        self.step(
            MockStep::Synchronize,
            MockCall::Synchronize { handle: handle.id },
        )
    }

    fn apply_settings(&mut self, handle: &mut MockHandle) -> Result<(), BridgeError> {
        self.step(
            MockStep::ApplySettings,
            MockCall::ApplySettings { handle: handle.id },
        )
    }

    fn close_device(&mut self, handle: MockHandle) -> Result<(), BridgeError> {
        // The handle is gone whether or not closing reports success.
        self.open.retain(|&id| id != handle.id);
        self.step(MockStep::Close, MockCall::Close { handle: handle.id })
    }

    fn cycle_port(&mut self, handle: &mut MockHandle) -> Result<(), BridgeError> {
        self.calls.push(MockCall::Cycle { handle: handle.id });
        if self.should_fail(MockStep::Cycle) {
            return Err(BridgeError::CycleFailed("scripted".to_string()));
        }
        for (step, times) in self.after_cycle.clone() {
            self.fail_next(step, times);
        }
        Ok(())
    }
}

impl CardProtocol for MockBridge {
    fn initialize_card(&mut self, handle: &mut MockHandle) -> Result<CardInfo, CardError> {
        self.calls.push(MockCall::InitializeCard { handle: handle.id });
        if self.should_fail(MockStep::InitializeCard) {
            return Err(CardError::NoResponse { cmd: 1 });
        }
        Ok(CardInfo {
            ocr: 0xC0FF_8000,
            addressing: Addressing::Sector,
        })
    }

    fn enter_dumpable_mode(&mut self, handle: &mut MockHandle) -> Result<(), CardError> {
        self.calls.push(MockCall::EnterDumpable { handle: handle.id });
        if self.should_fail(MockStep::EnterDumpable) {
            return Err(CardError::Bridge(BridgeError::WriteFailed(
                "scripted".to_string(),
            )));
        }
        Ok(())
    }

    fn raw_block_dump(
        &mut self,
        handle: &mut MockHandle,
        request: &DumpRequest<'_>,
    ) -> Result<DumpSummary, DumpFailure> {
        self.calls.push(MockCall::RawDump {
            handle: handle.id,
            start: request.start_cluster,
            low_frequency: request.low_frequency,
        });
        let start = request.start_cluster;
        let outcome = self.dump_outcomes.pop_front().unwrap_or(DumpOutcome::Complete {
            end_cluster: self.card_end.max(start),
        });
        match outcome {
            DumpOutcome::Complete { end_cluster } => Ok(DumpSummary {
                start_cluster: start,
                end_cluster,
            }),
            DumpOutcome::Fail { failed_cluster } => Err(DumpFailure::new(
                failed_cluster,
                CardError::CrcMismatch {
                    expected: 0,
                    actual: 1,
                },
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn request(start: u32) -> DumpRequest<'static> {
        DumpRequest {
            start_cluster: start,
            end_cluster: None,
            output: Path::new("unused.img"),
            low_frequency: false,
        }
    }

    #[test]
    fn test_scripted_failures_are_consumed() {
        let mut mock = MockBridge::new();
        mock.fail_next(MockStep::Locate, 2);

        assert_eq!(mock.locate_device("USB FIFO").unwrap(), None);
        assert_eq!(mock.locate_device("USB FIFO").unwrap(), None);
        assert_eq!(mock.locate_device("USB FIFO").unwrap(), Some(0));
        assert_eq!(mock.count(MockStep::Locate), 3);
    }

    #[test]
    fn test_handles_are_tracked() {
        let mut mock = MockBridge::new();
        let first = mock.open_device(0).unwrap();
        let second = mock.open_device(0).unwrap();
        assert_eq!((first.id(), second.id()), (1, 2));
        assert_eq!(mock.open_handles(), &[1, 2]);

        mock.close_device(first).unwrap();
        assert_eq!(mock.open_handles(), &[2]);
    }

    #[test]
    fn test_dump_outcomes_then_default() {
        let mut mock = MockBridge::new();
        mock.set_card_end(0x200);
        mock.queue_dump(DumpOutcome::Fail {
            failed_cluster: 0x180,
        });
        let mut handle = mock.open_device(0).unwrap();

        let failure = mock.raw_block_dump(&mut handle, &request(0x100)).unwrap_err();
        assert_eq!(failure.failed_cluster, 0x180);

        let summary = mock.raw_block_dump(&mut handle, &request(0x180)).unwrap();
        assert_eq!(summary.end_cluster, 0x200);
        assert_eq!(mock.dump_starts(), vec![0x100, 0x180]);
    }
}
