//! Timestamped console output.

use chrono::{Local, NaiveDateTime};
use mmcdump_core::{DumpEvent, DumpObserver, TracingObserver};

/// Prints progress lines with the local time to stdout and forwards every
/// event to tracing.
pub struct ConsoleObserver {
    inner: TracingObserver,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            inner: TracingObserver,
        }
    }
}

impl DumpObserver for ConsoleObserver {
    fn on_event(&self, event: &DumpEvent) {
        self.inner.on_event(event);
        if let Some(message) = describe(event) {
            stamp(&message);
        }
    }
}

/// Print one line prefixed with the current local time.
pub fn stamp(message: &str) {
    println!("{}", format_line(Local::now().naive_local(), message));
}

fn format_line(at: NaiveDateTime, message: &str) -> String {
    format!("[{}] {}", at.format("%Y-%m-%d %H:%M:%S"), message)
}

/// Console text for the events an operator should see.
fn describe(event: &DumpEvent) -> Option<String> {
    match event {
        DumpEvent::RunStarted { mode } => Some(format!("Starting: {mode}")),
        DumpEvent::RunFinished { mode, success } => Some(format!(
            "Finished: {mode} ({})",
            if *success { "ok" } else { "failed" }
        )),
        DumpEvent::DumpInterrupted {
            failed_cluster,
            error,
        } => Some(format!(
            "Dump interrupted at cluster 0x{failed_cluster:X}: {error}"
        )),
        DumpEvent::PortCycled => Some("Bridge power-cycled, reconnecting".to_string()),
        DumpEvent::LowFrequencyEnabled { .. } => {
            Some("Switching to the low frequency clock".to_string())
        }
        DumpEvent::DumpFinished {
            start_cluster,
            end_cluster,
            attempts,
        } => Some(format!(
            "Dumped clusters 0x{start_cluster:X}..0x{end_cluster:X} in {attempts} attempt(s)"
        )),
        DumpEvent::CardInitialized { ocr } => Some(format!("Card initialized, OCR 0x{ocr:08X}")),
        _ => None,
    }
}
