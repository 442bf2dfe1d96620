//! Errors that end a run.

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::card::CardError;
use crate::session::SessionError;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("Gave up acquiring the device after {attempts} attempts: {last}")]
    AcquireExhausted {
        attempts: u32,
        #[source]
        last: SessionError,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Port cycle failed: {0}")]
    CycleFailure(#[source] BridgeError),

    #[error("Close failed: {0}")]
    CloseFailure(#[source] SessionError),

    #[error("Entering dumpable mode failed: {0}")]
    EnterDumpableMode(#[source] CardError),

    #[error("Card initialization failed: {0}")]
    InitializeCard(#[source] CardError),
}
