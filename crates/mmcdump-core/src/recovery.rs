//! Hardware recovery after a failed dump.

use tracing::{error, instrument};

use crate::bridge::BridgeDriver;
use crate::error::RunError;
use crate::session::{HardwareSession, SessionError};

/// Power-cycle the bridge, then release the now unusable session.
///
/// A failed cycle still closes the handle best-effort; the cycle error is
/// the one reported.
#[instrument(level = "debug", skip_all, fields(device_index = session.device_index()))]
pub fn cycle_and_release<D: BridgeDriver>(
    driver: &mut D,
    mut session: HardwareSession<D::Handle>,
) -> Result<(), RunError> {
    if let Err(e) = driver.cycle_port(session.handle_mut()) {
        error!(error = %e, "Port cycle failed");
        if let Err(close_err) = session.release(driver) {
            error!(error = %close_err, "Close after failed cycle also failed");
        }
        return Err(RunError::CycleFailure(e));
    }

    session.release(driver).map_err(|e| match e {
        SessionError::CloseFailure(_) => RunError::CloseFailure(e),
        other => RunError::Session(other),
    })
}
