//! Hardware session manager.
//!
//! A [`HardwareSession`] owns the bridge handle for one acquire/release
//! bracket. Acquiring runs the fixed setup sequence
//! locate → open → configure port → synchronize → apply settings and
//! reports which step failed.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::bridge::{BridgeDriver, BridgeError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Device {id:?} not found")]
    DeviceNotFound { id: String },

    #[error("Device enumeration failed: {0}")]
    Enumeration(#[source] BridgeError),

    #[error("Failed to open device {index}: {source}")]
    OpenFailure {
        index: u32,
        #[source]
        source: BridgeError,
    },

    #[error("Port configuration failed: {0}")]
    ConfigurationFailure(#[source] BridgeError),

    #[error("Protocol synchronization failed: {0}")]
    SyncFailure(#[source] BridgeError),

    #[error("Applying settings failed: {0}")]
    SettingsFailure(#[source] BridgeError),

    #[error("Failed to close device: {0}")]
    CloseFailure(#[source] BridgeError),
}

/// An open, configured bridge.
#[derive(Debug)]
pub struct HardwareSession<H> {
    handle: H,
    device_index: u32,
}

impl<H> HardwareSession<H> {
    /// Run the setup sequence against the device identified by `device_id`.
    #[instrument(level = "debug", skip(driver))]
    pub fn acquire<D>(driver: &mut D, device_id: &str) -> Result<Self, SessionError>
    where
        D: BridgeDriver<Handle = H>,
    {
        let index = driver
            .locate_device(device_id)
            .map_err(SessionError::Enumeration)?
            .ok_or_else(|| SessionError::DeviceNotFound {
                id: device_id.to_string(),
            })?;

        let mut handle = driver
            .open_device(index)
            .map_err(|source| SessionError::OpenFailure { index, source })?;

        if let Err(e) = Self::prepare(driver, &mut handle) {
            // Leave the driver with no half-configured handle behind.
            if let Err(close_err) = driver.close_device(handle) {
                warn!(error = %close_err, "Failed to close device after setup error");
            }
            return Err(e);
        }

        info!(device_index = index, "Device acquired");
        Ok(Self {
            handle,
            device_index: index,
        })
    }

    fn prepare<D>(driver: &mut D, handle: &mut H) -> Result<(), SessionError>
    where
        D: BridgeDriver<Handle = H>,
    {
        driver
            .configure_port(handle)
            .map_err(SessionError::ConfigurationFailure)?;
        driver
            .synchronize(handle)
            .map_err(SessionError::SyncFailure)?;
        driver
            .apply_settings(handle)
            .map_err(SessionError::SettingsFailure)?;
        debug!("Device configured");
        Ok(())
    }

    /// Close the handle. The session is consumed either way.
    #[instrument(level = "debug", skip_all, fields(device_index = self.device_index))]
    pub fn release<D>(self, driver: &mut D) -> Result<(), SessionError>
    where
        D: BridgeDriver<Handle = H>,
    {
        driver
            .close_device(self.handle)
            .map_err(SessionError::CloseFailure)?;
        debug!("Device released");
        Ok(())
    }

    pub fn handle_mut(&mut self) -> &mut H {
        &mut self.handle
    }

    pub fn device_index(&self) -> u32 {
        self.device_index
    }
}
