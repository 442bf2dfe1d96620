//! FTDI MPSSE bridge driven through nusb.

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Device, DeviceInfo, Endpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace, warn};

use super::mpsse;
use super::traits::{BridgeDriver, BridgeError};
use crate::card::spi::{self, MmcSpiCard, SpiLink};
use crate::card::{CardError, CardInfo, CardProtocol, DumpFailure, DumpRequest, DumpSummary};
use crate::config::{BridgeSettings, CardSettings, GpioStrap};
use crate::retry::{Sleeper, ThreadSleeper};

/// Give up on a read after this many packets carrying only modem status.
const MAX_EMPTY_READS: usize = 128;

/// Largest single IN request.
const MAX_READ_REQUEST: usize = 16 * 1024;

/// FTDI bridge found by its product string.
pub struct FtdiBridge {
    settings: BridgeSettings,
    card: CardSettings,
    /// Enumeration snapshot taken by the last `locate_device`.
    discovered: Vec<DeviceInfo>,
    sleeper: Box<dyn Sleeper>,
}

impl FtdiBridge {
    pub fn new(settings: BridgeSettings, card: CardSettings) -> Self {
        Self {
            settings,
            card,
            discovered: Vec::new(),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Use `sleeper` for the strap hold time.
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

/// Raw channel writes shared by the strap pulse and the close path.
trait ChannelIo {
    fn write(&mut self, data: &[u8]) -> Result<(), BridgeError>;
    fn set_bitmode(&mut self, mode: u8) -> Result<(), BridgeError>;
}

/// Drive the strap pins for `strap.hold_ms`, then float them again.
fn pulse_strap<C: ChannelIo>(
    channel: &mut C,
    strap: GpioStrap,
    sleeper: &dyn Sleeper,
) -> Result<(), BridgeError> {
    channel.write(&mpsse::set_bits_high(strap.level & strap.mask, strap.mask))?;
    sleeper.sleep(Duration::from_millis(strap.hold_ms));
    channel.write(&mpsse::set_bits_high(0, 0))
}

/// Float every pin and leave MPSSE mode.
///
/// Best-effort: a channel that no longer answers is still closed. After a
/// port cycle the endpoints belong to a device that has re-enumerated, so
/// nothing is sent at all.
fn release_channel<C: ChannelIo>(channel: &mut C, cycled: bool) {
    if cycled {
        debug!("Skipping pin release on a cycled device");
        return;
    }
    let mut release = mpsse::set_bits_low(0, 0).to_vec();
    release.extend_from_slice(&mpsse::set_bits_high(0, 0));
    if let Err(e) = channel.write(&release) {
        warn!(error = %e, "Failed to release pins");
    }
    if let Err(e) = channel.set_bitmode(mpsse::BITMODE_RESET) {
        warn!(error = %e, "Failed to reset bit mode");
    }
}

/// Open bridge channel.
pub struct FtdiHandle {
    device: Device,
    interface: Interface,
    out_ep: Endpoint<Bulk, Out>,
    in_ep: Endpoint<Bulk, In>,
    /// wIndex of SIO requests (channel number, 1-based).
    control_index: u16,
    timeout: Duration,
    /// Set once the device was reset; its endpoints are dead from then on.
    cycled: bool,
}

impl FtdiHandle {
    fn control_out(&self, request: u8, value: u16) -> Result<(), BridgeError> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: self.control_index,
                    data: &[],
                },
                self.timeout,
            )
            .wait()
            .map_err(|e| BridgeError::ControlFailed {
                request,
                message: e.to_string(),
            })
    }

    fn set_bitmode(&self, mode: u8) -> Result<(), BridgeError> {
        self.control_out(mpsse::REQUEST_SET_BITMODE, u16::from(mode) << 8)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let mut buf = Buffer::new(data.len());
        buf.extend_from_slice(data);
        self.out_ep
            .transfer_blocking(buf, self.timeout)
            .into_result()
            .map_err(|e| BridgeError::WriteFailed(e.to_string()))?;
        trace!(len = data.len(), "Bulk write");
        Ok(())
    }

    /// Read `len` payload bytes, dropping the per-packet modem status.
    fn read(&mut self, len: usize) -> Result<Vec<u8>, BridgeError> {
        let packet_size = self.in_ep.max_packet_size();
        if packet_size <= mpsse::MODEM_STATUS_LEN {
            return Err(BridgeError::ReadFailed(format!(
                "max packet size {packet_size} leaves no room for data"
            )));
        }

        let mut result = Vec::with_capacity(len);
        let mut empty_reads = 0;
        while result.len() < len {
            let remaining = len - result.len();
            let per_packet = packet_size - mpsse::MODEM_STATUS_LEN;
            let request = (remaining.div_ceil(per_packet) * packet_size)
                .clamp(packet_size, MAX_READ_REQUEST.max(packet_size));

            let mut buf = Buffer::new(request);
            buf.set_requested_len(request);
            let received = self
                .in_ep
                .transfer_blocking(buf, self.timeout)
                .into_result()
                .map_err(|e| BridgeError::ReadFailed(e.to_string()))?;

            let before = result.len();
            mpsse::strip_status(&received, packet_size, len, &mut result);
            if result.len() == before {
                empty_reads += 1;
                if empty_reads >= MAX_EMPTY_READS {
                    return Err(BridgeError::Timeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
            } else {
                empty_reads = 0;
            }
        }
        trace!(len, "Bulk read");
        Ok(result)
    }
}

impl ChannelIo for FtdiHandle {
    fn write(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        FtdiHandle::write(self, data)
    }

    fn set_bitmode(&mut self, mode: u8) -> Result<(), BridgeError> {
        FtdiHandle::set_bitmode(self, mode)
    }
}

impl SpiLink for FtdiHandle {
    fn select(&mut self) -> Result<(), BridgeError> {
        self.write(&mpsse::set_bits_low(mpsse::LOW_SELECTED, mpsse::LOW_DIRECTION))
    }

    fn deselect(&mut self) -> Result<(), BridgeError> {
        self.write(&mpsse::set_bits_low(mpsse::LOW_IDLE, mpsse::LOW_DIRECTION))
    }

    fn transfer(&mut self, data: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let mut reply = Vec::with_capacity(data.len());
        for chunk in data.chunks(mpsse::MAX_CLOCK_BYTES) {
            self.write(&mpsse::full_duplex(chunk))?;
            reply.extend(self.read(chunk.len())?);
        }
        Ok(reply)
    }

    fn set_clock_divisor(&mut self, divisor: u16) -> Result<(), BridgeError> {
        debug!(divisor, "Setting clock divisor");
        self.write(&mpsse::clock_divisor(divisor))
    }
}

impl BridgeDriver for FtdiBridge {
    type Handle = FtdiHandle;

    #[instrument(level = "debug", skip(self))]
    fn locate_device(&mut self, id: &str) -> Result<Option<u32>, BridgeError> {
        self.discovered = list_devices()
            .wait()
            .map_err(|e| BridgeError::EnumerationFailed(e.to_string()))?
            .collect();

        let found = self
            .discovered
            .iter()
            .position(|d| d.product_string() == Some(id));
        if let Some(index) = found {
            let d = &self.discovered[index];
            debug!(
                vid = %format!("{:04X}", d.vendor_id()),
                pid = %format!("{:04X}", d.product_id()),
                index,
                "Found bridge"
            );
        }
        Ok(found.map(|i| i as u32))
    }

    #[instrument(level = "debug", skip(self))]
    fn open_device(&mut self, index: u32) -> Result<FtdiHandle, BridgeError> {
        let info = self
            .discovered
            .get(index as usize)
            .ok_or_else(|| BridgeError::OpenFailed(format!("no device at index {index}")))?;

        let device = info
            .open()
            .wait()
            .map_err(|e| BridgeError::OpenFailed(e.to_string()))?;
        let iface = self.settings.interface;
        let interface = device
            .claim_interface(iface)
            .wait()
            .map_err(|e| BridgeError::OpenFailed(format!("claim interface {iface}: {e}")))?;

        let out_addr = mpsse::WRITE_EP_BASE + 2 * iface;
        let in_addr = mpsse::READ_EP_BASE + 2 * iface;
        let out_ep = interface
            .endpoint::<Bulk, Out>(out_addr)
            .map_err(|e| BridgeError::OpenFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(in_addr)
            .map_err(|e| BridgeError::OpenFailed(e.to_string()))?;

        info!(
            interface = iface,
            out_ep = %format!("0x{:02X}", out_addr),
            in_ep = %format!("0x{:02X}", in_addr),
            "Bridge opened"
        );
        Ok(FtdiHandle {
            device,
            interface,
            out_ep,
            in_ep,
            control_index: u16::from(iface) + 1,
            timeout: self.settings.usb_timeout(),
            cycled: false,
        })
    }

    fn configure_port(&mut self, handle: &mut FtdiHandle) -> Result<(), BridgeError> {
        handle.control_out(mpsse::REQUEST_RESET, mpsse::RESET_SIO)?;
        handle.control_out(mpsse::REQUEST_RESET, mpsse::RESET_PURGE_RX)?;
        handle.control_out(mpsse::REQUEST_RESET, mpsse::RESET_PURGE_TX)?;
        handle.control_out(
            mpsse::REQUEST_SET_LATENCY,
            u16::from(self.settings.latency_ms),
        )?;
        handle.set_bitmode(mpsse::BITMODE_RESET)?;
        handle.set_bitmode(mpsse::BITMODE_MPSSE)?;
        debug!(latency_ms = self.settings.latency_ms, "Port configured");
        Ok(())
    }

    fn synchronize(&mut self, handle: &mut FtdiHandle) -> Result<(), BridgeError> {
        for probe in mpsse::SYNC_PROBES {
            handle.write(&[probe])?;
            let reply = handle.read(2)?;
            let expected = mpsse::sync_reply(probe);
            if reply != expected {
                return Err(BridgeError::SyncMismatch {
                    expected: expected.to_vec(),
                    actual: reply,
                });
            }
        }
        debug!("MPSSE synchronized");
        Ok(())
    }

    fn apply_settings(&mut self, handle: &mut FtdiHandle) -> Result<(), BridgeError> {
        let mut cmd = vec![
            mpsse::DIS_DIV_5,
            mpsse::CLK_NO_ADAPTIVE,
            mpsse::DIS_3_PHASE,
        ];
        cmd.extend_from_slice(&mpsse::clock_divisor(self.card.init_divisor));
        cmd.push(mpsse::LOOPBACK_END);
        cmd.extend_from_slice(&mpsse::set_bits_low(mpsse::LOW_IDLE, mpsse::LOW_DIRECTION));
        cmd.extend_from_slice(&mpsse::set_bits_high(0, 0));
        handle.write(&cmd)
    }

    /// Dropping the handle releases the claimed interface; nusb reports no
    /// error for that, so closing itself cannot fail.
    #[instrument(level = "debug", skip_all, fields(cycled = handle.cycled))]
    fn close_device(&mut self, mut handle: FtdiHandle) -> Result<(), BridgeError> {
        let cycled = handle.cycled;
        release_channel(&mut handle, cycled);
        drop(handle);
        Ok(())
    }

    #[instrument(level = "debug", skip_all)]
    fn cycle_port(&mut self, handle: &mut FtdiHandle) -> Result<(), BridgeError> {
        // A reset that errors may still have dropped the device off the bus.
        handle.cycled = true;
        handle
            .device
            .reset()
            .wait()
            .map_err(|e| BridgeError::CycleFailed(e.to_string()))?;
        info!("Bridge reset, waiting for re-enumeration");
        Ok(())
    }
}

impl CardProtocol for FtdiBridge {
    fn initialize_card(&mut self, handle: &mut FtdiHandle) -> Result<CardInfo, CardError> {
        MmcSpiCard::initialize(handle, &self.card, false).map(|card| card.info())
    }

    #[instrument(level = "debug", skip_all)]
    fn enter_dumpable_mode(&mut self, handle: &mut FtdiHandle) -> Result<(), CardError> {
        let strap = self.settings.dumpable_strap;
        pulse_strap(handle, strap, self.sleeper.as_ref())?;
        info!(mask = %format!("0x{:02X}", strap.mask), hold_ms = strap.hold_ms, "Strap pulse sent");
        Ok(())
    }

    fn raw_block_dump(
        &mut self,
        handle: &mut FtdiHandle,
        request: &DumpRequest<'_>,
    ) -> Result<DumpSummary, DumpFailure> {
        spi::dump_clusters(handle, &self.card, request)
    }
}
