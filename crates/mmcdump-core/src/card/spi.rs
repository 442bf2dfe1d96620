//! MMC card driver over a byte-oriented SPI link.
//!
//! The link is full duplex: every byte clocked out returns the byte the
//! card drove at the same time. Bytes read past the one we were waiting
//! for are kept in `pending` and consumed first by the next read.

use std::collections::VecDeque;

use tracing::{debug, info, instrument, trace, warn};

use super::mmc::{self, CMD0, CMD1, CMD16, CMD17, CMD58, DATA_START_BLOCK, IDLE_BYTE};
use super::{
    Addressing, CLUSTER_SIZE, CardError, CardInfo, ClusterImage, DumpFailure, DumpRequest,
    DumpSummary, ImageSink,
};
use crate::bridge::BridgeError;
use crate::config::CardSettings;

/// CMD0 is retried this many times before giving up.
const GO_IDLE_ATTEMPTS: u32 = 5;

/// Bytes fetched per poll while waiting for a data token.
const TOKEN_POLL_CHUNK: usize = 8;

/// Log progress every this many clusters.
const PROGRESS_INTERVAL: u32 = 0x800;

/// Byte-level access to the card lines.
pub trait SpiLink {
    /// Drive chip select active.
    fn select(&mut self) -> Result<(), BridgeError>;

    /// Drive chip select inactive.
    fn deselect(&mut self) -> Result<(), BridgeError>;

    /// Clock out `data` and return the bytes clocked in.
    fn transfer(&mut self, data: &[u8]) -> Result<Vec<u8>, BridgeError>;

    /// Change the bus clock (60 MHz / `divisor`).
    fn set_clock_divisor(&mut self, divisor: u16) -> Result<(), BridgeError>;
}

/// An initialized MMC card.
pub struct MmcSpiCard<'a, L: SpiLink> {
    link: &'a mut L,
    settings: &'a CardSettings,
    pending: VecDeque<u8>,
    info: CardInfo,
}

impl<'a, L: SpiLink> MmcSpiCard<'a, L> {
    /// Reset the card into SPI mode and bring it to the ready state.
    #[instrument(level = "debug", skip(link, settings))]
    pub fn initialize(
        link: &'a mut L,
        settings: &'a CardSettings,
        low_frequency: bool,
    ) -> Result<Self, CardError> {
        link.set_clock_divisor(settings.init_divisor)?;
        link.deselect()?;
        link.transfer(&[IDLE_BYTE; mmc::POWER_UP_CLOCK_BYTES])?;

        let mut card = Self {
            link,
            settings,
            pending: VecDeque::new(),
            info: CardInfo {
                ocr: 0,
                addressing: Addressing::Byte,
            },
        };

        card.go_idle()?;
        card.wait_ready()?;

        let ocr = card.transaction(|c| {
            let r1 = c.send_command(CMD58, 0)?;
            if r1 != mmc::R1_READY_STATE {
                return Err(CardError::Rejected { cmd: CMD58, r1 });
            }
            Ok(mmc::parse_ocr(&c.read_bytes(4)?))
        })?;
        card.info = CardInfo {
            ocr,
            addressing: mmc::ocr_addressing(ocr),
        };

        if card.info.addressing == Addressing::Byte {
            card.simple_command(CMD16, CLUSTER_SIZE as u32)?;
        }

        let divisor = if low_frequency {
            settings.low_freq_divisor
        } else {
            settings.transfer_divisor
        };
        card.link.set_clock_divisor(divisor)?;

        info!(
            ocr = %format!("0x{:08X}", ocr),
            addressing = %card.info.addressing,
            divisor,
            "Card initialized"
        );
        Ok(card)
    }

    pub fn info(&self) -> CardInfo {
        self.info
    }

    /// Read one cluster into `block`.
    pub fn read_cluster(
        &mut self,
        cluster: u32,
        block: &mut [u8; CLUSTER_SIZE],
    ) -> Result<(), CardError> {
        let address = mmc::cluster_address(self.info.addressing, cluster)
            .ok_or(CardError::OutOfRange { cluster })?;

        self.transaction(|c| {
            let r1 = c.send_command(CMD17, address)?;
            if mmc::is_out_of_range(r1) {
                return Err(CardError::OutOfRange { cluster });
            }
            if r1 != mmc::R1_READY_STATE {
                return Err(CardError::Rejected { cmd: CMD17, r1 });
            }

            let token = c.wait_token()?;
            if token != DATA_START_BLOCK {
                // Data error token: 0000_xxxx, bit 3 is "out of range".
                if token & 0xF0 == 0 && token & 0x08 != 0 {
                    return Err(CardError::OutOfRange { cluster });
                }
                return Err(CardError::DataToken { token });
            }

            let data = c.read_bytes(CLUSTER_SIZE + 2)?;
            block.copy_from_slice(&data[..CLUSTER_SIZE]);
            let expected = u16::from_be_bytes([data[CLUSTER_SIZE], data[CLUSTER_SIZE + 1]]);
            let actual = mmc::crc16(&block[..]);
            if expected != actual {
                return Err(CardError::CrcMismatch { expected, actual });
            }
            Ok(())
        })
    }

    fn go_idle(&mut self) -> Result<(), CardError> {
        let mut last = IDLE_BYTE;
        for attempt in 1..=GO_IDLE_ATTEMPTS {
            match self.transaction(|c| c.send_command(CMD0, 0)) {
                Ok(mmc::R1_IDLE_STATE) => return Ok(()),
                Ok(r1) => last = r1,
                Err(CardError::NoResponse { .. }) => {}
                Err(e) => return Err(e),
            }
            trace!(attempt, "CMD0 not accepted yet");
        }
        if last == IDLE_BYTE {
            Err(CardError::NoResponse { cmd: CMD0 })
        } else {
            Err(CardError::Rejected { cmd: CMD0, r1: last })
        }
    }

    fn wait_ready(&mut self) -> Result<(), CardError> {
        for _ in 0..self.settings.op_cond_attempts {
            let r1 = self.transaction(|c| c.send_command(CMD1, mmc::OP_COND_SECTOR_MODE))?;
            match r1 {
                mmc::R1_READY_STATE => return Ok(()),
                mmc::R1_IDLE_STATE => continue,
                _ => return Err(CardError::Rejected { cmd: CMD1, r1 }),
            }
        }
        Err(CardError::Timeout {
            polls: self.settings.op_cond_attempts,
        })
    }

    fn simple_command(&mut self, cmd: u8, arg: u32) -> Result<(), CardError> {
        let r1 = self.transaction(|c| c.send_command(cmd, arg))?;
        if r1 != mmc::R1_READY_STATE {
            return Err(CardError::Rejected { cmd, r1 });
        }
        Ok(())
    }

    /// Run `f` with chip select asserted, releasing it afterwards.
    fn transaction<T, F>(&mut self, f: F) -> Result<T, CardError>
    where
        F: FnOnce(&mut Self) -> Result<T, CardError>,
    {
        self.pending.clear();
        self.link.select()?;
        let result = f(self);
        self.link.deselect()?;
        // One extra byte lets the card release the data line.
        self.link.transfer(&[IDLE_BYTE])?;
        self.pending.clear();
        result
    }

    /// Send a command frame and return the R1 byte.
    fn send_command(&mut self, cmd: u8, arg: u32) -> Result<u8, CardError> {
        let frame = mmc::command_frame(cmd, arg);
        let mut out = Vec::with_capacity(frame.len() + mmc::NCR_BYTES);
        out.extend_from_slice(&frame);
        out.resize(frame.len() + mmc::NCR_BYTES, IDLE_BYTE);

        let response = self.link.transfer(&out)?;
        let window = response.get(frame.len()..).unwrap_or(&[]);
        let index = mmc::find_r1(window).ok_or(CardError::NoResponse { cmd })?;
        self.pending.extend(&window[index + 1..]);
        trace!(cmd, arg = %format!("0x{:08X}", arg), r1 = %format!("0x{:02X}", window[index]), "Command");
        Ok(window[index])
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, CardError> {
        let buffered = len.min(self.pending.len());
        let mut bytes: Vec<u8> = self.pending.drain(..buffered).collect();
        if bytes.len() < len {
            let more = self.link.transfer(&vec![IDLE_BYTE; len - bytes.len()])?;
            bytes.extend(more);
        }
        Ok(bytes)
    }

    fn wait_token(&mut self) -> Result<u8, CardError> {
        for _ in 0..self.settings.token_poll_limit {
            let chunk = self.read_bytes(TOKEN_POLL_CHUNK)?;
            if let Some(index) = chunk.iter().position(|&b| b != IDLE_BYTE) {
                for &b in chunk[index + 1..].iter().rev() {
                    self.pending.push_front(b);
                }
                return Ok(chunk[index]);
            }
        }
        Err(CardError::Timeout {
            polls: self.settings.token_poll_limit,
        })
    }
}

/// Read clusters from `request.start_cluster` until the card runs out,
/// `request.end_cluster` is reached, or a read fails.
#[instrument(skip(link, settings, request), fields(start = %format!("0x{:X}", request.start_cluster)))]
pub fn dump_clusters<L: SpiLink>(
    link: &mut L,
    settings: &CardSettings,
    request: &DumpRequest<'_>,
) -> Result<DumpSummary, DumpFailure> {
    let start = request.start_cluster;
    let mut card = MmcSpiCard::initialize(link, settings, request.low_frequency)
        .map_err(|e| DumpFailure::new(start, e))?;
    let mut image = ClusterImage::open(request.output).map_err(|e| DumpFailure::new(start, e))?;
    copy_clusters(&mut card, &mut image, request)
}

/// Copy clusters from an initialized card into `image`.
///
/// Clusters only count as written once `image` has synced them. When a sync
/// fails the failure marker falls back to the start of this attempt.
fn copy_clusters<L: SpiLink, I: ImageSink>(
    card: &mut MmcSpiCard<'_, L>,
    image: &mut I,
    request: &DumpRequest<'_>,
) -> Result<DumpSummary, DumpFailure> {
    let start = request.start_cluster;
    let mut cluster = start;
    let mut block = [0u8; CLUSTER_SIZE];

    loop {
        if request.end_cluster.is_some_and(|end| cluster >= end) {
            break;
        }

        match card.read_cluster(cluster, &mut block) {
            Ok(()) => {}
            Err(CardError::OutOfRange { .. }) => {
                info!(cluster = %format!("0x{:X}", cluster), "Reached end of card");
                break;
            }
            Err(e) => {
                warn!(cluster = %format!("0x{:X}", cluster), error = %e, "Cluster read failed");
                return Err(interrupted(image, start, cluster, e));
            }
        }

        if let Err(e) = image.write_cluster(cluster, &block) {
            warn!(cluster = %format!("0x{:X}", cluster), error = %e, "Cluster write failed");
            return Err(interrupted(image, start, cluster, e.into()));
        }

        if cluster % PROGRESS_INTERVAL == 0 {
            debug!(cluster = %format!("0x{:X}", cluster), "Dump progress");
        }

        match cluster.checked_add(1) {
            Some(next) => cluster = next,
            None => {
                warn!("Wrote the last addressable cluster");
                break;
            }
        }
    }

    image.sync().map_err(|e| DumpFailure::new(start, e))?;

    Ok(DumpSummary {
        start_cluster: start,
        end_cluster: cluster,
    })
}

/// Sync what was written before `cluster` and build the failure for it.
fn interrupted<I: ImageSink>(
    image: &mut I,
    start: u32,
    cluster: u32,
    error: CardError,
) -> DumpFailure {
    match image.sync() {
        Ok(()) => DumpFailure::new(cluster, error),
        Err(sync_err) => {
            warn!(error = %sync_err, "Could not sync image after failure");
            DumpFailure::new(start, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::{Path, PathBuf};

    /// A card answering SPI-mode commands from an in-memory block list.
    struct SimulatedCard {
        pub blocks: Vec<[u8; CLUSTER_SIZE]>,
        pub ocr: u32,
        pub busy_polls: u32,
        /// Clusters whose next read returns a corrupted CRC.
        pub corrupt_once: Vec<u32>,
        pub divisors: Vec<u16>,
        pub commands: Vec<(u8, u32)>,
        /// Serve every address from the block list, modulo its length.
        pub wrap_addresses: bool,
        selected: bool,
        incoming: Vec<u8>,
        outgoing: VecDeque<u8>,
    }

    impl SimulatedCard {
        pub fn new(block_count: usize) -> Self {
            let blocks = (0..block_count)
                .map(|i| {
                    let mut b = [0u8; CLUSTER_SIZE];
                    for (j, byte) in b.iter_mut().enumerate() {
                        *byte = (i as u8).wrapping_mul(31).wrapping_add(j as u8);
                    }
                    b
                })
                .collect();
            Self {
                blocks,
                ocr: 0xC0FF_8000,
                busy_polls: 2,
                corrupt_once: Vec::new(),
                divisors: Vec::new(),
                commands: Vec::new(),
                wrap_addresses: false,
                selected: false,
                incoming: Vec::new(),
                outgoing: VecDeque::new(),
            }
        }

        fn execute(&mut self, cmd: u8, arg: u32) {
            self.commands.push((cmd, arg));
            self.outgoing.push_back(IDLE_BYTE);
            match cmd {
                CMD0 => self.outgoing.push_back(mmc::R1_IDLE_STATE),
                CMD1 => {
                    if self.busy_polls > 0 {
                        self.busy_polls -= 1;
                        self.outgoing.push_back(mmc::R1_IDLE_STATE);
                    } else {
                        self.outgoing.push_back(mmc::R1_READY_STATE);
                    }
                }
                CMD58 => {
                    self.outgoing.push_back(mmc::R1_READY_STATE);
                    self.outgoing.extend(self.ocr.to_be_bytes());
                }
                CMD16 => self.outgoing.push_back(mmc::R1_READY_STATE),
                CMD17 => {
                    let mut index = match mmc::ocr_addressing(self.ocr) {
                        Addressing::Sector => arg,
                        Addressing::Byte => arg / CLUSTER_SIZE as u32,
                    };
                    if self.wrap_addresses {
                        index %= self.blocks.len() as u32;
                    }
                    let Some(block) = self.blocks.get(index as usize).copied() else {
                        self.outgoing.push_back(mmc::R1_PARAMETER_ERROR);
                        return;
                    };
                    self.outgoing.push_back(mmc::R1_READY_STATE);
                    self.outgoing.extend([IDLE_BYTE, IDLE_BYTE, DATA_START_BLOCK]);
                    self.outgoing.extend(block);
                    let mut crc = mmc::crc16(&block);
                    if let Some(pos) = self.corrupt_once.iter().position(|&c| c == index) {
                        self.corrupt_once.remove(pos);
                        crc ^= 0xFFFF;
                    }
                    self.outgoing.extend(crc.to_be_bytes());
                }
                _ => self.outgoing.push_back(mmc::R1_ILLEGAL_COMMAND),
            }
        }
    }

    impl SpiLink for SimulatedCard {
        fn select(&mut self) -> Result<(), BridgeError> {
            self.selected = true;
            Ok(())
        }

        fn deselect(&mut self) -> Result<(), BridgeError> {
            self.selected = false;
            self.incoming.clear();
            self.outgoing.clear();
            Ok(())
        }

        fn transfer(&mut self, data: &[u8]) -> Result<Vec<u8>, BridgeError> {
            let mut reply = Vec::with_capacity(data.len());
            for &b in data {
                reply.push(self.outgoing.pop_front().unwrap_or(IDLE_BYTE));
                if !self.selected {
                    continue;
                }
                if self.incoming.is_empty() && b & 0xC0 != 0x40 {
                    continue;
                }
                self.incoming.push(b);
                if self.incoming.len() == 6 {
                    let cmd = self.incoming[0] & 0x3F;
                    let arg = u32::from_be_bytes([
                        self.incoming[1],
                        self.incoming[2],
                        self.incoming[3],
                        self.incoming[4],
                    ]);
                    self.incoming.clear();
                    self.execute(cmd, arg);
                }
            }
            Ok(reply)
        }

        fn set_clock_divisor(&mut self, divisor: u16) -> Result<(), BridgeError> {
            self.divisors.push(divisor);
            Ok(())
        }
    }

    /// In-memory image whose sync can be told to fail.
    #[derive(Default)]
    struct MemoryImage {
        written: Vec<u32>,
        durable: Vec<u32>,
        fail_sync: bool,
        fail_write_at: Option<u32>,
    }

    impl ImageSink for MemoryImage {
        fn write_cluster(&mut self, cluster: u32, _data: &[u8; CLUSTER_SIZE]) -> io::Result<()> {
            if self.fail_write_at == Some(cluster) {
                return Err(io::Error::other("disk full"));
            }
            self.written.push(cluster);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                return Err(io::Error::other("sync failed"));
            }
            self.durable = self.written.clone();
            Ok(())
        }
    }

    fn copy_request(start_cluster: u32) -> DumpRequest<'static> {
        DumpRequest {
            start_cluster,
            end_cluster: None,
            output: Path::new("unused.img"),
            low_frequency: false,
        }
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mmcdump-spi-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_initialize_polls_until_ready() {
        let mut sim = SimulatedCard::new(4);
        sim.busy_polls = 3;
        let settings = CardSettings::default();

        let card = MmcSpiCard::initialize(&mut sim, &settings, false).unwrap();
        assert_eq!(card.info().addressing, Addressing::Sector);
        drop(card);

        let cmd1_count = sim.commands.iter().filter(|(c, _)| *c == CMD1).count();
        assert_eq!(cmd1_count, 4);
        assert_eq!(sim.commands[0].0, CMD0);
        // Sector addressed cards skip SET_BLOCKLEN.
        assert!(!sim.commands.iter().any(|(c, _)| *c == CMD16));
        assert_eq!(
            sim.divisors,
            vec![settings.init_divisor, settings.transfer_divisor]
        );
    }

    #[test]
    fn test_byte_addressed_card_sets_block_length() {
        let mut sim = SimulatedCard::new(4);
        sim.ocr = 0x80FF_8000;
        let settings = CardSettings::default();

        let mut card = MmcSpiCard::initialize(&mut sim, &settings, true).unwrap();
        assert_eq!(card.info().addressing, Addressing::Byte);
        let mut block = [0u8; CLUSTER_SIZE];
        card.read_cluster(2, &mut block).unwrap();
        drop(card);

        assert!(sim.commands.contains(&(CMD16, CLUSTER_SIZE as u32)));
        assert!(sim.commands.contains(&(CMD17, 2 * CLUSTER_SIZE as u32)));
        assert_eq!(block, sim.blocks[2]);
        assert_eq!(sim.divisors.last(), Some(&settings.low_freq_divisor));
    }

    #[test]
    fn test_busy_card_times_out() {
        let mut sim = SimulatedCard::new(1);
        sim.busy_polls = 100;
        let settings = CardSettings {
            op_cond_attempts: 10,
            ..CardSettings::default()
        };

        let err = MmcSpiCard::initialize(&mut sim, &settings, false)
            .err()
            .unwrap();
        assert!(matches!(err, CardError::Timeout { polls: 10 }));
    }

    #[test]
    fn test_dump_reads_until_end_of_card() {
        let mut sim = SimulatedCard::new(6);
        let settings = CardSettings::default();
        let path = scratch_path("full");
        let _ = std::fs::remove_file(&path);

        let request = DumpRequest {
            start_cluster: 2,
            end_cluster: None,
            output: &path,
            low_frequency: false,
        };
        let summary = dump_clusters(&mut sim, &settings, &request).unwrap();
        assert_eq!(summary.start_cluster, 2);
        assert_eq!(summary.end_cluster, 6);
        assert_eq!(summary.clusters(), 4);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 6 * CLUSTER_SIZE);
        for i in 2..6 {
            assert_eq!(&data[i * CLUSTER_SIZE..(i + 1) * CLUSTER_SIZE], &sim.blocks[i]);
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_dump_honors_end_cluster() {
        let mut sim = SimulatedCard::new(16);
        let settings = CardSettings::default();
        let path = scratch_path("bounded");
        let _ = std::fs::remove_file(&path);

        let request = DumpRequest {
            start_cluster: 0,
            end_cluster: Some(3),
            output: &path,
            low_frequency: false,
        };
        let summary = dump_clusters(&mut sim, &settings, &request).unwrap();
        assert_eq!(summary.end_cluster, 3);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * CLUSTER_SIZE as u64);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_crc_error_reports_failed_cluster_and_resume_completes() {
        let mut sim = SimulatedCard::new(8);
        sim.corrupt_once = vec![5];
        let settings = CardSettings::default();
        let path = scratch_path("resume");
        let _ = std::fs::remove_file(&path);

        let first = DumpRequest {
            start_cluster: 1,
            end_cluster: None,
            output: &path,
            low_frequency: false,
        };
        let failure = dump_clusters(&mut sim, &settings, &first).unwrap_err();
        assert_eq!(failure.failed_cluster, 5);
        assert!(matches!(failure.source, CardError::CrcMismatch { .. }));

        let resumed = DumpRequest {
            start_cluster: failure.failed_cluster,
            ..first
        };
        let summary = dump_clusters(&mut sim, &settings, &resumed).unwrap();
        assert_eq!(summary.end_cluster, 8);

        let data = std::fs::read(&path).unwrap();
        for i in 1..8 {
            assert_eq!(&data[i * CLUSTER_SIZE..(i + 1) * CLUSTER_SIZE], &sim.blocks[i]);
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_failure_marks_synced_clusters_as_written() {
        let mut sim = SimulatedCard::new(8);
        sim.corrupt_once = vec![5];
        let settings = CardSettings::default();
        let mut card = MmcSpiCard::initialize(&mut sim, &settings, false).unwrap();
        let mut image = MemoryImage::default();

        let failure = copy_clusters(&mut card, &mut image, &copy_request(1)).unwrap_err();
        assert_eq!(failure.failed_cluster, 5);
        assert_eq!(image.durable, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_read_failure_with_failed_sync_restarts_attempt() {
        let mut sim = SimulatedCard::new(8);
        sim.corrupt_once = vec![5];
        let settings = CardSettings::default();
        let mut card = MmcSpiCard::initialize(&mut sim, &settings, false).unwrap();
        let mut image = MemoryImage {
            fail_sync: true,
            ..MemoryImage::default()
        };

        let failure = copy_clusters(&mut card, &mut image, &copy_request(1)).unwrap_err();
        assert_eq!(failure.failed_cluster, 1);
        assert!(matches!(failure.source, CardError::CrcMismatch { .. }));
    }

    #[test]
    fn test_final_sync_failure_restarts_attempt() {
        let mut sim = SimulatedCard::new(4);
        let settings = CardSettings::default();
        let mut card = MmcSpiCard::initialize(&mut sim, &settings, false).unwrap();
        let mut image = MemoryImage {
            fail_sync: true,
            ..MemoryImage::default()
        };

        let failure = copy_clusters(&mut card, &mut image, &copy_request(2)).unwrap_err();
        assert_eq!(failure.failed_cluster, 2);
        assert!(matches!(failure.source, CardError::Io(_)));
    }

    #[test]
    fn test_write_failure_keeps_synced_prefix() {
        let mut sim = SimulatedCard::new(8);
        let settings = CardSettings::default();
        let mut card = MmcSpiCard::initialize(&mut sim, &settings, false).unwrap();
        let mut image = MemoryImage {
            fail_write_at: Some(3),
            ..MemoryImage::default()
        };

        let failure = copy_clusters(&mut card, &mut image, &copy_request(0)).unwrap_err();
        assert_eq!(failure.failed_cluster, 3);
        assert_eq!(image.durable, vec![0, 1, 2]);
    }

    #[test]
    fn test_last_addressable_cluster_saturates_end() {
        let mut sim = SimulatedCard::new(4);
        sim.wrap_addresses = true;
        let settings = CardSettings::default();
        let mut card = MmcSpiCard::initialize(&mut sim, &settings, false).unwrap();
        let mut image = MemoryImage::default();

        let summary = copy_clusters(&mut card, &mut image, &copy_request(u32::MAX)).unwrap();
        assert_eq!(image.durable, vec![u32::MAX]);
        assert_eq!(summary.start_cluster, u32::MAX);
        assert_eq!(summary.end_cluster, u32::MAX);
    }
}
