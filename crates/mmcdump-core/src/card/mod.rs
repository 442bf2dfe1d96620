//! Card protocol layer.
//!
//! The `CardProtocol` trait is the contract the dump controller and the
//! dispatcher consume. `mmc` holds the SPI-mode command set, `spi` drives a
//! card over any [`SpiLink`], and `image` writes clusters to the output file.

pub mod image;
pub mod mmc;
pub mod spi;

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::bridge::{BridgeDriver, BridgeError};

pub use image::{ClusterImage, ImageSink};
pub use spi::{MmcSpiCard, SpiLink};

/// Size of one cluster (card block) in bytes.
pub const CLUSTER_SIZE: usize = 512;

#[derive(Error, Debug)]
pub enum CardError {
    #[error("No response to CMD{cmd}")]
    NoResponse { cmd: u8 },

    #[error("CMD{cmd} rejected: R1=0x{r1:02X}")]
    Rejected { cmd: u8, r1: u8 },

    #[error("Address 0x{cluster:08X} is beyond the end of the card")]
    OutOfRange { cluster: u32 },

    #[error("Card still busy after {polls} polls")]
    Timeout { polls: u32 },

    #[error("Unexpected data token 0x{token:02X}")]
    DataToken { token: u8 },

    #[error("Data CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the card interprets command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Standard capacity: addresses are byte offsets.
    Byte,
    /// High capacity: addresses are sector indices.
    Sector,
}

impl fmt::Display for Addressing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addressing::Byte => write!(f, "byte"),
            Addressing::Sector => write!(f, "sector"),
        }
    }
}

/// What a successful card initialization learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    /// Raw OCR register.
    pub ocr: u32,
    pub addressing: Addressing,
}

/// Parameters of one raw dump attempt.
#[derive(Debug, Clone, Copy)]
pub struct DumpRequest<'a> {
    /// First cluster to read.
    pub start_cluster: u32,
    /// Stop before this cluster. `None` reads until the card rejects an address.
    pub end_cluster: Option<u32>,
    /// Output image.
    pub output: &'a Path,
    /// Clock the card at the slow fallback rate.
    pub low_frequency: bool,
}

/// Result of a raw dump that ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpSummary {
    pub start_cluster: u32,
    /// One past the last cluster written. A dump that writes cluster
    /// `u32::MAX` reports `u32::MAX` here, since the next index does not
    /// exist.
    pub end_cluster: u32,
}

impl DumpSummary {
    pub fn clusters(&self) -> u32 {
        self.end_cluster.saturating_sub(self.start_cluster)
    }
}

/// A raw dump that stopped early.
///
/// `failed_cluster` is the first cluster not yet durably written; resuming
/// from it loses nothing.
#[derive(Error, Debug)]
#[error("Dump stopped at cluster 0x{failed_cluster:08X}: {source}")]
pub struct DumpFailure {
    pub failed_cluster: u32,
    #[source]
    pub source: CardError,
}

impl DumpFailure {
    pub fn new(failed_cluster: u32, source: impl Into<CardError>) -> Self {
        Self {
            failed_cluster,
            source: source.into(),
        }
    }
}

/// Card-side operations performed through an open bridge handle.
pub trait CardProtocol: BridgeDriver {
    /// Run the card initialization sequence.
    fn initialize_card(&mut self, handle: &mut Self::Handle) -> Result<CardInfo, CardError>;

    /// Put the target into the state where raw block reads are possible.
    fn enter_dumpable_mode(&mut self, handle: &mut Self::Handle) -> Result<(), CardError>;

    /// Read clusters from `request.start_cluster` into `request.output`.
    fn raw_block_dump(
        &mut self,
        handle: &mut Self::Handle,
        request: &DumpRequest<'_>,
    ) -> Result<DumpSummary, DumpFailure>;
}
