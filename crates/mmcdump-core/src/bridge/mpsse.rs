//! FTDI MPSSE command set.
//!
//! Everything here builds or decodes byte sequences; nothing touches USB.

// SIO control requests.
pub const REQUEST_RESET: u8 = 0x00;
pub const REQUEST_SET_LATENCY: u8 = 0x09;
pub const REQUEST_SET_BITMODE: u8 = 0x0B;

pub const RESET_SIO: u16 = 0;
pub const RESET_PURGE_RX: u16 = 1;
pub const RESET_PURGE_TX: u16 = 2;

pub const BITMODE_RESET: u8 = 0x00;
pub const BITMODE_MPSSE: u8 = 0x02;

pub const WRITE_EP_BASE: u8 = 0x02;
pub const READ_EP_BASE: u8 = 0x81;

/// Bytes of modem status at the start of every IN packet.
pub const MODEM_STATUS_LEN: usize = 2;

// Opcodes.
pub const DO_WRITE: u8 = 0x10;
pub const DO_READ: u8 = 0x20;
pub const WRITE_NEG: u8 = 0x01;
pub const SET_BITS_LOW: u8 = 0x80;
pub const SET_BITS_HIGH: u8 = 0x82;
pub const LOOPBACK_END: u8 = 0x85;
pub const TCK_DIVISOR: u8 = 0x86;
pub const SEND_IMMEDIATE: u8 = 0x87;
pub const DIS_DIV_5: u8 = 0x8A;
pub const DIS_3_PHASE: u8 = 0x8D;
pub const CLK_NO_ADAPTIVE: u8 = 0x97;

/// Reply to an opcode the engine does not know.
pub const BAD_COMMAND: u8 = 0xFA;

/// Opcodes sent during synchronization. Both are invalid, so the engine
/// echoes each one back after [`BAD_COMMAND`].
pub const SYNC_PROBES: [u8; 2] = [0xAA, 0xAB];

/// Longest payload a single clocking command can carry.
pub const MAX_CLOCK_BYTES: usize = 0x1_0000;

// Low byte (ADBUS) pins in SPI use.
pub const PIN_SK: u8 = 1 << 0;
pub const PIN_DO: u8 = 1 << 1;
pub const PIN_DI: u8 = 1 << 2;
pub const PIN_CS: u8 = 1 << 3;

/// Outputs on the low byte; DI is the only input.
pub const LOW_DIRECTION: u8 = PIN_SK | PIN_DO | PIN_CS;

/// Idle levels: chip select inactive, data out high, clock low.
pub const LOW_IDLE: u8 = PIN_CS | PIN_DO;

/// Levels while the card is selected.
pub const LOW_SELECTED: u8 = PIN_DO;

pub fn set_bits_low(value: u8, direction: u8) -> [u8; 3] {
    [SET_BITS_LOW, value, direction]
}

pub fn set_bits_high(value: u8, direction: u8) -> [u8; 3] {
    [SET_BITS_HIGH, value, direction]
}

/// Clock divisor command for a 60 MHz base clock.
///
/// The engine divides by `2 * (n + 1)`, so `divisor` must be even.
pub fn clock_divisor(divisor: u16) -> [u8; 3] {
    let n = (divisor / 2).saturating_sub(1);
    let [lo, hi] = n.to_le_bytes();
    [TCK_DIVISOR, lo, hi]
}

/// Full-duplex, MSB-first byte transfer (SPI mode 0), followed by
/// `SEND_IMMEDIATE` so the reply is not held back by the latency timer.
///
/// `data` must hold between 1 and [`MAX_CLOCK_BYTES`] bytes.
pub fn full_duplex(data: &[u8]) -> Vec<u8> {
    let [lo, hi] = ((data.len().saturating_sub(1)) as u16).to_le_bytes();
    let mut cmd = Vec::with_capacity(data.len() + 4);
    cmd.extend_from_slice(&[DO_WRITE | DO_READ | WRITE_NEG, lo, hi]);
    cmd.extend_from_slice(data);
    cmd.push(SEND_IMMEDIATE);
    cmd
}

/// Expected reply to one synchronization probe.
pub fn sync_reply(probe: u8) -> [u8; 2] {
    [BAD_COMMAND, probe]
}

/// Append the payload of `received` to `out`, dropping the status bytes
/// that lead every `packet_size` chunk. Stops once `out` holds `want` bytes.
pub fn strip_status(received: &[u8], packet_size: usize, want: usize, out: &mut Vec<u8>) {
    for packet in received.chunks(packet_size) {
        if out.len() >= want {
            break;
        }
        let Some(payload) = packet.get(MODEM_STATUS_LEN..) else {
            continue;
        };
        let take = payload.len().min(want - out.len());
        out.extend_from_slice(&payload[..take]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_divisor_encoding() {
        // 60 MHz / 12 = 5 MHz
        assert_eq!(clock_divisor(12), [TCK_DIVISOR, 5, 0]);
        // 60 MHz / 150 = 400 kHz
        assert_eq!(clock_divisor(150), [TCK_DIVISOR, 74, 0]);
        assert_eq!(clock_divisor(65534), [TCK_DIVISOR, 0xFE, 0x7F]);
        assert_eq!(clock_divisor(2), [TCK_DIVISOR, 0, 0]);
    }

    #[test]
    fn test_full_duplex_framing() {
        let cmd = full_duplex(&[0x40, 0, 0, 0, 0, 0x95]);
        assert_eq!(&cmd[..3], &[0x31, 5, 0]);
        assert_eq!(&cmd[3..9], &[0x40, 0, 0, 0, 0, 0x95]);
        assert_eq!(cmd[9], SEND_IMMEDIATE);

        let big = full_duplex(&[0xFF; 514]);
        assert_eq!(&big[..3], &[0x31, 0x01, 0x02]);
        assert_eq!(big.len(), 514 + 4);
    }

    #[test]
    fn test_strip_status_per_packet() {
        let received = [0x32, 0x60, 1, 2, 0x32, 0x60, 3, 4, 0x32, 0x60, 5];
        let mut out = Vec::new();
        strip_status(&received, 4, 10, &mut out);
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_strip_status_stops_at_want() {
        let received = [0x32, 0x60, 1, 2, 0x32, 0x60, 3, 4];
        let mut out = vec![9];
        strip_status(&received, 4, 3, &mut out);
        assert_eq!(out, vec![9, 1, 2]);
    }

    #[test]
    fn test_status_only_packets_carry_nothing() {
        let mut out = Vec::new();
        strip_status(&[0x32, 0x60, 0x32, 0x60], 2, 4, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_sync_reply() {
        assert_eq!(sync_reply(0xAA), [0xFA, 0xAA]);
        assert_eq!(
            set_bits_low(LOW_IDLE, LOW_DIRECTION),
            [SET_BITS_LOW, 0x0A, 0x0B]
        );
    }
}
