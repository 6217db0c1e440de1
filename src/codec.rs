// src/codec.rs
//
// DShot / ProShot frame codec.
//
// Transmit: a 16-bit packet [11-bit value | telemetry request | 4-bit checksum]
//           is expanded into per-bit (DShot) or per-nibble (ProShot) compare
//           values that a timer + DMA play out as pulse widths.
// Receive:  the ESC answers on the same wire with the same pulse encoding.
//           Input capture on both edges yields one (rise, fall) timestamp pair
//           per symbol; the pulse width recovers the bit or nibble.

// =================== PROTOCOL CONSTANTS ===================

/// Timer ticks per DShot bit (ARR + 1).
pub const DSHOT_BIT_LENGTH: u32 = 20;
/// High time of a '0' bit, in ticks.
pub const DSHOT_BIT_0: u32 = 7;
/// High time of a '1' bit, in ticks.
pub const DSHOT_BIT_1: u32 = 14;

/// Timer ticks per ProShot nibble (ARR + 1).
pub const PROSHOT_NIBBLE_LENGTH: u32 = 96;
/// High time of nibble value 0, in ticks.
pub const PROSHOT_BASE_SYMBOL: u32 = 24;
/// Extra high time per nibble step, in ticks.
pub const PROSHOT_BIT_WIDTH: u32 = 3;

/// Data symbols per frame, excluding the trailing line-low slot.
pub const DSHOT_FRAME_SYMBOLS: usize = 16;
pub const PROSHOT_FRAME_SYMBOLS: usize = 4;

/// Output buffer length: data symbols + 1 trailing zero.
pub const DSHOT_BUFFER_LEN: usize = DSHOT_FRAME_SYMBOLS + 1;
pub const PROSHOT_BUFFER_LEN: usize = PROSHOT_FRAME_SYMBOLS + 1;
/// Largest output buffer any protocol needs.
pub const MAX_BUFFER_LEN: usize = DSHOT_BUFFER_LEN;

/// Captured edges per telemetry frame (two per symbol).
pub const DSHOT_TELEMETRY_INPUT_LEN: usize = 32;
pub const PROSHOT_TELEMETRY_INPUT_LEN: usize = 8;
/// Largest capture any protocol needs.
pub const MAX_TELEMETRY_INPUT_LEN: usize = DSHOT_TELEMETRY_INPUT_LEN;

/// Telemetry LSB in eRPM.
pub const ERPM_PER_LSB: f32 = 100.0;
const SECONDS_PER_MINUTE: f32 = 60.0;

// =================== PROTOCOL SELECTION ===================

/// Motor link protocol variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Dshot150,
    Dshot300,
    Dshot600,
    Dshot1200,
    Proshot1000,
}

impl Protocol {
    /// Timer tick rate in Hz. One DShot bit is 20 ticks, one ProShot nibble 96.
    pub fn tick_hz(&self) -> u32 {
        match self {
            Protocol::Dshot150 => 3_000_000,
            Protocol::Dshot300 => 6_000_000,
            Protocol::Dshot600 => 12_000_000,
            Protocol::Dshot1200 => 24_000_000,
            Protocol::Proshot1000 => 24_000_000,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Protocol::Proshot1000 => Encoding::HighResolution,
            _ => Encoding::Standard,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Protocol::Dshot150 => 0,
            Protocol::Dshot300 => 1,
            Protocol::Dshot600 => 2,
            Protocol::Dshot1200 => 3,
            Protocol::Proshot1000 => 4,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Protocol::Dshot150),
            1 => Some(Protocol::Dshot300),
            2 => Some(Protocol::Dshot600),
            3 => Some(Protocol::Dshot1200),
            4 => Some(Protocol::Proshot1000),
            _ => None,
        }
    }
}

/// Symbol encoding, fixed once the protocol is chosen.
///
/// `Standard` carries one bit per symbol (DShot). `HighResolution` carries one
/// nibble per symbol (ProShot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Encoding {
    Standard,
    HighResolution,
}

impl Encoding {
    /// Timer period (ARR + 1) in ticks.
    pub fn period_ticks(&self) -> u32 {
        match self {
            Encoding::Standard => DSHOT_BIT_LENGTH,
            Encoding::HighResolution => PROSHOT_NIBBLE_LENGTH,
        }
    }

    /// Output buffer length including the trailing zero.
    pub fn buffer_len(&self) -> usize {
        match self {
            Encoding::Standard => DSHOT_BUFFER_LEN,
            Encoding::HighResolution => PROSHOT_BUFFER_LEN,
        }
    }

    /// Number of edge timestamps a telemetry capture must deliver.
    pub fn capture_len(&self) -> usize {
        match self {
            Encoding::Standard => DSHOT_TELEMETRY_INPUT_LEN,
            Encoding::HighResolution => PROSHOT_TELEMETRY_INPUT_LEN,
        }
    }

    /// Write the symbols for `packet` into `out` at `stride`, followed by one
    /// zero symbol that leaves the line low.
    ///
    /// Returns the number of symbols written (17 or 5). Slots that would fall
    /// past the end of `out` are dropped.
    pub fn load(&self, packet: u16, out: &mut [u32], stride: usize) -> usize {
        let stride = stride.max(1);
        let mut put = |slot: usize, v: u32| {
            if let Some(s) = out.get_mut(slot * stride) {
                *s = v;
            }
        };

        match self {
            Encoding::Standard => {
                let mut p = packet;
                for i in 0..DSHOT_FRAME_SYMBOLS {
                    put(i, if p & 0x8000 != 0 { DSHOT_BIT_1 } else { DSHOT_BIT_0 });
                    p <<= 1;
                }
                put(DSHOT_FRAME_SYMBOLS, 0);
                DSHOT_BUFFER_LEN
            }
            Encoding::HighResolution => {
                let mut p = packet;
                for i in 0..PROSHOT_FRAME_SYMBOLS {
                    let nibble = ((p & 0xF000) >> 12) as u32;
                    put(i, PROSHOT_BASE_SYMBOL + nibble * PROSHOT_BIT_WIDTH);
                    p <<= 4;
                }
                put(PROSHOT_FRAME_SYMBOLS, 0);
                PROSHOT_BUFFER_LEN
            }
        }
    }

    /// Decode a captured telemetry frame.
    ///
    /// `edges` holds timer counter values, rise then fall for each symbol.
    /// Returns the 12-bit payload, or `None` when the capture is too short or
    /// the checksum does not fold to zero.
    pub fn decode(&self, edges: &[u32]) -> Option<u16> {
        match self {
            Encoding::Standard => decode_standard(edges),
            Encoding::HighResolution => decode_high_resolution(edges),
        }
    }
}

// =================== PACKET ===================

/// XOR of the three nibbles of a 12-bit word, inverted for bidirectional mode.
///
/// The ESC recognises a bidirectional link by the inverted checksum.
pub fn checksum(data12: u16, inverted: bool) -> u16 {
    let mut csum: u16 = 0;
    let mut data = data12;
    for _ in 0..3 {
        csum ^= data;
        data >>= 4;
    }
    if inverted {
        csum = !csum;
    }
    csum & 0x0F
}

/// Build a 16-bit packet: [value (11 bits) | telemetry request | checksum].
///
/// Values above 2047 are truncated to 11 bits.
pub fn prepare_packet(value: u16, request_telemetry: bool, inverted: bool) -> u16 {
    let data = ((value & 0x07FF) << 1) | request_telemetry as u16;
    (data << 4) | checksum(data, inverted)
}

/// Payload is valid when bytes then nibbles XOR-fold to zero.
fn verify(value: u32) -> Option<u16> {
    let mut csum = value;
    csum ^= csum >> 8;
    csum ^= csum >> 4;
    if csum & 0x0F != 0 {
        return None;
    }
    Some((value >> 4) as u16)
}

fn decode_standard(edges: &[u32]) -> Option<u16> {
    let edges = edges.get(..DSHOT_TELEMETRY_INPUT_LEN)?;
    let mut value: u32 = 0;
    for i in (1..DSHOT_TELEMETRY_INPUT_LEN).step_by(2) {
        // Negative when the counter wrapped between rise and fall.
        let diff = edges[i].wrapping_sub(edges[i - 1]) as i32;
        value <<= 1;
        if diff > 0 {
            if diff >= 11 {
                value |= 1;
            }
        } else if diff >= -9 {
            value |= 1;
        }
    }
    verify(value)
}

fn decode_high_resolution(edges: &[u32]) -> Option<u16> {
    let edges = edges.get(..PROSHOT_TELEMETRY_INPUT_LEN)?;
    let mut value: u32 = 0;
    for i in (1..PROSHOT_TELEMETRY_INPUT_LEN).step_by(2) {
        let width = edges[i]
            .wrapping_add(PROSHOT_NIBBLE_LENGTH)
            .wrapping_sub(edges[i - 1])
            % PROSHOT_NIBBLE_LENGTH;
        let diff = width as i32 - PROSHOT_BASE_SYMBOL as i32;
        let nibble = if diff < 0 {
            0
        } else {
            (diff as u32 + PROSHOT_BIT_WIDTH / 2) / PROSHOT_BIT_WIDTH
        };
        value = (value << 4) | (nibble & 0x0F);
    }
    verify(value)
}

/// Hz per telemetry LSB for a motor with `pole_count` magnet poles.
pub fn erpm_to_hz(pole_count: u8) -> f32 {
    ERPM_PER_LSB / SECONDS_PER_MINUTE / (pole_count as f32 / 2.0)
}

// =================== TESTS ===================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Capture timestamps an ESC reply would produce: each symbol rises at
    /// `phase` within the timer period and falls after its encoded width,
    /// with the counter wrapping at the period.
    pub(crate) fn simulate_reply(encoding: Encoding, packet: u16, phase: u32) -> heapless::Vec<u32, 32> {
        let mut symbols = [0u32; MAX_BUFFER_LEN];
        let n = encoding.load(packet, &mut symbols, 1) - 1;
        let period = encoding.period_ticks();
        let mut edges = heapless::Vec::new();
        for &width in &symbols[..n] {
            let rise = phase % period;
            let fall = (phase + width) % period;
            edges.push(rise).unwrap();
            edges.push(fall).unwrap();
        }
        edges
    }

    // ── Packet tests ──

    #[test]
    fn test_checksum_known_values() {
        // 0x123: 1 ^ 2 ^ 3 = 0
        assert_eq!(checksum(0x123, false), 0x0);
        assert_eq!(checksum(0x123, true), 0xF);
        // 0x001: 1
        assert_eq!(checksum(0x001, false), 0x1);
        assert_eq!(checksum(0x001, true), 0xE);
    }

    #[test]
    fn test_prepare_packet_layout() {
        // value 1046 = 0x416, telemetry bit set -> data 0x82D, csum 8^2^D = 7
        let p = prepare_packet(1046, true, false);
        assert_eq!(p >> 4, 0x82D);
        assert_eq!(p & 0xF, 0x7);
        assert_eq!(prepare_packet(1046, true, true) & 0xF, 0x8);
    }

    #[test]
    fn test_prepare_packet_zero() {
        assert_eq!(prepare_packet(0, false, false), 0x0000);
        assert_eq!(prepare_packet(0, false, true), 0x000F);
    }

    #[test]
    fn test_prepare_packet_truncates_to_11_bits() {
        assert_eq!(prepare_packet(0x0FFF, false, false), prepare_packet(0x07FF, false, false));
    }

    // ── Load tests ──

    #[test]
    fn test_load_dshot_symbols() {
        let mut buf = [0xAAAAu32; DSHOT_BUFFER_LEN];
        let n = Encoding::Standard.load(0x8001, &mut buf, 1);
        assert_eq!(n, 17);
        assert_eq!(buf[0], DSHOT_BIT_1);
        for b in &buf[1..15] {
            assert_eq!(*b, DSHOT_BIT_0);
        }
        assert_eq!(buf[15], DSHOT_BIT_1);
        assert_eq!(buf[16], 0);
    }

    #[test]
    fn test_load_proshot_symbols() {
        let mut buf = [0u32; PROSHOT_BUFFER_LEN];
        let n = Encoding::HighResolution.load(0xF03A, &mut buf, 1);
        assert_eq!(n, 5);
        assert_eq!(buf, [24 + 15 * 3, 24, 24 + 3 * 3, 24 + 10 * 3, 0]);
    }

    #[test]
    fn test_load_with_stride_leaves_other_lanes() {
        let mut buf = [0xFFFFu32; DSHOT_BUFFER_LEN * 4];
        Encoding::Standard.load(0xFFFF, &mut buf[2..], 4);
        for slot in 0..DSHOT_FRAME_SYMBOLS {
            assert_eq!(buf[slot * 4 + 2], DSHOT_BIT_1);
            assert_eq!(buf[slot * 4], 0xFFFF);
            assert_eq!(buf[slot * 4 + 1], 0xFFFF);
            assert_eq!(buf[slot * 4 + 3], 0xFFFF);
        }
        assert_eq!(buf[DSHOT_FRAME_SYMBOLS * 4 + 2], 0);
    }

    #[test]
    fn test_load_short_buffer_does_not_panic() {
        let mut buf = [0u32; 3];
        assert_eq!(Encoding::Standard.load(0xFFFF, &mut buf, 1), 17);
        assert_eq!(buf, [DSHOT_BIT_1; 3]);
    }

    // ── Decode tests ──

    #[test]
    fn test_dshot_round_trip_all_values() {
        for value in 0..2048u16 {
            for telemetry in [false, true] {
                let packet = prepare_packet(value, telemetry, false);
                let phase = (value as u32 * 7) % DSHOT_BIT_LENGTH;
                let edges = simulate_reply(Encoding::Standard, packet, phase);
                assert_eq!(
                    Encoding::Standard.decode(&edges),
                    Some((value << 1) | telemetry as u16),
                    "value {} phase {}",
                    value,
                    phase
                );
            }
        }
    }

    #[test]
    fn test_proshot_round_trip_all_values() {
        for value in 0..2048u16 {
            for telemetry in [false, true] {
                let packet = prepare_packet(value, telemetry, false);
                let phase = (value as u32 * 13) % PROSHOT_NIBBLE_LENGTH;
                let edges = simulate_reply(Encoding::HighResolution, packet, phase);
                assert_eq!(
                    Encoding::HighResolution.decode(&edges),
                    Some((value << 1) | telemetry as u16)
                );
            }
        }
    }

    #[test]
    fn test_dshot_decode_every_phase() {
        // Wrapped deltas: 7 -> -13 (bit 0), 14 -> -6 (bit 1)
        let packet = prepare_packet(1234, false, false);
        for phase in 0..DSHOT_BIT_LENGTH {
            let edges = simulate_reply(Encoding::Standard, packet, phase);
            assert_eq!(Encoding::Standard.decode(&edges), Some(1234 << 1));
        }
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let packet = prepare_packet(500, false, false) ^ 0x0001;
        let edges = simulate_reply(Encoding::Standard, packet, 3);
        assert_eq!(Encoding::Standard.decode(&edges), None);

        let edges = simulate_reply(Encoding::HighResolution, packet, 3);
        assert_eq!(Encoding::HighResolution.decode(&edges), None);
    }

    #[test]
    fn test_decode_rejects_inverted_checksum() {
        let packet = prepare_packet(500, true, true);
        let edges = simulate_reply(Encoding::Standard, packet, 0);
        assert_eq!(Encoding::Standard.decode(&edges), None);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(Encoding::Standard.decode(&[0u32; 31]), None);
        assert_eq!(Encoding::HighResolution.decode(&[0u32; 7]), None);
        assert_eq!(Encoding::Standard.decode(&[]), None);
    }

    #[test]
    fn test_dshot_threshold_edges() {
        // All-zero payload decodes to zero: every pair has width 10 (< 11)
        let mut edges = [0u32; 32];
        for i in 0..16 {
            edges[2 * i] = 0;
            edges[2 * i + 1] = 10;
        }
        assert_eq!(Encoding::Standard.decode(&edges), Some(0));
    }

    // ── Protocol tests ──

    #[test]
    fn test_protocol_encoding_and_rates() {
        assert_eq!(Protocol::Dshot600.encoding(), Encoding::Standard);
        assert_eq!(Protocol::Proshot1000.encoding(), Encoding::HighResolution);
        assert_eq!(Protocol::Dshot150.tick_hz(), 3_000_000);
        assert_eq!(Protocol::Dshot1200.tick_hz(), 24_000_000);
        for v in 0..5 {
            assert_eq!(Protocol::from_u8(v).map(|p| p.as_u8()), Some(v));
        }
        assert_eq!(Protocol::from_u8(5), None);
    }

    #[test]
    fn test_erpm_to_hz_14_pole() {
        // 840 * 100 eRPM / 60 / 7 pole pairs = 200 Hz
        let hz = 840.0 * erpm_to_hz(14);
        approx::assert_relative_eq!(hz, 200.0, epsilon = 1e-3);
    }
}
