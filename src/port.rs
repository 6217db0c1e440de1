// src/port.rs
//
// Timer + DMA seam for the motor link.
//
// The link driver never touches registers. Everything it needs from the
// silicon (channel claim, time base, output compare vs. input capture, DMA
// arming, update-DMA bursts) goes through `MotorPort`.

use crate::codec::Protocol;
use crate::error::PortError;

#[cfg(feature = "stm32h7")]
pub mod stm32h7;

/// Channels per timer (CH1..CH4). Also the burst stride.
pub const CHANNELS_PER_TIMER: usize = 4;

/// Hardware timer handle, as numbered by the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId(pub u8);

/// One capture/compare channel of one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelRef {
    pub timer: TimerId,
    /// 0-based: 0 = CH1 ... 3 = CH4
    pub channel: u8,
}

impl ChannelRef {
    pub fn mask(&self) -> ChannelMask {
        ChannelMask(1 << (self.channel & 0x03))
    }
}

/// Set of channels of one timer whose DMA requests start together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMask(pub u8);

impl ChannelMask {
    pub const EMPTY: ChannelMask = ChannelMask(0);

    pub fn insert(&mut self, other: ChannelMask) {
        self.0 |= other.0;
    }

    pub fn contains(&self, channel: u8) -> bool {
        self.0 & (1 << (channel & 0x03)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Timer/DMA operations the link driver needs.
///
/// Implementations own the DMA-visible memory. `load_output` copies symbols
/// into it and `read_capture` copies timestamps out of it.
pub trait MotorPort {
    /// Take ownership of the timer channel and DMA stream driving `motor`.
    /// With `burst`, the timer's update DMA stream is claimed instead.
    fn claim(&mut self, motor: usize, burst: bool) -> Result<ChannelRef, PortError>;

    /// Program the timer time base for `protocol`: tick rate and period.
    fn init_timer(&mut self, timer: TimerId, protocol: Protocol);

    /// Put the channel in PWM output compare mode with compare 0.
    fn set_output(&mut self, ch: ChannelRef);

    /// Put the channel in input capture on both edges.
    fn set_input(&mut self, ch: ChannelRef);

    /// Enable the capture/compare channel (CCxE).
    fn enable_channel(&mut self, ch: ChannelRef);

    /// Copy `symbols` into the channel's DMA buffer and enable the stream.
    /// The timer DMA request stays off until `start_epoch`.
    fn load_output(&mut self, ch: ChannelRef, symbols: &[u32]);

    /// Arm the channel's DMA to capture `len` timestamps and enable the
    /// timer DMA request.
    fn arm_input(&mut self, ch: ChannelRef, len: usize);

    /// Disable the channel's DMA stream and timer DMA request.
    fn disable_request(&mut self, ch: ChannelRef);

    /// Copy up to `out.len()` captured timestamps. Returns how many.
    fn read_capture(&mut self, ch: ChannelRef, out: &mut [u32]) -> usize;

    /// Reset the counter and enable the DMA requests of `channels` together.
    fn start_epoch(&mut self, timer: TimerId, channels: ChannelMask);

    /// Load `words` (4 per symbol, CCR1..CCR4) into the update DMA and start
    /// the burst.
    fn start_burst(&mut self, timer: TimerId, words: &[u32]);

    /// Disable the update DMA stream and request.
    fn stop_burst(&mut self, timer: TimerId);

    /// Clear the transfer-complete flag of the stream serving `motor`.
    fn clear_transfer_complete(&mut self, motor: usize);
}

// =================== TEST PORT ===================
