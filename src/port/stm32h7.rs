// src/port/stm32h7.rs
//
// TIM3 + DMA1 motor port for the Sequire H7 V2 (STM32H743).
//
//   M1 = PB4 / TIM3_CH1 / DMA1 stream 4
//   M2 = PB5 / TIM3_CH2 / DMA1 stream 5
//   M3 = PB0 / TIM3_CH3 / DMA1 stream 6
//   M4 = PB1 / TIM3_CH4 / DMA1 stream 7
//
// In burst mode all four channels share stream 4 on the TIM3 update request,
// writing CCR1..CCR4 through DMAR. Streams 0..3 belong to the gyro and UART.
//
// The HAL owns the DMA1 stream vectors, so transfer-complete interrupts stay
// off. The firmware polls `completed_motors` from SysTick instead.

use embassy_stm32::pac;
use embassy_stm32::pac::gpio::vals::{Moder, Pupdr};
use embassy_stm32::pac::timer::vals::{CcmrInputCcs, CcmrOutputCcs, Icf, Ocm};

use crate::codec::{Protocol, MAX_BUFFER_LEN, MAX_TELEMETRY_INPUT_LEN};
use crate::error::PortError;
use crate::port::{ChannelMask, ChannelRef, MotorPort, TimerId, CHANNELS_PER_TIMER};

/// Motors wired to TIM3 on this board.
pub const BOARD_MOTORS: usize = 4;

/// First DMA1 stream used by the motors.
const FIRST_STREAM: usize = 4;

/// GPIOB pin of each TIM3 channel.
const MOTOR_PINS: [usize; BOARD_MOTORS] = [4, 5, 0, 1];

/// AF2 = TIM3 on all motor pins.
const TIM3_AF: u8 = 2;

/// DMAMUX1 request lines (RM0433 table 121).
const DMAREQ_TIM3_CH1: u8 = 23;
const DMAREQ_TIM3_UP: u8 = 27;

/// DCR.DBA for CCR1 (offset 0x34).
const DCR_BASE_CCR1: u8 = 13;

/// Motor port driving TIM3 with one DMA1 stream per channel, or one shared
/// update stream in burst mode.
///
/// The buffers live inside the port, so the port must be placed in memory
/// DMA1 can reach (AXI or SRAM1..3, not DTCM).
pub struct Stm32h7Port {
    timer_clock_hz: u32,
    burst: bool,
    claimed: ChannelMask,
    output: [[u32; MAX_BUFFER_LEN]; BOARD_MOTORS],
    capture: [[u32; MAX_TELEMETRY_INPUT_LEN]; BOARD_MOTORS],
    capture_len: [usize; BOARD_MOTORS],
    burst_words: [u32; MAX_BUFFER_LEN * CHANNELS_PER_TIMER],
}

impl Stm32h7Port {
    /// `timer_clock_hz` is the TIM3 kernel clock (APB1 timer clock).
    pub fn new(timer_clock_hz: u32) -> Self {
        Self {
            timer_clock_hz,
            burst: false,
            claimed: ChannelMask::EMPTY,
            output: [[0; MAX_BUFFER_LEN]; BOARD_MOTORS],
            capture: [[0; MAX_TELEMETRY_INPUT_LEN]; BOARD_MOTORS],
            capture_len: [0; BOARD_MOTORS],
            burst_words: [0; MAX_BUFFER_LEN * CHANNELS_PER_TIMER],
        }
    }

    /// Bit `m` set when the stream serving motor `m` has completed and its
    /// flag is still pending.
    pub fn completed_motors() -> u8 {
        // Streams 4..7 report in HISR
        let isr = pac::DMA1.isr(1).read();
        let mut mask = 0;
        for motor in 0..BOARD_MOTORS {
            if isr.tcif(motor) {
                mask |= 1 << motor;
            }
        }
        mask
    }

    fn route(stream: usize, request: u8) {
        pac::DMAMUX1.ccr(stream).write(|w| w.set_dmareq_id(request));
    }

    fn stream(stream: usize) -> pac::dma::St {
        pac::DMA1.st(stream)
    }

    fn stop_stream(stream: usize) {
        let st = Self::stream(stream);
        st.cr().modify(|w| w.set_en(false));
        while st.cr().read().en() {}
    }

    fn clear_flags(stream: usize) {
        pac::DMA1.ifcr(stream / 4).write(|w| {
            w.set_tcif(stream % 4, true);
            w.set_htif(stream % 4, true);
            w.set_teif(stream % 4, true);
            w.set_dmeif(stream % 4, true);
            w.set_feif(stream % 4, true);
        });
    }

    fn start_stream(stream: usize, dir: pac::dma::vals::Dir, periph: u32, mem: u32, len: usize) {
        Self::stop_stream(stream);
        Self::clear_flags(stream);
        let st = Self::stream(stream);
        st.par().write_value(periph);
        st.m0ar().write_value(mem);
        st.ndtr().write(|w| w.set_ndt(len as u16));
        st.fcr().write(|w| w.set_dmdis(false));
        st.cr().write(|w| {
            w.set_dir(dir);
            w.set_msize(pac::dma::vals::Size::BITS32);
            w.set_psize(pac::dma::vals::Size::BITS32);
            w.set_minc(true);
            w.set_pinc(false);
            w.set_pl(pac::dma::vals::Pl::VERYHIGH);
            w.set_en(true);
        });
    }

    fn set_pin_mode(motor: usize, moder: Moder, pupdr: Pupdr) {
        let pin = MOTOR_PINS[motor];
        let gpiob = pac::GPIOB;
        gpiob.pupdr().modify(|r| r.set_pupdr(pin, pupdr));
        gpiob.moder().modify(|r| r.set_moder(pin, moder));
    }
}

impl MotorPort for Stm32h7Port {
    fn claim(&mut self, motor: usize, burst: bool) -> Result<ChannelRef, PortError> {
        if motor >= BOARD_MOTORS {
            return Err(PortError::NoTimer);
        }
        let ch = ChannelRef {
            timer: TimerId(3),
            channel: motor as u8,
        };
        if self.claimed.contains(ch.channel) {
            return Err(PortError::ChannelInUse);
        }
        self.claimed.insert(ch.mask());
        self.burst = burst;

        let pin = MOTOR_PINS[motor];
        let gpiob = pac::GPIOB;
        gpiob.afr(pin / 8).modify(|r| r.set_afr(pin % 8, TIM3_AF));
        Self::set_pin_mode(motor, Moder::ALTERNATE, Pupdr::FLOATING);

        if burst && motor == 0 {
            Self::route(FIRST_STREAM, DMAREQ_TIM3_UP);
        } else {
            Self::route(FIRST_STREAM + motor, DMAREQ_TIM3_CH1 + ch.channel);
        }
        Ok(ch)
    }

    fn init_timer(&mut self, _timer: TimerId, protocol: Protocol) {
        let tim = pac::TIM3;
        let prescaler = (self.timer_clock_hz / protocol.tick_hz()).max(1) - 1;
        tim.cr1().modify(|r| r.set_cen(false));
        tim.psc().write_value(prescaler as u16);
        tim.arr().write(|r| r.set_arr((protocol.encoding().period_ticks() - 1) as u16));
        tim.cr1().modify(|r| r.set_arpe(true));
        if self.burst {
            tim.dcr().write(|r| {
                r.set_dba(DCR_BASE_CCR1);
                r.set_dbl((CHANNELS_PER_TIMER - 1) as u8);
            });
        }
        tim.egr().write(|r| r.set_ug(true));
        tim.cr1().modify(|r| r.set_cen(true));
    }

    fn set_output(&mut self, ch: ChannelRef) {
        let tim = pac::TIM3;
        let idx = ch.channel as usize;
        tim.ccer().modify(|r| r.set_cce(idx, false));
        tim.ccmr_output(idx / 2).modify(|r| {
            r.set_ccs(idx % 2, CcmrOutputCcs::OUTPUT);
            r.set_ocm(idx % 2, Ocm::PWMMODE1);
            r.set_ocpe(idx % 2, true);
        });
        tim.ccr(idx).write(|r| r.set_ccr(0));
        tim.ccer().modify(|r| {
            r.set_ccp(idx, false);
            r.set_ccnp(idx, false);
        });
        Self::set_pin_mode(idx, Moder::ALTERNATE, Pupdr::FLOATING);
    }

    fn set_input(&mut self, ch: ChannelRef) {
        let tim = pac::TIM3;
        let idx = ch.channel as usize;
        Self::set_pin_mode(idx, Moder::ALTERNATE, Pupdr::PULLUP);
        tim.ccer().modify(|r| r.set_cce(idx, false));
        tim.ccmr_input(idx / 2).modify(|r| {
            r.set_ccs(idx % 2, CcmrInputCcs::TI4);
            r.set_icf(idx % 2, Icf::NOFILTER);
        });
        // Both edges: CCxP = CCxNP = 1
        tim.ccer().modify(|r| {
            r.set_ccp(idx, true);
            r.set_ccnp(idx, true);
        });
        tim.sr().modify(|r| r.set_ccif(idx, false));
    }

    fn enable_channel(&mut self, ch: ChannelRef) {
        pac::TIM3.ccer().modify(|r| r.set_cce(ch.channel as usize, true));
    }

    fn load_output(&mut self, ch: ChannelRef, symbols: &[u32]) {
        let idx = ch.channel as usize;
        let n = symbols.len().min(MAX_BUFFER_LEN);
        self.output[idx][..n].copy_from_slice(&symbols[..n]);
        Self::start_stream(
            FIRST_STREAM + idx,
            pac::dma::vals::Dir::MEMORYTOPERIPHERAL,
            pac::TIM3.ccr(idx).as_ptr() as u32,
            self.output[idx].as_ptr() as u32,
            n,
        );
    }

    fn arm_input(&mut self, ch: ChannelRef, len: usize) {
        let idx = ch.channel as usize;
        let len = len.min(MAX_TELEMETRY_INPUT_LEN);
        self.capture_len[idx] = len;
        // Stream 4 carries the update burst on the way out.
        Self::route(FIRST_STREAM + idx, DMAREQ_TIM3_CH1 + ch.channel);
        Self::start_stream(
            FIRST_STREAM + idx,
            pac::dma::vals::Dir::PERIPHERALTOMEMORY,
            pac::TIM3.ccr(idx).as_ptr() as u32,
            self.capture[idx].as_mut_ptr() as u32,
            len,
        );
        pac::TIM3.dier().modify(|r| r.set_ccde(idx, true));
    }

    fn disable_request(&mut self, ch: ChannelRef) {
        let idx = ch.channel as usize;
        pac::TIM3.dier().modify(|r| r.set_ccde(idx, false));
        Self::stop_stream(FIRST_STREAM + idx);
    }

    fn read_capture(&mut self, ch: ChannelRef, out: &mut [u32]) -> usize {
        let idx = ch.channel as usize;
        let n = self.capture_len[idx].min(out.len());
        out[..n].copy_from_slice(&self.capture[idx][..n]);
        n
    }

    fn start_epoch(&mut self, _timer: TimerId, channels: ChannelMask) {
        let tim = pac::TIM3;
        tim.cnt().write(|r| r.set_cnt(0));
        tim.dier().modify(|r| {
            for idx in 0..CHANNELS_PER_TIMER {
                if channels.contains(idx as u8) {
                    r.set_ccde(idx, true);
                }
            }
        });
    }

    fn start_burst(&mut self, _timer: TimerId, words: &[u32]) {
        let n = words.len().min(self.burst_words.len());
        self.burst_words[..n].copy_from_slice(&words[..n]);
        let tim = pac::TIM3;
        Self::route(FIRST_STREAM, DMAREQ_TIM3_UP);
        Self::start_stream(
            FIRST_STREAM,
            pac::dma::vals::Dir::MEMORYTOPERIPHERAL,
            tim.dmar().as_ptr() as u32,
            self.burst_words.as_ptr() as u32,
            n,
        );
        tim.cnt().write(|r| r.set_cnt(0));
        tim.dier().modify(|r| r.set_ude(true));
    }

    fn stop_burst(&mut self, _timer: TimerId) {
        pac::TIM3.dier().modify(|r| r.set_ude(false));
        Self::stop_stream(FIRST_STREAM);
    }

    fn clear_transfer_complete(&mut self, motor: usize) {
        Self::clear_flags(FIRST_STREAM + motor);
    }
}
