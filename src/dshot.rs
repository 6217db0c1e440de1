// src/dshot.rs
//
// Half-duplex DShot / ProShot link driver.
//
// Transmit: each motor's packet is encoded into compare values and played out
//           by its timer channel's DMA (or one update-DMA burst per timer).
//           All channels of a timer start together at the frame epoch.
// Receive:  with telemetry on, the transfer-complete interrupt flips each
//           channel to input capture and arms DMA for the ESC's reply. The
//           next frame decodes whatever was captured and flips back.
//
// Frame order in the control loop:
//   start_frame() -> write_motor_command(m, v) for each motor -> complete_frame()

use heapless::Vec;

use crate::codec::{prepare_packet, Encoding, MAX_BUFFER_LEN, MAX_TELEMETRY_INPUT_LEN};
use crate::command::{CommandQueue, CommandTarget, DshotCommand};
use crate::config::{LoopTiming, MotorConfig, MAX_MOTORS};
use crate::handoff::CaptureSlot;
use crate::port::{ChannelMask, ChannelRef, MotorPort, TimerId, CHANNELS_PER_TIMER};

/// Burst buffer: one word per channel per symbol
const BURST_BUF_LEN: usize = MAX_BUFFER_LEN * CHANNELS_PER_TIMER;

/// Which way a motor's channel currently drives the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Output,
    Input,
}

/// Link counters, for diagnostics only
#[derive(Debug, Clone, Copy)]
pub struct LinkStats {
    /// Captures completed by the interrupt
    pub read_done: u32,
    /// Captures that failed the checksum
    pub invalid_packets: u32,
    /// Frames whose reply had not arrived by the next frame
    pub overruns: u32,
    /// Output-to-input flips done by the interrupt
    pub direction_flips: u32,
    /// Last capture of motor 0 that failed to decode
    pub last_invalid: [u32; MAX_TELEMETRY_INPUT_LEN],
}

impl Default for LinkStats {
    fn default() -> Self {
        Self {
            read_done: 0,
            invalid_packets: 0,
            overruns: 0,
            direction_flips: 0,
            last_invalid: [0; MAX_TELEMETRY_INPUT_LEN],
        }
    }
}

struct MotorLink {
    channel: ChannelRef,
    group: usize,
    direction: Direction,
    buffer: [u32; MAX_BUFFER_LEN],
    capture: CaptureSlot,
    telemetry: Option<u16>,
    value: u16,
    request_telemetry: bool,
    /// A frame went out and its reply has not been consumed yet
    in_flight: bool,
}

struct TimerGroup {
    timer: TimerId,
    /// Channels loaded this frame, started together at the epoch
    dma_sources: ChannelMask,
    burst: [u32; BURST_BUF_LEN],
    burst_len: usize,
    members: Vec<usize, CHANNELS_PER_TIMER>,
}

/// Bidirectional DShot link for up to 8 motors on any mix of timers.
pub struct DshotDriver<P: MotorPort> {
    port: P,
    encoding: Encoding,
    use_telemetry: bool,
    use_burst: bool,
    motor_count: usize,
    links: [Option<MotorLink>; MAX_MOTORS],
    groups: Vec<TimerGroup, MAX_MOTORS>,
    commands: CommandQueue,
    stats: LinkStats,
}

impl<P: MotorPort> DshotDriver<P> {
    /// Claim a channel per motor and park every channel in output mode.
    ///
    /// A motor whose claim fails stays unconfigured; every per-frame call
    /// for it is ignored.
    pub fn new(mut port: P, config: &MotorConfig, timing: &LoopTiming) -> Self {
        let protocol = config.protocol;
        let motor_count = (config.motor_count as usize).min(MAX_MOTORS);
        let mut links: [Option<MotorLink>; MAX_MOTORS] = core::array::from_fn(|_| None);
        let mut groups: Vec<TimerGroup, MAX_MOTORS> = Vec::new();

        for (motor, slot) in links.iter_mut().enumerate().take(motor_count) {
            let channel = match port.claim(motor, config.use_burst) {
                Ok(channel) => channel,
                Err(e) => {
                    warn!("motor {}: channel claim failed: {}", motor, e);
                    continue;
                }
            };

            let group = match groups.iter().position(|g| g.timer == channel.timer) {
                Some(g) => g,
                None => {
                    port.init_timer(channel.timer, protocol);
                    let fresh = TimerGroup {
                        timer: channel.timer,
                        dma_sources: ChannelMask::EMPTY,
                        burst: [0; BURST_BUF_LEN],
                        burst_len: 0,
                        members: Vec::new(),
                    };
                    if groups.push(fresh).is_err() {
                        warn!("motor {}: no timer group left", motor);
                        continue;
                    }
                    groups.len() - 1
                }
            };
            if groups[group].members.push(motor).is_err() {
                warn!("motor {}: timer already has four motors", motor);
                continue;
            }

            port.set_output(channel);
            port.enable_channel(channel);

            *slot = Some(MotorLink {
                channel,
                group,
                direction: Direction::Output,
                buffer: [0; MAX_BUFFER_LEN],
                capture: CaptureSlot::new(),
                telemetry: None,
                value: 0,
                request_telemetry: false,
                in_flight: false,
            });
        }

        info!(
            "dshot: {} motors on {} timers, {}, telemetry {}, burst {}",
            motor_count,
            groups.len(),
            protocol,
            config.use_telemetry,
            config.use_burst
        );

        Self {
            port,
            encoding: protocol.encoding(),
            use_telemetry: config.use_telemetry,
            use_burst: config.use_burst,
            motor_count,
            links,
            groups,
            commands: CommandQueue::new(timing.pid_looptime_us()),
            stats: LinkStats::default(),
        }
    }

    pub fn motor_count(&self) -> usize {
        self.motor_count
    }

    pub fn is_configured(&self, motor: usize) -> bool {
        matches!(self.links.get(motor), Some(Some(_)))
    }

    pub fn direction(&self, motor: usize) -> Option<Direction> {
        self.link(motor).map(|l| l.direction)
    }

    /// Last decoded telemetry, eRPM / 100. `None` when the last frame's reply
    /// was missing or failed the checksum.
    pub fn telemetry(&self, motor: usize) -> Option<u16> {
        self.link(motor).and_then(|l| l.telemetry)
    }

    /// Value last written for `motor`, after command substitution.
    pub fn last_value(&self, motor: usize) -> Option<u16> {
        self.link(motor).map(|l| l.value)
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Queue a special command. Returns `false` when the queue is full.
    pub fn send_command(&mut self, target: CommandTarget, command: DshotCommand) -> bool {
        self.commands.enqueue(target, command)
    }

    pub fn command_pending(&self) -> bool {
        self.commands.is_queued()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn link(&self, motor: usize) -> Option<&MotorLink> {
        self.links.get(motor).and_then(Option::as_ref)
    }

    // =================== FRAME CYCLE ===================

    /// Encode `value` for `motor` and stage it for the next epoch.
    ///
    /// While a special command is being output it replaces `value`, and a
    /// non-zero command also requests telemetry.
    pub fn write_motor_command(&mut self, motor: usize, value: u16) {
        let command = if self.commands.is_processing() {
            Some(self.commands.command_for(motor))
        } else {
            None
        };
        let Some(link) = self.links.get_mut(motor).and_then(Option::as_mut) else {
            return;
        };

        let mut value = value;
        if let Some(command) = command {
            value = command;
            if command != 0 {
                link.request_telemetry = true;
            }
        }
        link.value = value;

        let packet = prepare_packet(value, link.request_telemetry, self.use_telemetry);
        link.request_telemetry = false;

        let group = &mut self.groups[link.group];
        if self.use_burst {
            let lane = link.channel.channel as usize;
            let n = self
                .encoding
                .load(packet, &mut group.burst[lane..], CHANNELS_PER_TIMER);
            group.burst_len = n * CHANNELS_PER_TIMER;
        } else {
            let n = self.encoding.load(packet, &mut link.buffer, 1);
            group.dma_sources.insert(link.channel.mask());
            self.port.load_output(link.channel, &link.buffer[..n]);
        }
    }

    /// Collect last frame's replies and return every channel to output.
    ///
    /// Does nothing with telemetry off: channels never leave output mode.
    pub fn start_frame(&mut self) {
        if !self.use_telemetry {
            return;
        }

        let encoding = self.encoding;
        for motor in 0..self.motor_count {
            let Some(link) = self.links[motor].as_mut() else {
                continue;
            };

            let mut edges = [0u32; MAX_TELEMETRY_INPUT_LEN];
            match link.capture.take(&mut edges) {
                Some(n) => match encoding.decode(&edges[..n]) {
                    Some(value) => link.telemetry = Some(value),
                    None => {
                        trace!("motor {}: telemetry checksum mismatch", motor);
                        self.stats.invalid_packets = self.stats.invalid_packets.wrapping_add(1);
                        link.telemetry = None;
                        if motor == 0 {
                            self.stats.last_invalid = edges;
                        }
                    }
                },
                None => {
                    self.port.disable_request(link.channel);
                    if link.in_flight {
                        self.stats.overruns = self.stats.overruns.wrapping_add(1);
                        link.telemetry = None;
                    }
                }
            }
            link.in_flight = false;

            self.port.set_output(link.channel);
            link.direction = Direction::Output;
        }

        for link in self.links.iter().flatten() {
            self.port.enable_channel(link.channel);
        }
    }

    /// Fire the frame epoch on every timer.
    ///
    /// Skipped entirely while a queued special command is in one of its
    /// delays.
    pub fn complete_frame(&mut self) {
        if self.commands.is_queued() && !self.commands.output_enabled() {
            return;
        }

        for group in self.groups.iter_mut() {
            let sent = if self.use_burst {
                if group.burst_len == 0 {
                    continue;
                }
                self.port
                    .start_burst(group.timer, &group.burst[..group.burst_len]);
                ChannelMask(0x0F)
            } else {
                if group.dma_sources.is_empty() {
                    continue;
                }
                self.port.start_epoch(group.timer, group.dma_sources);
                core::mem::take(&mut group.dma_sources)
            };

            if self.use_telemetry {
                for &m in group.members.iter() {
                    if let Some(link) = self.links[m].as_mut() {
                        if sent.contains(link.channel.channel) {
                            link.in_flight = true;
                        }
                    }
                }
            }
        }

        if self.commands.is_queued() {
            self.commands.on_frame_sent();
        }
    }

    // =================== INTERRUPT ===================

    /// DMA transfer-complete handler for the stream serving `motor`.
    ///
    /// Clears the transfer-complete flag on every path.
    pub fn on_transfer_complete(&mut self, motor: usize) {
        let capture_len = self.encoding.capture_len();

        if let Some(link) = self.links.get_mut(motor).and_then(Option::as_mut) {
            match link.direction {
                Direction::Input => {
                    let port = &mut self.port;
                    let channel = link.channel;
                    port.disable_request(channel);
                    if link
                        .capture
                        .publish(|buf| port.read_capture(channel, &mut buf[..capture_len]))
                    {
                        self.stats.read_done = self.stats.read_done.wrapping_add(1);
                    }
                }
                Direction::Output => {
                    let group = link.group;
                    if self.use_burst {
                        self.port.stop_burst(self.groups[group].timer);
                    } else {
                        self.port.disable_request(link.channel);
                    }

                    if self.use_telemetry {
                        if self.use_burst {
                            let members = self.groups[group].members.clone();
                            for m in members {
                                if let Some(member) = self.links[m].as_mut() {
                                    flip_to_input(&mut self.port, member, capture_len, &mut self.stats);
                                }
                            }
                        } else {
                            flip_to_input(&mut self.port, link, capture_len, &mut self.stats);
                        }
                    }
                }
            }
        }

        self.port.clear_transfer_complete(motor);
    }
}

fn flip_to_input<P: MotorPort>(
    port: &mut P,
    link: &mut MotorLink,
    capture_len: usize,
    stats: &mut LinkStats,
) {
    if link.direction == Direction::Input {
        return;
    }
    port.set_input(link.channel);
    port.arm_input(link.channel, capture_len);
    link.direction = Direction::Input;
    stats.direction_flips = stats.direction_flips.wrapping_add(1);
}

// =================== TESTS ===================
