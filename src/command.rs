// src/command.rs
//
// DShot special commands (values 0..=47 of the 11-bit field).
//
// A queued command replaces the throttle value on the next frames. Delays
// between repeats are counted in motor frames; frames that fall inside a
// delay are not sent at all.

use heapless::Deque;

/// Queue depth.
pub const COMMAND_QUEUE_LEN: usize = 8;

/// Wait before the first command of an empty queue.
const INITIAL_DELAY_US: u32 = 10_000;
/// Gap between repeats and between commands.
const COMMAND_DELAY_US: u32 = 1_000;
/// ESC info reply window.
const ESC_INFO_DELAY_US: u32 = 12_000;
/// Gap after a beacon tone.
const BEEP_DELAY_US: u32 = 100_000;

/// Special command values understood by DShot ESCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum DshotCommand {
    MotorStop = 0,
    Beacon1 = 1,
    Beacon2 = 2,
    Beacon3 = 3,
    Beacon4 = 4,
    Beacon5 = 5,
    EscInfo = 6,
    SpinDirection1 = 7,
    SpinDirection2 = 8,
    Mode3dOff = 9,
    Mode3dOn = 10,
    SettingsRequest = 11,
    SaveSettings = 12,
    SpinDirectionNormal = 20,
    SpinDirectionReversed = 21,
    Led0On = 22,
    Led1On = 23,
    Led2On = 24,
    Led3On = 25,
    Led0Off = 26,
    Led1Off = 27,
    Led2Off = 28,
    Led3Off = 29,
    AudioStreamMode = 30,
    SilentMode = 31,
}

impl DshotCommand {
    pub fn value(self) -> u16 {
        self as u16
    }

    /// ESCs only act on settings changes seen 10 times in a row.
    pub fn repeats(self) -> u8 {
        match self {
            DshotCommand::SpinDirection1
            | DshotCommand::SpinDirection2
            | DshotCommand::Mode3dOff
            | DshotCommand::Mode3dOn
            | DshotCommand::SaveSettings
            | DshotCommand::SpinDirectionNormal
            | DshotCommand::SpinDirectionReversed => 10,
            _ => 1,
        }
    }

    fn post_delay_us(self) -> u32 {
        match self {
            DshotCommand::Beacon1
            | DshotCommand::Beacon2
            | DshotCommand::Beacon3
            | DshotCommand::Beacon4
            | DshotCommand::Beacon5 => BEEP_DELAY_US,
            DshotCommand::EscInfo => ESC_INFO_DELAY_US,
            _ => COMMAND_DELAY_US,
        }
    }
}

/// Which motors a command goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandTarget {
    All,
    Motor(u8),
}

impl CommandTarget {
    fn matches(self, motor: usize) -> bool {
        match self {
            CommandTarget::All => true,
            CommandTarget::Motor(m) => m as usize == motor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    StartDelay,
    Active,
    PostDelay,
}

#[derive(Debug, Clone, Copy)]
struct QueuedCommand {
    target: CommandTarget,
    command: DshotCommand,
    state: State,
    /// Frames left in the current delay.
    delay: u32,
    /// Repeats still to send.
    repeats: u8,
}

/// FIFO of special commands, advanced once per motor frame.
pub struct CommandQueue {
    queue: Deque<QueuedCommand, COMMAND_QUEUE_LEN>,
    frame_us: u32,
}

impl CommandQueue {
    /// `frame_us` is the motor update period.
    pub fn new(frame_us: u32) -> Self {
        Self {
            queue: Deque::new(),
            frame_us: frame_us.max(1),
        }
    }

    fn frames(&self, us: u32) -> u32 {
        (us / self.frame_us).max(1)
    }

    /// Queue `command`. Returns `false` when the queue is full.
    pub fn enqueue(&mut self, target: CommandTarget, command: DshotCommand) -> bool {
        let delay = if self.queue.is_empty() {
            self.frames(INITIAL_DELAY_US)
        } else {
            self.frames(COMMAND_DELAY_US)
        };
        let entry = QueuedCommand {
            target,
            command,
            state: State::StartDelay,
            delay,
            repeats: command.repeats(),
        };
        match self.queue.push_back(entry) {
            Ok(()) => {
                debug!("dshot command {} queued", command.value());
                true
            }
            Err(_) => {
                warn!("dshot command queue full, dropping {}", command.value());
                false
            }
        }
    }

    pub fn is_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// True while the head command replaces throttle values.
    pub fn is_processing(&self) -> bool {
        matches!(self.queue.front(), Some(c) if c.state == State::Active)
    }

    /// Value `motor` sends this frame while a command is processing. Motors
    /// not targeted get motor-stop.
    pub fn command_for(&self, motor: usize) -> u16 {
        match self.queue.front() {
            Some(c) if c.state == State::Active && c.target.matches(motor) => c.command.value(),
            _ => DshotCommand::MotorStop.value(),
        }
    }

    /// Whether this frame may go out. Called once per frame while a command
    /// is queued; counts down delays.
    ///
    /// The frame that ends a delay is still held back, since its buffers were
    /// written before the command became active.
    pub fn output_enabled(&mut self) -> bool {
        let Some(front) = self.queue.front_mut() else {
            return true;
        };
        match front.state {
            State::Active => true,
            State::StartDelay | State::PostDelay => {
                front.delay = front.delay.saturating_sub(1);
                if front.delay > 0 {
                    return false;
                }
                if front.repeats > 0 {
                    front.state = State::Active;
                    return false;
                }
                self.queue.pop_front();
                self.queue.is_empty()
            }
        }
    }

    /// Account for a frame sent while the head command was active.
    pub fn on_frame_sent(&mut self) {
        let frames_between = self.frames(COMMAND_DELAY_US);
        let frame_us = self.frame_us;
        let Some(front) = self.queue.front_mut() else {
            return;
        };
        if front.state != State::Active {
            return;
        }
        front.repeats = front.repeats.saturating_sub(1);
        front.state = State::PostDelay;
        front.delay = if front.repeats > 0 {
            frames_between
        } else {
            (front.command.post_delay_us() / frame_us).max(1)
        };
    }
}
