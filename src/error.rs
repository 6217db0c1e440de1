// src/error.rs

use core::fmt;

/// Why a motor's timer channel could not be claimed.
///
/// A motor whose claim fails is left unconfigured; every per-frame
/// operation on it becomes a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// Another owner already holds the timer channel or its DMA stream.
    ChannelInUse,
    /// The pin has no DMA stream routed to its timer channel.
    NoDma,
    /// No timer channel is mapped to this motor.
    NoTimer,
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortError::ChannelInUse => write!(f, "timer channel already in use"),
            PortError::NoDma => write!(f, "no DMA stream for timer channel"),
            PortError::NoTimer => write!(f, "no timer mapped to motor"),
        }
    }
}

/// Configuration rejected by validation or by the persisted record check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    TooManyHarmonics { harmonics: u8 },
    TooManyMotors { motors: u8 },
    BadPoleCount { poles: u8 },
    BadLoopTime,
    BadQuality,
    BadProtocol { protocol: u8 },
    BadMagic,
    BadVersion { version: u16 },
    BadSize { size: usize },
    BadChecksum,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::TooManyHarmonics { harmonics } => {
                write!(f, "{} harmonics requested, at most 3 supported", harmonics)
            }
            ConfigError::TooManyMotors { motors } => {
                write!(f, "{} motors requested, at most 8 supported", motors)
            }
            ConfigError::BadPoleCount { poles } => {
                write!(f, "motor pole count {} must be even and at least 2", poles)
            }
            ConfigError::BadLoopTime => write!(f, "loop time must be non-zero"),
            ConfigError::BadQuality => write!(f, "notch Q must be non-zero"),
            ConfigError::BadProtocol { protocol } => {
                write!(f, "unknown motor protocol {}", protocol)
            }
            ConfigError::BadMagic => write!(f, "config record magic mismatch"),
            ConfigError::BadVersion { version } => {
                write!(f, "config record version {} not supported", version)
            }
            ConfigError::BadSize { size } => write!(f, "config record size {} invalid", size),
            ConfigError::BadChecksum => write!(f, "config record checksum mismatch"),
        }
    }
}
