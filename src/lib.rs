#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

#[cfg(feature = "stm32h7")]
pub mod board_config;
pub mod codec;
pub mod command;
pub mod config;
pub mod dshot;
pub mod error;
pub mod filters;
pub mod handoff;
pub mod port;
pub mod rpm_filter;

pub use codec::Protocol;
pub use command::{CommandTarget, DshotCommand};
pub use config::{LoopTiming, MotorConfig, RpmFilterConfig, StoredConfig};
pub use dshot::DshotDriver;
pub use error::{ConfigError, PortError};
pub use port::MotorPort;
pub use rpm_filter::{Bank, RpmFilter};
