// src/config.rs
//
// RPM filter, motor link and loop timing configuration, plus the versioned
// record they are persisted as.

use crate::codec::Protocol;
use crate::error::ConfigError;

/// Magic bytes to identify a valid record in flash
pub const CONFIG_MAGIC: [u8; 4] = [0xDE, 0xAD, 0xC0, 0xDE];

/// Current record version
pub const CONFIG_VERSION: u16 = 2;

/// Serialized record length in bytes
pub const RECORD_LEN: usize = 32;

/// Byte range of the checksum inside the record
const CHECKSUM_RANGE: core::ops::Range<usize> = 8..12;

pub const MAX_MOTORS: usize = 8;
pub const MAX_HARMONICS: usize = 3;

/// One notch bank (gyro or D-term)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotchBankConfig {
    /// Harmonics tracked per motor, 0 disables the bank
    pub harmonics: u8,
    /// Lowest notch frequency, Hz
    pub min_hz: u8,
    /// Notch Q × 100
    pub q_x100: u16,
}

impl NotchBankConfig {
    pub fn q(&self) -> f32 {
        self.q_x100 as f32 / 100.0
    }

    pub fn is_enabled(&self) -> bool {
        self.harmonics > 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.harmonics as usize > MAX_HARMONICS {
            return Err(ConfigError::TooManyHarmonics {
                harmonics: self.harmonics,
            });
        }
        if self.is_enabled() && self.q_x100 == 0 {
            return Err(ConfigError::BadQuality);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RpmFilterConfig {
    pub gyro: NotchBankConfig,
    pub dterm: NotchBankConfig,
}

impl Default for RpmFilterConfig {
    fn default() -> Self {
        Self {
            gyro: NotchBankConfig {
                harmonics: 3,
                min_hz: 100,
                q_x100: 500,
            },
            dterm: NotchBankConfig {
                harmonics: 1,
                min_hz: 100,
                q_x100: 500,
            },
        }
    }
}

impl RpmFilterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gyro.validate()?;
        self.dterm.validate()
    }
}

/// Motor link configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorConfig {
    pub motor_count: u8,
    /// Magnet poles, not pole pairs
    pub pole_count: u8,
    pub protocol: Protocol,
    /// Bidirectional link: inverted checksum and telemetry capture
    pub use_telemetry: bool,
    /// One update-DMA burst per timer instead of one DMA stream per motor
    pub use_burst: bool,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            motor_count: 4,
            pole_count: 14,
            protocol: Protocol::Dshot600,
            use_telemetry: true,
            use_burst: false,
        }
    }
}

impl MotorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.motor_count as usize > MAX_MOTORS {
            return Err(ConfigError::TooManyMotors {
                motors: self.motor_count,
            });
        }
        if self.pole_count < 2 || self.pole_count % 2 != 0 {
            return Err(ConfigError::BadPoleCount {
                poles: self.pole_count,
            });
        }
        Ok(())
    }
}

/// Control loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoopTiming {
    /// Gyro sampling period, µs
    pub gyro_looptime_us: u32,
    /// PID loop runs every Nth gyro sample
    pub pid_process_denom: u8,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            gyro_looptime_us: 125,
            pid_process_denom: 1,
        }
    }
}

impl LoopTiming {
    pub fn pid_looptime_us(&self) -> u32 {
        self.gyro_looptime_us * self.pid_process_denom as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gyro_looptime_us == 0 || self.pid_process_denom == 0 {
            return Err(ConfigError::BadLoopTime);
        }
        Ok(())
    }
}

// =================== PERSISTED RECORD ===================
//
// Layout (little endian):
//   0..4   magic
//   4..6   version
//   6..8   record size
//   8..12  checksum (byte sum of everything else)
//   12..16 gyro bank: harmonics, min_hz, q_x100
//   16..20 D-term bank: harmonics, min_hz, q_x100
//   20..24 motors: count, poles, protocol, flags (bit 0 telemetry, bit 1 burst)
//   24..32 reserved, zero

/// Everything this crate persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoredConfig {
    pub rpm: RpmFilterConfig,
    pub motor: MotorConfig,
}

fn put_bank(out: &mut [u8], bank: &NotchBankConfig) {
    out[0] = bank.harmonics;
    out[1] = bank.min_hz;
    out[2..4].copy_from_slice(&bank.q_x100.to_le_bytes());
}

fn get_bank(b: &[u8]) -> NotchBankConfig {
    NotchBankConfig {
        harmonics: b[0],
        min_hz: b[1],
        q_x100: u16::from_le_bytes([b[2], b[3]]),
    }
}

/// Additive byte sum, skipping the checksum field itself
fn record_checksum(bytes: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        if !CHECKSUM_RANGE.contains(&i) {
            checksum = checksum.wrapping_add(byte as u32);
        }
    }
    checksum
}

impl StoredConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rpm.validate()?;
        self.motor.validate()
    }

    /// Serialize for flash storage
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..4].copy_from_slice(&CONFIG_MAGIC);
        out[4..6].copy_from_slice(&CONFIG_VERSION.to_le_bytes());
        out[6..8].copy_from_slice(&(RECORD_LEN as u16).to_le_bytes());

        put_bank(&mut out[12..16], &self.rpm.gyro);
        put_bank(&mut out[16..20], &self.rpm.dterm);

        out[20] = self.motor.motor_count;
        out[21] = self.motor.pole_count;
        out[22] = self.motor.protocol.as_u8();
        out[23] = self.motor.use_telemetry as u8 | (self.motor.use_burst as u8) << 1;

        let checksum = record_checksum(&out);
        out[CHECKSUM_RANGE].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Load from flash, checking header, checksum and field ranges
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() != RECORD_LEN {
            return Err(ConfigError::BadSize { size: bytes.len() });
        }
        if bytes[0..4] != CONFIG_MAGIC {
            return Err(ConfigError::BadMagic);
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != CONFIG_VERSION {
            return Err(ConfigError::BadVersion { version });
        }
        let size = u16::from_le_bytes([bytes[6], bytes[7]]) as usize;
        if size != RECORD_LEN {
            return Err(ConfigError::BadSize { size });
        }
        let stored = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if stored != record_checksum(bytes) {
            return Err(ConfigError::BadChecksum);
        }

        let protocol = Protocol::from_u8(bytes[22]).ok_or(ConfigError::BadProtocol {
            protocol: bytes[22],
        })?;
        let config = Self {
            rpm: RpmFilterConfig {
                gyro: get_bank(&bytes[12..16]),
                dterm: get_bank(&bytes[16..20]),
            },
            motor: MotorConfig {
                motor_count: bytes[20],
                pole_count: bytes[21],
                protocol,
                use_telemetry: bytes[23] & 0x01 != 0,
                use_burst: bytes[23] & 0x02 != 0,
            },
        };
        config.validate()?;
        Ok(config)
    }
}
