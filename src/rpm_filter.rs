// src/rpm_filter.rs
//
// Motor-harmonic notch filtering driven by DShot telemetry.
//
// Each motor's eRPM is smoothed, converted to Hz, and a notch is placed on
// each of its first N harmonics, per axis, for the gyro and (optionally)
// the D-term signal. Retuning every notch every loop is too expensive, so a
// round-robin cursor retunes a fixed number of notches per loop, sized to
// sweep the whole table about once a millisecond.

use heapless::Vec;
use micromath::F32Ext;

use crate::codec::erpm_to_hz;
use crate::config::{LoopTiming, MotorConfig, RpmFilterConfig, MAX_HARMONICS, MAX_MOTORS};
use crate::error::ConfigError;
use crate::filters::{pt1_gain, BiquadCoefficients, BiquadFilter, Pt1Filter};

pub const AXIS_COUNT: usize = 3;

/// eRPM smoothing cutoff
const MOTOR_LPF_CUTOFF_HZ: f32 = 150.0;
/// Target time to retune the whole table
const MIN_UPDATE_T_US: f32 = 1_000.0;
/// Parking frequency for notches with nothing to track
const DEACTIVATE_HZ: f32 = 1000.0;

/// Frequency policy for one notch.
///
/// Below `min_hz` the notch sits at `min_hz`, unless the motor is below half
/// of it (stopped or idling), in which case it is parked at `deactivate_hz`.
/// Nothing goes above `deactivate_hz`.
pub fn clamp_notch_frequency(freq_hz: f32, min_hz: f32, deactivate_hz: f32) -> f32 {
    let mut f = freq_hz;
    if f < min_hz {
        f = if f < 0.5 * min_hz { deactivate_hz } else { min_hz };
    }
    if f > deactivate_hz {
        f = deactivate_hz;
    }
    f
}

// =================== eRPM SMOOTHER ===================

/// Per-motor PT1 over raw telemetry (eRPM / 100).
#[derive(Debug, Clone)]
pub struct ErpmSmoother {
    filters: [Pt1Filter; MAX_MOTORS],
    erpm_to_hz: f32,
}

impl ErpmSmoother {
    pub fn new(pole_count: u8, pid_looptime_us: u32) -> Self {
        let k = pt1_gain(MOTOR_LPF_CUTOFF_HZ, pid_looptime_us as f32 * 1e-6);
        Self {
            filters: [Pt1Filter::new(k); MAX_MOTORS],
            erpm_to_hz: erpm_to_hz(pole_count),
        }
    }

    /// Feed one sample. `None` (no valid reply) holds the last value.
    pub fn update(&mut self, motor: usize, raw: Option<u16>) -> f32 {
        let Some(filter) = self.filters.get_mut(motor) else {
            return 0.0;
        };
        match raw {
            Some(raw) => filter.apply(raw as f32),
            None => filter.state(),
        }
    }

    /// Smoothed eRPM / 100
    pub fn filtered(&self, motor: usize) -> f32 {
        self.filters.get(motor).map_or(0.0, Pt1Filter::state)
    }

    /// Smoothed rotation frequency
    pub fn hz(&self, motor: usize) -> f32 {
        self.filtered(motor) * self.erpm_to_hz
    }
}

// =================== NOTCH BANK ===================

/// Which signal a notch bank filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bank {
    Gyro,
    Dterm,
}

type NotchTable = [[[BiquadFilter; MAX_HARMONICS]; MAX_MOTORS]; AXIS_COUNT];

struct NotchBank {
    kind: Bank,
    harmonics: usize,
    min_hz: f32,
    q: f32,
    loop_time_us: f32,
    deactivate_hz: f32,
    notches: NotchTable,
    /// Frequency each (motor, harmonic) notch was last tuned to
    centers: [[f32; MAX_HARMONICS]; MAX_MOTORS],
}

impl NotchBank {
    fn new(kind: Bank, harmonics: u8, min_hz: u8, q: f32, loop_time_us: u32, motor_count: usize) -> Self {
        let loop_time_us = loop_time_us as f32;
        let nyquist = 500_000.0 / loop_time_us;
        let deactivate_hz = DEACTIVATE_HZ.min(nyquist);
        let harmonics = (harmonics as usize).min(MAX_HARMONICS);

        let mut notches = [[[BiquadFilter::new(); MAX_HARMONICS]; MAX_MOTORS]; AXIS_COUNT];
        for plane in notches.iter_mut() {
            for row in plane.iter_mut().take(motor_count) {
                for notch in row.iter_mut().take(harmonics) {
                    notch.init_notch(deactivate_hz, loop_time_us, q);
                }
            }
        }

        Self {
            kind,
            harmonics,
            min_hz: min_hz as f32,
            q,
            loop_time_us,
            deactivate_hz,
            notches,
            centers: [[deactivate_hz; MAX_HARMONICS]; MAX_MOTORS],
        }
    }

    /// Retune one (motor, harmonic) cell on axis 0 and copy the result to
    /// the other axes. Filter state on every axis is kept.
    fn retune(&mut self, motor: usize, harmonic: usize, freq_hz: f32) {
        let template = &mut self.notches[0][motor][harmonic];
        template.update_notch(freq_hz, self.loop_time_us, self.q);
        let coefficients = template.coefficients();
        for plane in self.notches.iter_mut().skip(1) {
            plane[motor][harmonic].set_coefficients(coefficients);
        }
        self.centers[motor][harmonic] = freq_hz;
    }

    #[inline]
    fn apply(&mut self, axis: usize, motor_count: usize, mut value: f32) -> f32 {
        let Some(plane) = self.notches.get_mut(axis) else {
            return value;
        };
        for row in plane.iter_mut().take(motor_count) {
            for notch in row.iter_mut().take(self.harmonics) {
                value = notch.apply(value);
            }
        }
        value
    }
}

// =================== SCHEDULER ===================

/// Round-robin position: the next notch cell to retune
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cursor {
    pub motor: u8,
    pub harmonic: u8,
    pub bank: u8,
}

/// Snapshot for debug output
#[derive(Debug, Clone, Copy)]
pub struct RpmDebug {
    pub motor_hz: [f32; MAX_MOTORS],
    pub filtered_erpm: [f32; MAX_MOTORS],
    pub cursor: Cursor,
    pub updates_per_tick: usize,
}

pub struct RpmFilter {
    banks: Vec<NotchBank, 2>,
    motor_count: usize,
    smoother: ErpmSmoother,
    motor_frequency: [f32; MAX_MOTORS],
    updates_per_tick: usize,
    cursor: Cursor,
}

impl RpmFilter {
    pub fn new(
        config: &RpmFilterConfig,
        motors: &MotorConfig,
        timing: &LoopTiming,
    ) -> Result<Self, ConfigError> {
        let mut filter = Self {
            banks: Vec::new(),
            motor_count: 0,
            smoother: ErpmSmoother::new(motors.pole_count.max(2), timing.pid_looptime_us().max(1)),
            motor_frequency: [0.0; MAX_MOTORS],
            updates_per_tick: 0,
            cursor: Cursor::default(),
        };
        filter.reconfigure(config, motors, timing)?;
        Ok(filter)
    }

    /// Rebuild every bank for a new configuration. The cursor survives,
    /// clamped into the new table. On error nothing changes.
    pub fn reconfigure(
        &mut self,
        config: &RpmFilterConfig,
        motors: &MotorConfig,
        timing: &LoopTiming,
    ) -> Result<(), ConfigError> {
        config.validate()?;
        motors.validate()?;
        timing.validate()?;

        let motor_count = motors.motor_count as usize;
        let pid_looptime_us = timing.pid_looptime_us();

        let mut banks: Vec<NotchBank, 2> = Vec::new();
        if motors.use_telemetry {
            let setups = [
                (Bank::Gyro, &config.gyro, timing.gyro_looptime_us),
                (Bank::Dterm, &config.dterm, pid_looptime_us),
            ];
            for (kind, bank, loop_time_us) in setups {
                if !bank.is_enabled() {
                    continue;
                }
                let notch = NotchBank::new(
                    kind,
                    bank.harmonics,
                    bank.min_hz,
                    bank.q(),
                    loop_time_us,
                    motor_count,
                );
                // Two slots, at most two banks
                let _ = banks.push(notch);
            }
        }

        let cells: usize = banks.iter().map(|b| b.harmonics).sum::<usize>() * motor_count;
        let updates_per_tick = if banks.is_empty() {
            0
        } else {
            let loops_per_sweep = MIN_UPDATE_T_US / pid_looptime_us as f32;
            let per_loop = cells as f32 / loops_per_sweep;
            ((per_loop + 0.49).round() as usize).max(1)
        };

        self.banks = banks;
        self.motor_count = motor_count;
        self.smoother = ErpmSmoother::new(motors.pole_count, pid_looptime_us);
        self.motor_frequency = [0.0; MAX_MOTORS];
        self.updates_per_tick = updates_per_tick;
        let cursor = self.cursor;
        self.restore_cursor(cursor);

        info!(
            "rpm filter: {} banks, {} cells, {} updates per loop",
            self.banks.len(),
            cells,
            updates_per_tick
        );
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        !self.banks.is_empty()
    }

    pub fn updates_per_tick(&self) -> usize {
        self.updates_per_tick
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Move the cursor. Out-of-range fields restart at 0.
    pub fn restore_cursor(&mut self, cursor: Cursor) {
        let mut c = cursor;
        if c.motor as usize >= self.motor_count {
            c.motor = 0;
        }
        if c.bank as usize >= self.banks.len() {
            c.bank = 0;
        }
        let harmonics = self.banks.get(c.bank as usize).map_or(0, |b| b.harmonics);
        if c.harmonic as usize >= harmonics {
            c.harmonic = 0;
        }
        self.cursor = c;
    }

    /// Smooth this loop's telemetry and retune the next notch cells.
    ///
    /// `telemetry(motor)` returns the motor's last decoded value, or `None`
    /// when there was no valid reply.
    pub fn update(&mut self, telemetry: impl Fn(usize) -> Option<u16>) {
        if self.banks.is_empty() || self.motor_count == 0 {
            return;
        }

        for motor in 0..self.motor_count {
            self.smoother.update(motor, telemetry(motor));
        }

        for _ in 0..self.updates_per_tick {
            let motor = self.cursor.motor as usize;
            let harmonic = self.cursor.harmonic as usize;
            let bank = &mut self.banks[self.cursor.bank as usize];

            let freq = clamp_notch_frequency(
                (harmonic + 1) as f32 * self.motor_frequency[motor],
                bank.min_hz,
                bank.deactivate_hz,
            );
            bank.retune(motor, harmonic, freq);

            self.cursor.harmonic += 1;
            if self.cursor.harmonic as usize >= bank.harmonics {
                self.cursor.harmonic = 0;
                self.cursor.bank += 1;
                if self.cursor.bank as usize >= self.banks.len() {
                    self.cursor.bank = 0;
                    self.cursor.motor += 1;
                    if self.cursor.motor as usize >= self.motor_count {
                        self.cursor.motor = 0;
                    }
                    let next = self.cursor.motor as usize;
                    self.motor_frequency[next] = self.smoother.hz(next);
                }
            }
        }
    }

    fn bank_mut(&mut self, kind: Bank) -> Option<&mut NotchBank> {
        self.banks.iter_mut().find(|b| b.kind == kind)
    }

    fn bank(&self, kind: Bank) -> Option<&NotchBank> {
        self.banks.iter().find(|b| b.kind == kind)
    }

    /// Notch one gyro sample. Identity when the gyro bank is off.
    #[inline]
    pub fn apply_gyro(&mut self, axis: usize, value: f32) -> f32 {
        let motor_count = self.motor_count;
        match self.bank_mut(Bank::Gyro) {
            Some(bank) => bank.apply(axis, motor_count, value),
            None => value,
        }
    }

    /// Notch one D-term sample. Identity when the D-term bank is off.
    #[inline]
    pub fn apply_dterm(&mut self, axis: usize, value: f32) -> f32 {
        let motor_count = self.motor_count;
        match self.bank_mut(Bank::Dterm) {
            Some(bank) => bank.apply(axis, motor_count, value),
            None => value,
        }
    }

    // =================== DIAGNOSTICS ===================

    /// Frequency the scheduler last used for `motor`
    pub fn motor_frequency_hz(&self, motor: usize) -> f32 {
        self.motor_frequency.get(motor).copied().unwrap_or(0.0)
    }

    fn cell(&self, kind: Bank, axis: usize, motor: usize, harmonic: usize) -> Option<(&NotchBank, usize, usize)> {
        let bank = self.bank(kind)?;
        if axis >= AXIS_COUNT || motor >= self.motor_count || harmonic >= bank.harmonics {
            return None;
        }
        Some((bank, motor, harmonic))
    }

    pub fn notch_center_hz(&self, kind: Bank, axis: usize, motor: usize, harmonic: usize) -> Option<f32> {
        self.cell(kind, axis, motor, harmonic)
            .map(|(bank, m, h)| bank.centers[m][h])
    }

    pub fn coefficients(
        &self,
        kind: Bank,
        axis: usize,
        motor: usize,
        harmonic: usize,
    ) -> Option<BiquadCoefficients> {
        self.cell(kind, axis, motor, harmonic)
            .map(|(bank, m, h)| bank.notches[axis][m][h].coefficients())
    }

    pub fn deactivate_hz(&self, kind: Bank) -> Option<f32> {
        self.bank(kind).map(|b| b.deactivate_hz)
    }

    pub fn debug(&self) -> RpmDebug {
        let mut filtered_erpm = [0.0; MAX_MOTORS];
        for (motor, out) in filtered_erpm.iter_mut().enumerate().take(self.motor_count) {
            *out = self.smoother.filtered(motor);
        }
        RpmDebug {
            motor_hz: self.motor_frequency,
            filtered_erpm,
            cursor: self.cursor,
            updates_per_tick: self.updates_per_tick,
        }
    }
}

// =================== TESTS ===================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Protocol;
    use approx::assert_relative_eq;
    use core::f32::consts::PI;

    fn motors(count: u8, telemetry: bool) -> MotorConfig {
        MotorConfig {
            motor_count: count,
            pole_count: 14,
            protocol: Protocol::Dshot600,
            use_telemetry: telemetry,
            use_burst: false,
        }
    }

    fn timing(gyro_us: u32, denom: u8) -> LoopTiming {
        LoopTiming {
            gyro_looptime_us: gyro_us,
            pid_process_denom: denom,
        }
    }

    fn default_filter() -> RpmFilter {
        RpmFilter::new(&RpmFilterConfig::default(), &motors(4, true), &timing(125, 1)).unwrap()
    }

    // ── Frequency policy ──

    #[test]
    fn test_clamp_known_points() {
        assert_eq!(clamp_notch_frequency(0.0, 100.0, 1000.0), 1000.0);
        assert_eq!(clamp_notch_frequency(40.0, 100.0, 1000.0), 1000.0);
        assert_eq!(clamp_notch_frequency(50.0, 100.0, 1000.0), 100.0);
        assert_eq!(clamp_notch_frequency(75.0, 100.0, 1000.0), 100.0);
        assert_eq!(clamp_notch_frequency(150.0, 100.0, 1000.0), 150.0);
        assert_eq!(clamp_notch_frequency(1500.0, 100.0, 1000.0), 1000.0);
    }

    #[test]
    fn test_clamp_sweep_stays_in_band() {
        for (min_hz, deactivate) in [(100.0, 1000.0), (100.0, 250.0), (255.0, 200.0)] {
            let low = f32::min(min_hz, deactivate);
            let mut f = 0.0;
            while f < 3000.0 {
                let c = clamp_notch_frequency(f, min_hz, deactivate);
                assert!(c >= low && c <= deactivate, "f {} -> {}", f, c);
                assert!(c > 0.0);
                f += 0.5;
            }
        }
    }

    // ── Setup ──

    #[test]
    fn test_updates_per_tick() {
        // 4 motors x (3 + 1) cells over 8 loops per ms
        assert_eq!(default_filter().updates_per_tick(), 2);

        let f = RpmFilter::new(&RpmFilterConfig::default(), &motors(8, true), &timing(125, 1)).unwrap();
        assert_eq!(f.updates_per_tick(), 4);

        // 1 kHz PID loop: whole table every loop
        let f = RpmFilter::new(&RpmFilterConfig::default(), &motors(4, true), &timing(125, 8)).unwrap();
        assert_eq!(f.updates_per_tick(), 16);

        // Small tables still advance every loop
        let mut cfg = RpmFilterConfig::default();
        cfg.gyro.harmonics = 1;
        cfg.dterm.harmonics = 0;
        let f = RpmFilter::new(&cfg, &motors(1, true), &timing(125, 1)).unwrap();
        assert_eq!(f.updates_per_tick(), 1);
    }

    #[test]
    fn test_deactivation_follows_bank_loop_time() {
        let f = RpmFilter::new(&RpmFilterConfig::default(), &motors(4, true), &timing(125, 8)).unwrap();
        assert_eq!(f.deactivate_hz(Bank::Gyro), Some(1000.0));
        // 1 ms D-term loop: Nyquist is 500 Hz
        assert_eq!(f.deactivate_hz(Bank::Dterm), Some(500.0));
        assert_eq!(f.notch_center_hz(Bank::Dterm, 0, 0, 0), Some(500.0));
    }

    #[test]
    fn test_rejects_bad_config() {
        let mut cfg = RpmFilterConfig::default();
        cfg.gyro.harmonics = 4;
        assert!(RpmFilter::new(&cfg, &motors(4, true), &timing(125, 1)).is_err());
        assert!(RpmFilter::new(&RpmFilterConfig::default(), &motors(4, true), &timing(0, 1)).is_err());
    }

    // ── Disabled ──

    #[test]
    fn test_identity_without_telemetry() {
        let mut f = RpmFilter::new(&RpmFilterConfig::default(), &motors(4, false), &timing(125, 1)).unwrap();
        assert!(!f.is_active());
        assert_eq!(f.updates_per_tick(), 0);
        f.update(|_| Some(840));
        for i in 0..100 {
            let x = (i as f32 * 0.37).sin() * 50.0;
            assert_eq!(f.apply_gyro(i % 3, x), x);
            assert_eq!(f.apply_dterm(i % 3, x), x);
        }
        assert_eq!(f.notch_center_hz(Bank::Gyro, 0, 0, 0), None);
    }

    #[test]
    fn test_zero_harmonics_disables_one_bank() {
        let mut cfg = RpmFilterConfig::default();
        cfg.dterm.harmonics = 0;
        let mut f = RpmFilter::new(&cfg, &motors(4, true), &timing(125, 1)).unwrap();
        assert!(f.is_active());
        assert_eq!(f.apply_dterm(0, 3.5), 3.5);
        assert_eq!(f.deactivate_hz(Bank::Dterm), None);
    }

    // ── Scheduler ──

    #[test]
    fn test_round_robin_order() {
        let mut f = default_filter();
        // Gyro: 3 harmonics, D-term: 1, two cells per update
        f.update(|_| None);
        assert_eq!(f.cursor(), Cursor { motor: 0, harmonic: 2, bank: 0 });
        f.update(|_| None);
        assert_eq!(f.cursor(), Cursor { motor: 1, harmonic: 0, bank: 0 });
        // 16 cells, 8 updates per sweep
        for _ in 0..6 {
            f.update(|_| None);
        }
        assert_eq!(f.cursor(), Cursor::default());
    }

    #[test]
    fn test_every_cell_retuned_once_per_sweep() {
        let mut f = default_filter();
        // Move every motor estimate off zero first
        for _ in 0..2_000 {
            f.update(|_| Some(840));
        }
        // Change telemetry; after one estimate refresh and one sweep, every
        // cell reflects the new speed
        for _ in 0..2_000 {
            f.update(|_| Some(420));
        }
        for motor in 0..4 {
            for h in 0..3 {
                let c = f.notch_center_hz(Bank::Gyro, 0, motor, h).unwrap();
                assert_relative_eq!(c, 100.0 * (h + 1) as f32, epsilon = 0.5);
            }
            let c = f.notch_center_hz(Bank::Dterm, 0, motor, 0).unwrap();
            assert_relative_eq!(c, 100.0, epsilon = 0.5);
        }
    }

    #[test]
    fn test_converges_to_motor_harmonics() {
        let mut f = default_filter();
        for _ in 0..2_000 {
            f.update(|_| Some(840));
        }
        for motor in 0..4 {
            assert_relative_eq!(f.motor_frequency_hz(motor), 200.0, epsilon = 0.5);
            assert_relative_eq!(
                f.notch_center_hz(Bank::Gyro, 0, motor, 0).unwrap(),
                200.0,
                epsilon = 0.5
            );
            assert_relative_eq!(
                f.notch_center_hz(Bank::Gyro, 0, motor, 1).unwrap(),
                400.0,
                epsilon = 1.0
            );
            assert_relative_eq!(
                f.notch_center_hz(Bank::Gyro, 0, motor, 2).unwrap(),
                600.0,
                epsilon = 1.5
            );
            assert_relative_eq!(
                f.notch_center_hz(Bank::Dterm, 0, motor, 0).unwrap(),
                200.0,
                epsilon = 0.5
            );
        }
        let dbg = f.debug();
        assert_relative_eq!(dbg.filtered_erpm[0], 840.0, epsilon = 0.5);
        assert_eq!(dbg.updates_per_tick, 2);
    }

    #[test]
    fn test_missing_telemetry_holds_estimate() {
        let mut f = default_filter();
        for _ in 0..2_000 {
            f.update(|_| Some(840));
        }
        for _ in 0..500 {
            f.update(|_| None);
        }
        assert_relative_eq!(f.motor_frequency_hz(2), 200.0, epsilon = 0.5);
    }

    #[test]
    fn test_stopped_motor_parks_notch() {
        let mut f = default_filter();
        for _ in 0..2_000 {
            f.update(|m| if m == 3 { Some(0) } else { Some(840) });
        }
        assert_eq!(f.notch_center_hz(Bank::Gyro, 0, 3, 0), Some(1000.0));
        assert_eq!(f.notch_center_hz(Bank::Gyro, 0, 3, 2), Some(1000.0));
        // Harmonic above the parking frequency is clamped there
        for _ in 0..2_000 {
            f.update(|_| Some(2000));
        }
        assert_eq!(f.notch_center_hz(Bank::Gyro, 0, 0, 2), Some(1000.0));
    }

    #[test]
    fn test_axes_share_coefficients() {
        let mut f = default_filter();
        for i in 0..3_000u32 {
            f.update(|m| Some(600 + (m as u16) * 50 + (i % 7) as u16));
            f.apply_gyro(0, 1.0);
            f.apply_gyro(1, -1.0);
            f.apply_gyro(2, 0.5);
        }
        for kind in [Bank::Gyro, Bank::Dterm] {
            let harmonics = if kind == Bank::Gyro { 3 } else { 1 };
            for motor in 0..4 {
                for h in 0..harmonics {
                    let c0 = f.coefficients(kind, 0, motor, h).unwrap();
                    assert_eq!(f.coefficients(kind, 1, motor, h), Some(c0));
                    assert_eq!(f.coefficients(kind, 2, motor, h), Some(c0));
                }
            }
        }
    }

    // ── Cursor save / restore ──

    #[test]
    fn test_cursor_survives_reconfigure() {
        let mut f = default_filter();
        f.update(|_| None);
        f.update(|_| None);
        f.update(|_| None);
        let saved = f.cursor();
        assert_eq!(saved, Cursor { motor: 1, harmonic: 2, bank: 0 });

        f.reconfigure(&RpmFilterConfig::default(), &motors(4, true), &timing(125, 2))
            .unwrap();
        assert_eq!(f.cursor(), saved);

        // Fewer harmonics: harmonic restarts, motor kept
        let mut cfg = RpmFilterConfig::default();
        cfg.gyro.harmonics = 2;
        f.reconfigure(&cfg, &motors(4, true), &timing(125, 2)).unwrap();
        assert_eq!(f.cursor(), Cursor { motor: 1, harmonic: 0, bank: 0 });
    }

    #[test]
    fn test_restore_cursor_clamps() {
        let mut f = default_filter();
        f.restore_cursor(Cursor { motor: 3, harmonic: 0, bank: 1 });
        assert_eq!(f.cursor(), Cursor { motor: 3, harmonic: 0, bank: 1 });
        f.restore_cursor(Cursor { motor: 7, harmonic: 1, bank: 1 });
        assert_eq!(f.cursor(), Cursor { motor: 0, harmonic: 0, bank: 1 });
        f.restore_cursor(Cursor { motor: 2, harmonic: 2, bank: 5 });
        assert_eq!(f.cursor(), Cursor { motor: 2, harmonic: 2, bank: 0 });
    }

    // ── Hot path ──

    /// Peak output after settling for a sine at `freq_hz` through the gyro bank.
    fn gyro_peak(f: &mut RpmFilter, freq_hz: f32, amplitude: f32) -> f32 {
        let dt = 125e-6;
        let mut peak = 0.0f32;
        for n in 0..16_000 {
            let x = amplitude * (2.0 * PI * freq_hz * n as f32 * dt).sin();
            let y = f.apply_gyro(0, x);
            if n > 12_000 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn test_gyro_notch_removes_motor_tone() {
        let mut f = default_filter();
        for _ in 0..2_000 {
            f.update(|_| Some(840));
        }
        assert!(gyro_peak(&mut f, 200.0, 0.5) < 0.02);
        assert!(gyro_peak(&mut f, 400.0, 0.5) < 0.02);
        // Slow stick input passes
        assert!(gyro_peak(&mut f, 10.0, 1.0) > 0.95);
    }
}
