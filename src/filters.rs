// src/filters.rs
//
// Biquad notch and PT1 lowpass, in the Betaflight conventions: loop time in
// microseconds, Q as a plain ratio, DF1 biquad state.

use core::f32::consts::PI;
use micromath::F32Ext;

/// The five coefficients of a biquad, normalised by a0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

/// Biquad filter implementation (similar to Betaflight's biquadFilter_t)
#[derive(Debug, Clone, Copy)]
pub struct BiquadFilter {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    /// Pass-through filter.
    pub const fn new() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Configure as notch filter and clear the delay line.
    pub fn init_notch(&mut self, center_hz: f32, loop_time_us: f32, q: f32) {
        self.update_notch(center_hz, loop_time_us, q);
        self.reset();
    }

    /// Retune the notch. The delay line is kept so a moving notch does not
    /// glitch the output.
    pub fn update_notch(&mut self, center_hz: f32, loop_time_us: f32, q: f32) {
        let omega = 2.0 * PI * center_hz * loop_time_us * 0.000_001;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let a0 = 1.0 + alpha;
        self.b0 = 1.0 / a0;
        self.b1 = -2.0 * cos_omega / a0;
        self.b2 = 1.0 / a0;
        self.a1 = self.b1; // Same as b1 for notch
        self.a2 = (1.0 - alpha) / a0;
    }

    pub fn coefficients(&self) -> BiquadCoefficients {
        BiquadCoefficients {
            b0: self.b0,
            b1: self.b1,
            b2: self.b2,
            a1: self.a1,
            a2: self.a2,
        }
    }

    /// Take the coefficients of `c`, keeping this filter's own state.
    pub fn set_coefficients(&mut self, c: BiquadCoefficients) {
        self.b0 = c.b0;
        self.b1 = c.b1;
        self.b2 = c.b2;
        self.a1 = c.a1;
        self.a2 = c.a2;
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// Direct form 1.
    #[inline]
    pub fn apply(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// PT1 gain for `cutoff_hz` at a sample period of `dt_s` seconds.
pub fn pt1_gain(cutoff_hz: f32, dt_s: f32) -> f32 {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    dt_s / (rc + dt_s)
}

/// First-order lowpass (Betaflight's pt1Filter_t)
#[derive(Debug, Clone, Copy)]
pub struct Pt1Filter {
    state: f32,
    k: f32,
}

impl Pt1Filter {
    pub const fn new(k: f32) -> Self {
        Self { state: 0.0, k }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        self.state += self.k * (input - self.state);
        self.state
    }

    pub fn state(&self) -> f32 {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

// =================== TESTS ===================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Peak output amplitude for a unit sine at `freq_hz`, after settling.
    fn gain_at(filter: &mut BiquadFilter, freq_hz: f32, loop_time_us: f32) -> f32 {
        let dt = loop_time_us * 1e-6;
        let mut peak = 0.0f32;
        for n in 0..20_000 {
            let x = (2.0 * PI * freq_hz * n as f32 * dt).sin();
            let y = filter.apply(x);
            if n > 15_000 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    // ── Notch tests ──

    #[test]
    fn test_notch_coefficients() {
        let mut f = BiquadFilter::new();
        f.init_notch(200.0, 125.0, 5.0);
        let c = f.coefficients();
        let omega = 2.0 * PI * 200.0 * 125e-6;
        let alpha = omega.sin() / 10.0;
        assert_relative_eq!(c.b0, 1.0 / (1.0 + alpha), epsilon = 1e-6);
        assert_relative_eq!(c.b1, -2.0 * omega.cos() / (1.0 + alpha), epsilon = 1e-6);
        assert_eq!(c.b0, c.b2);
        assert_eq!(c.b1, c.a1);
        assert_relative_eq!(c.a2, (1.0 - alpha) / (1.0 + alpha), epsilon = 1e-6);
    }

    #[test]
    fn test_notch_rejects_center() {
        let mut f = BiquadFilter::new();
        f.init_notch(200.0, 125.0, 5.0);
        assert!(gain_at(&mut f, 200.0, 125.0) < 0.05);
    }

    #[test]
    fn test_notch_passes_far_frequency() {
        let mut f = BiquadFilter::new();
        f.init_notch(200.0, 125.0, 5.0);
        assert!(gain_at(&mut f, 20.0, 125.0) > 0.95);
    }

    #[test]
    fn test_notch_unity_at_dc() {
        let mut f = BiquadFilter::new();
        f.init_notch(300.0, 125.0, 5.0);
        let mut y = 0.0;
        for _ in 0..5_000 {
            y = f.apply(1.0);
        }
        assert_relative_eq!(y, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_update_keeps_state_init_clears_it() {
        let mut f = BiquadFilter::new();
        f.init_notch(200.0, 125.0, 5.0);
        for _ in 0..10 {
            f.apply(1.0);
        }
        let mut g = f;
        g.update_notch(250.0, 125.0, 5.0);
        assert_eq!(g.x1, 1.0);
        assert_eq!(g.y1, f.y1);

        g.init_notch(250.0, 125.0, 5.0);
        assert_eq!(g.x1, 0.0);
        assert_eq!(g.y1, 0.0);
    }

    #[test]
    fn test_set_coefficients_copies_exactly() {
        let mut a = BiquadFilter::new();
        a.init_notch(173.3, 125.0, 5.0);
        let mut b = BiquadFilter::new();
        b.apply(3.0);
        b.set_coefficients(a.coefficients());
        assert_eq!(a.coefficients(), b.coefficients());
        assert_eq!(b.x1, 3.0);
    }

    #[test]
    fn test_new_is_identity() {
        let mut f = BiquadFilter::new();
        for x in [0.0, 1.5, -2.0, 7.25] {
            assert_eq!(f.apply(x), x);
        }
    }

    // ── PT1 tests ──

    #[test]
    fn test_pt1_gain() {
        // 150 Hz at 1 kHz: RC = 1.061 ms, k = 1 / 2.061
        let k = pt1_gain(150.0, 0.001);
        assert_relative_eq!(k, 0.001 / (1.0 / (2.0 * PI * 150.0) + 0.001), epsilon = 1e-6);
        assert!(k > 0.48 && k < 0.49);
    }

    #[test]
    fn test_pt1_step_response() {
        let mut f = Pt1Filter::new(pt1_gain(150.0, 0.000_125));
        let first = f.apply(840.0);
        assert!(first > 0.0 && first < 840.0);
        for _ in 0..1_000 {
            f.apply(840.0);
        }
        assert_relative_eq!(f.state(), 840.0, epsilon = 1e-2);
        f.reset();
        assert_eq!(f.state(), 0.0);
    }
}
