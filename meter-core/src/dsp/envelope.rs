//! Asymmetric one-pole envelope smoothing
//!
//! Shared by the RMS, peak, and spectral-power paths: a rising input is
//! tracked with the attack coefficient, a falling input with the decay
//! coefficient.

/// Attack/decay coefficient pair for one envelope filter.
///
/// A coefficient is the per-step feedback factor of a one-pole smoother,
/// derived so that the configured time constant is the time for the output
/// to decay to 1% of a step input.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvelopeCoeffs {
    pub attack: f64,
    pub decay: f64,
}

impl EnvelopeCoeffs {
    /// Coefficients for a filter updated once per sample (RMS, peak).
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate in Hz
    /// * `attack_ms` / `decay_ms` - Time constants in milliseconds
    pub fn per_sample(sample_rate: f64, attack_ms: f64, decay_ms: f64) -> Self {
        Self {
            attack: step_coeff(sample_rate, attack_ms),
            decay: step_coeff(sample_rate, decay_ms),
        }
    }

    /// Coefficients for a filter updated once per processed batch (spectral
    /// power), using the event-driven update rate instead of the sample rate.
    pub fn per_update(sample_rate: f64, attack_ms: f64, decay_ms: f64) -> Self {
        Self::per_sample(sample_rate * 0.001, attack_ms, decay_ms)
    }
}

/// Derive one smoothing coefficient: `exp(ln(0.01) / steps_in_tc)`, so the
/// filter output reaches 1% of a step input after `tc_ms` milliseconds.
/// A zero time constant disables smoothing entirely.
fn step_coeff(rate: f64, tc_ms: f64) -> f64 {
    if tc_ms <= 0.0 || rate <= 0.0 {
        return 0.0;
    }
    (0.01_f64.ln() / (rate * tc_ms * 1e-3)).exp()
}

/// Apply one smoothing step.
///
/// `raw >= previous` (including ties) selects the attack coefficient,
/// otherwise decay. The result never overshoots: it always lies between
/// `raw` and `previous` inclusive.
#[inline]
pub fn apply(raw: f64, previous: f64, coeffs: &EnvelopeCoeffs) -> f64 {
    let k = if raw >= previous {
        coeffs.attack
    } else {
        coeffs.decay
    };
    raw + k * (previous - raw)
}
