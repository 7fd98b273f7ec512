//! Log-spaced frequency band aggregation
//!
//! Re-bins the linear-frequency power spectrum into logarithmically spaced
//! bands with an energy-preserving sweep: each spectral bin contributes to a
//! band in proportion to the frequency interval they overlap.

/// Integrates spectral power into log-spaced bands.
pub struct BandAggregator {
    /// Per-band upper frequency boundary, strictly increasing.
    bounds: Vec<f32>,

    /// Per-band integrated energy, recomputed on every sweep.
    output: Vec<f32>,

    /// Frequency step of one spectral bin: sample_rate / fft_buffer_size.
    df: f32,

    /// Energy scale applied per overlapped Hz: 2 / sample_rate.
    band_scalar: f32,

    nyquist_bin: usize,
}

impl BandAggregator {
    /// Build the boundary table and allocate the output buffer.
    ///
    /// Boundaries are log-spaced between `freq_min` and `freq_max`: with
    /// `step = log2(freq_max / freq_min) / n_bands`, the first boundary is
    /// `freq_min * 2^(step/2)` and each subsequent one is a factor of
    /// `2^step` above its predecessor.
    pub fn new(
        n_bands: usize,
        freq_min: f64,
        freq_max: f64,
        sample_rate: f64,
        fft_buffer_size: usize,
    ) -> Self {
        debug_assert!(n_bands > 0 && fft_buffer_size > 0);

        let step = (freq_max / freq_min).log2() / n_bands as f64;
        let mut bounds = Vec::with_capacity(n_bands);
        let mut bound = freq_min * (step / 2.0).exp2();
        for _ in 0..n_bands {
            bounds.push(bound as f32);
            bound *= step.exp2();
        }

        Self {
            bounds,
            output: vec![0.0; n_bands],
            df: (sample_rate / fft_buffer_size as f64) as f32,
            band_scalar: (2.0 / sample_rate) as f32,
            nyquist_bin: fft_buffer_size / 2,
        }
    }

    /// Sweep the smoothed power spectrum into the band outputs.
    ///
    /// Two cursors walk the bin edges and band boundaries in frequency
    /// order; whichever edge comes first closes the current overlap
    /// interval and advances.
    pub fn sweep(&mut self, power: &[f32]) {
        self.output.fill(0.0);

        let mut bin = 0usize;
        let mut band = 0usize;
        let mut f0 = 0.0f32;

        while bin <= self.nyquist_bin && band < self.bounds.len() {
            let bin_edge = (bin as f32 + 0.5) * self.df;
            let band_edge = self.bounds[band];
            let p = power.get(bin).copied().unwrap_or(0.0);

            if bin_edge <= band_edge {
                self.output[band] += (bin_edge - f0) * p * self.band_scalar;
                f0 = bin_edge;
                bin += 1;
            } else {
                self.output[band] += (band_edge - f0) * p * self.band_scalar;
                f0 = band_edge;
                band += 1;
            }
        }
    }

    /// Per-band integrated energy from the most recent sweep.
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Per-band upper frequency boundaries.
    pub fn bounds(&self) -> &[f32] {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounds_are_strictly_increasing_and_log_spaced() {
        let agg = BandAggregator::new(24, 20.0, 20000.0, 48000.0, 1024);
        let bounds = agg.bounds();

        assert_eq!(bounds.len(), 24);
        for pair in bounds.windows(2) {
            assert!(pair[1] > pair[0]);
        }

        // constant ratio between consecutive boundaries
        let ratio = bounds[1] / bounds[0];
        for pair in bounds.windows(2) {
            assert_relative_eq!(pair[1] / pair[0], ratio, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_sweep_preserves_total_energy_over_full_span() {
        // boundary table covering [0, Nyquist] entirely: the last bound sits
        // above the top bin edge, so every bin is fully consumed
        let rate = 48000.0;
        let buffer_size = 512;
        let half = buffer_size / 2;
        let mut agg = BandAggregator::new(24, 20.0, 30000.0, rate, buffer_size);
        assert!(agg.bounds()[23] > (half as f32 + 0.5) * agg.df);

        let power = vec![1.0f32; half + 1];
        agg.sweep(&power);

        let total: f32 = agg.output().iter().sum();
        // bin 0 only spans [0, df/2], so the integrated width is (half+0.5)*df
        let expected = (half as f32 + 0.5) * agg.df * agg.band_scalar;
        assert_relative_eq!(total, expected, epsilon = 1e-4);
    }

    #[test]
    fn test_sweep_splits_a_bin_across_band_boundaries() {
        let rate = 48000.0;
        let mut agg = BandAggregator::new(4, 40.0, 20000.0, rate, 512);

        let mut power = vec![0.0f32; 257];
        power[1] = 1.0;
        agg.sweep(&power);

        // bin 1 spans [46.875, 140.625] Hz and straddles the first bands;
        // its energy must land entirely within the band outputs
        let total: f32 = agg.output().iter().sum();
        assert!(total > 0.0);
        assert_relative_eq!(total, agg.df * agg.band_scalar, epsilon = 1e-5);
    }

    #[test]
    fn test_sweep_clears_previous_output() {
        let mut agg = BandAggregator::new(8, 20.0, 20000.0, 48000.0, 512);

        let loud = vec![1.0f32; 257];
        agg.sweep(&loud);
        let silence = vec![0.0f32; 257];
        agg.sweep(&silence);

        assert!(agg.output().iter().all(|&b| b == 0.0));
    }
}
