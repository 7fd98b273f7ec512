//! Ring-buffered, windowed power spectrum
//!
//! Holds the most recent `fft_size` samples of the selected channel in a
//! circular buffer; each processing pass unrolls it into chronological order,
//! applies the Hann table, zero-pads up to the transform length, runs the
//! real-to-complex transform and folds the squared magnitudes into the
//! smoothed power spectrum.

use num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

use super::envelope::{self, EnvelopeCoeffs};

/// Real-time spectral analyzer with per-bin attack/decay smoothing.
pub struct SpectralAnalyzer {
    fft_size: usize,
    buffer_size: usize,

    /// Circular input store, always exactly the last `fft_size` samples.
    ring: Vec<f32>,
    cursor: usize,

    /// Periodic Hann table; `window[0]` is exactly zero.
    window: Vec<f32>,

    /// Linear scratch of transform length; the tail past `fft_size` is the
    /// zero-padding region.
    scratch: Vec<f32>,

    spectrum: Vec<Complex<f32>>,
    r2c: Arc<dyn RealToComplex<f32>>,

    /// Smoothed magnitude-squared per bin, persisted across passes.
    power: Vec<f32>,

    /// Historical normalization: squared magnitudes are scaled by
    /// 1/sqrt(fft_size), not 1/fft_size.
    scale: f32,

    coeffs: EnvelopeCoeffs,
}

impl SpectralAnalyzer {
    /// Create an analyzer for `fft_size` input samples transformed at
    /// `buffer_size` (>= `fft_size`; the excess is zero-padding).
    ///
    /// All buffers are allocated here in full; reconfiguration replaces the
    /// whole analyzer rather than resizing in place.
    pub fn new(fft_size: usize, buffer_size: usize) -> Self {
        debug_assert!(fft_size > 0 && buffer_size >= fft_size);

        let mut window = vec![0.0f32; fft_size];
        for (i, w) in window.iter_mut().enumerate().skip(1) {
            *w = (0.5 * (1.0 - (std::f64::consts::TAU * i as f64 / (fft_size as f64 + 1.0)).cos()))
                as f32;
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(buffer_size);

        Self {
            fft_size,
            buffer_size,
            ring: vec![0.0; fft_size],
            cursor: 0,
            window,
            scratch: vec![0.0; buffer_size],
            spectrum: vec![Complex::new(0.0, 0.0); buffer_size / 2 + 1],
            r2c,
            power: vec![0.0; buffer_size / 2 + 1],
            scale: (1.0 / (fft_size as f64).sqrt()) as f32,
            coeffs: EnvelopeCoeffs::default(),
        }
    }

    /// Replace the spectral attack/decay coefficients.
    pub fn set_coeffs(&mut self, coeffs: EnvelopeCoeffs) {
        self.coeffs = coeffs;
    }

    /// Insert one sample at the write cursor.
    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.ring[self.cursor] = sample;
        self.cursor = (self.cursor + 1) % self.fft_size;
    }

    /// Transform the current ring contents and fold the result into the
    /// smoothed power spectrum.
    pub fn process(&mut self) {
        // unroll the ring oldest-first: the cursor points at the oldest sample
        let split = self.fft_size - self.cursor;
        self.scratch[..split].copy_from_slice(&self.ring[self.cursor..]);
        self.scratch[split..self.fft_size].copy_from_slice(&self.ring[..self.cursor]);

        for (s, w) in self.scratch[..self.fft_size].iter_mut().zip(&self.window) {
            *s *= w;
        }
        self.scratch[self.fft_size..].fill(0.0);

        self.r2c
            .process(&mut self.scratch, &mut self.spectrum)
            .expect("FFT processing failed");

        for (out, bin) in self.power.iter_mut().zip(&self.spectrum) {
            let raw = (bin.re * bin.re + bin.im * bin.im) * self.scale;
            *out = envelope::apply(raw as f64, *out as f64, &self.coeffs) as f32;
        }
    }

    /// Smoothed power spectrum, `buffer_size / 2 + 1` bins.
    pub fn power(&self) -> &[f32] {
        &self.power
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Transform length including zero-padding.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
