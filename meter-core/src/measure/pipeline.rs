//! Parent-owned capture pipeline
//!
//! A parent measure owns the capture session, the relay scheduler and every
//! DSP buffer. All processing happens on the host's poll call: drain the
//! capture queue, update the per-channel envelopes, feed the spectral ring,
//! then run the transform and the band sweep. The host must not poll the
//! same pipeline concurrently; this is a documented precondition, not
//! enforced here.

use std::sync::Arc;

use crate::audio::capture::{self, CaptureSession, StreamFormat};
use crate::audio::chunk::{Channel, SampleChunk, MAX_CHANNELS};
use crate::audio::scheduler::{CaptureEvents, CaptureScheduler, DataReadyFn};
use crate::dsp::envelope::{self, EnvelopeCoeffs};
use crate::dsp::{BandAggregator, SpectralAnalyzer};

use super::options::{OutputKind, ParentConfig, Selector, Tuning};

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Map a spectral or band power onto the display scale:
/// `max(0, sensitivity * log10(clamp01(power)) + 1)`.
fn db_scaled(power: f32, sensitivity: f64) -> f64 {
    (sensitivity * clamp01(f64::from(power)).log10() + 1.0).max(0.0)
}

/// Envelope state and spectral buffers, all exclusively parent-owned.
pub(crate) struct DspState {
    rms: [f64; MAX_CHANNELS],
    peak: [f64; MAX_CHANNELS],
    k_rms: EnvelopeCoeffs,
    k_peak: EnvelopeCoeffs,
    spectral: Option<SpectralAnalyzer>,
    bands: Option<BandAggregator>,
}

impl DspState {
    fn new() -> Self {
        Self {
            rms: [0.0; MAX_CHANNELS],
            peak: [0.0; MAX_CHANNELS],
            k_rms: EnvelopeCoeffs::default(),
            k_peak: EnvelopeCoeffs::default(),
            spectral: None,
            bands: None,
        }
    }

    fn reset_levels(&mut self) {
        self.rms = [0.0; MAX_CHANNELS];
        self.peak = [0.0; MAX_CHANNELS];
    }

    /// Fold one demuxed batch into the envelopes and the spectral ring.
    fn accumulate(&mut self, chunk: &SampleChunk<'_>, channels: usize, selected: Channel) {
        let frames = chunk.frames(channels);
        let tracked = channels.min(MAX_CHANNELS);

        for frame in 0..frames {
            for ch in 0..tracked {
                let x = f64::from(chunk.sample(frame, ch, channels));
                self.rms[ch] = envelope::apply(x * x, self.rms[ch], &self.k_rms);
                self.peak[ch] = envelope::apply(x.abs(), self.peak[ch], &self.k_peak);
            }
            if channels == 1 {
                // mono duplicates into the right channel so Sum reads work
                self.rms[1] = self.rms[0];
                self.peak[1] = self.peak[0];
            }
            if let Some(spectral) = &mut self.spectral {
                spectral.write(chunk.ring_sample(frame, selected, channels));
            }
        }
    }
}

/// One parent measure's capture and analysis state.
pub(crate) struct Pipeline {
    // declared first: teardown joins the relay before buffers are released
    scheduler: Option<CaptureScheduler>,
    capture: Option<CaptureSession>,
    format: Option<StreamFormat>,
    dsp: DspState,
    pub(crate) cfg: ParentConfig,
    pub(crate) tuning: Tuning,
    last_pending: usize,
}

impl Pipeline {
    /// Create the pipeline and try to bring up its device. Device failure
    /// is logged and leaves the pipeline inert: every read degrades to a
    /// null result until a successful reconfiguration.
    pub(crate) fn new(cfg: ParentConfig, on_data_ready: DataReadyFn) -> Self {
        let mut pipeline = Self {
            scheduler: None,
            capture: None,
            format: None,
            dsp: DspState::new(),
            cfg,
            tuning: Tuning::default(),
            last_pending: 0,
        };

        let events = Arc::new(CaptureEvents::new());
        match CaptureSession::open(
            pipeline.cfg.port,
            &pipeline.cfg.device_id,
            Arc::clone(&events),
        ) {
            Ok(session) => {
                let format = session.format();
                pipeline.alloc_dsp(&format);
                pipeline.format = Some(format);
                pipeline.scheduler = Some(CaptureScheduler::spawn(events, on_data_ready));
                pipeline.capture = Some(session);
                pipeline.apply_tuning();
            }
            Err(err) => log::warn!("audio device unavailable: {err}"),
        }

        pipeline
    }

    /// Allocate the spectral and band buffers in full for the negotiated
    /// format; reconfiguration rebuilds them wholesale.
    fn alloc_dsp(&mut self, format: &StreamFormat) {
        self.dsp.spectral = (self.cfg.fft_size > 0)
            .then(|| SpectralAnalyzer::new(self.cfg.fft_size, self.cfg.fft_buffer_size));
        self.dsp.bands = (self.cfg.n_bands > 0 && self.cfg.fft_buffer_size > 0).then(|| {
            BandAggregator::new(
                self.cfg.n_bands,
                self.cfg.freq_min,
                self.cfg.freq_max,
                f64::from(format.sample_rate),
                self.cfg.fft_buffer_size,
            )
        });
    }

    /// Recompute filter constants from the current tuning. A no-op until
    /// the sample rate is known.
    pub(crate) fn apply_tuning(&mut self) {
        let Some(format) = self.format else { return };
        let rate = f64::from(format.sample_rate);

        self.dsp.k_rms =
            EnvelopeCoeffs::per_sample(rate, self.tuning.env_rms[0], self.tuning.env_rms[1]);
        self.dsp.k_peak =
            EnvelopeCoeffs::per_sample(rate, self.tuning.env_peak[0], self.tuning.env_peak[1]);
        if let Some(spectral) = &mut self.dsp.spectral {
            spectral.set_coeffs(EnvelopeCoeffs::per_update(
                rate,
                self.tuning.env_fft[0],
                self.tuning.env_fft[1],
            ));
        }
    }

    /// The serialized poll path: drain whatever the capture queue holds,
    /// accumulate it, then refresh the spectrum and bands. Never blocks.
    pub(crate) fn poll(&mut self) {
        if self.capture.as_ref().is_some_and(|c| c.faulted()) {
            log::warn!("capture stream fault, releasing audio device");
            self.release_capture();
        }

        let Some(capture) = self.capture.as_mut() else {
            // no capture client: hold levels at zero rather than going stale
            self.dsp.reset_levels();
            return;
        };

        self.last_pending = capture.pending_frames();
        if self.last_pending == 0 {
            return;
        }

        let dsp = &mut self.dsp;
        let selected = self.cfg.channel;
        let channels = capture.format().channels as usize;

        while let Some(batch) = capture.drain() {
            if batch.discontinuity {
                continue; // hold previous state across the gap
            }
            dsp.accumulate(&batch.chunk, channels, selected);
        }

        if let Some(spectral) = &mut dsp.spectral {
            spectral.process();
            if let Some(bands) = &mut dsp.bands {
                bands.sweep(spectral.power());
            }
        }
    }

    /// Numeric read, dispatching on the reading measure's selector against
    /// this pipeline's buffers.
    pub(crate) fn value(&self, sel: &Selector) -> f64 {
        let active = self.format.is_some();

        match sel.kind {
            OutputKind::Rms => match sel.channel.index() {
                None => clamp01(
                    (self.dsp.rms[0].sqrt() + self.dsp.rms[1].sqrt()) * 0.5 * self.tuning.gain_rms,
                ),
                Some(ch) => clamp01(self.dsp.rms[ch].sqrt() * self.tuning.gain_rms),
            },
            OutputKind::Peak => match sel.channel.index() {
                None => clamp01((self.dsp.peak[0] + self.dsp.peak[1]) * 0.5 * self.tuning.gain_peak),
                Some(ch) => clamp01(self.dsp.peak[ch] * self.tuning.gain_peak),
            },
            OutputKind::Fft => match &self.dsp.spectral {
                Some(spectral) if active => db_scaled(
                    spectral.power().get(sel.fft_idx).copied().unwrap_or(0.0),
                    self.tuning.sensitivity,
                ),
                _ => 0.0,
            },
            OutputKind::Band => match &self.dsp.bands {
                Some(bands) if active => db_scaled(
                    bands.output().get(sel.band_idx).copied().unwrap_or(0.0),
                    self.tuning.sensitivity,
                ),
                _ => 0.0,
            },
            OutputKind::FftFreq => match self.format {
                Some(format)
                    if self.cfg.fft_buffer_size > 0
                        && sel.fft_idx <= self.cfg.fft_buffer_size / 2 =>
                {
                    sel.fft_idx as f64 * f64::from(format.sample_rate)
                        / self.cfg.fft_buffer_size as f64
                }
                _ => 0.0,
            },
            OutputKind::BandFreq => match &self.dsp.bands {
                Some(bands) if active && sel.band_idx < bands.len() => {
                    f64::from(bands.bounds()[sel.band_idx])
                }
                _ => 0.0,
            },
            OutputKind::DeviceStatus => match &self.capture {
                Some(capture) if capture.device_active() => 1.0,
                _ => 0.0,
            },
            OutputKind::BufferStatus => self.last_pending as f64,
            OutputKind::Format
            | OutputKind::DeviceName
            | OutputKind::DeviceId
            | OutputKind::DeviceList => 0.0,
        }
    }

    /// String read for the string-typed outputs; `None` for numeric types
    /// so the host auto-converts the numeric value instead.
    pub(crate) fn string_value(&self, sel: &Selector) -> Option<String> {
        match sel.kind {
            OutputKind::Format => Some(
                self.format
                    .as_ref()
                    .map(StreamFormat::describe)
                    .unwrap_or_default(),
            ),
            OutputKind::DeviceName => Some(
                self.capture
                    .as_ref()
                    .map(|c| c.device_name().to_owned())
                    .unwrap_or_default(),
            ),
            OutputKind::DeviceId => Some(
                self.capture
                    .as_ref()
                    .map(|c| c.device_id().to_owned())
                    .unwrap_or_default(),
            ),
            OutputKind::DeviceList => Some(capture::list_endpoints(self.cfg.port).join("\n")),
            _ => None,
        }
    }

    /// Release the device side: join the relay, drop the stream and queue,
    /// zero the levels. DSP tables stay allocated but unreadable until a
    /// reconfiguration brings a device back.
    pub(crate) fn release_capture(&mut self) {
        if self.scheduler.is_none() && self.capture.is_none() {
            return;
        }
        log::debug!("releasing audio device");
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        self.capture = None;
        self.format = None;
        self.last_pending = 0;
        self.dsp.reset_levels();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.release_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::options::parse_channel;
    use approx::assert_relative_eq;
    use std::f64::consts::TAU;

    /// Pipeline with a known negotiated format and no device, so dispatch
    /// and accumulation can be exercised deterministically.
    fn fixture(cfg: ParentConfig, sample_rate: u32) -> Pipeline {
        let format = StreamFormat {
            sample_format: crate::audio::chunk::SampleFormat::PcmF32,
            sample_rate,
            channels: 2,
        };
        let mut pipeline = Pipeline {
            scheduler: None,
            capture: None,
            format: None,
            dsp: DspState::new(),
            cfg,
            tuning: Tuning::default(),
            last_pending: 0,
        };
        pipeline.alloc_dsp(&format);
        pipeline.format = Some(format);
        pipeline.apply_tuning();
        pipeline
    }

    fn spectral_cfg(fft_size: usize, n_bands: usize) -> ParentConfig {
        ParentConfig {
            fft_size,
            fft_buffer_size: fft_size,
            n_bands,
            ..ParentConfig::default()
        }
    }

    fn selector(kind: OutputKind) -> Selector {
        Selector {
            kind,
            ..Selector::default()
        }
    }

    #[test]
    fn test_rms_read_applies_gain_and_clamp() {
        let mut pipeline = fixture(ParentConfig::default(), 48000);
        pipeline.dsp.rms[0] = 0.04; // sqrt -> 0.2
        pipeline.tuning.gain_rms = 2.0;

        let mut sel = selector(OutputKind::Rms);
        sel.channel = parse_channel("L").unwrap();
        assert_relative_eq!(pipeline.value(&sel), 0.4, epsilon = 1e-12);

        pipeline.tuning.gain_rms = 50.0; // clamps at 1
        assert_relative_eq!(pipeline.value(&sel), 1.0);
    }

    #[test]
    fn test_sum_reads_average_first_two_channels() {
        let mut pipeline = fixture(ParentConfig::default(), 48000);
        pipeline.dsp.rms[0] = 0.25;
        pipeline.dsp.rms[1] = 0.01;
        pipeline.dsp.peak[0] = 0.6;
        pipeline.dsp.peak[1] = 0.2;

        let sel = selector(OutputKind::Rms);
        assert_relative_eq!(pipeline.value(&sel), (0.5 + 0.1) * 0.5, epsilon = 1e-12);

        let sel = selector(OutputKind::Peak);
        assert_relative_eq!(pipeline.value(&sel), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_accumulate_tracks_stereo_levels() {
        let mut pipeline = fixture(ParentConfig::default(), 48000);
        // instant filters for a deterministic check
        pipeline.dsp.k_rms = EnvelopeCoeffs::default();
        pipeline.dsp.k_peak = EnvelopeCoeffs::default();

        let frames = [0.5f32, -1.0, 0.5, -1.0];
        pipeline
            .dsp
            .accumulate(&SampleChunk::F32(&frames), 2, Channel::Sum);

        assert_relative_eq!(pipeline.dsp.rms[0], 0.25);
        assert_relative_eq!(pipeline.dsp.rms[1], 1.0);
        assert_relative_eq!(pipeline.dsp.peak[0], 0.5);
        assert_relative_eq!(pipeline.dsp.peak[1], 1.0);
    }

    #[test]
    fn test_mono_accumulation_duplicates_into_right() {
        let mut pipeline = fixture(ParentConfig::default(), 48000);
        pipeline.dsp.k_peak = EnvelopeCoeffs::default();

        let frames = [0.8f32];
        pipeline
            .dsp
            .accumulate(&SampleChunk::F32(&frames), 1, Channel::Sum);

        assert_relative_eq!(pipeline.dsp.peak[0], 0.8);
        assert_relative_eq!(pipeline.dsp.peak[1], 0.8);
    }

    #[test]
    fn test_fft_freq_scenario_1khz_bin() {
        let pipeline = fixture(spectral_cfg(512, 0), 48000);

        let mut sel = selector(OutputKind::FftFreq);
        sel.fft_idx = 11;
        assert_relative_eq!(pipeline.value(&sel), 11.0 * 48000.0 / 512.0);
        assert_relative_eq!(pipeline.value(&sel), 1031.25);
    }

    #[test]
    fn test_fft_freq_past_nyquist_is_null() {
        let pipeline = fixture(spectral_cfg(512, 0), 48000);

        let mut sel = selector(OutputKind::FftFreq);
        sel.fft_idx = 257; // buffer_size/2 is 256
        assert_eq!(pipeline.value(&sel), 0.0);
    }

    #[test]
    fn test_spectral_read_through_sensitivity_mapping() {
        let mut pipeline = fixture(spectral_cfg(512, 0), 48000);
        pipeline.tuning.sensitivity = 10.0 / 35.0;

        let tone_bin = 11usize;
        let freq = tone_bin as f64 * 48000.0 / 512.0;
        if let Some(spectral) = &mut pipeline.dsp.spectral {
            for i in 0..512 {
                spectral.write((TAU * freq * i as f64 / 48000.0).sin() as f32);
            }
            spectral.process();
        }

        let mut sel = selector(OutputKind::Fft);
        sel.fft_idx = tone_bin;
        let lit = pipeline.value(&sel);

        sel.fft_idx = 100; // a quiet bin
        let quiet = pipeline.value(&sel);

        assert!(lit > quiet);
        assert!(lit <= 1.0 + 1e-9);
        assert!(quiet >= 0.0);
    }

    #[test]
    fn test_band_freq_reads_boundary_table() {
        let pipeline = fixture(spectral_cfg(512, 8), 48000);

        let mut sel = selector(OutputKind::BandFreq);
        sel.band_idx = 3;
        let expected = pipeline.dsp.bands.as_ref().unwrap().bounds()[3];
        assert_relative_eq!(pipeline.value(&sel), f64::from(expected));
    }

    #[test]
    fn test_inert_pipeline_reads_null_results() {
        let mut pipeline = Pipeline {
            scheduler: None,
            capture: None,
            format: None,
            dsp: DspState::new(),
            cfg: spectral_cfg(512, 8),
            tuning: Tuning::default(),
            last_pending: 0,
        };
        pipeline.poll();

        for kind in [
            OutputKind::Rms,
            OutputKind::Peak,
            OutputKind::Fft,
            OutputKind::Band,
            OutputKind::FftFreq,
            OutputKind::BandFreq,
            OutputKind::DeviceStatus,
            OutputKind::BufferStatus,
        ] {
            assert_eq!(pipeline.value(&selector(kind)), 0.0, "{kind:?}");
        }

        assert_eq!(
            pipeline.string_value(&selector(OutputKind::Format)),
            Some(String::new())
        );
        assert_eq!(pipeline.string_value(&selector(OutputKind::Rms)), None);
    }
}
