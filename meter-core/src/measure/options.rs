//! Recognized configuration keys and their validation
//!
//! The host feeds options through the [`OptionReader`] boundary. Every value
//! is validated here; an invalid value is reported to the log and the
//! previous (or default) value is retained, so processing continues in a
//! degraded mode rather than failing.

use std::collections::HashMap;
use thiserror::Error;

use crate::audio::capture::Port;
use crate::audio::chunk::Channel;

/// Host-side configuration source.
///
/// Mirrors a key/value options store: `read_string` returns the raw value
/// for a key or `None` when it is absent; the numeric readers parse on top
/// of it and fall back to the supplied default.
pub trait OptionReader {
    fn read_string(&self, key: &str) -> Option<String>;

    fn read_int(&self, key: &str, default: i64) -> i64 {
        self.read_string(key)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    fn read_double(&self, key: &str, default: f64) -> f64 {
        self.read_string(key)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }
}

impl OptionReader for HashMap<String, String> {
    fn read_string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Error, Debug)]
pub enum OptionError {
    #[error("invalid Port '{0}', must be one of: Output or Input")]
    Port(String),

    #[error("invalid Channel '{0}', must be an integer between 0 and 7, or one of: L, R, C, LFE, BL, BR, SL, SR, or Sum")]
    Channel(String),

    #[error("invalid Type '{0}', must be one of: RMS, Peak, FFT, Band, FFTFreq, BandFreq, Format, DeviceStatus, DeviceName, DeviceID, DeviceList, or BufferStatus")]
    Type(String),

    #[error("invalid FFTSize {0}: must be an even integer >= 0 (powers of 2 work best)")]
    FftSize(i64),

    #[error("invalid Bands {0}: must be an integer >= 0")]
    Bands(i64),
}

/// What a measure projects out of its resolved parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    Rms,
    Peak,
    Fft,
    Band,
    FftFreq,
    BandFreq,
    Format,
    DeviceStatus,
    DeviceName,
    DeviceId,
    DeviceList,
    BufferStatus,
}

impl OutputKind {
    /// String-typed outputs answer string reads; everything else is numeric.
    pub fn is_string(self) -> bool {
        matches!(
            self,
            OutputKind::Format
                | OutputKind::DeviceName
                | OutputKind::DeviceId
                | OutputKind::DeviceList
        )
    }
}

pub fn parse_port(value: &str) -> Result<Port, OptionError> {
    if value.eq_ignore_ascii_case("Output") {
        Ok(Port::Output)
    } else if value.eq_ignore_ascii_case("Input") {
        Ok(Port::Input)
    } else {
        Err(OptionError::Port(value.to_owned()))
    }
}

pub fn parse_channel(value: &str) -> Result<Channel, OptionError> {
    const ALIASES: [(Channel, &[&str]); 9] = [
        (Channel::FrontLeft, &["L", "FL", "0"]),
        (Channel::FrontRight, &["R", "FR", "1"]),
        (Channel::Center, &["C", "2"]),
        (Channel::Lfe, &["LFE", "Sub", "3"]),
        (Channel::BackLeft, &["BL", "4"]),
        (Channel::BackRight, &["BR", "5"]),
        (Channel::SideLeft, &["SL", "6"]),
        (Channel::SideRight, &["SR", "7"]),
        (Channel::Sum, &["Sum", "Avg"]),
    ];

    ALIASES
        .iter()
        .find(|(_, names)| names.iter().any(|n| n.eq_ignore_ascii_case(value)))
        .map(|(ch, _)| *ch)
        .ok_or_else(|| OptionError::Channel(value.to_owned()))
}

pub fn parse_type(value: &str) -> Result<OutputKind, OptionError> {
    const NAMES: [(OutputKind, &str); 12] = [
        (OutputKind::Rms, "RMS"),
        (OutputKind::Peak, "Peak"),
        (OutputKind::Fft, "FFT"),
        (OutputKind::Band, "Band"),
        (OutputKind::FftFreq, "FFTFreq"),
        (OutputKind::BandFreq, "BandFreq"),
        (OutputKind::Format, "Format"),
        (OutputKind::DeviceStatus, "DeviceStatus"),
        (OutputKind::DeviceName, "DeviceName"),
        (OutputKind::DeviceId, "DeviceID"),
        (OutputKind::DeviceList, "DeviceList"),
        (OutputKind::BufferStatus, "BufferStatus"),
    ];

    NAMES
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(value))
        .map(|(kind, _)| *kind)
        .ok_or_else(|| OptionError::Type(value.to_owned()))
}

/// Parent-only configuration fixed at creation time.
#[derive(Debug, Clone)]
pub struct ParentConfig {
    pub port: Port,
    pub device_id: String,
    pub channel: Channel,
    pub fft_size: usize,
    pub fft_buffer_size: usize,
    pub n_bands: usize,
    pub freq_min: f64,
    pub freq_max: f64,
}

impl Default for ParentConfig {
    fn default() -> Self {
        Self {
            port: Port::Output,
            device_id: String::new(),
            channel: Channel::Sum,
            fft_size: 0,
            fft_buffer_size: 0,
            n_bands: 0,
            freq_min: 20.0,
            freq_max: 20000.0,
        }
    }
}

impl ParentConfig {
    pub fn from_reader(reader: &dyn OptionReader) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = reader.read_string("Port").filter(|s| !s.is_empty()) {
            match parse_port(&port) {
                Ok(port) => cfg.port = port,
                Err(err) => log::error!("{err}"),
            }
        }

        if let Some(id) = reader.read_string("ID") {
            cfg.device_id = id;
        }

        if let Some(channel) = reader.read_string("Channel").filter(|s| !s.is_empty()) {
            match parse_channel(&channel) {
                Ok(channel) => cfg.channel = channel,
                Err(err) => log::error!("{err}"),
            }
        }

        let fft_size = reader.read_int("FFTSize", cfg.fft_size as i64);
        if fft_size < 0 || fft_size % 2 != 0 {
            log::error!("{}", OptionError::FftSize(fft_size));
        } else {
            cfg.fft_size = fft_size as usize;
        }

        cfg.fft_buffer_size = (reader.read_int("FFTBufferSize", 0).max(0) as usize).max(cfg.fft_size);

        let n_bands = reader.read_int("Bands", cfg.n_bands as i64);
        if n_bands < 0 {
            log::error!("{}", OptionError::Bands(n_bands));
        } else {
            cfg.n_bands = n_bands as usize;
        }

        cfg.freq_min = reader.read_double("FreqMin", cfg.freq_min).max(0.0);
        cfg.freq_max = reader.read_double("FreqMax", cfg.freq_max).max(0.0);

        cfg
    }
}

/// Parent-only smoothing, gain and sensitivity settings, re-read on reload.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Attack/decay time constants in milliseconds.
    pub env_rms: [f64; 2],
    pub env_peak: [f64; 2],
    pub env_fft: [f64; 2],
    pub gain_rms: f64,
    pub gain_peak: f64,
    /// Stored as the final scale factor `10 / max(1, configured dB)`.
    pub sensitivity: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            env_rms: [300.0, 300.0],
            env_peak: [50.0, 2500.0],
            env_fft: [300.0, 300.0],
            gain_rms: 1.0,
            gain_peak: 1.0,
            sensitivity: 0.0,
        }
    }
}

impl Tuning {
    pub fn update_from(&mut self, reader: &dyn OptionReader, fft_size: usize) {
        self.env_rms[0] = reader.read_int("RMSAttack", self.env_rms[0] as i64).max(0) as f64;
        self.env_rms[1] = reader.read_int("RMSDecay", self.env_rms[1] as i64).max(0) as f64;
        self.env_peak[0] = reader.read_int("PeakAttack", self.env_peak[0] as i64).max(0) as f64;
        self.env_peak[1] = reader.read_int("PeakDecay", self.env_peak[1] as i64).max(0) as f64;
        self.env_fft[0] = reader.read_int("FFTAttack", self.env_fft[0] as i64).max(0) as f64;
        self.env_fft[1] = reader.read_int("FFTDecay", self.env_fft[1] as i64).max(0) as f64;

        self.gain_rms = reader.read_double("RMSGain", self.gain_rms).max(0.0);
        self.gain_peak = reader.read_double("PeakGain", self.gain_peak).max(0.0);

        // default dynamic range tracks the transform size
        let default_db = 10.0 * (fft_size as f64).log10();
        self.sensitivity = 10.0 / reader.read_double("Sensitivity", default_db).max(1.0);
    }
}

/// Per-measure projection: output type plus the channel and index
/// selectors, re-read on reload and clamped against the resolved parent's
/// configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selector {
    pub kind: OutputKind,
    pub channel: Channel,
    pub fft_idx: usize,
    pub band_idx: usize,
}

impl Selector {
    /// Re-parse the projection. `half_bins` and `n_bands` are the resolved
    /// parent's dimensions; indices are clamped here so reads can never go
    /// out of range.
    pub fn update_from(&mut self, reader: &dyn OptionReader, half_bins: usize, n_bands: usize) {
        if let Some(kind) = reader.read_string("Type").filter(|s| !s.is_empty()) {
            match parse_type(&kind) {
                Ok(kind) => self.kind = kind,
                Err(err) => log::error!("{err}"),
            }
        }

        if let Some(channel) = reader.read_string("Channel").filter(|s| !s.is_empty()) {
            match parse_channel(&channel) {
                Ok(channel) => self.channel = channel,
                Err(err) => log::error!("{err}"),
            }
        }

        self.fft_idx = (reader.read_int("FFTIdx", self.fft_idx as i64).max(0) as usize).min(half_bins);
        self.band_idx = (reader.read_int("BandIdx", self.band_idx as i64).max(0) as usize)
            .min(n_bands.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_channel_aliases_match_case_insensitively() {
        assert_eq!(parse_channel("L").unwrap(), Channel::FrontLeft);
        assert_eq!(parse_channel("fl").unwrap(), Channel::FrontLeft);
        assert_eq!(parse_channel("0").unwrap(), Channel::FrontLeft);
        assert_eq!(parse_channel("sub").unwrap(), Channel::Lfe);
        assert_eq!(parse_channel("AVG").unwrap(), Channel::Sum);
        assert_eq!(parse_channel("7").unwrap(), Channel::SideRight);
        assert!(parse_channel("center-ish").is_err());
    }

    #[test]
    fn test_invalid_port_and_channel_retain_defaults() {
        let cfg = ParentConfig::from_reader(&opts(&[
            ("Port", "Sideways"),
            ("Channel", "Q"),
        ]));
        assert_eq!(cfg.port, Port::Output);
        assert_eq!(cfg.channel, Channel::Sum);
    }

    #[test]
    fn test_odd_or_negative_fft_size_is_rejected() {
        let cfg = ParentConfig::from_reader(&opts(&[("FFTSize", "511")]));
        assert_eq!(cfg.fft_size, 0);

        let cfg = ParentConfig::from_reader(&opts(&[("FFTSize", "-4")]));
        assert_eq!(cfg.fft_size, 0);

        let cfg = ParentConfig::from_reader(&opts(&[("FFTSize", "512")]));
        assert_eq!(cfg.fft_size, 512);
    }

    #[test]
    fn test_fft_buffer_size_is_clamped_up_to_fft_size() {
        let cfg = ParentConfig::from_reader(&opts(&[
            ("FFTSize", "512"),
            ("FFTBufferSize", "256"),
        ]));
        assert_eq!(cfg.fft_buffer_size, 512);

        let cfg = ParentConfig::from_reader(&opts(&[
            ("FFTSize", "512"),
            ("FFTBufferSize", "2048"),
        ]));
        assert_eq!(cfg.fft_buffer_size, 2048);
    }

    #[test]
    fn test_negative_frequencies_and_gains_clamp_to_zero() {
        let cfg = ParentConfig::from_reader(&opts(&[("FreqMin", "-5"), ("FreqMax", "-1")]));
        assert_eq!(cfg.freq_min, 0.0);
        assert_eq!(cfg.freq_max, 0.0);

        let mut tuning = Tuning::default();
        tuning.update_from(&opts(&[("RMSGain", "-2.5")]), 0);
        assert_eq!(tuning.gain_rms, 0.0);
    }

    #[test]
    fn test_sensitivity_defaults_to_fft_size_range() {
        let mut tuning = Tuning::default();
        tuning.update_from(&opts(&[]), 1024);
        // 10*log10(1024) ~ 30.1 dB -> factor 10/30.1
        assert_relative_eq!(tuning.sensitivity, 10.0 / (10.0 * 1024f64.log10()), epsilon = 1e-12);

        let mut tuning = Tuning::default();
        tuning.update_from(&opts(&[("Sensitivity", "35")]), 1024);
        assert_relative_eq!(tuning.sensitivity, 10.0 / 35.0);
    }

    #[test]
    fn test_sensitivity_without_fft_falls_back_to_unity_floor() {
        let mut tuning = Tuning::default();
        tuning.update_from(&opts(&[]), 0);
        assert_relative_eq!(tuning.sensitivity, 10.0);
    }

    #[test]
    fn test_selector_indices_clamped_to_parent_dimensions() {
        let mut sel = Selector::default();
        sel.update_from(&opts(&[("FFTIdx", "9999"), ("BandIdx", "9999")]), 512, 24);
        assert_eq!(sel.fft_idx, 512);
        assert_eq!(sel.band_idx, 23);

        sel.update_from(&opts(&[("FFTIdx", "-3")]), 512, 24);
        assert_eq!(sel.fft_idx, 0);
    }

    #[test]
    fn test_invalid_type_retains_previous() {
        let mut sel = Selector::default();
        sel.update_from(&opts(&[("Type", "Peak")]), 0, 0);
        assert_eq!(sel.kind, OutputKind::Peak);

        sel.update_from(&opts(&[("Type", "Wobble")]), 0, 0);
        assert_eq!(sel.kind, OutputKind::Peak);
    }
}
