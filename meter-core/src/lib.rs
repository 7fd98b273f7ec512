//! Audio Level Core - real-time audio loudness and spectrum analysis
//!
//! Derives smoothed RMS and peak levels per channel, a windowed power
//! spectrum and log-spaced frequency band energies from a capture endpoint.
//! Measures are organized as a parent/child graph: one parent owns a capture
//! pipeline, children project single scalars from it. All processing runs
//! synchronously on the host's poll call; a relay thread only forwards the
//! device's data-ready signal.

pub mod audio;
pub mod dsp;
pub mod measure;

pub use audio::capture::Port;
pub use audio::scheduler::DataReadyFn;
pub use audio::{Channel, DeviceError, SampleFormat};
pub use dsp::{BandAggregator, EnvelopeCoeffs, SpectralAnalyzer};
pub use measure::{MeasureId, MeasureRegistry, OptionReader, OutputKind, ScopeId};
