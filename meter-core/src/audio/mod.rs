//! Audio capture and frame demuxing built on cpal

pub mod capture;
pub mod chunk;
pub mod scheduler;

pub use capture::{CaptureSession, DeviceError, StreamFormat};
pub use chunk::{Channel, SampleChunk, SampleFormat, MAX_CHANNELS};
pub use scheduler::CaptureScheduler;
