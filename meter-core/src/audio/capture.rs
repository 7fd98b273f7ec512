//! Capture endpoint management built on cpal
//!
//! Resolves a device for the configured port, negotiates a supported sample
//! format, and feeds raw interleaved frames from the stream callback into an
//! SPSC queue drained by the host's poll path. The callback also signals the
//! wake event consumed by the relay thread and flags queue overruns as
//! discontinuities.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::chunk::{SampleChunk, SampleFormat};
use super::scheduler::CaptureEvents;

/// Which endpoint direction a pipeline taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Port {
    /// The playback endpoint, captured in loopback.
    #[default]
    Output,
    /// The recording endpoint.
    Input,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("audio endpoint '{0}' not found")]
    EndpointNotFound(String),

    #[error("no default audio endpoint for the requested port")]
    NoDefaultEndpoint,

    #[error("failed to enumerate audio endpoints: {0}")]
    Enumerate(String),

    #[error("failed to read device name: {0}")]
    DeviceName(String),

    #[error("failed to query stream format: {0}")]
    FormatQuery(String),

    #[error("unsupported sample format {0:?}: only PCM 16b integer or PCM 32b float are supported")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("failed to build capture stream: {0}")]
    BuildStream(String),

    #[error("failed to start capture stream: {0}")]
    StartStream(String),
}

/// Negotiated stream format.
#[derive(Debug, Clone, Copy)]
pub struct StreamFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn describe(&self) -> String {
        format!(
            "{}Hz {} {}ch",
            self.sample_rate,
            self.sample_format.describe(),
            self.channels
        )
    }
}

/// Flags shared between the stream callback and the poll path.
#[derive(Default)]
struct CaptureShared {
    /// Set by the callback when a batch could not be queued whole.
    discontinuity: AtomicBool,
    /// Set by the stream error callback; the next poll releases the device.
    fault: AtomicBool,
}

/// Format-typed consumer side of the capture queue, with a drain scratch
/// buffer sized to the full queue.
enum SampleQueue {
    F32 {
        consumer: HeapConsumer<f32>,
        scratch: Vec<f32>,
    },
    S16 {
        consumer: HeapConsumer<i16>,
        scratch: Vec<i16>,
    },
}

/// One batch drained from the capture queue.
pub struct DrainedBatch<'a> {
    pub chunk: SampleChunk<'a>,
    /// The capture collaborator detected a gap; accumulation for this batch
    /// must be skipped and previous state held.
    pub discontinuity: bool,
}

/// An open capture stream and its pull-style poll interface.
///
/// Owned exclusively by one parent pipeline; not `Send` (the underlying
/// stream handle is platform-bound).
pub struct CaptureSession {
    device: Device,
    _stream: Stream,
    format: StreamFormat,
    device_name: String,
    queue: SampleQueue,
    shared: Arc<CaptureShared>,
}

impl CaptureSession {
    /// Resolve the device for `port` (a specific endpoint when
    /// `requested_id` is non-empty, otherwise the default), negotiate its
    /// format and start capturing. The stream callback signals `events` on
    /// every delivery.
    pub fn open(
        port: Port,
        requested_id: &str,
        events: Arc<CaptureEvents>,
    ) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = resolve_device(&host, port, requested_id)?;
        let device_name = device
            .name()
            .map_err(|e| DeviceError::DeviceName(e.to_string()))?;

        let supported = match port {
            Port::Output => device.default_output_config(),
            Port::Input => device.default_input_config(),
        }
        .map_err(|e| DeviceError::FormatQuery(e.to_string()))?;

        let sample_format = match supported.sample_format() {
            cpal::SampleFormat::F32 => SampleFormat::PcmF32,
            cpal::SampleFormat::I16 => SampleFormat::Pcm16,
            other => return Err(DeviceError::UnsupportedFormat(other)),
        };

        let config: StreamConfig = supported.into();
        let format = StreamFormat {
            sample_format,
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        // one second of queue between the callback and the poll path
        let capacity = format.sample_rate as usize * format.channels as usize;
        let shared = Arc::new(CaptureShared::default());

        let (queue, stream) = match sample_format {
            SampleFormat::PcmF32 => {
                let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
                let stream =
                    build_stream(&device, &config, producer, Arc::clone(&shared), events)?;
                (
                    SampleQueue::F32 {
                        consumer,
                        scratch: vec![0.0; capacity],
                    },
                    stream,
                )
            }
            SampleFormat::Pcm16 => {
                let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
                let stream =
                    build_stream(&device, &config, producer, Arc::clone(&shared), events)?;
                (
                    SampleQueue::S16 {
                        consumer,
                        scratch: vec![0; capacity],
                    },
                    stream,
                )
            }
        };

        stream
            .play()
            .map_err(|e| DeviceError::StartStream(e.to_string()))?;

        Ok(Self {
            device,
            _stream: stream,
            format,
            device_name,
            queue,
            shared,
        })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Endpoint identifier. cpal exposes a single name per device, which
    /// doubles as the identifier here.
    pub fn device_id(&self) -> &str {
        &self.device_name
    }

    /// Whole frames currently waiting in the queue.
    pub fn pending_frames(&self) -> usize {
        let samples = match &self.queue {
            SampleQueue::F32 { consumer, .. } => consumer.len(),
            SampleQueue::S16 { consumer, .. } => consumer.len(),
        };
        samples / self.format.channels as usize
    }

    /// Pop everything currently queued into the scratch buffer and hand it
    /// out as one typed batch. Returns `None` once the queue is empty, so a
    /// drain loop is bounded by the queue capacity.
    pub fn drain(&mut self) -> Option<DrainedBatch<'_>> {
        let channels = self.format.channels as usize;

        match &mut self.queue {
            SampleQueue::F32 { consumer, scratch } => {
                let n = consumer.pop_slice(scratch);
                if n == 0 {
                    return None;
                }
                let n = n - n % channels;
                Some(DrainedBatch {
                    chunk: SampleChunk::F32(&scratch[..n]),
                    discontinuity: self.shared.discontinuity.swap(false, Ordering::Relaxed),
                })
            }
            SampleQueue::S16 { consumer, scratch } => {
                let n = consumer.pop_slice(scratch);
                if n == 0 {
                    return None;
                }
                let n = n - n % channels;
                Some(DrainedBatch {
                    chunk: SampleChunk::S16(&scratch[..n]),
                    discontinuity: self.shared.discontinuity.swap(false, Ordering::Relaxed),
                })
            }
        }
    }

    /// The stream error callback reported a fault since the last check.
    pub fn faulted(&self) -> bool {
        self.shared.fault.load(Ordering::Relaxed)
    }

    /// The endpoint still answers queries and the stream has not faulted.
    pub fn device_active(&self) -> bool {
        !self.faulted() && self.device.name().is_ok()
    }
}

fn resolve_device(host: &cpal::Host, port: Port, requested_id: &str) -> Result<Device, DeviceError> {
    if requested_id.is_empty() {
        return match port {
            Port::Output => host.default_output_device(),
            Port::Input => host.default_input_device(),
        }
        .ok_or(DeviceError::NoDefaultEndpoint);
    }

    endpoint_iter(host, port)?
        .find(|d| {
            d.name()
                .map(|n| n.eq_ignore_ascii_case(requested_id))
                .unwrap_or(false)
        })
        .ok_or_else(|| DeviceError::EndpointNotFound(requested_id.to_owned()))
}

fn endpoint_iter(
    host: &cpal::Host,
    port: Port,
) -> Result<Box<dyn Iterator<Item = Device>>, DeviceError> {
    match port {
        Port::Output => host
            .output_devices()
            .map(|it| Box::new(it) as Box<dyn Iterator<Item = Device>>),
        Port::Input => host
            .input_devices()
            .map(|it| Box::new(it) as Box<dyn Iterator<Item = Device>>),
    }
    .map_err(|e| DeviceError::Enumerate(e.to_string()))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProducer<T>,
    shared: Arc<CaptureShared>,
    events: Arc<CaptureEvents>,
) -> Result<Stream, DeviceError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let fault_shared = Arc::clone(&shared);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // queue whole callbacks only, so frame alignment survives an
                // overrun; a dropped batch is a discontinuity
                if producer.free_len() >= data.len() {
                    producer.push_slice(data);
                } else {
                    shared.discontinuity.store(true, Ordering::Relaxed);
                }
                events.signal_data_ready();
            },
            move |err| {
                log::warn!("capture stream fault: {err}");
                fault_shared.fault.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| DeviceError::BuildStream(e.to_string()))
}

/// Friendly names of all endpoints for the given port, for the device-list
/// output. Enumeration failures degrade to an empty list.
pub fn list_endpoints(port: Port) -> Vec<String> {
    let host = cpal::default_host();
    match endpoint_iter(&host, port) {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(err) => {
            log::warn!("{err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_endpoints_does_not_crash() {
        let _ = list_endpoints(Port::Output);
        let _ = list_endpoints(Port::Input);
    }

    #[test]
    fn test_open_with_unknown_id_fails() {
        let events = Arc::new(CaptureEvents::new());
        let result = CaptureSession::open(Port::Output, "no-such-endpoint-identifier", events);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_description() {
        let format = StreamFormat {
            sample_format: SampleFormat::PcmF32,
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(format.describe(), "48000Hz PCM 32b 2ch");
    }
}
