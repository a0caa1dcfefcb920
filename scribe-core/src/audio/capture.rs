//! Live microphone recording via cpal.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It must not block or perform I/O, so it only converts samples to f32 and
//! pushes whole interleaved frames into an SPSC ring sized for the maximum
//! recording length. Once the ring is full further frames are counted and
//! discarded; the recording is capped, never reallocated.
//!
//! Channel mixing and resampling happen later in
//! [`normalize`](super::normalize): a `Recorder` yields the device's native
//! layout just like a decoded file would.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `Recorder` must be created, stopped and dropped on one thread.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, Stream, StreamConfig,
};
use tracing::{error, info, warn};

use super::AudioBuffer;
use crate::{
    buffering::{
        create_audio_ring, recording_capacity, AudioConsumer, AudioProducer, Consumer, Observer,
        Producer,
    },
    error::{Result, ScribeError},
};

/// An in-progress microphone recording.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread.
pub struct Recorder {
    stream: Stream,
    consumer: AudioConsumer,
    running: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicUsize>,
    sample_rate: u32,
    channels: u16,
}

impl Recorder {
    /// Start recording from the preferred input device (by name), falling back
    /// to the default input device and then the first available one.
    ///
    /// At most `max_secs` of audio is kept.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no microphone exists, `AudioDevice` /
    /// `AudioStream` when cpal cannot open or start the stream.
    pub fn start(preferred_device_name: Option<&str>, max_secs: f64) -> Result<Self> {
        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => warn!("failed to list input devices: {e}"),
            }
        }

        let device = match selected_device.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => host
                .input_devices()
                .map_err(|e| ScribeError::AudioDevice(e.to_string()))?
                .next()
                .ok_or(ScribeError::NoDefaultInputDevice)?,
        };

        let supported = device
            .default_input_config()
            .map_err(|e| ScribeError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        let device_name = device.name().unwrap_or_default();
        info!(
            device = %device_name,
            sample_rate,
            channels,
            max_secs,
            "starting recording"
        );

        let config = StreamConfig {
            channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let (producer, consumer) =
            create_audio_ring(recording_capacity(max_secs, sample_rate, channels));
        let running = Arc::new(AtomicBool::new(true));
        let dropped_frames = Arc::new(AtomicUsize::new(0));
        let sink = FrameSink {
            producer,
            channels: channels.max(1) as usize,
            running: Arc::clone(&running),
            dropped_frames: Arc::clone(&dropped_frames),
            scratch: Vec::new(),
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut sink = sink;
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| sink.push_f32(data),
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut sink = sink;
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| sink.push_converted(data, i16_to_f32),
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            SampleFormat::U8 => {
                let mut sink = sink;
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| sink.push_converted(data, u8_to_f32),
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(ScribeError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ScribeError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ScribeError::AudioStream(e.to_string()))?;

        Ok(Self {
            stream,
            consumer,
            running,
            dropped_frames,
            sample_rate,
            channels,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels
    }

    /// Seconds of audio captured so far.
    pub fn recorded_secs(&self) -> f64 {
        let frames = self.consumer.occupied_len() / self.channels.max(1) as usize;
        frames as f64 / self.sample_rate as f64
    }

    /// Stop the stream and return everything recorded as an `AudioBuffer`.
    pub fn stop(mut self) -> Result<AudioBuffer> {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.stream.pause() {
            warn!("failed to pause input stream: {e}");
        }

        let mut interleaved = vec![0f32; self.consumer.occupied_len()];
        let n = self.consumer.pop_slice(&mut interleaved);
        interleaved.truncate(n);

        let dropped = self.dropped_frames.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(
                dropped,
                "maximum recording length reached; trailing audio discarded"
            );
        }

        let buffer =
            AudioBuffer::from_interleaved(&interleaved, self.channels as usize, self.sample_rate);
        info!(
            frames = buffer.frames(),
            duration_secs = format_args!("{:.2}", buffer.duration_secs()),
            "recording stopped"
        );
        Ok(buffer)
    }
}

/// Callback-side state: converts and pushes whole frames into the ring.
struct FrameSink {
    producer: AudioProducer,
    channels: usize,
    running: Arc<AtomicBool>,
    dropped_frames: Arc<AtomicUsize>,
    scratch: Vec<f32>,
}

impl FrameSink {
    fn push_f32(&mut self, data: &[f32]) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }
        let whole = data.len() - data.len() % self.channels;
        let fit = whole.min(self.producer.vacant_len() / self.channels * self.channels);
        let written = self.producer.push_slice(&data[..fit]);
        let lost = (whole - written) / self.channels;
        if lost > 0 {
            self.dropped_frames.fetch_add(lost, Ordering::Relaxed);
        }
    }

    fn push_converted<T: Copy>(&mut self, data: &[T], convert: fn(T) -> f32) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend(data.iter().map(|s| convert(*s)));
        self.push_f32(&scratch);
        self.scratch = scratch;
    }
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn u8_to_f32(sample: u8) -> f32 {
    (sample as f32 - 128.0) / 128.0
}
