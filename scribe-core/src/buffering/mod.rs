//! Sample buffering: the recorder's lock-free ring and the chunk planner.
//!
//! The ring uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free and
//! safe to call from the real-time audio callback.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the recorder owner.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Create a matched producer/consumer pair backed by a heap-allocated ring
/// holding `capacity` interleaved samples (at least one).
pub fn create_audio_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}

/// Ring capacity for `max_secs` of `channels`-channel audio at `sample_rate`.
///
/// Always a whole number of frames so partial pushes never split a frame.
pub fn recording_capacity(max_secs: f64, sample_rate: u32, channels: u16) -> usize {
    let frames = (max_secs.max(0.0) * sample_rate as f64).ceil() as usize;
    frames.max(1) * channels.max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_round_trips_interleaved_samples() {
        let (mut producer, mut consumer) = create_audio_ring(8);
        assert_eq!(producer.push_slice(&[0.1, 0.2, 0.3, 0.4]), 4);
        assert_eq!(consumer.occupied_len(), 4);

        let mut out = [0.0f32; 4];
        assert_eq!(consumer.pop_slice(&mut out), 4);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn full_ring_rejects_excess_samples() {
        let (mut producer, _consumer) = create_audio_ring(4);
        assert_eq!(producer.push_slice(&[0.0; 6]), 4);
        assert_eq!(producer.vacant_len(), 0);
    }

    #[test]
    fn recording_capacity_is_frame_aligned() {
        assert_eq!(recording_capacity(2.0, 48_000, 2), 192_000);
        assert_eq!(recording_capacity(0.5, 44_100, 3) % 3, 0);
        assert_eq!(recording_capacity(0.0, 16_000, 1), 1);
    }
}
