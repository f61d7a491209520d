/// PCM ring buffer between the device callback and the frame pump
///
/// The cpal callback pushes raw samples as they arrive; the pump thread
/// pops exact frame-sized chunks. Holds 3 seconds of 16kHz PCM so a slow
/// pump loses old audio rather than blocking the audio callback.

use crate::frame::{AudioSample, SAMPLE_RATE};
use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Default capacity: 3 seconds at 16kHz
pub const RING_DURATION_SECS: usize = 3;
pub const RING_CAPACITY: usize = RING_DURATION_SECS * SAMPLE_RATE as usize;

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Ring buffer of PCM samples with overwrite-oldest semantics.
///
/// Producer and consumer halves are locked separately so the callback
/// side and the pump side do not contend on one lock.
pub struct PcmRing {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
}

impl PcmRing {
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        debug!("Creating PCM ring with capacity {} samples", capacity);

        let rb = HeapRb::<AudioSample>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
        }
    }

    /// Push samples from the device callback.
    ///
    /// If the ring is full the oldest samples are aged out to make
    /// room; the callback must never block.
    pub fn push(&self, samples: &[AudioSample]) -> usize {
        let mut producer = self.producer.lock().unwrap();

        let shortfall = samples.len().saturating_sub(producer.vacant_len());
        if shortfall > 0 {
            self.consumer.lock().unwrap().skip(shortfall);
            warn!("PCM ring full, dropped {} oldest samples", shortfall);
        }

        producer.push_slice(samples)
    }

    /// Pop one exact frame of `frame_samples` samples, or None if fewer
    /// than a full frame is buffered.
    pub fn pop_frame(&self, frame_samples: usize) -> Option<Vec<AudioSample>> {
        let mut consumer = self.consumer.lock().unwrap();

        if consumer.occupied_len() < frame_samples {
            return None;
        }

        let mut out = vec![0; frame_samples];
        let read = consumer.pop_slice(&mut out);
        debug_assert_eq!(read, frame_samples);
        Some(out)
    }

    pub fn len(&self) -> usize {
        self.consumer.lock().unwrap().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.consumer.lock().unwrap().capacity().get()
    }

    pub fn clear(&self) {
        let mut consumer = self.consumer.lock().unwrap();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
        debug!("Cleared PCM ring");
    }
}

impl Default for PcmRing {
    fn default() -> Self {
        Self::new()
    }
}
