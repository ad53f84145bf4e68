//! Lock-free SPSC sample ring between the decode path and the audio output
//!
//! The producer interleaves planar decoded audio straight into the ring's
//! free space (two contiguous slices when the write wraps). The consumer runs
//! in the real-time rendering context and never locks: it pops samples,
//! applies the volume ramp, and advances the audio clock.
//!
//! Seek flushes are expressed as a discard watermark. The producer records
//! how many samples had been written when the flush was requested; the
//! consumer skips up to that point before rendering anything else.

use crate::audio::{AudioClock, AudioFormat, VolumeRamp};
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct RingCounters {
    written: AtomicU64,
    read: AtomicU64,
    discard_until: AtomicU64,
    overflows: AtomicU64,
    dropped_samples: AtomicU64,
    underruns: AtomicU64,
    wrapped_writes: AtomicU64,
}

/// Ring occupancy statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: usize,
    pub written: u64,
    pub read: u64,
    pub overflows: u64,
    pub dropped_samples: u64,
    pub underruns: u64,
    pub wrapped_writes: u64,
}

/// Create a ring holding `capacity_frames` frames of `format` audio
pub fn sample_ring(format: AudioFormat, capacity_frames: usize) -> (SampleProducer, SampleConsumer) {
    let capacity = capacity_frames.max(1) * format.channels.max(1);
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
    let counters = Arc::new(RingCounters::default());

    let monitor = RingMonitor { counters: counters.clone(), capacity, format };
    (
        SampleProducer { inner: producer, monitor: monitor.clone() },
        SampleConsumer {
            inner: consumer,
            monitor,
            clock: None,
            volume: None,
        },
    )
}

/// Read-only view of ring occupancy, usable from any thread
#[derive(Debug, Clone)]
pub struct RingMonitor {
    counters: Arc<RingCounters>,
    capacity: usize,
    format: AudioFormat,
}

impl RingMonitor {
    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples physically held, including ones awaiting discard
    pub fn occupied(&self) -> usize {
        let written = self.counters.written.load(Ordering::Acquire);
        let read = self.counters.read.load(Ordering::Acquire);
        written.saturating_sub(read) as usize
    }

    /// Samples that will actually be played
    pub fn fresh(&self) -> usize {
        let written = self.counters.written.load(Ordering::Acquire);
        let read = self.counters.read.load(Ordering::Acquire);
        let discard = self.counters.discard_until.load(Ordering::Acquire);
        written.saturating_sub(read.max(discard)) as usize
    }

    /// Seconds of playable audio buffered
    pub fn fresh_secs(&self) -> f64 {
        self.format.samples_to_secs(self.fresh())
    }

    /// Occupancy as a percentage of capacity
    pub fn health(&self) -> f64 {
        self.occupied() as f64 / self.capacity as f64 * 100.0
    }

    pub fn stats(&self) -> RingStats {
        let c = &self.counters;
        RingStats {
            capacity: self.capacity,
            written: c.written.load(Ordering::Relaxed),
            read: c.read.load(Ordering::Relaxed),
            overflows: c.overflows.load(Ordering::Relaxed),
            dropped_samples: c.dropped_samples.load(Ordering::Relaxed),
            underruns: c.underruns.load(Ordering::Relaxed),
            wrapped_writes: c.wrapped_writes.load(Ordering::Relaxed),
        }
    }
}

/// Yields samples of `planes` interleaved, starting at interleaved index `offset`
pub fn interleaved_samples<'a>(planes: &'a [&'a [f32]], offset: usize) -> impl Iterator<Item = f32> + 'a {
    let channels = planes.len().max(1);
    let frames = planes.iter().map(|p| p.len()).min().unwrap_or(0);
    (offset..frames * planes.len()).map(move |i| planes[i % channels][i / channels])
}

/// Interleave `count` samples of `planes`, starting at interleaved index
/// `input_offset`, into `output` starting at `output_offset`
///
/// Returns the number of samples copied, which is short of `count` when the
/// planes or the output run out.
pub fn interleave(
    planes: &[&[f32]],
    input_offset: usize,
    count: usize,
    output: &mut [f32],
    output_offset: usize,
) -> usize {
    let Some(output) = output.get_mut(output_offset..) else {
        return 0;
    };
    let mut copied = 0;
    for (slot, sample) in output.iter_mut().zip(interleaved_samples(planes, input_offset)).take(count) {
        *slot = sample;
        copied += 1;
    }
    copied
}

/// Producer half, owned by the audio pipeline
pub struct SampleProducer {
    inner: HeapProd<f32>,
    monitor: RingMonitor,
}

impl SampleProducer {
    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Free space in samples
    pub fn available_write(&self) -> usize {
        self.inner.vacant_len()
    }

    pub fn monitor(&self) -> RingMonitor {
        self.monitor.clone()
    }

    /// Interleave `frames` frames of `planes` into the ring
    ///
    /// The write covers at most the free space, split into the slice up to
    /// the wrap point and the slice after it. Returns the number of samples
    /// written; anything short of `frames * planes.len()` was dropped and is
    /// counted as an overflow.
    pub fn write_interleaved(&mut self, planes: &[&[f32]], frames: usize) -> usize {
        let requested = frames * planes.len();
        let mut samples = interleaved_samples(planes, 0).take(requested);

        let (head, tail) = self.inner.vacant_slices_mut();
        let mut written = 0;
        for slot in head.iter_mut() {
            match samples.next() {
                Some(sample) => {
                    slot.write(sample);
                    written += 1;
                }
                None => break,
            }
        }
        let head_written = written;
        if head_written == head.len() {
            for slot in tail.iter_mut() {
                match samples.next() {
                    Some(sample) => {
                        slot.write(sample);
                        written += 1;
                    }
                    None => break,
                }
            }
        }

        // SAFETY: exactly `written` vacant slots, contiguous from the write
        // index across the wrap point, were initialised above.
        unsafe { self.inner.advance_write_index(written) };

        let counters = &self.monitor.counters;
        counters.written.fetch_add(written as u64, Ordering::AcqRel);
        if written > head_written {
            counters.wrapped_writes.fetch_add(1, Ordering::Relaxed);
        }
        if written < requested {
            counters.overflows.fetch_add(1, Ordering::Relaxed);
            counters.dropped_samples.fetch_add((requested - written) as u64, Ordering::Relaxed);
        }
        written
    }

    /// Mark everything written so far for discard by the consumer
    pub fn request_flush(&self) {
        let written = self.monitor.counters.written.load(Ordering::Acquire);
        self.monitor.counters.discard_until.store(written, Ordering::Release);
    }
}

/// Consumer half, owned by the real-time rendering context
pub struct SampleConsumer {
    inner: HeapCons<f32>,
    monitor: RingMonitor,
    clock: Option<Arc<AudioClock>>,
    volume: Option<VolumeRamp>,
}

impl SampleConsumer {
    /// Advance `clock` by every frame rendered, and render silence while it is paused
    pub fn attach_clock(&mut self, clock: Arc<AudioClock>) {
        self.clock = Some(clock);
    }

    pub fn attach_volume(&mut self, volume: VolumeRamp) {
        self.volume = Some(volume);
    }

    pub fn format(&self) -> AudioFormat {
        self.monitor.format
    }

    /// Playable samples, excluding ones awaiting discard
    pub fn available_read(&self) -> usize {
        self.monitor.fresh()
    }

    /// Skip samples up to the discard watermark; returns how many were dropped
    pub fn discard_stale(&mut self) -> usize {
        let counters = &self.monitor.counters;
        let target = counters.discard_until.load(Ordering::Acquire);
        let read = counters.read.load(Ordering::Acquire);
        if target <= read {
            return 0;
        }
        let stale = ((target - read) as usize).min(self.inner.occupied_len());
        let skipped = self.inner.skip(stale);
        counters.read.fetch_add(skipped as u64, Ordering::AcqRel);
        skipped
    }

    /// Fill `out` with interleaved samples for the device
    ///
    /// Renders silence while the attached clock is paused. Returns the
    /// number of samples taken from the ring; the remainder is zeroed.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        self.discard_stale();

        let epoch = self.clock.as_ref().map(|clock| clock.epoch());
        if let Some(clock) = &self.clock {
            if !clock.is_playing() {
                out.fill(0.0);
                return 0;
            }
        }

        let channels = self.monitor.format.channels.max(1);
        let whole = out.len() - out.len() % channels;
        let popped = self.inner.pop_slice(&mut out[..whole]);
        let counters = &self.monitor.counters;
        counters.read.fetch_add(popped as u64, Ordering::AcqRel);

        out[popped..].fill(0.0);
        if popped < whole {
            counters.underruns.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(volume) = &mut self.volume {
            volume.apply(&mut out[..popped]);
        }
        if let (Some(clock), Some(epoch)) = (&self.clock, epoch) {
            // Repositioned mid-render: these samples predate the seek
            if !clock.advance_in(epoch, popped / channels) {
                out.fill(0.0);
            }
        }
        popped
    }
}
