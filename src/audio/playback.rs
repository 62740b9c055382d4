//! Gapless playback scheduling with hard interruption.
//!
//! Decoded response buffers are placed back to back on the destination's
//! clock. A buffer never starts in the past and never overlaps the buffer
//! queued before it. `flush_all` stops everything in flight when the user
//! talks over the assistant.

use crate::audio::pcm;
use crate::error::{Result, VoxdeskError};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifier of one scheduled buffer on a destination.
pub type SourceId = u64;

/// Mono float PCM ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PcmBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Decode little-endian PCM16 bytes.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32) -> Result<Self> {
        Ok(Self::new(pcm::decode_pcm16_le(bytes)?, sample_rate))
    }

    /// A silent buffer of the given length in seconds.
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let len = (seconds * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A clock-bearing output that can start buffers at arbitrary future times.
pub trait PlaybackDestination: Send {
    /// Current time of the playback clock, in seconds.
    fn current_time(&self) -> f64;

    /// Start `buffer` at `start_at` seconds on the playback clock.
    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId>;

    /// Stop a scheduled buffer. Unknown or already finished ids are ignored.
    fn stop(&mut self, source: SourceId);

    /// Release the output device. Called once by the scheduler on release.
    fn close(&mut self) {}
}

impl<D: PlaybackDestination + ?Sized> PlaybackDestination for Box<D> {
    fn current_time(&self) -> f64 {
        (**self).current_time()
    }

    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId> {
        (**self).schedule(buffer, start_at)
    }

    fn stop(&mut self, source: SourceId) {
        (**self).stop(source)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Placement of one buffer on the playback clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: f64,
    pub end: f64,
}

/// Schedules buffers back to back and cancels them on interruption.
///
/// Not internally synchronized: a single writer (the session dispatcher)
/// owns `enqueue`.
pub struct PlaybackScheduler<D: PlaybackDestination> {
    destination: D,
    next_start_time: f64,
    active: Vec<ScheduledSource>,
    released: bool,
}

impl<D: PlaybackDestination> PlaybackScheduler<D> {
    pub fn new(destination: D) -> Self {
        Self {
            destination,
            next_start_time: 0.0,
            active: Vec::new(),
            released: false,
        }
    }

    /// Schedule `buffer` right after everything already queued, or now if
    /// the queue has drained.
    ///
    /// # Errors
    /// `VoxdeskError::Playback` if the scheduler was released or the
    /// destination refuses the buffer.
    pub fn enqueue(&mut self, buffer: PcmBuffer) -> Result<ScheduledSource> {
        if self.released {
            return Err(VoxdeskError::Playback {
                message: "playback scheduler already released".to_string(),
            });
        }

        let now = self.destination.current_time();
        self.prune(now);

        let start = self.next_start_time.max(now);
        let duration = buffer.duration();
        let id = self.destination.schedule(buffer, start)?;
        let scheduled = ScheduledSource {
            id,
            start,
            end: start + duration,
        };

        self.next_start_time = scheduled.end;
        self.active.push(scheduled);
        Ok(scheduled)
    }

    /// Stop every in-flight buffer and reset the cursor.
    ///
    /// The next `enqueue` starts at the destination's current time.
    pub fn flush_all(&mut self) {
        let stopped = self.active.len();
        for source in self.active.drain(..) {
            self.destination.stop(source.id);
        }
        self.next_start_time = 0.0;
        if stopped > 0 {
            log::debug!("playback flushed, {} source(s) stopped", stopped);
        }
    }

    /// Flush and close the destination. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.flush_all();
        self.destination.close();
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Start time the next buffer would get if the clock had not moved.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Buffers scheduled and not yet finished.
    pub fn active_sources(&mut self) -> &[ScheduledSource] {
        let now = self.destination.current_time();
        self.prune(now);
        &self.active
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn destination_mut(&mut self) -> &mut D {
        &mut self.destination
    }

    // Sources leave the set on their own once their end time has passed.
    fn prune(&mut self, now: f64) {
        self.active.retain(|source| source.end > now);
    }
}

#[derive(Debug, Default)]
struct VirtualState {
    now: f64,
    next_id: SourceId,
    scheduled: Vec<ScheduledSource>,
    stopped: Vec<SourceId>,
    closed: bool,
}

/// Destination with a manually driven clock.
///
/// Records every schedule and stop call. Clones share state, so a test can
/// keep one clone while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct VirtualDestination {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualDestination {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move the clock forward.
    pub fn advance(&self, seconds: f64) {
        self.state().now += seconds;
    }

    pub fn set_time(&self, seconds: f64) {
        self.state().now = seconds;
    }

    /// Every buffer scheduled so far, in call order.
    pub fn scheduled(&self) -> Vec<ScheduledSource> {
        self.state().scheduled.clone()
    }

    /// Ids passed to `stop`, in call order.
    pub fn stopped(&self) -> Vec<SourceId> {
        self.state().stopped.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl PlaybackDestination for VirtualDestination {
    fn current_time(&self) -> f64 {
        self.state().now
    }

    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId> {
        let mut state = self.state();
        if state.closed {
            return Err(VoxdeskError::Playback {
                message: "destination closed".to_string(),
            });
        }
        state.next_id += 1;
        let id = state.next_id;
        state.scheduled.push(ScheduledSource {
            id,
            start: start_at,
            end: start_at + buffer.duration(),
        });
        Ok(id)
    }

    fn stop(&mut self, source: SourceId) {
        self.state().stopped.push(source);
    }

    fn close(&mut self) {
        self.state().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 24000;

    fn scheduler() -> (PlaybackScheduler<VirtualDestination>, VirtualDestination) {
        let destination = VirtualDestination::new();
        (PlaybackScheduler::new(destination.clone()), destination)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_buffers_are_back_to_back() {
        let (mut scheduler, _clock) = scheduler();

        let a = scheduler.enqueue(PcmBuffer::silence(0.5, RATE)).unwrap();
        let b = scheduler.enqueue(PcmBuffer::silence(0.3, RATE)).unwrap();
        let c = scheduler.enqueue(PcmBuffer::silence(0.2, RATE)).unwrap();

        assert!(approx(a.start, 0.0));
        assert!(approx(b.start, 0.5));
        assert!(approx(c.start, 0.8));
        assert!(approx(scheduler.next_start_time(), 1.0));
    }

    #[test]
    fn test_no_overlap_for_irregular_sequence() {
        let (mut scheduler, clock) = scheduler();
        let durations = [0.12, 0.5, 0.01, 0.33, 0.07, 1.2, 0.25];
        let mut placed = Vec::new();

        for (i, seconds) in durations.iter().enumerate() {
            // The clock wanders while chunks arrive; sometimes past the cursor.
            clock.advance(if i == 5 { 2.0 } else { 0.05 });
            placed.push(scheduler.enqueue(PcmBuffer::silence(*seconds, RATE)).unwrap());
        }

        for pair in placed.windows(2) {
            assert!(pair[1].start >= pair[0].start);
            assert!(pair[1].start >= pair[0].end - 1e-12);
        }
    }

    #[test]
    fn test_never_starts_in_the_past() {
        let (mut scheduler, clock) = scheduler();
        scheduler.enqueue(PcmBuffer::silence(0.2, RATE)).unwrap();

        clock.set_time(5.0);
        let late = scheduler.enqueue(PcmBuffer::silence(0.2, RATE)).unwrap();

        assert!(approx(late.start, 5.0));
    }

    #[test]
    fn test_flush_stops_everything_and_resets_cursor() {
        let (mut scheduler, clock) = scheduler();
        let first = scheduler.enqueue(PcmBuffer::silence(1.0, RATE)).unwrap();
        let second = scheduler.enqueue(PcmBuffer::silence(1.0, RATE)).unwrap();

        clock.advance(0.25);
        scheduler.flush_all();

        assert!(scheduler.active_sources().is_empty());
        assert_eq!(clock.stopped(), vec![first.id, second.id]);
        assert_eq!(scheduler.next_start_time(), 0.0);

        let next = scheduler.enqueue(PcmBuffer::silence(0.4, RATE)).unwrap();
        assert!(approx(next.start, 0.25));
    }

    #[test]
    fn test_finished_sources_leave_the_active_set() {
        let (mut scheduler, clock) = scheduler();
        scheduler.enqueue(PcmBuffer::silence(0.5, RATE)).unwrap();
        scheduler.enqueue(PcmBuffer::silence(0.5, RATE)).unwrap();
        assert_eq!(scheduler.active_sources().len(), 2);

        clock.set_time(0.6);
        assert_eq!(scheduler.active_sources().len(), 1);

        clock.set_time(1.0);
        assert!(scheduler.active_sources().is_empty());
    }

    #[test]
    fn test_flush_on_empty_scheduler_is_noop() {
        let (mut scheduler, clock) = scheduler();
        scheduler.flush_all();
        scheduler.flush_all();
        assert!(clock.stopped().is_empty());
    }

    #[test]
    fn test_release_is_idempotent_and_closes_once() {
        let (mut scheduler, clock) = scheduler();
        scheduler.enqueue(PcmBuffer::silence(0.5, RATE)).unwrap();

        scheduler.release();
        scheduler.release();

        assert!(clock.is_closed());
        assert!(scheduler.is_released());
        assert_eq!(clock.stopped().len(), 1);
        assert!(matches!(
            scheduler.enqueue(PcmBuffer::silence(0.1, RATE)),
            Err(VoxdeskError::Playback { .. })
        ));
    }

    #[test]
    fn test_pcm_buffer_duration_and_decode() {
        let bytes: Vec<u8> = [16384i16, -16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let buffer = PcmBuffer::from_pcm16_le(&bytes, RATE).unwrap();

        assert_eq!(buffer.samples(), &[0.5, -0.5]);
        assert!(approx(buffer.duration(), 2.0 / RATE as f64));
        assert!(PcmBuffer::from_pcm16_le(&[1], RATE).is_err());
    }

    #[test]
    fn test_boxed_destination_schedules() {
        let clock = VirtualDestination::new();
        let boxed: Box<dyn PlaybackDestination> = Box::new(clock.clone());
        let mut scheduler = PlaybackScheduler::new(boxed);

        scheduler.enqueue(PcmBuffer::silence(0.1, RATE)).unwrap();

        assert_eq!(clock.scheduled().len(), 1);
    }
}
