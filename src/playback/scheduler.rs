//! Real-time frame loop with a single active session and a one-slot queue.
//!
//! A play request while idle spawns a worker task that owns the outputs for
//! as long as it runs. A play request while a session is active parks the
//! sequence in the queue slot (replacing anything already parked); the worker
//! picks it up as soon as the current sequence plays out. Stop flips the
//! session's liveness flag, drops the queue, and waits for the worker to see
//! the flag at its next frame boundary.

use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use super::output::{ChannelOutput, OutputBank};
use crate::rotate::Rotator;
use crate::sequence::FrameSequence;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("channel write failed at frame {frame} (channel {channel:?})")]
    ChannelWrite {
        frame: usize,
        channel: Option<usize>,
        #[source]
        source: io::Error,
    },
    #[error("sequence has {got} channels, outputs have {expected}")]
    ChannelCountMismatch { expected: usize, got: usize },
    #[error("superseded by a newer play request")]
    Superseded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Nothing was playing; the sequence started right away.
    Started,
    /// Parked behind the running sequence.
    Queued,
    /// Parked behind the running sequence, evicting the one that was waiting.
    Displaced,
}

struct Session {
    live: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    current: Option<Session>,
    // When the current sequence writes its last frame and finishes pacing it
    ends_at: Option<Instant>,
    queued: Option<FrameSequence>,
    failure: Option<PlaybackError>,
}

/// Time left to sleep after a frame that took `elapsed` to write. Overruns
/// clamp to zero so a slow frame only delays itself.
fn pace(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

struct Actuator<O> {
    bank: OutputBank<O>,
    rotator: Rotator,
}

impl<O: ChannelOutput> Actuator<O> {
    async fn play(
        &mut self,
        sequence: &FrameSequence,
        live: &AtomicBool,
    ) -> Result<(), PlaybackError> {
        let interval = sequence.frame_interval();
        log::info!(
            "Playing {} frames at {} fps ({:.1}s)",
            sequence.len(),
            sequence.fps(),
            sequence.duration().as_secs_f32()
        );

        for (index, frame) in sequence.frames().iter().enumerate() {
            if !live.load(Ordering::Acquire) {
                log::info!("Stopped before frame {} of {}", index, sequence.len());
                return Ok(());
            }

            let frame_start = Instant::now();
            let writes = self
                .bank
                .apply(frame, &self.rotator)
                .map_err(|failure| PlaybackError::ChannelWrite {
                    frame: index,
                    channel: failure.channel,
                    source: failure.source,
                })?;
            self.rotator.frame_done();
            log::debug!("Frame {}: {} writes, rotation {}", index, writes, self.rotator.offset());

            // Processing time comes out of the sleep so lag does not accumulate
            sleep(pace(interval, frame_start.elapsed())).await;
        }
        Ok(())
    }
}

struct Shared<O> {
    channels: usize,
    slots: Mutex<Slots>,
    actuator: AsyncMutex<Actuator<O>>,
    state: watch::Sender<PlaybackState>,
}

/// Handle to the playback engine. Clones share the same outputs and queue.
pub struct Scheduler<O> {
    shared: Arc<Shared<O>>,
}

impl<O> Clone for Scheduler<O> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<O: ChannelOutput> Scheduler<O> {
    pub fn new(output: O, channels: usize, rotate_frames: usize) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            shared: Arc::new(Shared {
                channels,
                slots: Mutex::new(Slots::default()),
                actuator: AsyncMutex::new(Actuator {
                    bank: OutputBank::new(output, channels),
                    rotator: Rotator::new(channels, rotate_frames),
                }),
                state,
            }),
        }
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn state(&self) -> PlaybackState {
        *self.shared.state.borrow()
    }

    pub fn has_queued(&self) -> bool {
        self.shared.slots.lock().queued.is_some()
    }

    pub fn check_channels(&self, sequence: &FrameSequence) -> Result<(), PlaybackError> {
        if sequence.channels() != self.shared.channels {
            return Err(PlaybackError::ChannelCountMismatch {
                expected: self.shared.channels,
                got: sequence.channels(),
            });
        }
        Ok(())
    }

    /// When a sequence handed to [`play`](Self::play) at `at` would write its
    /// first frame, if nothing else is handed over in the meantime.
    pub fn projected_start(&self, at: Instant) -> Instant {
        let slots = self.shared.slots.lock();
        let Some(mut free) = slots.ends_at else {
            return at;
        };
        // A waiting sequence is only displaced if it has not started by `at`
        if free <= at {
            if let Some(next) = &slots.queued {
                free += next.play_time();
            }
        }
        free.max(at)
    }

    /// Start `sequence`, or queue it if something is already playing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn play(&self, sequence: FrameSequence) -> Result<PlayOutcome, PlaybackError> {
        self.check_channels(&sequence)?;

        let mut slots = self.shared.slots.lock();
        if slots.current.is_some() {
            if slots.queued.replace(sequence).is_some() {
                log::warn!("Queued sequence replaced by a newer one; it will not play");
                return Ok(PlayOutcome::Displaced);
            }
            log::info!("Sequence queued behind the current show");
            return Ok(PlayOutcome::Queued);
        }

        // The worker cannot look at the slots before this guard drops, so it
        // always finds itself registered as current.
        let live = Arc::new(AtomicBool::new(true));
        slots.ends_at = Some(Instant::now() + sequence.play_time());
        let handle = tokio::spawn(run_sessions(
            Arc::clone(&self.shared),
            Arc::clone(&live),
            sequence,
        ));
        slots.current = Some(Session { live, handle });
        slots.failure = None;
        self.shared.state.send_replace(PlaybackState::Playing);
        Ok(PlayOutcome::Started)
    }

    /// Stop the running session and drop the queued one. Resolves once the
    /// frame loop has exited; channels keep whatever state they were last set to.
    pub async fn stop(&self) {
        let session = {
            let mut slots = self.shared.slots.lock();
            slots.queued = None;
            let session = slots.current.take();
            slots.ends_at = None;
            if session.is_some() {
                self.shared.state.send_replace(PlaybackState::Idle);
            }
            session
        };
        let Some(session) = session else {
            return;
        };

        session.live.store(false, Ordering::Release);
        if let Err(err) = session.handle.await {
            log::error!("Playback task ended abnormally: {}", err);
        }
        log::info!("Playback stopped");
    }

    /// Wait until nothing is playing or queued. Reports the error that ended
    /// the last session, if it was aborted by a failed write.
    pub async fn finished(&self) -> Result<(), PlaybackError> {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == PlaybackState::Idle).await;
        match self.shared.slots.lock().failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Look at the outputs and rotation once the worker has released them.
    pub async fn inspect<R>(
        &self,
        f: impl FnOnce(&OutputBank<O>, &Rotator) -> R,
    ) -> R {
        let actuator = self.shared.actuator.lock().await;
        f(&actuator.bank, &actuator.rotator)
    }
}

async fn run_sessions<O: ChannelOutput>(
    shared: Arc<Shared<O>>,
    live: Arc<AtomicBool>,
    first: FrameSequence,
) {
    let mut actuator = shared.actuator.lock().await;
    let mut next = Some(first);

    while let Some(sequence) = next.take() {
        let result = actuator.play(&sequence, &live).await;

        let mut slots = shared.slots.lock();
        let still_current = slots
            .current
            .as_ref()
            .is_some_and(|session| Arc::ptr_eq(&session.live, &live));
        if !still_current {
            // stop() took over and already cleaned up
            if let Err(err) = result {
                log::error!("Playback failed while stopping: {}", err);
            }
            return;
        }

        match result {
            Ok(()) => {
                next = slots.queued.take();
                if let Some(sequence) = &next {
                    slots.ends_at = Some(Instant::now() + sequence.play_time());
                    log::info!("Starting queued sequence");
                } else {
                    slots.current = None;
                    slots.ends_at = None;
                    shared.state.send_replace(PlaybackState::Idle);
                    log::info!("Playback finished");
                }
            }
            Err(err) => {
                log::error!("Playback aborted: {}", err);
                slots.current = None;
                slots.ends_at = None;
                slots.queued = None;
                slots.failure = Some(err);
                shared.state.send_replace(PlaybackState::Idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Frame;

    type Writes = Arc<parking_lot::Mutex<Vec<(Instant, usize, bool)>>>;

    #[derive(Clone, Default)]
    struct Recorder {
        writes: Writes,
        fail_after: Option<usize>,
    }

    impl ChannelOutput for Recorder {
        fn write(&mut self, channel: usize, on: bool) -> io::Result<()> {
            let mut writes = self.writes.lock();
            if self.fail_after.is_some_and(|n| writes.len() >= n) {
                return Err(io::Error::new(io::ErrorKind::Other, "relay stuck"));
            }
            writes.push((Instant::now(), channel, on));
            Ok(())
        }
    }

    fn show(channels: usize, frames: &[&[usize]]) -> FrameSequence {
        let mut seq = FrameSequence::new(10, channels).unwrap();
        for lit in frames {
            seq.push(Frame::with_lit(channels, lit)).unwrap();
        }
        seq
    }

    fn repeated(lit: usize, count: usize) -> FrameSequence {
        show(8, &vec![&[lit][..]; count])
    }

    fn assert_near(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        let diff = if actual > expected { actual - expected } else { expected - actual };
        assert!(diff <= Duration::from_millis(5), "{:?} vs {:?}", actual, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn plays_reference_show_on_schedule() {
        let recorder = Recorder::default();
        let scheduler = Scheduler::new(recorder.clone(), 8, 5);
        let seq = FrameSequence::decode(&[0x0A, 0b0000_0011, 0b0000_0000, 0b0000_0101], 8).unwrap();

        let t0 = Instant::now();
        assert_eq!(scheduler.play(seq).unwrap(), PlayOutcome::Started);
        assert_eq!(scheduler.state(), PlaybackState::Playing);
        scheduler.finished().await.unwrap();
        assert_eq!(scheduler.state(), PlaybackState::Idle);

        let writes = recorder.writes.lock().clone();
        // Frame 0 initialises every channel, later frames only touch changes
        assert_eq!(writes.len(), 8 + 2 + 2);
        assert!(writes[..8].iter().all(|w| w.0 == t0));
        let lit: Vec<usize> = writes[..8].iter().filter(|w| w.2).map(|w| w.1).collect();
        assert_eq!(lit, vec![0, 1]);

        assert_eq!((writes[8].1, writes[8].2), (0, false));
        assert_eq!((writes[9].1, writes[9].2), (1, false));
        assert_near(writes[8].0 - t0, 100);
        assert_eq!((writes[10].1, writes[10].2), (0, true));
        assert_eq!((writes[11].1, writes[11].2), (2, true));
        assert_near(writes[10].0 - t0, 200);

        let offset = scheduler.inspect(|_, rotator| rotator.offset()).await;
        assert_eq!(offset, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_within_one_frame_and_keeps_state() {
        let recorder = Recorder::default();
        let scheduler = Scheduler::new(recorder.clone(), 8, 0);
        let seq = show(8, &[&[0], &[1], &[2], &[3], &[4], &[5], &[6], &[7], &[0], &[1]]);

        scheduler.play(seq).unwrap();
        sleep(Duration::from_millis(150)).await;
        let requested = Instant::now();
        scheduler.stop().await;
        assert!(requested.elapsed() <= Duration::from_millis(100));
        assert_eq!(scheduler.state(), PlaybackState::Idle);

        sleep(Duration::from_secs(2)).await;
        let writes = recorder.writes.lock().clone();
        assert!(writes.iter().all(|w| w.0 <= requested));
        let states = scheduler
            .inspect(|bank, _| (0..8).map(|c| bank.state(c)).collect::<Vec<_>>())
            .await;
        let mut expected = vec![Some(false); 8];
        expected[1] = Some(true);
        assert_eq!(states, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn newest_queued_play_wins_the_slot() {
        let recorder = Recorder::default();
        let scheduler = Scheduler::new(recorder.clone(), 8, 0);

        let t0 = Instant::now();
        assert_eq!(scheduler.play(repeated(0, 3)).unwrap(), PlayOutcome::Started);
        assert_eq!(scheduler.play(repeated(7, 3)).unwrap(), PlayOutcome::Queued);
        assert_eq!(scheduler.play(repeated(3, 3)).unwrap(), PlayOutcome::Displaced);
        assert!(scheduler.has_queued());
        scheduler.finished().await.unwrap();

        let writes = recorder.writes.lock().clone();
        assert!(!writes.iter().any(|&(_, channel, on)| channel == 7 && on));
        let (c_start, _, _) = *writes
            .iter()
            .find(|&&(_, channel, on)| channel == 3 && on)
            .expect("queued show never played");
        // C follows A's three frames without a gap
        assert_near(c_start - t0, 300);
        assert_near(t0.elapsed(), 600);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_discards_the_queue() {
        let recorder = Recorder::default();
        let scheduler = Scheduler::new(recorder.clone(), 8, 0);
        scheduler.play(repeated(0, 5)).unwrap();
        scheduler.play(repeated(7, 5)).unwrap();

        sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert!(!scheduler.has_queued());
        sleep(Duration::from_secs(2)).await;

        let writes = recorder.writes.lock().clone();
        assert!(!writes.iter().any(|&(_, channel, on)| channel == 7 && on));
    }

    #[tokio::test(start_paused = true)]
    async fn play_after_stop_starts_fresh() {
        let recorder = Recorder::default();
        let scheduler = Scheduler::new(recorder.clone(), 8, 0);
        scheduler.play(repeated(0, 20)).unwrap();
        sleep(Duration::from_millis(250)).await;
        scheduler.stop().await;

        assert_eq!(scheduler.play(repeated(5, 2)).unwrap(), PlayOutcome::Started);
        scheduler.finished().await.unwrap();
        let states = scheduler.inspect(|bank, _| (bank.state(0), bank.state(5))).await;
        assert_eq!(states, (Some(false), Some(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_aborts_the_session() {
        let recorder = Recorder {
            fail_after: Some(9),
            ..Recorder::default()
        };
        let scheduler = Scheduler::new(recorder.clone(), 8, 0);
        scheduler.play(show(8, &[&[0], &[1], &[2]])).unwrap();
        scheduler.play(repeated(4, 3)).unwrap();

        let err = scheduler.finished().await.unwrap_err();
        match err {
            PlaybackError::ChannelWrite { frame, channel, .. } => {
                assert_eq!(frame, 1);
                assert_eq!(channel, Some(1));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(scheduler.state(), PlaybackState::Idle);
        assert!(!scheduler.has_queued());
        assert_eq!(recorder.writes.lock().len(), 9);
        // The error is reported once
        scheduler.finished().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_follows_frame_count() {
        let recorder = Recorder::default();
        let scheduler = Scheduler::new(recorder.clone(), 4, 1);
        scheduler.play(show(4, &[&[0], &[0]])).unwrap();
        scheduler.finished().await.unwrap();

        let writes = recorder.writes.lock().clone();
        let tail: Vec<(usize, bool)> = writes[4..].iter().map(|w| (w.1, w.2)).collect();
        // Logical 0 moved to physical 1; logical 3 (off) now drives physical 0
        assert_eq!(tail, vec![(1, true), (0, false)]);
        assert_eq!(scheduler.inspect(|_, rotator| rotator.offset()).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_sequence_for_other_channel_count() {
        let scheduler = Scheduler::new(Recorder::default(), 8, 5);
        assert!(matches!(
            scheduler.play(show(16, &[&[0]])),
            Err(PlaybackError::ChannelCountMismatch { expected: 8, got: 16 })
        ));
        assert_eq!(scheduler.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_sequence_finishes_immediately() {
        let scheduler = Scheduler::new(Recorder::default(), 8, 5);
        scheduler.play(FrameSequence::new(10, 8).unwrap()).unwrap();
        scheduler.finished().await.unwrap();
        assert_eq!(scheduler.state(), PlaybackState::Idle);
    }

    #[test]
    fn slow_frames_get_no_extra_sleep() {
        let interval = Duration::from_millis(100);
        assert_eq!(pace(interval, Duration::from_millis(30)), Duration::from_millis(70));
        assert_eq!(pace(interval, interval), Duration::ZERO);
        assert_eq!(pace(interval, Duration::from_millis(250)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn projects_when_a_handed_over_sequence_starts() {
        let scheduler = Scheduler::new(Recorder::default(), 8, 0);
        let t0 = Instant::now();
        assert_eq!(scheduler.projected_start(t0), t0);

        scheduler.play(repeated(0, 10)).unwrap();
        let ms = |n| Duration::from_millis(n);
        // Behind the running show, or right away once it is over
        assert_eq!(scheduler.projected_start(t0 + ms(200)), t0 + ms(1000));
        assert_eq!(scheduler.projected_start(t0 + ms(1500)), t0 + ms(1500));

        // A waiting sequence still in the slot at `at` is displaced; one that
        // has started by then is not
        scheduler.play(repeated(1, 5)).unwrap();
        assert_eq!(scheduler.projected_start(t0 + ms(200)), t0 + ms(1000));
        assert_eq!(scheduler.projected_start(t0 + ms(1200)), t0 + ms(1500));
        assert_eq!(scheduler.projected_start(t0 + ms(1800)), t0 + ms(1800));

        scheduler.stop().await;
        let now = Instant::now();
        assert_eq!(scheduler.projected_start(now), now);
    }
}
