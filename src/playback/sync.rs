//! Start-time handshake with a remote audio player.
//!
//! The caller gets back an absolute start instant a fixed delay in the future,
//! schedules its own audio for that instant, and the lights are released to
//! the scheduler when it arrives. Clocks on both sides are assumed to agree.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep_until, Instant};

use super::output::ChannelOutput;
use super::scheduler::{PlaybackError, Scheduler};
use crate::sequence::FrameSequence;

/// What the caller needs to line its audio up with the lights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTicket {
    /// Unix time in milliseconds at which frame 0 is written.
    pub start_time: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayMode {
    /// Stop whatever is playing first.
    #[default]
    Replace,
    /// Line up behind the current show.
    Queue,
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A start promised to a caller that the scheduler may not know about yet.
struct Window {
    starts: Instant,
    ends: Instant,
}

#[derive(Default)]
struct Pending {
    // Bumped by every stop and replace; a start only fires if the value it
    // captured is still current.
    epoch: u64,
    windows: Vec<Window>,
}

pub struct SyncStart<O> {
    scheduler: Scheduler<O>,
    delay: Duration,
    pending: Arc<Mutex<Pending>>,
}

impl<O> Clone for SyncStart<O> {
    fn clone(&self) -> Self {
        Self {
            scheduler: self.scheduler.clone(),
            delay: self.delay,
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<O: ChannelOutput> SyncStart<O> {
    pub fn new(scheduler: Scheduler<O>, delay: Duration) -> Self {
        Self {
            scheduler,
            delay,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    pub fn scheduler(&self) -> &Scheduler<O> {
        &self.scheduler
    }

    fn current_epoch(&self) -> u64 {
        self.pending.lock().epoch
    }

    /// Invalidate every start not yet handed to the scheduler.
    fn cancel_pending(&self) -> u64 {
        let mut pending = self.pending.lock();
        pending.epoch += 1;
        pending.windows.clear();
        pending.epoch
    }

    /// Work out when a sequence handed over at `deadline` will start and
    /// record the promise. `None` if a stop or replace came in after `epoch`.
    fn reserve(
        &self,
        epoch: u64,
        now: Instant,
        deadline: Instant,
        play_time: Duration,
    ) -> Option<Instant> {
        let mut pending = self.pending.lock();
        if pending.epoch != epoch {
            return None;
        }
        // Promises that have not started by the deadline are still waiting in
        // the queue slot then, and this sequence displaces them
        pending
            .windows
            .retain(|w| w.starts <= deadline && w.ends > now);
        let starts = pending
            .windows
            .iter()
            .map(|w| w.ends)
            .fold(self.scheduler.projected_start(deadline), Instant::max);
        pending.windows.push(Window {
            starts,
            ends: starts + play_time,
        });
        Some(starts)
    }

    /// Hand `sequence` to the scheduler `delay` from now and return, right
    /// away, the instant its first frame will be written.
    ///
    /// In queue mode that instant accounts for the running show and for
    /// starts already promised; a later replace, stop or queue request can
    /// still cancel or displace this one.
    pub async fn submit_play(
        &self,
        sequence: FrameSequence,
        mode: PlayMode,
    ) -> Result<StartTicket, PlaybackError> {
        self.scheduler.check_channels(&sequence)?;
        let epoch = match mode {
            PlayMode::Replace => {
                let epoch = self.cancel_pending();
                self.scheduler.stop().await;
                epoch
            }
            PlayMode::Queue => self.current_epoch(),
        };

        let now = Instant::now();
        let deadline = now + self.delay;
        let Some(starts) = self.reserve(epoch, now, deadline, sequence.play_time()) else {
            log::warn!("Play request superseded before it was scheduled");
            return Err(PlaybackError::Superseded);
        };
        let ticket = StartTicket {
            start_time: unix_millis() + (starts - now).as_millis() as u64,
        };

        let scheduler = self.scheduler.clone();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            sleep_until(deadline).await;
            if pending.lock().epoch != epoch {
                log::warn!("Start at {} cancelled before it began", ticket.start_time);
                return;
            }
            match scheduler.play(sequence) {
                Ok(outcome) => log::info!("Start at {}: {:?}", ticket.start_time, outcome),
                Err(err) => log::error!("Start at {} rejected: {}", ticket.start_time, err),
            }
        });

        log::info!(
            "Lights start at {} ({:?} from now)",
            ticket.start_time,
            starts - now
        );
        Ok(ticket)
    }

    /// Cancel pending starts and stop playback.
    pub async fn submit_stop(&self) {
        self.cancel_pending();
        self.scheduler.stop().await;
    }
}
