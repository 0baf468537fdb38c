//! Retry scheduler (C8, spec.md §4.8): a single periodic task, modeled on
//! the teacher's long-lived background threads (`mediators::job_worker`,
//! `mediators::podcast_crawler`), cancellable via a shared stop signal
//! (spec.md §9 "Background loops").

use crate::db;
use crate::episode_fsm;
use crate::errors::Result;
use crate::mediators::StopSignal;
use crate::model::{Episode, EpisodeStatus, JobKind};
use crate::queue::Queue;
use crate::schema::episode;

use chrono::Utc;
use diesel::prelude::*;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub struct RetryScheduler {
    pool: db::Pool,
    queue: Arc<Queue>,
    log: Logger,
    transcript_retry_days: i64,
    stop: StopSignal,
}

impl RetryScheduler {
    pub fn new(
        pool: db::Pool,
        queue: Arc<Queue>,
        log: Logger,
        transcript_retry_days: i64,
        stop: StopSignal,
    ) -> RetryScheduler {
        RetryScheduler {
            pool,
            queue,
            log,
            transcript_retry_days,
            stop,
        }
    }

    pub fn run(&self) {
        info!(self.log, "Retry scheduler starting");
        while !self.stop.is_stopped() {
            if let Err(e) = self.sweep_once() {
                error!(self.log, "Retry sweep failed"; "error" => e.to_string());
            }
            self.stop.sleep(SWEEP_INTERVAL);
        }
        info!(self.log, "Retry scheduler stopped");
    }

    /// For each episode in `awaiting_transcript` whose `next_transcript_retry_at
    /// <= now`: re-enqueue `TranscriptDownload` if still within the retry
    /// window, else transition to `needs_audio` (spec.md §4.8).
    fn sweep_once(&self) -> Result<usize> {
        let mut conn = self.pool.get().map_err(crate::errors::Error::Pool)?;

        let due: Vec<Episode> = episode::table
            .filter(episode::status.eq(EpisodeStatus::AwaitingTranscript))
            .filter(episode::next_transcript_retry_at.le(Utc::now()))
            .load(&mut conn)?;

        let count = due.len();
        for ep in due {
            let (status, retry_at) =
                episode_fsm::transcript_retry_outcome(ep.published_at, self.transcript_retry_days);

            diesel::update(episode::table.filter(episode::id.eq(ep.id)))
                .set((
                    episode::status.eq(status),
                    episode::next_transcript_retry_at.eq(retry_at),
                    episode::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;

            if status == EpisodeStatus::AwaitingTranscript {
                self.queue.enqueue(&mut conn, ep.id, JobKind::TranscriptDownload, 1)?;
            }
        }
        Ok(count)
    }
}
