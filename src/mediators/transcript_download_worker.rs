//! `TranscriptDownload` worker (spec.md §4.4.1), the first of the four C4
//! stage handlers. Shape ported from the teacher's `mediators::job_worker`
//! (`Mediator` struct, per-worker `std::thread`, a control loop claiming
//! work) with `chan` replaced by a direct claim-per-thread loop -- this
//! stage's claim is already cheap (a single indexed `UPDATE ... RETURNING`)
//! so there's no batching win to be had from a producer/consumer channel.

use crate::db;
use crate::episode_fsm::{self, Event};
use crate::errors::{Error, Result};
use crate::http_requester::HttpRequesterFactory;
use crate::mediators::common::thread_name;
use crate::mediators::transcript_providers::{self, FetchOutcome, TranscriptProvider};
use crate::mediators::{PauseGate, StopSignal};
use crate::model::{EpisodeStatus, FailureReason, Job, JobKind};
use crate::queue::Queue;
use crate::schema::{episode, feed};
use crate::storage;

use chrono::Utc;
use diesel::prelude::*;
use slog::Logger;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CLAIM_EMPTY_SLEEP: Duration = Duration::from_secs(5);

pub struct Mediator {
    pub pool: db::Pool,
    pub queue: Arc<Queue>,
    pub http_requester_factory: Box<dyn HttpRequesterFactory>,
    pub num_workers: u32,
    pub storage_path: String,
    pub transcript_retry_days: i64,
    pub pause: PauseGate,
    pub stop: StopSignal,
}

impl Mediator {
    pub fn run(&self, log: &Logger) {
        let mut workers = vec![];
        for i in 0..self.num_workers {
            let log = log.new(o!("thread" => thread_name(i)));
            let pool = self.pool.clone();
            let queue = Arc::clone(&self.queue);
            let factory = self.http_requester_factory.clone_box();
            let storage_path = self.storage_path.clone();
            let retry_days = self.transcript_retry_days;
            let pause = self.pause.clone();
            let stop = self.stop.clone();

            workers.push(
                thread::Builder::new()
                    .name(thread_name(i))
                    .spawn(move || work_loop(&log, pool, queue, &*factory, &storage_path, retry_days, &pause, &stop))
                    .expect("failed to spawn transcript_download worker thread"),
            );
        }
        for w in workers {
            let _ = w.join();
        }
    }
}

fn work_loop(
    log: &Logger,
    pool: db::Pool,
    queue: Arc<Queue>,
    factory: &dyn HttpRequesterFactory,
    storage_path: &str,
    transcript_retry_days: i64,
    pause: &PauseGate,
    stop: &StopSignal,
) {
    let mut chain = transcript_providers::build_chain(factory);

    while !stop.is_stopped() {
        if pause.is_paused() {
            stop.sleep(Duration::from_millis(200));
            continue;
        }

        let claimed = {
            let mut conn = match pool.get() {
                Ok(c) => c,
                Err(e) => {
                    error!(log, "Failed to get connection"; "error" => e.to_string());
                    stop.sleep(CLAIM_EMPTY_SLEEP);
                    continue;
                }
            };
            queue.claim_local(&mut conn, JobKind::TranscriptDownload)
        };

        match claimed {
            Ok(Some(job)) => {
                if let Err(e) = handle(log, &pool, &queue, &mut chain, storage_path, transcript_retry_days, &job) {
                    error!(log, "Transcript download job failed unexpectedly"; "job_id" => job.id, "error" => e.to_string());
                }
            }
            Ok(None) => stop.sleep(CLAIM_EMPTY_SLEEP),
            Err(e) => {
                error!(log, "Claim failed"; "error" => e.to_string());
                stop.sleep(CLAIM_EMPTY_SLEEP);
            }
        }
    }
}

/// Runs the provider chain, persists a `Found` transcript, applies the
/// retry policy on `TemporaryError` (spec.md §4.3, §4.4.1).
fn handle(
    log: &Logger,
    pool: &db::Pool,
    queue: &Queue,
    chain: &mut [Box<dyn TranscriptProvider>],
    storage_path: &str,
    transcript_retry_days: i64,
    job: &Job,
) -> Result<()> {
    let mut conn = pool.get().map_err(Error::Pool)?;

    let (ep, feed_slug): (crate::model::Episode, String) = episode::table
        .inner_join(feed::table)
        .filter(episode::id.eq(job.episode_id))
        .select((episode::all_columns, feed::slug))
        .first(&mut conn)?;

    match transcript_providers::run_chain(log, chain, &ep) {
        FetchOutcome::Found { content, source_tag } => {
            let transcript = crate::transcript_formats::Transcript {
                title: ep.title.clone(),
                source: source_tag.clone(),
                model: None,
                segments: vec![],
            };
            let rendered = if content.trim_start().starts_with("---") {
                content
            } else {
                crate::transcript_formats::to_markdown(&transcript) + &content
            };

            let path = storage::transcript_path(storage_path, &feed_slug, ep.published_at, &ep.title);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, rendered)?;

            diesel::update(episode::table.filter(episode::id.eq(ep.id)))
                .set((
                    episode::status.eq(EpisodeStatus::Completed),
                    episode::transcript_path.eq(path.to_string_lossy().into_owned()),
                    episode::transcript_source.eq(source_tag),
                    episode::transcript_checked_at.eq(Utc::now()),
                    episode::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;

            queue.complete(&mut conn, job.id)?;
            queue.enqueue(&mut conn, ep.id, JobKind::Embed, 5)?;
            info!(log, "Transcript downloaded"; "episode_id" => ep.id, "job_id" => job.id);
            Ok(())
        }
        FetchOutcome::TemporaryError(kind) => {
            let (status, retry_at) = episode_fsm::transcript_retry_outcome(ep.published_at, transcript_retry_days);

            let _ = episode_fsm::transition(
                ep.status,
                if status == EpisodeStatus::NeedsAudio {
                    Event::TranscriptRetryAgedOut
                } else {
                    Event::TranscriptForbiddenOrNotFound
                },
            );

            diesel::update(episode::table.filter(episode::id.eq(ep.id)))
                .set((
                    episode::status.eq(status),
                    episode::next_transcript_retry_at.eq(retry_at),
                    episode::transcript_checked_at.eq(Utc::now()),
                    episode::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;

            let reason = match kind {
                transcript_providers::TemporaryErrorKind::Forbidden => FailureReason::TranscriptForbidden,
                transcript_providers::TemporaryErrorKind::NotFound => FailureReason::TranscriptNotFound,
                transcript_providers::TemporaryErrorKind::RequestError => FailureReason::TranscriptRequestError,
            };
            queue.fail(&mut conn, job.id, reason, "no transcript provider could serve this episode")?;
            Ok(())
        }
        FetchOutcome::NotApplicable => {
            let (status, retry_at) = episode_fsm::transcript_retry_outcome(ep.published_at, transcript_retry_days);

            diesel::update(episode::table.filter(episode::id.eq(ep.id)))
                .set((
                    episode::status.eq(status),
                    episode::next_transcript_retry_at.eq(retry_at),
                    episode::transcript_checked_at.eq(Utc::now()),
                    episode::updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;
            queue.fail(&mut conn, job.id, FailureReason::TranscriptNotFound, "no provider applicable")?;
            Ok(())
        }
    }
}
