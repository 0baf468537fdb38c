//! `Transcribe` worker (spec.md §4.4.3). Invokes the configured ASR backend,
//! chunking long audio, and reports throttled progress through `Queue`.
//! Progress reporting and the single-threaded "one local transcribe slot"
//! policy (spec.md §4.4) are handled by the caller supplying `num_workers: 1`
//! for the local pool; a GPU node's own process runs this same handler with
//! its node-coordinator-assigned jobs instead (spec.md §4.5).

use crate::db;
use crate::errors::{Error, Result};
use crate::mediators::common::thread_name;
use crate::mediators::StopSignal;
use crate::model::{EpisodeStatus, FailureReason, Job, JobKind};
use crate::queue::Queue;
use crate::schema::{episode, feed};
use crate::storage;
use crate::transcript_formats::{self, Segment, Transcript};

use std::process::Command;

use chrono::Utc;
use diesel::prelude::*;
use slog::Logger;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CLAIM_EMPTY_SLEEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrSource {
    Whisper,
    Parakeet,
}

impl AsrSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AsrSource::Whisper => "whisper",
            AsrSource::Parakeet => "parakeet",
        }
    }
}

pub struct AsrOutput {
    pub source: AsrSource,
    pub model: String,
    pub segments: Vec<Segment>,
}

/// The external ASR collaborator, narrowed exactly the way the teacher
/// narrows `HttpRequester` to one `execute` method so a test double can
/// stand in without pulling in a real model.
pub trait AsrBackend: Send {
    /// Transcribes `audio_path`. `chunk_minutes` is `Some` when the audio
    /// exceeds `WHISPER_CHUNK_THRESHOLD_MINUTES` and the backend should
    /// process in fixed-size chunks of that length (spec.md §4.4.3).
    /// `on_progress` is called with 0-100 throughout.
    fn transcribe(
        &mut self,
        log: &Logger,
        audio_path: &Path,
        chunk_minutes: Option<i64>,
        on_progress: &mut dyn FnMut(i32),
    ) -> Result<AsrOutput>;
}

/// Shells out to an external ASR CLI that accepts an audio path (and an
/// optional `--chunk-minutes`) and writes segment JSON to stdout. The engine
/// itself stays out of scope; this is just the process boundary around it.
pub struct LiveAsrBackend {
    pub command: String,
    pub source: AsrSource,
    pub model: String,
}

impl AsrBackend for LiveAsrBackend {
    fn transcribe(
        &mut self,
        log: &Logger,
        audio_path: &Path,
        chunk_minutes: Option<i64>,
        on_progress: &mut dyn FnMut(i32),
    ) -> Result<AsrOutput> {
        info!(log, "Invoking ASR backend"; "command" => &self.command, "audio_path" => audio_path.display().to_string());

        let mut cmd = Command::new(&self.command);
        cmd.arg(audio_path);
        if let Some(chunk) = chunk_minutes {
            cmd.arg("--chunk-minutes").arg(chunk.to_string());
        }

        let output = cmd.output().map_err(Error::Io)?;
        if !output.status.success() {
            return Err(Error::Message(format!(
                "ASR backend exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        on_progress(100);

        let segments: Vec<Segment> = serde_json::from_slice(&output.stdout).map_err(Error::Json)?;
        Ok(AsrOutput {
            source: self.source,
            model: self.model.clone(),
            segments,
        })
    }
}

pub struct Mediator<F: Fn() -> Box<dyn AsrBackend>> {
    pub pool: db::Pool,
    pub queue: Arc<Queue>,
    pub backend_factory: F,
    pub num_workers: u32,
    pub storage_path: String,
    pub whisper_chunk_threshold_minutes: i64,
    pub stop: StopSignal,
}

impl<F: Fn() -> Box<dyn AsrBackend> + Send + Sync + Clone + 'static> Mediator<F> {
    pub fn run(&self, log: &Logger) {
        let mut workers = vec![];
        for i in 0..self.num_workers {
            let log = log.new(o!("thread" => thread_name(i)));
            let pool = self.pool.clone();
            let queue = Arc::clone(&self.queue);
            let factory = self.backend_factory.clone();
            let storage_path = self.storage_path.clone();
            let threshold = self.whisper_chunk_threshold_minutes;
            let stop = self.stop.clone();

            workers.push(
                thread::Builder::new()
                    .name(thread_name(i))
                    .spawn(move || {
                        let mut backend = factory();
                        while !stop.is_stopped() {
                            let claimed = {
                                let mut conn = match pool.get() {
                                    Ok(c) => c,
                                    Err(e) => {
                                        error!(log, "Failed to get connection"; "error" => e.to_string());
                                        stop.sleep(CLAIM_EMPTY_SLEEP);
                                        continue;
                                    }
                                };
                                queue.claim_local(&mut conn, JobKind::Transcribe)
                            };

                            match claimed {
                                Ok(Some(job)) => {
                                    if let Err(e) = handle(&log, &pool, &queue, &mut *backend, &storage_path, threshold, &job) {
                                        error!(log, "Transcribe job failed unexpectedly"; "job_id" => job.id, "error" => e.to_string());
                                    }
                                }
                                Ok(None) => stop.sleep(CLAIM_EMPTY_SLEEP),
                                Err(e) => {
                                    error!(log, "Claim failed"; "error" => e.to_string());
                                    stop.sleep(CLAIM_EMPTY_SLEEP);
                                }
                            }
                        }
                    })
                    .expect("failed to spawn transcribe worker thread"),
            );
        }
        for w in workers {
            let _ = w.join();
        }
    }
}

fn handle(
    log: &Logger,
    pool: &db::Pool,
    queue: &Queue,
    backend: &mut dyn AsrBackend,
    storage_path: &str,
    whisper_chunk_threshold_minutes: i64,
    job: &Job,
) -> Result<()> {
    let mut conn = pool.get().map_err(Error::Pool)?;

    let (ep, fd): (crate::model::Episode, crate::model::Feed) = episode::table
        .inner_join(feed::table)
        .filter(episode::id.eq(job.episode_id))
        .select((episode::all_columns, feed::all_columns))
        .first(&mut conn)?;

    let audio_path = match &ep.audio_path {
        Some(p) => Path::new(p).to_owned(),
        None => {
            queue.fail(&mut conn, job.id, FailureReason::TranscribeFailed, "episode has no audio_path")?;
            return Ok(());
        }
    };

    let chunk_minutes = ep
        .duration_seconds
        .filter(|secs| *secs as i64 / 60 > whisper_chunk_threshold_minutes)
        .map(|_| 30);

    let queue_ref = queue;
    let job_id = job.id;
    let pool_ref = pool;
    let mut report = move |percent: i32| {
        if let Ok(mut c) = pool_ref.get() {
            let _ = queue_ref.update_progress(&mut c, job_id, percent);
        }
    };

    let output = match backend.transcribe(log, &audio_path, chunk_minutes, &mut report) {
        Ok(out) => out,
        Err(e) => {
            queue.fail(&mut conn, job.id, FailureReason::TranscribeFailed, &e.to_string())?;
            return Ok(());
        }
    };

    let transcript = Transcript {
        title: ep.title.clone(),
        source: output.source.as_str().to_owned(),
        model: Some(output.model.clone()),
        segments: output.segments,
    };
    let rendered = transcript_formats::to_markdown(&transcript);

    let path = storage::transcript_path(storage_path, &fd.slug, ep.published_at, &ep.title);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, rendered)?;

    diesel::update(episode::table.filter(episode::id.eq(ep.id)))
        .set((
            episode::status.eq(EpisodeStatus::Completed),
            episode::transcript_path.eq(path.to_string_lossy().into_owned()),
            episode::transcript_source.eq(output.source.as_str()),
            episode::transcript_model.eq(output.model),
            episode::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    queue.update_progress(&mut conn, job.id, 100)?;
    queue.complete(&mut conn, job.id)?;
    queue.enqueue(&mut conn, ep.id, JobKind::Embed, 5)?;
    info!(log, "Transcription complete"; "episode_id" => ep.id, "job_id" => job.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asr_source_as_str() {
        assert_eq!(AsrSource::Whisper.as_str(), "whisper");
        assert_eq!(AsrSource::Parakeet.as_str(), "parakeet");
    }
}
