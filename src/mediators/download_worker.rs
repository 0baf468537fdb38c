//! `Download` worker (spec.md §4.4.2): refreshes a premium feed's signed
//! audio URL, streams to a temp path, then atomically moves it into the
//! feed's `audio/` directory. The `AudioFetcher` trait keeps the streaming
//! collaborator pluggable the same way the teacher swaps `HttpRequester`
//! implementations for tests.

use crate::db;
use crate::errors::{Error, Result};
use crate::feed_parser;
use crate::mediators::common::thread_name;
use crate::mediators::StopSignal;
use crate::model::{EpisodeStatus, FailureReason, Job, JobKind};
use crate::queue::Queue;
use crate::schema::{episode, feed};
use crate::storage;

use chrono::Utc;
use diesel::prelude::*;
use slog::Logger;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CLAIM_EMPTY_SLEEP: Duration = Duration::from_secs(5);

/// The one external collaborator this stage needs: something that can
/// stream an episode's audio bytes to a local file, never buffering the
/// whole payload in memory (spec.md §4.5 "must stream (never buffer-whole)"
/// states the same requirement for the node coordinator's transfer path;
/// this worker holds itself to the same bar for consistency).
pub trait AudioFetcher: Send {
    /// Streams `url` into `dest`, returning the number of bytes written.
    fn fetch_to_file(&mut self, log: &Logger, url: &str, dest: &Path) -> Result<u64>;
}

pub struct LiveAudioFetcher {
    pub client: reqwest::blocking::Client,
}

impl LiveAudioFetcher {
    /// Builds the underlying client with the configured request timeout
    /// (spec.md §5 "HTTP client operations use a bounded request timeout,
    /// default 30 s") rather than leaving callers to remember to set it.
    pub fn new(timeout: Duration) -> LiveAudioFetcher {
        LiveAudioFetcher {
            client: reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

impl AudioFetcher for LiveAudioFetcher {
    fn fetch_to_file(&mut self, log: &Logger, url: &str, dest: &Path) -> Result<u64> {
        info!(log, "Streaming audio"; "url" => url);
        let res = self.client.get(url).send().map_err(Error::Http)?;
        let mut res = res.error_for_status().map_err(Error::Http)?;
        let mut file = std::fs::File::create(dest)?;
        let mut total = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            use std::io::Read;
            let n = res.read(&mut buf).map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }
}

pub struct Mediator<F: Fn() -> Box<dyn AudioFetcher>> {
    pub pool: db::Pool,
    pub queue: Arc<Queue>,
    pub fetcher_factory: F,
    pub num_workers: u32,
    pub storage_path: String,
    pub temp_download_path: String,
    pub stop: StopSignal,
}

impl<F: Fn() -> Box<dyn AudioFetcher> + Send + Sync + Clone + 'static> Mediator<F> {
    pub fn run(&self, log: &Logger) {
        let mut workers = vec![];
        for i in 0..self.num_workers {
            let log = log.new(o!("thread" => thread_name(i)));
            let pool = self.pool.clone();
            let queue = Arc::clone(&self.queue);
            let factory = self.fetcher_factory.clone();
            let storage_path = self.storage_path.clone();
            let temp_path = self.temp_download_path.clone();
            let stop = self.stop.clone();

            workers.push(
                thread::Builder::new()
                    .name(thread_name(i))
                    .spawn(move || {
                        let mut fetcher = factory();
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
                                queue.claim_local(&mut conn, JobKind::Download)
                            };

                            match claimed {
                                Ok(Some(job)) => {
                                    if let Err(e) =
                                        handle(&log, &pool, &queue, &mut *fetcher, &storage_path, &temp_path, &job)
                                    {
                                        error!(log, "Download job failed unexpectedly"; "job_id" => job.id, "error" => e.to_string());
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
                    .expect("failed to spawn download worker thread"),
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
    fetcher: &mut dyn AudioFetcher,
    storage_path: &str,
    temp_download_path: &str,
    job: &Job,
) -> Result<()> {
    let mut conn = pool.get().map_err(Error::Pool)?;

    let (ep, fd): (crate::model::Episode, crate::model::Feed) = episode::table
        .inner_join(feed::table)
        .filter(episode::id.eq(job.episode_id))
        .select((episode::all_columns, feed::all_columns))
        .first(&mut conn)?;

    let refreshed_url = feed_parser::refresh_episode_audio_url(log, &fd.url, &ep.guid).unwrap_or_else(|| ep.audio_url.clone());

    std::fs::create_dir_all(temp_download_path)?;
    let ext = guess_extension(&refreshed_url);
    let temp_path = Path::new(temp_download_path).join(format!("job-{}.{}", job.id, ext));

    match fetcher.fetch_to_file(log, &refreshed_url, &temp_path) {
        Ok(0) => {
            let _ = std::fs::remove_file(&temp_path);
            queue.fail(&mut conn, job.id, FailureReason::DownloadFailed, "downloaded file was empty")?;
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            queue.fail(&mut conn, job.id, FailureReason::DownloadFailed, &e.to_string())?;
            return Ok(());
        }
    }

    let final_path = storage::audio_path(storage_path, &fd.slug, ep.published_at, &ep.title, &ext);
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&temp_path, &final_path)?;

    diesel::update(episode::table.filter(episode::id.eq(ep.id)))
        .set((
            episode::status.eq(EpisodeStatus::AudioReady),
            episode::audio_path.eq(final_path.to_string_lossy().into_owned()),
            episode::audio_url.eq(refreshed_url),
            episode::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    queue.complete(&mut conn, job.id)?;
    queue.enqueue(&mut conn, ep.id, JobKind::Transcribe, 3)?;
    info!(log, "Audio downloaded"; "episode_id" => ep.id, "job_id" => job.id);
    Ok(())
}

fn guess_extension(url: &str) -> String {
    url.rsplit('/')
        .next()
        .and_then(|name| name.rsplit('.').next())
        .filter(|ext| ext.len() <= 4 && !ext.contains('?'))
        .unwrap_or("mp3")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_extension() {
        assert_eq!(guess_extension("https://cdn.example.com/ep1.mp3"), "mp3");
        assert_eq!(guess_extension("https://cdn.example.com/ep1.m4a?sig=abc"), "mp3");
        assert_eq!(guess_extension("https://cdn.example.com/noext"), "mp3");
    }
}
