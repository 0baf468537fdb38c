//! `Embed` worker (spec.md §4.4.4). Merges segments into phrase boundaries,
//! generates one dense vector per phrase via the configured `Embedder`
//! collaborator, and upserts into `embedding_record` keyed by
//! `(episode_id, segment_start, segment_end)` with a `text_hash` for
//! idempotence (spec.md §8 property 6). Pinned to a single worker per
//! spec.md §9's open-question resolution ("bounded to one worker... to keep
//! store pressure predictable").

use crate::db;
use crate::errors::{Error, Result};
use crate::mediators::common::thread_name;
use crate::mediators::StopSignal;
use crate::model::{FailureReason, Job, JobKind};
use crate::queue::Queue;
use crate::schema::{embedding_record, episode};
use crate::transcript_formats::{self, Segment};

use diesel::prelude::*;
use sha2::{Digest, Sha256};
use slog::Logger;
use std::io::Write as _;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CLAIM_EMPTY_SLEEP: Duration = Duration::from_secs(5);

/// Phrase-boundary rules (spec.md §4.4.4): a pause longer than this, a
/// sentence-ending punctuation mark, or the running phrase hitting the
/// character cap all close the current phrase.
const MAX_PAUSE_SECONDS: f64 = 1.5;
const MAX_PHRASE_CHARS: usize = 200;

/// The dense-vector generator, kept behind a trait per spec.md's "treated as
/// external collaborators, interfaces only" -- the embedding model itself is
/// out of scope, only the lifecycle around it is in-scope here.
pub trait Embedder: Send {
    fn dimensions(&self) -> usize;
    fn embed(&mut self, text: &str) -> Result<Vec<f32>>;
    fn model_name(&self) -> &str;
}

/// Shells out to an external embedding CLI, feeding it phrase text on stdin
/// and reading back a JSON float array. The model itself stays out of scope;
/// this is just the process boundary around it.
pub struct LiveEmbedder {
    pub command: String,
    pub model: String,
    pub dimensions: usize,
}

impl Embedder for LiveEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(Error::Io)?;

        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(text.as_bytes())
            .map_err(Error::Io)?;

        let output = child.wait_with_output().map_err(Error::Io)?;
        if !output.status.success() {
            return Err(Error::Message(format!(
                "embedding backend exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let vector: Vec<f32> = serde_json::from_slice(&output.stdout).map_err(Error::Json)?;
        Ok(vector)
    }
}

pub struct Mediator<F: Fn() -> Box<dyn Embedder>> {
    pub pool: db::Pool,
    pub queue: Arc<Queue>,
    pub embedder_factory: F,
    pub stop: StopSignal,
}

impl<F: Fn() -> Box<dyn Embedder> + Send + Sync + Clone + 'static> Mediator<F> {
    /// Runs the single embed worker (spec.md §4.4: "one embed slot").
    pub fn run(&self, log: &Logger) {
        let log = log.new(o!("thread" => thread_name(0)));
        let pool = self.pool.clone();
        let queue = Arc::clone(&self.queue);
        let factory = self.embedder_factory.clone();
        let stop = self.stop.clone();

        let handle = thread::Builder::new()
            .name(thread_name(0))
            .spawn(move || {
                let mut embedder = factory();
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
                        queue.claim_local(&mut conn, JobKind::Embed)
                    };

                    match claimed {
                        Ok(Some(job)) => {
                            if let Err(e) = handle_job(&log, &pool, &queue, &mut *embedder, &job) {
                                error!(log, "Embed job failed unexpectedly"; "job_id" => job.id, "error" => e.to_string());
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
            .expect("failed to spawn embed worker thread");
        let _ = handle.join();
    }
}

fn handle_job(log: &Logger, pool: &db::Pool, queue: &Queue, embedder: &mut dyn Embedder, job: &Job) -> Result<()> {
    let mut conn = pool.get().map_err(Error::Pool)?;

    let ep: crate::model::Episode = episode::table.filter(episode::id.eq(job.episode_id)).first(&mut conn)?;

    let path = match &ep.transcript_path {
        Some(p) => p.clone(),
        None => {
            queue.fail(&mut conn, job.id, FailureReason::Unknown, "episode has no transcript_path")?;
            return Ok(());
        }
    };

    let content = std::fs::read_to_string(&path)?;
    let transcript = transcript_formats::from_markdown(&content);
    let phrases = merge_into_phrases(&transcript.segments, MAX_PAUSE_SECONDS, MAX_PHRASE_CHARS);

    for phrase in &phrases {
        let text_hash = hash_text(&phrase.text);
        let vector = embedder.embed(&phrase.text)?;

        let ins = crate::model::insertable::EmbeddingRecord {
            episode_id: ep.id,
            segment_start: phrase.start,
            segment_end: phrase.end,
            text_hash: text_hash.clone(),
            model_name: embedder.model_name().to_owned(),
            embedding: pgvector::Vector::from(vector),
        };

        diesel::insert_into(embedding_record::table)
            .values(&ins)
            .on_conflict((embedding_record::episode_id, embedding_record::segment_start, embedding_record::segment_end))
            .do_update()
            .set((
                embedding_record::text_hash.eq(&ins.text_hash),
                embedding_record::model_name.eq(&ins.model_name),
                embedding_record::embedding.eq(&ins.embedding),
            ))
            .execute(&mut conn)?;
    }

    queue.complete(&mut conn, job.id)?;
    info!(log, "Embedding complete"; "episode_id" => ep.id, "job_id" => job.id, "phrases" => phrases.len());
    Ok(())
}

/// Merges word/sub-phrase-level segments into phrase boundaries: a phrase
/// closes on trailing sentence punctuation, a pause exceeding
/// `max_pause_seconds` before the next segment, or hitting
/// `max_phrase_chars` (spec.md §4.4.4).
pub fn merge_into_phrases(segments: &[Segment], max_pause_seconds: f64, max_phrase_chars: usize) -> Vec<Segment> {
    let mut phrases = Vec::new();
    let mut current: Option<Segment> = None;

    for seg in segments {
        current = match current.take() {
            None => Some(seg.clone()),
            Some(mut acc) => {
                let gap = seg.start - acc.end;
                let ends_sentence = acc.text.trim_end().ends_with(['.', '?', '!']);
                let would_overflow = acc.text.len() + 1 + seg.text.len() > max_phrase_chars;

                if ends_sentence || gap > max_pause_seconds || would_overflow {
                    phrases.push(acc);
                    Some(seg.clone())
                } else {
                    acc.end = seg.end;
                    acc.text.push(' ');
                    acc.text.push_str(&seg.text);
                    Some(acc)
                }
            }
        };
    }
    if let Some(acc) = current {
        phrases.push(acc);
    }
    phrases
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_owned(),
        }
    }

    #[test]
    fn test_merge_splits_on_punctuation() {
        let segs = vec![seg(0.0, 1.0, "Hello."), seg(1.1, 2.0, "World")];
        let phrases = merge_into_phrases(&segs, 1.5, 200);
        assert_eq!(phrases.len(), 2);
        assert_eq!(phrases[0].text, "Hello.");
        assert_eq!(phrases[1].text, "World");
    }

    #[test]
    fn test_merge_splits_on_pause() {
        let segs = vec![seg(0.0, 1.0, "Hello"), seg(3.0, 4.0, "World")];
        let phrases = merge_into_phrases(&segs, 1.5, 200);
        assert_eq!(phrases.len(), 2);
    }

    #[test]
    fn test_merge_joins_short_segments() {
        let segs = vec![seg(0.0, 1.0, "Hello"), seg(1.1, 2.0, "there")];
        let phrases = merge_into_phrases(&segs, 1.5, 200);
        assert_eq!(phrases.len(), 1);
        assert_eq!(phrases[0].text, "Hello there");
        assert_eq!(phrases[0].end, 2.0);
    }

    #[test]
    fn test_merge_splits_on_char_cap() {
        let long_a = "a".repeat(150);
        let long_b = "b".repeat(150);
        let segs = vec![seg(0.0, 1.0, &long_a), seg(1.1, 2.0, &long_b)];
        let phrases = merge_into_phrases(&segs, 1.5, 200);
        assert_eq!(phrases.len(), 2);
    }

    #[test]
    fn test_hash_text_deterministic() {
        assert_eq!(hash_text("abc"), hash_text("abc"));
        assert_ne!(hash_text("abc"), hash_text("abd"));
    }
}
