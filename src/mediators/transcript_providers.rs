//! The transcript-provider chain (spec.md §4.4.1, §9 "Provider polymorphism").
//! An ordered list of objects with `can_provide`/`fetch`; the first `Found`
//! wins. Mirrors the teacher's `URLFetcher`/`HttpRequesterFactory` split: a
//! narrow trait with a live implementation plus a test double, held as an
//! immutable ordered list in a single source of truth (spec.md §9).

use crate::http_requester::{HttpRequester, Verb};
use crate::model::Episode;
use slog::Logger;

/// Maps a Podcasting-2.0 transcript's declared MIME type to the source tag
/// recorded on the episode (spec.md §4.4.1).
pub fn source_tag_for_mime(mime: &str) -> &'static str {
    match mime {
        "text/vtt" => "podcast2.0:vtt",
        "application/srt" | "application/x-subrip" => "podcast2.0:srt",
        "application/json" => "podcast2.0:json",
        "text/html" => "podcast2.0:html",
        _ => "podcast2.0:text",
    }
}

pub const POCKETCASTS_SOURCE_TAG: &str = "pocketcasts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporaryErrorKind {
    /// HTTP 403/404 from a transcript provider while the episode is recent
    /// (spec.md §7 "Soft provider-not-ready").
    Forbidden,
    NotFound,
    /// Connection errors, 5xx, or anything else retryable (spec.md §7
    /// "Transient remote").
    RequestError,
}

pub enum FetchOutcome {
    Found { content: String, source_tag: String },
    TemporaryError(TemporaryErrorKind),
    NotApplicable,
}

pub trait TranscriptProvider: Send {
    fn name(&self) -> &'static str;
    fn can_provide(&self, episode: &Episode) -> bool;
    fn fetch(&mut self, log: &Logger, episode: &Episode) -> FetchOutcome;
}

/// Provider #1: fetches the Podcasting-2.0 `<podcast:transcript>` URL
/// declared directly on the episode.
pub struct Podcasting20Provider {
    pub requester: Box<dyn HttpRequester>,
}

impl TranscriptProvider for Podcasting20Provider {
    fn name(&self) -> &'static str {
        "podcast2.0"
    }

    fn can_provide(&self, episode: &Episode) -> bool {
        episode.transcript_url.is_some()
    }

    fn fetch(&mut self, log: &Logger, episode: &Episode) -> FetchOutcome {
        let url = match &episode.transcript_url {
            Some(u) => u.clone(),
            None => return FetchOutcome::NotApplicable,
        };

        match self.requester.execute(log, Verb::Get, &url) {
            Ok((200, body, _)) => {
                let mime = episode.transcript_mime.as_deref().unwrap_or("text/plain");
                FetchOutcome::Found {
                    content: String::from_utf8_lossy(&body).into_owned(),
                    source_tag: source_tag_for_mime(mime).to_owned(),
                }
            }
            Ok((403, _, _)) => FetchOutcome::TemporaryError(TemporaryErrorKind::Forbidden),
            Ok((404, _, _)) => FetchOutcome::TemporaryError(TemporaryErrorKind::NotFound),
            Ok((429, _, _)) | Ok((500..=599, _, _)) => {
                FetchOutcome::TemporaryError(TemporaryErrorKind::RequestError)
            }
            Ok(_) => FetchOutcome::TemporaryError(TemporaryErrorKind::RequestError),
            Err(e) => {
                error!(log, "Error fetching podcast2.0 transcript"; "error" => e.to_string());
                FetchOutcome::TemporaryError(TemporaryErrorKind::RequestError)
            }
        }
    }
}

/// Provider #2: falls back to the cached PocketCasts transcript URL (stored
/// on the episode by the feed discovery driver's enrichment step, spec.md
/// §4.7 step 4).
pub struct PocketCastsProvider {
    pub requester: Box<dyn HttpRequester>,
}

impl TranscriptProvider for PocketCastsProvider {
    fn name(&self) -> &'static str {
        "pocketcasts"
    }

    fn can_provide(&self, episode: &Episode) -> bool {
        episode.external_transcript_url.is_some()
    }

    fn fetch(&mut self, log: &Logger, episode: &Episode) -> FetchOutcome {
        let url = match &episode.external_transcript_url {
            Some(u) => u.clone(),
            None => return FetchOutcome::NotApplicable,
        };

        match self.requester.execute(log, Verb::Get, &url) {
            Ok((200, body, _)) => FetchOutcome::Found {
                content: String::from_utf8_lossy(&body).into_owned(),
                source_tag: POCKETCASTS_SOURCE_TAG.to_owned(),
            },
            Ok((403, _, _)) => FetchOutcome::TemporaryError(TemporaryErrorKind::Forbidden),
            Ok((404, _, _)) => FetchOutcome::TemporaryError(TemporaryErrorKind::NotFound),
            Ok(_) => FetchOutcome::TemporaryError(TemporaryErrorKind::RequestError),
            Err(e) => {
                error!(log, "Error fetching pocketcasts transcript"; "error" => e.to_string());
                FetchOutcome::TemporaryError(TemporaryErrorKind::RequestError)
            }
        }
    }
}

/// Builds the immutable, priority-ordered provider chain (spec.md §4.4.1:
/// "(1) Podcasting-2.0 URL fetcher, (2) PocketCasts look-up").
pub fn build_chain(factory: &dyn crate::http_requester::HttpRequesterFactory) -> Vec<Box<dyn TranscriptProvider>> {
    vec![
        Box::new(Podcasting20Provider {
            requester: factory.create(),
        }),
        Box::new(PocketCastsProvider {
            requester: factory.create(),
        }),
    ]
}

/// Runs the chain in order; the first `Found` wins (spec.md §4.4.1, §9).
pub fn run_chain(log: &Logger, chain: &mut [Box<dyn TranscriptProvider>], episode: &Episode) -> FetchOutcome {
    for provider in chain.iter_mut() {
        if !provider.can_provide(episode) {
            continue;
        }
        match provider.fetch(log, episode) {
            FetchOutcome::NotApplicable => continue,
            outcome => return outcome,
        }
    }
    FetchOutcome::NotApplicable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tag_for_mime() {
        assert_eq!(source_tag_for_mime("text/vtt"), "podcast2.0:vtt");
        assert_eq!(source_tag_for_mime("application/x-subrip"), "podcast2.0:srt");
        assert_eq!(source_tag_for_mime("application/json"), "podcast2.0:json");
        assert_eq!(source_tag_for_mime("text/html"), "podcast2.0:html");
        assert_eq!(source_tag_for_mime("weird/thing"), "podcast2.0:text");
    }
}
