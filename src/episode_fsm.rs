//! The episode state machine (C3, spec.md §4.3), modeled as a pure
//! transition function over plain enums rather than magic string fields
//! (spec.md §9: "Queue state via tagged sums... do not encode these as
//! magic string fields of a single struct").

use crate::model::EpisodeStatus;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Discover,
    TranscriptFound,
    TranscriptForbiddenOrNotFound,
    TranscriptRetryAgedOut,
    UserStartDownload,
    DownloadOk,
    DownloadErr,
    TranscribeOk,
    TranscribeErr,
    UserRetranscribe,
    UserRetry,
}

/// `episode.age_days() < retry_days` decides which of the two "not found"
/// arrows out of `new`/`awaiting_transcript` applies; the caller resolves
/// that before calling `transition` and passes the already-disambiguated
/// event (`TranscriptForbiddenOrNotFound` vs `TranscriptRetryAgedOut`).
pub fn transition(current: EpisodeStatus, event: Event) -> Option<EpisodeStatus> {
    use EpisodeStatus::*;
    use Event::*;

    match (current, event) {
        (New, TranscriptFound) => Some(Completed),
        (New, TranscriptForbiddenOrNotFound) => Some(AwaitingTranscript),
        (New, TranscriptRetryAgedOut) => Some(NeedsAudio),
        (New, UserStartDownload) => Some(Downloading),

        (AwaitingTranscript, TranscriptFound) => Some(Completed),
        (AwaitingTranscript, TranscriptRetryAgedOut) => Some(NeedsAudio),
        (AwaitingTranscript, UserStartDownload) => Some(Downloading),

        (NeedsAudio, UserStartDownload) => Some(Downloading),

        (Downloading, DownloadOk) => Some(AudioReady),
        (Downloading, DownloadErr) => Some(Failed),

        (AudioReady, _) => Some(Transcribing), // auto-enqueue Transcribe

        (Transcribing, TranscribeOk) => Some(Completed),
        (Transcribing, TranscribeErr) => Some(Failed),

        (Completed, UserRetranscribe) => Some(Transcribing),

        (Failed, UserRetry) => Some(Downloading),

        _ => None,
    }
}

/// Decides whether a soft `TranscriptDownload` failure lands on
/// `awaiting_transcript` (with a scheduled retry) or `needs_audio`,
/// per spec.md §4.3 "Retry policy for external transcripts".
pub fn transcript_retry_outcome(
    published_at: DateTime<Utc>,
    transcript_retry_days: i64,
) -> (EpisodeStatus, Option<DateTime<Utc>>) {
    let age_days = (Utc::now() - published_at).num_days();
    if age_days < transcript_retry_days {
        (
            EpisodeStatus::AwaitingTranscript,
            Some(Utc::now() + chrono::Duration::hours(24)),
        )
    } else {
        (EpisodeStatus::NeedsAudio, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EpisodeStatus::*;
    use Event::*;

    #[test]
    fn test_new_arrows() {
        assert_eq!(transition(New, TranscriptFound), Some(Completed));
        assert_eq!(
            transition(New, TranscriptForbiddenOrNotFound),
            Some(AwaitingTranscript)
        );
        assert_eq!(transition(New, TranscriptRetryAgedOut), Some(NeedsAudio));
        assert_eq!(transition(New, UserStartDownload), Some(Downloading));
    }

    #[test]
    fn test_awaiting_transcript_arrows() {
        assert_eq!(
            transition(AwaitingTranscript, TranscriptFound),
            Some(Completed)
        );
        assert_eq!(
            transition(AwaitingTranscript, TranscriptRetryAgedOut),
            Some(NeedsAudio)
        );
        assert_eq!(
            transition(AwaitingTranscript, UserStartDownload),
            Some(Downloading)
        );
    }

    #[test]
    fn test_download_and_transcribe_arrows() {
        assert_eq!(transition(Downloading, DownloadOk), Some(AudioReady));
        assert_eq!(transition(Downloading, DownloadErr), Some(Failed));
        assert_eq!(transition(Transcribing, TranscribeOk), Some(Completed));
        assert_eq!(transition(Transcribing, TranscribeErr), Some(Failed));
    }

    #[test]
    fn test_terminal_user_actions() {
        assert_eq!(transition(Completed, UserRetranscribe), Some(Transcribing));
        assert_eq!(transition(Failed, UserRetry), Some(Downloading));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        assert_eq!(transition(NeedsAudio, TranscriptFound), None);
        assert_eq!(transition(Completed, DownloadOk), None);
    }

    #[test]
    fn test_retry_outcome_within_window() {
        let (status, retry_at) = transcript_retry_outcome(Utc::now(), 14);
        assert_eq!(status, AwaitingTranscript);
        assert!(retry_at.is_some());
    }

    #[test]
    fn test_retry_outcome_aged_out() {
        let published = Utc::now() - chrono::Duration::days(20);
        let (status, retry_at) = transcript_retry_outcome(published, 14);
        assert_eq!(status, NeedsAudio);
        assert!(retry_at.is_none());
    }
}
