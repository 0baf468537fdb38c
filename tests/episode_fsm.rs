//! Scenario-level tests for the episode state machine (C3, spec.md §4.3),
//! covering full flows end to end rather than single transitions (the
//! per-transition table is covered by `episode_fsm`'s own unit tests).

use chrono::Utc;
use transcribercore::episode_fsm::{transcript_retry_outcome, transition, Event};
use transcribercore::model::EpisodeStatus;

#[test]
fn test_transcript_first_happy_path() {
    let mut state = EpisodeStatus::New;
    state = transition(state, Event::TranscriptFound).expect("new -> completed");
    assert_eq!(state, EpisodeStatus::Completed);
}

#[test]
fn test_transcript_unavailable_then_falls_back_to_download() {
    let mut state = EpisodeStatus::New;
    state = transition(state, Event::TranscriptForbiddenOrNotFound).unwrap();
    assert_eq!(state, EpisodeStatus::AwaitingTranscript);

    // Retried once more while still within the retry window, no change.
    state = transition(state, Event::UserStartDownload).unwrap();
    assert_eq!(state, EpisodeStatus::Downloading);

    state = transition(state, Event::DownloadOk).unwrap();
    assert_eq!(state, EpisodeStatus::AudioReady);

    state = transition(state, Event::DownloadOk).unwrap();
    assert_eq!(state, EpisodeStatus::Transcribing);

    state = transition(state, Event::TranscribeOk).unwrap();
    assert_eq!(state, EpisodeStatus::Completed);
}

#[test]
fn test_retry_aged_out_skips_straight_to_needs_audio() {
    let state = transition(EpisodeStatus::AwaitingTranscript, Event::TranscriptRetryAgedOut).unwrap();
    assert_eq!(state, EpisodeStatus::NeedsAudio);

    let state = transition(state, Event::UserStartDownload).unwrap();
    assert_eq!(state, EpisodeStatus::Downloading);
}

#[test]
fn test_failed_download_can_be_retried_by_user() {
    let state = transition(EpisodeStatus::Downloading, Event::DownloadErr).unwrap();
    assert_eq!(state, EpisodeStatus::Failed);

    let state = transition(state, Event::UserRetry).unwrap();
    assert_eq!(state, EpisodeStatus::Downloading);
}

#[test]
fn test_completed_episode_can_be_retranscribed() {
    let state = transition(EpisodeStatus::Completed, Event::UserRetranscribe).unwrap();
    assert_eq!(state, EpisodeStatus::Transcribing);
}

#[test]
fn test_illegal_transitions_are_rejected() {
    // A freshly discovered episode can't jump straight to transcribing.
    assert_eq!(transition(EpisodeStatus::New, Event::TranscribeOk), None);
    // A completed episode ignores a stray download-ok signal.
    assert_eq!(transition(EpisodeStatus::Completed, Event::DownloadOk), None);
}

#[test]
fn test_transcript_retry_outcome_young_episode_gets_scheduled_retry() {
    let published_at = Utc::now() - chrono::Duration::days(1);
    let (status, next_retry) = transcript_retry_outcome(published_at, 30);
    assert_eq!(status, EpisodeStatus::AwaitingTranscript);
    assert!(next_retry.is_some());
}

#[test]
fn test_transcript_retry_outcome_old_episode_falls_back_to_download() {
    let published_at = Utc::now() - chrono::Duration::days(90);
    let (status, next_retry) = transcript_retry_outcome(published_at, 30);
    assert_eq!(status, EpisodeStatus::NeedsAudio);
    assert_eq!(next_retry, None);
}
