//! On-disk layout behavior (C9, spec.md §4.9), exercised against real
//! temporary directories via `tempfile` rather than mocked paths.

use chrono::{TimeZone, Utc};
use std::fs;
use tempfile::tempdir;
use transcribercore::storage;

#[test]
fn test_sanitize_title_collapses_and_trims() {
    assert_eq!(storage::sanitize_title("Hello, World!!"), "Hello-World");
    assert_eq!(storage::sanitize_title("  leading and trailing  "), "leading-and-trailing");
    assert_eq!(storage::sanitize_title("a---b"), "a-b");

    let long = "x".repeat(500);
    assert_eq!(storage::sanitize_title(&long).len(), 200);
}

#[test]
fn test_episode_filename_format() {
    let published_at = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
    let name = storage::episode_filename(published_at, "My Episode: Part 1", "mp3");
    assert_eq!(name, "2024-03-07_My-Episode-Part-1.mp3");
}

#[test]
fn test_audio_and_transcript_paths_separate_subdirs() {
    let root = tempdir().unwrap();
    let root_path = root.path().to_str().unwrap();
    let published_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let audio = storage::audio_path(root_path, "my-feed", published_at, "Title", "mp3");
    let transcript = storage::transcript_path(root_path, "my-feed", published_at, "Title");

    assert!(audio.starts_with(storage::audio_dir(root_path, "my-feed")));
    assert!(transcript.starts_with(storage::transcripts_dir(root_path, "my-feed")));
    assert_ne!(audio.parent(), transcript.parent());
}

#[test]
fn test_trash_feed_moves_directory_tree() {
    let root = tempdir().unwrap();
    let root_path = root.path().to_str().unwrap();

    let audio_dir = storage::audio_dir(root_path, "my-feed");
    fs::create_dir_all(&audio_dir).unwrap();
    fs::write(audio_dir.join("episode.mp3"), b"data").unwrap();

    let dest = storage::trash_feed(root_path, "my-feed", 42).unwrap();

    assert!(!storage::feed_dir(root_path, "my-feed").exists());
    assert!(dest.join("audio").join("episode.mp3").exists());
}

#[test]
fn test_trash_feed_is_a_noop_when_nothing_on_disk() {
    let root = tempdir().unwrap();
    let root_path = root.path().to_str().unwrap();

    let dest = storage::trash_feed(root_path, "never-downloaded", 7).unwrap();
    assert!(dest.exists());
    assert!(fs::read_dir(&dest).unwrap().next().is_none());
}

#[test]
fn test_rename_feed_dir_relocates_contents() {
    let root = tempdir().unwrap();
    let root_path = root.path().to_str().unwrap();

    let old_audio = storage::audio_dir(root_path, "old-slug");
    fs::create_dir_all(&old_audio).unwrap();
    fs::write(old_audio.join("a.mp3"), b"x").unwrap();

    storage::rename_feed_dir(root_path, "old-slug", "new-slug").unwrap();

    assert!(!storage::feed_dir(root_path, "old-slug").exists());
    assert!(storage::audio_dir(root_path, "new-slug").join("a.mp3").exists());
}

#[test]
fn test_sweep_keeps_freshly_created_trash() {
    let root = tempdir().unwrap();
    let root_path = root.path().to_str().unwrap();
    let temp_download = tempdir().unwrap();

    let fresh = storage::trash_dir(root_path, "feed-b", 2, Utc::now());
    fs::create_dir_all(&fresh).unwrap();

    storage::sweep(root_path, temp_download.path().to_str().unwrap()).unwrap();

    assert!(fresh.exists());
}

#[test]
fn test_sweep_is_a_noop_on_missing_directories() {
    let root = tempdir().unwrap();
    let root_path = root.path().to_str().unwrap();
    // Neither `trash/` nor a temp-download directory exists yet.
    storage::sweep(root_path, "/nonexistent/temp/download/path").unwrap();
}
