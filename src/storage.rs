//! On-disk layout (C9, spec.md §4.9). Plain functions over `std::path`/
//! `std::fs`, matching the teacher's preference for simple, testable free
//! functions in non-DB-facing code (`html.rs`, `links.rs`).

use crate::errors::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub fn feed_dir(storage_path: &str, feed_slug: &str) -> PathBuf {
    Path::new(storage_path).join(feed_slug)
}

pub fn audio_dir(storage_path: &str, feed_slug: &str) -> PathBuf {
    feed_dir(storage_path, feed_slug).join("audio")
}

pub fn transcripts_dir(storage_path: &str, feed_slug: &str) -> PathBuf {
    feed_dir(storage_path, feed_slug).join("transcripts")
}

pub fn trash_dir(storage_path: &str, feed_slug: &str, feed_id: i64, ts: DateTime<Utc>) -> PathBuf {
    Path::new(storage_path)
        .join("trash")
        .join(format!("{}_{}_{}", feed_slug, feed_id, ts.format("%Y%m%d%H%M%S")))
}

/// `YYYY-MM-DD_<sanitized-title>.<ext>`, per spec.md §4.4.2.
pub fn episode_filename(published_at: DateTime<Utc>, title: &str, ext: &str) -> String {
    format!(
        "{}_{}.{}",
        published_at.format("%Y-%m-%d"),
        sanitize_title(title),
        ext
    )
}

pub fn audio_path(storage_path: &str, feed_slug: &str, published_at: DateTime<Utc>, title: &str, ext: &str) -> PathBuf {
    audio_dir(storage_path, feed_slug).join(episode_filename(published_at, title, ext))
}

pub fn transcript_path(storage_path: &str, feed_slug: &str, published_at: DateTime<Utc>, title: &str) -> PathBuf {
    transcripts_dir(storage_path, feed_slug).join(episode_filename(published_at, title, "md"))
}

/// Replaces non-alphanumerics with `-`, collapses runs of `-`, trims to 200
/// chars (spec.md §4.4.2).
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    trimmed.chars().take(200).collect()
}

/// Moves a feed's audio/transcripts directories to `trash/<slug>_<id>_<ts>/`,
/// preserving the `audio/`/`transcripts/` subdirectory structure, ahead of
/// the feed's DB row being deleted (spec.md §4.9, §3.2 "files are moved to
/// trash first").
pub fn trash_feed(storage_path: &str, feed_slug: &str, feed_id: i64) -> Result<PathBuf> {
    let now = Utc::now();
    let dest = trash_dir(storage_path, feed_slug, feed_id, now);
    std::fs::create_dir_all(&dest)?;

    let src = feed_dir(storage_path, feed_slug);
    if src.exists() {
        std::fs::remove_dir(&dest)?;
        std::fs::rename(&src, &dest)?;
    }
    Ok(dest)
}

/// Atomically renames a feed's directory tree on slug change.
pub fn rename_feed_dir(storage_path: &str, old_slug: &str, new_slug: &str) -> Result<()> {
    let old = feed_dir(storage_path, old_slug);
    let new = feed_dir(storage_path, new_slug);
    if old.exists() {
        std::fs::rename(old, new)?;
    }
    Ok(())
}

/// Startup sweep: removes `trash/*` directories older than 30 days and
/// `TEMP_DOWNLOAD_PATH` files older than 24h (spec.md §4.9).
pub fn sweep(storage_path: &str, temp_download_path: &str) -> Result<()> {
    let trash_root = Path::new(storage_path).join("trash");
    sweep_older_than(&trash_root, chrono::Duration::days(30))?;
    sweep_older_than(Path::new(temp_download_path), chrono::Duration::hours(24))?;
    Ok(())
}

fn sweep_older_than(dir: &Path, max_age: chrono::Duration) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let cutoff = std::time::SystemTime::now() - max_age.to_std().unwrap_or_default();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let modified = metadata.modified().unwrap_or(std::time::SystemTime::now());
        if modified < cutoff {
            if metadata.is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Hello, World!"), "Hello-World");
        assert_eq!(sanitize_title("  leading and trailing  "), "leading-and-trailing");
        assert_eq!(sanitize_title("a---b"), "a-b");
    }

    #[test]
    fn test_sanitize_title_truncates() {
        let long = "a".repeat(300);
        assert_eq!(sanitize_title(&long).len(), 200);
    }

    #[test]
    fn test_episode_filename() {
        let ts = chrono::DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            episode_filename(ts, "My Episode", "mp3"),
            "2024-01-02_My-Episode.mp3"
        );
    }

    proptest::proptest! {
        /// Whatever garbage a feed author puts in an episode title, the
        /// sanitized form must never contain a path separator or `..`, and
        /// must stay within the 200 char cap -- this is what makes it safe
        /// to join onto a filesystem path without escaping `audio_dir`.
        #[test]
        fn sanitized_title_is_always_a_safe_path_component(title in ".*") {
            let out = sanitize_title(&title);
            proptest::prop_assert!(!out.contains('/'));
            proptest::prop_assert!(!out.contains(std::path::MAIN_SEPARATOR));
            proptest::prop_assert!(!out.contains(".."));
            proptest::prop_assert!(out.len() <= 200);
        }
    }
}
