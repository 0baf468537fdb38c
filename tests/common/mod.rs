//! Shared fixtures for the integration tests in this directory. Each test
//! binary pulls in a fresh copy via `mod common;` since `tests/` files don't
//! share a crate.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use transcribercore::db::{self, Pool};
use transcribercore::model::{self, Episode, Feed};
use transcribercore::schema::{episode, feed};

/// A single-connection pool against `TEST_DATABASE_URL`. `db::build_pool` is
/// the same entry point the server binary uses at boot; a test transaction
/// isn't an option here since several tests need concurrent connections
/// (e.g. simulating parallel remote claimers), so fixtures clean up their own
/// rows instead.
pub fn pool() -> Pool {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set in order to run tests");
    db::build_pool(&url, 1, 8).unwrap()
}

pub fn insert_feed(conn: &mut PgConnection) -> Feed {
    let ins = model::insertable::Feed {
        url: format!("https://example.com/feed-{}.xml", uuid::Uuid::new_v4()),
        slug: format!("feed-{}", uuid::Uuid::new_v4()),
        title: "Test Feed".to_owned(),
        title_override: None,
        author: None,
        site_link_url: None,
        category_tags: Vec::new(),
        itunes_id: None,
        pocketcasts_show_uuid: None,
        paused: false,
    };
    diesel::insert_into(feed::table).values(&ins).get_result(conn).unwrap()
}

pub fn insert_episode(conn: &mut PgConnection, feed_id: i64) -> Episode {
    let ins = model::insertable::Episode {
        feed_id,
        guid: format!("guid-{}", uuid::Uuid::new_v4()),
        title: "Test Episode".to_owned(),
        audio_url: "https://example.com/ep.mp3".to_owned(),
        transcript_url: None,
        transcript_mime: None,
        external_transcript_url: None,
        published_at: chrono::Utc::now(),
        duration_seconds: None,
        status: model::EpisodeStatus::New,
    };
    diesel::insert_into(episode::table).values(&ins).get_result(conn).unwrap()
}

/// Removing the feed cascades to its episodes, and episodes cascade to jobs
/// and embedding records, so this is the one cleanup call each test needs.
pub fn delete_feed(conn: &mut PgConnection, feed_id: i64) {
    diesel::delete(feed::table.filter(feed::id.eq(feed_id))).execute(conn).unwrap();
}
