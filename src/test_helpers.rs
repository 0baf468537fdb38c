//! Test-only connection and logger helpers, mirroring the teacher's
//! `test_helpers.rs` but updated for diesel 2's `r2d2` pool and this
//! crate's `db::Pool` type alias.

use crate::db::{self, Pool};

use diesel::connection::Connection as _;
use diesel::pg::PgConnection;
use slog::{Drain, Logger};
use std::env;

fn database_url() -> String {
    env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set in order to run tests")
}

/// A raw connection with an open test transaction, rolled back on drop.
pub fn connection() -> PgConnection {
    let mut conn = PgConnection::establish(&database_url()).unwrap();
    conn.begin_test_transaction().unwrap();
    conn
}

/// A single-connection pool for tests that exercise code taking `db::Pool`
/// rather than a raw connection (`Queue`, `NodeCoordinator`). Not wrapped in
/// a test transaction -- callers that need isolation should clean up the
/// rows they create.
pub fn pool() -> Pool {
    db::build_pool(&database_url(), 1, 1).unwrap()
}

pub fn log() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let async_drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(async_drain, o!("env" => "test"))
}
