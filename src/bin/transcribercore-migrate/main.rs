//! One-shot migration runner (spec.md §4.1). Kept as its own binary, same
//! split the teacher uses between its `podcore` CLI and the migrations it
//! embeds, so a deploy step can run `transcribercore-migrate` without
//! pulling in the rest of the server's runtime.

#[macro_use]
extern crate slog;

use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() {
    let log = transcribercore::logging::build(false, false);

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            error!(log, "DATABASE_URL must be set");
            std::process::exit(1);
        }
    };

    info!(log, "Running migrations");
    let mut conn = match PgConnection::establish(&database_url) {
        Ok(conn) => conn,
        Err(e) => {
            error!(log, "Failed to connect to database"; "error" => e.to_string());
            std::process::exit(1);
        }
    };

    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            for m in &applied {
                info!(log, "Applied migration"; "name" => m.to_string());
            }
            info!(log, "Finished migrations");
        }
        Err(e) => {
            error!(log, "Migration run failed"; "error" => e.to_string());
            std::process::exit(1);
        }
    }
}
