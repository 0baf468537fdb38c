//! Connection pool construction and the schema-version boot guard (C1,
//! spec.md §4.1). Mirrors the teacher's `r2d2` + `ConnectionManager<PgConnection>`
//! pool, relocked to `diesel::r2d2` now that `r2d2-diesel` has been folded
//! into diesel proper.

use crate::errors::{Error, Result};

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool as R2d2Pool};

pub type Pool = R2d2Pool<ConnectionManager<PgConnection>>;
pub type Connection = diesel::r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// The highest schema version this binary's embedded migrations understand.
/// Bumped by hand alongside `migrations/`.
pub const MAX_SCHEMA_VERSION: i64 = 1;

pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<Pool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = R2d2Pool::builder()
        .min_idle(Some(min_size))
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::Message(format!("error building connection pool: {}", e)))?;
    Ok(pool)
}

/// Refuses to proceed if the database's recorded schema version is newer
/// than this binary's `MAX_SCHEMA_VERSION` (spec.md §4.1).
pub fn check_schema_version(conn: &mut PgConnection) -> Result<()> {
    use crate::schema::schema_version::dsl::*;

    let found: Option<i64> = schema_version
        .select(version)
        .order(version.desc())
        .first(conn)
        .optional()?;

    if let Some(found) = found {
        if found > MAX_SCHEMA_VERSION {
            return Err(Error::SchemaVersionMismatch {
                found,
                max: MAX_SCHEMA_VERSION,
            });
        }
    }
    Ok(())
}

/// On boot, reset `running` jobs assigned to the in-process worker pool (or
/// unassigned) back to `queued`. Remote-assigned jobs are left alone per
/// spec.md §4.2 ("Server restart") -- they're resynced by the node's next
/// heartbeat or reclaimed on timeout.
pub fn reset_local_jobs_on_boot(conn: &mut PgConnection) -> Result<usize> {
    use crate::model::{JobStatus, LOCAL_NODE_ID};
    use crate::schema::job::dsl::*;

    let n = diesel::update(
        job.filter(status.eq(JobStatus::Running)).filter(
            assigned_node_id
                .eq(LOCAL_NODE_ID)
                .or(assigned_node_id.is_null()),
        ),
    )
    .set((
        status.eq(JobStatus::Queued),
        assigned_node_id.eq(Option::<String>::None),
        claimed_at.eq(Option::<chrono::DateTime<chrono::Utc>>::None),
    ))
    .execute(conn)?;
    Ok(n)
}
