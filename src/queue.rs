//! The persistent job queue (C2, spec.md §4.2). Claim is implemented as a
//! single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED LIMIT 1)
//! RETURNING *` via `diesel::sql_query`, the same "drop to raw SQL for
//! anything outside the query DSL's reach" move the teacher makes in
//! `mediators::podcast_crawler` for its paging subselect.

use crate::errors::Result;
use crate::model::{FailureReason, Job, JobKind, JobStatus, LOCAL_NODE_ID};
use crate::schema::job;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum interval between `update_progress` writes per job, per spec.md
/// §4.2 ("Callers must throttle... update only when >= 5 seconds elapsed").
const PROGRESS_THROTTLE: Duration = Duration::from_secs(5);

/// Exponential backoff applied to a job's `scheduled_at` on retry (spec.md
/// §8 S2: "retries twice with exponential backoff (5 / 25 / 125 min
/// delays)"). `attempts` is the count *after* the failed attempt, so the
/// first retry waits 5 min, the second 25 min, and so on.
pub fn backoff_delay(attempts: i32) -> chrono::Duration {
    let minutes = 5i64.saturating_pow(attempts.max(1) as u32);
    chrono::Duration::minutes(minutes)
}

#[derive(QueryableByName, Debug)]
struct JobRow {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    id: i64,
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    episode_id: i64,
    #[diesel(sql_type = Text)]
    kind: String,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    priority: i32,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    attempts: i32,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    max_attempts: i32,
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    scheduled_at: DateTime<Utc>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Timestamptz>)]
    started_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Timestamptz>)]
    completed_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = diesel::sql_types::Integer)]
    progress_percent: i32,
    #[diesel(sql_type = Nullable<Text>)]
    error_message: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    failure_reason: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    assigned_node_id: Option<String>,
    #[diesel(sql_type = Nullable<diesel::sql_types::Timestamptz>)]
    claimed_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Job {
        Job {
            id: self.id,
            episode_id: self.episode_id,
            kind: parse_job_kind(&self.kind),
            priority: self.priority,
            status: parse_job_status(&self.status),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            progress_percent: self.progress_percent,
            error_message: self.error_message,
            failure_reason: self.failure_reason.as_deref().map(parse_failure_reason),
            assigned_node_id: self.assigned_node_id,
            claimed_at: self.claimed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn job_kind_sql(kind: JobKind) -> &'static str {
    match kind {
        JobKind::TranscriptDownload => "transcript_download",
        JobKind::Download => "download",
        JobKind::Transcribe => "transcribe",
        JobKind::Embed => "embed",
    }
}

fn parse_job_kind(s: &str) -> JobKind {
    match s {
        "transcript_download" => JobKind::TranscriptDownload,
        "download" => JobKind::Download,
        "transcribe" => JobKind::Transcribe,
        "embed" => JobKind::Embed,
        other => panic!("unrecognized job_kind in database: {}", other),
    }
}

fn parse_job_status(s: &str) -> JobStatus {
    match s {
        "queued" => JobStatus::Queued,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        other => panic!("unrecognized job_status in database: {}", other),
    }
}

fn parse_failure_reason(s: &str) -> FailureReason {
    match s {
        "download_failed" => FailureReason::DownloadFailed,
        "transcript_forbidden" => FailureReason::TranscriptForbidden,
        "transcript_not_found" => FailureReason::TranscriptNotFound,
        "transcript_request_error" => FailureReason::TranscriptRequestError,
        "transcribe_failed" => FailureReason::TranscribeFailed,
        _ => FailureReason::Unknown,
    }
}

pub fn failure_reason_sql(reason: FailureReason) -> &'static str {
    match reason {
        FailureReason::DownloadFailed => "download_failed",
        FailureReason::TranscriptForbidden => "transcript_forbidden",
        FailureReason::TranscriptNotFound => "transcript_not_found",
        FailureReason::TranscriptRequestError => "transcript_request_error",
        FailureReason::TranscribeFailed => "transcribe_failed",
        FailureReason::Unknown => "unknown",
    }
}

/// Tracks the last `update_progress` write time per job so callers don't need
/// to carry their own throttle state (spec.md §9: background loops/hot paths
/// shouldn't contend with the store).
pub struct Queue {
    last_progress_write: Mutex<HashMap<i64, Instant>>,
}

impl Default for Queue {
    fn default() -> Self {
        Queue {
            last_progress_write: Mutex::new(HashMap::new()),
        }
    }
}

impl Queue {
    pub fn new() -> Queue {
        Queue::default()
    }

    /// Inserts a new `queued` job unless one is already active for
    /// `(episode_id, kind)`, in which case the existing job is returned
    /// (spec.md §4.2 "Duplicate enqueues... are no-ops").
    pub fn enqueue(
        &self,
        conn: &mut PgConnection,
        episode_id: i64,
        kind: JobKind,
        priority: i32,
    ) -> Result<Job> {
        conn.transaction(|conn| {
            let existing: Option<JobRow> = diesel::sql_query(
                "SELECT id, episode_id, kind::text as kind, priority, status::text as status, \
                 attempts, max_attempts, scheduled_at, started_at, completed_at, \
                 progress_percent, error_message, failure_reason::text as failure_reason, \
                 assigned_node_id, claimed_at, created_at, updated_at \
                 FROM job WHERE episode_id = $1 AND kind = $2::job_kind \
                 AND status IN ('queued', 'running') LIMIT 1",
            )
            .bind::<diesel::sql_types::BigInt, _>(episode_id)
            .bind::<Text, _>(job_kind_sql(kind))
            .get_result(conn)
            .optional()?;

            if let Some(row) = existing {
                return Ok(row.into_job());
            }

            let now = Utc::now();
            let ins = crate::model::insertable::Job {
                episode_id,
                kind,
                priority,
                status: JobStatus::Queued,
                attempts: 0,
                max_attempts: 3,
                scheduled_at: now,
            };
            diesel::insert_into(job::table)
                .values(&ins)
                .get_result::<Job>(conn)
                .map_err(Into::into)
        })
    }

    fn claim(
        &self,
        conn: &mut PgConnection,
        kind: JobKind,
        node_id: &str,
    ) -> Result<Option<Job>> {
        let row: Option<JobRow> = diesel::sql_query(
            "UPDATE job SET status = 'running', started_at = now(), \
             attempts = attempts + 1, progress_percent = 0, assigned_node_id = $2, \
             claimed_at = now(), updated_at = now() \
             WHERE id = ( \
               SELECT id FROM job \
               WHERE kind = $1::job_kind AND status = 'queued' AND scheduled_at <= now() \
               ORDER BY priority ASC, created_at ASC, id ASC \
               FOR UPDATE SKIP LOCKED \
               LIMIT 1 \
             ) \
             RETURNING id, episode_id, kind::text as kind, priority, status::text as status, \
             attempts, max_attempts, scheduled_at, started_at, completed_at, \
             progress_percent, error_message, failure_reason::text as failure_reason, \
             assigned_node_id, claimed_at, created_at, updated_at",
        )
        .bind::<Text, _>(job_kind_sql(kind))
        .bind::<Text, _>(node_id)
        .get_result(conn)
        .optional()?;

        Ok(row.map(JobRow::into_job))
    }

    pub fn claim_local(&self, conn: &mut PgConnection, kind: JobKind) -> Result<Option<Job>> {
        self.claim(conn, kind, LOCAL_NODE_ID)
    }

    pub fn claim_remote(
        &self,
        conn: &mut PgConnection,
        kind: JobKind,
        node_id: &uuid::Uuid,
    ) -> Result<Option<Job>> {
        self.claim(conn, kind, &node_id.to_string())
    }

    /// Throttled per spec.md §4.2: writes only if >= 5s since the last write
    /// for this job, or the job has reached 100%.
    pub fn update_progress(&self, conn: &mut PgConnection, job_id: i64, percent: i32) -> Result<()> {
        let now = Instant::now();
        {
            let mut last = self.last_progress_write.lock();
            if percent < 100 {
                if let Some(prev) = last.get(&job_id) {
                    if now.duration_since(*prev) < PROGRESS_THROTTLE {
                        return Ok(());
                    }
                }
            }
            last.insert(job_id, now);
        }

        diesel::update(job::table.filter(job::id.eq(job_id)))
            .set((job::progress_percent.eq(percent), job::updated_at.eq(Utc::now())))
            .execute(conn)?;
        Ok(())
    }

    /// Terminal; a second completion is a no-op (spec.md §4.2).
    pub fn complete(&self, conn: &mut PgConnection, job_id: i64) -> Result<()> {
        diesel::update(
            job::table
                .filter(job::id.eq(job_id))
                .filter(job::status.eq(JobStatus::Running)),
        )
        .set((
            job::status.eq(JobStatus::Completed),
            job::completed_at.eq(Utc::now()),
            job::assigned_node_id.eq(Option::<String>::None),
            job::claimed_at.eq(Option::<DateTime<Utc>>::None),
            job::progress_percent.eq(100),
            job::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
        Ok(())
    }

    /// `running -> queued` if attempts remain, else `running -> failed`.
    pub fn fail(
        &self,
        conn: &mut PgConnection,
        job_id: i64,
        reason: FailureReason,
        message: &str,
    ) -> Result<()> {
        conn.transaction(|conn| {
            let current: Job = job::table.filter(job::id.eq(job_id)).first(conn)?;
            if current.status != JobStatus::Running {
                return Ok(());
            }

            let next_status = if current.attempts < current.max_attempts {
                JobStatus::Queued
            } else {
                JobStatus::Failed
            };
            let next_scheduled_at = if next_status == JobStatus::Queued {
                Utc::now() + backoff_delay(current.attempts)
            } else {
                current.scheduled_at
            };

            diesel::update(job::table.filter(job::id.eq(job_id)))
                .set((
                    job::status.eq(next_status),
                    job::error_message.eq(message),
                    job::failure_reason.eq(reason),
                    job::assigned_node_id.eq(Option::<String>::None),
                    job::claimed_at.eq(Option::<DateTime<Utc>>::None),
                    job::scheduled_at.eq(next_scheduled_at),
                    job::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Graceful-shutdown path: `running -> queued` without incrementing
    /// `attempts` (spec.md §4.2 "Release").
    pub fn release(&self, conn: &mut PgConnection, job_id: i64) -> Result<()> {
        diesel::update(
            job::table
                .filter(job::id.eq(job_id))
                .filter(job::status.eq(JobStatus::Running)),
        )
        .set((
            job::status.eq(JobStatus::Queued),
            job::assigned_node_id.eq(Option::<String>::None),
            job::claimed_at.eq(Option::<DateTime<Utc>>::None),
            job::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
        Ok(())
    }

    /// One reclaim sweep (spec.md §4.2 "Reclamation"). Uses `started_at`, not
    /// `claimed_at`, so repeated claim/fail loops can't reset the deadline.
    pub fn reclaim_once(&self, conn: &mut PgConnection, reclaim_timeout: chrono::Duration) -> Result<usize> {
        let deadline = Utc::now() - reclaim_timeout;

        let timed_out_exhausted = diesel::update(
            job::table
                .filter(job::status.eq(JobStatus::Running))
                .filter(job::assigned_node_id.is_not_null())
                .filter(job::started_at.lt(deadline))
                .filter(job::attempts.ge(job::max_attempts)),
        )
        .set((
            job::status.eq(JobStatus::Failed),
            job::error_message.eq("max attempts exceeded (timed out repeatedly)"),
            job::failure_reason.eq(FailureReason::Unknown),
            job::assigned_node_id.eq(Option::<String>::None),
            job::claimed_at.eq(Option::<DateTime<Utc>>::None),
            job::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

        let timed_out_retryable = diesel::update(
            job::table
                .filter(job::status.eq(JobStatus::Running))
                .filter(job::assigned_node_id.is_not_null())
                .filter(job::started_at.lt(deadline))
                .filter(job::attempts.lt(job::max_attempts)),
        )
        .set((
            job::status.eq(JobStatus::Queued),
            job::assigned_node_id.eq(Option::<String>::None),
            job::claimed_at.eq(Option::<DateTime<Utc>>::None),
            job::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;

        Ok(timed_out_exhausted + timed_out_retryable)
    }

    /// Counts by kind/status for `/api/queue/status`.
    pub fn status_counts(&self, conn: &mut PgConnection) -> Result<Vec<(JobKind, JobStatus, i64)>> {
        #[derive(QueryableByName)]
        struct Row {
            #[diesel(sql_type = Text)]
            kind: String,
            #[diesel(sql_type = Text)]
            status: String,
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            count: i64,
        }

        let rows: Vec<Row> = diesel::sql_query(
            "SELECT kind::text as kind, status::text as status, count(*) as count \
             FROM job GROUP BY kind, status",
        )
        .get_results(conn)?;

        Ok(rows
            .into_iter()
            .map(|r| (parse_job_kind(&r.kind), parse_job_status(&r.status), r.count))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_round_trip() {
        for kind in [
            JobKind::TranscriptDownload,
            JobKind::Download,
            JobKind::Transcribe,
            JobKind::Embed,
        ] {
            assert_eq!(kind, parse_job_kind(job_kind_sql(kind)));
        }
    }

    #[test]
    fn test_failure_reason_round_trip() {
        for reason in [
            FailureReason::DownloadFailed,
            FailureReason::TranscriptForbidden,
            FailureReason::TranscriptNotFound,
            FailureReason::TranscriptRequestError,
            FailureReason::TranscribeFailed,
            FailureReason::Unknown,
        ] {
            assert_eq!(reason, parse_failure_reason(failure_reason_sql(reason)));
        }
    }

    #[test]
    fn test_backoff_delay_matches_spec_example() {
        assert_eq!(backoff_delay(1), chrono::Duration::minutes(5));
        assert_eq!(backoff_delay(2), chrono::Duration::minutes(25));
        assert_eq!(backoff_delay(3), chrono::Duration::minutes(125));
    }
}
