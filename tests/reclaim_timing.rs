//! Reclaim-pass timing invariants (C2, spec.md §8 properties 11-12): a
//! timed-out job with no attempts left fails outright rather than
//! re-queuing, and the deadline is driven by `started_at` so a claim/fail
//! cycle can't reset it.

mod common;

use chrono::Utc;
use diesel::prelude::*;

use transcribercore::model::{self, FailureReason, Job, JobKind, JobStatus};
use transcribercore::queue::Queue;
use transcribercore::schema::job;

fn insert_job_with_max_attempts(conn: &mut diesel::pg::PgConnection, episode_id: i64, max_attempts: i32) -> Job {
    let ins = model::insertable::Job {
        episode_id,
        kind: JobKind::Transcribe,
        priority: 3,
        status: JobStatus::Queued,
        attempts: 0,
        max_attempts,
        scheduled_at: Utc::now(),
    };
    diesel::insert_into(job::table).values(&ins).get_result(conn).unwrap()
}

fn backdate_started_at(conn: &mut diesel::pg::PgConnection, job_id: i64, age: chrono::Duration) {
    diesel::update(job::table.filter(job::id.eq(job_id)))
        .set(job::started_at.eq(Utc::now() - age))
        .execute(conn)
        .unwrap();
}

#[test]
fn test_reclaim_fails_a_job_with_no_attempts_left() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    insert_job_with_max_attempts(&mut conn, ep.id, 1);

    let claimed = queue.claim_local(&mut conn, JobKind::Transcribe).unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);
    backdate_started_at(&mut conn, claimed.id, chrono::Duration::minutes(31));

    let n = queue.reclaim_once(&mut conn, chrono::Duration::minutes(30)).unwrap();
    assert_eq!(n, 1);

    let reloaded: Job = job::table.filter(job::id.eq(claimed.id)).first(&mut conn).unwrap();
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert!(reloaded.error_message.unwrap().contains("max attempts exceeded"));
    assert!(reloaded.assigned_node_id.is_none());

    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_reclaim_requeues_a_job_with_attempts_remaining() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    insert_job_with_max_attempts(&mut conn, ep.id, 3);

    let claimed = queue.claim_local(&mut conn, JobKind::Transcribe).unwrap().unwrap();
    backdate_started_at(&mut conn, claimed.id, chrono::Duration::minutes(31));

    let n = queue.reclaim_once(&mut conn, chrono::Duration::minutes(30)).unwrap();
    assert_eq!(n, 1);

    let reloaded: Job = job::table.filter(job::id.eq(claimed.id)).first(&mut conn).unwrap();
    assert_eq!(reloaded.status, JobStatus::Queued);
    assert!(reloaded.assigned_node_id.is_none());

    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_reclaim_ignores_jobs_still_within_the_timeout_window() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    insert_job_with_max_attempts(&mut conn, ep.id, 3);

    let claimed = queue.claim_local(&mut conn, JobKind::Transcribe).unwrap().unwrap();
    // started_at is "now" -- nowhere near the 30 minute deadline.

    let n = queue.reclaim_once(&mut conn, chrono::Duration::minutes(30)).unwrap();
    assert_eq!(n, 0);

    let reloaded: Job = job::table.filter(job::id.eq(claimed.id)).first(&mut conn).unwrap();
    assert_eq!(reloaded.status, JobStatus::Running);

    common::delete_feed(&mut conn, fd.id);
}

/// spec.md §8 property 12: repeated claim/fail/reclaim cycles cannot push a
/// job's total attempts past `max_attempts`, and each cycle's deadline is
/// judged on that cycle's own `started_at`, not a stale `claimed_at`.
#[test]
fn test_repeated_reclaim_cycles_cannot_exceed_max_attempts() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    let job_id = insert_job_with_max_attempts(&mut conn, ep.id, 2).id;

    // First cycle: claim, let it time out, reclaim back to queued.
    let claimed = queue.claim_local(&mut conn, JobKind::Transcribe).unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);
    backdate_started_at(&mut conn, job_id, chrono::Duration::minutes(31));
    assert_eq!(queue.reclaim_once(&mut conn, chrono::Duration::minutes(30)).unwrap(), 1);

    let mid: Job = job::table.filter(job::id.eq(job_id)).first(&mut conn).unwrap();
    assert_eq!(mid.status, JobStatus::Queued);
    assert_eq!(mid.attempts, 1);

    // Second cycle: claim again, reaching max_attempts, time out again.
    let claimed = queue.claim_local(&mut conn, JobKind::Transcribe).unwrap().unwrap();
    assert_eq!(claimed.attempts, 2);
    backdate_started_at(&mut conn, job_id, chrono::Duration::minutes(31));
    assert_eq!(queue.reclaim_once(&mut conn, chrono::Duration::minutes(30)).unwrap(), 1);

    let done: Job = job::table.filter(job::id.eq(job_id)).first(&mut conn).unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.attempts, 2);

    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_fail_applies_exponential_backoff_to_scheduled_at() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    insert_job_with_max_attempts(&mut conn, ep.id, 3);

    let claimed = queue.claim_local(&mut conn, JobKind::Transcribe).unwrap().unwrap();
    queue.fail(&mut conn, claimed.id, FailureReason::TranscribeFailed, "backend unreachable").unwrap();

    let reloaded: Job = job::table.filter(job::id.eq(claimed.id)).first(&mut conn).unwrap();
    assert_eq!(reloaded.status, JobStatus::Queued);
    let delay = reloaded.scheduled_at - Utc::now();
    assert!(delay.num_minutes() >= 4 && delay.num_minutes() <= 5, "expected ~5 minute backoff, got {:?}", delay);

    // Not yet re-claimable: scheduled_at is in the future.
    assert!(queue.claim_local(&mut conn, JobKind::Transcribe).unwrap().is_none());

    common::delete_feed(&mut conn, fd.id);
}
