//! Job queue invariants (C2, spec.md §8 properties 1-3, 7, 8): enqueue
//! dedup, progress throttling, completed-is-terminal, and race-free claiming
//! under concurrent claimers. Runs against a real Postgres database (set
//! `TEST_DATABASE_URL`) since the claim primitive's race-freedom is exactly
//! what `FOR UPDATE SKIP LOCKED` is for -- a mocked connection can't exercise
//! it.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use transcribercore::model::{FailureReason, JobKind, JobStatus};
use transcribercore::queue::Queue;

#[test]
fn test_enqueue_is_idempotent_while_active() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);

    let first = queue.enqueue(&mut conn, ep.id, JobKind::TranscriptDownload, 1).unwrap();
    let second = queue.enqueue(&mut conn, ep.id, JobKind::TranscriptDownload, 1).unwrap();
    assert_eq!(first.id, second.id);

    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_enqueue_allows_a_new_job_once_the_first_completes() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);

    let first = queue.enqueue(&mut conn, ep.id, JobKind::Download, 3).unwrap();
    queue.claim_local(&mut conn, JobKind::Download).unwrap();
    queue.complete(&mut conn, first.id).unwrap();

    let second = queue.enqueue(&mut conn, ep.id, JobKind::Download, 3).unwrap();
    assert_ne!(first.id, second.id);

    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_completed_job_is_terminal() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);

    let job = queue.enqueue(&mut conn, ep.id, JobKind::Download, 3).unwrap();
    queue.claim_local(&mut conn, JobKind::Download).unwrap();
    queue.complete(&mut conn, job.id).unwrap();

    // A second completion, fail, or release must all be no-ops against a
    // terminal job.
    queue.complete(&mut conn, job.id).unwrap();
    queue.fail(&mut conn, job.id, FailureReason::DownloadFailed, "late failure").unwrap();
    queue.release(&mut conn, job.id).unwrap();

    use diesel::prelude::*;
    use transcribercore::schema::job;
    let status: JobStatus = job::table.filter(job::id.eq(job.id)).select(job::status).first(&mut conn).unwrap();
    assert_eq!(status, JobStatus::Completed);

    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_update_progress_is_throttled_but_always_lands_at_100() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Queue::new();

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);

    let job = queue.enqueue(&mut conn, ep.id, JobKind::Transcribe, 3).unwrap();
    queue.claim_local(&mut conn, JobKind::Transcribe).unwrap();

    queue.update_progress(&mut conn, job.id, 10).unwrap();
    // Immediately-following sub-100 writes within the throttle window are
    // dropped.
    queue.update_progress(&mut conn, job.id, 50).unwrap();

    use diesel::prelude::*;
    use transcribercore::schema::job;
    let percent: i32 = job::table.filter(job::id.eq(job.id)).select(job::progress_percent).first(&mut conn).unwrap();
    assert_eq!(percent, 10, "second write within the throttle window should have been dropped");

    // A 100% write always lands regardless of throttle.
    queue.update_progress(&mut conn, job.id, 100).unwrap();
    let percent: i32 = job::table.filter(job::id.eq(job.id)).select(job::progress_percent).first(&mut conn).unwrap();
    assert_eq!(percent, 100);

    common::delete_feed(&mut conn, fd.id);
}

/// spec.md §8 property 8: N parallel claimers on the same job kind each get
/// a distinct job, exactly once, with no job claimed twice.
#[test]
fn test_parallel_claimers_each_get_exactly_one_job() {
    let pool = common::pool();
    let queue = Arc::new(Queue::new());

    let mut conn = pool.get().unwrap();
    let fd = common::insert_feed(&mut conn);

    const NUM_JOBS: usize = 8;
    for _ in 0..NUM_JOBS {
        let ep = common::insert_episode(&mut conn, fd.id);
        queue.enqueue(&mut conn, ep.id, JobKind::Embed, 5).unwrap();
    }
    drop(conn);

    let handles: Vec<_> = (0..NUM_JOBS)
        .map(|_| {
            let pool = pool.clone();
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut conn = pool.get().unwrap();
                queue.claim_local(&mut conn, JobKind::Embed).unwrap()
            })
        })
        .collect();

    let claimed: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let claimed_ids: HashSet<i64> = claimed.iter().filter_map(|j| j.as_ref().map(|j| j.id)).collect();

    assert_eq!(claimed.iter().filter(|j| j.is_some()).count(), NUM_JOBS, "every claimer should have gotten a job");
    assert_eq!(claimed_ids.len(), NUM_JOBS, "no two claimers should have gotten the same job");

    let mut conn = pool.get().unwrap();
    common::delete_feed(&mut conn, fd.id);
}
