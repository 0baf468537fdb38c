//! Node coordinator resync behavior (C5, spec.md §4.5, §8 properties 9-10,
//! scenario S3): heartbeat-driven claim resync/release, remote claim
//! eligibility by kind and declared model, and the server-restart rule for
//! local vs. remote job assignment.

mod common;

use std::sync::Arc;

use diesel::prelude::*;

use transcribercore::db;
use transcribercore::model::{Job, JobKind, JobStatus};
use transcribercore::node_coordinator::NodeCoordinator;
use transcribercore::queue::Queue;
use transcribercore::schema::job;

const HEARTBEAT_TIMEOUT: i64 = 60;
const SERVER_ASR_MODEL: &str = "whisper-large-v3";

fn coordinator(pool: db::Pool, queue: Arc<Queue>) -> NodeCoordinator {
    NodeCoordinator::new(pool, queue, HEARTBEAT_TIMEOUT, SERVER_ASR_MODEL.to_owned())
}

/// spec.md §8 property 10: a node that heartbeats without a previously
/// claimed job id causes the coordinator to release that job within one
/// heartbeat cycle.
#[test]
fn test_heartbeat_releases_jobs_not_reported_as_claimed() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Arc::new(Queue::new());
    let coord = coordinator(pool.clone(), Arc::clone(&queue));

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    let job_row = queue.enqueue(&mut conn, ep.id, JobKind::Transcribe, 3).unwrap();

    let reg = coord.register("node-a", Some(SERVER_ASR_MODEL), 5, false).unwrap();
    let claimed = coord.claim(&mut conn, reg.node_id, JobKind::Transcribe).unwrap().unwrap();
    assert_eq!(claimed.id, job_row.id);

    // The node restarts and heartbeats with no claimed ids at all.
    coord.heartbeat(&mut conn, reg.node_id, None, Vec::new()).unwrap();

    let reloaded: Job = job::table.filter(job::id.eq(job_row.id)).first(&mut conn).unwrap();
    assert_eq!(reloaded.status, JobStatus::Queued);
    assert!(reloaded.assigned_node_id.is_none());

    coord.terminate(&mut conn, reg.node_id).unwrap();
    common::delete_feed(&mut conn, fd.id);
}

/// spec.md §4.5 resync: a job the node reports holding but which the store
/// shows unassigned (assignment lost in a server restart) is resynced back
/// to `running` under that node rather than left orphaned.
#[test]
fn test_heartbeat_resyncs_a_claim_the_store_lost_track_of() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Arc::new(Queue::new());
    let coord = coordinator(pool.clone(), Arc::clone(&queue));

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    let job_row = queue.enqueue(&mut conn, ep.id, JobKind::Transcribe, 3).unwrap();

    let reg = coord.register("node-b", Some(SERVER_ASR_MODEL), 5, false).unwrap();

    // Simulate a server restart that lost the assignment: the job is back to
    // `queued` in the store, but the node still believes it holds it.
    diesel::update(job::table.filter(job::id.eq(job_row.id)))
        .set((job::status.eq(JobStatus::Queued), job::assigned_node_id.eq(Option::<String>::None)))
        .execute(&mut conn)
        .unwrap();

    coord.heartbeat(&mut conn, reg.node_id, Some(job_row.id), vec![job_row.id]).unwrap();

    let reloaded: Job = job::table.filter(job::id.eq(job_row.id)).first(&mut conn).unwrap();
    assert_eq!(reloaded.status, JobStatus::Running);
    assert_eq!(reloaded.assigned_node_id, Some(reg.node_id.to_string()));

    coord.terminate(&mut conn, reg.node_id).unwrap();
    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_remote_nodes_can_never_claim_download_or_transcript_download() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Arc::new(Queue::new());
    let coord = coordinator(pool.clone(), Arc::clone(&queue));

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    queue.enqueue(&mut conn, ep.id, JobKind::Download, 3).unwrap();
    queue.enqueue(&mut conn, ep.id, JobKind::TranscriptDownload, 1).unwrap();

    let reg = coord.register("node-c", None, 5, false).unwrap();
    assert!(coord.claim(&mut conn, reg.node_id, JobKind::Download).unwrap().is_none());
    assert!(coord.claim(&mut conn, reg.node_id, JobKind::TranscriptDownload).unwrap().is_none());

    coord.terminate(&mut conn, reg.node_id).unwrap();
    common::delete_feed(&mut conn, fd.id);
}

#[test]
fn test_transcribe_claim_requires_matching_declared_model() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Arc::new(Queue::new());
    let coord = coordinator(pool.clone(), Arc::clone(&queue));

    let fd = common::insert_feed(&mut conn);
    let ep = common::insert_episode(&mut conn, fd.id);
    let job_row = queue.enqueue(&mut conn, ep.id, JobKind::Transcribe, 3).unwrap();

    let mismatched = coord.register("node-tiny", Some("whisper-tiny"), 5, false).unwrap();
    assert!(coord.claim(&mut conn, mismatched.node_id, JobKind::Transcribe).unwrap().is_none());

    let unspecified = coord.register("node-any", None, 5, false).unwrap();
    let claimed = coord.claim(&mut conn, unspecified.node_id, JobKind::Transcribe).unwrap().unwrap();
    assert_eq!(claimed.id, job_row.id);

    coord.terminate(&mut conn, mismatched.node_id).unwrap();
    coord.terminate(&mut conn, unspecified.node_id).unwrap();
    common::delete_feed(&mut conn, fd.id);
}

/// spec.md §8 property 9 / scenario S3: after a simulated server restart,
/// local-assigned (and unassigned) running jobs come back to `queued`, while
/// a remote-assigned job is left `running` for its node's next heartbeat or
/// the reclaim pass to resolve.
#[test]
fn test_server_restart_only_resets_local_jobs() {
    let pool = common::pool();
    let mut conn = pool.get().unwrap();
    let queue = Arc::new(Queue::new());
    let coord = coordinator(pool.clone(), Arc::clone(&queue));

    let fd = common::insert_feed(&mut conn);
    let local_ep = common::insert_episode(&mut conn, fd.id);
    let remote_ep = common::insert_episode(&mut conn, fd.id);

    queue.enqueue(&mut conn, local_ep.id, JobKind::Download, 3).unwrap();
    let local_job = queue.claim_local(&mut conn, JobKind::Download).unwrap().unwrap();

    let remote_job_row = queue.enqueue(&mut conn, remote_ep.id, JobKind::Transcribe, 3).unwrap();
    let reg = coord.register("node-d", Some(SERVER_ASR_MODEL), 5, false).unwrap();
    let remote_job = coord.claim(&mut conn, reg.node_id, JobKind::Transcribe).unwrap().unwrap();
    assert_eq!(remote_job.id, remote_job_row.id);

    let reset = db::reset_local_jobs_on_boot(&mut conn).unwrap();
    assert!(reset >= 1);

    let local_reloaded: Job = job::table.filter(job::id.eq(local_job.id)).first(&mut conn).unwrap();
    assert_eq!(local_reloaded.status, JobStatus::Queued);

    let remote_reloaded: Job = job::table.filter(job::id.eq(remote_job.id)).first(&mut conn).unwrap();
    assert_eq!(remote_reloaded.status, JobStatus::Running);
    assert!(remote_reloaded.assigned_node_id.is_some());

    coord.terminate(&mut conn, reg.node_id).unwrap();
    common::delete_feed(&mut conn, fd.id);
}
