//! The node coordinator (C5, spec.md §4.5): registration, heartbeat
//! bookkeeping, stale detection, resync. The in-memory heartbeat cache is
//! guarded by a `parking_lot::Mutex`, grounded on `alfredjeanlab-oddjobs`'s
//! use of `parking_lot` throughout its daemon for exactly this kind of hot
//! shared state (spec.md §9: "process-local map keyed by node id... access
//! must be guarded").

use crate::db;
use crate::errors::{Error, Result};
use crate::model::{self, JobKind, JobStatus, Node, NodeStatus};
use crate::queue::Queue;
use crate::schema::{job, node};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Job kinds remote nodes are never allowed to claim (spec.md §4.5).
const REMOTE_BLOCKED_KINDS: &[JobKind] = &[JobKind::Download, JobKind::TranscriptDownload];

#[derive(Debug, Clone)]
pub struct HeartbeatRecord {
    pub last_heartbeat: DateTime<Utc>,
    pub claimed_job_ids: Vec<i64>,
}

pub struct NodeCoordinator {
    pool: db::Pool,
    queue: Arc<Queue>,
    heartbeats: Mutex<HashMap<Uuid, HeartbeatRecord>>,
    heartbeat_timeout_seconds: i64,
    /// The server's configured ASR model (spec.md §6.3 `asr_model`). A node's
    /// `declared_model` must match this for it to be eligible for
    /// `Transcribe` jobs (spec.md §4.5 "whose declared model matches"); a
    /// node that declares no model is treated as able to service any.
    asr_model: String,
}

/// Returned from `register`; the raw secret is surfaced exactly once
/// (spec.md §4.5) and never persisted or logged in the clear.
pub struct Registration {
    pub node_id: Uuid,
    pub api_key: String,
}

impl NodeCoordinator {
    pub fn new(pool: db::Pool, queue: Arc<Queue>, heartbeat_timeout_seconds: i64, asr_model: String) -> NodeCoordinator {
        NodeCoordinator {
            pool,
            queue,
            heartbeats: Mutex::new(HashMap::new()),
            heartbeat_timeout_seconds,
            asr_model,
        }
    }

    pub fn register(
        &self,
        display_name: &str,
        declared_model: Option<&str>,
        priority: i32,
        persistent: bool,
    ) -> Result<Registration> {
        let api_key = generate_api_key();
        let api_key_hash = hash_api_key(&api_key);
        let node_id = Uuid::new_v4();

        let mut conn = self.pool.get().map_err(Error::Pool)?;
        let ins = model::insertable::Node {
            id: node_id,
            display_name: display_name.to_owned(),
            reachable_url: None,
            api_key_hash,
            declared_model: declared_model.map(|s| s.to_owned()),
            status: NodeStatus::Offline,
            priority,
            persistent,
        };
        diesel::insert_into(node::table).values(&ins).execute(&mut conn)?;

        Ok(Registration { node_id, api_key })
    }

    /// Looks a node up by its `X-Transcriber-Key` header alone, for
    /// endpoints that don't carry a node id in the path (spec.md §6.1
    /// "Stream audio bytes"/"Submit transcript"/"Report failure" are
    /// addressed by job id, not node id).
    pub fn authenticate_by_key(&self, conn: &mut PgConnection, api_key: &str) -> Result<Node> {
        node::table
            .filter(node::api_key_hash.eq(hash_api_key(api_key)))
            .first(conn)
            .map_err(|_| Error::Unauthorized("bad api key".to_owned()))
    }

    pub fn authenticate(&self, conn: &mut PgConnection, node_id: Uuid, api_key: &str) -> Result<Node> {
        let found: Node = node::table
            .filter(node::id.eq(node_id))
            .first(conn)
            .map_err(|_| Error::Unauthorized("unknown node".to_owned()))?;
        if found.api_key_hash != hash_api_key(api_key) {
            return Err(Error::Unauthorized("bad api key".to_owned()));
        }
        Ok(found)
    }

    /// Records the heartbeat timestamp in memory only (no store write),
    /// then resyncs/releases jobs per spec.md §4.5 steps 2-3.
    pub fn heartbeat(
        &self,
        conn: &mut PgConnection,
        node_id: Uuid,
        current_job_id: Option<i64>,
        claimed_job_ids: Vec<i64>,
    ) -> Result<()> {
        {
            let mut cache = self.heartbeats.lock();
            cache.insert(
                node_id,
                HeartbeatRecord {
                    last_heartbeat: Utc::now(),
                    claimed_job_ids: claimed_job_ids.clone(),
                },
            );
        }

        // Resync: jobs the node says it holds but which the store shows as
        // unassigned (assignment lost across a node or server restart).
        for &job_id in &claimed_job_ids {
            diesel::update(
                job::table.filter(job::id.eq(job_id)).filter(
                    job::status
                        .eq(JobStatus::Queued)
                        .or(job::assigned_node_id.is_null()),
                ),
            )
            .set((
                job::assigned_node_id.eq(node_id.to_string()),
                job::status.eq(JobStatus::Running),
                job::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        }

        // Release: jobs the store thinks this node holds but which weren't
        // reported in this heartbeat (node restart lost prefetch state).
        let claimed_set = claimed_job_ids;
        let assigned: Vec<i64> = job::table
            .filter(job::assigned_node_id.eq(node_id.to_string()))
            .filter(job::status.eq(JobStatus::Running))
            .select(job::id)
            .load(conn)?;
        for job_id in assigned {
            if !claimed_set.contains(&job_id) {
                self.queue.release(conn, job_id)?;
            }
        }

        diesel::update(node::table.filter(node::id.eq(node_id)))
            .set((
                node::status.eq(if current_job_id.is_some() {
                    NodeStatus::Busy
                } else {
                    NodeStatus::Online
                }),
                node::current_job_id.eq(current_job_id),
                node::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;

        Ok(())
    }

    /// Nodes pull jobs via this path; enforces spec.md §4.5's per-kind
    /// remote eligibility rules, plus the declared-model match for
    /// `Transcribe` jobs.
    pub fn claim(&self, conn: &mut PgConnection, node_id: Uuid, kind: JobKind) -> Result<Option<model::Job>> {
        if REMOTE_BLOCKED_KINDS.contains(&kind) {
            return Ok(None);
        }
        if kind == JobKind::Transcribe && !self.node_can_service_asr(conn, node_id)? {
            return Ok(None);
        }
        self.queue.claim_remote(conn, kind, &node_id)
    }

    /// A node with no declared model is assumed able to run whatever backend
    /// it's handed; one with a declared model must match the server's
    /// configured `asr_model` (spec.md §4.5 "declared model matches").
    fn node_can_service_asr(&self, conn: &mut PgConnection, node_id: Uuid) -> Result<bool> {
        let declared: Option<String> = node::table.filter(node::id.eq(node_id)).select(node::declared_model).first(conn)?;
        Ok(match declared {
            Some(model) => model == self.asr_model,
            None => true,
        })
    }

    /// Periodic sweep (every 30s): marks any node offline whose in-memory
    /// heartbeat is older than the configured timeout.
    pub fn sweep_stale(&self, conn: &mut PgConnection) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.heartbeat_timeout_seconds);
        let stale_ids: Vec<Uuid> = {
            let cache = self.heartbeats.lock();
            cache
                .iter()
                .filter(|(_, rec)| rec.last_heartbeat < cutoff)
                .map(|(id, _)| *id)
                .collect()
        };

        if stale_ids.is_empty() {
            return Ok(0);
        }

        let n = diesel::update(node::table.filter(node::id.eq_any(&stale_ids)))
            .set((node::status.eq(NodeStatus::Offline), node::updated_at.eq(Utc::now())))
            .execute(conn)?;
        Ok(n)
    }

    /// Batched flush of in-memory heartbeat timestamps to the store, called
    /// every 5 minutes (spec.md §4.2/§4.5).
    pub fn flush_heartbeats(&self, conn: &mut PgConnection) -> Result<()> {
        let snapshot: Vec<(Uuid, DateTime<Utc>)> = {
            let cache = self.heartbeats.lock();
            cache.iter().map(|(id, rec)| (*id, rec.last_heartbeat)).collect()
        };
        for (id, ts) in snapshot {
            diesel::update(node::table.filter(node::id.eq(id)))
                .set(node::last_heartbeat.eq(ts))
                .execute(conn)?;
        }
        Ok(())
    }

    /// Pod-initiated or admin-initiated teardown (spec.md §4.5 "Termination
    /// request"): releases all of the node's jobs, then the caller is
    /// responsible for terminating any backing pod and clearing setup state.
    pub fn terminate(&self, conn: &mut PgConnection, node_id: Uuid) -> Result<()> {
        let assigned: Vec<i64> = job::table
            .filter(job::assigned_node_id.eq(node_id.to_string()))
            .filter(job::status.eq(JobStatus::Running))
            .select(job::id)
            .load(conn)?;
        for job_id in assigned {
            self.queue.release(conn, job_id)?;
        }

        diesel::delete(node::table.filter(node::id.eq(node_id))).execute(conn)?;
        self.heartbeats.lock().remove(&node_id);
        Ok(())
    }
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_hash_is_deterministic() {
        let key = "abc123";
        assert_eq!(hash_api_key(key), hash_api_key(key));
        assert_ne!(hash_api_key(key), hash_api_key("other"));
    }
}
