//! Ephemeral GPU lifecycle manager (C6, spec.md §4.6). Models
//! `PodSetupState` and its phase transitions the way
//! `Mr-soloDev-halldyll-starter`'s `runpod_state.rs` models RunPod pod
//! lifecycle -- a small, pure, serializable state plus a trait-based store
//! producing an idempotent plan from an observation -- but persisted in
//! Postgres (the `pod_setup_state` table) rather than a local JSON file,
//! since this state must survive the *server's* restarts and be queryable,
//! not just a single CLI invocation's.

use crate::errors::{Error, Result};
use crate::model::{self, PodSetupPhase, PodSetupState};
use crate::schema::pod_setup_state;

use chrono::Utc;
use diesel::prelude::*;
use rand::Rng;
use serde::Deserialize;

/// The external RunPod API, kept behind a trait per spec.md's "treated as
/// external collaborators, interfaces only" -- mirrors the teacher's
/// `HttpRequesterFactory` split between a live implementation and a
/// swappable test double.
pub trait PodProvider: Send + Sync {
    fn create(&self, template: &PodTemplate) -> Result<String>;
    fn terminate(&self, pod_id: &str) -> Result<()>;
    fn status(&self, pod_id: &str) -> Result<ProviderPodStatus>;
}

#[derive(Debug, Clone)]
pub struct PodTemplate {
    pub gpu_family: String,
    pub image: String,
    pub networking_secret_ref: String,
    pub callback_url: String,
    pub startup_script_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPodStatus {
    Running,
    Pending,
    Terminated,
    Unknown,
}

/// Live RunPod REST client, the only production `PodProvider`. Shaped after
/// `http_requester::HttpRequesterLive` -- a thin `reqwest::blocking::Client`
/// wrapper, errors mapped through `Error::Http`/`Error::Json` rather than a
/// bespoke error type.
pub struct RunPodProvider {
    api_key: String,
    client: reqwest::blocking::Client,
}

impl RunPodProvider {
    /// `timeout` is the same configured bound as every other outbound HTTP
    /// client in the crate (spec.md §5 "HTTP client operations use a bounded
    /// request timeout, default 30 s") -- RunPod calls are no exception.
    pub fn new(api_key: String, timeout: std::time::Duration) -> RunPodProvider {
        RunPodProvider {
            api_key,
            client: reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

#[derive(Deserialize)]
struct CreatePodResponse {
    id: String,
}

#[derive(Deserialize)]
struct PodStatusResponse {
    #[serde(rename = "desiredStatus")]
    desired_status: String,
}

impl PodProvider for RunPodProvider {
    fn create(&self, template: &PodTemplate) -> Result<String> {
        let body = serde_json::json!({
            "cloudType": "SECURE",
            "gpuTypeId": template.gpu_family,
            "imageName": template.image,
            "dockerArgs": "",
            "env": [
                {"key": "TRANSCRIBERCORE_CALLBACK_URL", "value": template.callback_url},
                {"key": "TRANSCRIBERCORE_NETWORK_SECRET_REF", "value": template.networking_secret_ref},
                {"key": "TRANSCRIBERCORE_STARTUP_SCRIPT_ID", "value": template.startup_script_id},
            ],
        });

        let res = self
            .client
            .post("https://api.runpod.io/v2/pods")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(Error::Http)?;

        if !res.status().is_success() {
            return Err(Error::Message(format!("runpod create failed with status {}", res.status())));
        }
        let parsed: CreatePodResponse = res.json().map_err(Error::Http)?;
        Ok(parsed.id)
    }

    fn terminate(&self, pod_id: &str) -> Result<()> {
        let res = self
            .client
            .delete(format!("https://api.runpod.io/v2/pods/{}", pod_id))
            .bearer_auth(&self.api_key)
            .send()
            .map_err(Error::Http)?;
        if !res.status().is_success() {
            return Err(Error::Message(format!("runpod terminate failed with status {}", res.status())));
        }
        Ok(())
    }

    fn status(&self, pod_id: &str) -> Result<ProviderPodStatus> {
        let res = self
            .client
            .get(format!("https://api.runpod.io/v2/pods/{}", pod_id))
            .bearer_auth(&self.api_key)
            .send()
            .map_err(Error::Http)?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(ProviderPodStatus::Terminated);
        }
        if !res.status().is_success() {
            return Ok(ProviderPodStatus::Unknown);
        }
        let parsed: PodStatusResponse = res.json().map_err(Error::Http)?;
        Ok(match parsed.desired_status.as_str() {
            "RUNNING" => ProviderPodStatus::Running,
            "PENDING" | "RESTARTING" => ProviderPodStatus::Pending,
            "TERMINATED" | "EXITED" => ProviderPodStatus::Terminated,
            _ => ProviderPodStatus::Unknown,
        })
    }
}

/// Default preferred GPU + a blocklist (Ada Lovelace consumer cards are
/// known-incompatible with some ASR backends, spec.md §4.6 "GPU selection").
pub struct GpuSelector {
    pub preferred: Vec<String>,
    pub blocklist: Vec<String>,
}

impl Default for GpuSelector {
    fn default() -> Self {
        GpuSelector {
            preferred: vec![
                "NVIDIA A100".to_owned(),
                "NVIDIA A40".to_owned(),
                "NVIDIA RTX A6000".to_owned(),
            ],
            blocklist: vec![
                "NVIDIA GeForce RTX 4090".to_owned(),
                "NVIDIA GeForce RTX 4080".to_owned(),
            ],
        }
    }
}

impl GpuSelector {
    /// Falls back through the ordered preference list, skipping blocked
    /// types, per spec.md §4.6.
    pub fn select(&self) -> Option<&str> {
        self.preferred
            .iter()
            .find(|gpu| !self.blocklist.contains(gpu))
            .map(|s| s.as_str())
    }
}

impl PodProvider for Box<dyn PodProvider> {
    fn create(&self, template: &PodTemplate) -> Result<String> {
        (**self).create(template)
    }
    fn terminate(&self, pod_id: &str) -> Result<()> {
        (**self).terminate(pod_id)
    }
    fn status(&self, pod_id: &str) -> Result<ProviderPodStatus> {
        (**self).status(pod_id)
    }
}

pub struct Provisioner<P: PodProvider> {
    provider: P,
    gpu_selector: GpuSelector,
}

impl<P: PodProvider> Provisioner<P> {
    pub fn new(provider: P) -> Provisioner<P> {
        Provisioner {
            provider,
            gpu_selector: GpuSelector::default(),
        }
    }

    /// Step 1-2 of spec.md §4.6's creation pipeline: assigns an instance id,
    /// persists an initial `creating` setup state, and calls the provider.
    /// The remaining steps (poll until running, wait for pod callbacks,
    /// smoke test) are driven by `advance`/`record_callback` as the pod
    /// reports in, so a server restart mid-provision doesn't orphan
    /// visibility (the whole point of persisting this in Postgres).
    pub fn create(
        &self,
        conn: &mut PgConnection,
        persistent: bool,
        server_url: &str,
    ) -> Result<PodSetupState> {
        let instance_id = generate_instance_id();
        let gpu = self
            .gpu_selector
            .select()
            .ok_or_else(|| crate::errors::Error::Message("no eligible GPU family available".to_owned()))?;

        let template = PodTemplate {
            gpu_family: gpu.to_owned(),
            image: "transcribercore/node:latest".to_owned(),
            networking_secret_ref: "transcribercore-node-secret".to_owned(),
            callback_url: format!("{}/api/runpod/pods/{}/setup-status", server_url, instance_id),
            startup_script_id: "node-bootstrap".to_owned(),
        };

        let pod_id = self.provider.create(&template)?;

        let ins = model::insertable::PodSetupState {
            instance_id: instance_id.clone(),
            pod_id: Some(pod_id),
            persistent,
            phase: PodSetupPhase::Starting,
            step_log: vec!["creating: requested pod from provider".to_owned()],
        };

        let state: PodSetupState = diesel::insert_into(pod_setup_state::table)
            .values(&ins)
            .get_result(conn)?;
        Ok(state)
    }

    /// Terminates the backing instance and clears its setup state (spec.md
    /// §4.5 "Termination request": "clears setup state").
    pub fn terminate(&self, conn: &mut PgConnection, pod_id: &str) -> Result<()> {
        self.provider.terminate(pod_id)?;
        diesel::delete(pod_setup_state::table.filter(pod_setup_state::pod_id.eq(pod_id))).execute(conn)?;
        Ok(())
    }
}

/// Advances a setup state to the next phase as the pod calls back into
/// `/api/runpod/pods/{instance_id}/setup-status` (spec.md §4.6 step 4).
/// Appends to the structured step log rather than overwriting it.
pub fn advance(
    conn: &mut PgConnection,
    instance_id: &str,
    phase: PodSetupPhase,
    note: &str,
) -> Result<PodSetupState> {
    let current: PodSetupState = pod_setup_state::table
        .filter(pod_setup_state::instance_id.eq(instance_id))
        .first(conn)?;

    let mut step_log = current.step_log.clone();
    step_log.push(format!("{:?}: {}", phase, note));

    let state = diesel::update(pod_setup_state::table.filter(pod_setup_state::id.eq(current.id)))
        .set((
            pod_setup_state::phase.eq(phase),
            pod_setup_state::step_log.eq(step_log),
            pod_setup_state::updated_at.eq(Utc::now()),
        ))
        .get_result(conn)?;
    Ok(state)
}

/// Marks a setup state `failed` with a structured error (spec.md §4.6 step 5,
/// and §4.6 "Smoke test": "a failed smoke test marks the pod failed so it
/// never consumes real jobs").
pub fn mark_failed(conn: &mut PgConnection, instance_id: &str, error: &str) -> Result<()> {
    diesel::update(pod_setup_state::table.filter(pod_setup_state::instance_id.eq(instance_id)))
        .set((
            pod_setup_state::phase.eq(PodSetupPhase::Failed),
            pod_setup_state::error_message.eq(error),
            pod_setup_state::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn attach_node(conn: &mut PgConnection, instance_id: &str, node_id: uuid::Uuid) -> Result<()> {
    diesel::update(pod_setup_state::table.filter(pod_setup_state::instance_id.eq(instance_id)))
        .set((
            pod_setup_state::phase.eq(PodSetupPhase::Ready),
            pod_setup_state::node_id.eq(node_id),
            pod_setup_state::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

fn generate_instance_id() -> String {
    let mut rng = rand::thread_rng();
    let n: u32 = rng.gen_range(0..0xFFFF_FFFF);
    format!("inst-{:08x}", n)
}

/// Auto-scaling decision (spec.md §4.6 "Auto-scaling"): start one pod per
/// crossing of `scale_threshold`, never exceeding `max_pods`.
pub fn should_scale_up(transcribe_queue_depth: i64, live_pods: u32, scale_threshold: i64, max_pods: u32) -> bool {
    transcribe_queue_depth > scale_threshold && live_pods < max_pods
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_selector_skips_blocked() {
        let sel = GpuSelector {
            preferred: vec!["A".to_owned(), "B".to_owned()],
            blocklist: vec!["A".to_owned()],
        };
        assert_eq!(sel.select(), Some("B"));
    }

    #[test]
    fn test_should_scale_up() {
        assert!(should_scale_up(10, 1, 5, 3));
        assert!(!should_scale_up(10, 3, 5, 3));
        assert!(!should_scale_up(3, 0, 5, 3));
    }
}
