use serde::Deserialize;

/// Every runtime knob named in spec.md §6.3, read once at boot via `envy`
/// and never mutated afterward (spec.md §9: "avoid module-scope mutable
/// globals"). Generalizes the teacher's scattered `env::var("DATABASE_URL")`
/// calls in `main.rs` into one typed struct.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// The externally reachable base URL pods use to call back into
    /// `/api/runpod/pods/{instance_id}/setup-status` (spec.md §4.6 step 4).
    /// Distinct from `bind_addr` since the server usually binds a private
    /// address behind a reverse proxy or tunnel.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default = "default_pool_min_size")]
    pub pool_min_size: u32,
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    #[serde(default = "default_temp_download_path")]
    pub temp_download_path: String,

    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    #[serde(default = "default_max_transcript_download_workers")]
    pub max_transcript_download_workers: usize,
    #[serde(default = "default_stuck_threshold_minutes")]
    pub stuck_threshold_minutes: i64,
    #[serde(default = "default_remote_job_timeout_minutes")]
    pub remote_job_timeout_minutes: i64,

    #[serde(default = "default_transcript_unavailable_age_days")]
    pub transcript_unavailable_age_days: i64,
    #[serde(default = "default_transcript_retry_days")]
    pub transcript_retry_days: i64,

    #[serde(default = "default_node_heartbeat_timeout_seconds")]
    pub node_heartbeat_timeout_seconds: i64,
    #[serde(default = "default_node_required_empty_checks")]
    pub node_required_empty_checks: u32,
    #[serde(default = "default_node_empty_queue_wait_seconds")]
    pub node_empty_queue_wait_seconds: u64,
    #[serde(default = "default_node_idle_timeout_minutes")]
    pub node_idle_timeout_minutes: i64,
    #[serde(default = "default_node_server_unreachable_minutes")]
    pub node_server_unreachable_minutes: i64,
    #[serde(default = "default_node_max_consecutive_failures")]
    pub node_max_consecutive_failures: u32,

    #[serde(default = "default_runpod_scale_threshold")]
    pub runpod_scale_threshold: i64,
    #[serde(default = "default_runpod_max_pods")]
    pub runpod_max_pods: u32,
    pub runpod_api_key: Option<String>,

    #[serde(default = "default_whisper_chunk_threshold_minutes")]
    pub whisper_chunk_threshold_minutes: i64,

    /// External CLI invoked by the local `Transcribe` worker (spec.md §4.4.3
    /// "ASR engines themselves... out of scope"). Must accept an audio path
    /// and write `Segment` JSON to stdout.
    #[serde(default = "default_asr_command")]
    pub asr_command: String,
    #[serde(default = "default_asr_source")]
    pub asr_source: String,
    #[serde(default = "default_asr_model")]
    pub asr_model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// External CLI invoked by the `Embed` worker, reading phrase text on
    /// stdin and writing a JSON float vector to stdout.
    #[serde(default = "default_embedding_command")]
    pub embedding_command: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

impl Config {
    /// Loads configuration from the process environment. Mirrors the
    /// teacher's pattern of failing fast at boot on a missing `DATABASE_URL`.
    pub fn from_env() -> crate::errors::Result<Config> {
        Ok(envy::from_env::<Config>()?)
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_owned()
}
fn default_public_base_url() -> String {
    "http://localhost:8080".to_owned()
}
fn default_pool_min_size() -> u32 {
    1
}
fn default_pool_max_size() -> u32 {
    10
}
fn default_storage_path() -> String {
    "./storage".to_owned()
}
fn default_temp_download_path() -> String {
    "./storage/tmp".to_owned()
}
fn default_max_concurrent_downloads() -> usize {
    2
}
fn default_max_transcript_download_workers() -> usize {
    2
}
fn default_stuck_threshold_minutes() -> i64 {
    30
}
fn default_remote_job_timeout_minutes() -> i64 {
    30
}
fn default_transcript_unavailable_age_days() -> i64 {
    14
}
fn default_transcript_retry_days() -> i64 {
    14
}
fn default_node_heartbeat_timeout_seconds() -> i64 {
    60
}
fn default_node_required_empty_checks() -> u32 {
    2
}
fn default_node_empty_queue_wait_seconds() -> u64 {
    60
}
fn default_node_idle_timeout_minutes() -> i64 {
    10
}
fn default_node_server_unreachable_minutes() -> i64 {
    5
}
fn default_node_max_consecutive_failures() -> u32 {
    3
}
fn default_runpod_scale_threshold() -> i64 {
    5
}
fn default_runpod_max_pods() -> u32 {
    3
}
fn default_whisper_chunk_threshold_minutes() -> i64 {
    30
}
fn default_asr_command() -> String {
    "transcribercore-asr".to_owned()
}
fn default_asr_source() -> String {
    "whisper".to_owned()
}
fn default_asr_model() -> String {
    "whisper-large-v3".to_owned()
}
fn default_embedding_dimensions() -> usize {
    384
}
fn default_embedding_command() -> String {
    "transcribercore-embed".to_owned()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_owned()
}
fn default_http_timeout_seconds() -> u64 {
    30
}
