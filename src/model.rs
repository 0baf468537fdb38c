//! The application's data layer containing models that will be queried from
//! and inserted into the database.
//!
//! Simple helper functions are allowed, but they should be kept extremely
//! simple, with preference for any and all domain logic to be offloaded to a
//! mediator.
//!
//! Insertable models are found in the `insertable` module. These are distinct
//! from queryable models so that we can take advantage of default values
//! provided by the database (the best example being ID sequences, but applies
//! to any field with a `DEFAULT`).

use crate::schema;

use chrono::{DateTime, Utc};
use diesel_derive_enum::DbEnum;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[DbValueStyle = "snake_case"]
pub enum JobKind {
    TranscriptDownload,
    Download,
    Transcribe,
    Embed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[DbValueStyle = "snake_case"]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[DbValueStyle = "snake_case"]
pub enum FailureReason {
    DownloadFailed,
    TranscriptForbidden,
    TranscriptNotFound,
    TranscriptRequestError,
    TranscribeFailed,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[DbValueStyle = "snake_case"]
pub enum EpisodeStatus {
    New,
    AwaitingTranscript,
    NeedsAudio,
    Downloading,
    AudioReady,
    Transcribing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[DbValueStyle = "snake_case"]
pub enum NodeStatus {
    Online,
    Busy,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, DbEnum)]
#[DbValueStyle = "snake_case"]
pub enum PodSetupPhase {
    Creating,
    Starting,
    Booting,
    Installing,
    SmokeTesting,
    Registering,
    Ready,
    Failed,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::feed)]
pub struct Feed {
    pub id:                     i64,
    pub url:                    String,
    pub slug:                   String,
    pub title:                  String,
    pub title_override:         Option<String>,
    pub author:                 Option<String>,
    pub site_link_url:          Option<String>,
    pub category_tags:          Vec<String>,
    pub itunes_id:              Option<String>,
    pub pocketcasts_show_uuid:  Option<String>,
    pub paused:                 bool,
    pub created_at:             DateTime<Utc>,
    pub updated_at:             DateTime<Utc>,
}

impl Feed {
    /// `override if present else original`, per spec.md §3.1.
    pub fn display_title(&self) -> &str {
        self.title_override.as_deref().unwrap_or(&self.title)
    }
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::episode)]
pub struct Episode {
    pub id:                         i64,
    pub feed_id:                    i64,
    pub guid:                       String,
    pub title:                      String,
    pub audio_url:                  String,
    pub transcript_url:             Option<String>,
    pub transcript_mime:            Option<String>,
    pub external_transcript_url:    Option<String>,
    pub published_at:               DateTime<Utc>,
    pub duration_seconds:           Option<i32>,
    pub audio_path:                 Option<String>,
    pub transcript_path:            Option<String>,
    pub transcript_source:          Option<String>,
    pub transcript_model:           Option<String>,
    pub status:                     EpisodeStatus,
    pub transcript_checked_at:      Option<DateTime<Utc>>,
    pub next_transcript_retry_at:   Option<DateTime<Utc>>,
    pub transcript_failure_reason:  Option<String>,
    pub created_at:                 DateTime<Utc>,
    pub updated_at:                 DateTime<Utc>,
}

impl Episode {
    pub fn age_days(&self) -> i64 {
        (Utc::now() - self.published_at).num_days()
    }
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::job)]
pub struct Job {
    pub id:                i64,
    pub episode_id:        i64,
    pub kind:              JobKind,
    pub priority:          i32,
    pub status:            JobStatus,
    pub attempts:          i32,
    pub max_attempts:      i32,
    pub scheduled_at:      DateTime<Utc>,
    pub started_at:        Option<DateTime<Utc>>,
    pub completed_at:      Option<DateTime<Utc>>,
    pub progress_percent:  i32,
    pub error_message:     Option<String>,
    pub failure_reason:    Option<FailureReason>,
    pub assigned_node_id:  Option<String>,
    pub claimed_at:        Option<DateTime<Utc>>,
    pub created_at:        DateTime<Utc>,
    pub updated_at:        DateTime<Utc>,
}

pub const LOCAL_NODE_ID: &str = "local";

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::node)]
pub struct Node {
    pub id:             Uuid,
    pub display_name:   String,
    pub reachable_url:  Option<String>,
    pub api_key_hash:   String,
    pub declared_model: Option<String>,
    pub status:         NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub current_job_id: Option<i64>,
    pub priority:       i32,
    pub persistent:     bool,
    pub created_at:     DateTime<Utc>,
    pub updated_at:     DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::pod_setup_state)]
pub struct PodSetupState {
    pub id:            i64,
    pub instance_id:   String,
    pub pod_id:        Option<String>,
    pub persistent:    bool,
    pub phase:         PodSetupPhase,
    pub step_log:      Vec<String>,
    pub error_message: Option<String>,
    pub node_id:       Option<Uuid>,
    pub created_at:    DateTime<Utc>,
    pub updated_at:    DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable, Identifiable)]
#[diesel(table_name = schema::embedding_record)]
pub struct EmbeddingRecord {
    pub id:             i64,
    pub episode_id:     i64,
    pub segment_start:  f64,
    pub segment_end:    f64,
    pub text_hash:      String,
    pub model_name:     String,
    pub embedding:      pgvector::Vector,
    pub created_at:     DateTime<Utc>,
}

#[derive(Clone, Debug, Queryable)]
pub struct SchemaVersion {
    pub id:         i64,
    pub version:    i64,
    pub applied_at: DateTime<Utc>,
}

pub mod insertable {
    use super::{EpisodeStatus, FailureReason, JobKind, JobStatus, NodeStatus, PodSetupPhase};
    use crate::schema;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    #[derive(Insertable)]
    #[diesel(table_name = schema::feed)]
    pub struct Feed {
        pub url:                   String,
        pub slug:                  String,
        pub title:                 String,
        pub title_override:        Option<String>,
        pub author:                Option<String>,
        pub site_link_url:         Option<String>,
        pub category_tags:         Vec<String>,
        pub itunes_id:             Option<String>,
        pub pocketcasts_show_uuid: Option<String>,
        pub paused:                bool,
    }

    #[derive(Insertable)]
    #[diesel(table_name = schema::episode)]
    pub struct Episode {
        pub feed_id:                 i64,
        pub guid:                    String,
        pub title:                   String,
        pub audio_url:               String,
        pub transcript_url:          Option<String>,
        pub transcript_mime:         Option<String>,
        pub external_transcript_url: Option<String>,
        pub published_at:            DateTime<Utc>,
        pub duration_seconds:        Option<i32>,
        pub status:                  EpisodeStatus,
    }

    #[derive(Insertable)]
    #[diesel(table_name = schema::job)]
    pub struct Job {
        pub episode_id:   i64,
        pub kind:         JobKind,
        pub priority:     i32,
        pub status:       JobStatus,
        pub attempts:     i32,
        pub max_attempts: i32,
        pub scheduled_at: DateTime<Utc>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = schema::node)]
    pub struct Node {
        pub id:             Uuid,
        pub display_name:   String,
        pub reachable_url:  Option<String>,
        pub api_key_hash:   String,
        pub declared_model: Option<String>,
        pub status:         NodeStatus,
        pub priority:       i32,
        pub persistent:     bool,
    }

    #[derive(Insertable)]
    #[diesel(table_name = schema::pod_setup_state)]
    pub struct PodSetupState {
        pub instance_id: String,
        pub pod_id:      Option<String>,
        pub persistent:  bool,
        pub phase:       PodSetupPhase,
        pub step_log:    Vec<String>,
    }

    #[derive(Insertable)]
    #[diesel(table_name = schema::embedding_record)]
    pub struct EmbeddingRecord {
        pub episode_id:    i64,
        pub segment_start: f64,
        pub segment_end:   f64,
        pub text_hash:     String,
        pub model_name:    String,
        pub embedding:     pgvector::Vector,
    }
}
