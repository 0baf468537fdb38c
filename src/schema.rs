use crate::model::{
    EpisodeStatusMapping, FailureReasonMapping, JobKindMapping, JobStatusMapping,
    NodeStatusMapping, PodSetupPhaseMapping,
};

table! {
    schema_version (id) {
        id -> Int8,
        version -> Int8,
        applied_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;

    feed (id) {
        id -> Int8,
        url -> Text,
        slug -> Text,
        title -> Text,
        title_override -> Nullable<Text>,
        author -> Nullable<Text>,
        site_link_url -> Nullable<Text>,
        category_tags -> Array<Text>,
        itunes_id -> Nullable<Text>,
        pocketcasts_show_uuid -> Nullable<Text>,
        paused -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::EpisodeStatusMapping;

    episode (id) {
        id -> Int8,
        feed_id -> Int8,
        guid -> Text,
        title -> Text,
        audio_url -> Text,
        transcript_url -> Nullable<Text>,
        transcript_mime -> Nullable<Text>,
        external_transcript_url -> Nullable<Text>,
        published_at -> Timestamptz,
        duration_seconds -> Nullable<Int4>,
        audio_path -> Nullable<Text>,
        transcript_path -> Nullable<Text>,
        transcript_source -> Nullable<Text>,
        transcript_model -> Nullable<Text>,
        status -> EpisodeStatusMapping,
        transcript_checked_at -> Nullable<Timestamptz>,
        next_transcript_retry_at -> Nullable<Timestamptz>,
        transcript_failure_reason -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::{JobKindMapping, JobStatusMapping, FailureReasonMapping};

    job (id) {
        id -> Int8,
        episode_id -> Int8,
        kind -> JobKindMapping,
        priority -> Int4,
        status -> JobStatusMapping,
        attempts -> Int4,
        max_attempts -> Int4,
        scheduled_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        progress_percent -> Int4,
        error_message -> Nullable<Text>,
        failure_reason -> Nullable<FailureReasonMapping>,
        assigned_node_id -> Nullable<Text>,
        claimed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::NodeStatusMapping;

    node (id) {
        id -> Uuid,
        display_name -> Text,
        reachable_url -> Nullable<Text>,
        api_key_hash -> Text,
        declared_model -> Nullable<Text>,
        status -> NodeStatusMapping,
        last_heartbeat -> Nullable<Timestamptz>,
        current_job_id -> Nullable<Int8>,
        priority -> Int4,
        persistent -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use super::PodSetupPhaseMapping;

    pod_setup_state (id) {
        id -> Int8,
        instance_id -> Text,
        pod_id -> Nullable<Text>,
        persistent -> Bool,
        phase -> PodSetupPhaseMapping,
        step_log -> Array<Text>,
        error_message -> Nullable<Text>,
        node_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    use diesel::sql_types::*;
    use pgvector::sql_types::Vector;

    embedding_record (id) {
        id -> Int8,
        episode_id -> Int8,
        segment_start -> Float8,
        segment_end -> Float8,
        text_hash -> Text,
        model_name -> Text,
        embedding -> Vector,
        created_at -> Timestamptz,
    }
}

joinable!(episode -> feed (feed_id));
joinable!(job -> episode (episode_id));
joinable!(embedding_record -> episode (episode_id));
joinable!(pod_setup_state -> node (node_id));

allow_tables_to_appear_in_same_query!(
    feed,
    episode,
    job,
    node,
    pod_setup_state,
    embedding_record,
    schema_version,
);
