//! `/api/nodes` (spec.md §4.5, §6.1): remote node registration, heartbeat,
//! job claim, audio streaming, and job result submission. Every endpoint but
//! `register` requires the `X-Transcriber-Key` header (spec.md §6.1
//! "Node-scoped endpoints require header X-Transcriber-Key; others are
//! considered trusted-network").

use crate::errors::Error;
use crate::model::{self, EpisodeStatus, FailureReason, Job, JobKind};
use crate::schema::{episode, feed, job};
use crate::storage;
use crate::transcript_formats::{self, Segment, Transcript};
use crate::web::errors::WebError;
use crate::web::state::AppState;

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const API_KEY_HEADER: &str = "X-Transcriber-Key";

fn api_key(req: &HttpRequest) -> crate::errors::Result<String> {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
        .ok_or_else(|| Error::Unauthorized(format!("missing {} header", API_KEY_HEADER)))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub display_name: String,
    pub declared_model: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub persistent: bool,
}

#[derive(Serialize)]
struct RegisterResponse {
    node_id: Uuid,
    api_key: String,
}

#[post("/api/nodes/register")]
pub async fn register(state: web::Data<AppState>, body: web::Json<RegisterRequest>) -> Result<HttpResponse, WebError> {
    let body = body.into_inner();
    let reg = web::block(move || {
        state
            .coordinator
            .register(&body.display_name, body.declared_model.as_deref(), body.priority, body.persistent)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::Created().json(RegisterResponse {
        node_id: reg.node_id,
        api_key: reg.api_key,
    }))
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub current_job_id: Option<i64>,
    #[serde(default)]
    pub claimed_job_ids: Vec<i64>,
}

#[post("/api/nodes/{id}/heartbeat")]
pub async fn heartbeat(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<HeartbeatRequest>,
) -> Result<HttpResponse, WebError> {
    let node_id = path.into_inner();
    let key = api_key(&req)?;
    let body = body.into_inner();

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        state.coordinator.authenticate(&mut conn, node_id, &key)?;
        state
            .coordinator
            .heartbeat(&mut conn, node_id, body.current_job_id, body.claimed_job_ids)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
pub struct ClaimRequest {
    pub kind: String,
}

#[derive(Serialize)]
struct JobView {
    id: i64,
    episode_id: i64,
    kind: String,
    priority: i32,
}

impl From<Job> for JobView {
    fn from(j: Job) -> JobView {
        JobView {
            id: j.id,
            episode_id: j.episode_id,
            kind: format!("{:?}", j.kind),
            priority: j.priority,
        }
    }
}

#[post("/api/nodes/{id}/claim")]
pub async fn claim(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ClaimRequest>,
) -> Result<HttpResponse, WebError> {
    let node_id = path.into_inner();
    let key = api_key(&req)?;
    let kind = parse_kind(&body.kind)?;

    let job = web::block(move || -> crate::errors::Result<Option<Job>> {
        let mut conn = state.conn()?;
        state.coordinator.authenticate(&mut conn, node_id, &key)?;
        state.coordinator.claim(&mut conn, node_id, kind)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::Ok().json(job.map(JobView::from)))
}

fn parse_kind(s: &str) -> crate::errors::Result<JobKind> {
    match s {
        "download" => Ok(JobKind::Download),
        "transcribe" => Ok(JobKind::Transcribe),
        "transcript_download" => Ok(JobKind::TranscriptDownload),
        "embed" => Ok(JobKind::Embed),
        other => Err(Error::Message(format!("unknown job kind: {}", other))),
    }
}

/// Streams an episode's audio straight from disk, never buffering the whole
/// file in memory (spec.md §9 "Audio streaming").
#[get("/api/nodes/jobs/{job_id}/audio")]
pub async fn job_audio(req: HttpRequest, state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    let job_id = path.into_inner();
    let key = api_key(&req)?;

    let audio_path = web::block(move || -> crate::errors::Result<String> {
        let mut conn = state.conn()?;
        state.coordinator.authenticate_by_key(&mut conn, &key)?;

        let j: Job = job::table.filter(job::id.eq(job_id)).first(&mut conn).map_err(|_| Error::NotFound(format!("job {}", job_id)))?;
        let ep: model::Episode = episode::table.filter(episode::id.eq(j.episode_id)).first(&mut conn)?;
        ep.audio_path.ok_or_else(|| Error::NotFound(format!("episode {} has no audio yet", j.episode_id)))
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    let file = actix_files::NamedFile::open_async(&audio_path)
        .await
        .map_err(|e| Error::Io(e))?;
    Ok(file.into_response(&req))
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub source: String,
    pub model: String,
    pub segments: Vec<Segment>,
}

/// Submits a finished transcript for a `Transcribe` job claimed remotely;
/// mirrors `mediators::transcribe_worker::handle`'s write path but the ASR
/// itself already ran on the node, so this only persists the result.
#[post("/api/nodes/jobs/{job_id}/complete")]
pub async fn complete(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<CompleteRequest>,
) -> Result<HttpResponse, WebError> {
    let job_id = path.into_inner();
    let key = api_key(&req)?;
    let body = body.into_inner();
    let storage_path = state.config.storage_path.clone();

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        state.coordinator.authenticate_by_key(&mut conn, &key)?;

        let j: Job = job::table.filter(job::id.eq(job_id)).first(&mut conn).map_err(|_| Error::NotFound(format!("job {}", job_id)))?;
        let (ep, fd): (model::Episode, model::Feed) = episode::table
            .inner_join(feed::table)
            .filter(episode::id.eq(j.episode_id))
            .select((episode::all_columns, feed::all_columns))
            .first(&mut conn)?;

        let transcript = Transcript {
            title: ep.title.clone(),
            source: body.source.clone(),
            model: Some(body.model.clone()),
            segments: body.segments.clone(),
        };
        let rendered = transcript_formats::to_markdown(&transcript);

        let out_path = storage::transcript_path(&storage_path, &fd.slug, ep.published_at, &ep.title);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&out_path, rendered)?;

        diesel::update(episode::table.filter(episode::id.eq(ep.id)))
            .set((
                episode::status.eq(EpisodeStatus::Completed),
                episode::transcript_path.eq(out_path.to_string_lossy().into_owned()),
                episode::transcript_source.eq(&body.source),
                episode::transcript_model.eq(&body.model),
                episode::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        state.queue.update_progress(&mut conn, job_id, 100)?;
        state.queue.complete(&mut conn, job_id)?;
        state.queue.enqueue(&mut conn, ep.id, JobKind::Embed, 5)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
pub struct FailRequest {
    pub reason: String,
    pub message: String,
}

#[post("/api/nodes/jobs/{job_id}/fail")]
pub async fn fail(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<FailRequest>,
) -> Result<HttpResponse, WebError> {
    let job_id = path.into_inner();
    let key = api_key(&req)?;
    let body = body.into_inner();

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        state.coordinator.authenticate_by_key(&mut conn, &key)?;
        state.queue.fail(&mut conn, job_id, parse_failure_reason(&body.reason), &body.message)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
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

#[post("/api/nodes/jobs/{job_id}/release")]
pub async fn release(req: HttpRequest, state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    let job_id = path.into_inner();
    let key = api_key(&req)?;

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        state.coordinator.authenticate_by_key(&mut conn, &key)?;
        state.queue.release(&mut conn, job_id)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}

/// Pod-initiated (or admin-initiated) teardown: releases the node's jobs,
/// then terminates its backing pod if one is tracked (spec.md §4.5
/// "Termination request").
#[post("/api/nodes/{id}/request-termination")]
pub async fn request_termination(req: HttpRequest, state: web::Data<AppState>, path: web::Path<Uuid>) -> Result<HttpResponse, WebError> {
    let node_id = path.into_inner();
    let key = api_key(&req)?;

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        state.coordinator.authenticate(&mut conn, node_id, &key)?;
        state.coordinator.terminate(&mut conn, node_id)?;

        use crate::schema::pod_setup_state;
        let pod_id: Option<String> = pod_setup_state::table
            .filter(pod_setup_state::node_id.eq(node_id))
            .select(pod_setup_state::pod_id)
            .first::<Option<String>>(&mut conn)
            .optional()?
            .flatten();

        if let Some(pod_id) = pod_id {
            state.provisioner.terminate(&mut conn, &pod_id)?;
        }
        Ok(())
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}

