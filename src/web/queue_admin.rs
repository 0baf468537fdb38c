//! `/api/queue` (spec.md §6.1): manual enqueue endpoints (the UI's explicit
//! "retry" button, spec.md §7 "re-try is always an explicit user action")
//! plus the status summary.

use crate::errors::Error;
use crate::model::JobKind;
use crate::web::errors::WebError;
use crate::web::state::AppState;

use actix_web::{get, post, web, HttpResponse};
use serde::Serialize;

async fn enqueue(state: web::Data<AppState>, episode_id: i64, kind: JobKind, priority: i32) -> Result<HttpResponse, WebError> {
    let job = web::block(move || -> crate::errors::Result<crate::model::Job> {
        let mut conn = state.conn()?;
        state.queue.enqueue(&mut conn, episode_id, kind, priority)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::Accepted().json(serde_json::json!({ "job_id": job.id, "status": format!("{:?}", job.status) })))
}

#[post("/api/queue/episodes/{id}/process")]
pub async fn process(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    enqueue(state, path.into_inner(), JobKind::Download, 3).await
}

#[post("/api/queue/episodes/{id}/transcribe")]
pub async fn transcribe(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    enqueue(state, path.into_inner(), JobKind::Transcribe, 3).await
}

#[post("/api/queue/episodes/{id}/transcript-download")]
pub async fn transcript_download(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    enqueue(state, path.into_inner(), JobKind::TranscriptDownload, 1).await
}

#[derive(Serialize)]
struct StatusRow {
    kind: String,
    status: String,
    count: i64,
}

/// Counts grouped by `(kind, status)`, per spec.md §6.1 "Counts by kind and
/// status".
#[get("/api/queue/status")]
pub async fn status(state: web::Data<AppState>) -> Result<HttpResponse, WebError> {
    let rows = web::block(move || -> crate::errors::Result<Vec<(JobKind, crate::model::JobStatus, i64)>> {
        let mut conn = state.conn()?;
        state.queue.status_counts(&mut conn)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    let out: Vec<StatusRow> = rows
        .into_iter()
        .map(|(kind, status, count)| StatusRow {
            kind: format!("{:?}", kind),
            status: format!("{:?}", status),
            count,
        })
        .collect();

    Ok(HttpResponse::Ok().json(out))
}
