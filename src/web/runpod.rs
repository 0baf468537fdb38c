//! `/api/runpod/pods` (spec.md §4.6, §6.1): create/terminate ephemeral GPU
//! pods and report setup phase. The pod itself calls the setup-status
//! endpoint as it works through its bootstrap sequence (spec.md §4.6 step 4).

use crate::errors::Error;
use crate::model::{PodSetupPhase, PodSetupState};
use crate::provisioner;
use crate::schema::pod_setup_state;
use crate::web::errors::WebError;
use crate::web::state::AppState;

use actix_web::{delete, get, post, web, HttpResponse};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct CreatePodRequest {
    #[serde(default)]
    pub persistent: bool,
}

#[derive(Serialize)]
struct PodSetupView {
    instance_id: String,
    pod_id: Option<String>,
    persistent: bool,
    phase: String,
    step_log: Vec<String>,
    error_message: Option<String>,
}

impl From<PodSetupState> for PodSetupView {
    fn from(s: PodSetupState) -> PodSetupView {
        PodSetupView {
            instance_id: s.instance_id,
            pod_id: s.pod_id,
            persistent: s.persistent,
            phase: format!("{:?}", s.phase),
            step_log: s.step_log,
            error_message: s.error_message,
        }
    }
}

#[post("/api/runpod/pods")]
pub async fn create(state: web::Data<AppState>, body: web::Json<CreatePodRequest>) -> Result<HttpResponse, WebError> {
    let persistent = body.into_inner().persistent;
    let server_url = state.config.public_base_url.clone();

    let setup = web::block(move || -> crate::errors::Result<PodSetupState> {
        let mut conn = state.conn()?;
        state.provisioner.create(&mut conn, persistent, &server_url)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::Created().json(PodSetupView::from(setup)))
}

#[delete("/api/runpod/pods/{id}")]
pub async fn terminate(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, WebError> {
    let pod_id = path.into_inner();

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        state.provisioner.terminate(&mut conn, &pod_id)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize)]
pub struct SetupStatusUpdate {
    pub phase: String,
    pub note: String,
}

fn parse_phase(s: &str) -> crate::errors::Result<PodSetupPhase> {
    Ok(match s {
        "creating" => PodSetupPhase::Creating,
        "starting" => PodSetupPhase::Starting,
        "booting" => PodSetupPhase::Booting,
        "installing" => PodSetupPhase::Installing,
        "smoke_testing" => PodSetupPhase::SmokeTesting,
        "registering" => PodSetupPhase::Registering,
        "ready" => PodSetupPhase::Ready,
        "failed" => PodSetupPhase::Failed,
        other => return Err(Error::Message(format!("unknown pod setup phase: {}", other))),
    })
}

/// The pod's own bootstrap process posts its progress here as it moves
/// through creating → starting → booting → installing → smoke_testing →
/// registering → ready (spec.md §4.6 step 4).
#[post("/api/runpod/pods/{instance_id}/setup-status")]
pub async fn report_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetupStatusUpdate>,
) -> Result<HttpResponse, WebError> {
    let instance_id = path.into_inner();
    let body = body.into_inner();
    let phase = parse_phase(&body.phase)?;

    let setup = web::block(move || -> crate::errors::Result<PodSetupState> {
        let mut conn = state.conn()?;
        provisioner::advance(&mut conn, &instance_id, phase, &body.note)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::Ok().json(PodSetupView::from(setup)))
}

#[get("/api/runpod/pods/{instance_id}/setup-status")]
pub async fn get_status(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, WebError> {
    let instance_id = path.into_inner();

    let setup = web::block(move || -> crate::errors::Result<PodSetupState> {
        let mut conn = state.conn()?;
        pod_setup_state::table
            .filter(pod_setup_state::instance_id.eq(&instance_id))
            .first(&mut conn)
            .map_err(|_| Error::NotFound(format!("pod setup state {}", instance_id)))
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::Ok().json(PodSetupView::from(setup)))
}
