//! The HTTP surface (spec.md §6.1): a JSON REST API served by actix-web 4,
//! replacing the teacher's iron + actix 0.5 actor-based server and its
//! server-rendered HTML/GraphQL views (`web::endpoints`, `web::middleware`).
//! Diesel calls run on actix-web's blocking threadpool via `web::block`
//! rather than through a `SyncArbiter`-hosted actor, since that pattern was
//! retired along with actix 0.5.

pub mod episodes;
pub mod errors;
pub mod feeds;
pub mod nodes;
pub mod queue_admin;
pub mod runpod;
pub mod state;

use state::AppState;

use actix_web::{get, web, App, HttpResponse, HttpServer};
use slog::Logger;
use tracing_actix_web::TracingLogger;

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Builds and runs the HTTP server until shut down. Mirrors the teacher's
/// `WebServer::run` boot log line and bind-address handling.
pub async fn run(log: Logger, state: web::Data<AppState>) -> std::io::Result<()> {
    let bind_addr = state.config.bind_addr.clone();
    info!(log, "Web server starting"; "host" => bind_addr.as_str());

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .service(health)
            .service(feeds::create)
            .service(feeds::destroy)
            .service(feeds::refresh)
            .service(episodes::transcript)
            .service(episodes::delete_audio)
            .service(queue_admin::process)
            .service(queue_admin::transcribe)
            .service(queue_admin::transcript_download)
            .service(queue_admin::status)
            .service(nodes::register)
            .service(nodes::heartbeat)
            .service(nodes::claim)
            .service(nodes::job_audio)
            .service(nodes::complete)
            .service(nodes::fail)
            .service(nodes::release)
            .service(nodes::request_termination)
            .service(runpod::create)
            .service(runpod::terminate)
            .service(runpod::report_status)
            .service(runpod::get_status)
    })
    .bind(bind_addr)?
    .run()
    .await
}
