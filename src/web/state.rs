//! Shared application state handed to every actix-web handler via
//! `web::Data<AppState>`. Replaces the teacher's actor-based `StateImpl` +
//! `SyncExecutor` pair (spec.md §9 "avoid module-scope mutable globals" --
//! this is the one mutable-ish thing handlers need, and it's all `Arc`s over
//! already-synchronized collaborators).

use crate::config::Config;
use crate::db;
use crate::http_requester::HttpRequesterFactory;
use crate::mediators::PauseGate;
use crate::node_coordinator::NodeCoordinator;
use crate::provisioner::{PodProvider, Provisioner};
use crate::queue::Queue;

use slog::Logger;
use std::sync::Arc;

pub struct AppState {
    pub pool: db::Pool,
    pub queue: Arc<Queue>,
    pub coordinator: Arc<NodeCoordinator>,
    pub provisioner: Arc<Provisioner<Box<dyn PodProvider>>>,
    pub config: Arc<Config>,
    pub log: Logger,
    /// Acquired by the feed-discovery background loop; the
    /// `/api/feeds/{id}/refresh` endpoint runs discovery inline on the
    /// request thread, so it doesn't need to touch this itself, but it's
    /// kept here so future admin endpoints (a manual "pause discovery") have
    /// a place to reach it without threading a new argument through.
    pub discovery_pause: PauseGate,
    pub http_requester_factory: Box<dyn HttpRequesterFactory>,
}

impl AppState {
    pub fn conn(&self) -> crate::errors::Result<db::Connection> {
        self.pool.get().map_err(crate::errors::Error::Pool)
    }
}
