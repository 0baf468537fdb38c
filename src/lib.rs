#[macro_use]
extern crate diesel;
#[macro_use]
extern crate slog;

pub mod config;
pub mod db;
pub mod episode_fsm;
pub mod errors;
pub mod feed_parser;
pub mod http_requester;
pub mod logging;
pub mod mediators;
pub mod model;
pub mod node_coordinator;
pub mod provisioner;
pub mod queue;
pub mod retry_scheduler;

// Generated file: skip rustfmt
#[cfg_attr(rustfmt, rustfmt_skip)]
pub mod schema;

pub mod storage;
pub mod time_helpers;
pub mod transcript_formats;
pub mod web;

#[cfg(test)]
pub mod test_helpers;
