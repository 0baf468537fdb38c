use std::error::Error as StdError;

/// The crate-wide error type. Stage handlers that need a categorical failure
/// reason for the queue use `StageError` instead (see `queue::FailureReason`);
/// this type is for everything else -- programming errors and anything that
/// should bubble all the way out of a mediator and be logged.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("database migration error: {0}")]
    Migration(#[from] Box<dyn StdError + Send + Sync>),

    #[error("database connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("config error: {0}")]
    Config(#[from] envy::Error),

    #[error("schema version {found} is newer than this binary understands (max {max})")]
    SchemaVersionMismatch { found: i64, max: i64 },

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Walks `Error::source()` and collects a message per link, most-recent (the
/// original cause) first. Named for parity with the `error_strings` helper
/// this replaces; used by the CLI's error printer and the HTTP error mapper.
pub fn error_chain_strings(error: &Error) -> Vec<String> {
    let mut strings = vec![error.to_string()];
    let mut cause = error.source();
    while let Some(err) = cause {
        strings.push(err.to_string());
        cause = err.source();
    }
    strings
}
