//! Maps the crate-wide `Error` onto HTTP responses. Replaces the teacher's
//! `web::errors` (which rendered an HTML error page via `horrorshow`) with a
//! flat `{"error": "<message>"}` JSON body (spec.md §6.4), since this surface
//! is a JSON API, not a server-rendered site.

use crate::errors::Error;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Newtype so `Error` (defined in a module with no actix-web dependency) can
/// implement `ResponseError` here without an orphan-rule violation; handlers
/// map with `.map_err(WebError)?`.
pub struct WebError(pub Error);

impl std::fmt::Debug for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Error> for WebError {
    fn from(e: Error) -> WebError {
        WebError(e)
    }
}

impl ResponseError for WebError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::InvalidTransition(_) => StatusCode::CONFLICT,
            Error::Database(diesel::result::Error::NotFound) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.0.to_string(),
        })
    }
}
