//! `/api/episodes` (spec.md §6.1): transcript download (with format
//! conversion) and audio deletion.

use crate::errors::Error;
use crate::model::Episode;
use crate::schema::episode;
use crate::transcript_formats::{self, Format};
use crate::web::errors::WebError;
use crate::web::state::AppState;

use actix_web::{delete, get, web, HttpResponse};
use diesel::prelude::*;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct TranscriptQuery {
    pub format: Option<String>,
}

fn content_type(format: Format) -> &'static str {
    match format {
        Format::Markdown => "text/markdown; charset=utf-8",
        Format::Vtt => "text/vtt; charset=utf-8",
        Format::Srt => "application/x-subrip; charset=utf-8",
        Format::Txt => "text/plain; charset=utf-8",
        Format::Json => "application/json",
    }
}

/// Converts the stored markdown transcript to the requested format on the
/// fly; nothing is cached on disk in a second format (spec.md §6.2).
#[get("/api/episodes/{id}/transcript")]
pub async fn transcript(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<TranscriptQuery>,
) -> Result<HttpResponse, WebError> {
    let episode_id = path.into_inner();
    let format = Format::parse(query.format.as_deref().unwrap_or("md"))
        .ok_or_else(|| Error::Message(format!("unknown transcript format: {:?}", query.format)))?;

    let rendered = web::block(move || -> crate::errors::Result<String> {
        let mut conn = state.conn()?;
        let ep: Episode = episode::table
            .filter(episode::id.eq(episode_id))
            .first(&mut conn)
            .map_err(|_| Error::NotFound(format!("episode {}", episode_id)))?;

        let transcript_path = ep
            .transcript_path
            .ok_or_else(|| Error::NotFound(format!("episode {} has no transcript yet", episode_id)))?;

        let raw = std::fs::read_to_string(transcript_path)?;
        let parsed = transcript_formats::from_markdown(&raw);
        transcript_formats::render(&parsed, format)
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::Ok().content_type(content_type(format)).body(rendered))
}

/// Deletes the downloaded audio file for an episode and clears `audio_path`,
/// keeping the transcript (spec.md §6.1 "Delete audio, keep transcript").
#[delete("/api/episodes/{id}/audio")]
pub async fn delete_audio(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    let episode_id = path.into_inner();

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        let ep: Episode = episode::table
            .filter(episode::id.eq(episode_id))
            .first(&mut conn)
            .map_err(|_| Error::NotFound(format!("episode {}", episode_id)))?;

        if let Some(audio_path) = &ep.audio_path {
            if std::path::Path::new(audio_path).exists() {
                std::fs::remove_file(audio_path)?;
            }
        }

        diesel::update(episode::table.filter(episode::id.eq(episode_id)))
            .set(episode::audio_path.eq(Option::<String>::None))
            .execute(&mut conn)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}
