//! `/api/feeds` (spec.md §6.1): add, trash, and trigger discovery for a feed.

use crate::mediators::feed_discovery;
use crate::model::Feed;
use crate::schema::feed;
use crate::storage;
use crate::web::errors::WebError;
use crate::web::state::AppState;

use actix_web::{delete, post, web, HttpResponse};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Clone)]
pub struct AddFeedRequest {
    pub url: String,
    pub title_override: Option<String>,
}

#[derive(Serialize)]
pub struct FeedResponse {
    pub id: i64,
    pub url: String,
    pub slug: String,
    pub title: String,
}

impl From<Feed> for FeedResponse {
    fn from(f: Feed) -> FeedResponse {
        FeedResponse {
            id: f.id,
            url: f.url,
            slug: f.slug,
            title: f.title,
        }
    }
}

/// Adds a feed by URL, fetches it once synchronously to learn its title,
/// then immediately runs a first discovery pass so the caller sees episodes
/// without waiting for the next periodic crawl (spec.md §6.1 "Add feed").
#[post("/api/feeds")]
pub async fn create(state: web::Data<AppState>, body: web::Json<AddFeedRequest>) -> Result<HttpResponse, WebError> {
    let state = state.into_inner();
    let body = body.into_inner();

    let fd = web::block({
        let state = state.clone();
        let body = body.clone();
        move || -> crate::errors::Result<Feed> {
            let mut requester = state.http_requester_factory.create();
            let doc = feed_parser_fetch(&state, &mut *requester, &body.url)?;

            let mut conn = state.conn()?;
            let slug = slugify(body.title_override.as_deref().unwrap_or(&doc.title));

            let ins = crate::model::insertable::Feed {
                url: body.url.clone(),
                slug,
                title: doc.title,
                title_override: body.title_override.clone(),
                author: None,
                site_link_url: None,
                category_tags: Vec::new(),
                itunes_id: None,
                pocketcasts_show_uuid: None,
                paused: false,
            };

            let fd: Feed = diesel::insert_into(feed::table).values(&ins).get_result(&mut conn)?;
            Ok(fd)
        }
    })
    .await
    .map_err(|e| crate::errors::Error::Message(e.to_string()))??;

    let fd_for_discovery = fd.clone();
    let discovery_state = state.clone();
    web::block(move || {
        feed_discovery::refresh_feed_by_id(
            &discovery_state.log,
            &discovery_state.pool,
            &discovery_state.queue,
            &*discovery_state.http_requester_factory,
            fd_for_discovery.id,
        )
    })
    .await
    .map_err(|e| crate::errors::Error::Message(e.to_string()))??;

    Ok(HttpResponse::Created().json(FeedResponse::from(fd)))
}

fn feed_parser_fetch(
    state: &AppState,
    requester: &mut dyn crate::http_requester::HttpRequester,
    url: &str,
) -> crate::errors::Result<crate::feed_parser::FeedDocument> {
    crate::feed_parser::fetch_and_parse(&state.log, requester, url)
}

fn slugify(title: &str) -> String {
    storage::sanitize_title(title).to_lowercase()
}

/// Moves the feed's audio/transcripts to trash, then deletes its DB row
/// (episode/job rows cascade, spec.md §4.9).
#[delete("/api/feeds/{id}")]
pub async fn destroy(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    let feed_id = path.into_inner();
    let storage_path = state.config.storage_path.clone();

    web::block(move || -> crate::errors::Result<()> {
        let mut conn = state.conn()?;
        let fd: Feed = feed::table.filter(feed::id.eq(feed_id)).first(&mut conn)?;
        storage::trash_feed(&storage_path, &fd.slug, fd.id)?;
        diesel::delete(feed::table.filter(feed::id.eq(feed_id))).execute(&mut conn)?;
        Ok(())
    })
    .await
    .map_err(|e| crate::errors::Error::Message(e.to_string()))??;

    Ok(HttpResponse::NoContent().finish())
}

/// Runs one discovery pass against a single feed immediately, outside the
/// periodic crawl interval (spec.md §6.1 "Trigger discovery now").
#[post("/api/feeds/{id}/refresh")]
pub async fn refresh(state: web::Data<AppState>, path: web::Path<i64>) -> Result<HttpResponse, WebError> {
    let feed_id = path.into_inner();
    let state = state.into_inner();

    let num_new = web::block(move || {
        feed_discovery::refresh_feed_by_id(
            &state.log,
            &state.pool,
            &state.queue,
            &*state.http_requester_factory,
            feed_id,
        )
    })
    .await
    .map_err(|e| crate::errors::Error::Message(e.to_string()))??;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "num_new_episodes": num_new })))
}
