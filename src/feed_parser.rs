//! RSS/Atom feed parsing (C7, spec.md §4.7 step 2 "XML parse"). A minimal,
//! tolerant RSS 2.0 + Podcasting-2.0 namespace reader built on `quick-xml`'s
//! pull-based `Reader`, in the spirit of the teacher's preference for small
//! hand-rolled parsers (`links.rs`) over a full-blown feed crate -- RSS in
//! the podcast ecosystem is inconsistent enough that a permissive, narrowly
//! scoped reader is easier to reason about than a generic one.

use crate::errors::{Error, Result};
use crate::http_requester::{HttpRequester, Verb};

use chrono::{DateTime, Utc};
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use slog::Logger;

#[derive(Debug, Clone, Default)]
pub struct FeedItem {
    pub guid: String,
    pub title: String,
    pub audio_url: String,
    pub published_at: DateTime<Utc>,
    pub transcript_url: Option<String>,
    pub transcript_mime: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    pub title: String,
    pub items: Vec<FeedItem>,
}

/// Parses RSS item-level `<enclosure>`, `<guid>`, `<title>`, `<pubDate>`, and
/// `<podcast:transcript>` elements. Anything else is skipped. Namespace
/// prefixes are matched by local-name suffix since feeds vary in how they
/// declare the `podcast` namespace.
pub fn parse(xml: &str) -> Result<FeedDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = FeedDocument::default();
    let mut buf = Vec::new();

    let mut in_item = false;
    let mut cur = FeedItem::default();
    let mut in_channel_title = false;
    let mut in_item_title = false;
    let mut in_pub_date = false;
    let mut in_guid = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "item" => {
                        in_item = true;
                        cur = FeedItem::default();
                    }
                    "title" if in_item => in_item_title = true,
                    "title" if !in_item => in_channel_title = true,
                    "pubDate" if in_item => in_pub_date = true,
                    "guid" if in_item => in_guid = true,
                    "enclosure" if in_item => {
                        if let Some(url) = attr(&e, b"url") {
                            cur.audio_url = url;
                        }
                    }
                    "transcript" if in_item => {
                        let url = attr(&e, b"url");
                        let mime = attr(&e, b"type");
                        if let Some(url) = url {
                            cur.transcript_url = Some(url);
                            cur.transcript_mime = mime;
                        }
                    }
                    _ => {}
                }
            }
            Ok(XmlEvent::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "enclosure" if in_item => {
                        if let Some(url) = attr(&e, b"url") {
                            cur.audio_url = url;
                        }
                    }
                    "transcript" if in_item => {
                        let url = attr(&e, b"url");
                        let mime = attr(&e, b"type");
                        if let Some(url) = url {
                            cur.transcript_url = Some(url);
                            cur.transcript_mime = mime;
                        }
                    }
                    _ => {}
                }
            }
            Ok(XmlEvent::Text(e)) => {
                let text = e.unescape().unwrap_or_default().into_owned();
                if in_item_title {
                    cur.title = text;
                } else if in_channel_title {
                    doc.title = text;
                } else if in_pub_date {
                    cur.published_at = parse_rfc822(&text).unwrap_or_else(Utc::now);
                } else if in_guid {
                    cur.guid = text;
                }
            }
            Ok(XmlEvent::End(e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_str() {
                    "item" => {
                        in_item = false;
                        if cur.guid.is_empty() {
                            cur.guid = cur.audio_url.clone();
                        }
                        doc.items.push(std::mem::take(&mut cur));
                    }
                    "title" => {
                        in_item_title = false;
                        in_channel_title = false;
                    }
                    "pubDate" => in_pub_date = false,
                    "guid" => in_guid = false,
                    _ => {}
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(Error::Message(format!("feed XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(doc)
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_owned()
}

fn attr(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    e.attributes().flatten().find(|a| a.key.as_ref() == key).map(|a| {
        String::from_utf8_lossy(&a.value).into_owned()
    })
}

fn parse_rfc822(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| DateTime::parse_from_rfc3339(s.trim()).ok().map(|dt| dt.with_timezone(&Utc)))
}

pub fn fetch_and_parse(log: &Logger, requester: &mut dyn HttpRequester, url: &str) -> Result<FeedDocument> {
    let (status, body, _) = requester.execute(log, Verb::Get, url)?;
    if status != 200 {
        return Err(Error::Message(format!("feed fetch returned status {}", status)));
    }
    parse(&String::from_utf8_lossy(&body))
}

/// Re-fetches `feed_url` and returns the current `audio_url` for the item
/// matching `guid`, used by the download worker to refresh signed URLs on
/// premium feeds before streaming (spec.md §4.4.2).
pub fn refresh_episode_audio_url(log: &Logger, feed_url: &str, guid: &str) -> Option<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent("transcribercore/1.0")
        .build()
        .ok()?;
    let body = client.get(feed_url).send().ok()?.text().ok()?;
    let doc = parse(&body).ok()?;
    doc.items
        .into_iter()
        .find(|item| item.guid == guid)
        .map(|item| item.audio_url)
        .inspect(|_| debug!(log, "Refreshed audio URL"; "guid" => guid))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<rss xmlns:podcast="https://podcastindex.org/namespace/1.0">
<channel>
<title>My Show</title>
<item>
  <title>Episode One</title>
  <guid>ep-1</guid>
  <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
  <enclosure url="https://cdn.example.com/ep1.mp3" type="audio/mpeg"/>
  <podcast:transcript url="https://cdn.example.com/ep1.vtt" type="text/vtt"/>
</item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_channel_title() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.title, "My Show");
    }

    #[test]
    fn test_parse_item_fields() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.items.len(), 1);
        let item = &doc.items[0];
        assert_eq!(item.title, "Episode One");
        assert_eq!(item.audio_url, "https://cdn.example.com/ep1.mp3");
        assert_eq!(item.transcript_url.as_deref(), Some("https://cdn.example.com/ep1.vtt"));
        assert_eq!(item.transcript_mime.as_deref(), Some("text/vtt"));
    }

    #[test]
    fn test_parse_pub_date() {
        let doc = parse(SAMPLE).unwrap();
        assert_eq!(doc.items[0].published_at.format("%Y-%m-%d").to_string(), "2024-01-01");
    }
}
