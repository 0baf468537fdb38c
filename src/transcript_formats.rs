//! Transcript format codecs (spec.md §6.2). Specific ASR/provider decoders
//! are out of scope; this module only covers the round-trip conversions the
//! `/api/episodes/{id}/transcript?format=` endpoint needs between the
//! canonical stored markdown and WebVTT/SRT/plain-text/JSON.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub title: String,
    pub source: String,
    pub model: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Markdown,
    Vtt,
    Srt,
    Txt,
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Format> {
        match s {
            "md" => Some(Format::Markdown),
            "vtt" => Some(Format::Vtt),
            "srt" => Some(Format::Srt),
            "txt" => Some(Format::Txt),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

/// The stored canonical format: a leading metadata block (title, source,
/// model) followed by segment lines prefixed by `[HH:MM:SS]` (spec.md §6.2).
pub fn to_markdown(t: &Transcript) -> String {
    let mut out = String::new();
    writeln!(out, "---").unwrap();
    writeln!(out, "title: {}", t.title).unwrap();
    writeln!(out, "source: {}", t.source).unwrap();
    if let Some(model) = &t.model {
        writeln!(out, "model: {}", model).unwrap();
    }
    writeln!(out, "---").unwrap();
    writeln!(out).unwrap();
    for seg in &t.segments {
        writeln!(out, "[{}] {}", format_hms(seg.start), seg.text).unwrap();
    }
    out
}

pub fn from_markdown(input: &str) -> Transcript {
    let mut title = String::new();
    let mut source = String::new();
    let mut model = None;
    let mut segments = Vec::new();

    let mut lines = input.lines();
    if lines.clone().next() == Some("---") {
        lines.next();
        for line in lines.by_ref() {
            if line == "---" {
                break;
            }
            if let Some(v) = line.strip_prefix("title: ") {
                title = v.to_owned();
            } else if let Some(v) = line.strip_prefix("source: ") {
                source = v.to_owned();
            } else if let Some(v) = line.strip_prefix("model: ") {
                model = Some(v.to_owned());
            }
        }
    }

    for line in lines {
        if let Some(rest) = line.strip_prefix('[') {
            if let Some((ts, text)) = rest.split_once(']') {
                let start = parse_hms(ts.trim());
                segments.push(Segment {
                    start,
                    end: start,
                    text: text.trim().to_owned(),
                });
            }
        }
    }

    Transcript {
        title,
        source,
        model,
        segments,
    }
}

pub fn to_vtt(t: &Transcript) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for seg in &t.segments {
        writeln!(out, "{} --> {}", format_vtt_ts(seg.start), format_vtt_ts(seg.end)).unwrap();
        writeln!(out, "{}\n", seg.text).unwrap();
    }
    out
}

/// Inverse of `to_vtt`. The cue identifier line WebVTT allows before the
/// timing line is optional and carries no information this crate keeps, so
/// it's skipped rather than parsed. Title/source/model aren't representable
/// in VTT; callers that need them track them out of band.
pub fn from_vtt(input: &str) -> Transcript {
    let mut segments = Vec::new();
    for block in input.split("\n\n") {
        let block = block.trim();
        if block.is_empty() || block.starts_with("WEBVTT") {
            continue;
        }
        let mut lines = block.lines();
        let mut timing_line = lines.next().unwrap_or("");
        if !timing_line.contains("-->") {
            timing_line = lines.next().unwrap_or("");
        }
        if let Some((start_s, end_s)) = timing_line.split_once("-->") {
            let text = lines.collect::<Vec<_>>().join("\n");
            if !text.is_empty() {
                segments.push(Segment {
                    start: parse_vtt_ts(start_s.trim()),
                    end: parse_vtt_ts(end_s.trim()),
                    text,
                });
            }
        }
    }
    Transcript {
        segments,
        ..Transcript::default()
    }
}

pub fn to_srt(t: &Transcript) -> String {
    let mut out = String::new();
    for (i, seg) in t.segments.iter().enumerate() {
        writeln!(out, "{}", i + 1).unwrap();
        writeln!(out, "{} --> {}", format_srt_ts(seg.start), format_srt_ts(seg.end)).unwrap();
        writeln!(out, "{}\n", seg.text).unwrap();
    }
    out
}

/// Inverse of `to_srt`. The leading cue-number line is skipped the same way
/// `from_vtt` skips VTT's optional cue identifier.
pub fn from_srt(input: &str) -> Transcript {
    let mut segments = Vec::new();
    for block in input.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut lines = block.lines();
        let first = lines.next().unwrap_or("");
        let timing_line = if first.trim().parse::<u32>().is_ok() {
            lines.next().unwrap_or("")
        } else {
            first
        };
        if let Some((start_s, end_s)) = timing_line.split_once("-->") {
            let text = lines.collect::<Vec<_>>().join("\n");
            if !text.is_empty() {
                segments.push(Segment {
                    start: parse_srt_ts(start_s.trim()),
                    end: parse_srt_ts(end_s.trim()),
                    text,
                });
            }
        }
    }
    Transcript {
        segments,
        ..Transcript::default()
    }
}

pub fn to_txt(t: &Transcript) -> String {
    t.segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Inverse of `to_txt`. Plain text carries no timing, so every recovered
/// segment's `start`/`end` is `0.0` -- this format is lossy by construction,
/// not a bug in the parser.
pub fn from_txt(input: &str) -> Transcript {
    let segments = input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Segment {
            start: 0.0,
            end: 0.0,
            text: line.to_owned(),
        })
        .collect();
    Transcript {
        segments,
        ..Transcript::default()
    }
}

#[derive(Serialize, Deserialize)]
struct JsonDoc {
    segments: Vec<Segment>,
}

pub fn to_json(t: &Transcript) -> crate::errors::Result<String> {
    Ok(serde_json::to_string(&JsonDoc {
        segments: t.segments.clone(),
    })?)
}

/// Inverse of `to_json`; spec.md §6.2's `{segments: [{start, end, text}]}`.
pub fn from_json(input: &str) -> crate::errors::Result<Transcript> {
    let doc: JsonDoc = serde_json::from_str(input)?;
    Ok(Transcript {
        segments: doc.segments,
        ..Transcript::default()
    })
}

pub fn render(t: &Transcript, format: Format) -> crate::errors::Result<String> {
    Ok(match format {
        Format::Markdown => to_markdown(t),
        Format::Vtt => to_vtt(t),
        Format::Srt => to_srt(t),
        Format::Txt => to_txt(t),
        Format::Json => to_json(t)?,
    })
}

/// Inverse of `render`.
pub fn parse(format: Format, input: &str) -> crate::errors::Result<Transcript> {
    Ok(match format {
        Format::Markdown => from_markdown(input),
        Format::Vtt => from_vtt(input),
        Format::Srt => from_srt(input),
        Format::Txt => from_txt(input),
        Format::Json => from_json(input)?,
    })
}

fn format_hms(seconds: f64) -> String {
    let total = seconds.round() as i64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

fn parse_hms(s: &str) -> f64 {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        return 0.0;
    }
    let h: f64 = parts[0].parse().unwrap_or(0.0);
    let m: f64 = parts[1].parse().unwrap_or(0.0);
    let sec: f64 = parts[2].parse().unwrap_or(0.0);
    h * 3600.0 + m * 60.0 + sec
}

fn format_vtt_ts(seconds: f64) -> String {
    let ms = ((seconds - seconds.floor()) * 1000.0).round() as i64;
    let total = seconds.floor() as i64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total / 3600,
        (total % 3600) / 60,
        total % 60,
        ms
    )
}

fn format_srt_ts(seconds: f64) -> String {
    format_vtt_ts(seconds).replace('.', ",")
}

/// Inverse of `format_vtt_ts`. Accepts both the `HH:MM:SS.mmm` form this
/// crate emits and WebVTT's permitted shorter `MM:SS.mmm` form.
fn parse_vtt_ts(s: &str) -> f64 {
    let (hms, frac) = s.split_once('.').unwrap_or((s, "0"));
    let ms: f64 = frac.parse().unwrap_or(0.0);
    let parts: Vec<&str> = hms.split(':').collect();
    let (h, m, sec) = match parts.len() {
        3 => (
            parts[0].parse().unwrap_or(0.0),
            parts[1].parse().unwrap_or(0.0),
            parts[2].parse().unwrap_or(0.0),
        ),
        2 => (0.0, parts[0].parse().unwrap_or(0.0), parts[1].parse().unwrap_or(0.0)),
        _ => (0.0, 0.0, 0.0),
    };
    h * 3600.0 + m * 60.0 + sec + ms / 1000.0
}

/// Inverse of `format_srt_ts`.
fn parse_srt_ts(s: &str) -> f64 {
    parse_vtt_ts(&s.replace(',', "."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transcript {
        Transcript {
            title: "Episode 1".to_owned(),
            source: "whisper".to_owned(),
            model: Some("base".to_owned()),
            segments: vec![
                Segment {
                    start: 0.0,
                    end: 2.5,
                    text: "Hello there.".to_owned(),
                },
                Segment {
                    start: 2.5,
                    end: 5.0,
                    text: "General Kenobi.".to_owned(),
                },
            ],
        }
    }

    #[test]
    fn test_markdown_round_trip() {
        let t = sample();
        let rendered = to_markdown(&t);
        let parsed = from_markdown(&rendered);
        assert_eq!(parsed.title, t.title);
        assert_eq!(parsed.source, t.source);
        assert_eq!(parsed.segments.len(), t.segments.len());
        assert_eq!(parsed.segments[0].text, t.segments[0].text);
        assert!((parsed.segments[1].start - t.segments[1].start).abs() < 0.01);
    }

    #[test]
    fn test_vtt_contains_header_and_timestamps() {
        let t = sample();
        let vtt = to_vtt(&t);
        assert!(vtt.starts_with("WEBVTT"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:02.500"));
    }

    #[test]
    fn test_vtt_round_trip() {
        let t = sample();
        let parsed = from_vtt(&to_vtt(&t));
        assert_eq!(parsed.segments.len(), t.segments.len());
        for (p, e) in parsed.segments.iter().zip(t.segments.iter()) {
            assert_eq!(&p.text, &e.text);
            assert!((p.start - e.start).abs() < 0.01);
            assert!((p.end - e.end).abs() < 0.01);
        }
    }

    #[test]
    fn test_srt_uses_comma_decimal() {
        let t = sample();
        let srt = to_srt(&t);
        assert!(srt.contains("00:00:00,000 --> 00:00:02,500"));
    }

    #[test]
    fn test_srt_round_trip() {
        let t = sample();
        let parsed = from_srt(&to_srt(&t));
        assert_eq!(parsed.segments.len(), t.segments.len());
        for (p, e) in parsed.segments.iter().zip(t.segments.iter()) {
            assert_eq!(&p.text, &e.text);
            assert!((p.start - e.start).abs() < 0.01);
            assert!((p.end - e.end).abs() < 0.01);
        }
    }

    #[test]
    fn test_txt_round_trip_preserves_text() {
        let t = sample();
        let parsed = from_txt(&to_txt(&t));
        assert_eq!(parsed.segments.len(), t.segments.len());
        for (p, e) in parsed.segments.iter().zip(t.segments.iter()) {
            assert_eq!(&p.text, &e.text);
        }
    }

    #[test]
    fn test_json_round_trip() {
        let t = sample();
        let json = to_json(&t).unwrap();
        let parsed = from_json(&json).unwrap();
        assert_eq!(parsed.segments.len(), t.segments.len());
        for (p, e) in parsed.segments.iter().zip(t.segments.iter()) {
            assert_eq!(&p.text, &e.text);
            assert!((p.start - e.start).abs() < 0.01);
            assert!((p.end - e.end).abs() < 0.01);
        }
    }

    #[test]
    fn test_parse_dispatches_by_format() {
        let t = sample();
        let rendered = render(&t, Format::Vtt).unwrap();
        let parsed = parse(Format::Vtt, &rendered).unwrap();
        assert_eq!(parsed.segments.len(), t.segments.len());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("md"), Some(Format::Markdown));
        assert_eq!(Format::parse("bogus"), None);
    }
}
