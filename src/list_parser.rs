// ── PassGFW List Parser (C5) ────────────────────────────────────────────────
// Extracts `[]CandidateEntry` from any document fetched for a `file`-method
// URL (spec §4.5, §6.3). Tries strategies in order, returns on the first one
// that yields at least one well-formed entry. Never throws — on total failure
// it returns an empty vector and has no side effects (spec §8.1 property 9).

use base64::Engine as _;
use scraper::{Html, Selector};

use crate::model::{CandidateEntry, Method};

const MARKER: &str = "*PGFW*";

/// Try every strategy in spec order; return the first non-empty result.
pub fn parse_candidate_list(body: &str) -> Vec<CandidateEntry> {
    if let Some(entries) = try_marker_framing(body) {
        if !entries.is_empty() {
            return entries;
        }
    }
    if let Some(entries) = try_structured(body) {
        if !entries.is_empty() {
            return entries;
        }
    }
    if is_html(body) {
        if let Some(extract) = extract_html_block(body) {
            if let Some(entries) = try_marker_framing(&extract) {
                if !entries.is_empty() {
                    return entries;
                }
            }
            if let Some(entries) = try_structured(&extract) {
                if !entries.is_empty() {
                    return entries;
                }
            }
        }
    }
    line_oriented(body)
}

/// Strategy 1: base64 between the first two occurrences of `*PGFW*`, decoded
/// bytes must parse as a raw JSON array (strategy 2).
fn try_marker_framing(body: &str) -> Option<Vec<CandidateEntry>> {
    let start = body.find(MARKER)?;
    let after_start = start + MARKER.len();
    let end_rel = body[after_start..].find(MARKER)?;
    let encoded = &body[after_start..after_start + end_rel];
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    parse_raw_json_array(&text)
}

/// Strategies 2 and 3, tried in order.
fn try_structured(body: &str) -> Option<Vec<CandidateEntry>> {
    if let Some(entries) = parse_raw_json_array(body) {
        return Some(entries);
    }
    parse_wrapped_json(body)
}

/// Strategy 2: raw JSON array of entry objects.
fn parse_raw_json_array(text: &str) -> Option<Vec<CandidateEntry>> {
    serde_json::from_str::<Vec<CandidateEntry>>(text.trim()).ok()
}

/// Strategy 3: legacy `{ "urls": [...] }` wrapper.
fn parse_wrapped_json(text: &str) -> Option<Vec<CandidateEntry>> {
    #[derive(serde::Deserialize)]
    struct Wrapped {
        urls: Vec<CandidateEntry>,
    }
    serde_json::from_str::<Wrapped>(text.trim())
        .ok()
        .map(|w| w.urls)
}

fn is_html(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("<html") || lower.contains("<!doctype")
}

/// Strategy 4: inner text of the first `<pre>`, `<code>`, or
/// `<script type="application/json">` element, with HTML entities decoded.
///
/// Parsed with `scraper` (the teacher's HTML-extraction crate, see
/// `engine/web.rs`'s `Html::parse_document` + `Selector` pattern) rather than
/// hand-rolled regex scanning — `ElementRef::text()` decodes entities as part
/// of walking the parsed DOM, so there is no separate entity table to get wrong.
fn extract_html_block(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("script[type='application/json'], pre, code").ok()?;
    let element = document.select(&selector).next()?;
    let text: String = element.text().collect();
    Some(text)
}

/// Strategy 5: every non-empty, non-`#`-prefixed line starting with
/// `http://` or `https://` becomes `{method: api, url: line, store: false}`.
fn line_oriented(body: &str) -> Vec<CandidateEntry> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(|line| CandidateEntry::new(Method::Api, line.to_string()))
        .collect()
}
