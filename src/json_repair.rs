//! Best-effort repair of JSON returned by a language model.
//!
//! Models wrap JSON in Markdown fences, add a sentence before or after it, or
//! get cut off by their token limit in the middle of an element. [`repair`]
//! undoes those three things and then asks `serde_json` whether the result
//! parses. Anything else is left to the caller's retry loop.

use crate::error::{IngestError, Result};
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^```(?:json)?\s*").unwrap());
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").unwrap());
static TRAILING_JUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\[\]{}\w\s/.\-:,"']+$"#).unwrap());

/// Repair `raw` into a parseable JSON document.
///
/// Steps, in order:
/// 1. strip a leading ```` ```json ```` / ```` ``` ```` fence and the closing fence
/// 2. drop text before the first `[` or `{`
/// 3. trim trailing commas, whitespace and characters that cannot end JSON
/// 4. cut a string element left open by truncation back to the last complete element
/// 5. drop text after the first complete value, or append the missing closers
///
/// # Errors
///
/// [`IngestError::JsonRepair`] when there is no array or object to work with,
/// or when the repaired text still does not parse.
pub fn repair(raw: &str) -> Result<String> {
    let unfenced = strip_fence(raw.trim());
    if serde_json::from_str::<Value>(unfenced).is_ok() {
        return Ok(unfenced.to_string());
    }

    let start = unfenced.find(['[', '{']).ok_or_else(|| {
        IngestError::JsonRepair(format!(
            "no JSON array or object in {:?}",
            truncate_for_log(raw, 80)
        ))
    })?;
    let body = trim_tail(&unfenced[start..]);
    let mut candidate = trim_tail(&TRAILING_JUNK.replace(body, "")).to_string();

    if let Scan::Open {
        in_string: true,
        last_boundary,
        ..
    } = scan(&candidate)
    {
        candidate.truncate(last_boundary.unwrap_or(0));
        candidate = trim_tail(&candidate).to_string();
    }

    let repaired = match scan(&candidate) {
        Scan::Complete(end) => candidate[..end].to_string(),
        Scan::Open { closers, .. } => {
            let mut closed = trim_tail(&candidate).to_string();
            closed.extend(closers.iter().rev());
            closed
        }
    };

    serde_json::from_str::<Value>(&repaired).map_err(|e| {
        IngestError::JsonRepair(format!("{e} in {:?}", truncate_for_log(&repaired, 80)))
    })?;
    Ok(repaired)
}

fn strip_fence(s: &str) -> &str {
    let s = match FENCE_OPEN.find(s) {
        Some(m) => &s[m.end()..],
        None => s,
    };
    let s = match FENCE_CLOSE.find(s) {
        Some(m) => &s[..m.start()],
        None => s,
    };
    s.trim()
}

fn trim_tail(s: &str) -> &str {
    s.trim_end_matches(|c: char| c.is_whitespace() || c == ',')
}

enum Scan {
    /// The first value closes at this byte offset.
    Complete(usize),
    /// Input ended with brackets still open.
    Open {
        closers: Vec<char>,
        in_string: bool,
        /// Offset where the input can be cut without splitting an element.
        last_boundary: Option<usize>,
    },
}

/// Walk `s` (which starts with `[` or `{`) tracking strings and open brackets.
fn scan(s: &str) -> Scan {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_boundary = None;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => {
                closers.push(']');
                last_boundary = Some(i + 1);
            }
            '{' => {
                closers.push('}');
                last_boundary = Some(i + 1);
            }
            ']' | '}' => {
                if closers.last() == Some(&c) {
                    closers.pop();
                }
                if closers.is_empty() {
                    return Scan::Complete(i + 1);
                }
            }
            ',' => last_boundary = Some(i),
            _ => {}
        }
    }

    Scan::Open {
        closers,
        in_string,
        last_boundary,
    }
}
