//! Lenient JSON extraction from model output
//!
//! Models wrap JSON in ```json fences, bare ``` fences or surrounding prose,
//! and sometimes put literal newlines inside string values. The planner and
//! validator both go through [`extract_json`].

use regex::Regex;
use serde::de::DeserializeOwned;

lazy_static::lazy_static! {
    /// A fence line: optional indent, three backticks, optional language tag.
    static ref FENCE_RE: Regex =
        Regex::new(r"(?m)^[ \t]*```[ \t]*([A-Za-z0-9_-]*)[ \t]*$").expect("valid regex");
}

/// Try to deserialize a `T` from arbitrary model output.
///
/// Order: fenced blocks (```json first, then bare ```), the whole trimmed
/// content, then balanced top-level `{...}`/`[...]` candidates.
pub fn extract_json<T: DeserializeOwned>(content: &str) -> Option<T> {
    for block in extract_code_fence_blocks(content) {
        if let Some(v) = parse_candidate(&block) {
            return Some(v);
        }
    }

    if let Some(v) = parse_candidate(content) {
        return Some(v);
    }

    extract_balanced_json_structures(content)
        .into_iter()
        .find_map(|c| parse_candidate(&c))
}

fn parse_candidate<T: DeserializeOwned>(candidate: &str) -> Option<T> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<T>(trimmed) {
        Ok(v) => Some(v),
        Err(_) => {
            let normalized = escape_unescaped_newlines_in_json_strings(trimmed);
            serde_json::from_str::<T>(&normalized).ok()
        }
    }
}

/// Extract fenced blocks. Labeled ```json blocks come before bare ones.
///
/// A block ends only on a closing fence line that is exactly ``` (plus
/// whitespace), so backticks inside string values don't truncate it.
fn extract_code_fence_blocks(content: &str) -> Vec<String> {
    let fences: Vec<(usize, usize, String)> = FENCE_RE
        .captures_iter(content)
        .filter_map(|c| {
            let m = c.get(0)?;
            let tag = c.get(1).map(|t| t.as_str().to_ascii_lowercase()).unwrap_or_default();
            Some((m.start(), m.end(), tag))
        })
        .collect();

    let mut labeled = Vec::new();
    let mut bare = Vec::new();
    let mut i = 0;
    while i + 1 < fences.len() {
        let (_, open_end, ref tag) = fences[i];
        let (close_start, _, ref close_tag) = fences[i + 1];
        if !close_tag.is_empty() {
            // Two opening fences in a row; the first one was never closed.
            i += 1;
            continue;
        }
        let body = content[open_end..close_start].to_string();
        if tag == "json" {
            labeled.push(body);
        } else {
            bare.push(body);
        }
        i += 2;
    }

    // Single-line fences such as ```json [..] ``` are common with small models.
    if labeled.is_empty() && bare.is_empty() {
        if let Some(start) = content.find("```") {
            let rest = &content[start + 3..];
            let rest = rest
                .strip_prefix("json")
                .or_else(|| rest.strip_prefix("JSON"))
                .unwrap_or(rest);
            if let Some(end) = rest.find("```") {
                bare.push(rest[..end].to_string());
            }
        }
    }

    labeled.extend(bare);
    labeled
}

/// Extract top-level `{ ... }` or `[ ... ]` candidates by scanning with brace/bracket balancing.
///
/// Respects JSON strings and escapes, so braces inside strings don't affect balancing.
fn extract_balanced_json_structures(content: &str) -> Vec<String> {
    let mut out = Vec::new();

    let mut in_string = false;
    let mut escape = false;
    let mut depth: i32 = 0;
    let mut start: Option<usize> = None;

    for (i, ch) in content.char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if depth > 0 => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' | ']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            out.push(content[s..=i].to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    out
}

/// Escape literal `\n`/`\r` found inside JSON string literals.
fn escape_unescaped_newlines_in_json_strings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape = false;

    for ch in input.chars() {
        if in_string {
            if escape {
                out.push(ch);
                escape = false;
                continue;
            }
            match ch {
                '\\' => {
                    out.push(ch);
                    escape = true;
                }
                '"' => {
                    out.push(ch);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
            if ch == '"' {
                in_string = true;
            }
        }
    }

    out
}
