//! Deterministic failure fingerprinting.
//!
//! The same logical failure always produces the same key, regardless of the
//! variable data (ids, timestamps, emails, source positions) embedded in it.
//! The digest is a dedup hint, not a security boundary: it is a truncated
//! SHA-1 and collisions are tolerated.

use regex::Regex;
use sha1::{Digest, Sha1};
use std::sync::LazyLock;

use crate::types::{ErrorDetails, FailureContext};

/// Length of the hex fingerprint.
pub const FINGERPRINT_LEN: usize = 16;

/// Application frames kept from a stack.
const MAX_FRAMES: usize = 5;

/// Call sites used for the stack signature.
const SIGNATURE_FRAMES: usize = 3;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?",
    )
    .unwrap()
});

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4,}").unwrap());

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// `:line` or `:line:column` suffixes on a source path.
static POSITION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d+(?::\d+)?").unwrap());

/// Numbered Rust backtrace entries (`  3: crate::module::fn`).
static NUMBERED_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+:\s+").unwrap());

/// Path fragments that mark third-party or runtime frames.
const VENDORED_MARKERS: &[&str] = &[
    "node_modules",
    "/vendor/",
    ".cargo/registry",
    "/rustc/",
    "site-packages",
    "internal/",
    "<anonymous>",
    "std::",
    "core::",
    "tokio::",
];

/// Replace variable data in a message with placeholders and collapse whitespace.
#[must_use]
pub fn normalize_message(message: &str) -> String {
    let normalized = UUID_RE.replace_all(message, "<uuid>");
    let normalized = TIMESTAMP_RE.replace_all(&normalized, "<timestamp>");
    let normalized = EMAIL_RE.replace_all(&normalized, "<email>");
    let normalized = DIGITS_RE.replace_all(&normalized, "<id>");
    WHITESPACE_RE
        .replace_all(normalized.trim(), " ")
        .into_owned()
}

/// Replace id-like path segments in a route and drop any query string.
///
/// `/api/orders/123?expand=items` becomes `/api/orders/:id`.
#[must_use]
pub fn normalize_route(route: &str) -> String {
    let path = route.split('?').next().unwrap_or(route);
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                ":id"
            } else if UUID_RE.is_match(segment) && segment.len() == 36 {
                ":uuid"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_frame(line: &str) -> bool {
    line.starts_with("at ") || line.starts_with("File \"") || NUMBERED_FRAME_RE.is_match(line)
}

fn is_vendored(line: &str) -> bool {
    VENDORED_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Keep the first application frames of a stack with source positions removed.
///
/// A Rust backtrace prints each frame's `at <path>` location on the line after
/// the numbered frame. Those lines are dropped so only function names remain.
#[must_use]
pub fn normalize_stack(stack: &str) -> Vec<String> {
    let mut after_numbered = false;
    stack
        .lines()
        .map(str::trim)
        .filter(|line| {
            let location = after_numbered && line.starts_with("at ");
            after_numbered = NUMBERED_FRAME_RE.is_match(line);
            !location && is_frame(line) && !is_vendored(line)
        })
        .map(|line| POSITION_RE.replace_all(line, "").into_owned())
        .take(MAX_FRAMES)
        .collect()
}

/// Extract the call-site name from a normalized frame.
fn call_site(frame: &str) -> &str {
    let frame = NUMBERED_FRAME_RE
        .find(frame)
        .map_or(frame, |m| &frame[m.end()..]);
    let frame = frame.strip_prefix("at ").unwrap_or(frame);
    if let Some(rest) = frame.strip_prefix("File \"") {
        // Python: File "path", line N, in function
        return rest.rsplit(", in ").next().unwrap_or(rest).trim();
    }
    match frame.find(" (") {
        Some(idx) => frame[..idx].trim(),
        None => frame.trim(),
    }
}

/// Short signature from the first call-site names of a normalized stack.
#[must_use]
pub fn stack_signature(frames: &[String]) -> String {
    frames
        .iter()
        .take(SIGNATURE_FRAMES)
        .map(|f| call_site(f))
        .collect::<Vec<_>>()
        .join(">")
}

/// Compute the fingerprint of an error in its context.
#[must_use]
pub fn generate(error: &ErrorDetails, context: &FailureContext) -> String {
    let frames = normalize_stack(&error.stack);
    let material = [
        error.name.as_str(),
        &normalize_message(&error.message),
        error.code.as_deref().unwrap_or(""),
        &stack_signature(&frames),
        &normalize_route(&context.route),
        context.method.as_str(),
    ]
    .join("|");

    let mut hasher = Sha1::new();
    hasher.update(material.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..FINGERPRINT_LEN].to_string()
}

/// Cheap "close enough to consider" ratio.
///
/// Returns 1.0 for identical strings, otherwise the number of positions where
/// both strings hold the same character divided by the longer length.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    let matching = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matching as f64 / longest as f64
}
