//! Text field sanitization
//!
//! Applied to the action identifier and to every externally sourced string copied
//! into an outbound event (correlation id, client ids).

use regex::Regex;
use std::sync::OnceLock;

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>?").expect("static regex"))
}

fn octet_pattern() -> &'static Regex {
    static OCTETS: OnceLock<Regex> = OnceLock::new();
    OCTETS.get_or_init(|| Regex::new(r"%[a-fA-F0-9]{2}").expect("static regex"))
}

/// Strip markup, percent-encoded octets and control whitespace from a single-line field
///
/// Runs of whitespace collapse to one space and the result is trimmed.
pub fn sanitize_text(input: &str) -> String {
    let without_tags = tag_pattern().replace_all(input, "");
    let without_octets = octet_pattern().replace_all(&without_tags, "");

    let mut out = String::with_capacity(without_octets.len());
    let mut pending_space = false;
    for ch in without_octets.chars() {
        if ch.is_whitespace() || ch.is_control() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    out
}
