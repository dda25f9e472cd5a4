//! Date pattern rendering
//!
//! Watermark date formats are written as Unicode date patterns
//! (`yyyy-MM-dd HH:mm`), the notation photo tools and the settings file use.
//! They are translated once into a chrono strftime string. A pattern that
//! already contains `%` is taken to be strftime and used as-is.

use chrono::NaiveDateTime;
use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;
use tracing::warn;

/// Used when a pattern cannot be rendered by chrono
const FALLBACK_STRFTIME: &str = "%Y-%m-%d";

static TOKEN_PATTERN: OnceLock<Regex> = OnceLock::new();

fn token_pattern() -> &'static Regex {
    TOKEN_PATTERN.get_or_init(|| {
        Regex::new(r"'(?:[^']|'')*'|y+|M+|d+|H+|h+|m+|s+|S+|a+|E+|[A-Za-z]|[^A-Za-z']+|'")
            .unwrap()
    })
}

/// A date pattern compiled to strftime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    source: String,
    strftime: String,
}

impl DatePattern {
    /// Compile a Unicode date pattern (or pass a strftime pattern through)
    pub fn new(pattern: &str) -> Self {
        let strftime = if pattern.contains('%') {
            pattern.to_string()
        } else {
            translate(pattern)
        };

        Self {
            source: pattern.to_string(),
            strftime,
        }
    }

    /// The strftime string chrono will render with
    pub fn strftime(&self) -> &str {
        &self.strftime
    }

    /// Render a timestamp; an unrenderable pattern falls back to `yyyy-MM-dd`
    pub fn format(&self, timestamp: &NaiveDateTime) -> String {
        let mut out = String::new();
        if write!(out, "{}", timestamp.format(&self.strftime)).is_ok() {
            return out;
        }

        warn!(pattern = %self.source, "Date pattern cannot be rendered, using {}", FALLBACK_STRFTIME);
        timestamp.format(FALLBACK_STRFTIME).to_string()
    }
}

fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);

    for token in token_pattern().find_iter(pattern) {
        let token = token.as_str();
        let first = token.chars().next().unwrap_or_default();
        let len = token.chars().count();

        match first {
            '\'' => {
                if token == "''" {
                    out.push('\'');
                } else if len >= 2 {
                    let inner = &token[1..token.len() - 1];
                    out.push_str(&inner.replace("''", "'"));
                }
                // A lone unterminated quote is dropped
            }
            'y' => out.push_str(if len == 2 { "%y" } else { "%Y" }),
            'M' => out.push_str(match len {
                1 => "%-m",
                2 => "%m",
                3 => "%b",
                _ => "%B",
            }),
            'd' => out.push_str(if len == 1 { "%-d" } else { "%d" }),
            'H' => out.push_str(if len == 1 { "%-H" } else { "%H" }),
            'h' => out.push_str(if len == 1 { "%-I" } else { "%I" }),
            'm' => out.push_str(if len == 1 { "%-M" } else { "%M" }),
            's' => out.push_str(if len == 1 { "%-S" } else { "%S" }),
            'S' => out.push_str(match len {
                1..=3 => "%3f",
                4..=6 => "%6f",
                _ => "%9f",
            }),
            'a' => out.push_str("%p"),
            'E' => out.push_str(if len >= 4 { "%A" } else { "%a" }),
            _ => out.push_str(token),
        }
    }

    out
}
