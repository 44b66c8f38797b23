//! Logging helpers: keep operator-supplied text on one log line and never
//! print a credential in full.

use std::fmt::{self, Write};

const MAX_PREVIEW: usize = 200;

/// Operator text shown on a single log line. Backslashes and control
/// characters are written as Rust's `{:?}` writes them; text past 200
/// characters is cut with an ellipsis. Formats lazily, so it can go straight
/// into a log macro.
#[derive(Debug, Clone, Copy)]
pub struct OneLine<'a>(pub &'a str);

impl fmt::Display for OneLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = self.0.chars();
        for ch in chars.by_ref().take(MAX_PREVIEW) {
            if ch == '\\' || ch.is_control() {
                write!(f, "{}", ch.escape_debug())?;
            } else {
                f.write_char(ch)?;
            }
        }
        if chars.next().is_some() {
            f.write_char('…')?;
        }
        Ok(())
    }
}

/// [`OneLine`] rendered to a `String`.
pub fn escape_log(s: &str) -> String {
    OneLine(s).to_string()
}

/// Mask a bearer credential, keeping only the last four characters.
pub fn redact_token(token: &str) -> String {
    let token = token.trim();
    let count = token.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = token.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count.min(12) - 4), tail)
}
