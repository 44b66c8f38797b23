//! Authorization gate for save and delete.
//!
//! The expected password is the first word of the character's name, lowercased.
//! This is a client-side deterrent against accidental edits of someone else's
//! sheet, nothing more: it never leaves the process and protects nothing from a
//! determined user. Real write access is the bearer credential used by the
//! store client.

use log::warn;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::character::CharacterRecord;
use crate::index::collation_key;

pub const PROMPT: &str = "Password = first word of the character's name (lowercase): ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Wrong password.")]
pub struct Denied;

/// Source of the operator's answer. Called synchronously.
pub trait Prompter: Send + Sync {
    /// `None` when the operator cancels.
    fn prompt_secret(&self, message: &str) -> Option<String>;
}

/// Reads from the terminal without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt_secret(&self, message: &str) -> Option<String> {
        match rpassword::prompt_password(message) {
            Ok(answer) => Some(answer),
            Err(e) => {
                warn!("password prompt failed: {}", e);
                None
            }
        }
    }
}

/// Answers from a fixed queue; used for `--password` and in tests.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    asked: AtomicUsize,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            fallback: None,
            asked: AtomicUsize::new(0),
        }
    }

    /// Same answer every time.
    pub fn always(answer: &str) -> Self {
        Self {
            fallback: Some(answer.to_string()),
            ..Self::default()
        }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl Prompter for ScriptedPrompter {
    fn prompt_secret(&self, _message: &str) -> Option<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .or_else(|| self.fallback.clone())
    }
}

/// First whitespace-delimited word of `name`, lowercased.
pub fn expected_secret(name: &str) -> String {
    name.split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Case- and accent-insensitive comparison after trimming.
pub fn secrets_match(expected: &str, entered: &str) -> bool {
    collation_key(expected) == collation_key(entered)
}

/// Ask the operator and check the answer against `name`.
pub fn authorize_name(name: &str, prompter: &dyn Prompter) -> Result<(), Denied> {
    let expected = expected_secret(name);
    let entered = prompter.prompt_secret(PROMPT).unwrap_or_default();
    if secrets_match(&expected, &entered) {
        Ok(())
    } else {
        warn!(target: "security", "authorization gate rejected an attempt");
        Err(Denied)
    }
}

/// Gate a mutation of `record`, whose display name lives in `name_field`.
pub fn authorize(
    record: &CharacterRecord,
    name_field: &str,
    prompter: &dyn Prompter,
) -> Result<(), Denied> {
    authorize_name(record.name(name_field), prompter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::ListMinimums;

    fn record(name: &str) -> CharacterRecord {
        let mut r = CharacterRecord::new(&ListMinimums::uniform(0));
        r.touch_field("Textbox1", name);
        r
    }

    #[test]
    fn first_word_is_the_secret() {
        assert_eq!(expected_secret("  Nuka   Girl "), "nuka");
        assert_eq!(expected_secret("ŽOFIE Nováková"), "žofie");
        assert_eq!(expected_secret(""), "");
    }

    #[test]
    fn accepts_any_case() {
        let r = record("Nuka Girl");
        for answer in ["nuka", "NUKA", " Nuka \n"] {
            let p = ScriptedPrompter::new([answer]);
            assert_eq!(authorize(&r, "Textbox1", &p), Ok(()));
        }
    }

    #[test]
    fn accent_insensitive() {
        let r = record("Žofie Nováková");
        let p = ScriptedPrompter::new(["zofie"]);
        assert!(authorize(&r, "Textbox1", &p).is_ok());
    }

    #[test]
    fn rejects_other_words_and_cancel() {
        let r = record("Nuka Girl");
        let p = ScriptedPrompter::new(["girl"]);
        assert_eq!(authorize(&r, "Textbox1", &p), Err(Denied));
        let cancelled = ScriptedPrompter::new(Vec::<String>::new());
        assert_eq!(authorize(&r, "Textbox1", &cancelled), Err(Denied));
        assert_eq!(cancelled.times_asked(), 1);
    }
}
