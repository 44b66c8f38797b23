//! Input validation for names, ids and store paths.
//!
//! Index entries are read from a file anyone with write access can edit, so
//! the `file` path of an entry is checked before it is fetched or deleted.

/// Character name validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("Character name is missing (fill in the name field first)")]
    Empty,

    #[error("Character name contains control characters")]
    ControlCharacters,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("path '{0}' must be relative to the repository root")]
    Absolute(String),

    #[error("path '{0}' contains '..' or an empty segment")]
    Traversal(String),

    #[error("path '{0}' must use '/' separators and no control characters")]
    BadCharacters(String),
}

/// Trim and validate a display name. Returns the trimmed name.
pub fn validate_character_name(name: &str) -> Result<&str, NameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NameError::Empty);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(NameError::ControlCharacters);
    }
    Ok(trimmed)
}

/// A stored id is a non-empty run of `[a-z0-9-]`, as produced by slug derivation.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= crate::ident::MAX_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Validate a repository-relative file path (as found in the index).
pub fn validate_store_path(path: &str) -> Result<(), PathError> {
    if path.trim().is_empty() {
        return Err(PathError::Empty);
    }
    if path.starts_with('/') {
        return Err(PathError::Absolute(path.to_string()));
    }
    if path.contains('\\') || path.chars().any(char::is_control) {
        return Err(PathError::BadCharacters(path.to_string()));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(PathError::Traversal(path.to_string()));
    }
    Ok(())
}

/// `<dir>/<id>.json` without doubled separators.
pub fn character_file_path(characters_dir: &str, id: &str) -> String {
    format!("{}/{}.json", characters_dir.trim_end_matches('/'), id)
}
