//! Validation of storage object keys such as `public/<hash>.png`.

use unicode_normalization::UnicodeNormalization;

const RESERVED_WINDOWS_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const FORBIDDEN_CHARS: [char; 8] = ['<', '>', ':', '"', '\\', '|', '?', '*'];

const MAX_COMPONENT_BYTES: usize = 255;
const MAX_KEY_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKeyError {
    Empty,
    RelativeSegment,
    ReservedName,
    TrailingDotOrSpace,
    ForbiddenCharacter,
    ComponentTooLong,
    KeyTooLong,
}

impl ObjectKeyError {
    pub fn code(&self) -> &'static str {
        match self {
            ObjectKeyError::Empty => "empty",
            ObjectKeyError::RelativeSegment => "relative-segment",
            ObjectKeyError::ReservedName => "reserved-name",
            ObjectKeyError::TrailingDotOrSpace => "trailing-dot-or-space",
            ObjectKeyError::ForbiddenCharacter => "forbidden-character",
            ObjectKeyError::ComponentTooLong => "component-too-long",
            ObjectKeyError::KeyTooLong => "key-too-long",
        }
    }
}

fn has_forbidden_characters(value: &str) -> bool {
    value.chars().any(|c| c.is_control() || FORBIDDEN_CHARS.contains(&c))
}

fn is_reserved_name(value: &str) -> bool {
    let stem = value
        .split_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(value);

    RESERVED_WINDOWS_NAMES
        .iter()
        .any(|candidate| stem.eq_ignore_ascii_case(candidate))
}

fn has_trailing_dot_or_space(value: &str) -> bool {
    value.trim_end_matches([' ', '.']).len() != value.len()
}

fn validate_component(component: &str) -> Result<(), ObjectKeyError> {
    if component.is_empty() {
        return Err(ObjectKeyError::Empty);
    }
    if component == "." || component == ".." {
        return Err(ObjectKeyError::RelativeSegment);
    }
    if is_reserved_name(component) {
        return Err(ObjectKeyError::ReservedName);
    }
    if has_trailing_dot_or_space(component) {
        return Err(ObjectKeyError::TrailingDotOrSpace);
    }
    if has_forbidden_characters(component) {
        return Err(ObjectKeyError::ForbiddenCharacter);
    }
    if component.as_bytes().len() > MAX_COMPONENT_BYTES {
        return Err(ObjectKeyError::ComponentTooLong);
    }
    Ok(())
}

/// NFC-normalize `key` and check every `/`-separated component. The
/// normalized key is what gets stored, so lookups must use it too.
pub fn validate_object_key(key: &str) -> Result<String, ObjectKeyError> {
    let normalized: String = key.nfc().collect();
    if normalized.is_empty() {
        return Err(ObjectKeyError::Empty);
    }
    for component in normalized.split('/') {
        validate_component(component)?;
    }
    if normalized.as_bytes().len() > MAX_KEY_BYTES {
        return Err(ObjectKeyError::KeyTooLong);
    }
    Ok(normalized)
}
