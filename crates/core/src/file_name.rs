//! Client-declared file names.
//!
//! The name a client sends with an upload is only ever used as a label:
//! it is stored in the metadata record and echoed back in download
//! headers. It never participates in on-disk paths.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a stored name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Name stored when the client sent nothing usable.
pub const FALLBACK_NAME: &str = "unnamed";

/// Characters left unescaped in an RFC 5987 `ext-value`.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// A sanitized client file name.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclaredName(String);

impl DeclaredName {
    /// Reduce a raw client name to its final path component.
    ///
    /// Both `/` and `\` count as separators, control characters are
    /// dropped, and the result is capped at [`MAX_NAME_LEN`] bytes.
    /// Empty, `.` and `..` results become [`FALLBACK_NAME`].
    pub fn sanitize(raw: &str) -> Self {
        let base = raw
            .rsplit(['/', '\\'])
            .find(|component| !component.trim().is_empty())
            .unwrap_or("");

        let mut name: String = base.chars().filter(|c| !c.is_control()).collect();
        let trimmed = name.trim();
        if trimmed.len() != name.len() {
            name = trimmed.to_string();
        }

        if name.len() > MAX_NAME_LEN {
            let mut end = MAX_NAME_LEN;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }

        if name.is_empty() || name == "." || name == ".." {
            return Self(FALLBACK_NAME.to_string());
        }
        Self(name)
    }

    /// Rebuild a name that was sanitized before it was stored.
    pub fn from_stored(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// ASCII rendition for the plain `filename` parameter.
    ///
    /// Anything outside `[A-Za-z0-9_\-. ]` becomes `.`.
    pub fn ascii_fallback(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ') {
                    c
                } else {
                    '.'
                }
            })
            .collect()
    }

    /// Percent-encoded UTF-8 rendition for the `filename*` parameter.
    pub fn utf8_encoded(&self) -> String {
        utf8_percent_encode(&self.0, ATTR_CHAR).to_string()
    }

    /// `Content-Disposition` value for downloading this file.
    pub fn content_disposition(&self) -> String {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            self.ascii_fallback(),
            self.utf8_encoded()
        )
    }
}

impl fmt::Debug for DeclaredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclaredName({:?})", self.0)
    }
}

impl fmt::Display for DeclaredName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeclaredName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
