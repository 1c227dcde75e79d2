// ABOUTME: Username validation shared by the client prompt and the server roster
// ABOUTME: Names are stored uppercase; uniqueness is enforced by the registry

use std::fmt;
use thiserror::Error;

pub const MIN_CHARS: usize = 3;
pub const MAX_CHARS: usize = 12;

/// Characters allowed beyond ASCII letters and digits.
pub const SPECIAL_CHARS: [char; 2] = ['_', '.'];

/// A validated, uppercased username.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Username(String);

/// Why a candidate name was rejected. The message text is shown to the user
/// verbatim.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("has spaces")]
    Spaces,

    #[error("use of illegal chars")]
    IllegalChars,

    #[error("no letters")]
    NoLetters,

    #[error("length too small - {MIN_CHARS} char min")]
    TooShort,

    #[error("exceeded length - {MAX_CHARS} char max")]
    TooLong,
}

impl Username {
    /// Validate a candidate and store it uppercased.
    ///
    /// Rules: letters and numbers plus `_` and `.`, 3-12 characters, no
    /// whitespace, at least one letter.
    pub fn parse(raw: &str) -> Result<Username, NameError> {
        if raw.chars().any(char::is_whitespace) {
            return Err(NameError::Spaces);
        }

        let bare: String = raw.chars().filter(|c| !SPECIAL_CHARS.contains(c)).collect();
        if !bare.is_empty() && !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(NameError::IllegalChars);
        }
        if !bare.chars().any(|c| c.is_ascii_alphabetic()) {
            return Err(NameError::NoLetters);
        }

        if raw.chars().count() < MIN_CHARS {
            return Err(NameError::TooShort);
        }
        if raw.chars().count() > MAX_CHARS {
            return Err(NameError::TooLong);
        }

        Ok(Username(raw.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_names() {
        for name in ["JEFF", "A.B_C", "jo3", "A1."] {
            assert!(Username::parse(name).is_ok(), "{name} should be accepted");
        }
        assert_eq!(Username::parse("jo3").unwrap().as_str(), "JO3");
    }

    #[test]
    fn rejects_each_rule_violation() {
        assert_eq!(Username::parse("jo"), Err(NameError::TooShort));
        assert_eq!(Username::parse("thirteen_chars"), Err(NameError::TooLong));
        assert_eq!(Username::parse("has space"), Err(NameError::Spaces));
        assert_eq!(Username::parse("123"), Err(NameError::NoLetters));
        assert_eq!(Username::parse("a@b"), Err(NameError::IllegalChars));
        assert_eq!(Username::parse(""), Err(NameError::NoLetters));
    }

    #[test]
    fn special_chars_alone_carry_no_letters() {
        assert_eq!(Username::parse("_._"), Err(NameError::NoLetters));
    }
}
