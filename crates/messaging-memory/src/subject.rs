//! Subject tokens and wildcard matching.
//!
//! Subjects are `.`-separated tokens. In patterns `*` matches exactly one token
//! and `>` matches one or more trailing tokens.

use crate::error::Error;

const SINGLE: &str = "*";
const TAIL: &str = ">";

/// Whether `pattern` matches `subject`.
///
/// A wildcard in `subject` is only matched by the same or a wider wildcard in
/// `pattern`, so this also answers whether a filter falls inside a pattern.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut subject = subject.split('.');

    loop {
        match (pattern.next(), subject.next()) {
            (None, None) | (Some(TAIL), Some(_)) => return true,
            (Some(SINGLE), Some(token)) if token != TAIL => {}
            (Some(expected), Some(token)) if expected == token => {}
            _ => return false,
        }
    }
}

/// Whether some subject could match both patterns.
pub fn overlaps(left: &str, right: &str) -> bool {
    let mut left = left.split('.');
    let mut right = right.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) | (Some(TAIL), Some(_)) | (Some(_), Some(TAIL)) => return true,
            (Some(SINGLE), Some(_)) | (Some(_), Some(SINGLE)) => {}
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
    }
}

/// Checks a concrete subject that messages are sent to.
pub fn validate_subject(subject: &str) -> Result<(), Error> {
    validate(subject, false)
}

/// Checks a subscription pattern.
pub fn validate_pattern(pattern: &str) -> Result<(), Error> {
    validate(pattern, true)
}

fn validate(subject: &str, wildcards: bool) -> Result<(), Error> {
    let invalid = || Error::InvalidSubject(subject.to_owned());
    let tokens: Vec<&str> = subject.split('.').collect();
    let last = tokens.len() - 1;

    for (index, token) in tokens.iter().enumerate() {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        match *token {
            SINGLE if wildcards => {}
            TAIL if wildcards && index == last => {}
            _ if token.contains(['*', '>']) => return Err(invalid()),
            _ => {}
        }
    }

    Ok(())
}
