//! Shell quoting

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::ExecError;

/// Quote a string for safe use as one POSIX shell word.
///
/// Strings made only of characters the shell never interprets are returned
/// bare; everything else is wrapped in single quotes with embedded single
/// quotes written as `'\''`.
#[must_use]
pub fn shell_escape(s: &str) -> Cow<'_, str> {
    if s.is_empty() {
        return Cow::Borrowed("''");
    }
    if s.chars().all(is_bare) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("'{}'", s.replace('\'', "'\\''")))
}

/// Quote a path, leaving a leading `~` or `~user` home prefix unquoted
/// so the shell still expands it.
#[must_use]
pub fn shell_escape_path(path: &str) -> Cow<'_, str> {
    let Some(rest) = path.strip_prefix('~') else {
        return shell_escape(path);
    };
    let (user, tail) = match rest.find('/') {
        Some(slash) => (&rest[..slash], Some(&rest[slash + 1..])),
        None => (rest, None),
    };
    if !user
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return shell_escape(path);
    }
    match tail {
        None | Some("") => Cow::Borrowed(path),
        Some(tail) => Cow::Owned(format!("~{user}/{}", shell_escape(tail))),
    }
}

fn is_bare(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '%' | '=' | '@' | ',' | '+')
}

/// Environment keys must be valid shell identifiers once upper-cased
pub(crate) fn validate_env_key(key: &str) -> Result<(), ExecError> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ExecError::InvalidOption(format!(
            "environment key `{key}` is not a shell identifier"
        )))
    }
}

/// Validate a set of environment keys, rejecting keys that only differ in
/// case since they render to the same variable
pub(crate) fn validate_env_keys<'a>(keys: impl IntoIterator<Item = &'a String>) -> Result<(), ExecError> {
    let mut seen = BTreeMap::new();
    for key in keys {
        validate_env_key(key)?;
        if let Some(other) = seen.insert(key.to_uppercase(), key) {
            return Err(ExecError::InvalidOption(format!(
                "environment keys `{other}` and `{key}` collide as `{}`",
                key.to_uppercase()
            )));
        }
    }
    Ok(())
}
