//! Composite agent key namespace.
//!
//! Simulation-provided agent names are unique within one worker but ambiguous
//! across workers. Before results leave the coordinator, each worker-local
//! name gets an `&env=<worker_index>` token appended; before dispatch, that
//! token is stripped again. The grammar is a base identifier followed by
//! `&field=value` tokens:
//!
//! ```text
//! seeker&team=1&env=3
//! ```
//!
//! `&` and `=` are reserved and must not appear in base names or values.
//! Parsing preserves any engine-provided fields (e.g. `team`) losslessly
//! alongside the `env` index.

use std::fmt;

use crate::error::KeyError;

/// Field name carrying the owning worker's index.
pub const ENV_FIELD: &str = "env";

const FIELD_SEP: char = '&';
const VALUE_SEP: char = '=';

fn check_reserved(text: &str) -> Result<(), KeyError> {
    if text.contains(FIELD_SEP) || text.contains(VALUE_SEP) {
        return Err(KeyError::ReservedChar { text: text.into() });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AgentKey
// ---------------------------------------------------------------------------

/// Parsed composite agent key: base name plus ordered `field=value` tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentKey {
    base: String,
    fields: Vec<(String, String)>,
}

impl AgentKey {
    /// Key with no fields. Fails if the base contains a reserved character
    /// or is empty.
    pub fn new(base: impl Into<String>) -> Result<Self, KeyError> {
        let base = base.into();
        if base.is_empty() {
            return Err(KeyError::EmptyBase);
        }
        check_reserved(&base)?;
        Ok(Self {
            base,
            fields: Vec::new(),
        })
    }

    /// Parse the wire form `base&field=value&...`.
    pub fn parse(text: &str) -> Result<Self, KeyError> {
        let mut tokens = text.split(FIELD_SEP);
        // split always yields at least one token
        let base = tokens.next().unwrap_or_default();
        let mut key = Self::new(base)?;
        for token in tokens {
            let (name, value) = token
                .split_once(VALUE_SEP)
                .ok_or_else(|| KeyError::MalformedToken {
                    token: token.into(),
                })?;
            if name.is_empty() || value.contains(VALUE_SEP) {
                return Err(KeyError::MalformedToken {
                    token: token.into(),
                });
            }
            key.fields.push((name.into(), value.into()));
        }
        Ok(key)
    }

    /// Base agent name, without any fields.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Ordered `(field, value)` pairs.
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Value of a named field, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Append a field, validating both sides against reserved characters.
    pub fn push_field(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), KeyError> {
        let (name, value) = (name.into(), value.into());
        check_reserved(&name)?;
        check_reserved(&value)?;
        self.fields.push((name, value));
        Ok(())
    }

    /// Append the worker-index field. Fails if one is already present.
    pub fn with_env(mut self, index: usize) -> Result<Self, KeyError> {
        if self.field(ENV_FIELD).is_some() {
            return Err(KeyError::DuplicateEnv {
                key: self.to_string(),
            });
        }
        self.fields.push((ENV_FIELD.into(), index.to_string()));
        Ok(self)
    }

    /// The worker index encoded in the `env` field.
    pub fn env_index(&self) -> Result<usize, KeyError> {
        let value = self.field(ENV_FIELD).ok_or_else(|| KeyError::MissingEnv {
            key: self.to_string(),
        })?;
        value.parse().map_err(|_| KeyError::BadEnvIndex {
            key: self.to_string(),
            value: value.into(),
        })
    }

    /// Remove the `env` field, returning the worker index. Other fields are
    /// preserved in order.
    pub fn take_env(&mut self) -> Result<usize, KeyError> {
        let index = self.env_index()?;
        self.fields.retain(|(n, _)| n != ENV_FIELD);
        Ok(index)
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        for (name, value) in &self.fields {
            write!(f, "{FIELD_SEP}{name}{VALUE_SEP}{value}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire-string helpers
// ---------------------------------------------------------------------------

/// Append `&env=<index>` to a worker-local key string.
///
/// The hot path of result flattening: the input is a key the worker produced
/// (possibly already carrying engine fields such as `team`), the output is
/// the globally unambiguous form.
pub fn attach_env(key: &str, index: usize) -> Result<String, KeyError> {
    Ok(AgentKey::parse(key)?.with_env(index)?.to_string())
}

/// Split an env-suffixed key into `(worker_local_key, worker_index)`.
///
/// Inverse of [`attach_env`]: any extra fields survive in the returned local
/// key.
pub fn strip_env(key: &str) -> Result<(String, usize), KeyError> {
    let mut parsed = AgentKey::parse(key)?;
    let index = parsed.take_env()?;
    Ok((parsed.to_string(), index))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compose_and_parse_plain_name() {
        let key = AgentKey::parse("seeker").unwrap();
        assert_eq!(key.base(), "seeker");
        assert!(key.fields().is_empty());
        assert_eq!(key.to_string(), "seeker");
    }

    #[test]
    fn attach_then_strip_is_identity() {
        let suffixed = attach_env("seeker", 3).unwrap();
        assert_eq!(suffixed, "seeker&env=3");
        let (local, index) = strip_env(&suffixed).unwrap();
        assert_eq!(local, "seeker");
        assert_eq!(index, 3);
    }

    #[test]
    fn extra_fields_survive_roundtrip() {
        let suffixed = attach_env("seeker&team=1", 0).unwrap();
        assert_eq!(suffixed, "seeker&team=1&env=0");
        let (local, index) = strip_env(&suffixed).unwrap();
        assert_eq!(local, "seeker&team=1");
        assert_eq!(index, 0);
    }

    #[test]
    fn field_order_is_preserved() {
        let key = AgentKey::parse("a&x=1&y=2&z=3").unwrap();
        assert_eq!(key.to_string(), "a&x=1&y=2&z=3");
        assert_eq!(key.field("y"), Some("2"));
    }

    #[test]
    fn empty_base_rejected() {
        assert!(matches!(AgentKey::parse(""), Err(KeyError::EmptyBase)));
        assert!(matches!(
            AgentKey::parse("&env=0"),
            Err(KeyError::EmptyBase)
        ));
    }

    #[test]
    fn reserved_char_in_new_base_rejected() {
        assert!(matches!(
            AgentKey::new("a=b"),
            Err(KeyError::ReservedChar { .. })
        ));
        assert!(matches!(
            AgentKey::new("a&b"),
            Err(KeyError::ReservedChar { .. })
        ));
    }

    #[test]
    fn token_without_value_rejected() {
        assert!(matches!(
            AgentKey::parse("seeker&env"),
            Err(KeyError::MalformedToken { .. })
        ));
        assert!(matches!(
            AgentKey::parse("seeker&=3"),
            Err(KeyError::MalformedToken { .. })
        ));
    }

    #[test]
    fn base_with_equals_rejected_on_parse() {
        assert!(matches!(
            AgentKey::parse("see=ker&env=0"),
            Err(KeyError::ReservedChar { .. })
        ));
    }

    #[test]
    fn missing_env_field_reported() {
        let err = strip_env("seeker&team=1").unwrap_err();
        assert!(matches!(err, KeyError::MissingEnv { .. }));
    }

    #[test]
    fn non_numeric_env_index_reported() {
        let err = strip_env("seeker&env=three").unwrap_err();
        assert!(matches!(err, KeyError::BadEnvIndex { .. }));
    }

    #[test]
    fn double_env_attach_rejected() {
        let err = attach_env("seeker&env=0", 1).unwrap_err();
        assert!(matches!(err, KeyError::DuplicateEnv { .. }));
    }

    #[test]
    fn push_field_validates_reserved() {
        let mut key = AgentKey::new("seeker").unwrap();
        assert!(key.push_field("team", "blue").is_ok());
        assert!(matches!(
            key.push_field("team", "a=b"),
            Err(KeyError::ReservedChar { .. })
        ));
        assert_eq!(key.to_string(), "seeker&team=blue");
    }

    proptest! {
        /// parse(compose(name, i)) == (name, i) for all reserved-free names.
        #[test]
        fn roundtrip_property(
            base in "[a-zA-Z0-9_.\\- ]{1,24}",
            index in 0usize..10_000,
        ) {
            let suffixed = attach_env(&base, index).unwrap();
            let (local, parsed_index) = strip_env(&suffixed).unwrap();
            prop_assert_eq!(local, base);
            prop_assert_eq!(parsed_index, index);
        }

        #[test]
        fn roundtrip_with_extra_field(
            base in "[a-zA-Z0-9_]{1,16}",
            team in 0usize..8,
            index in 0usize..64,
        ) {
            let local = format!("{base}&team={team}");
            let suffixed = attach_env(&local, index).unwrap();
            let (stripped, parsed_index) = strip_env(&suffixed).unwrap();
            prop_assert_eq!(stripped, local);
            prop_assert_eq!(parsed_index, index);
        }
    }
}
