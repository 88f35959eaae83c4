//! Share addresses and backend namespaces.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::backend::Key;

/// Address of a share, e.g. `+gardening.abc123`.
///
/// A share address starts with `+`, followed by a non-empty name, a `.` and a non-empty
/// suffix. Whitespace is never allowed.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct ShareAddress(String);

/// Error returned when parsing an invalid [`ShareAddress`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid share address {address:?}: {reason}")]
pub struct InvalidShareAddress {
    address: String,
    reason: &'static str,
}

impl ShareAddress {
    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), &'static str> {
        let Some(rest) = s.strip_prefix('+') else {
            return Err("must start with '+'");
        };
        if s.chars().any(char::is_whitespace) {
            return Err("must not contain whitespace");
        }
        let Some((name, suffix)) = rest.split_once('.') else {
            return Err("missing '.' between name and suffix");
        };
        if name.is_empty() {
            return Err("empty name");
        }
        if suffix.is_empty() {
            return Err("empty suffix");
        }
        Ok(())
    }
}

impl fmt::Debug for ShareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareAddress({})", self.0)
    }
}

impl FromStr for ShareAddress {
    type Err = InvalidShareAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s).map_err(|reason| InvalidShareAddress {
            address: s.to_string(),
            reason,
        })?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ShareAddress {
    type Error = InvalidShareAddress;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match Self::validate(&value) {
            Ok(()) => Ok(Self(value)),
            Err(reason) => Err(InvalidShareAddress {
                address: value,
                reason,
            }),
        }
    }
}

impl From<ShareAddress> for String {
    fn from(value: ShareAddress) -> Self {
        value.0
    }
}

impl AsRef<str> for ShareAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Segment that introduces an instance discriminator. Sits at the same position as the
// `docs` and `config` segments of the plain namespace, which keeps the mapping injective.
const INSTANCE_SEGMENT: &str = "instance";
const DOCS_SEGMENT: &str = "docs";
const CONFIG_SEGMENT: &str = "config";

/// The backend namespace owned by one driver.
///
/// Every backend key a driver reads or writes starts with the share address, so the
/// share is the unit of backend capacity. The optional instance discriminator lets several
/// independent drivers for the same share coexist in one backend.
///
/// Key layout:
/// - `[share, "docs"]` / `[share, "config", key]`
/// - `[share, "instance", id, "docs"]` / `[share, "instance", id, "config", key]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    share: ShareAddress,
    instance: Option<String>,
}

impl Namespace {
    /// Namespace for a share without an instance discriminator.
    pub fn new(share: ShareAddress) -> Self {
        Self {
            share,
            instance: None,
        }
    }

    /// Namespace for a share, discriminated by `instance`.
    pub fn with_instance(share: ShareAddress, instance: impl Into<String>) -> Self {
        Self {
            share,
            instance: Some(instance.into()),
        }
    }

    /// The share of this namespace.
    pub fn share(&self) -> &ShareAddress {
        &self.share
    }

    /// The instance discriminator, if any.
    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    fn prefix(&self) -> Key {
        let key = Key::from([self.share.as_str()]);
        match &self.instance {
            None => key,
            Some(instance) => key.join(INSTANCE_SEGMENT).join(instance),
        }
    }

    /// Backend key of the document snapshot.
    pub fn snapshot_key(&self) -> Key {
        self.prefix().join(DOCS_SEGMENT)
    }

    /// Backend key prefix under which all config keys of this namespace live.
    pub fn config_prefix(&self) -> Key {
        self.prefix().join(CONFIG_SEGMENT)
    }

    /// Backend key for the config entry `key`.
    pub fn config_key(&self, key: &str) -> Key {
        self.config_prefix().join(key)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            None => write!(f, "{}", self.share),
            Some(instance) => write!(f, "{}#{}", self.share, instance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_address_parse() {
        let share: ShareAddress = "+test.abc".parse().unwrap();
        assert_eq!(share.as_str(), "+test.abc");
        assert_eq!(share.to_string(), "+test.abc");

        for bad in ["test.abc", "+test", "+.abc", "+test.", "+te st.abc", ""] {
            assert!(bad.parse::<ShareAddress>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_share_address_serde() {
        let share: ShareAddress = "+test.abc".parse().unwrap();
        let json = serde_json::to_string(&share).unwrap();
        assert_eq!(json, "\"+test.abc\"");
        let back: ShareAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, share);
        assert!(serde_json::from_str::<ShareAddress>("\"nope\"").is_err());
    }

    #[test]
    fn test_namespace_keys_are_distinct() {
        let share: ShareAddress = "+test.abc".parse().unwrap();
        let plain = Namespace::new(share.clone());
        let docs = Namespace::with_instance(share.clone(), "docs");
        let config = Namespace::with_instance(share, "config");

        let keys = [
            plain.snapshot_key(),
            plain.config_key("docs"),
            plain.config_key("instance"),
            docs.snapshot_key(),
            docs.config_key("docs"),
            config.snapshot_key(),
            config.config_key("docs"),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(!docs.config_key("x").starts_with(&plain.config_prefix()));
        assert!(plain.config_key("x").starts_with(&plain.config_prefix()));
        assert_eq!(plain.config_key("foo").to_string(), "+test.abc:config:foo");
    }
}
