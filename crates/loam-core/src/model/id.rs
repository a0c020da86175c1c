//! Validated identifier newtypes.
//!
//! Foundation identifiers used throughout loam: namespaces, entity ids,
//! content-addressed object hashes, and branch names. Each newtype validates
//! on construction so a malformed identifier cannot flow past the boundary
//! where it was received.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Which kind of identifier failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Namespace,
    EntityId,
    ObjectHash,
    BranchName,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace => write!(f, "namespace"),
            Self::EntityId => write!(f, "entity id"),
            Self::ObjectHash => write!(f, "object hash"),
            Self::BranchName => write!(f, "branch name"),
        }
    }
}

/// An identifier failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Which identifier kind was being validated.
    pub kind: ErrorKind,
    /// The value that failed.
    pub value: String,
    /// Why the value is invalid.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}': {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// Namespace
// ---------------------------------------------------------------------------

/// A validated namespace (collection) name.
///
/// Namespaces name on-disk directories (`data/<ns>/…`), so the character set
/// is conservative: lowercase alphanumeric plus `-` and `_`, 1-64 characters,
/// starting with an alphanumeric.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Create a new `Namespace`, validating format.
    ///
    /// # Errors
    /// Returns an error if the name is empty, longer than 64 characters, or
    /// contains anything other than lowercase alphanumerics, `-`, or `_`.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let err = |reason: String| ValidationError {
            kind: ErrorKind::Namespace,
            value: s.to_owned(),
            reason,
        };
        if s.is_empty() {
            return Err(err("must not be empty".to_owned()));
        }
        if s.len() > 64 {
            return Err(err(format!("must be at most 64 characters, got {}", s.len())));
        }
        if !s.chars().next().is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(err("must start with a lowercase letter or digit".to_owned()));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(err(
                "must contain only lowercase alphanumerics, '-', or '_'".to_owned(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Namespace {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A globally unique entity id: `<namespace>/<local-id>`.
///
/// The local part is typically a ULID (26 Crockford base32 characters) but
/// any `/`-free, `:`-free token of 1-64 characters is accepted so imported
/// data with foreign ids keeps working.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    ns: Namespace,
    local: String,
}

impl EntityId {
    /// Build an id from a namespace and a local id.
    ///
    /// # Errors
    /// Returns an error if the local id is empty, longer than 64 characters,
    /// or contains `/`, `:`, whitespace, or control characters.
    pub fn new(ns: Namespace, local: &str) -> Result<Self, ValidationError> {
        Self::validate_local(local)?;
        Ok(Self {
            ns,
            local: local.to_owned(),
        })
    }

    /// Parse a `<namespace>/<local>` string.
    ///
    /// # Errors
    /// Returns an error if the string has no `/` separator or either part
    /// fails validation.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let Some((ns, local)) = s.split_once('/') else {
            return Err(ValidationError {
                kind: ErrorKind::EntityId,
                value: s.to_owned(),
                reason: "expected '<namespace>/<local-id>'".to_owned(),
            });
        };
        let ns = Namespace::new(ns).map_err(|mut e| {
            e.kind = ErrorKind::EntityId;
            e.value = s.to_owned();
            e
        })?;
        Self::new(ns, local)
    }

    /// The namespace part.
    #[must_use]
    pub const fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// The local id part (without the namespace prefix).
    #[must_use]
    pub fn local(&self) -> &str {
        &self.local
    }

    fn validate_local(local: &str) -> Result<(), ValidationError> {
        let err = |reason: &str| ValidationError {
            kind: ErrorKind::EntityId,
            value: local.to_owned(),
            reason: reason.to_owned(),
        };
        if local.is_empty() {
            return Err(err("local id must not be empty"));
        }
        if local.len() > 64 {
            return Err(err("local id must be at most 64 characters"));
        }
        if local
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
        {
            return Err(err(
                "local id must not contain '/', ':', whitespace, or control characters",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ns, self.local)
    }
}

impl FromStr for EntityId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        format!("{}/{}", id.ns, id.local)
    }
}

// ---------------------------------------------------------------------------
// ObjectHash
// ---------------------------------------------------------------------------

/// A validated 64-character lowercase hex SHA-256 digest.
///
/// Object hashes address immutable blobs in the object store and identify
/// commits. The split path form (`_objects/<hh>/<rest>`) is derived, never
/// stored.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectHash(String);

impl ObjectHash {
    /// Create a new `ObjectHash` from a hex string.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 64 lowercase hex
    /// characters.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first two hex characters (the fan-out directory).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// Everything after the first two hex characters.
    #[must_use]
    pub fn rest(&self) -> &str {
        &self.0[2..]
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        if s.len() != 64 {
            return Err(ValidationError {
                kind: ErrorKind::ObjectHash,
                value: s.to_owned(),
                reason: format!("expected 64 hex characters, got {}", s.len()),
            });
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(ValidationError {
                kind: ErrorKind::ObjectHash,
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectHash {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ObjectHash {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<ObjectHash> for String {
    fn from(h: ObjectHash) -> Self {
        h.0
    }
}

// ---------------------------------------------------------------------------
// BranchName
// ---------------------------------------------------------------------------

/// A validated branch name.
///
/// Rules: nonempty, no whitespace or control characters, no leading or
/// trailing `/`, no empty path segments (`//`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Create a new `BranchName`, validating format.
    ///
    /// # Errors
    /// Returns an error if the name violates any of the rules above.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let err = |reason: &str| ValidationError {
            kind: ErrorKind::BranchName,
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        if s.is_empty() {
            return Err(err("must not be empty"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(err("must not contain whitespace"));
        }
        if s.chars().any(char::is_control) {
            return Err(err("must not contain control characters"));
        }
        if s.starts_with('/') || s.ends_with('/') {
            return Err(err("must not start or end with '/'"));
        }
        if s.contains("//") {
            return Err(err("must not contain empty path segments ('//')"));
        }
        Ok(())
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BranchName {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BranchName {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<BranchName> for String {
    fn from(b: BranchName) -> Self {
        b.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
