//! Type-safe wrappers around git primitives and document addressing.

use std::fmt;
use std::path::PathBuf;

use git2::Oid;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A commit identifier.
///
/// The inner Oid is only reachable from the storage module, so callers can't
/// mix commit ids up with blob or tree ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// short form of the commit id
    pub fn short(&self) -> String {
        let full = self.0.to_string();
        full[..7.min(full.len())].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated collection name.
///
/// Collections are top-level directories in the repository tree, so names are
/// restricted to keep them filesystem and git safe:
/// - 1-64 characters
/// - ASCII letters, digits, underscores and hyphens
/// - must start with a letter (leading underscores are kept for metadata)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    const MAX_LEN: usize = 64;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let Some(first) = name.chars().next() else {
            return Err(InvalidNameError::Empty);
        };

        if name.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if !first.is_ascii_alphabetic() {
            return Err(InvalidNameError::InvalidStart(first));
        }

        check_charset(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated document key. Becomes the file name `<key>.json` inside the
/// collection directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey(String);

impl DocumentKey {
    const MAX_LEN: usize = 128;

    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if key.len() > Self::MAX_LEN {
            return Err(InvalidNameError::TooLong(key.len()));
        }
        check_charset(&key)?;
        Ok(Self(key))
    }

    /// A fresh, lexicographically sortable key.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Recover a key from a tree entry name (`<key>.json`).
    pub(crate) fn from_file_name(name: &str) -> Option<Self> {
        name.strip_suffix(".json").and_then(|k| Self::new(k).ok())
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Repository path of a document, `<collection>/<key>.json`.
pub fn document_path(collection: &CollectionName, key: &DocumentKey) -> PathBuf {
    PathBuf::from(collection.as_str()).join(key.file_name())
}

fn check_charset(name: &str) -> Result<(), InvalidNameError> {
    for (position, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position });
        }
    }
    Ok(())
}

/// a branch name, with special handling for transaction branches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    pub const MAIN: &'static str = "main";

    /// prefix for transaction branches
    pub const TX_PREFIX: &'static str = "tx/";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn for_transaction(tx_id: &str) -> Self {
        Self(format!("{}{}", Self::TX_PREFIX, tx_id))
    }

    /// transaction id if this is a transaction branch
    pub fn transaction_id(&self) -> Option<&str> {
        self.0.strip_prefix(Self::TX_PREFIX)
    }

    /// full ref path, e.g. `refs/heads/main`
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// author/committer identity used for every commit the store writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::new("gitwork", "gitwork@localhost")
    }
}

/// error type for invalid names (collections, keys, branches)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidStart(char),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidStart(c) => write!(f, "name cannot start with '{}'", c),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_validation() {
        assert!(CollectionName::new("users").is_ok());
        assert!(CollectionName::new("order-items_2").is_ok());

        assert_eq!(CollectionName::new(""), Err(InvalidNameError::Empty));
        assert_eq!(
            CollectionName::new("_meta"),
            Err(InvalidNameError::InvalidStart('_'))
        );
        assert_eq!(
            CollectionName::new("9lives"),
            Err(InvalidNameError::InvalidStart('9'))
        );
        assert!(matches!(
            CollectionName::new("a/b"),
            Err(InvalidNameError::InvalidCharacter { char: '/', position: 1 })
        ));
        assert!(matches!(
            CollectionName::new("x".repeat(65)),
            Err(InvalidNameError::TooLong(65))
        ));
    }

    #[test]
    fn test_document_key() {
        let key = DocumentKey::new("user-1").unwrap();
        assert_eq!(key.file_name(), "user-1.json");
        assert_eq!(DocumentKey::from_file_name("user-1.json"), Some(key));
        assert_eq!(DocumentKey::from_file_name("README.md"), None);
        assert!(DocumentKey::new("../etc").is_err());

        let a = DocumentKey::generate();
        let b = DocumentKey::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_branch_names() {
        let tx = BranchName::for_transaction("01abc");
        assert_eq!(tx.as_str(), "tx/01abc");
        assert_eq!(tx.transaction_id(), Some("01abc"));
        assert_eq!(BranchName::main().transaction_id(), None);
        assert_eq!(BranchName::main().as_ref_path(), "refs/heads/main");
        assert!(BranchName::new("a/../b").is_err());
    }
}
