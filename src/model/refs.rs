//! Resource references

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque name of a command, stage, callback handler or action.
///
/// The empty reference means "no reference" and never resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRef(String);

impl ResourceRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceRef {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ResourceRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&ResourceRef> for ResourceRef {
    fn from(reference: &ResourceRef) -> Self {
        reference.clone()
    }
}

impl Borrow<str> for ResourceRef {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
