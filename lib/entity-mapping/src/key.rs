use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier part of a [`Key`]: either a numeric id or a string name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyId {
    Id(i64),
    Name(String),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{}", id),
            KeyId::Name(name) => write!(f, "\"{}\"", name),
        }
    }
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        KeyId::Id(id)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        KeyId::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        KeyId::Name(name)
    }
}

/// Store key: kind, optional id and optional parent.
///
/// A key without an id is *incomplete*; the store allocates the id when the
/// record is first written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    id: Option<KeyId>,
    parent: Option<Box<Key>>,
}

impl Key {
    pub fn new(kind: impl Into<String>, id: impl Into<KeyId>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(id.into()),
            parent: None,
        }
    }

    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub(crate) fn from_parts(kind: String, id: Option<KeyId>, parent: Option<Key>) -> Self {
        Self {
            kind,
            id,
            parent: parent.map(Box::new),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<&KeyId> {
        self.id.as_ref()
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }

    /// Returns a copy of this key carrying the given id, keeping kind and parent.
    pub fn completed(&self, id: impl Into<KeyId>) -> Self {
        Self {
            kind: self.kind.clone(),
            id: Some(id.into()),
            parent: self.parent.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{}/", parent)?;
        }
        match &self.id {
            Some(id) => write!(f, "{}({})", self.kind, id),
            None => write!(f, "{}(?)", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_key_has_no_id() {
        let key = Key::incomplete("Contact");
        assert!(!key.is_complete());
        assert_eq!(key.id(), None);
        assert_eq!(key.to_string(), "Contact(?)");
    }

    #[test]
    fn test_completed_keeps_parent() {
        let parent = Key::new("Account", "acme");
        let key = Key::incomplete("Contact").with_parent(parent.clone());
        let completed = key.completed(7i64);

        assert_eq!(completed.id(), Some(&KeyId::Id(7)));
        assert_eq!(completed.parent(), Some(&parent));
        assert_eq!(completed.to_string(), "Account(\"acme\")/Contact(7)");
    }
}
