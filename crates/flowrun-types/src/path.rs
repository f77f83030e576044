//! Absolute addressing into a configuration tree.
//!
//! A `Path` is a sequence of selectors. The textual form is dot-separated
//! (`command.hello.ask.response`); segments made only of ASCII digits select
//! list elements.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DocumentError;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Selector {
    /// A struct field.
    Field(String),
    /// A list element.
    Index(usize),
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Field(name) => f.write_str(name),
            Selector::Index(i) => write!(f, "{i}"),
        }
    }
}

/// An absolute path from the document root. The empty path is the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    selectors: Vec<Selector>,
}

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_selectors(selectors: Vec<Selector>) -> Self {
        Self { selectors }
    }

    /// Parse a dot-separated path. An empty string is the root.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::root());
        }
        let mut selectors = Vec::new();
        for segment in text.split('.') {
            if segment.is_empty() {
                return Err(DocumentError::InvalidPath(format!(
                    "empty segment in path '{text}'"
                )));
            }
            if segment.bytes().all(|b| b.is_ascii_digit()) {
                let index = segment.parse::<usize>().map_err(|e| {
                    DocumentError::InvalidPath(format!("bad index '{segment}' in '{text}': {e}"))
                })?;
                selectors.push(Selector::Index(index));
            } else {
                selectors.push(Selector::Field(segment.to_string()));
            }
        }
        Ok(Self { selectors })
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn is_root(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// The final selector, if any.
    pub fn last(&self) -> Option<&Selector> {
        self.selectors.last()
    }

    /// A new path with `field` appended.
    pub fn child(&self, field: impl Into<String>) -> Self {
        let mut selectors = self.selectors.clone();
        selectors.push(Selector::Field(field.into()));
        Self { selectors }
    }

    /// A new path with a list index appended.
    pub fn index(&self, index: usize) -> Self {
        let mut selectors = self.selectors.clone();
        selectors.push(Selector::Index(index));
        Self { selectors }
    }

    /// A new path with every selector of `other` appended.
    pub fn join(&self, other: &Path) -> Self {
        let mut selectors = self.selectors.clone();
        selectors.extend(other.selectors.iter().cloned());
        Self { selectors }
    }

    /// The parent path; the root has no parent.
    pub fn parent(&self) -> Option<Self> {
        if self.selectors.is_empty() {
            return None;
        }
        let mut selectors = self.selectors.clone();
        selectors.pop();
        Some(Self { selectors })
    }

    /// True if `self` equals `other` or lies below it.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.selectors.starts_with(&other.selectors)
    }

    /// The remainder of `self` below `prefix`, if `prefix` is a prefix.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Self {
            selectors: self.selectors[prefix.selectors.len()..].to_vec(),
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sel) in self.selectors.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{sel}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl Serialize for Path {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Path {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Path::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_are_symmetric() {
        let path = Path::parse("command.hello.tasks.0.out").unwrap();
        assert_eq!(path.len(), 5);
        assert_eq!(path.selectors()[3], Selector::Index(0));
        assert_eq!(path.to_string(), "command.hello.tasks.0.out");
    }

    #[test]
    fn empty_string_is_root() {
        let path = Path::parse("  ").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "");
        assert!(path.parent().is_none());
    }

    #[test]
    fn empty_segment_is_rejected() {
        let err = Path::parse("a..b").unwrap_err();
        assert!(err.to_string().contains("empty segment"));
    }

    #[test]
    fn prefix_relations() {
        let task = Path::parse("tasks.ask").unwrap();
        let field = Path::parse("tasks.ask.response").unwrap();
        let sibling = Path::parse("tasks.asking").unwrap();

        assert!(field.starts_with(&task));
        assert!(task.starts_with(&task));
        assert!(!sibling.starts_with(&task));
        assert_eq!(field.strip_prefix(&task).unwrap().to_string(), "response");
        assert!(sibling.strip_prefix(&task).is_none());
    }

    #[test]
    fn child_and_join_extend() {
        let base = Path::parse("a").unwrap();
        assert_eq!(base.child("b").index(2).to_string(), "a.b.2");
        let tail = Path::parse("x.y").unwrap();
        assert_eq!(base.join(&tail).to_string(), "a.x.y");
        assert_eq!(base.child("b").parent().unwrap(), base);
    }
}
