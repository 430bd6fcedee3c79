use std::fmt;

use serde::{Deserialize, Serialize};

/// A dotted field path into a document, e.g. `address.city`.
///
/// Paths are value-typed sequences of field names; the root document
/// is the empty path. Ordering is lexicographic over segments, which
/// matches lexicographic ordering of the dotted rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn root() -> Self {
        FieldPath(Vec::new())
    }

    pub fn field(name: impl Into<String>) -> Self {
        FieldPath(vec![name.into()])
    }

    /// Extend this path with a child segment.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        FieldPath(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The dotted rendering used in change sets, plans, and updates.
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        if s.is_empty() {
            FieldPath::root()
        } else {
            FieldPath(s.split('.').map(str::to_string).collect())
        }
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        FieldPath::from(s.to_string())
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.dotted()
    }
}
