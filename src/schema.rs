//! In-memory schema tree.
//!
//! A schema is an owned value tree rooted at an implicit document
//! node. Each node carries a type set plus presence statistics; object
//! nodes carry named children, array nodes carry an `items` child.
//! Statistics are advisory — structural shape (types, children,
//! derived `required`) is what the diff, plan, and validator layers
//! consume.

use crate::path::FieldPath;
use crate::types::{BsonType, TypeSet};

/// Presence threshold above which a field with no observed nulls is
/// considered required.
pub const REQUIRED_PRESENCE: f64 = 0.999;

/// One node in the schema tree.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    /// Observed (or declared) type tags, in emission order.
    pub types: TypeSet,
    /// Fraction of parent containers in which the field was observed.
    pub presence: f64,
    /// Fraction of observations whose value was null.
    pub null_rate: f64,
    /// Denominator for `null_rate`.
    pub sample_count: u64,
    /// Named children; populated iff `types` contains `object`.
    pub fields: Vec<FieldEntry>,
    /// Item node; populated iff `types` contains `array`.
    pub items: Option<Box<SchemaNode>>,
}

/// A named child of an object node.
#[derive(Debug, Clone)]
pub struct FieldEntry {
    pub name: String,
    pub node: SchemaNode,
}

impl SchemaNode {
    /// A leaf with full presence and no observed nulls.
    pub fn leaf(types: TypeSet) -> Self {
        SchemaNode {
            types,
            presence: 1.0,
            null_rate: 0.0,
            sample_count: 0,
            fields: Vec::new(),
            items: None,
        }
    }

    /// An object node over the given children.
    pub fn object(fields: Vec<FieldEntry>) -> Self {
        SchemaNode {
            types: TypeSet::singleton(BsonType::Object),
            presence: 1.0,
            null_rate: 0.0,
            sample_count: 0,
            fields,
            items: None,
        }
    }

    /// An array node over the given item node.
    pub fn array(items: SchemaNode) -> Self {
        SchemaNode {
            types: TypeSet::singleton(BsonType::Array),
            presence: 1.0,
            null_rate: 0.0,
            sample_count: 0,
            fields: Vec::new(),
            items: Some(Box::new(items)),
        }
    }

    /// Derived, never stored: presence ≥ 0.999 with a zero null rate.
    /// A nullable type set is never required; for inferred schemas the
    /// null tag and a positive null rate coincide, so the extra check
    /// only matters for parsed declarations.
    pub fn required(&self) -> bool {
        self.presence >= REQUIRED_PRESENCE
            && self.null_rate == 0.0
            && !self.types.is_nullable()
    }

    pub fn is_object(&self) -> bool {
        self.types.contains(BsonType::Object)
    }

    pub fn is_array(&self) -> bool {
        self.types.contains(BsonType::Array)
    }

    pub fn field(&self, name: &str) -> Option<&SchemaNode> {
        self.fields
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.node)
    }

    /// Sort children into the deterministic emission order (descending
    /// presence, then name), recursively.
    pub fn sort_canonical(&mut self) {
        self.fields.sort_by(|a, b| {
            b.node
                .presence
                .partial_cmp(&a.node.presence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        for entry in &mut self.fields {
            entry.node.sort_canonical();
        }
        if let Some(items) = self.items.as_mut() {
            items.sort_canonical();
        }
    }

    /// Structural equality: isomorphic trees with equal type sets and
    /// equal derived `required` flags. Statistics do not participate.
    pub fn structural_eq(&self, other: &SchemaNode) -> bool {
        if self.types != other.types || self.required() != other.required() {
            return false;
        }
        match (&self.items, &other.items) {
            (Some(a), Some(b)) => {
                if !a.structural_eq(b) {
                    return false;
                }
            }
            (None, None) => {}
            _ => return false,
        }
        if self.fields.len() != other.fields.len() {
            return false;
        }
        // Order-insensitive: field order is presentation only.
        self.fields.iter().all(|entry| {
            other
                .field(&entry.name)
                .map(|node| entry.node.structural_eq(node))
                .unwrap_or(false)
        })
    }

    /// Number of named field nodes in the subtree, this node excluded.
    /// Array `items` nodes are not counted (they are unnamed).
    pub fn field_count(&self) -> usize {
        self.fields
            .iter()
            .map(|entry| 1 + entry.node.field_count())
            .sum::<usize>()
            + self
                .items
                .as_ref()
                .map(|items| items.field_count())
                .unwrap_or(0)
    }

    /// Preorder walk over named fields, yielding each path and node.
    pub fn walk<'a>(&'a self, prefix: &FieldPath, visit: &mut dyn FnMut(&FieldPath, &'a SchemaNode)) {
        for entry in &self.fields {
            let path = prefix.child(&entry.name);
            visit(&path, &entry.node);
            entry.node.walk(&path, visit);
        }
    }
}

/// A complete schema document: a version marker plus the root object.
#[derive(Debug, Clone)]
pub struct SchemaDoc {
    pub version: u32,
    pub root: SchemaNode,
}

/// The only file-format version currently understood.
pub const SCHEMA_FILE_VERSION: u32 = 1;

impl SchemaDoc {
    pub fn new(root: SchemaNode) -> Self {
        SchemaDoc {
            version: SCHEMA_FILE_VERSION,
            root,
        }
    }

    /// An empty schema (no fields).
    pub fn empty() -> Self {
        SchemaDoc::new(SchemaNode::object(Vec::new()))
    }

    pub fn structural_eq(&self, other: &SchemaDoc) -> bool {
        self.root.structural_eq(&other.root)
    }

    /// Total named field count, used as the drift-score denominator.
    pub fn field_count(&self) -> usize {
        self.root.field_count()
    }

    /// Look up a node by path.
    pub fn node_at(&self, path: &FieldPath) -> Option<&SchemaNode> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.field(segment)?;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tag: BsonType) -> SchemaNode {
        SchemaNode::leaf(TypeSet::singleton(tag))
    }

    fn entry(name: &str, node: SchemaNode) -> FieldEntry {
        FieldEntry {
            name: name.to_string(),
            node,
        }
    }

    #[test]
    fn test_required_is_derived() {
        let mut node = leaf(BsonType::String);
        assert!(node.required());

        node.presence = 0.95;
        assert!(!node.required());

        node.presence = 1.0;
        node.null_rate = 0.01;
        assert!(!node.required());
    }

    #[test]
    fn test_canonical_order_presence_then_name() {
        let mut a = leaf(BsonType::String);
        a.presence = 0.5;
        let b = leaf(BsonType::String);
        let c = leaf(BsonType::String);

        let mut root = SchemaNode::object(vec![entry("zeta", a), entry("beta", c), entry("alpha", b)]);
        root.sort_canonical();

        let names: Vec<&str> = root.fields.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta", "zeta"]);
    }

    #[test]
    fn test_structural_eq_ignores_statistics() {
        let mut a = leaf(BsonType::String);
        a.sample_count = 10;
        let mut b = leaf(BsonType::String);
        b.sample_count = 999;
        b.presence = 0.9995;
        assert!(a.structural_eq(&b));
    }

    #[test]
    fn test_structural_eq_sees_required_toggle() {
        let a = leaf(BsonType::String);
        let mut b = leaf(BsonType::String);
        b.presence = 0.5;
        assert!(!a.structural_eq(&b));
    }

    #[test]
    fn test_structural_eq_is_order_insensitive() {
        let a = SchemaNode::object(vec![
            entry("x", leaf(BsonType::Int32)),
            entry("y", leaf(BsonType::String)),
        ]);
        let b = SchemaNode::object(vec![
            entry("y", leaf(BsonType::String)),
            entry("x", leaf(BsonType::Int32)),
        ]);
        assert!(a.structural_eq(&b));
    }

    #[test]
    fn test_field_count_recurses() {
        let address = SchemaNode::object(vec![
            entry("city", leaf(BsonType::String)),
            entry("zip", leaf(BsonType::String)),
        ]);
        let doc = SchemaDoc::new(SchemaNode::object(vec![
            entry("name", leaf(BsonType::String)),
            entry("address", address),
        ]));
        assert_eq!(doc.field_count(), 4);
    }

    #[test]
    fn test_node_at_walks_nested_paths() {
        let address = SchemaNode::object(vec![entry("city", leaf(BsonType::String))]);
        let doc = SchemaDoc::new(SchemaNode::object(vec![entry("address", address)]));

        assert!(doc.node_at(&FieldPath::from("address.city")).is_some());
        assert!(doc.node_at(&FieldPath::from("address.street")).is_none());
    }
}
