//! Schema-to-schema structural diff.
//!
//! Compares two schema trees in a preorder walk over the union of
//! their paths, emitting tagged change records. Statistics never
//! produce a record; only types, the derived required flag, and tree
//! shape do.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::path::FieldPath;
use crate::schema::{SchemaDoc, SchemaNode};
use crate::types::{BsonType, TypeSet};

/// A single structural change between two schemas.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added {
        path: FieldPath,
        types: TypeSet,
    },
    Removed {
        path: FieldPath,
        types: TypeSet,
    },
    TypeChanged {
        path: FieldPath,
        from: TypeSet,
        to: TypeSet,
    },
    ItemsChanged {
        path: FieldPath,
        from: TypeSet,
        to: TypeSet,
    },
    PresenceChanged {
        path: FieldPath,
        from: f64,
        to: f64,
    },
}

impl Change {
    pub fn path(&self) -> &FieldPath {
        match self {
            Change::Added { path, .. }
            | Change::Removed { path, .. }
            | Change::TypeChanged { path, .. }
            | Change::ItemsChanged { path, .. }
            | Change::PresenceChanged { path, .. } => path,
        }
    }
}

/// All changes between a `from` and a `to` schema.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

/// Count summary per change group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl ChangeSet {
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn added(&self) -> impl Iterator<Item = &Change> {
        self.changes
            .iter()
            .filter(|c| matches!(c, Change::Added { .. }))
    }

    pub fn removed(&self) -> impl Iterator<Item = &Change> {
        self.changes
            .iter()
            .filter(|c| matches!(c, Change::Removed { .. }))
    }

    /// Type, items, and presence changes on paths present in both.
    pub fn changed(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| {
            matches!(
                c,
                Change::TypeChanged { .. } | Change::ItemsChanged { .. } | Change::PresenceChanged { .. }
            )
        })
    }

    pub fn summary(&self) -> Summary {
        Summary {
            added: self.added().count(),
            removed: self.removed().count(),
            changed: self.changed().count(),
        }
    }

    /// Drop changes that match a predicate; used by the drift engine
    /// to suppress non-drift records.
    pub fn retain(&mut self, keep: impl FnMut(&Change) -> bool) {
        self.changes.retain(keep);
    }

    /// The grouped JSON form.
    pub fn to_json(&self) -> Value {
        let added: Vec<String> = self.added().map(|c| c.path().dotted()).collect();
        let removed: Vec<String> = self.removed().map(|c| c.path().dotted()).collect();
        let changed: Vec<Value> = self.changed().map(change_entry).collect();
        let summary = self.summary();

        json!({
            "added_fields": added,
            "removed_fields": removed,
            "changed_fields": changed,
            "summary": {
                "added": summary.added,
                "removed": summary.removed,
                "changed": summary.changed,
            },
        })
    }
}

fn change_entry(change: &Change) -> Value {
    match change {
        Change::TypeChanged { path, from, to } => json!({
            "field": path.dotted(),
            "from": { "bsonType": from },
            "to": { "bsonType": to },
        }),
        Change::ItemsChanged { path, from, to } => json!({
            "field": path.dotted(),
            "from": { "bsonType": "array", "items": { "bsonType": from } },
            "to": { "bsonType": "array", "items": { "bsonType": to } },
        }),
        Change::PresenceChanged { path, from, to } => json!({
            "field": path.dotted(),
            "from": { "presence": from },
            "to": { "presence": to },
        }),
        // Added/removed never reach here.
        other => json!({ "field": other.path().dotted() }),
    }
}

/// Diff two schemas. Purely structural and total.
pub fn diff_schemas(from: &SchemaDoc, to: &SchemaDoc) -> ChangeSet {
    let mut changes = Vec::new();
    diff_object(&from.root, &to.root, &FieldPath::root(), &mut changes);

    // Lexicographic order within each group; group membership is
    // resolved at emission time, so a single path-sorted list serves.
    changes.sort_by(|a, b| group_rank(a).cmp(&group_rank(b)).then_with(|| a.path().cmp(b.path())));

    ChangeSet { changes }
}

fn group_rank(change: &Change) -> u8 {
    match change {
        Change::Added { .. } => 0,
        Change::Removed { .. } => 1,
        _ => 2,
    }
}

fn diff_object(from: &SchemaNode, to: &SchemaNode, prefix: &FieldPath, out: &mut Vec<Change>) {
    let names: BTreeSet<&str> = from
        .fields
        .iter()
        .map(|e| e.name.as_str())
        .chain(to.fields.iter().map(|e| e.name.as_str()))
        .collect();

    for name in names {
        let path = prefix.child(name);
        match (from.field(name), to.field(name)) {
            (None, Some(node)) => out.push(Change::Added {
                path,
                types: node.types.clone(),
            }),
            (Some(node), None) => out.push(Change::Removed {
                path,
                types: node.types.clone(),
            }),
            (Some(f), Some(t)) => diff_node(f, t, &path, out),
            (None, None) => unreachable!("name drawn from the union"),
        }
    }
}

fn diff_node(from: &SchemaNode, to: &SchemaNode, path: &FieldPath, out: &mut Vec<Change>) {
    if from.types != to.types {
        out.push(Change::TypeChanged {
            path: path.clone(),
            from: from.types.clone(),
            to: to.types.clone(),
        });
        return;
    }

    if from.is_array() && to.is_array() {
        let from_items = item_types(from);
        let to_items = item_types(to);
        if from_items != to_items {
            out.push(Change::ItemsChanged {
                path: path.clone(),
                from: from_items,
                to: to_items,
            });
        }
    }

    if from.is_object() && to.is_object() {
        // The object node itself is not a change; its children are.
        diff_object(from, to, path, out);
    }

    if from.required() != to.required() {
        out.push(Change::PresenceChanged {
            path: path.clone(),
            from: from.presence,
            to: to.presence,
        });
    }
}

fn item_types(node: &SchemaNode) -> TypeSet {
    node.items
        .as_deref()
        .map(|items| items.types.clone())
        .unwrap_or_else(|| TypeSet::singleton(BsonType::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldEntry;

    fn leaf(tag: BsonType) -> SchemaNode {
        SchemaNode::leaf(TypeSet::singleton(tag))
    }

    fn entry(name: &str, node: SchemaNode) -> FieldEntry {
        FieldEntry {
            name: name.to_string(),
            node,
        }
    }

    fn schema(fields: Vec<FieldEntry>) -> SchemaDoc {
        SchemaDoc::new(SchemaNode::object(fields))
    }

    #[test]
    fn test_added_and_removed() {
        let from = schema(vec![entry("name", leaf(BsonType::String)), entry("legacy", leaf(BsonType::Int32))]);
        let to = schema(vec![entry("name", leaf(BsonType::String)), entry("email", leaf(BsonType::String))]);

        let diff = diff_schemas(&from, &to);
        let summary = diff.summary();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.changed, 0);

        assert!(matches!(
            diff.added().next().unwrap(),
            Change::Added { path, .. } if path.dotted() == "email"
        ));
        assert!(matches!(
            diff.removed().next().unwrap(),
            Change::Removed { path, .. } if path.dotted() == "legacy"
        ));
    }

    #[test]
    fn test_type_change() {
        let from = schema(vec![entry("age", leaf(BsonType::String))]);
        let to = schema(vec![entry("age", leaf(BsonType::Int32))]);

        let diff = diff_schemas(&from, &to);
        assert_eq!(diff.summary().changed, 1);
        assert!(matches!(
            diff.changed().next().unwrap(),
            Change::TypeChanged { path, .. } if path.dotted() == "age"
        ));
    }

    #[test]
    fn test_widened_union_is_one_type_change() {
        let from = schema(vec![entry("address", leaf(BsonType::String))]);
        // A union with object carries children.
        let mut widened = SchemaNode::leaf(
            TypeSet::from_tags([BsonType::String, BsonType::Object]).unwrap(),
        );
        widened.fields = vec![entry("city", leaf(BsonType::String))];
        let to = schema(vec![entry("address", widened)]);

        let diff = diff_schemas(&from, &to);
        assert_eq!(diff.changes().len(), 1);
        assert!(matches!(diff.changes()[0], Change::TypeChanged { .. }));
    }

    #[test]
    fn test_object_recursion_skips_object_node() {
        let from = schema(vec![entry(
            "address",
            SchemaNode::object(vec![entry("city", leaf(BsonType::String))]),
        )]);
        let to = schema(vec![entry(
            "address",
            SchemaNode::object(vec![
                entry("city", leaf(BsonType::String)),
                entry("zip", leaf(BsonType::String)),
            ]),
        )]);

        let diff = diff_schemas(&from, &to);
        assert_eq!(diff.changes().len(), 1);
        assert!(matches!(
            &diff.changes()[0],
            Change::Added { path, .. } if path.dotted() == "address.zip"
        ));
    }

    #[test]
    fn test_items_changed() {
        let from = schema(vec![entry("tags", SchemaNode::array(leaf(BsonType::String)))]);
        let to = schema(vec![entry("tags", SchemaNode::array(leaf(BsonType::Int32)))]);

        let diff = diff_schemas(&from, &to);
        assert_eq!(diff.changes().len(), 1);
        assert!(matches!(
            &diff.changes()[0],
            Change::ItemsChanged { path, .. } if path.dotted() == "tags"
        ));
    }

    #[test]
    fn test_required_toggle_is_presence_change() {
        let from = schema(vec![entry("email", leaf(BsonType::String))]);
        let mut optional = leaf(BsonType::String);
        optional.presence = 0.7;
        let to = schema(vec![entry("email", optional)]);

        let diff = diff_schemas(&from, &to);
        assert_eq!(diff.changes().len(), 1);
        assert!(matches!(
            &diff.changes()[0],
            Change::PresenceChanged { from, to, .. } if *from == 1.0 && *to == 0.7
        ));
    }

    #[test]
    fn test_statistics_alone_never_diff() {
        let from = schema(vec![entry("name", leaf(BsonType::String))]);
        let mut tweaked = leaf(BsonType::String);
        tweaked.presence = 0.9995;
        tweaked.sample_count = 12345;
        let to = schema(vec![entry("name", tweaked)]);

        let diff = diff_schemas(&from, &to);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_groups_sorted_lexicographically() {
        let from = schema(vec![]);
        let to = schema(vec![
            entry("zeta", leaf(BsonType::String)),
            entry("alpha", leaf(BsonType::String)),
        ]);

        let diff = diff_schemas(&from, &to);
        let paths: Vec<String> = diff.added().map(|c| c.path().dotted()).collect();
        assert_eq!(paths, ["alpha", "zeta"]);
    }

    #[test]
    fn test_json_shape() {
        let from = schema(vec![entry("age", leaf(BsonType::String))]);
        let to = schema(vec![
            entry("age", leaf(BsonType::Int32)),
            entry("email", leaf(BsonType::String)),
        ]);

        let json = diff_schemas(&from, &to).to_json();
        assert_eq!(json["added_fields"][0], "email");
        assert_eq!(json["summary"]["added"], 1);
        assert_eq!(json["summary"]["changed"], 1);
        assert_eq!(json["changed_fields"][0]["field"], "age");
        assert_eq!(json["changed_fields"][0]["from"]["bsonType"], "string");
        assert_eq!(json["changed_fields"][0]["to"]["bsonType"], "int");
    }
}
