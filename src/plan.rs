//! Migration plan compiler.
//!
//! Derives an ordered, idempotent list of field-level operations from
//! a schema pair. Operations are purely structural — no statistics —
//! and each path appears at most once. Ordering makes re-application
//! converge: removals first (deepest path first), then type changes,
//! then additions (shallowest first).

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diff::{diff_schemas, Change};
use crate::errors::{Error, Result};
use crate::path::FieldPath;
use crate::schema::SchemaDoc;
use crate::types::{BsonType, TypeSet};

/// One field-level operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanOp {
    AddField {
        path: FieldPath,
        #[serde(rename = "bsonType")]
        types: TypeSet,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        requires_input: bool,
    },
    RemoveField {
        path: FieldPath,
    },
    Convert {
        path: FieldPath,
        to: BsonType,
    },
    WrapArray {
        path: FieldPath,
        item_type: BsonType,
    },
    UnwrapArray {
        path: FieldPath,
    },
    ConvertItems {
        path: FieldPath,
        to_item_type: BsonType,
    },
}

impl PlanOp {
    pub fn path(&self) -> &FieldPath {
        match self {
            PlanOp::AddField { path, .. }
            | PlanOp::RemoveField { path }
            | PlanOp::Convert { path, .. }
            | PlanOp::WrapArray { path, .. }
            | PlanOp::UnwrapArray { path }
            | PlanOp::ConvertItems { path, .. } => path,
        }
    }

    /// True for the non-nullable `add_field` the executor must refuse
    /// without an operator override.
    pub fn requires_input(&self) -> bool {
        matches!(self, PlanOp::AddField { requires_input: true, .. })
    }

    fn phase(&self) -> u8 {
        match self {
            PlanOp::RemoveField { .. } => 0,
            PlanOp::Convert { .. }
            | PlanOp::WrapArray { .. }
            | PlanOp::UnwrapArray { .. }
            | PlanOp::ConvertItems { .. } => 1,
            PlanOp::AddField { .. } => 2,
        }
    }
}

/// An ordered operation list; §6.3 is the JSON rendering of `ops`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub ops: Vec<PlanOp>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Paths of operations that refuse to execute without an operator
    /// override.
    pub fn inputs_required(&self) -> Vec<&FieldPath> {
        self.ops
            .iter()
            .filter(|op| op.requires_input())
            .map(|op| op.path())
            .collect()
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.ops).map_err(|err| Error::PlanFormat(err.to_string()))
    }

    pub fn from_json_str(text: &str) -> Result<Plan> {
        let ops: Vec<PlanOp> =
            serde_json::from_str(text).map_err(|err| Error::PlanFormat(err.to_string()))?;
        Ok(Plan { ops })
    }

    pub fn load(path: &Path) -> Result<Plan> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::PlanFormat(format!("{}: {err}", path.display())))?;
        Plan::from_json_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::PlanFormat(format!("{}: {err}", path.display())))?;
        }
        std::fs::write(path, self.to_json_string()?)
            .map_err(|err| Error::PlanFormat(format!("{}: {err}", path.display())))
    }
}

/// Compile the plan transforming `from`-shaped data into `to` shape.
/// Total: every input pair yields a plan (possibly empty).
pub fn compile_plan(from: &SchemaDoc, to: &SchemaDoc) -> Plan {
    let diff = diff_schemas(from, to);
    let mut ops: Vec<PlanOp> = Vec::new();
    let mut seen: BTreeSet<FieldPath> = BTreeSet::new();

    for change in diff.changes() {
        let op = match change {
            Change::Added { path, types } => {
                let nullable = types.is_nullable();
                Some(PlanOp::AddField {
                    path: path.clone(),
                    types: types.clone(),
                    default: nullable.then(|| serde_json::Value::Null),
                    requires_input: !nullable,
                })
            }
            Change::Removed { path, .. } => Some(PlanOp::RemoveField { path: path.clone() }),
            Change::TypeChanged {
                path,
                from: from_types,
                to: to_types,
            } => derive_type_change(path, from_types, to_types, to),
            Change::ItemsChanged {
                path,
                from: from_items,
                to: to_items,
            } => {
                // Union expansion of item types needs no rewrite.
                if from_items.is_strict_subset_of(to_items) {
                    None
                } else {
                    Some(PlanOp::ConvertItems {
                        path: path.clone(),
                        to_item_type: to_items.primary(),
                    })
                }
            }
            // Required toggles have no data-shape consequence.
            Change::PresenceChanged { .. } => None,
        };

        if let Some(op) = op {
            // One operation per path.
            if seen.insert(op.path().clone()) {
                ops.push(op);
            }
        }
    }

    ops.sort_by(|a, b| {
        a.phase().cmp(&b.phase()).then_with(|| match a.phase() {
            // Removals: deepest first.
            0 => b
                .path()
                .depth()
                .cmp(&a.path().depth())
                .then_with(|| a.path().cmp(b.path())),
            // Additions: shallowest first.
            2 => a
                .path()
                .depth()
                .cmp(&b.path().depth())
                .then_with(|| a.path().cmp(b.path())),
            // Type changes: any order; keep it deterministic.
            _ => a.path().cmp(b.path()),
        })
    });

    Plan { ops }
}

fn derive_type_change(
    path: &FieldPath,
    from_types: &TypeSet,
    to_types: &TypeSet,
    to_schema: &SchemaDoc,
) -> Option<PlanOp> {
    // Strict widening: existing data already conforms.
    if from_types.is_strict_subset_of(to_types) {
        return None;
    }

    let from_array = from_types.contains(BsonType::Array);
    let to_array = to_types.contains(BsonType::Array);

    if to_array {
        // Non-array variants in live data get wrapped; documents
        // already holding arrays are untouched by wrap_array.
        let item_type = to_schema
            .node_at(path)
            .and_then(|node| node.items.as_deref())
            .map(|items| items.types.primary())
            .unwrap_or_else(|| from_types.primary());
        return Some(PlanOp::WrapArray {
            path: path.clone(),
            item_type,
        });
    }
    if from_array {
        return Some(PlanOp::UnwrapArray { path: path.clone() });
    }

    let to_primary = to_types.primary();
    if to_primary == BsonType::Null {
        // Target declares nothing but null; nothing to convert to.
        return None;
    }
    Some(PlanOp::Convert {
        path: path.clone(),
        to: to_primary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldEntry, SchemaNode};

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
    fn test_widening_compiles_to_no_op() {
        let from = schema(vec![entry("address", leaf(BsonType::String))]);
        let to = schema(vec![entry(
            "address",
            SchemaNode::leaf(TypeSet::from_tags([BsonType::String, BsonType::Object]).unwrap()),
        )]);

        let plan = compile_plan(&from, &to);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_convert_targets_primary_type() {
        let from = schema(vec![entry("age", leaf(BsonType::String))]);
        let to = schema(vec![entry("age", leaf(BsonType::Int32))]);

        let plan = compile_plan(&from, &to);
        assert_eq!(
            plan.ops,
            vec![PlanOp::Convert {
                path: FieldPath::from("age"),
                to: BsonType::Int32,
            }]
        );
    }

    #[test]
    fn test_nullable_add_carries_null_default() {
        let from = schema(vec![]);
        let to = schema(vec![entry(
            "nickname",
            SchemaNode::leaf(TypeSet::from_tags([BsonType::String, BsonType::Null]).unwrap()),
        )]);

        let plan = compile_plan(&from, &to);
        match &plan.ops[0] {
            PlanOp::AddField {
                default,
                requires_input,
                ..
            } => {
                assert_eq!(default, &Some(serde_json::Value::Null));
                assert!(!requires_input);
            }
            other => panic!("unexpected op {other:?}"),
        }
        assert!(plan.inputs_required().is_empty());
    }

    #[test]
    fn test_non_nullable_add_requires_input() {
        let from = schema(vec![]);
        let to = schema(vec![entry("email", leaf(BsonType::String))]);

        let plan = compile_plan(&from, &to);
        assert!(plan.ops[0].requires_input());
        assert_eq!(plan.inputs_required(), vec![&FieldPath::from("email")]);
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let from = schema(vec![entry("tag", leaf(BsonType::String))]);
        let to = schema(vec![entry("tag", SchemaNode::array(leaf(BsonType::String)))]);

        let plan = compile_plan(&from, &to);
        assert_eq!(
            plan.ops,
            vec![PlanOp::WrapArray {
                path: FieldPath::from("tag"),
                item_type: BsonType::String,
            }]
        );

        let reverse = compile_plan(&to, &from);
        assert_eq!(
            reverse.ops,
            vec![PlanOp::UnwrapArray {
                path: FieldPath::from("tag"),
            }]
        );
    }

    #[test]
    fn test_mixed_union_to_scalar_unwraps() {
        // Live data is mostly strings with an array minority; the
        // array variant still drives the unwrap derivation.
        let from = schema(vec![entry("tag", mixed_scalar_array())]);
        let to = schema(vec![entry("tag", leaf(BsonType::String))]);

        let plan = compile_plan(&from, &to);
        assert_eq!(
            plan.ops,
            vec![PlanOp::UnwrapArray {
                path: FieldPath::from("tag"),
            }]
        );
    }

    #[test]
    fn test_mixed_union_to_array_wraps_scalar_variants() {
        let from = schema(vec![entry("tag", mixed_scalar_array())]);
        let to = schema(vec![entry("tag", SchemaNode::array(leaf(BsonType::String)))]);

        let plan = compile_plan(&from, &to);
        assert_eq!(
            plan.ops,
            vec![PlanOp::WrapArray {
                path: FieldPath::from("tag"),
                item_type: BsonType::String,
            }]
        );
    }

    /// A leaf observed as string more often than array, items child
    /// in place as the tree invariant demands.
    fn mixed_scalar_array() -> SchemaNode {
        let mut node = SchemaNode::leaf(
            TypeSet::from_tags([BsonType::String, BsonType::Array]).unwrap(),
        );
        node.items = Some(Box::new(SchemaNode::leaf(TypeSet::singleton(BsonType::String))));
        node
    }

    #[test]
    fn test_items_change_compiles_to_convert_items() {
        let from = schema(vec![entry("scores", SchemaNode::array(leaf(BsonType::String)))]);
        let to = schema(vec![entry("scores", SchemaNode::array(leaf(BsonType::Int32)))]);

        let plan = compile_plan(&from, &to);
        assert_eq!(
            plan.ops,
            vec![PlanOp::ConvertItems {
                path: FieldPath::from("scores"),
                to_item_type: BsonType::Int32,
            }]
        );
    }

    #[test]
    fn test_ordering_removals_then_changes_then_adds() {
        let from = schema(vec![
            entry("age", leaf(BsonType::String)),
            entry(
                "meta",
                SchemaNode::object(vec![entry("legacy", leaf(BsonType::String))]),
            ),
            entry("old_top", leaf(BsonType::String)),
        ]);
        let to = schema(vec![
            entry("age", leaf(BsonType::Int32)),
            entry("meta", SchemaNode::object(vec![])),
            entry(
                "nickname",
                SchemaNode::leaf(TypeSet::from_tags([BsonType::String, BsonType::Null]).unwrap()),
            ),
        ]);

        let plan = compile_plan(&from, &to);
        let kinds: Vec<u8> = plan.ops.iter().map(|op| op.phase()).collect();
        let mut sorted = kinds.clone();
        sorted.sort_unstable();
        assert_eq!(kinds, sorted, "phases out of order: {:?}", plan.ops);

        // Deepest removal first.
        assert_eq!(plan.ops[0].path().dotted(), "meta.legacy");
        assert_eq!(plan.ops[1].path().dotted(), "old_top");
    }

    #[test]
    fn test_no_duplicate_paths() {
        let from = schema(vec![entry("a", leaf(BsonType::String))]);
        let to = schema(vec![entry("a", leaf(BsonType::Int32))]);

        let plan = compile_plan(&from, &to);
        let mut paths: Vec<_> = plan.ops.iter().map(|op| op.path().clone()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), plan.ops.len());
    }

    #[test]
    fn test_plan_file_roundtrip() {
        let from = schema(vec![
            entry("age", leaf(BsonType::String)),
            entry("legacy", leaf(BsonType::String)),
        ]);
        let to = schema(vec![
            entry("age", leaf(BsonType::Int32)),
            entry(
                "nickname",
                SchemaNode::leaf(TypeSet::from_tags([BsonType::String, BsonType::Null]).unwrap()),
            ),
        ]);

        let plan = compile_plan(&from, &to);
        let text = plan.to_json_string().unwrap();
        let parsed = Plan::from_json_str(&text).unwrap();

        assert_eq!(parsed.len(), plan.len());
        for (a, b) in plan.ops.iter().zip(parsed.ops.iter()) {
            assert_eq!(a.path(), b.path());
            assert_eq!(a.requires_input(), b.requires_input());
        }
    }

    #[test]
    fn test_plan_json_op_tags() {
        let from = schema(vec![entry("age", leaf(BsonType::String))]);
        let to = schema(vec![entry("age", leaf(BsonType::Int32))]);

        let text = compile_plan(&from, &to).to_json_string().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["op"], "convert");
        assert_eq!(value[0]["path"], "age");
        assert_eq!(value[0]["to"], "int");
    }
}
