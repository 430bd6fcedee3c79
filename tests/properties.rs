//! Property invariants: widening laws, round-trips, determinism, and
//! plan convergence.

use bson::{Bson, Document};
use proptest::prelude::*;

use mschema::executor::mutation_for;
use mschema::infer::infer_from_documents;
use mschema::plan::{compile_plan, Plan, PlanOp};
use mschema::schema_io::{emit_string, parse_str};
use mschema::validator::{build_validator, parse_validator};
use mschema::{detect_drift, BsonType, FieldPath, SchemaDoc, SchemaNode, TypeSet};
use mschema::drift::Severity;
use mschema::schema::FieldEntry;

const ALL_TAGS: &[BsonType] = &[
    BsonType::String,
    BsonType::Int32,
    BsonType::Int64,
    BsonType::Double,
    BsonType::Decimal,
    BsonType::Bool,
    BsonType::Date,
    BsonType::ObjectId,
    BsonType::Binary,
    BsonType::Regex,
    BsonType::Timestamp,
    BsonType::JavaScript,
    BsonType::MinKey,
    BsonType::MaxKey,
    BsonType::DbPointer,
    BsonType::Null,
];

// Scalar tags only, so generated nodes keep the container invariants
// (object implies fields, array implies items) trivially true.
const SCALAR_TAGS: &[BsonType] = &[
    BsonType::String,
    BsonType::Int32,
    BsonType::Int64,
    BsonType::Double,
    BsonType::Bool,
    BsonType::Date,
    BsonType::ObjectId,
];

fn typeset_strategy() -> impl Strategy<Value = TypeSet> {
    prop::sample::subsequence(ALL_TAGS.to_vec(), 1..=5)
        .prop_map(|tags| TypeSet::from_tags(tags).expect("non-empty subsequence"))
}

fn leaf_strategy() -> impl Strategy<Value = SchemaNode> {
    (
        prop::sample::subsequence(SCALAR_TAGS.to_vec(), 1..=3),
        any::<bool>(),
        0.0f64..=1.0f64,
    )
        .prop_map(|(mut tags, nullable, presence)| {
            if nullable {
                tags.push(BsonType::Null);
            }
            let mut node = SchemaNode::leaf(TypeSet::from_tags(tags).expect("non-empty"));
            node.presence = presence;
            node.null_rate = if nullable { 0.1 } else { 0.0 };
            node
        })
}

fn node_strategy() -> impl Strategy<Value = SchemaNode> {
    leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::btree_map("[a-z]{1,6}", inner.clone(), 1..4).prop_map(|fields| {
                SchemaNode::object(
                    fields
                        .into_iter()
                        .map(|(name, node)| FieldEntry { name, node })
                        .collect(),
                )
            }),
            inner.prop_map(|mut items| {
                // Inference always records full presence for items
                // (the denominator is the observed elements).
                items.presence = 1.0;
                SchemaNode::array(items)
            }),
        ]
    })
}

fn schema_strategy() -> impl Strategy<Value = SchemaDoc> {
    prop::collection::btree_map("[a-z]{1,6}", node_strategy(), 0..5).prop_map(|fields| {
        SchemaDoc::new(SchemaNode::object(
            fields
                .into_iter()
                .map(|(name, node)| FieldEntry { name, node })
                .collect(),
        ))
    })
}

fn scalar_bson_strategy() -> impl Strategy<Value = Bson> {
    prop_oneof![
        any::<i32>().prop_map(Bson::Int32),
        "[a-z0-9]{0,8}".prop_map(Bson::String),
        any::<bool>().prop_map(Bson::Boolean),
        (-1.0e9f64..1.0e9f64).prop_map(Bson::Double),
        Just(Bson::Null),
    ]
}

fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(
        prop::sample::select(vec!["alpha", "beta", "gamma", "delta"]),
        scalar_bson_strategy(),
        0..4,
    )
    .prop_map(|map| {
        let mut doc = Document::new();
        for (key, value) in map {
            doc.insert(key, value);
        }
        doc
    })
}

proptest! {
    #[test]
    fn widen_yields_a_superset(a in typeset_strategy(), b in typeset_strategy()) {
        let w = a.widen(&b);
        prop_assert!(a.is_subset_of(&w));
        prop_assert!(b.is_subset_of(&w));
    }

    #[test]
    fn widen_is_commutative(a in typeset_strategy(), b in typeset_strategy()) {
        prop_assert_eq!(a.widen(&b), b.widen(&a));
    }

    #[test]
    fn widen_is_associative(
        a in typeset_strategy(),
        b in typeset_strategy(),
        c in typeset_strategy(),
    ) {
        prop_assert_eq!(a.widen(&b).widen(&c), a.widen(&b.widen(&c)));
    }

    #[test]
    fn schema_file_roundtrip(schema in schema_strategy()) {
        let text = emit_string(&schema).expect("emit");
        let parsed = parse_str(&text).expect("parse");
        prop_assert!(
            schema.structural_eq(&parsed),
            "round-trip changed structure:\n{}",
            text
        );
    }

    #[test]
    fn validator_roundtrip(schema in schema_strategy()) {
        let validator = build_validator(&schema);
        let parsed = parse_validator(&validator).expect("parse validator");
        prop_assert!(schema.structural_eq(&parsed));
    }

    #[test]
    fn inference_is_order_insensitive(docs in prop::collection::vec(document_strategy(), 0..20)) {
        let forward = infer_from_documents(&docs);
        let mut reversed = docs.clone();
        reversed.reverse();
        let backward = infer_from_documents(&reversed);
        prop_assert!(forward.schema.structural_eq(&backward.schema));
    }

    #[test]
    fn narrower_live_types_produce_no_drift(expected_types in typeset_strategy()) {
        let observed_tags: Vec<BsonType> = expected_types.tags().to_vec();
        // Any non-empty prefix of the expected tags is a narrower or
        // equal live type set.
        for take in 1..=observed_tags.len() {
            let observed_types = TypeSet::from_tags(observed_tags[..take].iter().copied())
                .expect("non-empty");

            let expected = one_field_schema("value", expected_types.clone());
            let observed = one_field_schema("value", observed_types);

            let report = detect_drift(&expected, &observed);
            prop_assert_eq!(report.count(Severity::Critical), 0);
        }
    }

    #[test]
    fn plans_have_unique_paths_and_ordered_phases(
        from in schema_strategy(),
        to in schema_strategy(),
    ) {
        let plan = compile_plan(&from, &to);

        let mut paths: Vec<FieldPath> = plan.ops.iter().map(|op| op.path().clone()).collect();
        paths.sort();
        let before = paths.len();
        paths.dedup();
        prop_assert_eq!(before, paths.len(), "duplicate paths in plan");

        let phases: Vec<u8> = plan.ops.iter().map(phase_of).collect();
        let mut sorted = phases.clone();
        sorted.sort_unstable();
        prop_assert_eq!(phases, sorted, "phases out of order");
    }

    #[test]
    fn mutations_converge_in_one_application(doc in document_strategy()) {
        let plan = fixture_plan();
        let (mutation, _skips) = mutation_for(&doc, &plan, &Default::default());

        let mut migrated = doc.clone();
        mutation.apply(&mut migrated);

        let (second, _skips) = mutation_for(&migrated, &plan, &Default::default());
        prop_assert!(
            second.is_empty(),
            "plan did not converge: {:?} -> {:?}",
            doc,
            second
        );
    }
}

fn one_field_schema(name: &str, types: TypeSet) -> SchemaDoc {
    SchemaDoc::new(SchemaNode::object(vec![FieldEntry {
        name: name.to_string(),
        node: SchemaNode::leaf(types),
    }]))
}

fn phase_of(op: &PlanOp) -> u8 {
    match op {
        PlanOp::RemoveField { .. } => 0,
        PlanOp::AddField { .. } => 2,
        _ => 1,
    }
}

/// A plan exercising convert, wrap, add, and remove at once.
fn fixture_plan() -> Plan {
    Plan {
        ops: vec![
            PlanOp::RemoveField {
                path: FieldPath::from("delta"),
            },
            PlanOp::Convert {
                path: FieldPath::from("alpha"),
                to: BsonType::Int64,
            },
            PlanOp::WrapArray {
                path: FieldPath::from("beta"),
                item_type: BsonType::String,
            },
            PlanOp::AddField {
                path: FieldPath::from("omega"),
                types: TypeSet::from_tags([BsonType::String, BsonType::Null]).expect("types"),
                default: Some(serde_json::Value::Null),
                requires_input: false,
            },
        ],
    }
}
