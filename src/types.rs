//! Canonical type lattice and widening rules.
//!
//! Every document value maps to exactly one tag in [`BsonType`]. Field
//! types are non-empty sets of tags ([`TypeSet`]); `null` participates
//! as the nullable marker and is never collapsed into another tag.
//! Numeric tags (`int`, `long`, `double`, `decimal`) are kept distinct
//! to stay faithful to the underlying binary encoding.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bson::{Bson, Decimal128};
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Atomic type tags, named as the database engine's validator names
/// them (`int`/`long`/`binData`, not `int32`/`int64`/`binary`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BsonType {
    String,
    Int32,
    Int64,
    Double,
    Decimal,
    Bool,
    Date,
    ObjectId,
    Array,
    Object,
    Binary,
    Regex,
    Timestamp,
    JavaScript,
    MinKey,
    MaxKey,
    DbPointer,
    Null,
}

impl BsonType {
    /// The engine-native name, used in schema files and validators.
    pub fn as_str(&self) -> &'static str {
        match self {
            BsonType::String => "string",
            BsonType::Int32 => "int",
            BsonType::Int64 => "long",
            BsonType::Double => "double",
            BsonType::Decimal => "decimal",
            BsonType::Bool => "bool",
            BsonType::Date => "date",
            BsonType::ObjectId => "objectId",
            BsonType::Array => "array",
            BsonType::Object => "object",
            BsonType::Binary => "binData",
            BsonType::Regex => "regex",
            BsonType::Timestamp => "timestamp",
            BsonType::JavaScript => "javascript",
            BsonType::MinKey => "minKey",
            BsonType::MaxKey => "maxKey",
            BsonType::DbPointer => "dbPointer",
            BsonType::Null => "null",
        }
    }

    /// Tag of a live value.
    pub fn of(value: &Bson) -> BsonType {
        match value {
            Bson::Double(_) => BsonType::Double,
            Bson::String(_) | Bson::Symbol(_) => BsonType::String,
            Bson::Array(_) => BsonType::Array,
            Bson::Document(_) => BsonType::Object,
            Bson::Boolean(_) => BsonType::Bool,
            Bson::Null | Bson::Undefined => BsonType::Null,
            Bson::RegularExpression(_) => BsonType::Regex,
            Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => BsonType::JavaScript,
            Bson::Int32(_) => BsonType::Int32,
            Bson::Int64(_) => BsonType::Int64,
            Bson::Timestamp(_) => BsonType::Timestamp,
            Bson::Binary(_) => BsonType::Binary,
            Bson::ObjectId(_) => BsonType::ObjectId,
            Bson::DateTime(_) => BsonType::Date,
            Bson::Decimal128(_) => BsonType::Decimal,
            Bson::MaxKey => BsonType::MaxKey,
            Bson::MinKey => BsonType::MinKey,
            Bson::DbPointer(_) => BsonType::DbPointer,
        }
    }

    /// Lexicographic comparison by engine name; used as the
    /// deterministic tie-break wherever frequency order is unavailable
    /// or tied.
    pub fn lex_cmp(&self, other: &BsonType) -> Ordering {
        self.as_str().cmp(other.as_str())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            BsonType::Int32 | BsonType::Int64 | BsonType::Double | BsonType::Decimal
        )
    }
}

impl fmt::Display for BsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BsonType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(BsonType::String),
            "int" => Ok(BsonType::Int32),
            "long" => Ok(BsonType::Int64),
            "double" => Ok(BsonType::Double),
            "decimal" => Ok(BsonType::Decimal),
            "bool" => Ok(BsonType::Bool),
            "date" => Ok(BsonType::Date),
            "objectId" => Ok(BsonType::ObjectId),
            "array" => Ok(BsonType::Array),
            "object" => Ok(BsonType::Object),
            "binData" => Ok(BsonType::Binary),
            "regex" => Ok(BsonType::Regex),
            "timestamp" => Ok(BsonType::Timestamp),
            "javascript" => Ok(BsonType::JavaScript),
            "minKey" => Ok(BsonType::MinKey),
            "maxKey" => Ok(BsonType::MaxKey),
            "dbPointer" => Ok(BsonType::DbPointer),
            "null" => Ok(BsonType::Null),
            "mixed" => Err("'mixed' is not a type; use an array of type names".to_string()),
            other => Err(format!("unknown bsonType '{other}'")),
        }
    }
}

impl Serialize for BsonType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BsonType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A non-empty, duplicate-free set of type tags.
///
/// The stored order is the emission order: descending observed
/// frequency with a lexicographic tie-break. Equality is *set*
/// equality; order is presentation only.
#[derive(Debug, Clone)]
pub struct TypeSet {
    tags: Vec<BsonType>,
}

impl TypeSet {
    pub fn singleton(tag: BsonType) -> Self {
        TypeSet { tags: vec![tag] }
    }

    /// Build from an explicit ordered list, dropping duplicates while
    /// keeping first-occurrence order. Returns `None` when empty.
    pub fn from_tags(tags: impl IntoIterator<Item = BsonType>) -> Option<Self> {
        let mut out: Vec<BsonType> = Vec::new();
        for tag in tags {
            if !out.contains(&tag) {
                out.push(tag);
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(TypeSet { tags: out })
        }
    }

    /// Build from an observation histogram: descending count, then
    /// lexicographic by name. Returns `None` when the histogram is
    /// empty.
    pub fn from_counts<'a>(counts: impl IntoIterator<Item = (&'a BsonType, &'a u64)>) -> Option<Self> {
        let mut pairs: Vec<(BsonType, u64)> = counts
            .into_iter()
            .filter(|(_, n)| **n > 0)
            .map(|(t, n)| (*t, *n))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.lex_cmp(&b.0)));
        Some(TypeSet {
            tags: pairs.into_iter().map(|(t, _)| t).collect(),
        })
    }

    pub fn tags(&self) -> &[BsonType] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Always false; emptiness is ruled out at construction.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn contains(&self, tag: BsonType) -> bool {
        self.tags.contains(&tag)
    }

    /// Whether `null` is a member (the nullable marker).
    pub fn is_nullable(&self) -> bool {
        self.contains(BsonType::Null)
    }

    /// More than one tag, ignoring the nullable marker.
    pub fn is_union(&self) -> bool {
        self.tags.iter().filter(|t| **t != BsonType::Null).count() > 1
    }

    /// The dominant tag: first in emission order, skipping `null`
    /// unless the set is `{null}` alone.
    pub fn primary(&self) -> BsonType {
        self.tags
            .iter()
            .copied()
            .find(|t| *t != BsonType::Null)
            .unwrap_or(BsonType::Null)
    }

    pub fn is_subset_of(&self, other: &TypeSet) -> bool {
        self.tags.iter().all(|t| other.contains(*t))
    }

    pub fn is_strict_subset_of(&self, other: &TypeSet) -> bool {
        self.is_subset_of(other) && !other.is_subset_of(self)
    }

    /// Widen this set with another. Existing tags keep their order;
    /// new tags append in lexicographic order. Commutative and
    /// associative up to set equality.
    pub fn widen(&self, other: &TypeSet) -> TypeSet {
        let mut tags = self.tags.clone();
        let mut added: Vec<BsonType> = other
            .tags
            .iter()
            .copied()
            .filter(|t| !tags.contains(t))
            .collect();
        added.sort_by(|a, b| a.lex_cmp(b));
        tags.extend(added);
        TypeSet { tags }
    }

    /// Rendering used in messages: a single name, or `[a, b]`.
    pub fn render(&self) -> String {
        if self.tags.len() == 1 {
            self.tags[0].as_str().to_string()
        } else {
            let names: Vec<&str> = self.tags.iter().map(|t| t.as_str()).collect();
            format!("[{}]", names.join(", "))
        }
    }
}

impl PartialEq for TypeSet {
    fn eq(&self, other: &Self) -> bool {
        self.is_subset_of(other) && other.is_subset_of(self)
    }
}

impl Eq for TypeSet {}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for TypeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.tags.len() == 1 {
            self.tags[0].serialize(serializer)
        } else {
            let mut seq = serializer.serialize_seq(Some(self.tags.len()))?;
            for tag in &self.tags {
                seq.serialize_element(tag)?;
            }
            seq.end()
        }
    }
}

impl<'de> Deserialize<'de> for TypeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TypeSetVisitor;

        impl<'de> Visitor<'de> for TypeSetVisitor {
            type Value = TypeSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a type name or a non-empty list of type names")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TypeSet, E> {
                let tag: BsonType = v.parse().map_err(E::custom)?;
                Ok(TypeSet::singleton(tag))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TypeSet, A::Error> {
                let mut tags = Vec::new();
                while let Some(tag) = seq.next_element::<BsonType>()? {
                    tags.push(tag);
                }
                TypeSet::from_tags(tags)
                    .ok_or_else(|| de::Error::custom("type list must not be empty"))
            }
        }

        deserializer.deserialize_any(TypeSetVisitor)
    }
}

/// Client-side rendition of the engine's `$convert` primitive.
///
/// Returns `None` when the conversion is not representable, which the
/// executor records as a `convert_failed` document skip. Converting a
/// value already carrying the target tag returns it unchanged.
pub fn convert_value(value: &Bson, to: BsonType) -> Option<Bson> {
    if BsonType::of(value) == to {
        return Some(value.clone());
    }
    match to {
        BsonType::String => match value {
            Bson::Int32(v) => Some(Bson::String(v.to_string())),
            Bson::Int64(v) => Some(Bson::String(v.to_string())),
            Bson::Double(v) => Some(Bson::String(v.to_string())),
            Bson::Decimal128(v) => Some(Bson::String(v.to_string())),
            Bson::Boolean(v) => Some(Bson::String(v.to_string())),
            Bson::ObjectId(v) => Some(Bson::String(v.to_hex())),
            Bson::DateTime(v) => Some(Bson::String(
                v.try_to_rfc3339_string().unwrap_or_else(|_| v.to_string()),
            )),
            _ => None,
        },
        BsonType::Int32 => match value {
            Bson::Int64(v) => i32::try_from(*v).ok().map(Bson::Int32),
            Bson::Double(v) => double_to_i64(*v)
                .and_then(|n| i32::try_from(n).ok())
                .map(Bson::Int32),
            Bson::Boolean(v) => Some(Bson::Int32(i32::from(*v))),
            Bson::String(s) => s.trim().parse::<i32>().ok().map(Bson::Int32),
            _ => None,
        },
        BsonType::Int64 => match value {
            Bson::Int32(v) => Some(Bson::Int64(i64::from(*v))),
            Bson::Double(v) => double_to_i64(*v).map(Bson::Int64),
            Bson::Boolean(v) => Some(Bson::Int64(i64::from(*v))),
            Bson::String(s) => s.trim().parse::<i64>().ok().map(Bson::Int64),
            Bson::DateTime(v) => Some(Bson::Int64(v.timestamp_millis())),
            _ => None,
        },
        BsonType::Double => match value {
            Bson::Int32(v) => Some(Bson::Double(f64::from(*v))),
            Bson::Int64(v) => Some(Bson::Double(*v as f64)),
            Bson::Boolean(v) => Some(Bson::Double(if *v { 1.0 } else { 0.0 })),
            Bson::String(s) => s.trim().parse::<f64>().ok().map(Bson::Double),
            _ => None,
        },
        // Only string sources; converting binary floats would launder
        // precision into a decimal silently.
        BsonType::Decimal => match value {
            Bson::String(s) => s.trim().parse::<Decimal128>().ok().map(Bson::Decimal128),
            Bson::Int32(v) => v.to_string().parse::<Decimal128>().ok().map(Bson::Decimal128),
            Bson::Int64(v) => v.to_string().parse::<Decimal128>().ok().map(Bson::Decimal128),
            _ => None,
        },
        BsonType::Bool => match value {
            Bson::Int32(v) => Some(Bson::Boolean(*v != 0)),
            Bson::Int64(v) => Some(Bson::Boolean(*v != 0)),
            Bson::Double(v) => Some(Bson::Boolean(*v != 0.0)),
            _ => None,
        },
        BsonType::Date => match value {
            Bson::Int64(millis) => Some(Bson::DateTime(bson::DateTime::from_millis(*millis))),
            Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt.with_timezone(&chrono::Utc)))),
            _ => None,
        },
        BsonType::ObjectId => match value {
            Bson::String(s) => bson::oid::ObjectId::parse_str(s.trim()).ok().map(Bson::ObjectId),
            _ => None,
        },
        _ => None,
    }
}

/// `$convert` truncates doubles toward zero and refuses non-finite or
/// out-of-range inputs.
fn double_to_i64(v: f64) -> Option<i64> {
    if !v.is_finite() {
        return None;
    }
    let truncated = v.trunc();
    if truncated < i64::MIN as f64 || truncated > i64::MAX as f64 {
        return None;
    }
    Some(truncated as i64)
}
