//! Narrow abstraction over the document store.
//!
//! [`DatabaseAdapter`] is the only source of I/O and non-determinism
//! in the crate; inference, diff, planning, and mutation computation
//! are pure given its outputs. [`MongoAdapter`] talks to a live
//! deployment; [`MemoryAdapter`] is a deterministic in-process store
//! used by the tests and for offline rehearsal of plans.

use std::collections::{BTreeMap, BTreeSet};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::stream::{self, Stream, TryStreamExt};
use log::debug;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{AggregateOptions, CountOptions, FindOptions};
use mongodb::Client;

use crate::errors::AdapterError;

/// Key-ordered stream of `(key, document)` pairs.
pub type DocumentStream =
    Pin<Box<dyn Stream<Item = Result<(String, Document), AdapterError>> + Send>>;

/// Outcome of a single-document update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Validation enforcement level for `set_validator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Off,
    Moderate,
    Strict,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Off => "off",
            ValidationLevel::Moderate => "moderate",
            ValidationLevel::Strict => "strict",
        }
    }
}

/// Action the engine takes on validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationAction {
    Warn,
    Error,
}

impl ValidationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationAction::Warn => "warn",
            ValidationAction::Error => "error",
        }
    }
}

/// The materialised changes for one document: dotted-path sets and
/// unsets. Adapters receive values already converted; no adapter-side
/// type logic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationSet {
    pub set: Document,
    pub unset: Vec<String>,
}

impl MutationSet {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// The engine-native update document.
    pub fn to_update_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.unset.is_empty() {
            let mut unset = Document::new();
            for path in &self.unset {
                unset.insert(path.clone(), "");
            }
            update.insert("$unset", unset);
        }
        update
    }

    /// Apply in-process, with the engine's dotted-path semantics
    /// (intermediate objects are created on set).
    pub fn apply(&self, doc: &mut Document) {
        for (path, value) in &self.set {
            set_dotted(doc, path, value.clone());
        }
        for path in &self.unset {
            unset_dotted(doc, path);
        }
    }
}

fn set_dotted(doc: &mut Document, path: &str, value: Bson) {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Bson::Document(Document::new()));
        if !matches!(slot, Bson::Document(_)) {
            *slot = Bson::Document(Document::new());
        }
        match slot {
            Bson::Document(sub) => current = sub,
            _ => unreachable!("slot forced to a document above"),
        }
    }
}

fn unset_dotted(doc: &mut Document, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for segment in &segments[..segments.len() - 1] {
        match current.get_mut(*segment) {
            Some(Bson::Document(sub)) => current = sub,
            _ => return,
        }
    }
    current.remove(segments[segments.len() - 1]);
}

/// Render a primary key as the opaque string form used for resume
/// markers and progress records.
pub fn render_key(key: &Bson) -> String {
    match key {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        other => other.to_string(),
    }
}

/// Reverse of [`render_key`] as far as the engine needs: a 24-hex
/// string becomes an ObjectId, anything else stays a string.
pub fn parse_key(key: &str) -> Bson {
    match bson::oid::ObjectId::parse_str(key) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(key.to_string()),
    }
}

/// The narrow interface consumed by inference, drift, and the
/// executor.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Total document count.
    async fn count(&self, collection: &str) -> Result<u64, AdapterError>;

    /// Up to `n` documents, uniformly sampled, any order.
    async fn sample(&self, collection: &str, n: u64) -> Result<Vec<Document>, AdapterError>;

    /// Key-ordered iteration, starting strictly after `after_key`.
    async fn iterate(
        &self,
        collection: &str,
        after_key: Option<&str>,
    ) -> Result<DocumentStream, AdapterError>;

    /// Atomic single-document update.
    async fn update_one(
        &self,
        collection: &str,
        key: &str,
        mutation: &MutationSet,
    ) -> Result<UpdateOutcome, AdapterError>;

    /// Insert one document, returning its key. Used by the analysis
    /// history writer, not by the migration path.
    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, AdapterError>;

    /// Install the validator document on the collection.
    async fn set_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> Result<(), AdapterError>;
}

/// Index metadata, used only by the advisory recommendations.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Vec<(String, i32)>,
    pub unique: bool,
}

/// Live MongoDB adapter.
pub struct MongoAdapter {
    client: Client,
    database: String,
    op_timeout: Option<Duration>,
}

impl MongoAdapter {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AdapterError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(MongoAdapter {
            client,
            database: database.to_string(),
            op_timeout: Some(Duration::from_secs(30)),
        })
    }

    pub fn with_op_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.database).collection(name)
    }

    /// Existing indexes; not part of the narrow adapter trait — only
    /// the advisory recommendation path uses it.
    pub async fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>, AdapterError> {
        let mut cursor = self.collection(collection).list_indexes(None).await?;
        let mut indexes = Vec::new();
        while let Some(model) = cursor.try_next().await? {
            let keys: Vec<(String, i32)> = model
                .keys
                .iter()
                .map(|(k, v)| (k.clone(), v.as_i32().unwrap_or(1)))
                .collect();
            let options = model.options.unwrap_or_default();
            indexes.push(IndexInfo {
                name: options.name.unwrap_or_default(),
                keys,
                unique: options.unique.unwrap_or(false),
            });
        }
        Ok(indexes)
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    async fn count(&self, collection: &str) -> Result<u64, AdapterError> {
        let options = CountOptions::builder().max_time(self.op_timeout).build();
        Ok(self.collection(collection).count_documents(None, options).await?)
    }

    async fn sample(&self, collection: &str, n: u64) -> Result<Vec<Document>, AdapterError> {
        let coll = self.collection(collection);
        let total = self.count(collection).await?;

        // `$sample` over the whole collection degenerates to a scan
        // anyway; read it directly when the sample covers everything.
        let mut cursor = if n >= total {
            coll.find(None, FindOptions::builder().max_time(self.op_timeout).build())
                .await?
        } else {
            let pipeline = vec![doc! { "$sample": { "size": n as i64 } }];
            let options = AggregateOptions::builder().max_time(self.op_timeout).build();
            coll.aggregate(pipeline, options).await?
        };

        let mut docs = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            docs.push(doc);
            if docs.len() as u64 >= n {
                break;
            }
        }
        debug!("sampled {} documents from '{}'", docs.len(), collection);
        Ok(docs)
    }

    async fn iterate(
        &self,
        collection: &str,
        after_key: Option<&str>,
    ) -> Result<DocumentStream, AdapterError> {
        let filter = after_key.map(|key| doc! { "_id": { "$gt": parse_key(key) } });
        let options = FindOptions::builder()
            .sort(doc! { "_id": 1 })
            .max_time(self.op_timeout)
            .build();
        let cursor = self.collection(collection).find(filter, options).await?;

        let stream = cursor.map_err(AdapterError::from).and_then(|doc| async move {
            let key = doc
                .get("_id")
                .map(render_key)
                .ok_or_else(|| AdapterError::Other("document without _id".to_string()))?;
            Ok((key, doc))
        });
        Ok(Box::pin(stream))
    }

    async fn update_one(
        &self,
        collection: &str,
        key: &str,
        mutation: &MutationSet,
    ) -> Result<UpdateOutcome, AdapterError> {
        let filter = doc! { "_id": parse_key(key) };
        let update = mutation.to_update_document();
        let result = self
            .collection(collection)
            .update_one(filter, update, None)
            .await
            .map_err(|err| classify_write_error(key, err))?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, AdapterError> {
        let result = self.collection(collection).insert_one(doc, None).await?;
        Ok(render_key(&result.inserted_id))
    }

    async fn set_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> Result<(), AdapterError> {
        let command = doc! {
            "collMod": collection,
            "validator": validator,
            "validationLevel": level.as_str(),
            "validationAction": action.as_str(),
        };
        self.client
            .database(&self.database)
            .run_command(command, None)
            .await?;
        Ok(())
    }
}

/// Write errors scoped to one document stay per-document; everything
/// else propagates as a batch-level failure.
fn classify_write_error(key: &str, err: mongodb::error::Error) -> AdapterError {
    let document_message = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            Some(write_error.message.clone())
        }
        _ => None,
    };
    match document_message {
        Some(message) => AdapterError::document(key, message),
        None => AdapterError::Driver(err),
    }
}

#[derive(Default)]
struct MemoryInner {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
    validators: BTreeMap<String, (Document, ValidationLevel, ValidationAction)>,
    fail_keys: BTreeSet<(String, String)>,
}

/// Deterministic in-process adapter. Documents are keyed by the
/// string form of `_id`; iteration order is key order.
#[derive(Default)]
pub struct MemoryAdapter {
    inner: Mutex<MemoryInner>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        MemoryAdapter::default()
    }

    /// Insert documents, keying each by its `_id` (string form).
    pub fn insert_many(&self, collection: &str, docs: impl IntoIterator<Item = Document>) {
        let mut inner = self.inner.lock().expect("memory adapter poisoned");
        let coll = inner.collections.entry(collection.to_string()).or_default();
        for doc in docs {
            let key = doc
                .get("_id")
                .map(render_key)
                .unwrap_or_else(|| format!("auto-{}", coll.len()));
            coll.insert(key, doc);
        }
    }

    /// Snapshot of a collection in key order.
    pub fn documents(&self, collection: &str) -> Vec<(String, Document)> {
        let inner = self.inner.lock().expect("memory adapter poisoned");
        inner
            .collections
            .get(collection)
            .map(|coll| coll.iter().map(|(k, d)| (k.clone(), d.clone())).collect())
            .unwrap_or_default()
    }

    /// The installed validator, if any.
    pub fn validator(&self, collection: &str) -> Option<Document> {
        let inner = self.inner.lock().expect("memory adapter poisoned");
        inner
            .validators
            .get(collection)
            .map(|(validator, _, _)| validator.clone())
    }

    /// Make the next `update_one` for this key fail at document level.
    pub fn fail_update(&self, collection: &str, key: &str) {
        let mut inner = self.inner.lock().expect("memory adapter poisoned");
        inner
            .fail_keys
            .insert((collection.to_string(), key.to_string()));
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    async fn count(&self, collection: &str) -> Result<u64, AdapterError> {
        let inner = self.inner.lock().expect("memory adapter poisoned");
        Ok(inner
            .collections
            .get(collection)
            .map(|coll| coll.len() as u64)
            .unwrap_or(0))
    }

    async fn sample(&self, collection: &str, n: u64) -> Result<Vec<Document>, AdapterError> {
        // Uniformity is the live adapter's concern; key order is fine
        // for an in-process store and keeps tests deterministic.
        let inner = self.inner.lock().expect("memory adapter poisoned");
        Ok(inner
            .collections
            .get(collection)
            .map(|coll| coll.values().take(n as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn iterate(
        &self,
        collection: &str,
        after_key: Option<&str>,
    ) -> Result<DocumentStream, AdapterError> {
        let snapshot = {
            let inner = self.inner.lock().expect("memory adapter poisoned");
            inner
                .collections
                .get(collection)
                .map(|coll| {
                    coll.iter()
                        .filter(|(key, _)| after_key.map_or(true, |after| key.as_str() > after))
                        .map(|(k, d)| (k.clone(), d.clone()))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        Ok(Box::pin(stream::iter(snapshot.into_iter().map(Ok))))
    }

    async fn update_one(
        &self,
        collection: &str,
        key: &str,
        mutation: &MutationSet,
    ) -> Result<UpdateOutcome, AdapterError> {
        let mut inner = self.inner.lock().expect("memory adapter poisoned");

        if inner
            .fail_keys
            .remove(&(collection.to_string(), key.to_string()))
        {
            return Err(AdapterError::document(key, "injected write failure"));
        }

        let coll = match inner.collections.get_mut(collection) {
            Some(coll) => coll,
            None => return Ok(UpdateOutcome { matched: 0, modified: 0 }),
        };
        match coll.get_mut(key) {
            Some(doc) => {
                let before = doc.clone();
                mutation.apply(doc);
                let modified = u64::from(*doc != before);
                Ok(UpdateOutcome {
                    matched: 1,
                    modified,
                })
            }
            None => Ok(UpdateOutcome { matched: 0, modified: 0 }),
        }
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> Result<String, AdapterError> {
        let mut inner = self.inner.lock().expect("memory adapter poisoned");
        let coll = inner.collections.entry(collection.to_string()).or_default();
        let key = doc
            .get("_id")
            .map(render_key)
            .unwrap_or_else(|| format!("auto-{}", coll.len()));
        coll.insert(key.clone(), doc);
        Ok(key)
    }

    async fn set_validator(
        &self,
        collection: &str,
        validator: Document,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> Result<(), AdapterError> {
        let mut inner = self.inner.lock().expect("memory adapter poisoned");
        inner
            .validators
            .insert(collection.to_string(), (validator, level, action));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_set_update_document() {
        let mut mutation = MutationSet::default();
        mutation.set.insert("age", Bson::Int32(30));
        mutation.unset.push("legacy".to_string());

        let update = mutation.to_update_document();
        assert_eq!(update.get_document("$set").unwrap().get_i32("age").unwrap(), 30);
        assert!(update.get_document("$unset").unwrap().contains_key("legacy"));
    }

    #[test]
    fn test_dotted_set_creates_intermediates() {
        let mut doc = doc! { "name": "ada" };
        let mut mutation = MutationSet::default();
        mutation.set.insert("address.city", Bson::String("london".into()));
        mutation.apply(&mut doc);

        assert_eq!(
            doc.get_document("address").unwrap().get_str("city").unwrap(),
            "london"
        );
    }

    #[test]
    fn test_dotted_unset_removes_leaf() {
        let mut doc = doc! { "address": { "city": "london", "zip": "NW1" } };
        let mut mutation = MutationSet::default();
        mutation.unset.push("address.zip".to_string());
        mutation.apply(&mut doc);

        let address = doc.get_document("address").unwrap();
        assert!(address.contains_key("city"));
        assert!(!address.contains_key("zip"));
    }

    #[test]
    fn test_render_and_parse_key() {
        let oid = bson::oid::ObjectId::new();
        let rendered = render_key(&Bson::ObjectId(oid));
        assert_eq!(parse_key(&rendered), Bson::ObjectId(oid));

        assert_eq!(parse_key("user-42"), Bson::String("user-42".into()));
    }

    #[tokio::test]
    async fn test_memory_adapter_round_trip() {
        let adapter = MemoryAdapter::new();
        adapter.insert_many(
            "users",
            vec![doc! { "_id": "a", "n": 1 }, doc! { "_id": "b", "n": 2 }],
        );

        assert_eq!(adapter.count("users").await.unwrap(), 2);
        assert_eq!(adapter.sample("users", 10).await.unwrap().len(), 2);

        let stream = adapter.iterate("users", Some("a")).await.unwrap();
        let rest: Vec<_> = stream.try_collect().await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, "b");
    }

    #[tokio::test]
    async fn test_memory_insert_returns_key() {
        let adapter = MemoryAdapter::new();

        let key = adapter
            .insert_one("runs", doc! { "_id": "run-1", "n": 1 })
            .await
            .unwrap();
        assert_eq!(key, "run-1");

        // Documents without an _id get a generated key.
        let generated = adapter.insert_one("runs", doc! { "n": 2 }).await.unwrap();
        assert_ne!(generated, key);
        assert_eq!(adapter.count("runs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_update_reports_modified() {
        let adapter = MemoryAdapter::new();
        adapter.insert_many("users", vec![doc! { "_id": "a", "n": 1 }]);

        let mut mutation = MutationSet::default();
        mutation.set.insert("n", Bson::Int32(1));
        let outcome = adapter.update_one("users", "a", &mutation).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 0 });

        mutation.set.insert("n", Bson::Int32(2));
        let outcome = adapter.update_one("users", "a", &mutation).await.unwrap();
        assert_eq!(outcome, UpdateOutcome { matched: 1, modified: 1 });
    }

    #[tokio::test]
    async fn test_memory_injected_failure_is_document_level() {
        let adapter = MemoryAdapter::new();
        adapter.insert_many("users", vec![doc! { "_id": "a", "n": 1 }]);
        adapter.fail_update("users", "a");

        let mut mutation = MutationSet::default();
        mutation.set.insert("n", Bson::Int32(2));
        let err = adapter.update_one("users", "a", &mutation).await.unwrap_err();
        assert!(err.is_document_level());

        // One-shot: the next attempt succeeds.
        let outcome = adapter.update_one("users", "a", &mutation).await.unwrap();
        assert_eq!(outcome.modified, 1);
    }
}
