//! Requests, handlers and stores shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use dispatch_cache::cache::{
    CacheEntryOptions, CachePolicy, CacheStore, CacheStoreError, Field, FieldSet, FieldSpec,
    FromFields, MemoryStore, Query, QueryCachePolicy,
};
use dispatch_cache::dispatch::{Handler, HandlerError, Request, handler_fn};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub items: Vec<String>,
    pub load: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Todos {
    pub search: Option<String>,
    pub cache_bust: Option<bool>,
}

impl Request for Todos {
    type Response = Listing;

    fn type_name() -> &'static str {
        "Todos"
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("search", &self.search),
            Field::new("cache_bust", &self.cache_bust),
        ]
    }
}

impl Query for Todos {
    fn cache_options() -> Option<CachePolicy> {
        Some(CachePolicy::declared(1, 5))
    }
}

impl FromFields for Todos {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::of::<Option<String>>("search"),
        FieldSpec::of::<Option<bool>>("cache_bust"),
    ];

    fn from_fields(fields: &FieldSet) -> Self {
        Self {
            search: fields.get("search").flatten(),
            cache_bust: fields.get("cache_bust").flatten(),
        }
    }
}

/// Same shape as [`Todos`], cached only through a registered policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyTodos {
    pub search: Option<String>,
    pub cache_bust: Option<bool>,
}

impl Request for PolicyTodos {
    type Response = Listing;

    fn type_name() -> &'static str {
        "PolicyTodos"
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("search", &self.search),
            Field::new("cache_bust", &self.cache_bust),
        ]
    }
}

impl Query for PolicyTodos {}

impl FromFields for PolicyTodos {
    const FIELDS: &'static [FieldSpec] = Todos::FIELDS;

    fn from_fields(fields: &FieldSet) -> Self {
        Self {
            search: fields.get("search").flatten(),
            cache_bust: fields.get("cache_bust").flatten(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheBust {
    pub search: Option<String>,
    pub cache_bust: Option<bool>,
}

impl Request for CacheBust {
    type Response = ();

    fn type_name() -> &'static str {
        "CacheBust"
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("search", &self.search),
            Field::new("cache_bust", &self.cache_bust),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct CourseList;

impl Request for CourseList {
    type Response = Listing;

    fn type_name() -> &'static str {
        "CourseList"
    }
}

impl Query for CourseList {
    fn cache_options() -> Option<CachePolicy> {
        Some(CachePolicy::declared(1, 5))
    }
}

impl FromFields for CourseList {
    const FIELDS: &'static [FieldSpec] = &[];

    fn from_fields(_fields: &FieldSet) -> Self {
        CourseList
    }
}

#[derive(Debug, Clone)]
pub struct CourseDetail {
    pub number: i32,
}

impl Request for CourseDetail {
    type Response = Listing;

    fn type_name() -> &'static str {
        "CourseDetail"
    }

    fn fields(&self) -> Vec<Field> {
        vec![Field::new("number", &self.number)]
    }
}

impl Query for CourseDetail {
    fn cache_options() -> Option<CachePolicy> {
        Some(CachePolicy::declared(1, 5))
    }
}

impl FromFields for CourseDetail {
    const FIELDS: &'static [FieldSpec] = &[FieldSpec::of::<i32>("number")];

    fn from_fields(fields: &FieldSet) -> Self {
        Self {
            number: fields.get("number").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateCourse {
    pub number: i32,
    pub title: String,
}

impl Request for CreateCourse {
    type Response = i32;

    fn type_name() -> &'static str {
        "CreateCourse"
    }

    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("number", &self.number),
            Field::new("title", &self.title),
        ]
    }
}

/// Registered policy asking for auto-reload with default expirations.
pub struct Reloading;

impl<Q: Query> QueryCachePolicy<Q> for Reloading {
    fn policy(&self) -> CachePolicy {
        CachePolicy::default().with_auto_reload(true)
    }
}

/// Backing data for list handlers; counts loads and can be told to fail.
#[derive(Default)]
pub struct Source {
    items: Mutex<Vec<String>>,
    loads: AtomicUsize,
    failing: AtomicUsize,
}

impl Source {
    pub fn with_items(items: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items.iter().map(|item| item.to_string()).collect()),
            ..Default::default()
        })
    }

    pub fn push(&self, item: impl Into<String>) {
        self.items.lock().expect("items lock").push(item.into());
    }

    /// Fail the next `count` loads.
    pub fn fail_next(&self, count: usize) {
        self.failing.store(count, Ordering::SeqCst);
    }

    pub fn load(&self) -> Result<Listing, HandlerError> {
        if self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(HandlerError::message("source unavailable"));
        }
        let load = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Listing {
            items: self.items.lock().expect("items lock").clone(),
            load,
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

/// Handler answering any listing request from `source`.
pub fn list_from<R>(source: &Arc<Source>) -> impl Handler<R> + 'static
where
    R: Request<Response = Listing>,
{
    let source = Arc::clone(source);
    handler_fn(move |_: R| {
        let source = Arc::clone(&source);
        async move { source.load() }
    })
}

/// [`MemoryStore`] wrapper recording every operation and failing removes of
/// selected keys.
pub struct RecordingStore {
    inner: MemoryStore,
    log: Mutex<Vec<String>>,
    failing_removes: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(NonZeroUsize::new(64).expect("non-zero")),
            log: Mutex::new(Vec::new()),
            failing_removes: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_remove(&self, key: &str) {
        self.failing_removes
            .lock()
            .expect("failing lock")
            .push(key.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().expect("log lock").clear();
    }

    fn record(&self, op: &str, key: &str) {
        self.log.lock().expect("log lock").push(format!("{op} {key}"));
    }
}

#[async_trait]
impl CacheStore for RecordingStore {
    async fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Bytes>, CacheStoreError> {
        self.record("get", key);
        self.inner.get(key, cancel).await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        options: &CacheEntryOptions,
        cancel: &CancellationToken,
    ) -> Result<(), CacheStoreError> {
        self.record("set", key);
        self.inner.set(key, value, options, cancel).await
    }

    async fn remove(&self, key: &str, cancel: &CancellationToken) -> Result<(), CacheStoreError> {
        self.record("remove", key);
        let failing = self
            .failing_removes
            .lock()
            .expect("failing lock")
            .iter()
            .any(|failing| failing == key);
        if failing {
            return Err(CacheStoreError::unavailable("remove rejected"));
        }
        self.inner.remove(key, cancel).await
    }
}
