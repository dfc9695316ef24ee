//! In-memory collaborator doubles for tests and offline evaluation.

use std::sync::Mutex;

use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::debug;

use crate::{AccessChecker, AccessReview, CallerIdentity, KindMapper, ObjectReader, ResourceKind, StoreError};

type Key = (&'static str, String, String);

fn key(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Key {
    (kind.plural, namespace.unwrap_or("").to_string(), name.to_string())
}

#[derive(Debug, Clone)]
enum Script {
    /// Answer NotFound this many more times before serving the object.
    NotFoundTimes(u32),
    Fail(String),
}

/// Object store double keyed by (plural, namespace, name).
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: FxHashMap<Key, Json>,
    scripts: Mutex<FxHashMap<Key, Script>>,
    gets: Mutex<FxHashMap<Key, u32>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Store `obj` under its `metadata.name`.
    pub fn with(mut self, kind: ResourceKind, namespace: Option<&str>, obj: Json) -> Self {
        self.insert(kind, namespace, obj);
        self
    }

    pub fn insert(&mut self, kind: ResourceKind, namespace: Option<&str>, obj: Json) {
        let name = obj
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("")
            .to_string();
        self.objects.insert(key(kind, namespace, &name), obj);
    }

    /// Make the first `times` reads of an object report NotFound.
    pub fn not_found_times(self, kind: ResourceKind, namespace: Option<&str>, name: &str, times: u32) -> Self {
        self.script(key(kind, namespace, name), Script::NotFoundTimes(times))
    }

    /// Make every read of an object fail with a transport error.
    pub fn failing(self, kind: ResourceKind, namespace: Option<&str>, name: &str, msg: &str) -> Self {
        self.script(key(kind, namespace, name), Script::Fail(msg.to_string()))
    }

    fn script(self, k: Key, s: Script) -> Self {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner()).insert(k, s);
        self
    }

    /// Number of reads issued for an object.
    pub fn gets(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> u32 {
        let gets = self.gets.lock().unwrap_or_else(|e| e.into_inner());
        gets.get(&key(kind, namespace, name)).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ObjectReader for MemoryStore {
    async fn get(&self, kind: ResourceKind, namespace: Option<&str>, name: &str) -> Result<Json, StoreError> {
        let k = key(kind, namespace, name);
        *self.gets.lock().unwrap_or_else(|e| e.into_inner()).entry(k.clone()).or_insert(0) += 1;
        {
            let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            match scripts.get_mut(&k) {
                Some(Script::Fail(msg)) => return Err(StoreError::Transport(msg.clone())),
                Some(Script::NotFoundTimes(n)) if *n > 0 => {
                    *n -= 1;
                    debug!(kind = %kind, ns = ?namespace, name, "scripted not-found");
                    return Err(StoreError::not_found(kind, namespace, name));
                }
                _ => {}
            }
        }
        self.objects.get(&k).cloned().ok_or_else(|| StoreError::not_found(kind, namespace, name))
    }
}

/// Access-check double. Grants are keyed `plural/namespace/name`; a `*` name grants every
/// name in that namespace.
#[derive(Debug, Default)]
pub struct StaticAccess {
    grants: FxHashMap<String, bool>,
    failures: FxHashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl StaticAccess {
    pub fn new() -> Self { Self::default() }

    pub fn allow(mut self, kind: ResourceKind, namespace: &str, name: &str) -> Self {
        self.grants.insert(format!("{}/{}/{}", kind.plural, namespace, name), true);
        self
    }

    pub fn deny(mut self, kind: ResourceKind, namespace: &str, name: &str) -> Self {
        self.grants.insert(format!("{}/{}/{}", kind.plural, namespace, name), false);
        self
    }

    /// Fail every check for `kind` in `namespace` with a transport error.
    pub fn fail(mut self, kind: ResourceKind, namespace: &str, msg: &str) -> Self {
        self.failures.insert(format!("{}/{}", kind.plural, namespace), msg.to_string());
        self
    }

    /// Checks issued so far, as `plural/namespace/name`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl AccessChecker for StaticAccess {
    async fn can_access(&self, caller: &CallerIdentity, review: AccessReview<'_>) -> Result<bool, StoreError> {
        let plural = review.resource.plural;
        let exact = format!("{}/{}/{}", plural, review.namespace, review.name);
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(exact.clone());
        if let Some(msg) = self.failures.get(&format!("{}/{}", plural, review.namespace)) {
            return Err(StoreError::Transport(msg.clone()));
        }
        let wildcard = format!("{}/{}/*", plural, review.namespace);
        let allowed = self.grants.get(&exact).or_else(|| self.grants.get(&wildcard)).copied().unwrap_or(false);
        debug!(user = %caller.username, check = %exact, allowed, "static access check");
        Ok(allowed)
    }
}

/// Fixed apiVersion/kind to `resource.group` table.
#[derive(Debug, Default, Clone)]
pub struct StaticMapper {
    refs: FxHashMap<(String, String), String>,
}

impl StaticMapper {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, api_version: &str, kind: &str, resource_type_ref: &str) -> Self {
        self.refs.insert((api_version.to_string(), kind.to_string()), resource_type_ref.to_string());
        self
    }
}

#[async_trait::async_trait]
impl KindMapper for StaticMapper {
    async fn resource_type_ref(&self, api_version: &str, kind: &str) -> Result<String, StoreError> {
        self.refs.get(&(api_version.to_string(), kind.to_string())).cloned().ok_or_else(|| StoreError::NotFound {
            kind: "resource mapping".to_string(),
            namespace: None,
            name: format!("{}/{}", api_version, kind),
        })
    }
}
