//! Logical cache purposes and the versioned physical caches backing them.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::storage::CacheStorage;
use crate::error::{Error, Result};
use crate::http::{Request, RequestKey, Response};

/// What a namespace is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Purpose {
  /// Application shell and anything served stale-while-revalidate
  Static,
  /// Content that never changes once published
  Immutable,
  /// Remote API responses, network-first
  RemoteApi,
}

impl fmt::Display for Purpose {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Purpose::Static => "static",
      Purpose::Immutable => "immutable",
      Purpose::RemoteApi => "remote-api",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNamespace {
  pub purpose: Purpose,
  pub physical_name: String,
}

/// Maps each purpose to exactly one physical cache name.
#[derive(Debug, Clone)]
pub struct NamespaceRegistry {
  namespaces: [CacheNamespace; 3],
}

impl NamespaceRegistry {
  pub fn new(static_name: &str, immutable_name: &str, remote_api_name: &str) -> Result<Self> {
    let namespaces = [
      (Purpose::Static, static_name),
      (Purpose::Immutable, immutable_name),
      (Purpose::RemoteApi, remote_api_name),
    ]
    .map(|(purpose, name)| CacheNamespace {
      purpose,
      physical_name: name.to_string(),
    });

    let distinct: BTreeSet<&str> = namespaces
      .iter()
      .map(|ns| ns.physical_name.as_str())
      .collect();
    if distinct.len() != namespaces.len() || distinct.contains("") {
      return Err(Error::Config(format!(
        "cache names must be non-empty and distinct: {}, {}, {}",
        static_name, immutable_name, remote_api_name
      )));
    }

    Ok(Self { namespaces })
  }

  pub fn get(&self, purpose: Purpose) -> &CacheNamespace {
    match purpose {
      Purpose::Static => &self.namespaces[0],
      Purpose::Immutable => &self.namespaces[1],
      Purpose::RemoteApi => &self.namespaces[2],
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &CacheNamespace> {
    self.namespaces.iter()
  }

  /// Physical names that survive activation.
  pub fn expected_names(&self) -> BTreeSet<String> {
    self
      .namespaces
      .iter()
      .map(|ns| ns.physical_name.clone())
      .collect()
  }

  /// Handle onto the physical cache for `purpose`. Nothing is created until the first write.
  pub fn handle(&self, storage: &Arc<dyn CacheStorage>, purpose: Purpose) -> CacheHandle {
    CacheHandle {
      name: self.get(purpose).physical_name.clone(),
      storage: Arc::clone(storage),
    }
  }
}

/// One physical cache, bound to its storage.
#[derive(Clone)]
pub struct CacheHandle {
  name: String,
  storage: Arc<dyn CacheStorage>,
}

impl CacheHandle {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn open(&self) -> Result<()> {
    self.storage.open(&self.name).await
  }

  pub async fn lookup(&self, request: &Request) -> Result<Option<Response>> {
    self.storage.match_entry(&self.name, &request.key()).await
  }

  pub async fn put(&self, request: &Request, response: &Response) -> Result<()> {
    self.storage.put(&self.name, &request.key(), response).await
  }

  pub async fn delete(&self, key: &RequestKey) -> Result<bool> {
    self.storage.delete(&self.name, key).await
  }

  pub async fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.keys(&self.name).await
  }
}

impl fmt::Debug for CacheHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheHandle")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;

  #[test]
  fn test_registry_maps_each_purpose() {
    let registry = NamespaceRegistry::new("harness-v1", "game-data-v1", "github-api-v1").unwrap();
    assert_eq!(registry.get(Purpose::Static).physical_name, "harness-v1");
    assert_eq!(registry.get(Purpose::Immutable).physical_name, "game-data-v1");
    assert_eq!(registry.get(Purpose::RemoteApi).physical_name, "github-api-v1");
    for ns in registry.iter() {
      assert_eq!(registry.get(ns.purpose), ns);
    }
  }

  #[test]
  fn test_registry_rejects_shared_physical_cache() {
    assert!(NamespaceRegistry::new("a-v1", "a-v1", "b-v1").is_err());
    assert!(NamespaceRegistry::new("a-v1", "", "b-v1").is_err());
  }

  #[test]
  fn test_expected_names() {
    let registry = NamespaceRegistry::new("a-v1", "b-v2", "c-v3").unwrap();
    let expected: Vec<_> = registry.expected_names().into_iter().collect();
    assert_eq!(expected, vec!["a-v1", "b-v2", "c-v3"]);
  }

  #[tokio::test]
  async fn test_handle_is_lazy() {
    let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
    let registry = NamespaceRegistry::new("a-v1", "b-v1", "c-v1").unwrap();
    let handle = registry.handle(&storage, Purpose::Immutable);
    assert_eq!(handle.name(), "b-v1");
    assert!(storage.cache_names().await.unwrap().is_empty());

    let request = Request::get("https://example.com/x").unwrap();
    handle
      .put(&request, &Response::new("https://example.com/x", 200, "x"))
      .await
      .unwrap();
    assert_eq!(storage.cache_names().await.unwrap(), vec!["b-v1".to_string()]);
    assert!(handle.lookup(&request).await.unwrap().is_some());
  }
}
