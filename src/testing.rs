//! Test doubles for the network and storage seams.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::cache::{CacheStorage, MemoryStorage};
use crate::error::{Error, Result};
use crate::http::{Fetcher, Request, RequestKey, Response};

/// Initialize tracing for tests
#[macro_export]
macro_rules! init_test_tracing {
  () => {
    let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::DEBUG)
      .with_test_writer()
      .try_init();
  };
}

#[derive(Clone)]
enum Outcome {
  Respond(u16, Bytes),
  Fail,
}

/// Scripted network. Unknown URLs fail as if the host were unreachable.
#[derive(Default)]
pub struct MockFetcher {
  routes: Mutex<HashMap<String, Outcome>>,
  calls: Mutex<Vec<String>>,
  gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockFetcher {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, url: &str, status: u16, body: &'static str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::Respond(status, Bytes::from_static(body.as_bytes())));
  }

  pub fn fail(&self, url: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Outcome::Fail);
  }

  /// Hold every subsequent fetch until `release` lets it through.
  pub fn hold(&self) {
    *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
  }

  pub fn release(&self, n: usize) {
    if let Some(gate) = self.gate.lock().unwrap().as_ref() {
      gate.add_permits(n);
    }
  }

  pub fn calls(&self, url: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for MockFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate
        .acquire()
        .await
        .map_err(Error::transport)?
        .forget();
    }

    let outcome = self.routes.lock().unwrap().get(&url).cloned();
    match outcome {
      Some(Outcome::Respond(status, body)) => Ok(Response {
        url,
        status,
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body,
      }),
      Some(Outcome::Fail) | None => Err(Error::transport(format!("{}: unreachable", url))),
    }
  }
}

/// In-memory storage whose operations can be made to fail on demand.
#[derive(Default)]
pub struct FailingStorage {
  inner: MemoryStorage,
  pub fail_reads: AtomicBool,
  pub fail_writes: AtomicBool,
  pub fail_cache_deletes: AtomicBool,
  /// Puts allowed before every further put fails; 0 disables the limit
  put_limit: AtomicUsize,
  puts: AtomicUsize,
}

impl FailingStorage {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Let `n` more puts through, then reject the rest. `0` lifts the limit.
  pub fn fail_puts_after(&self, n: usize) {
    self.puts.store(0, Ordering::SeqCst);
    self.put_limit.store(n, Ordering::SeqCst);
  }

  fn check(flag: &AtomicBool, what: &str) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
      Err(Error::storage(format!("{} rejected", what)))
    } else {
      Ok(())
    }
  }
}

#[async_trait]
impl CacheStorage for FailingStorage {
  async fn open(&self, cache: &str) -> Result<()> {
    Self::check(&self.fail_writes, "open")?;
    self.inner.open(cache).await
  }

  async fn has_cache(&self, cache: &str) -> Result<bool> {
    Self::check(&self.fail_reads, "has_cache")?;
    self.inner.has_cache(cache).await
  }

  async fn cache_names(&self) -> Result<Vec<String>> {
    Self::check(&self.fail_reads, "cache_names")?;
    self.inner.cache_names().await
  }

  async fn delete_cache(&self, cache: &str) -> Result<bool> {
    Self::check(&self.fail_cache_deletes, "delete_cache")?;
    self.inner.delete_cache(cache).await
  }

  async fn match_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    Self::check(&self.fail_reads, "match")?;
    self.inner.match_entry(cache, key).await
  }

  async fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    Self::check(&self.fail_writes, "put")?;
    let limit = self.put_limit.load(Ordering::SeqCst);
    if limit > 0 && self.puts.fetch_add(1, Ordering::SeqCst) >= limit {
      return Err(Error::storage("disk full"));
    }
    self.inner.put(cache, key, response).await
  }

  async fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    Self::check(&self.fail_writes, "delete")?;
    self.inner.delete(cache, key).await
  }

  async fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    Self::check(&self.fail_reads, "keys")?;
    self.inner.keys(cache).await
  }
}
