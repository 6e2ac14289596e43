//! Controller lifecycle and per-request dispatch.
//!
//! The controller moves through `Installing -> Waiting -> Active`. Install seeds the static
//! namespace all-or-nothing; activation reaps physical caches that are no longer expected and
//! claims clients so requests are handled without a reload. Until it is active, requests go
//! straight to the network.

use futures::future::{join_all, try_join_all};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::background::TaskSink;
use crate::cache::{CacheHandle, CacheStorage, EvictionPolicy, NamespaceRegistry, Purpose};
use crate::error::{Error, Result};
use crate::http::{Fetcher, Request, Response};
use crate::router::Router;
use crate::strategy::{ImmutableFetch, NetworkFirst, StaleWhileRevalidate, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Installing,
  /// Installed; waiting to take over. Install always skips the wait for old clients.
  Waiting,
  Active,
  /// Install failed; this controller will never handle requests.
  Redundant,
}

impl fmt::Display for State {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      State::Installing => "installing",
      State::Waiting => "waiting",
      State::Active => "active",
      State::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Everything the controller needs besides its storage and network.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
  pub registry: NamespaceRegistry,
  pub router: Router,
  pub eviction: EvictionPolicy,
  /// Absolute URLs seeded into the static namespace on install
  pub bootstrap: Vec<Url>,
}

/// Outcome of an activation. Failures are reported, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activation {
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
}

pub struct Controller {
  storage: Arc<dyn CacheStorage>,
  fetcher: Arc<dyn Fetcher>,
  settings: ControllerSettings,
  tasks: TaskSink,
  immutable: ImmutableFetch,
  network_first: NetworkFirst,
  stale_while_revalidate: StaleWhileRevalidate,
  state: RwLock<State>,
  skip_waiting: AtomicBool,
  clients_claimed: AtomicBool,
}

impl Controller {
  pub fn new(
    settings: ControllerSettings,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
  ) -> Self {
    let tasks = TaskSink::new();
    let registry = &settings.registry;

    let immutable = ImmutableFetch::new(
      registry.handle(&storage, Purpose::Immutable),
      Arc::clone(&fetcher),
      settings.eviction,
      tasks.clone(),
    );
    let network_first = NetworkFirst::new(
      registry.handle(&storage, Purpose::RemoteApi),
      Arc::clone(&fetcher),
    );
    let stale_while_revalidate = StaleWhileRevalidate::new(
      registry.handle(&storage, Purpose::Static),
      Arc::clone(&fetcher),
      tasks.clone(),
    );

    Self {
      storage,
      fetcher,
      settings,
      tasks,
      immutable,
      network_first,
      stale_while_revalidate,
      state: RwLock::new(State::Installing),
      skip_waiting: AtomicBool::new(false),
      clients_claimed: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> State {
    self.state.read().map(|s| *s).unwrap_or(State::Redundant)
  }

  fn set_state(&self, state: State) {
    if let Ok(mut current) = self.state.write() {
      let from = *current;
      debug!(%from, to = %state, "controller state");
      *current = state;
    }
  }

  pub fn registry(&self) -> &NamespaceRegistry {
    &self.settings.registry
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  /// Background work spawned while handling requests.
  pub fn tasks(&self) -> &TaskSink {
    &self.tasks
  }

  /// Whether install asked to replace older controllers without waiting.
  pub fn skips_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  /// Seed the static namespace with every bootstrap URL.
  ///
  /// All URLs are fetched before anything is written; a single transport failure or error
  /// status fails the whole install and leaves the controller redundant.
  pub async fn install(&self) -> Result<()> {
    self.set_state(State::Installing);
    self.skip_waiting.store(true, Ordering::SeqCst);

    match self.seed().await {
      Ok(count) => {
        info!(
          cache = self.registry().get(Purpose::Static).physical_name.as_str(),
          count,
          "installed"
        );
        self.set_state(State::Waiting);
        Ok(())
      }
      Err(e) => {
        warn!(error = %e, "install failed");
        self.set_state(State::Redundant);
        Err(e)
      }
    }
  }

  async fn seed(&self) -> Result<usize> {
    let requests: Vec<Request> = self
      .settings
      .bootstrap
      .iter()
      .cloned()
      .map(Request::from_url)
      .collect();

    let responses = try_join_all(requests.iter().map(|request| self.fetch_seed(request))).await?;

    let cache = self.registry().handle(&self.storage, Purpose::Static);
    if let Err(e) = Self::write_seeds(&cache, &requests, &responses).await {
      // No partial static cache may survive a failed install
      if let Err(cleanup) = self.storage.delete_cache(cache.name()).await {
        warn!(cache = cache.name(), error = %cleanup, "failed to discard partial install");
      }
      return Err(e);
    }

    Ok(responses.len())
  }

  async fn write_seeds(
    cache: &CacheHandle,
    requests: &[Request],
    responses: &[Response],
  ) -> Result<()> {
    cache.open().await?;
    for (request, response) in requests.iter().zip(responses) {
      cache.put(request, response).await?;
    }
    Ok(())
  }

  async fn fetch_seed(&self, request: &Request) -> Result<Response> {
    let install_error = |reason: String| Error::Install {
      url: request.url.to_string(),
      reason,
    };

    let response = self
      .fetcher
      .fetch(request)
      .await
      .map_err(|e| install_error(e.to_string()))?;

    if !response.is_success() {
      return Err(install_error(format!("status {}", response.status)));
    }
    Ok(response)
  }

  /// Pick up an install left behind by an earlier run: the static namespace of this version
  /// already exists.
  pub async fn resume(&self) -> Result<bool> {
    let static_name = &self.registry().get(Purpose::Static).physical_name;
    let installed = self.storage.has_cache(static_name).await?;
    if installed && self.state() == State::Installing {
      self.skip_waiting.store(true, Ordering::SeqCst);
      self.set_state(State::Waiting);
    }
    Ok(installed)
  }

  /// Reap unexpected physical caches and claim clients, concurrently.
  pub async fn activate(&self) -> Result<Activation> {
    match self.state() {
      State::Waiting | State::Active => {}
      state => {
        return Err(Error::Lifecycle(format!(
          "cannot activate a controller that is {}",
          state
        )))
      }
    }

    let (activation, ()) = futures::join!(self.reap_stale_caches(), self.claim_clients());
    self.set_state(State::Active);
    info!(deleted = activation.deleted.len(), "activated");
    Ok(activation)
  }

  async fn reap_stale_caches(&self) -> Activation {
    let expected = self.registry().expected_names();
    let names = match self.storage.cache_names().await {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "failed to list caches");
        return Activation::default();
      }
    };

    let stale: Vec<String> = names
      .into_iter()
      .filter(|name| !expected.contains(name))
      .collect();
    let results = join_all(stale.iter().map(|name| self.storage.delete_cache(name))).await;

    let mut activation = Activation::default();
    for (name, result) in stale.into_iter().zip(results) {
      match result {
        Ok(_) => {
          info!(cache = name.as_str(), "deleted stale cache");
          activation.deleted.push(name);
        }
        Err(e) => {
          warn!(cache = name.as_str(), error = %e, "failed to delete stale cache");
          activation.failed.push(name);
        }
      }
    }
    activation
  }

  async fn claim_clients(&self) {
    if !self.clients_claimed.swap(true, Ordering::SeqCst) {
      debug!("claimed clients");
    }
  }

  /// Install when this version has never been installed, then activate.
  pub async fn start(&self) -> Result<Activation> {
    if !self.resume().await? {
      self.install().await?;
    }
    self.activate().await
  }

  /// The namespace, and so the strategy, a request would be served through.
  pub fn route(&self, request: &Request) -> Purpose {
    self.settings.router.classify(&request.url)
  }

  /// Resolve one intercepted request: a response or a propagated failure.
  pub async fn handle(&self, request: &Request) -> Result<Response> {
    let controlling = self.state() == State::Active && self.clients_claimed.load(Ordering::SeqCst);
    if !controlling || !request.is_cacheable() {
      debug!(url = %request.url, method = request.method.as_str(), "passthrough");
      return self.fetcher.fetch(request).await;
    }

    let purpose = self.route(request);
    debug!(url = %request.url, route = %purpose, "dispatch");
    match purpose {
      Purpose::Immutable => self.immutable.respond(request).await,
      Purpose::RemoteApi => self.network_first.respond(request).await,
      Purpose::Static => self.stale_while_revalidate.respond(request).await,
    }
  }
}
