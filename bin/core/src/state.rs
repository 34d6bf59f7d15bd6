use std::sync::{Arc, OnceLock};

use convoy_client::entities::check::DiscoveryResult;
use dashmap::DashMap;
use events::EventBus;
use registry::{RegistryConfig, RegistryManager};
use store::Store;
use tokio::sync::{Mutex, RwLock};

use crate::config::core_config;

static STORE: OnceLock<Store> = OnceLock::new();

pub fn store() -> &'static Store {
  STORE.get().expect("store accessed before init")
}

/// Opens the database. Crashes on failure, nothing works without it.
pub fn init_store() {
  let config = core_config();
  let store = match Store::open(&config.db_path) {
    Ok(store) => store,
    Err(e) => {
      panic!("failed to open database at {:?} | {e:?}", config.db_path)
    }
  };
  if STORE.set(store).is_err() {
    panic!("init_store called twice");
  }
}

pub fn event_bus() -> &'static Arc<EventBus> {
  static EVENT_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();
  EVENT_BUS.get_or_init(EventBus::new)
}

pub fn registry_manager() -> &'static RegistryManager {
  static REGISTRY: OnceLock<RegistryManager> = OnceLock::new();
  REGISTRY.get_or_init(|| {
    let config = core_config();
    RegistryManager::new(RegistryConfig {
      docker_hub_username: config.docker_hub_username.clone(),
      docker_hub_password: config.docker_hub_password.clone(),
      github_token: config.github_token.clone(),
      cache_ttl: config.cache_ttl,
      digest_ttl: config.digest_cache_ttl,
      ..Default::default()
    })
  })
}

/// The latest discovery + check result. Replaced wholesale by every
/// check pass; container info is never long-lived truth.
pub fn last_discovery()
-> &'static RwLock<Option<Arc<DiscoveryResult>>> {
  static LAST: OnceLock<RwLock<Option<Arc<DiscoveryResult>>>> =
    OnceLock::new();
  LAST.get_or_init(Default::default)
}

/// Serializes manual checks with the background run. Held across a
/// whole discovery + check pass.
pub fn check_guard() -> &'static Mutex<()> {
  static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
  GUARD.get_or_init(Default::default)
}

/// Per-compose-file locks. An update holds its file's lock from
/// BACKUP through HEALTH so two services sharing a file serialize.
pub fn compose_file_locks()
-> &'static DashMap<String, Arc<Mutex<()>>> {
  static LOCKS: OnceLock<DashMap<String, Arc<Mutex<()>>>> =
    OnceLock::new();
  LOCKS.get_or_init(Default::default)
}

pub fn compose_file_lock(path: &str) -> Arc<Mutex<()>> {
  compose_file_locks()
    .entry(path.to_string())
    .or_default()
    .clone()
}
