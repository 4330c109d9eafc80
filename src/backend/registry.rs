//! Backend registry (spec §4.1).
//!
//! Keyed by `(instance, filesystem-name)`. `resolve` returns the matching
//! backend's handle, blocking the caller on a registry condition variable
//! when requested and the backend is not yet registered, exactly as
//! spec.md describes it; a non-blocking caller gets `ENOENT` immediately.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::backend::Backend;
use crate::error::{Result, Status};
use crate::triplet::BackendHandle;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct RegistryKey {
    instance: u64,
    fs_name: String,
}

struct Entry {
    handle: BackendHandle,
    backend: Arc<dyn Backend>,
}

/// Maps a filesystem-name + instance to a backend connection.
pub struct BackendRegistry {
    entries: RwLock<HashMap<RegistryKey, Entry>>,
    /// Signalled every time a new backend is registered, so blocking
    /// resolves can wake up and re-check rather than polling.
    registered: Notify,
    /// Signalled once at shutdown so blocked resolves can give up instead
    /// of waiting forever on a registration that will never arrive.
    shutdown: Notify,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            registered: Notify::new(),
            shutdown: Notify::new(),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Register a backend under `(instance, fs_name)`, returning its handle.
    pub async fn register(
        &self,
        fs_name: impl Into<String>,
        instance: u64,
        backend: Arc<dyn Backend>,
    ) -> BackendHandle {
        let handle = BackendHandle::allocate();
        let key = RegistryKey { instance, fs_name: fs_name.into() };
        self.entries.write().await.insert(key, Entry { handle, backend });
        self.registered.notify_waiters();
        handle
    }

    /// Resolve a backend by name and instance.
    ///
    /// When `blocking` is `true` and the backend is not yet registered, the
    /// caller waits on the registry's condition variable until a matching
    /// `register` completes or shutdown is signalled. When `blocking` is
    /// `false`, an absent backend fails immediately with `ENOENT`.
    pub async fn resolve(
        &self,
        fs_name: &str,
        instance: u64,
        blocking: bool,
    ) -> Result<(BackendHandle, Arc<dyn Backend>)> {
        loop {
            if let Some(found) = self.lookup(fs_name, instance).await {
                return Ok(found);
            }
            if !blocking || self.shutting_down.load(std::sync::atomic::Ordering::Acquire) {
                return Err(Status::ENoEnt);
            }
            tokio::select! {
                _ = self.registered.notified() => {}
                _ = self.shutdown.notified() => return Err(Status::ENoEnt),
            }
        }
    }

    async fn lookup(&self, fs_name: &str, instance: u64) -> Option<(BackendHandle, Arc<dyn Backend>)> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .find(|(key, _)| key.instance == instance && key.fs_name == fs_name)
            .map(|(_, entry)| (entry.handle, entry.backend.clone()))
    }

    /// Look a backend up by the handle alone, for components (the node
    /// cache, the dispatcher) that only carry a [`BackendHandle`].
    pub async fn by_handle(&self, handle: BackendHandle) -> Option<Arc<dyn Backend>> {
        let entries = self.entries.read().await;
        entries.values().find(|entry| entry.handle == handle).map(|entry| entry.backend.clone())
    }

    /// Wake every blocked `resolve` call with `ENOENT`, used during broker
    /// shutdown so pending client requests don't hang forever.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, std::sync::atomic::Ordering::Release);
        self.shutdown.notify_waiters();
    }
}
