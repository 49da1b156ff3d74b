//! Provider Manager — owns the active storage backend.
//!
//! The active choice survives restarts (persisted as `{"type": ...}` under
//! `knowbase.provider`). Switching probes the target first and falls back to
//! local when a remote backend is unreachable, so the active provider is
//! always one that answered its last availability probe.

use futures::future::join_all;
use knowbase_core::error::{KnowbaseError, Result};
use knowbase_core::state::{StateStore, PROVIDER_KEY};
use knowbase_core::traits::StorageProvider;
use knowbase_core::types::{ProviderConfig, ProviderType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::OnceCell;

/// Called with the newly active provider type after every switch.
pub type Listener = Arc<dyn Fn(ProviderType) + Send + Sync>;

type ListenerList = Mutex<Vec<(u64, Listener)>>;

/// Returned by [`ProviderManager::add_listener`]; dropping it keeps the
/// listener registered, `unsubscribe` removes it.
pub struct ListenerHandle {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut list) = listeners.lock() {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

pub struct ProviderManager {
    providers: HashMap<ProviderType, Arc<dyn StorageProvider>>,
    local: Arc<dyn StorageProvider>,
    state: Arc<StateStore>,
    active: RwLock<ProviderType>,
    initialized: OnceCell<()>,
    /// Serializes switches; concurrent `set_provider` calls apply in lock order.
    switch_lock: tokio::sync::Mutex<()>,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
}

impl ProviderManager {
    /// Build a manager over `providers`. A local provider must be among them.
    ///
    /// The persisted choice wins over `default_provider`; an unknown or
    /// unregistered choice falls back to local.
    pub fn new(
        state: Arc<StateStore>,
        providers: Vec<Arc<dyn StorageProvider>>,
        default_provider: ProviderType,
    ) -> Result<Self> {
        let providers: HashMap<_, _> = providers.into_iter().map(|p| (p.kind(), p)).collect();
        let local = providers
            .get(&ProviderType::Local)
            .cloned()
            .ok_or_else(|| KnowbaseError::Config("local provider must be registered".into()))?;

        let persisted = match state.get(PROVIDER_KEY)? {
            Some(raw) => match serde_json::from_str::<ProviderConfig>(&raw) {
                Ok(cfg) => Some(cfg.provider_type),
                Err(e) => {
                    tracing::warn!("⚠️ Ignoring unreadable provider choice '{raw}': {e}");
                    Some(ProviderType::Local)
                }
            },
            None => None,
        };
        let mut initial = persisted.unwrap_or(default_provider);
        if !providers.contains_key(&initial) {
            tracing::warn!("⚠️ Provider '{initial}' is not registered, using local");
            initial = ProviderType::Local;
        }
        tracing::debug!("Provider manager starting with '{initial}'");

        Ok(Self {
            providers,
            local,
            state,
            active: RwLock::new(initial),
            initialized: OnceCell::new(),
            switch_lock: tokio::sync::Mutex::new(()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// Verify the active provider once. Concurrent callers share one run;
    /// a failed run leaves the manager uninitialized so it can be retried.
    pub async fn initialize(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| self.run_initialize())
            .await
            .map(|_| ())
    }

    async fn run_initialize(&self) -> Result<()> {
        let _guard = self.switch_lock.lock().await;
        let current = self.active_type();
        if current != ProviderType::Local {
            if self.active().is_available().await {
                tracing::info!("✅ Storage provider '{current}' ready");
                return Ok(());
            }
            tracing::warn!("⚠️ Storage provider '{current}' unavailable, falling back to local");
        }
        if !self.local.is_available().await {
            return Err(KnowbaseError::Config("local storage is unavailable".into()));
        }
        if current != ProviderType::Local {
            self.activate(ProviderType::Local)?;
        }
        tracing::info!("✅ Storage provider 'local' ready");
        Ok(())
    }

    /// Switch to `kind`, falling back to local when it is unreachable.
    /// Returns the provider type that ended up active.
    pub async fn set_provider(&self, kind: ProviderType) -> Result<ProviderType> {
        let _guard = self.switch_lock.lock().await;

        let reachable = match self.providers.get(&kind) {
            Some(provider) => provider.is_available().await,
            None => {
                tracing::warn!("⚠️ Provider '{kind}' is not registered");
                false
            }
        };

        let chosen = if reachable {
            kind
        } else if kind == ProviderType::Local {
            return Err(KnowbaseError::Config("local storage is unavailable".into()));
        } else {
            tracing::warn!("⚠️ Provider '{kind}' unavailable, falling back to local");
            ProviderType::Local
        };

        self.activate(chosen)?;
        tracing::info!("🔄 Storage provider switched to '{chosen}'");
        Ok(chosen)
    }

    /// Persist, swap, then notify listeners outside the list lock.
    fn activate(&self, kind: ProviderType) -> Result<()> {
        let raw = serde_json::to_string(&ProviderConfig::new(kind))?;
        self.state.set(PROVIDER_KEY, &raw)?;
        match self.active.write() {
            Ok(mut active) => *active = kind,
            Err(poisoned) => *poisoned.into_inner() = kind,
        }

        let snapshot: Vec<Listener> = match self.listeners.lock() {
            Ok(list) => list.iter().map(|(_, l)| l.clone()).collect(),
            Err(poisoned) => poisoned.into_inner().iter().map(|(_, l)| l.clone()).collect(),
        };
        for listener in snapshot {
            listener(kind);
        }
        Ok(())
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(ProviderType) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut list) = self.listeners.lock() {
            list.push((id, Arc::new(listener)));
        }
        ListenerHandle {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn active_type(&self) -> ProviderType {
        match self.active.read() {
            Ok(active) => *active,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn active(&self) -> Arc<dyn StorageProvider> {
        self.providers
            .get(&self.active_type())
            .cloned()
            .unwrap_or_else(|| self.local.clone())
    }

    pub fn provider(&self, kind: ProviderType) -> Option<Arc<dyn StorageProvider>> {
        self.providers.get(&kind).cloned()
    }

    /// Probe every registered provider concurrently.
    pub async fn availability(&self) -> Vec<(ProviderType, bool)> {
        let kinds: Vec<ProviderType> = ProviderType::ALL
            .into_iter()
            .filter(|k| self.providers.contains_key(k))
            .collect();
        let probes = kinds.iter().map(|k| async move {
            match self.providers.get(k) {
                Some(p) => p.is_available().await,
                None => false,
            }
        });
        kinds.iter().copied().zip(join_all(probes).await).collect()
    }
}
