//! Process-wide capture session registry.
//!
//! The registry owns the backend instance. It creates the backend the first
//! time a session needs it and drops it again once the last session holding
//! a [`Lease`] goes away, so no backend state outlives its users.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::backend::{self, CaptureBackend, FrameSource};
use crate::capture::BackendError;
use crate::config::{CaptureConfig, Config};

/// Builds the backend on first use.
pub type BackendFactory =
    Box<dyn Fn() -> Result<Arc<dyn CaptureBackend>, BackendError> + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    backend: Option<Arc<dyn CaptureBackend>>,
    /// Live sessions per source name
    sessions: HashMap<String, usize>,
}

pub struct Registry {
    factory: BackendFactory,
    settings: CaptureConfig,
    inner: Mutex<RegistryInner>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("settings", &self.settings)
            .field("initialized", &self.is_initialized())
            .field("active_sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

impl Registry {
    pub fn new(factory: BackendFactory, settings: CaptureConfig) -> Arc<Self> {
        Arc::new(Self {
            factory,
            settings,
            inner: Mutex::new(RegistryInner::default()),
        })
    }

    /// Registry building the backend described by `config`.
    pub fn from_config(config: &Config) -> Arc<Self> {
        let backend_config = config.backend.clone();
        Self::new(
            Box::new(move || backend::from_config(&backend_config)),
            config.capture.clone(),
        )
    }

    /// Registry around an already constructed backend.
    ///
    /// Teardown drops the registry's reference; the backend itself lives as
    /// long as the caller keeps one too.
    pub fn with_backend(backend: Arc<dyn CaptureBackend>, settings: CaptureConfig) -> Arc<Self> {
        Self::new(Box::new(move || Ok(Arc::clone(&backend))), settings)
    }

    /// The registry shared by the whole process.
    ///
    /// Built on first call from the configuration file at the default path,
    /// falling back to defaults if that file cannot be loaded.
    pub fn global() -> Arc<Registry> {
        Arc::clone(GLOBAL.get_or_init(|| {
            let config = Config::load(None).unwrap_or_else(|e| {
                log::warn!("{}; using default configuration", e);
                Config::default()
            });
            Registry::from_config(&config)
        }))
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn settings(&self) -> &CaptureConfig {
        &self.settings
    }

    /// Register a pending session on `name`.
    ///
    /// Cheap bookkeeping only; the backend is not touched.
    pub fn register(self: &Arc<Self>, name: &str) -> Lease {
        let mut inner = self.lock();
        let count = inner.sessions.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count > 1 {
            log::debug!("{} sessions now share source '{}'", count, name);
        }
        Lease {
            registry: Arc::clone(self),
            name: name.to_string(),
        }
    }

    fn unregister(&self, name: &str) {
        let mut inner = self.lock();
        if let Some(count) = inner.sessions.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                inner.sessions.remove(name);
            }
        }
        if inner.sessions.is_empty() {
            if let Some(backend) = inner.backend.take() {
                log::info!("Last capture session released, tearing down {} backend", backend.name());
            }
        }
    }

    /// Backend instance, created on first use.
    pub fn backend(&self) -> Result<Arc<dyn CaptureBackend>, BackendError> {
        let mut inner = self.lock();
        Self::backend_locked(&self.factory, &mut inner)
    }

    fn backend_locked(
        factory: &BackendFactory,
        inner: &mut RegistryInner,
    ) -> Result<Arc<dyn CaptureBackend>, BackendError> {
        if let Some(backend) = &inner.backend {
            return Ok(Arc::clone(backend));
        }
        let backend = factory()?;
        log::info!("Initialized {} capture backend", backend.name());
        inner.backend = Some(Arc::clone(&backend));
        Ok(backend)
    }

    /// Open a stream on `name` unless `stop` is already raised.
    ///
    /// Returns `Ok(None)` when the session was stopped before the backend was
    /// reached. The stop check and backend lookup happen under the registry
    /// lock, so a released session never re-creates a torn-down backend.
    pub fn open(
        &self,
        name: &str,
        stop: &AtomicBool,
    ) -> Result<Option<Box<dyn FrameSource>>, BackendError> {
        let backend = {
            let mut inner = self.lock();
            if stop.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Self::backend_locked(&self.factory, &mut inner)?
        };
        backend.open(name).map(Some)
    }

    /// Whether a backend instance currently exists.
    pub fn is_initialized(&self) -> bool {
        self.lock().backend.is_some()
    }

    /// Live sessions on `name`.
    pub fn sessions(&self, name: &str) -> usize {
        self.lock().sessions.get(name).copied().unwrap_or(0)
    }

    /// Live sessions across all sources.
    pub fn active_sessions(&self) -> usize {
        self.lock().sessions.values().sum()
    }
}

/// A registered session. Dropping it unregisters the session.
pub struct Lease {
    registry: Arc<Registry>,
    name: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry.unregister(&self.name);
    }
}
