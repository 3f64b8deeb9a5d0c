//! Settings reconciler: persists generation settings once edits settle.
//!
//! The reconciler tracks the fingerprint of the configuration the server
//! holds (or will hold once a save in flight lands) for its session. Edits
//! that match it are not saved; edits that differ are saved through the
//! store after a quiet period, one save at a time.

use parking_lot::Mutex;
use parley_proto::{GenerationConfig, Session};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::{error::Result, schedule::Debouncer, store::SessionStore};

/// Reconciler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// How long edits must settle before a save is sent
    #[serde(with = "millis")]
    pub quiet_period: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_millis(800),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Default)]
struct ReconcilerState {
    session_id: Option<String>,
    /// Fingerprint of the configuration last known to be stored
    saved: Option<String>,
    /// Fingerprint of the configuration a save is currently sending
    in_flight: Option<String>,
    /// Configuration waiting to be saved
    pending: Option<GenerationConfig>,
    /// Bumped on every session switch; saves from an older generation are dropped
    generation: u64,
}

impl ReconcilerState {
    /// Fingerprint the server will hold once the current save lands
    fn target(&self) -> Option<&str> {
        self.in_flight.as_deref().or(self.saved.as_deref())
    }
}

struct Inner {
    store: SessionStore,
    state: Mutex<ReconcilerState>,
    /// Held for the duration of a save so requests reach the server in order
    saving: tokio::sync::Mutex<()>,
}

impl Inner {
    async fn save(&self, generation: u64) -> Result<()> {
        let _saving = self.saving.lock().await;
        let (session_id, config, fingerprint) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                tracing::debug!("Dropping settings save for a previous session");
                return Ok(());
            }
            let (Some(session_id), Some(config)) = (state.session_id.clone(), state.pending.take()) else {
                return Ok(());
            };
            let fingerprint = config.fingerprint();
            state.in_flight = Some(fingerprint.clone());
            (session_id, config, fingerprint)
        };

        let result = self.store.save_session_config(&session_id, &config).await;

        let mut state = self.state.lock();
        if state.generation == generation {
            state.in_flight = None;
            if result.is_ok() {
                state.saved = Some(fingerprint);
            }
        }
        result
    }
}

/// Debounced writer of a session's generation settings
pub struct SettingsReconciler {
    inner: Arc<Inner>,
    debouncer: Debouncer,
}

impl SettingsReconciler {
    pub fn new(store: SessionStore, config: ReconcilerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                state: Mutex::new(ReconcilerState::default()),
                saving: tokio::sync::Mutex::new(()),
            }),
            debouncer: Debouncer::new(config.quiet_period),
        }
    }

    /// Track `session`, taking its stored configuration as the baseline.
    ///
    /// A save still waiting for the previous session is dropped.
    pub fn switch_session(&self, session: &Session) {
        self.debouncer.cancel();
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.session_id = Some(session.id.clone());
        state.saved = Some(session.config.fingerprint());
        state.in_flight = None;
        state.pending = None;
        tracing::debug!("Settings baseline reset for session {}", session.id);
    }

    /// Stop tracking any session
    pub fn detach(&self) {
        self.debouncer.cancel();
        let mut state = self.inner.state.lock();
        state.generation += 1;
        state.session_id = None;
        state.saved = None;
        state.in_flight = None;
        state.pending = None;
    }

    /// Observe the current selection. Returns whether a save was scheduled.
    pub fn observe(&self, config: GenerationConfig) -> bool {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.session_id.is_none() {
                return false;
            }
            if state.target() == Some(config.fingerprint().as_str()) {
                state.pending = None;
                drop(state);
                self.debouncer.cancel();
                tracing::debug!("Settings unchanged; nothing to save");
                return false;
            }
            state.pending = Some(config);
            state.generation
        };

        let inner = self.inner.clone();
        self.debouncer.schedule(async move {
            // Failures are reported by the store
            let _ = inner.save(generation).await;
        });
        tracing::debug!("Settings save scheduled");
        true
    }

    /// Save a pending change now instead of waiting for the quiet period.
    ///
    /// Waits for a save already being sent.
    pub async fn flush(&self) -> Result<()> {
        self.debouncer.cancel();
        let generation = self.inner.state.lock().generation;
        self.inner.save(generation).await
    }

    /// Whether a change is waiting to be saved or being sent
    pub fn is_pending(&self) -> bool {
        let state = self.inner.state.lock();
        state.pending.is_some() || state.in_flight.is_some()
    }

    /// Fingerprint of the configuration last known to be stored
    pub fn saved_fingerprint(&self) -> Option<String> {
        self.inner.state.lock().saved.clone()
    }
}
