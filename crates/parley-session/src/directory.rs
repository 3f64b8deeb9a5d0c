//! Session directory: cached session summaries and the structural
//! operations (create, load, rename, archive, delete) that keep it and the
//! current session consistent.

use parley_proto::{GenerationConfig, NewSession, Session};

use crate::{
    consumer::StreamOutcome,
    error::{Error, Result},
    events::SessionEvent,
    store::{SessionStore, StoreInner, StoreState, current_of},
};

/// In-memory cache of session summaries, most recently updated first
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
    sessions: Vec<Session>,
}

impl SessionDirectory {
    /// Replace the cache with a fresh listing
    pub fn replace_all(&mut self, mut sessions: Vec<Session>) {
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        self.sessions = sessions;
    }

    /// Insert or replace a session by id. New sessions go first.
    ///
    /// Returns `true` if the session was not cached before.
    pub fn upsert(&mut self, session: Session) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => {
                *existing = session;
                false
            }
            None => {
                self.sessions.insert(0, session);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn rename(&mut self, id: &str, title: &str) -> bool {
        self.get_mut(id).map(|s| s.title = title.to_string()).is_some()
    }

    pub fn set_archived(&mut self, id: &str, archived: bool) -> bool {
        self.get_mut(id).map(|s| s.archived = archived).is_some()
    }

    pub fn set_config(&mut self, id: &str, config: GenerationConfig) -> bool {
        self.get_mut(id).map(|s| s.config = config).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(index))
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|s| !s.archived)
    }

    pub fn archived(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().filter(|s| s.archived)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Make `session_id` current with the given history.
///
/// Any active stream is cancelled. Returns whether one was.
fn switch_to(state: &mut StoreState, session_id: Option<String>, history: Vec<parley_proto::Message>) -> bool {
    state.current = session_id;
    state.conversation.reset(history)
}

impl StoreInner {
    fn after_switch(&self, session_id: Option<String>, cancelled: bool) {
        if cancelled {
            self.emit(SessionEvent::StreamFinished {
                outcome: StreamOutcome::Cancelled,
            });
            self.notify_idle();
        }
        self.emit(SessionEvent::SessionsChanged);
        self.emit(SessionEvent::CurrentSessionChanged { session_id });
    }
}

impl SessionStore {
    /// Metadata of the current session
    pub fn current_session(&self) -> Option<Session> {
        current_of(&self.inner.state.lock())
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.inner.state.lock().current.clone()
    }

    /// Cached session summaries, most recently updated first
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.state.lock().directory.sessions().to_vec()
    }

    /// Refresh the directory from the server
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let sessions = self.inner.backend.list_sessions().await?;
        let listed = {
            let mut state = self.inner.state.lock();
            state.directory.replace_all(sessions);
            state.directory.sessions().to_vec()
        };
        tracing::debug!("Listed {} sessions", listed.len());
        self.inner.emit(SessionEvent::SessionsChanged);
        Ok(listed)
    }

    /// Create a session and make it current, with an empty history
    pub async fn create_session(&self, request: NewSession) -> Result<Session> {
        let session = self.inner.backend.create_session(&request).await?;
        let cancelled = {
            let mut state = self.inner.state.lock();
            state.directory.upsert(session.clone());
            switch_to(&mut state, Some(session.id.clone()), Vec::new())
        };
        tracing::debug!("Created session {}", session.id);
        self.inner.after_switch(Some(session.id.clone()), cancelled);
        Ok(session)
    }

    /// Create a session only when none is current; returns the current one
    pub async fn ensure_session(&self, request: NewSession) -> Result<Session> {
        match self.current_session() {
            Some(session) => Ok(session),
            None => self.create_session(request).await,
        }
    }

    /// Fetch a session with its history and make it current
    pub async fn load_session(&self, session_id: &str) -> Result<Session> {
        let detail = self.inner.backend.get_session(session_id).await?;
        let session = detail.session;
        let cancelled = {
            let mut state = self.inner.state.lock();
            state.directory.upsert(session.clone());
            switch_to(&mut state, Some(session.id.clone()), detail.messages)
        };
        tracing::debug!("Loaded session {}", session.id);
        self.inner.after_switch(Some(session.id.clone()), cancelled);
        Ok(session)
    }

    pub async fn rename_session(&self, session_id: &str, title: &str) -> Result<Session> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Other("Title is empty".to_string()));
        }
        let updated = self.inner.backend.rename_session(session_id, title).await?;
        self.apply_update(updated)
    }

    pub async fn archive_session(&self, session_id: &str) -> Result<Session> {
        let updated = self.inner.backend.set_archived(session_id, true).await?;
        self.apply_update(updated)
    }

    pub async fn unarchive_session(&self, session_id: &str) -> Result<Session> {
        let updated = self.inner.backend.set_archived(session_id, false).await?;
        self.apply_update(updated)
    }

    /// Delete a session. Deleting the current session leaves no session selected.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.inner.backend.delete_session(session_id).await?;

        let (was_current, cancelled) = {
            let mut state = self.inner.state.lock();
            state.directory.remove(session_id);
            if state.current.as_deref() == Some(session_id) {
                (true, switch_to(&mut state, None, Vec::new()))
            } else {
                (false, false)
            }
        };

        tracing::debug!("Deleted session {}", session_id);
        if was_current {
            self.inner.after_switch(None, cancelled);
        } else {
            self.inner.emit(SessionEvent::SessionsChanged);
        }
        Ok(())
    }

    /// Fold a server-updated session into the directory.
    ///
    /// The current session is held by id and read through the directory, so
    /// this is all it takes for both views to agree.
    fn apply_update(&self, updated: Session) -> Result<Session> {
        self.inner.state.lock().directory.upsert(updated.clone());
        tracing::debug!("Updated session {}", updated.id);
        self.inner.emit(SessionEvent::SessionsChanged);
        Ok(updated)
    }

    /// Look up a cached session
    pub fn session(&self, session_id: &str) -> Result<Session> {
        self.inner
            .state
            .lock()
            .directory
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, Reply, session};
    use chrono::{Duration, Utc};
    use parley_proto::{ConversationMode, Message};
    use std::sync::Arc;

    fn aged(id: &str, minutes_ago: i64) -> Session {
        let mut s = session(id, id);
        s.updated_at = Utc::now() - Duration::minutes(minutes_ago);
        s
    }

    #[test]
    fn test_replace_all_sorts_newest_first() {
        let mut directory = SessionDirectory::default();
        directory.replace_all(vec![aged("old", 30), aged("new", 1), aged("mid", 10)]);
        let ids: Vec<&str> = directory.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut directory = SessionDirectory::default();
        directory.replace_all(vec![aged("a", 1), aged("b", 2)]);

        let mut renamed = session("b", "Renamed");
        renamed.archived = true;
        assert!(!directory.upsert(renamed));
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.sessions()[1].title, "Renamed");

        assert!(directory.upsert(session("c", "c")));
        assert_eq!(directory.sessions()[0].id, "c");
    }

    #[test]
    fn test_filters_and_local_edits() {
        let mut directory = SessionDirectory::default();
        directory.replace_all(vec![aged("a", 1), aged("b", 2)]);
        assert!(directory.set_archived("b", true));
        assert!(directory.rename("a", "Alpha"));
        assert!(!directory.rename("zzz", "nope"));

        let active: Vec<&str> = directory.active().map(|s| s.title.as_str()).collect();
        let archived: Vec<&str> = directory.archived().map(|s| s.id.as_str()).collect();
        assert_eq!(active, vec!["Alpha"]);
        assert_eq!(archived, vec!["b"]);

        assert!(directory.remove("a").is_some());
        assert!(directory.remove("a").is_none());
        assert_eq!(directory.len(), 1);
    }

    fn store(backend: MockBackend) -> (SessionStore, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        (SessionStore::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let (store, _) = store(MockBackend::new().with_sessions(vec![aged("a", 5), aged("b", 1)]));
        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed[0].id, "b");
        assert_eq!(store.sessions().len(), 2);
        assert!(store.current_session().is_none());
    }

    #[tokio::test]
    async fn test_create_session_becomes_current() {
        let (store, _) = store(MockBackend::new());
        let created = store
            .create_session(NewSession {
                persona_id: Some("p1".into()),
                title: "Planning".into(),
                mode: ConversationMode::Task,
                config: GenerationConfig::default(),
            })
            .await
            .unwrap();

        let current = store.current_session().unwrap();
        assert_eq!(current.id, created.id);
        assert_eq!(current.persona_id.as_deref(), Some("p1"));
        assert_eq!(current.mode, ConversationMode::Task);
        assert!(store.snapshot().messages.is_empty());
        assert_eq!(store.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_session_keeps_current() {
        let (store, _) = store(MockBackend::new());
        let first = store.ensure_session(NewSession::default()).await.unwrap();
        let second = store.ensure_session(NewSession::default()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_load_session_replaces_history() {
        let (store, backend) = store(MockBackend::new().with_sessions(vec![session("s1", "One")]));
        backend.set_history(
            "s1",
            vec![Message::user("s1", "hi"), Message::assistant_placeholder("s1").with_content("hello")],
        );

        store.load_session("s1").await.unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.session.as_ref().map(|s| s.title.clone()), Some("One".to_string()));
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.last_content(), Some("hello"));
    }

    #[tokio::test]
    async fn test_load_unknown_session_fails() {
        let (store, _) = store(MockBackend::new());
        let err = store.load_session("missing").await.unwrap_err();
        assert_eq!(
            match err {
                Error::Proto(e) => e.status(),
                _ => None,
            },
            Some(404)
        );
        assert!(store.current_session_id().is_none());
    }

    #[tokio::test]
    async fn test_switching_session_cancels_stream() {
        let (store, _) = store(
            MockBackend::with_replies(vec![Reply::Hang])
                .with_sessions(vec![session("s1", "One"), session("s2", "Two")]),
        );
        store.load_session("s1").await.unwrap();
        let handle = store.send_stream_message_with_thinking("Hello").unwrap();
        let mut rx = store.subscribe();

        store.load_session("s2").await.unwrap();
        assert!(handle.is_cancelled());
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::StreamFinished {
                outcome: StreamOutcome::Cancelled
            }
        );
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::SessionsChanged);

        let snapshot = store.snapshot();
        assert!(!snapshot.is_streaming);
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.reasoning_steps.is_empty());
        assert!(snapshot.retry.is_none());
        assert_eq!(store.current_session_id().as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn test_rename_and_archive_visible_in_both_views() {
        let (store, _) = store(MockBackend::new().with_sessions(vec![session("s1", "One"), session("s2", "Two")]));
        store.list_sessions().await.unwrap();
        store.load_session("s1").await.unwrap();

        store.rename_session("s1", "Renamed").await.unwrap();
        assert_eq!(store.current_session().unwrap().title, "Renamed");
        assert_eq!(store.session("s1").unwrap().title, "Renamed");
        assert_eq!(store.sessions().iter().filter(|s| s.id == "s1").count(), 1);

        store.archive_session("s1").await.unwrap();
        assert!(store.current_session().unwrap().archived);
        assert!(store.session("s1").unwrap().archived);

        store.unarchive_session("s1").await.unwrap();
        assert!(!store.current_session().unwrap().archived);
    }

    #[tokio::test]
    async fn test_rename_rejects_blank_title() {
        let (store, _) = store(MockBackend::new().with_sessions(vec![session("s1", "One")]));
        assert!(matches!(
            store.rename_session("s1", "   ").await,
            Err(Error::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_current_session_clears_view() {
        let (store, _) = store(MockBackend::new().with_sessions(vec![session("s1", "One"), session("s2", "Two")]));
        store.list_sessions().await.unwrap();
        store.load_session("s1").await.unwrap();
        let mut rx = store.subscribe();

        store.delete_session("s1").await.unwrap();
        assert!(store.current_session().is_none());
        assert!(store.snapshot().messages.is_empty());
        assert!(matches!(store.session("s1"), Err(Error::SessionNotFound(_))));
        assert!(matches!(
            store.send_stream_message("Hello"),
            Err(Error::NoCurrentSession)
        ));

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::SessionsChanged);
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::CurrentSessionChanged { session_id: None }
        );
    }

    #[tokio::test]
    async fn test_delete_other_session_keeps_current() {
        let (store, _) = store(MockBackend::new().with_sessions(vec![session("s1", "One"), session("s2", "Two")]));
        store.list_sessions().await.unwrap();
        store.load_session("s1").await.unwrap();

        store.delete_session("s2").await.unwrap();
        assert_eq!(store.current_session_id().as_deref(), Some("s1"));
        assert_eq!(store.sessions().len(), 1);
    }
}
