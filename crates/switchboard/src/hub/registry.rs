// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: every live session, indexed by id and by extension.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Hub-side handle to one browser session.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: String,
    pub extension: String,
    tx: mpsc::Sender<Utf8Bytes>,
    closed: CancellationToken,
}

impl SessionHandle {
    /// New session with an outbound queue of `queue` frames. The receiver
    /// belongs to the session's write pump.
    pub fn new(extension: impl Into<String>, queue: usize) -> (Arc<Self>, mpsc::Receiver<Utf8Bytes>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = Self {
            id: uuid::Uuid::new_v4().to_string(),
            extension: extension.into(),
            tx,
            closed: CancellationToken::new(),
        };
        (Arc::new(handle), rx)
    }

    /// Queue a frame without waiting. `false` if the queue is full or the
    /// session is closed.
    pub fn try_deliver(&self, payload: Utf8Bytes) -> bool {
        !self.closed.is_cancelled() && self.tx.try_send(payload).is_ok()
    }

    /// Tell the pumps to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Fires once the session has been closed.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

/// Outcome of [`Registry::remove`].
#[derive(Debug)]
pub struct Removed {
    pub session: Arc<SessionHandle>,
    /// The extension has no sessions left.
    pub last_for_extension: bool,
}

/// Invariant: a session is in `by_extension[e]` iff it is in `sessions` and
/// its extension is `e`. No extension maps to an empty list.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<String, Arc<SessionHandle>>,
    by_extension: HashMap<String, Vec<Arc<SessionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns `false` if its id is already registered.
    pub fn insert(&mut self, session: Arc<SessionHandle>) -> bool {
        if self.sessions.contains_key(&session.id) {
            return false;
        }
        self.by_extension.entry(session.extension.clone()).or_default().push(Arc::clone(&session));
        self.sessions.insert(session.id.clone(), session);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Removed> {
        let session = self.sessions.remove(id)?;
        let mut last_for_extension = false;
        if let Some(bucket) = self.by_extension.get_mut(&session.extension) {
            bucket.retain(|s| s.id != id);
            if bucket.is_empty() {
                self.by_extension.remove(&session.extension);
                last_for_extension = true;
            }
        }
        Some(Removed { session, last_for_extension })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SessionHandle>> {
        self.sessions.get(id)
    }

    pub fn sessions_for(&self, extension: &str) -> &[Arc<SessionHandle>] {
        self.by_extension.get(extension).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<SessionHandle>> {
        self.sessions.values()
    }

    /// Connected extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut extensions: Vec<_> = self.by_extension.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    pub fn is_connected(&self, extension: &str) -> bool {
        self.by_extension.contains_key(extension)
    }

    pub fn count_for(&self, extension: &str) -> usize {
        self.sessions_for(extension).len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session.
    pub fn drain(&mut self) -> Vec<Arc<SessionHandle>> {
        self.by_extension.clear();
        self.sessions.drain().map(|(_, s)| s).collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
