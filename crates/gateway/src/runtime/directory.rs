//! Lookup of live session actors by id.
//!
//! The directory stores handles only, never actors, so anything holding a
//! session id (a task run, an HTTP handler) reaches the session by message
//! passing. Handles whose actor has exited are dropped on the next lookup
//! or spawn.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::session::SessionHandle;

#[derive(Clone, Default)]
pub struct SessionDirectory {
    handles: Arc<Mutex<HashMap<String, SessionHandle>>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live actor for `id`, if any.
    pub fn resolve(&self, id: &str) -> Option<SessionHandle> {
        let mut handles = self.handles.lock();
        match handles.get(id) {
            Some(h) if !h.is_closed() => Some(h.clone()),
            Some(_) => {
                handles.remove(id);
                None
            }
            None => None,
        }
    }

    /// The live actor for `id`, spawning one with `spawn` when there is none.
    /// Prunes every closed handle first, so idle sessions never accumulate.
    pub fn get_or_spawn(&self, id: &str, spawn: impl FnOnce() -> SessionHandle) -> SessionHandle {
        let mut handles = self.handles.lock();
        handles.retain(|_, h| !h.is_closed());
        if let Some(h) = handles.get(id) {
            return h.clone();
        }
        let handle = spawn();
        handles.insert(id.to_string(), handle.clone());
        handle
    }

    /// Live sessions. Prunes closed handles as a side effect.
    pub fn len(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|_, h| !h.is_closed());
        handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
