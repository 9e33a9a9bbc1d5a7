//! Session store used by routed code
//!
//! A session is opened by the code under test (for example a login handler)
//! and is expected to be committed or aborted before the next request. Like the
//! output channel, the store is scoped to the calling thread.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Whether a session is currently open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Inactive,
    Active,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Inactive
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Inactive => write!(f, "inactive"),
            SessionStatus::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug)]
struct OpenSession {
    id: String,
    data: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct SessionState {
    open: Option<OpenSession>,
    saved: HashMap<String, BTreeMap<String, String>>,
}

thread_local! {
    static STATE: RefCell<SessionState> = RefCell::new(SessionState::default());
}

pub fn status() -> SessionStatus {
    STATE.with(|state| {
        if state.borrow().open.is_some() {
            SessionStatus::Active
        } else {
            SessionStatus::Inactive
        }
    })
}

/// Open a session, resuming the saved data for `id` when known.
/// Returns the id of the open session; an already open session is kept.
pub fn start(id: Option<&str>) -> String {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        if let Some(open) = &state.open {
            return open.id.clone();
        }

        let id = id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let data = state.saved.get(&id).cloned().unwrap_or_default();

        state.open = Some(OpenSession {
            id: id.clone(),
            data,
        });
        id
    })
}

pub fn id() -> Option<String> {
    STATE.with(|state| state.borrow().open.as_ref().map(|open| open.id.clone()))
}

pub fn get(key: &str) -> Option<String> {
    STATE.with(|state| {
        state
            .borrow()
            .open
            .as_ref()
            .and_then(|open| open.data.get(key).cloned())
    })
}

/// Store a value in the open session. Returns false when no session is open.
pub fn set(key: impl Into<String>, value: impl Into<String>) -> bool {
    STATE.with(|state| match state.borrow_mut().open.as_mut() {
        Some(open) => {
            open.data.insert(key.into(), value.into());
            true
        }
        None => false,
    })
}

/// Save the open session's data and close it
pub fn commit() {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        if let Some(open) = state.open.take() {
            state.saved.insert(open.id, open.data);
        }
    });
}

/// Close the open session, discarding changes made since it was opened
pub fn abort() {
    STATE.with(|state| {
        state.borrow_mut().open = None;
    });
}
