//! In-memory registry of live sessions, keyed by space then session.
//!
//! The registry is owned by the server and handed to every connection
//! coordinator by handle. All operations are total: missing spaces or
//! sessions turn them into no-ops, and publishing never waits on a reader.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{models::UserId, updates::SpaceUpdate};

pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

pub struct Session {
    pub id: Uuid,
    pub space_id: Uuid,
    pub user_id: UserId,
    tx: mpsc::Sender<Arc<SpaceUpdate>>,
    close: CloseCallback,
    evicted: AtomicBool,
}

impl Session {
    fn deliver(&self, update: &Arc<SpaceUpdate>) {
        match self.tx.try_send(update.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if !self.evicted.swap(true, Ordering::AcqRel) {
                    warn!(space_id = %self.space_id, session_id = %self.id, "outbound queue full, evicting session");
                    let close = self.close.clone();
                    tokio::spawn(async move { close() });
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %self.id, "session already draining");
            }
        }
    }
}

/// What a connection keeps after registering: its ids and the receiving end of its queue.
pub struct SessionHandle {
    pub session_id: Uuid,
    pub space_id: Uuid,
    pub user_id: UserId,
    pub updates: mpsc::Receiver<Arc<SpaceUpdate>>,
}

type SpaceSessions = HashMap<Uuid, Arc<Session>>;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    spaces: Arc<Mutex<HashMap<Uuid, SpaceSessions>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SpaceSessions>> {
        // the map stays consistent even if a holder panicked
        self.spaces.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_session(
        &self,
        space_id: Uuid,
        user_id: UserId,
        capacity: usize,
        close: CloseCallback,
    ) -> SessionHandle {
        let (tx, updates) = mpsc::channel(capacity.max(1));
        let session = Arc::new(Session {
            id: Uuid::now_v7(),
            space_id,
            user_id: user_id.clone(),
            tx,
            close,
            evicted: AtomicBool::new(false),
        });
        let session_id = session.id;

        self.lock()
            .entry(space_id)
            .or_default()
            .insert(session_id, session);

        debug!(%space_id, %session_id, %user_id, "session added");

        SessionHandle {
            session_id,
            space_id,
            user_id,
            updates,
        }
    }

    pub fn delete_session(&self, space_id: Uuid, session_id: Uuid) {
        let mut spaces = self.lock();
        let Some(sessions) = spaces.get_mut(&space_id) else {
            return;
        };

        if sessions.remove(&session_id).is_some() {
            debug!(%space_id, %session_id, "session deleted");
        }
        if sessions.is_empty() {
            spaces.remove(&space_id);
        }
    }

    pub fn publish_to_space(&self, space_id: Uuid, update: SpaceUpdate) {
        let update = Arc::new(update);
        let spaces = self.lock();
        let Some(sessions) = spaces.get(&space_id) else {
            return;
        };

        for session in sessions.values() {
            session.deliver(&update);
        }
    }

    pub fn publish_to_session(&self, space_id: Uuid, session_id: Uuid, update: SpaceUpdate) {
        let update = Arc::new(update);
        let spaces = self.lock();
        if let Some(session) = spaces.get(&space_id).and_then(|s| s.get(&session_id)) {
            session.deliver(&update);
        }
    }

    pub fn session_count(&self, space_id: Uuid) -> usize {
        self.lock().get(&space_id).map_or(0, HashMap::len)
    }
}
