//! Room presence kept in sync with the server.
//!
//! A snapshot replaces the local set wholesale; online/offline events are
//! idempotent inserts and removes on top of it.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionError, ConnectionManager, EventStream};
use crate::protocol::{names, InboundEvent, PresenceUser, SyncFailure};

const UPDATE_BUFFER: usize = 64;

/// Users currently present in one room, at most one entry per user id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    users: BTreeMap<String, PresenceUser>,
}

impl PresenceSet {
    /// Replace the whole set. Entries from before are discarded.
    pub fn replace(&mut self, users: impl IntoIterator<Item = PresenceUser>) {
        self.users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
    }

    /// Insert unless the user is already present. Returns whether it was added.
    pub fn insert(&mut self, user: PresenceUser) -> bool {
        if self.users.contains_key(&user.id) {
            return false;
        }
        self.users.insert(user.id.clone(), user);
        true
    }

    /// Returns whether the user was present.
    pub fn remove(&mut self, user_id: &str) -> bool {
        self.users.remove(user_id).is_some()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Users ordered by id.
    pub fn users(&self) -> Vec<PresenceUser> {
        self.users.values().cloned().collect()
    }

    /// Apply one inbound event for `room_id`. Returns the resulting change, if any.
    pub fn apply(&mut self, room_id: &str, event: &InboundEvent) -> Option<PresenceUpdate> {
        match event {
            InboundEvent::PresenceSnapshot(snapshot) if snapshot.room_id == room_id => {
                self.replace(snapshot.users.iter().cloned());
                Some(PresenceUpdate::Replaced { count: self.len() })
            }
            InboundEvent::UserOnline { user } => self
                .insert(user.clone())
                .then(|| PresenceUpdate::Online(user.clone())),
            InboundEvent::UserOffline { user_id } => self
                .remove(user_id)
                .then(|| PresenceUpdate::Offline(user_id.clone())),
            _ => None,
        }
    }
}

/// A change to a room's presence set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceUpdate {
    Replaced { count: usize },
    Online(PresenceUser),
    Offline(String),
}

fn is_presence_event(name: &str) -> bool {
    matches!(name, names::ROOM_USERS | names::USER_ONLINE | names::USER_OFFLINE)
}

/// Live presence for one room.
///
/// Dropping it stops applying events; [`leave`](Self::leave) also releases
/// the room registration on the connection.
#[derive(Debug)]
pub struct PresenceSync {
    room_id: String,
    manager: ConnectionManager,
    set: Arc<RwLock<PresenceSet>>,
    updates: broadcast::Sender<PresenceUpdate>,
    failures: broadcast::Sender<SyncFailure>,
    task: JoinHandle<()>,
}

impl PresenceSync {
    /// Join `room_id` and start applying its presence events.
    pub async fn start(manager: &ConnectionManager, room_id: impl Into<String>) -> Result<Self, ConnectionError> {
        let room_id = room_id.into();
        let events = manager.subscribe();
        manager.join_room(&room_id).await?;

        let set = Arc::new(RwLock::new(PresenceSet::default()));
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let (failures, _) = broadcast::channel(UPDATE_BUFFER);
        let task = tokio::spawn(consume(
            room_id.clone(),
            events,
            manager.clone(),
            Arc::clone(&set),
            updates.clone(),
            failures.clone(),
        ));
        tracing::debug!(room_id = %room_id, "presence sync started");

        Ok(Self {
            room_id,
            manager: manager.clone(),
            set,
            updates,
            failures,
            task,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PresenceSet> {
        self.set.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn users(&self) -> Vec<PresenceUser> {
        self.read().users()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.read().contains(user_id)
    }

    pub fn updates(&self) -> broadcast::Receiver<PresenceUpdate> {
        self.updates.subscribe()
    }

    /// Malformed presence events, reported instead of applied.
    pub fn failures(&self) -> broadcast::Receiver<SyncFailure> {
        self.failures.subscribe()
    }

    /// Stop applying events and release the room.
    pub async fn leave(self) -> Result<(), ConnectionError> {
        self.task.abort();
        tracing::debug!(room_id = %self.room_id, "presence sync stopped");
        self.manager.leave_room(&self.room_id).await
    }
}

impl Drop for PresenceSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn consume(
    room_id: String,
    mut events: EventStream,
    manager: ConnectionManager,
    set: Arc<RwLock<PresenceSet>>,
    updates: broadcast::Sender<PresenceUpdate>,
    failures: broadcast::Sender<SyncFailure>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(room_id = %room_id, skipped, "presence events lagged; requesting snapshot");
                if manager.request_snapshot(&room_id).await.is_err() {
                    break;
                }
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if let InboundEvent::Malformed(failure) = &event {
            if is_presence_event(&failure.event) {
                tracing::warn!(room_id = %room_id, event = %failure.event, reason = %failure.reason, "presence event skipped");
                let _ = failures.send(failure.clone());
            }
            continue;
        }

        let update = set.write().unwrap_or_else(PoisonError::into_inner).apply(&room_id, &event);
        if let Some(update) = update {
            tracing::debug!(room_id = %room_id, update = ?update, "presence updated");
            let _ = updates.send(update);
        }
    }
}
