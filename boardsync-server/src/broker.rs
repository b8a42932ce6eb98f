//! Room membership and fan-out for board connections.
//!
//! The [`RoomBroker`] tracks which connections sit in which project rooms
//! and delivers [`BoardEvent`]s to them through each connection's outbound
//! channel. Every fan-out happens under one lock, so two broadcasts into the
//! same room reach all members in the same order.
//!
//! Delivery is fire-and-forget: a peer whose channel is closed is skipped
//! silently. The transport notices the closed socket and disconnects it.

use std::collections::{BTreeSet, HashMap, HashSet};

use boardsync_proto::event::BoardEvent;
use boardsync_proto::wire::ServerMessage;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Sender half of a connection's outbound message channel.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

#[derive(Default)]
struct BrokerState {
    /// Connection id -> outbound channel.
    connections: HashMap<String, Outbound>,
    /// Room id -> member connection ids.
    rooms: HashMap<String, BTreeSet<String>>,
    /// Connection id -> rooms it has joined.
    memberships: HashMap<String, HashSet<String>>,
}

/// Connection membership in named rooms plus fan-out primitives.
#[derive(Default)]
pub struct RoomBroker {
    state: Mutex<BrokerState>,
}

impl RoomBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the outbound channel of a connection.
    ///
    /// Returns the previous sender if the id was already attached.
    pub fn attach(&self, connection_id: &str, sender: Outbound) -> Option<Outbound> {
        self.state
            .lock()
            .connections
            .insert(connection_id.to_string(), sender)
    }

    /// Forgets a connection entirely, removing it from every room.
    ///
    /// Returns the rooms it was a member of.
    pub fn detach(&self, connection_id: &str) -> Vec<String> {
        let mut state = self.state.lock();
        state.connections.remove(connection_id);
        let rooms: Vec<String> = state
            .memberships
            .remove(connection_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for room_id in &rooms {
            remove_member(&mut state.rooms, room_id, connection_id);
        }
        drop(state);
        rooms
    }

    /// Adds a connection to a room, creating the room on first join.
    ///
    /// Returns `false` if the connection was already a member.
    pub fn join(&self, connection_id: &str, room_id: &str) -> bool {
        let mut state = self.state.lock();
        let added = state
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        state
            .memberships
            .entry(connection_id.to_string())
            .or_default()
            .insert(room_id.to_string());
        drop(state);
        if added {
            tracing::debug!(connection_id, room_id, "connection joined room");
        }
        added
    }

    /// Removes a connection from a room.
    ///
    /// Returns `false` if it was not a member. Empty rooms are dropped.
    pub fn leave(&self, connection_id: &str, room_id: &str) -> bool {
        let mut state = self.state.lock();
        let removed = remove_member(&mut state.rooms, room_id, connection_id);
        if let Some(set) = state.memberships.get_mut(connection_id) {
            set.remove(room_id);
            if set.is_empty() {
                state.memberships.remove(connection_id);
            }
        }
        drop(state);
        if removed {
            tracing::debug!(connection_id, room_id, "connection left room");
        }
        removed
    }

    /// Connection ids currently in a room, in sorted order.
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.state
            .lock()
            .rooms
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection has joined, in sorted order.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .state
            .lock()
            .memberships
            .get(connection_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Returns `true` if the connection has an outbound channel attached.
    #[must_use]
    pub fn is_attached(&self, connection_id: &str) -> bool {
        self.state.lock().connections.contains_key(connection_id)
    }

    /// Delivers `event` to every connection in `room_id`.
    ///
    /// Returns the number of connections it was handed to.
    pub fn broadcast(&self, room_id: &str, event: &BoardEvent) -> usize {
        self.fan_out(room_id, None, event)
    }

    /// Delivers `event` to every connection in `room_id` except `sender`.
    ///
    /// Returns the number of connections it was handed to.
    pub fn broadcast_except(&self, room_id: &str, sender: &str, event: &BoardEvent) -> usize {
        self.fan_out(room_id, Some(sender), event)
    }

    /// Sends a message to a single connection.
    ///
    /// Returns `false` if the connection is unknown or its channel is closed.
    pub fn send_to(&self, connection_id: &str, msg: ServerMessage) -> bool {
        let state = self.state.lock();
        state
            .connections
            .get(connection_id)
            .is_some_and(|sender| sender.send(msg).is_ok())
    }

    fn fan_out(&self, room_id: &str, except: Option<&str>, event: &BoardEvent) -> usize {
        let state = self.state.lock();
        let Some(members) = state.rooms.get(room_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in members {
            if except == Some(connection_id.as_str()) {
                continue;
            }
            let Some(sender) = state.connections.get(connection_id) else {
                continue;
            };
            if sender.send(ServerMessage::Event(event.clone())).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(
                    connection_id = %connection_id,
                    room_id,
                    "dropping event for closed connection"
                );
            }
        }
        drop(state);
        tracing::debug!(room_id, kind = event.kind(), delivered, "event fanned out");
        delivered
    }
}

fn remove_member(
    rooms: &mut HashMap<String, BTreeSet<String>>,
    room_id: &str,
    connection_id: &str,
) -> bool {
    let Some(members) = rooms.get_mut(room_id) else {
        return false;
    };
    let removed = members.remove(connection_id);
    if members.is_empty() {
        rooms.remove(room_id);
    }
    removed
}
