//! Per-room presence bookkeeping with inactivity detection.
//!
//! One [`PresenceEntry`] exists per (room, user) pair. Joins, leaves and
//! typing indicators are announced through the shared [`RoomBroker`]. The
//! periodic [`sweep_inactive`](PresenceTracker::sweep_inactive) reports idle
//! users without evicting them: an idle user stays present until they leave
//! or their connection drops.
//!
//! No operation here fails. A leave for an absent user, a disconnect of an
//! unknown connection or a typing signal from outside the room are no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use boardsync_proto::event::BoardEvent;
use boardsync_proto::presence::PresenceEntry;
use boardsync_proto::wire::ServerMessage;
use parking_lot::Mutex;

use crate::broker::RoomBroker;
use crate::clock::Clock;

/// Default idle time after which a user is reported inactive (5 minutes).
pub const DEFAULT_INACTIVITY_THRESHOLD_MS: u64 = 5 * 60 * 1000;

/// Default period between inactivity sweeps (60 seconds).
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;

/// Inactivity timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSettings {
    /// Idle time strictly above which a user is reported inactive.
    pub threshold_ms: u64,
    /// How long before the threshold a warning goes to the idle connection.
    /// Zero disables warnings.
    pub warning_lead_ms: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_INACTIVITY_THRESHOLD_MS,
            warning_lead_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

/// Tracks which users are present in which project rooms.
pub struct PresenceTracker {
    broker: Arc<RoomBroker>,
    clock: Arc<dyn Clock>,
    settings: PresenceSettings,
    /// Room id -> user id -> entry.
    rooms: Mutex<HashMap<String, HashMap<String, PresenceEntry>>>,
}

impl PresenceTracker {
    /// Creates a tracker that announces through `broker`.
    pub fn new(
        broker: Arc<RoomBroker>,
        clock: Arc<dyn Clock>,
        settings: PresenceSettings,
    ) -> Self {
        Self {
            broker,
            clock,
            settings,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// The timing this tracker was built with.
    #[must_use]
    pub const fn settings(&self) -> PresenceSettings {
        self.settings
    }

    /// Registers `user_id` in `room_id` from `connection_id`.
    ///
    /// A rejoin overwrites the user's previous entry. A connection the entry
    /// came from stays in the broker room, so every session of the user keeps
    /// receiving room events. The room hears `UserJoined` (except the joiner)
    /// followed by `ActiveUsers` (everyone).
    pub fn join(&self, room_id: &str, user_id: &str, display_name: &str, connection_id: &str) {
        let now = self.clock.now_ms();
        let entry = PresenceEntry {
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            joined_at: now,
            last_activity: now,
            is_active: true,
        };
        self.rooms
            .lock()
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string(), entry);
        self.broker.join(connection_id, room_id);

        tracing::info!(room_id, user_id, connection_id, "user joined room");
        self.broker.broadcast_except(
            room_id,
            connection_id,
            &BoardEvent::UserJoined {
                project_id: room_id.to_string(),
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
            },
        );
        self.broadcast_active_users(room_id);
    }

    /// Removes `user_id` from `room_id`.
    ///
    /// Returns `false`, without broadcasting, if the user was not present.
    /// Otherwise the remaining members hear `UserLeft` and a fresh
    /// `ActiveUsers` list.
    pub fn leave(&self, room_id: &str, user_id: &str) -> bool {
        self.remove_entry(room_id, user_id, None)
    }

    /// Like [`leave`](Self::leave), but only if `connection_id` still holds
    /// the user's entry.
    ///
    /// The check and the removal happen under one lock, so a rejoin from a
    /// newer connection is never removed by a leave or disconnect of an older
    /// one.
    pub fn leave_held_by(&self, room_id: &str, user_id: &str, connection_id: &str) -> bool {
        self.remove_entry(room_id, user_id, Some(connection_id))
    }

    /// Performs [`leave_held_by`](Self::leave_held_by) for every entry held by
    /// `connection_id`.
    ///
    /// Returns the `(room, user)` pairs that were removed.
    pub fn disconnect(&self, connection_id: &str) -> Vec<(String, String)> {
        let mut held: Vec<(String, String)> = self
            .rooms
            .lock()
            .iter()
            .flat_map(|(room_id, users)| {
                users
                    .values()
                    .filter(|entry| entry.connection_id == connection_id)
                    .map(|entry| (room_id.clone(), entry.user_id.clone()))
            })
            .collect();
        held.sort();

        held.retain(|(room_id, user_id)| self.leave_held_by(room_id, user_id, connection_id));
        if !held.is_empty() {
            tracing::info!(connection_id, rooms = held.len(), "connection presence cleared");
        }
        held
    }

    /// Refreshes `last_activity` in every room `user_id` occupies.
    ///
    /// Returns the number of entries touched.
    pub fn record_activity(&self, user_id: &str) -> usize {
        let now = self.clock.now_ms();
        let mut touched = 0;
        for users in self.rooms.lock().values_mut() {
            if let Some(entry) = users.get_mut(user_id) {
                entry.last_activity = now;
                touched += 1;
            }
        }
        touched
    }

    /// Relays a typing indicator to the room, excluding the typist.
    ///
    /// Returns `false` if the user is not present in the room; the signal is
    /// then dropped.
    pub fn set_typing(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: &str,
        is_typing: bool,
    ) -> bool {
        let Some(connection_id) = self.connection_of(room_id, user_id) else {
            tracing::debug!(room_id, user_id, "typing from user outside room dropped");
            return false;
        };

        self.broker.broadcast_except(
            room_id,
            &connection_id,
            &BoardEvent::UserTyping {
                project_id: room_id.to_string(),
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                is_typing,
            },
        );
        true
    }

    /// Reports idle users.
    ///
    /// Every entry idle for longer than the threshold produces one
    /// `UserInactive` in its room. Entries within the warning lead of the
    /// threshold get an `InactivityWarning` on their own connection. Nobody
    /// is evicted, and a user still idle at the next sweep is reported again.
    ///
    /// Returns the number of `UserInactive` notifications emitted.
    pub fn sweep_inactive(&self) -> usize {
        let now = self.clock.now_ms();
        let PresenceSettings {
            threshold_ms,
            warning_lead_ms,
        } = self.settings;
        let warn_from = threshold_ms.saturating_sub(warning_lead_ms);

        let mut idle: Vec<(String, PresenceEntry)> = self
            .rooms
            .lock()
            .iter()
            .flat_map(|(room_id, users)| {
                users
                    .values()
                    .filter(|entry| entry.idle_ms(now) >= warn_from)
                    .map(|entry| (room_id.clone(), entry.clone()))
            })
            .collect();
        idle.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.user_id.cmp(&b.user_id)));

        let mut notified = 0;
        for (room_id, entry) in idle {
            let idle_ms = entry.idle_ms(now);
            if idle_ms > threshold_ms {
                tracing::info!(
                    room_id = %room_id,
                    user_id = %entry.user_id,
                    idle_ms,
                    "user inactive"
                );
                self.broker.broadcast(
                    &room_id,
                    &BoardEvent::UserInactive {
                        project_id: room_id.clone(),
                        user_id: entry.user_id,
                        display_name: entry.display_name,
                    },
                );
                notified += 1;
            } else if idle_ms < threshold_ms && warning_lead_ms > 0 {
                tracing::debug!(
                    room_id = %room_id,
                    user_id = %entry.user_id,
                    idle_ms,
                    "warning idle user"
                );
                self.broker.send_to(
                    &entry.connection_id,
                    ServerMessage::Event(BoardEvent::InactivityWarning {
                        project_id: room_id,
                        user_id: entry.user_id,
                        idle_ms,
                        threshold_ms,
                    }),
                );
            }
        }
        notified
    }

    /// Users present in `room_id`, oldest join first.
    #[must_use]
    pub fn active_users(&self, room_id: &str) -> Vec<PresenceEntry> {
        let now = self.clock.now_ms();
        let threshold_ms = self.settings.threshold_ms;
        let mut users: Vec<PresenceEntry> = self
            .rooms
            .lock()
            .get(room_id)
            .map(|users| users.values().cloned().collect())
            .unwrap_or_default();
        for entry in &mut users {
            entry.is_active = entry.idle_ms(now) < threshold_ms;
        }
        users.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        users
    }

    /// Returns `true` if `user_id` has an entry in `room_id`.
    #[must_use]
    pub fn is_present(&self, room_id: &str, user_id: &str) -> bool {
        self.rooms
            .lock()
            .get(room_id)
            .is_some_and(|users| users.contains_key(user_id))
    }

    /// Connection holding `user_id`'s entry in `room_id`.
    #[must_use]
    pub fn connection_of(&self, room_id: &str, user_id: &str) -> Option<String> {
        self.rooms
            .lock()
            .get(room_id)
            .and_then(|users| users.get(user_id))
            .map(|entry| entry.connection_id.clone())
    }

    fn remove_entry(&self, room_id: &str, user_id: &str, held_by: Option<&str>) -> bool {
        let removed = {
            let mut rooms = self.rooms.lock();
            let removed = rooms.get_mut(room_id).and_then(|users| {
                let held = users
                    .get(user_id)
                    .is_some_and(|e| held_by.is_none_or(|c| e.connection_id == c));
                if held { users.remove(user_id) } else { None }
            });
            if rooms.get(room_id).is_some_and(HashMap::is_empty) {
                rooms.remove(room_id);
            }
            removed
        };
        let Some(entry) = removed else {
            tracing::debug!(room_id, user_id, "leave for absent user ignored");
            return false;
        };

        self.broker.leave(&entry.connection_id, room_id);
        tracing::info!(
            room_id,
            user_id,
            connection_id = %entry.connection_id,
            "user left room"
        );
        self.broker.broadcast(
            room_id,
            &BoardEvent::UserLeft {
                project_id: room_id.to_string(),
                user_id: entry.user_id,
                display_name: entry.display_name,
            },
        );
        self.broadcast_active_users(room_id);
        true
    }

    fn broadcast_active_users(&self, room_id: &str) {
        let users = self.active_users(room_id);
        self.broker.broadcast(
            room_id,
            &BoardEvent::ActiveUsers {
                project_id: room_id.to_string(),
                users,
            },
        );
    }
}
