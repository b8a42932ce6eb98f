//! Presence entries describing who is looking at a project board.

use serde::{Deserialize, Serialize};

/// Liveness and identity record for one user within one project room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Connection the user joined from.
    pub connection_id: String,
    /// The present user.
    pub user_id: String,
    /// Name shown to other collaborators.
    pub display_name: String,
    /// When the user joined, in milliseconds since epoch.
    pub joined_at: u64,
    /// Last activity signal, in milliseconds since epoch.
    pub last_activity: u64,
    /// `now - last_activity < threshold` at the time the entry was read.
    pub is_active: bool,
}

impl PresenceEntry {
    /// Milliseconds since the last activity signal, saturating at zero.
    #[must_use]
    pub const fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_activity)
    }
}
