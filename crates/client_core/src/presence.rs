use std::collections::BTreeSet;

use shared::{domain::UserId, protocol::UserStatus};

/// Online roster built purely from `userStatus` events seen since connect.
/// There is no snapshot request, so peers that were already online and stay
/// silent are missing until they emit a status change.
#[derive(Debug, Default, Clone)]
pub struct PresenceRoster {
    online: BTreeSet<UserId>,
}

impl PresenceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a status event; returns true when membership changed.
    pub fn apply(&mut self, status: UserStatus) -> bool {
        if status.status.is_online() {
            self.online.insert(status.id)
        } else {
            self.online.remove(&status.id)
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains(&user_id)
    }

    pub fn online(&self) -> Vec<UserId> {
        self.online.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }
}
