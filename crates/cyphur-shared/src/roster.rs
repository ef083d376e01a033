//! The identity/roster capability.
//!
//! The host session already knows who is connected; Cyphur only consumes
//! that knowledge. [`Roster`] is the seam the host implements;
//! [`StaticRoster`] is the in-process implementation used by tests and
//! embedding hosts with a fixed user list.

use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// One user as the host session reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterUser {
    pub id: UserId,
    pub display_name: String,
    pub avatar: Option<String>,
    /// The privileged observer role.
    pub privileged: bool,
    pub online: bool,
}

pub trait Roster {
    /// All users known to the session, online or not.
    fn users(&self) -> Vec<RosterUser>;

    fn user(&self, id: &UserId) -> Option<RosterUser> {
        self.users().into_iter().find(|u| u.id == *id)
    }

    fn is_privileged(&self, id: &UserId) -> bool {
        self.user(id).map(|u| u.privileged).unwrap_or(false)
    }

    /// Online privileged users: the candidates for stealth relay copies.
    fn active_observers(&self) -> Vec<RosterUser> {
        self.users()
            .into_iter()
            .filter(|u| u.privileged && u.online)
            .collect()
    }
}

/// Fixed-membership roster.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    users: Vec<RosterUser>,
}

impl StaticRoster {
    pub fn new(users: Vec<RosterUser>) -> Self {
        Self { users }
    }

    pub fn push(&mut self, user: RosterUser) {
        self.users.push(user);
    }

    pub fn set_online(&mut self, id: &UserId, online: bool) {
        if let Some(u) = self.users.iter_mut().find(|u| u.id == *id) {
            u.online = online;
        }
    }
}

impl Roster for StaticRoster {
    fn users(&self) -> Vec<RosterUser> {
        self.users.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, privileged: bool, online: bool) -> RosterUser {
        RosterUser {
            id: UserId::from(id),
            display_name: id.to_uppercase(),
            avatar: None,
            privileged,
            online,
        }
    }

    #[test]
    fn active_observers_excludes_offline_and_unprivileged() {
        let roster = StaticRoster::new(vec![
            user("gm", true, true),
            user("gm2", true, false),
            user("u1", false, true),
        ]);

        let observers = roster.active_observers();
        assert_eq!(observers.len(), 1);
        assert_eq!(observers[0].id, UserId::from("gm"));
        assert!(roster.is_privileged(&UserId::from("gm2")));
        assert!(!roster.is_privileged(&UserId::from("u1")));
    }
}
