//! The user/group identity pool (§6 "Users pool contract").
//!
//! The core only ever reads from this pool; lookups never fail — an unknown
//! id simply resolves to an entry with an empty name, per §6. `Users` is a
//! zero-sized marker type: host user/group databases are global, so there is
//! nothing to hold per-instance state for.

use nix::unistd::{Gid, Group, Uid, User};

/// A resolved (or unresolved) owner identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Owner {
    name: String,
    id: u32,
}

impl Owner {
    fn unknown(id: u32) -> Self {
        Owner {
            name: String::new(),
            id,
        }
    }

    /// The resolved name, or an empty string if the id is unknown.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The numeric id this entry was resolved from.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Read-only handle onto the host user/group databases.
#[derive(Clone, Copy, Debug, Default)]
pub struct Users;

impl Users {
    /// Resolve a numeric uid to a username. Never fails.
    pub fn uid2user(&self, uid: u32) -> Owner {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Owner {
                name: user.name,
                id: uid,
            },
            _ => Owner::unknown(uid),
        }
    }

    /// Resolve a numeric gid to a group name.
    ///
    /// The source this crate is adapted from resolved group names by calling
    /// into the *user* database with the gid — a known bug (§9). This
    /// implementation uses the actual group database instead.
    pub fn gid2group(&self, gid: u32) -> Owner {
        match Group::from_gid(Gid::from_raw(gid)) {
            Ok(Some(group)) => Owner {
                name: group.name,
                id: gid,
            },
            _ => Owner::unknown(gid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_uid_has_empty_name() {
        let users = Users;
        let owner = users.uid2user(u32::MAX - 7);
        assert_eq!(owner.name(), "");
        assert_eq!(owner.id(), u32::MAX - 7);
    }

    #[test]
    fn unknown_gid_has_empty_name() {
        let users = Users;
        let owner = users.gid2group(u32::MAX - 7);
        assert_eq!(owner.name(), "");
        assert_eq!(owner.id(), u32::MAX - 7);
    }

    #[test]
    fn root_uid_resolves_if_present() {
        let users = Users;
        let owner = users.uid2user(0);
        // root may not exist in minimal containers; only assert the id is preserved.
        assert_eq!(owner.id(), 0);
    }
}
