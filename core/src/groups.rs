//! Group membership lifecycle (C10).
//!
//! Membership lists travel on the wire as comma-separated strings with no
//! escaping — the source never escaped commas in usernames, and since a
//! `UserID` cannot itself contain one, that's a safe simplification to
//! preserve rather than a bug to fix.

use std::fmt;

#[derive(Debug, Clone)]
pub struct Group {
    pub group_id: String,
    pub group_name: String,
    pub owner: String,
    pub members: Vec<String>,
}

#[derive(Debug)]
pub enum GroupError {
    NotOwner,
    UnknownGroup(String),
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupError::NotOwner => write!(f, "only the group owner may perform this action"),
            GroupError::UnknownGroup(id) => write!(f, "unknown group: {}", id),
        }
    }
}

impl std::error::Error for GroupError {}

impl Group {
    pub fn new(group_id: String, group_name: String, owner: String, members: Vec<String>) -> Self {
        Group {
            group_id,
            group_name,
            owner,
            members,
        }
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }

    pub fn add_members(&mut self, added: &[String]) {
        for user_id in added {
            if !self.is_member(user_id) {
                self.members.push(user_id.clone());
            }
        }
    }

    pub fn remove_members(&mut self, removed: &[String]) {
        self.members.retain(|m| !removed.contains(m));
    }

    pub fn members_csv(&self) -> String {
        self.members.join(",")
    }
}

/// Splits a CSV member list. An empty string yields an empty, legal list —
/// a group with zero remaining members is not an error.
pub fn parse_csv(csv: &str) -> Vec<String> {
    if csv.is_empty() {
        Vec::new()
    } else {
        csv.split(',').map(|s| s.trim().to_string()).collect()
    }
}

#[derive(Default)]
pub struct GroupTable {
    groups: std::collections::HashMap<String, Group>,
}

impl GroupTable {
    pub fn new() -> Self {
        GroupTable::default()
    }

    pub fn insert(&mut self, group: Group) {
        self.groups.insert(group.group_id.clone(), group);
    }

    pub fn get(&self, group_id: &str) -> Option<&Group> {
        self.groups.get(group_id)
    }

    pub fn get_mut(&mut self, group_id: &str) -> Option<&mut Group> {
        self.groups.get_mut(group_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Applies an ADD only if `acting_user` is the recorded owner.
    pub fn add(&mut self, group_id: &str, acting_user: &str, added: &[String]) -> Result<(), GroupError> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| GroupError::UnknownGroup(group_id.to_string()))?;
        if group.owner != acting_user {
            return Err(GroupError::NotOwner);
        }
        group.add_members(added);
        Ok(())
    }

    pub fn remove(&mut self, group_id: &str, acting_user: &str, removed: &[String]) -> Result<(), GroupError> {
        let group = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| GroupError::UnknownGroup(group_id.to_string()))?;
        if group.owner != acting_user {
            return Err(GroupError::NotOwner);
        }
        group.remove_members(removed);
        Ok(())
    }
}
