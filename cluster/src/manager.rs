//! Explicit group registry.
//!
//! Owns the `name → Group` table for one process. Applications construct a
//! manager, register their groups, and destroy them (or everything) on
//! shutdown; nothing here is global.

use crate::group::Group;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

/// Registry of named cache groups.
pub struct GroupManager {
    groups: RwLock<HashMap<String, Group>>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Register a group under its name. An existing group with the same name
    /// is closed and replaced.
    pub fn register(&self, group: Group) -> Group {
        let name = group.name().to_string();
        let mut groups = self.groups.write();
        if let Some(previous) = groups.insert(name.clone(), group.clone()) {
            warn!(group = %name, "group already exists, replacing");
            previous.close();
        }
        group
    }

    /// Look up a group by name.
    pub fn get(&self, name: &str) -> Option<Group> {
        self.groups.read().get(name).cloned()
    }

    /// Names of every registered group.
    pub fn list(&self) -> Vec<String> {
        self.groups.read().keys().cloned().collect()
    }

    /// Close and unregister one group. Returns whether it existed.
    pub fn destroy(&self, name: &str) -> bool {
        let removed = self.groups.write().remove(name);
        match removed {
            Some(group) => {
                group.close();
                info!(group = %name, "destroyed cache group");
                true
            }
            None => false,
        }
    }

    /// Close and unregister every group.
    pub fn destroy_all(&self) {
        let groups: Vec<(String, Group)> = self.groups.write().drain().collect();
        for (name, group) in groups {
            group.close();
            info!(group = %name, "destroyed cache group");
        }
    }
}

impl Default for GroupManager {
    fn default() -> Self {
        Self::new()
    }
}
