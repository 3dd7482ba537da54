//! In-memory responder registry with room membership.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use parley_core::Result;
use parley_core::responder::Responder;
use parley_core::store::ResponderDirectory;

use super::lock_rows;

/// Responder configuration plus a room membership table, mirroring the
/// room/responder join the record store keeps.
#[derive(Default)]
pub struct MemoryResponderDirectory {
    responders: Mutex<HashMap<String, Responder>>,
    rooms: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryResponderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a responder configuration.
    pub fn register(&self, responder: Responder) {
        lock_rows(&self.responders).insert(responder.id.clone(), responder);
    }

    /// Registers a responder as an active member of a room.
    pub fn register_in_room(&self, room_id: &str, responder_id: &str) {
        let mut rooms = lock_rows(&self.rooms);
        let members = rooms.entry(room_id.to_string()).or_default();
        if !members.iter().any(|id| id == responder_id) {
            members.push(responder_id.to_string());
        }
    }
}

#[async_trait]
impl ResponderDirectory for MemoryResponderDirectory {
    async fn find_by_id(&self, responder_id: &str) -> Result<Option<Responder>> {
        Ok(lock_rows(&self.responders).get(responder_id).cloned())
    }

    async fn list_active_in_room(&self, room_id: &str) -> Result<Vec<Responder>> {
        let member_ids = lock_rows(&self.rooms)
            .get(room_id)
            .cloned()
            .unwrap_or_default();

        let responders = lock_rows(&self.responders);
        Ok(member_ids
            .iter()
            .filter_map(|id| responders.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::responder::ResponderKind;

    fn responder(id: &str, name: &str) -> Responder {
        Responder {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            personality: String::new(),
            instructions: "You are helpful.".to_string(),
            model: String::new(),
            kind: ResponderKind::Standard,
        }
    }

    #[tokio::test]
    async fn room_listing_follows_membership() {
        let directory = MemoryResponderDirectory::new();
        directory.register(responder("a", "Alpha"));
        directory.register(responder("b", "Beta"));
        directory.register_in_room("room-1", "a");
        directory.register_in_room("room-1", "a"); // duplicate registration is a no-op

        let members = directory.list_active_in_room("room-1").await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "Alpha");

        assert!(
            directory
                .list_active_in_room("room-2")
                .await
                .unwrap()
                .is_empty()
        );
    }
}
