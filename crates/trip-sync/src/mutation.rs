// File: trip-sync/src/mutation.rs
// Purpose: Pending write operations recorded while offline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::{RecordId, Table};

/// New display position for one record of a reorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub id: RecordId,
    pub position: i32,
}

/// A write against the remote store, replayed by the sync coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    /// Full new-record fields; the server assigns the id
    Insert {
        table: Table,
        record: Map<String, Value>,
        /// Id of the tentative record shown while offline. Later entries
        /// naming it are rewritten to the server id once the insert lands.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        local_id: Option<RecordId>,
    },
    Update {
        table: Table,
        id: RecordId,
        fields: Map<String, Value>,
    },
    Delete {
        table: Table,
        id: RecordId,
    },
    Reorder {
        table: Table,
        items: Vec<Placement>,
    },
}

/// Kind of mutation, for logs and listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    Reorder,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationKind::Insert => write!(f, "insert"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
            MutationKind::Reorder => write!(f, "reorder"),
        }
    }
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Insert { .. } => MutationKind::Insert,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Delete { .. } => MutationKind::Delete,
            Mutation::Reorder { .. } => MutationKind::Reorder,
        }
    }

    pub fn table(&self) -> Table {
        match self {
            Mutation::Insert { table, .. }
            | Mutation::Update { table, .. }
            | Mutation::Delete { table, .. }
            | Mutation::Reorder { table, .. } => *table,
        }
    }

    /// Record the mutation targets, when it names a single one
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Mutation::Update { id, .. } | Mutation::Delete { id, .. } => Some(*id),
            Mutation::Insert { .. } | Mutation::Reorder { .. } => None,
        }
    }

    /// Tentative id carried by an insert made while offline
    pub fn local_id(&self) -> Option<RecordId> {
        match self {
            Mutation::Insert { local_id, .. } => *local_id,
            _ => None,
        }
    }

    /// Whether the mutation names `id` as its target, a placement, or a
    /// field value (a parent link such as `day_id`)
    pub fn references(&self, id: RecordId) -> bool {
        let raw = id.to_string();
        let in_fields = |map: &Map<String, Value>| map.values().any(|v| v.as_str() == Some(raw.as_str()));

        match self {
            Mutation::Insert { record, .. } => in_fields(record),
            Mutation::Update { id: target, fields, .. } => *target == id || in_fields(fields),
            Mutation::Delete { id: target, .. } => *target == id,
            Mutation::Reorder { items, .. } => items.iter().any(|p| p.id == id),
        }
    }

    /// Replace every reference to `from` with `to`. Returns whether anything changed.
    pub fn remap(&mut self, from: RecordId, to: RecordId) -> bool {
        let (old, new) = (from.to_string(), to.to_string());
        let remap_fields = |map: &mut Map<String, Value>| {
            let mut changed = false;
            for value in map.values_mut() {
                if value.as_str() == Some(old.as_str()) {
                    *value = Value::String(new.clone());
                    changed = true;
                }
            }
            changed
        };

        match self {
            Mutation::Insert { record, .. } => remap_fields(record),
            Mutation::Update { id, fields, .. } => {
                let mut changed = remap_fields(fields);
                if *id == from {
                    *id = to;
                    changed = true;
                }
                changed
            }
            Mutation::Delete { id, .. } => {
                if *id == from {
                    *id = to;
                    true
                } else {
                    false
                }
            }
            Mutation::Reorder { items, .. } => {
                let mut changed = false;
                for placement in items.iter_mut().filter(|p| p.id == from) {
                    placement.id = to;
                    changed = true;
                }
                changed
            }
        }
    }
}

/// A mutation as stored in the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Generated at enqueue time
    pub id: Uuid,
    pub mutation: Mutation,
    pub timestamp: DateTime<Utc>,
}

impl QueuedMutation {
    pub fn new(mutation: Mutation) -> Self {
        Self {
            id: Uuid::new_v4(),
            mutation,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutation_is_tagged_by_type() {
        let id = RecordId::new();
        let mutation = Mutation::Delete { table: Table::Items, id };
        let value = serde_json::to_value(&mutation).unwrap();

        assert_eq!(value["type"], "delete");
        assert_eq!(value["table"], "items");
        assert_eq!(value["id"], json!(id.to_string()));
    }

    #[test]
    fn test_reorder_decodes_from_stored_form() {
        let a = RecordId::new();
        let raw = json!({
            "type": "reorder",
            "table": "items",
            "items": [{"id": a.to_string(), "position": 3}]
        });

        let mutation: Mutation = serde_json::from_value(raw).unwrap();
        assert_eq!(mutation.kind(), MutationKind::Reorder);
        assert_eq!(
            mutation,
            Mutation::Reorder {
                table: Table::Items,
                items: vec![Placement { id: a, position: 3 }],
            }
        );
        assert_eq!(mutation.target(), None);
    }

    #[test]
    fn test_insert_without_local_id_omits_it() {
        let mutation = Mutation::Insert {
            table: Table::Trips,
            record: json!({"title": "Rome"}).as_object().cloned().unwrap(),
            local_id: None,
        };
        let value = serde_json::to_value(&mutation).unwrap();
        assert!(value.get("local_id").is_none());

        let decoded: Mutation =
            serde_json::from_value(json!({"type": "insert", "table": "trips", "record": {}})).unwrap();
        assert!(matches!(decoded, Mutation::Insert { local_id: None, .. }));
    }

    #[test]
    fn test_remap_rewrites_targets_and_parent_links() {
        let (local, server, other) = (RecordId::new(), RecordId::new(), RecordId::new());

        let mut update = Mutation::Update {
            table: Table::Days,
            id: local,
            fields: json!({"title": "Arrival"}).as_object().cloned().unwrap(),
        };
        assert!(update.references(local));
        assert!(update.remap(local, server));
        assert_eq!(update.target(), Some(server));
        assert!(!update.references(local));

        let mut child = Mutation::Insert {
            table: Table::Items,
            record: json!({"day_id": local.to_string(), "title": "Check-in"})
                .as_object()
                .cloned()
                .unwrap(),
            local_id: Some(other),
        };
        assert!(child.remap(local, server));
        match &child {
            Mutation::Insert { record, local_id, .. } => {
                assert_eq!(record["day_id"], json!(server.to_string()));
                assert_eq!(*local_id, Some(other));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut reorder = Mutation::Reorder {
            table: Table::Items,
            items: vec![Placement { id: other, position: 0 }, Placement { id: local, position: 1 }],
        };
        assert!(reorder.remap(local, server));
        assert!(reorder.references(server));

        let mut unrelated = Mutation::Delete { table: Table::Items, id: other };
        assert!(!unrelated.remap(local, server));
    }
}
