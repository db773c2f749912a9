// File: trip-sync/src/models.rs
// Purpose: Itinerary records (trips, days, items), drafts, patches and list scopes

use chrono::{Duration, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote collections the client reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Trips,
    Days,
    Items,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Trips => "trips",
            Table::Days => "days",
            Table::Items => "items",
        }
    }

    /// Column linking a row to its parent collection, if any
    pub fn parent_column(&self) -> Option<&'static str> {
        match self {
            Table::Trips => None,
            Table::Days => Some("trip_id"),
            Table::Items => Some("day_id"),
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Record identifier. Assigned by the server on insert; minted locally for
/// tentative records created while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RecordId)
    }
}

/// A record type the data hooks can list, create, update and delete
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Remote collection holding this record type
    const TABLE: Table;

    /// Full field set of a new record, without id
    type Draft: Serialize + Send + Sync;

    fn id(&self) -> RecordId;

    /// Display position within the parent, for orderable records
    fn position(&self) -> Option<i32> {
        None
    }
}

/// Records the user can drag into a new order
pub trait Orderable: Entity {
    fn set_position(&mut self, position: i32);
}

/// Which slice of a table a hook lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Parent { column: &'static str, id: RecordId },
}

impl Scope {
    pub fn days_of(trip_id: RecordId) -> Self {
        Scope::Parent { column: "trip_id", id: trip_id }
    }

    pub fn items_of(day_id: RecordId) -> Self {
        Scope::Parent { column: "day_id", id: day_id }
    }

    /// Entity id component of the cache key
    pub fn key_suffix(&self) -> String {
        match self {
            Scope::All => "all".to_string(),
            Scope::Parent { id, .. } => id.to_string(),
        }
    }

    /// Check whether a raw record belongs to this scope
    pub fn matches(&self, record: &serde_json::Value) -> bool {
        match self {
            Scope::All => true,
            Scope::Parent { column, id } => record
                .get(*column)
                .and_then(|v| v.as_str())
                .map(|v| v == id.to_string())
                .unwrap_or(false),
        }
    }
}

// ============================================================================
// TRIPS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: RecordId,
    pub title: String,
    #[serde(default)]
    pub destination: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Trip {
    /// Number of calendar days covered, both ends inclusive
    pub fn day_count(&self) -> u32 {
        let span = (self.end_date - self.start_date).num_days();
        if span < 0 {
            0
        } else {
            span as u32 + 1
        }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        (0..self.day_count())
            .map(|offset| self.start_date + Duration::days(offset as i64))
            .collect()
    }

    /// One day draft per calendar date of the trip
    pub fn day_drafts(&self) -> Vec<NewDay> {
        self.dates()
            .into_iter()
            .enumerate()
            .map(|(position, date)| NewDay {
                trip_id: self.id,
                date,
                position: position as i32,
                title: None,
            })
            .collect()
    }
}

impl Entity for Trip {
    const TABLE: Table = Table::Trips;
    type Draft = NewTrip;

    fn id(&self) -> RecordId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrip {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ============================================================================
// DAYS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Day {
    pub id: RecordId,
    pub trip_id: RecordId,
    pub date: NaiveDate,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub title: Option<String>,
}

impl Entity for Day {
    const TABLE: Table = Table::Days;
    type Draft = NewDay;

    fn id(&self) -> RecordId {
        self.id
    }

    fn position(&self) -> Option<i32> {
        Some(self.position)
    }
}

impl Orderable for Day {
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDay {
    pub trip_id: RecordId,
    pub date: NaiveDate,
    pub position: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

// ============================================================================
// ITEMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Food,
    Activity,
    Transport,
    Lodging,
    Sight,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: RecordId,
    pub day_id: RecordId,
    pub title: String,
    #[serde(default)]
    pub category: ItemCategory,
    /// Local time of day, "HH:MM"
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub position: i32,
}

impl Entity for Item {
    const TABLE: Table = Table::Items;
    type Draft = NewItem;

    fn id(&self) -> RecordId {
        self.id
    }

    fn position(&self) -> Option<i32> {
        Some(self.position)
    }
}

impl Orderable for Item {
    fn set_position(&mut self, position: i32) {
        self.position = position;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub day_id: RecordId,
    pub title: String,
    pub category: ItemCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ItemCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
