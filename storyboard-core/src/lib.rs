//! # storyboard-core: board domain model
//!
//! A storyboard is a tree of goals → columns → stories, plus a persona list,
//! a color legend and the membership of every user who ever joined it.
//!
//! ```text
//! Storyboard
//!  ├── goals[]            (sortOrder 0..n)
//!  │    └── columns[]     (sortOrder 0..n)
//!  │         └── stories[] (sortOrder 0..n)
//!  ├── personas[]
//!  ├── colorLegend[]
//!  └── members[]          (active / abandoned / lastActive)
//! ```
//!
//! The wire-facing types serialize with camelCase field names. Persisted
//! records go through bincode, so none of these types use conditional
//! serde attributes.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

pub mod board;

pub use board::{
    BoardError, BoardRecord, ColumnMutation, GoalMutation, PersonaMutation, StoryMutation,
};

/// Color assigned to freshly created stories.
pub const DEFAULT_STORY_COLOR: &str = "gray";

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A registered user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
}

impl UserProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Persisted membership of one user in one board.
///
/// Never deleted: leaving or abandoning only flips the flags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: Uuid,
    pub active: bool,
    /// Hidden from the default presence view until the user rejoins.
    pub abandoned: bool,
    /// Seconds since epoch of the last leave/abandon, 0 if never.
    pub last_active: u64,
}

/// One row of the presence list sent to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

/// A row in a story mapping board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub name: String,
    pub columns: Vec<Column>,
    pub sort_order: i32,
}

/// A column in a goal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: Uuid,
    pub name: String,
    pub stories: Vec<Story>,
    pub sort_order: i32,
}

/// A story card in a column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub color: String,
    pub points: u32,
    pub closed: bool,
    pub comments: Vec<StoryComment>,
    pub sort_order: i32,
}

impl Story {
    fn blank(sort_order: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            content: String::new(),
            color: DEFAULT_STORY_COLOR.to_string(),
            points: 0,
            closed: false,
            comments: Vec::new(),
            sort_order,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryComment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub comment: String,
    pub created_at: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub description: String,
}

/// One entry of the board's color legend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegendColor {
    pub color: String,
    pub legend: String,
}

/// Full board snapshot as sent in `init` and `storyboard_updated`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storyboard {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub users: Vec<PresenceEntry>,
    pub goals: Vec<Goal>,
    pub color_legend: Vec<LegendColor>,
    pub personas: Vec<Persona>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_tree_uses_camel_case() {
        let goal = Goal {
            id: Uuid::nil(),
            name: "Onboarding".into(),
            columns: vec![Column {
                id: Uuid::nil(),
                name: String::new(),
                stories: vec![Story::blank(0)],
                sort_order: 0,
            }],
            sort_order: 3,
        };
        let json = serde_json::to_value(&goal).unwrap();
        assert_eq!(json["sortOrder"], 3);
        assert_eq!(json["columns"][0]["stories"][0]["color"], "gray");
        assert_eq!(json["columns"][0]["stories"][0]["sortOrder"], 0);
    }

    #[test]
    fn test_storyboard_snapshot_fields() {
        let owner = Uuid::new_v4();
        let board = Storyboard {
            id: Uuid::new_v4(),
            name: "Asgard".into(),
            owner_id: owner,
            users: vec![PresenceEntry {
                id: owner,
                name: "Thor".into(),
                active: true,
            }],
            goals: Vec::new(),
            color_legend: vec![LegendColor {
                color: "blue".into(),
                legend: "backend".into(),
            }],
            personas: Vec::new(),
        };
        let json = serde_json::to_value(&board).unwrap();
        assert_eq!(json["ownerId"], owner.to_string());
        assert_eq!(json["colorLegend"][0]["legend"], "backend");
        assert_eq!(json["users"][0]["active"], true);
    }

    #[test]
    fn test_now_secs_is_after_2020() {
        assert!(now_secs() > 1_577_836_800);
    }
}
