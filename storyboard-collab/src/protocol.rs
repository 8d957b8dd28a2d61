//! JSON wire protocol between board clients and the collaboration hub.
//!
//! Inbound frame (client → server):
//! ```text
//! {"type": "<tag>", "value": "<string, JSON-encoded for structured payloads>"}
//! ```
//!
//! Outbound frame (server → client):
//! ```text
//! {"type": "<tag>", "value": "<JSON string>", "userId": "<uuid or empty>"}
//! ```
//!
//! Every inbound tag decodes into one typed [`BoardCommand`] variant. The
//! tag → payload table lives in [`BoardCommand::decode`].

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use storyboard_core::LegendColor;
use thiserror::Error;
use uuid::Uuid;

/// Handshake rejection: missing or unknown credential.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// In-session teardown after `abandon_storyboard`.
pub const CLOSE_ABANDONED: u16 = 4002;
/// Handshake rejection: the user already has a live session on this board.
pub const CLOSE_DUPLICATE_SESSION: u16 = 4003;
/// Handshake rejection: unknown board or malformed path.
pub const CLOSE_NOT_FOUND: u16 = 4004;

// ─── Outbound tags ───────────────────────────────────────────────────

pub const TAG_INIT: &str = "init";
pub const TAG_USER_JOINED: &str = "user_joined";
pub const TAG_USER_RETREATED: &str = "user_retreated";
pub const TAG_GOAL_ADDED: &str = "goal_added";
pub const TAG_GOAL_REVISED: &str = "goal_revised";
pub const TAG_GOAL_DELETED: &str = "goal_deleted";
pub const TAG_COLUMN_ADDED: &str = "column_added";
pub const TAG_COLUMN_UPDATED: &str = "column_updated";
pub const TAG_STORY_ADDED: &str = "story_added";
pub const TAG_STORY_UPDATED: &str = "story_updated";
pub const TAG_STORY_MOVED: &str = "story_moved";
pub const TAG_STORY_DELETED: &str = "story_deleted";
pub const TAG_PERSONAS_UPDATED: &str = "personas_updated";
pub const TAG_STORYBOARD_UPDATED: &str = "storyboard_updated";
pub const TAG_STORYBOARD_CONCEDED: &str = "storyboard_conceded";

/// Protocol errors. Never fatal to a connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unknown event tag: {0}")]
    UnknownTag(String),
    #[error("Invalid payload for {tag}: {reason}")]
    InvalidPayload { tag: String, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A decoded inbound frame, before tag dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub value: String,
}

impl InboundFrame {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// An event fanned out to the sessions of one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub tag: String,
    /// JSON text of the refreshed state, or empty.
    pub value: String,
    /// Originating user, empty when the event is not attributable to one.
    #[serde(rename = "userId")]
    pub user_id: String,
}

impl OutboundEvent {
    /// Build an event whose value is the JSON encoding of `value`.
    pub fn with_value<T: Serialize>(
        tag: &str,
        value: &T,
        user_id: Option<Uuid>,
    ) -> Result<Self, ProtocolError> {
        let value =
            serde_json::to_string(value).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            tag: tag.to_string(),
            value,
            user_id: user_id.map(|id| id.to_string()).unwrap_or_default(),
        })
    }

    /// Event with an empty value and no originating user.
    pub fn bare(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            value: String::new(),
            user_id: String::new(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Parse the JSON carried in `value`.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_str(&self.value).map_err(|e| ProtocolError::InvalidPayload {
            tag: self.tag.clone(),
            reason: e.to_string(),
        })
    }
}

/// Board-scoped broadcast unit. Shared by every receiving session.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub board_id: Uuid,
    /// Encoded [`OutboundEvent`] text frame.
    pub payload: String,
}

impl Envelope {
    pub fn new(board_id: Uuid, event: &OutboundEvent) -> Result<Self, ProtocolError> {
        Ok(Self {
            board_id,
            payload: event.encode()?,
        })
    }
}

/// Which canonical sub-tree a command re-reads after mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refetch {
    GoalTree,
    Personas,
    Board,
}

/// Every inbound event, typed.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardCommand {
    AddGoal { name: String },
    ReviseGoal { goal_id: Uuid, name: String },
    DeleteGoal { goal_id: Uuid },
    AddColumn { goal_id: Uuid },
    ReviseColumn { column_id: Uuid, name: String },
    DeleteColumn { column_id: Uuid },
    AddStory { goal_id: Uuid, column_id: Uuid },
    UpdateStoryName { story_id: Uuid, name: String },
    UpdateStoryContent { story_id: Uuid, content: String },
    UpdateStoryColor { story_id: Uuid, color: String },
    UpdateStoryPoints { story_id: Uuid, points: u32 },
    UpdateStoryClosed { story_id: Uuid, closed: bool },
    MoveStory {
        story_id: Uuid,
        goal_id: Uuid,
        column_id: Uuid,
        place_before: Option<Uuid>,
    },
    DeleteStory { story_id: Uuid },
    AddStoryComment { story_id: Uuid, comment: String },
    AddPersona {
        name: String,
        role: String,
        description: String,
    },
    UpdatePersona {
        persona_id: Uuid,
        name: String,
        role: String,
        description: String,
    },
    DeletePersona { persona_id: Uuid },
    PromoteOwner { user_id: Uuid },
    ReviseColorLegend { legend: Vec<LegendColor> },
    ConcedeStoryboard,
    AbandonStoryboard,
}

// Structured payloads carried as JSON text inside `value`.

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoalRename {
    goal_id: Uuid,
    name: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoalRef {
    goal_id: Uuid,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnRename {
    column_id: Uuid,
    name: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StorySlot {
    goal_id: Uuid,
    column_id: Uuid,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryName {
    story_id: Uuid,
    name: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryContent {
    story_id: Uuid,
    content: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryColor {
    story_id: Uuid,
    color: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryPoints {
    story_id: Uuid,
    points: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryClosed {
    story_id: Uuid,
    closed: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryMove {
    story_id: Uuid,
    goal_id: Uuid,
    column_id: Uuid,
    #[serde(default, deserialize_with = "empty_as_none")]
    place_before: Option<Uuid>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryCommentBody {
    story_id: Uuid,
    comment: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonaBody {
    #[serde(default)]
    persona_id: Option<Uuid>,
    name: String,
    role: String,
    description: String,
}

/// `placeBefore` arrives as `""`, `null`, absent, or a uuid string.
fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<Uuid>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn parse_json<T: DeserializeOwned>(tag: &str, value: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(value).map_err(|e| ProtocolError::InvalidPayload {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

/// Raw id values may also arrive JSON-quoted.
fn parse_id(tag: &str, value: &str) -> Result<Uuid, ProtocolError> {
    let trimmed = value.trim().trim_matches('"');
    Uuid::parse_str(trimmed).map_err(|e| ProtocolError::InvalidPayload {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(value).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

impl BoardCommand {
    /// Decode a frame's `value` according to its tag.
    pub fn decode(tag: &str, value: &str) -> Result<Self, ProtocolError> {
        let command = match tag {
            "add_goal" => BoardCommand::AddGoal {
                name: value.to_string(),
            },
            "revise_goal" => {
                let p: GoalRename = parse_json(tag, value)?;
                BoardCommand::ReviseGoal {
                    goal_id: p.goal_id,
                    name: p.name,
                }
            }
            "delete_goal" => BoardCommand::DeleteGoal {
                goal_id: parse_id(tag, value)?,
            },
            "add_column" => {
                let p: GoalRef = parse_json(tag, value)?;
                BoardCommand::AddColumn { goal_id: p.goal_id }
            }
            "revise_column" => {
                let p: ColumnRename = parse_json(tag, value)?;
                BoardCommand::ReviseColumn {
                    column_id: p.column_id,
                    name: p.name,
                }
            }
            "delete_column" => BoardCommand::DeleteColumn {
                column_id: parse_id(tag, value)?,
            },
            "add_story" => {
                let p: StorySlot = parse_json(tag, value)?;
                BoardCommand::AddStory {
                    goal_id: p.goal_id,
                    column_id: p.column_id,
                }
            }
            "update_story_name" => {
                let p: StoryName = parse_json(tag, value)?;
                BoardCommand::UpdateStoryName {
                    story_id: p.story_id,
                    name: p.name,
                }
            }
            "update_story_content" => {
                let p: StoryContent = parse_json(tag, value)?;
                BoardCommand::UpdateStoryContent {
                    story_id: p.story_id,
                    content: p.content,
                }
            }
            "update_story_color" => {
                let p: StoryColor = parse_json(tag, value)?;
                BoardCommand::UpdateStoryColor {
                    story_id: p.story_id,
                    color: p.color,
                }
            }
            "update_story_points" => {
                let p: StoryPoints = parse_json(tag, value)?;
                BoardCommand::UpdateStoryPoints {
                    story_id: p.story_id,
                    points: p.points,
                }
            }
            "update_story_closed" => {
                let p: StoryClosed = parse_json(tag, value)?;
                BoardCommand::UpdateStoryClosed {
                    story_id: p.story_id,
                    closed: p.closed,
                }
            }
            "move_story" => {
                let p: StoryMove = parse_json(tag, value)?;
                BoardCommand::MoveStory {
                    story_id: p.story_id,
                    goal_id: p.goal_id,
                    column_id: p.column_id,
                    place_before: p.place_before,
                }
            }
            "delete_story" => BoardCommand::DeleteStory {
                story_id: parse_id(tag, value)?,
            },
            "add_story_comment" => {
                let p: StoryCommentBody = parse_json(tag, value)?;
                BoardCommand::AddStoryComment {
                    story_id: p.story_id,
                    comment: p.comment,
                }
            }
            "add_persona" => {
                let p: PersonaBody = parse_json(tag, value)?;
                BoardCommand::AddPersona {
                    name: p.name,
                    role: p.role,
                    description: p.description,
                }
            }
            "update_persona" => {
                let p: PersonaBody = parse_json(tag, value)?;
                let persona_id = p.persona_id.ok_or_else(|| ProtocolError::InvalidPayload {
                    tag: tag.to_string(),
                    reason: "missing field `personaId`".to_string(),
                })?;
                BoardCommand::UpdatePersona {
                    persona_id,
                    name: p.name,
                    role: p.role,
                    description: p.description,
                }
            }
            "delete_persona" => BoardCommand::DeletePersona {
                persona_id: parse_id(tag, value)?,
            },
            "promote_owner" => BoardCommand::PromoteOwner {
                user_id: parse_id(tag, value)?,
            },
            "revise_color_legend" => BoardCommand::ReviseColorLegend {
                legend: parse_json(tag, value)?,
            },
            "concede_storyboard" => BoardCommand::ConcedeStoryboard,
            "abandon_storyboard" => BoardCommand::AbandonStoryboard,
            other => return Err(ProtocolError::UnknownTag(other.to_string())),
        };
        Ok(command)
    }

    /// Inbound tag this command travels under.
    pub fn tag(&self) -> &'static str {
        match self {
            BoardCommand::AddGoal { .. } => "add_goal",
            BoardCommand::ReviseGoal { .. } => "revise_goal",
            BoardCommand::DeleteGoal { .. } => "delete_goal",
            BoardCommand::AddColumn { .. } => "add_column",
            BoardCommand::ReviseColumn { .. } => "revise_column",
            BoardCommand::DeleteColumn { .. } => "delete_column",
            BoardCommand::AddStory { .. } => "add_story",
            BoardCommand::UpdateStoryName { .. } => "update_story_name",
            BoardCommand::UpdateStoryContent { .. } => "update_story_content",
            BoardCommand::UpdateStoryColor { .. } => "update_story_color",
            BoardCommand::UpdateStoryPoints { .. } => "update_story_points",
            BoardCommand::UpdateStoryClosed { .. } => "update_story_closed",
            BoardCommand::MoveStory { .. } => "move_story",
            BoardCommand::DeleteStory { .. } => "delete_story",
            BoardCommand::AddStoryComment { .. } => "add_story_comment",
            BoardCommand::AddPersona { .. } => "add_persona",
            BoardCommand::UpdatePersona { .. } => "update_persona",
            BoardCommand::DeletePersona { .. } => "delete_persona",
            BoardCommand::PromoteOwner { .. } => "promote_owner",
            BoardCommand::ReviseColorLegend { .. } => "revise_color_legend",
            BoardCommand::ConcedeStoryboard => "concede_storyboard",
            BoardCommand::AbandonStoryboard => "abandon_storyboard",
        }
    }

    /// Structural mutations are reserved for the board owner.
    pub fn requires_owner(&self) -> bool {
        !matches!(
            self,
            BoardCommand::AddStoryComment { .. } | BoardCommand::AbandonStoryboard
        )
    }

    /// Outbound tag answering this command; `None` means no broadcast.
    pub fn reply_tag(&self) -> Option<&'static str> {
        let tag = match self {
            BoardCommand::AddGoal { .. } => TAG_GOAL_ADDED,
            BoardCommand::ReviseGoal { .. } => TAG_GOAL_REVISED,
            BoardCommand::DeleteGoal { .. } => TAG_GOAL_DELETED,
            BoardCommand::AddColumn { .. } => TAG_COLUMN_ADDED,
            BoardCommand::ReviseColumn { .. } => TAG_COLUMN_UPDATED,
            // Inherited: column deletion answers with the story tag.
            BoardCommand::DeleteColumn { .. } => TAG_STORY_DELETED,
            BoardCommand::AddStory { .. } => TAG_STORY_ADDED,
            BoardCommand::UpdateStoryName { .. }
            | BoardCommand::UpdateStoryContent { .. }
            | BoardCommand::UpdateStoryColor { .. }
            | BoardCommand::UpdateStoryPoints { .. }
            | BoardCommand::UpdateStoryClosed { .. }
            | BoardCommand::AddStoryComment { .. } => TAG_STORY_UPDATED,
            BoardCommand::MoveStory { .. } => TAG_STORY_MOVED,
            BoardCommand::DeleteStory { .. } => TAG_STORY_DELETED,
            BoardCommand::AddPersona { .. }
            | BoardCommand::UpdatePersona { .. }
            | BoardCommand::DeletePersona { .. } => TAG_PERSONAS_UPDATED,
            BoardCommand::PromoteOwner { .. } | BoardCommand::ReviseColorLegend { .. } => {
                TAG_STORYBOARD_UPDATED
            }
            BoardCommand::ConcedeStoryboard => TAG_STORYBOARD_CONCEDED,
            BoardCommand::AbandonStoryboard => return None,
        };
        Some(tag)
    }

    /// Sub-tree re-read after the mutation, if any.
    pub fn refetch(&self) -> Option<Refetch> {
        match self {
            BoardCommand::AddPersona { .. }
            | BoardCommand::UpdatePersona { .. }
            | BoardCommand::DeletePersona { .. } => Some(Refetch::Personas),
            BoardCommand::PromoteOwner { .. } | BoardCommand::ReviseColorLegend { .. } => {
                Some(Refetch::Board)
            }
            BoardCommand::ConcedeStoryboard | BoardCommand::AbandonStoryboard => None,
            _ => Some(Refetch::GoalTree),
        }
    }

    /// Encode the `value` half of the inbound frame.
    pub fn encode_value(&self) -> Result<String, ProtocolError> {
        match self {
            BoardCommand::AddGoal { name } => Ok(name.clone()),
            BoardCommand::ReviseGoal { goal_id, name } => to_json(&GoalRename {
                goal_id: *goal_id,
                name: name.clone(),
            }),
            BoardCommand::DeleteGoal { goal_id } => Ok(goal_id.to_string()),
            BoardCommand::AddColumn { goal_id } => to_json(&GoalRef { goal_id: *goal_id }),
            BoardCommand::ReviseColumn { column_id, name } => to_json(&ColumnRename {
                column_id: *column_id,
                name: name.clone(),
            }),
            BoardCommand::DeleteColumn { column_id } => Ok(column_id.to_string()),
            BoardCommand::AddStory { goal_id, column_id } => to_json(&StorySlot {
                goal_id: *goal_id,
                column_id: *column_id,
            }),
            BoardCommand::UpdateStoryName { story_id, name } => to_json(&StoryName {
                story_id: *story_id,
                name: name.clone(),
            }),
            BoardCommand::UpdateStoryContent { story_id, content } => to_json(&StoryContent {
                story_id: *story_id,
                content: content.clone(),
            }),
            BoardCommand::UpdateStoryColor { story_id, color } => to_json(&StoryColor {
                story_id: *story_id,
                color: color.clone(),
            }),
            BoardCommand::UpdateStoryPoints { story_id, points } => to_json(&StoryPoints {
                story_id: *story_id,
                points: *points,
            }),
            BoardCommand::UpdateStoryClosed { story_id, closed } => to_json(&StoryClosed {
                story_id: *story_id,
                closed: *closed,
            }),
            BoardCommand::MoveStory {
                story_id,
                goal_id,
                column_id,
                place_before,
            } => to_json(&StoryMove {
                story_id: *story_id,
                goal_id: *goal_id,
                column_id: *column_id,
                place_before: *place_before,
            }),
            BoardCommand::DeleteStory { story_id } => Ok(story_id.to_string()),
            BoardCommand::AddStoryComment { story_id, comment } => to_json(&StoryCommentBody {
                story_id: *story_id,
                comment: comment.clone(),
            }),
            BoardCommand::AddPersona {
                name,
                role,
                description,
            } => to_json(&PersonaBody {
                persona_id: None,
                name: name.clone(),
                role: role.clone(),
                description: description.clone(),
            }),
            BoardCommand::UpdatePersona {
                persona_id,
                name,
                role,
                description,
            } => to_json(&PersonaBody {
                persona_id: Some(*persona_id),
                name: name.clone(),
                role: role.clone(),
                description: description.clone(),
            }),
            BoardCommand::DeletePersona { persona_id } => Ok(persona_id.to_string()),
            BoardCommand::PromoteOwner { user_id } => Ok(user_id.to_string()),
            BoardCommand::ReviseColorLegend { legend } => to_json(legend),
            BoardCommand::ConcedeStoryboard | BoardCommand::AbandonStoryboard => Ok(String::new()),
        }
    }

    pub fn to_frame(&self) -> Result<InboundFrame, ProtocolError> {
        Ok(InboundFrame::new(self.tag(), self.encode_value()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_decode() {
        let frame = InboundFrame::decode(r#"{"type":"add_goal","value":"Goal A"}"#).unwrap();
        assert_eq!(frame.tag, "add_goal");
        assert_eq!(frame.value, "Goal A");

        let bare = InboundFrame::decode(r#"{"type":"abandon_storyboard"}"#).unwrap();
        assert!(bare.value.is_empty());
    }

    #[test]
    fn test_malformed_frame() {
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            BoardCommand::decode("launch_rockets", ""),
            Err(ProtocolError::UnknownTag("launch_rockets".into()))
        );
    }

    #[test]
    fn test_raw_value_commands() {
        let id = Uuid::new_v4();
        assert_eq!(
            BoardCommand::decode("add_goal", "Goal A").unwrap(),
            BoardCommand::AddGoal {
                name: "Goal A".into()
            }
        );
        assert_eq!(
            BoardCommand::decode("delete_story", &id.to_string()).unwrap(),
            BoardCommand::DeleteStory { story_id: id }
        );
        assert_eq!(
            BoardCommand::decode("promote_owner", &format!("\"{id}\"")).unwrap(),
            BoardCommand::PromoteOwner { user_id: id }
        );
    }

    #[test]
    fn test_bad_id_is_invalid_payload() {
        let err = BoardCommand::decode("delete_goal", "nope").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref tag, .. } if tag == "delete_goal"));
    }

    #[test]
    fn test_move_story_place_before_variants() {
        let story = Uuid::new_v4();
        let goal = Uuid::new_v4();
        let column = Uuid::new_v4();
        let before = Uuid::new_v4();

        let with = format!(
            r#"{{"storyId":"{story}","goalId":"{goal}","columnId":"{column}","placeBefore":"{before}"}}"#
        );
        let empty = format!(
            r#"{{"storyId":"{story}","goalId":"{goal}","columnId":"{column}","placeBefore":""}}"#
        );
        let absent = format!(r#"{{"storyId":"{story}","goalId":"{goal}","columnId":"{column}"}}"#);

        match BoardCommand::decode("move_story", &with).unwrap() {
            BoardCommand::MoveStory { place_before, .. } => assert_eq!(place_before, Some(before)),
            other => panic!("unexpected {other:?}"),
        }
        for value in [empty, absent] {
            match BoardCommand::decode("move_story", &value).unwrap() {
                BoardCommand::MoveStory { place_before, .. } => assert_eq!(place_before, None),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_story_points_wrong_type() {
        let value = format!(r#"{{"storyId":"{}","points":"many"}}"#, Uuid::new_v4());
        assert!(matches!(
            BoardCommand::decode("update_story_points", &value),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_update_persona_requires_id() {
        let value = r#"{"name":"Ada","role":"Admin","description":""}"#;
        assert!(BoardCommand::decode("update_persona", value).is_err());
        assert!(BoardCommand::decode("add_persona", value).is_ok());
    }

    #[test]
    fn test_color_legend_array() {
        let value = r#"[{"color":"blue","legend":"backend"},{"color":"red","legend":"bug"}]"#;
        match BoardCommand::decode("revise_color_legend", value).unwrap() {
            BoardCommand::ReviseColorLegend { legend } => {
                assert_eq!(legend.len(), 2);
                assert_eq!(legend[1].legend, "bug");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_command_frame_decodes_back() {
        let commands = vec![
            BoardCommand::AddColumn {
                goal_id: Uuid::new_v4(),
            },
            BoardCommand::MoveStory {
                story_id: Uuid::new_v4(),
                goal_id: Uuid::new_v4(),
                column_id: Uuid::new_v4(),
                place_before: None,
            },
            BoardCommand::UpdatePersona {
                persona_id: Uuid::new_v4(),
                name: "Ada".into(),
                role: "Admin".into(),
                description: "x".into(),
            },
            BoardCommand::AbandonStoryboard,
        ];
        for command in commands {
            let frame = command.to_frame().unwrap();
            assert_eq!(BoardCommand::decode(&frame.tag, &frame.value).unwrap(), command);
        }
    }

    #[test]
    fn test_owner_restriction_table() {
        assert!(BoardCommand::AddGoal { name: "x".into() }.requires_owner());
        assert!(BoardCommand::ConcedeStoryboard.requires_owner());
        assert!(!BoardCommand::AbandonStoryboard.requires_owner());
        assert!(!BoardCommand::AddStoryComment {
            story_id: Uuid::nil(),
            comment: "hi".into()
        }
        .requires_owner());
    }

    #[test]
    fn test_reply_tags() {
        let column = BoardCommand::DeleteColumn {
            column_id: Uuid::nil(),
        };
        assert_eq!(column.reply_tag(), Some(TAG_STORY_DELETED));
        assert_eq!(column.refetch(), Some(Refetch::GoalTree));
        assert_eq!(BoardCommand::AbandonStoryboard.reply_tag(), None);
        assert_eq!(
            BoardCommand::PromoteOwner { user_id: Uuid::nil() }.refetch(),
            Some(Refetch::Board)
        );
    }

    #[test]
    fn test_outbound_event_wire_shape() {
        let user = Uuid::new_v4();
        let event = OutboundEvent::with_value(TAG_USER_JOINED, &vec!["a"], Some(user)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "user_joined");
        assert_eq!(json["value"], r#"["a"]"#);
        assert_eq!(json["userId"], user.to_string());

        let conceded = OutboundEvent::bare(TAG_STORYBOARD_CONCEDED);
        assert!(conceded.user_id.is_empty());
        assert!(conceded.value.is_empty());
    }
}
