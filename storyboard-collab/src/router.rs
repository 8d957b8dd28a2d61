//! Inbound event dispatch.
//!
//! Every command runs the same pipeline:
//!
//! 1. decode the tag's typed payload (failure: warn, drop)
//! 2. owner-only commands confirm ownership (failure: debug, drop)
//! 3. mutate through the gateway (failure: warn, continue)
//! 4. re-read the whole affected sub-tree and broadcast it
//!
//! Step 4 runs even when step 3 failed so clients converge on whatever the
//! store holds. The router keeps no state of its own.

use std::sync::Arc;
use storyboard_core::{ColumnMutation, GoalMutation, PersonaMutation, StoryMutation};
use uuid::Uuid;

use crate::gateway::{GatewayError, PersistenceGateway};
use crate::presence::PresenceTracker;
use crate::protocol::{
    BoardCommand, InboundFrame, OutboundEvent, ProtocolError, Refetch, TAG_STORYBOARD_CONCEDED,
};

/// What the session should do with a handled event.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Fan this event out to the board.
    Broadcast(OutboundEvent),
    /// Nothing to send.
    Silent,
    /// Tear the connection down with the abandon close code.
    Abandon,
}

pub struct EventRouter {
    gateway: Arc<dyn PersistenceGateway>,
    presence: PresenceTracker,
}

impl EventRouter {
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        let presence = PresenceTracker::new(gateway.clone());
        Self { gateway, presence }
    }

    pub fn dispatch(&self, board_id: Uuid, user_id: Uuid, frame: &InboundFrame) -> Dispatch {
        match BoardCommand::decode(&frame.tag, &frame.value) {
            Ok(command) => self.execute(board_id, user_id, command),
            Err(e) => {
                log::warn!("Invalid event from {user_id} on board {board_id}: {e}");
                Dispatch::Silent
            }
        }
    }

    pub fn execute(&self, board_id: Uuid, user_id: Uuid, command: BoardCommand) -> Dispatch {
        if command.requires_owner() {
            if let Err(e) = self.gateway.confirm_owner(board_id, user_id) {
                log::debug!("Rejected {} from {user_id}: {e}", command.tag());
                return Dispatch::Silent;
            }
        }

        let tag = command.tag();
        let (Some(reply), Some(refetch)) = (command.reply_tag(), command.refetch()) else {
            return self.terminal(board_id, user_id, command);
        };

        if let Err(e) = self.apply(board_id, user_id, command) {
            log::warn!("{tag} on board {board_id} failed: {e}");
        }

        match self.refetch(board_id, reply, refetch) {
            Ok(event) => Dispatch::Broadcast(event),
            Err(e) => {
                log::warn!("Failed to reload board {board_id} after {tag}: {e}");
                Dispatch::Silent
            }
        }
    }

    /// Commands with no state to re-read.
    fn terminal(&self, board_id: Uuid, user_id: Uuid, command: BoardCommand) -> Dispatch {
        match command {
            BoardCommand::AbandonStoryboard => {
                if let Err(e) = self.presence.abandon(board_id, user_id) {
                    log::warn!("Failed to record abandon of board {board_id} by {user_id}: {e}");
                }
                Dispatch::Abandon
            }
            BoardCommand::ConcedeStoryboard => match self.gateway.delete_board(board_id, user_id) {
                Ok(()) => {
                    log::info!("Board {board_id} conceded by {user_id}");
                    Dispatch::Broadcast(OutboundEvent::bare(TAG_STORYBOARD_CONCEDED))
                }
                Err(e) => {
                    log::warn!("Failed to delete board {board_id}: {e}");
                    Dispatch::Silent
                }
            },
            other => {
                log::error!("No reply defined for {}", other.tag());
                Dispatch::Silent
            }
        }
    }

    fn apply(&self, board_id: Uuid, user_id: Uuid, command: BoardCommand) -> Result<(), GatewayError> {
        let gateway = &self.gateway;
        match command {
            BoardCommand::AddGoal { name } => gateway.mutate_goal(board_id, GoalMutation::Add { name }),
            BoardCommand::ReviseGoal { goal_id, name } => {
                gateway.mutate_goal(board_id, GoalMutation::Rename { goal_id, name })
            }
            BoardCommand::DeleteGoal { goal_id } => {
                gateway.mutate_goal(board_id, GoalMutation::Delete { goal_id })
            }
            BoardCommand::AddColumn { goal_id } => {
                gateway.mutate_column(board_id, ColumnMutation::Add { goal_id })
            }
            BoardCommand::ReviseColumn { column_id, name } => {
                gateway.mutate_column(board_id, ColumnMutation::Rename { column_id, name })
            }
            BoardCommand::DeleteColumn { column_id } => {
                gateway.mutate_column(board_id, ColumnMutation::Delete { column_id })
            }
            BoardCommand::AddStory { goal_id, column_id } => {
                gateway.mutate_story(board_id, user_id, StoryMutation::Add { goal_id, column_id })
            }
            BoardCommand::UpdateStoryName { story_id, name } => {
                gateway.mutate_story(board_id, user_id, StoryMutation::Rename { story_id, name })
            }
            BoardCommand::UpdateStoryContent { story_id, content } => gateway.mutate_story(
                board_id,
                user_id,
                StoryMutation::Content { story_id, content },
            ),
            BoardCommand::UpdateStoryColor { story_id, color } => {
                gateway.mutate_story(board_id, user_id, StoryMutation::Color { story_id, color })
            }
            BoardCommand::UpdateStoryPoints { story_id, points } => {
                gateway.mutate_story(board_id, user_id, StoryMutation::Points { story_id, points })
            }
            BoardCommand::UpdateStoryClosed { story_id, closed } => {
                gateway.mutate_story(board_id, user_id, StoryMutation::Closed { story_id, closed })
            }
            BoardCommand::MoveStory {
                story_id,
                goal_id,
                column_id,
                place_before,
            } => gateway.mutate_story(
                board_id,
                user_id,
                StoryMutation::Move {
                    story_id,
                    goal_id,
                    column_id,
                    place_before,
                },
            ),
            BoardCommand::DeleteStory { story_id } => {
                gateway.mutate_story(board_id, user_id, StoryMutation::Delete { story_id })
            }
            BoardCommand::AddStoryComment { story_id, comment } => gateway.mutate_story(
                board_id,
                user_id,
                StoryMutation::Comment { story_id, comment },
            ),
            BoardCommand::AddPersona {
                name,
                role,
                description,
            } => gateway.mutate_persona(
                board_id,
                PersonaMutation::Add {
                    name,
                    role,
                    description,
                },
            ),
            BoardCommand::UpdatePersona {
                persona_id,
                name,
                role,
                description,
            } => gateway.mutate_persona(
                board_id,
                PersonaMutation::Update {
                    persona_id,
                    name,
                    role,
                    description,
                },
            ),
            BoardCommand::DeletePersona { persona_id } => {
                gateway.mutate_persona(board_id, PersonaMutation::Delete { persona_id })
            }
            BoardCommand::PromoteOwner { user_id: owner_id } => gateway.set_owner(board_id, owner_id),
            BoardCommand::ReviseColorLegend { legend } => {
                gateway.revise_color_legend(board_id, legend)
            }
            // Routed through `terminal`.
            BoardCommand::ConcedeStoryboard | BoardCommand::AbandonStoryboard => Ok(()),
        }
    }

    fn refetch(&self, board_id: Uuid, reply: &str, refetch: Refetch) -> Result<OutboundEvent, RefetchError> {
        let event = match refetch {
            Refetch::GoalTree => {
                OutboundEvent::with_value(reply, &self.gateway.goal_tree(board_id)?, None)?
            }
            Refetch::Personas => {
                OutboundEvent::with_value(reply, &self.gateway.personas(board_id)?, None)?
            }
            Refetch::Board => {
                OutboundEvent::with_value(reply, &self.gateway.board_snapshot(board_id)?, None)?
            }
        };
        Ok(event)
    }
}

#[derive(Debug, thiserror::Error)]
enum RefetchError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
