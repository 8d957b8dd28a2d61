//! Persisted board record and the structural mutations applied to it.
//!
//! Every mutation validates its targets before touching the tree, so a
//! failed mutation leaves the record exactly as it was.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    Column, Goal, LegendColor, Membership, Persona, PresenceEntry, Story, StoryComment,
    Storyboard,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("Goal not found: {0}")]
    GoalNotFound(Uuid),
    #[error("Column not found: {0}")]
    ColumnNotFound(Uuid),
    #[error("Story not found: {0}")]
    StoryNotFound(Uuid),
    #[error("Persona not found: {0}")]
    PersonaNotFound(Uuid),
    #[error("User {0} is not a member of this board")]
    MemberNotFound(Uuid),
    #[error("Story {0} to place before is not in the target column")]
    PlacementNotFound(Uuid),
}

#[derive(Clone, Debug, PartialEq)]
pub enum GoalMutation {
    Add { name: String },
    Rename { goal_id: Uuid, name: String },
    Delete { goal_id: Uuid },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnMutation {
    Add { goal_id: Uuid },
    Rename { column_id: Uuid, name: String },
    Delete { column_id: Uuid },
}

#[derive(Clone, Debug, PartialEq)]
pub enum StoryMutation {
    Add { goal_id: Uuid, column_id: Uuid },
    Rename { story_id: Uuid, name: String },
    Content { story_id: Uuid, content: String },
    Color { story_id: Uuid, color: String },
    Points { story_id: Uuid, points: u32 },
    Closed { story_id: Uuid, closed: bool },
    Move {
        story_id: Uuid,
        goal_id: Uuid,
        column_id: Uuid,
        /// `None` appends at the end of the target column.
        place_before: Option<Uuid>,
    },
    Delete { story_id: Uuid },
    Comment { story_id: Uuid, comment: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum PersonaMutation {
    Add {
        name: String,
        role: String,
        description: String,
    },
    Update {
        persona_id: Uuid,
        name: String,
        role: String,
        description: String,
    },
    Delete { persona_id: Uuid },
}

trait SortOrdered {
    fn set_sort_order(&mut self, order: i32);
}

impl SortOrdered for Goal {
    fn set_sort_order(&mut self, order: i32) {
        self.sort_order = order;
    }
}

impl SortOrdered for Column {
    fn set_sort_order(&mut self, order: i32) {
        self.sort_order = order;
    }
}

impl SortOrdered for Story {
    fn set_sort_order(&mut self, order: i32) {
        self.sort_order = order;
    }
}

/// Re-assign a dense 0..n sort order after an insert or removal.
fn renumber<T: SortOrdered>(items: &mut [T]) {
    for (i, item) in items.iter_mut().enumerate() {
        item.set_sort_order(i as i32);
    }
}

/// Authoritative stored form of a board.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardRecord {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub goals: Vec<Goal>,
    pub personas: Vec<Persona>,
    pub color_legend: Vec<LegendColor>,
    pub members: Vec<Membership>,
}

impl BoardRecord {
    pub fn new(owner_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            owner_id,
            goals: Vec::new(),
            personas: Vec::new(),
            color_legend: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    // ─── Goals / columns / stories ───────────────────────────────────

    pub fn apply_goal(&mut self, mutation: GoalMutation) -> Result<(), BoardError> {
        match mutation {
            GoalMutation::Add { name } => {
                let sort_order = self.goals.len() as i32;
                self.goals.push(Goal {
                    id: Uuid::new_v4(),
                    name,
                    columns: Vec::new(),
                    sort_order,
                });
            }
            GoalMutation::Rename { goal_id, name } => {
                self.goal_mut(goal_id)?.name = name;
            }
            GoalMutation::Delete { goal_id } => {
                let index = self
                    .goals
                    .iter()
                    .position(|g| g.id == goal_id)
                    .ok_or(BoardError::GoalNotFound(goal_id))?;
                self.goals.remove(index);
                renumber(&mut self.goals);
            }
        }
        Ok(())
    }

    pub fn apply_column(&mut self, mutation: ColumnMutation) -> Result<(), BoardError> {
        match mutation {
            ColumnMutation::Add { goal_id } => {
                let goal = self.goal_mut(goal_id)?;
                let sort_order = goal.columns.len() as i32;
                goal.columns.push(Column {
                    id: Uuid::new_v4(),
                    name: String::new(),
                    stories: Vec::new(),
                    sort_order,
                });
            }
            ColumnMutation::Rename { column_id, name } => {
                let (gi, ci) = self.locate_column(column_id)?;
                self.goals[gi].columns[ci].name = name;
            }
            ColumnMutation::Delete { column_id } => {
                let (gi, ci) = self.locate_column(column_id)?;
                let columns = &mut self.goals[gi].columns;
                columns.remove(ci);
                renumber(columns);
            }
        }
        Ok(())
    }

    /// Apply a story mutation. `author` is recorded on comments.
    pub fn apply_story(&mut self, author: Uuid, mutation: StoryMutation) -> Result<(), BoardError> {
        match mutation {
            StoryMutation::Add { goal_id, column_id } => {
                let column = self.column_in_goal_mut(goal_id, column_id)?;
                let sort_order = column.stories.len() as i32;
                column.stories.push(Story::blank(sort_order));
            }
            StoryMutation::Rename { story_id, name } => {
                self.story_mut(story_id)?.name = name;
            }
            StoryMutation::Content { story_id, content } => {
                self.story_mut(story_id)?.content = content;
            }
            StoryMutation::Color { story_id, color } => {
                self.story_mut(story_id)?.color = color;
            }
            StoryMutation::Points { story_id, points } => {
                self.story_mut(story_id)?.points = points;
            }
            StoryMutation::Closed { story_id, closed } => {
                self.story_mut(story_id)?.closed = closed;
            }
            StoryMutation::Move {
                story_id,
                goal_id,
                column_id,
                place_before,
            } => self.move_story(story_id, goal_id, column_id, place_before)?,
            StoryMutation::Delete { story_id } => {
                let (gi, ci, si) = self.locate_story(story_id)?;
                let stories = &mut self.goals[gi].columns[ci].stories;
                stories.remove(si);
                renumber(stories);
            }
            StoryMutation::Comment { story_id, comment } => {
                self.story_mut(story_id)?.comments.push(StoryComment {
                    id: Uuid::new_v4(),
                    user_id: author,
                    comment,
                    created_at: crate::now_secs(),
                });
            }
        }
        Ok(())
    }

    fn move_story(
        &mut self,
        story_id: Uuid,
        goal_id: Uuid,
        column_id: Uuid,
        place_before: Option<Uuid>,
    ) -> Result<(), BoardError> {
        // Validate everything up front so a bad target never loses the story.
        let (src_g, src_c, src_s) = self.locate_story(story_id)?;
        let target_goal = self
            .goals
            .iter()
            .position(|g| g.id == goal_id)
            .ok_or(BoardError::GoalNotFound(goal_id))?;
        let target_column = self.goals[target_goal]
            .columns
            .iter()
            .position(|c| c.id == column_id)
            .ok_or(BoardError::ColumnNotFound(column_id))?;

        if place_before == Some(story_id) {
            return Ok(());
        }
        if let Some(before) = place_before {
            let present = self.goals[target_goal].columns[target_column]
                .stories
                .iter()
                .any(|s| s.id == before);
            if !present {
                return Err(BoardError::PlacementNotFound(before));
            }
        }

        let source = &mut self.goals[src_g].columns[src_c].stories;
        let story = source.remove(src_s);
        renumber(source);

        let target = &mut self.goals[target_goal].columns[target_column].stories;
        let index = place_before
            .and_then(|before| target.iter().position(|s| s.id == before))
            .unwrap_or(target.len());
        target.insert(index, story);
        renumber(target);
        Ok(())
    }

    // ─── Personas / owner / legend ───────────────────────────────────

    pub fn apply_persona(&mut self, mutation: PersonaMutation) -> Result<(), BoardError> {
        match mutation {
            PersonaMutation::Add {
                name,
                role,
                description,
            } => self.personas.push(Persona {
                id: Uuid::new_v4(),
                name,
                role,
                description,
            }),
            PersonaMutation::Update {
                persona_id,
                name,
                role,
                description,
            } => {
                let persona = self
                    .personas
                    .iter_mut()
                    .find(|p| p.id == persona_id)
                    .ok_or(BoardError::PersonaNotFound(persona_id))?;
                persona.name = name;
                persona.role = role;
                persona.description = description;
            }
            PersonaMutation::Delete { persona_id } => {
                let index = self
                    .personas
                    .iter()
                    .position(|p| p.id == persona_id)
                    .ok_or(BoardError::PersonaNotFound(persona_id))?;
                self.personas.remove(index);
            }
        }
        Ok(())
    }

    /// Hand ownership to another member of the board.
    pub fn set_owner(&mut self, owner_id: Uuid) -> Result<(), BoardError> {
        if self.membership(owner_id).is_none() {
            return Err(BoardError::MemberNotFound(owner_id));
        }
        self.owner_id = owner_id;
        Ok(())
    }

    pub fn revise_color_legend(&mut self, legend: Vec<LegendColor>) {
        self.color_legend = legend;
    }

    // ─── Membership ──────────────────────────────────────────────────

    pub fn membership(&self, user_id: Uuid) -> Option<&Membership> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    /// Upsert the user as an active, non-abandoned member.
    pub fn join(&mut self, user_id: Uuid) {
        match self.members.iter_mut().find(|m| m.user_id == user_id) {
            Some(member) => {
                member.active = true;
                member.abandoned = false;
            }
            None => self.members.push(Membership {
                user_id,
                active: true,
                abandoned: false,
                last_active: 0,
            }),
        }
    }

    /// Mark the user inactive and stamp `last_active`.
    pub fn leave(&mut self, user_id: Uuid, now: u64) -> Result<(), BoardError> {
        let member = self.member_mut(user_id)?;
        member.active = false;
        member.last_active = now;
        Ok(())
    }

    /// Like [`leave`](Self::leave) but also hides the user from presence.
    pub fn abandon(&mut self, user_id: Uuid, now: u64) -> Result<(), BoardError> {
        let member = self.member_mut(user_id)?;
        member.active = false;
        member.abandoned = true;
        member.last_active = now;
        Ok(())
    }

    /// Mark every member inactive. Used when no socket can still be open.
    pub fn deactivate_all(&mut self) {
        for member in &mut self.members {
            member.active = false;
        }
    }

    /// Presence list for broadcasts: every non-abandoned member.
    ///
    /// `name_of` resolves display names; unknown users get an empty name.
    pub fn presence<F>(&self, name_of: F) -> Vec<PresenceEntry>
    where
        F: Fn(Uuid) -> Option<String>,
    {
        self.members
            .iter()
            .filter(|m| !m.abandoned)
            .map(|m| PresenceEntry {
                id: m.user_id,
                name: name_of(m.user_id).unwrap_or_default(),
                active: m.active,
            })
            .collect()
    }

    pub fn snapshot<F>(&self, name_of: F) -> Storyboard
    where
        F: Fn(Uuid) -> Option<String>,
    {
        Storyboard {
            id: self.id,
            name: self.name.clone(),
            owner_id: self.owner_id,
            users: self.presence(name_of),
            goals: self.goals.clone(),
            color_legend: self.color_legend.clone(),
            personas: self.personas.clone(),
        }
    }

    // ─── Lookup helpers ──────────────────────────────────────────────

    fn goal_mut(&mut self, goal_id: Uuid) -> Result<&mut Goal, BoardError> {
        self.goals
            .iter_mut()
            .find(|g| g.id == goal_id)
            .ok_or(BoardError::GoalNotFound(goal_id))
    }

    fn column_in_goal_mut(&mut self, goal_id: Uuid, column_id: Uuid) -> Result<&mut Column, BoardError> {
        self.goal_mut(goal_id)?
            .columns
            .iter_mut()
            .find(|c| c.id == column_id)
            .ok_or(BoardError::ColumnNotFound(column_id))
    }

    fn locate_column(&self, column_id: Uuid) -> Result<(usize, usize), BoardError> {
        self.goals
            .iter()
            .enumerate()
            .find_map(|(gi, g)| {
                g.columns
                    .iter()
                    .position(|c| c.id == column_id)
                    .map(|ci| (gi, ci))
            })
            .ok_or(BoardError::ColumnNotFound(column_id))
    }

    fn locate_story(&self, story_id: Uuid) -> Result<(usize, usize, usize), BoardError> {
        for (gi, goal) in self.goals.iter().enumerate() {
            for (ci, column) in goal.columns.iter().enumerate() {
                if let Some(si) = column.stories.iter().position(|s| s.id == story_id) {
                    return Ok((gi, ci, si));
                }
            }
        }
        Err(BoardError::StoryNotFound(story_id))
    }

    fn story_mut(&mut self, story_id: Uuid) -> Result<&mut Story, BoardError> {
        let (gi, ci, si) = self.locate_story(story_id)?;
        Ok(&mut self.goals[gi].columns[ci].stories[si])
    }

    fn member_mut(&mut self, user_id: Uuid) -> Result<&mut Membership, BoardError> {
        self.members
            .iter_mut()
            .find(|m| m.user_id == user_id)
            .ok_or(BoardError::MemberNotFound(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with_goal() -> (BoardRecord, Uuid) {
        let mut board = BoardRecord::new(Uuid::new_v4(), "Asgard");
        board
            .apply_goal(GoalMutation::Add { name: "Goal A".into() })
            .unwrap();
        let goal_id = board.goals[0].id;
        (board, goal_id)
    }

    fn add_column(board: &mut BoardRecord, goal_id: Uuid) -> Uuid {
        board.apply_column(ColumnMutation::Add { goal_id }).unwrap();
        let goal = board.goals.iter().find(|g| g.id == goal_id).unwrap();
        goal.columns.last().unwrap().id
    }

    fn add_story(board: &mut BoardRecord, goal_id: Uuid, column_id: Uuid) -> Uuid {
        board
            .apply_story(Uuid::nil(), StoryMutation::Add { goal_id, column_id })
            .unwrap();
        let (gi, ci) = board.locate_column(column_id).unwrap();
        board.goals[gi].columns[ci].stories.last().unwrap().id
    }

    fn story_ids(board: &BoardRecord, column_id: Uuid) -> Vec<Uuid> {
        let (gi, ci) = board.locate_column(column_id).unwrap();
        board.goals[gi].columns[ci].stories.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_add_goal_appends_with_sort_order() {
        let (mut board, _) = board_with_goal();
        board
            .apply_goal(GoalMutation::Add { name: "Goal B".into() })
            .unwrap();

        assert_eq!(board.goals.len(), 2);
        assert_eq!(board.goals[0].name, "Goal A");
        assert_eq!(board.goals[0].sort_order, 0);
        assert_eq!(board.goals[1].sort_order, 1);
    }

    #[test]
    fn test_delete_goal_renumbers() {
        let (mut board, first) = board_with_goal();
        board.apply_goal(GoalMutation::Add { name: "B".into() }).unwrap();
        board.apply_goal(GoalMutation::Add { name: "C".into() }).unwrap();

        board.apply_goal(GoalMutation::Delete { goal_id: first }).unwrap();

        let orders: Vec<i32> = board.goals.iter().map(|g| g.sort_order).collect();
        assert_eq!(orders, vec![0, 1]);
        assert_eq!(board.goals[0].name, "B");
    }

    #[test]
    fn test_rename_missing_goal_errors() {
        let (mut board, _) = board_with_goal();
        let missing = Uuid::new_v4();
        let err = board
            .apply_goal(GoalMutation::Rename {
                goal_id: missing,
                name: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err, BoardError::GoalNotFound(missing));
    }

    #[test]
    fn test_column_lifecycle() {
        let (mut board, goal_id) = board_with_goal();
        let first = add_column(&mut board, goal_id);
        let second = add_column(&mut board, goal_id);

        board
            .apply_column(ColumnMutation::Rename {
                column_id: second,
                name: "Backlog".into(),
            })
            .unwrap();
        board.apply_column(ColumnMutation::Delete { column_id: first }).unwrap();

        let columns = &board.goals[0].columns;
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "Backlog");
        assert_eq!(columns[0].sort_order, 0);
    }

    #[test]
    fn test_new_story_defaults() {
        let (mut board, goal_id) = board_with_goal();
        let column_id = add_column(&mut board, goal_id);
        let story_id = add_story(&mut board, goal_id, column_id);

        let story = board.story_mut(story_id).unwrap();
        assert_eq!(story.color, crate::DEFAULT_STORY_COLOR);
        assert_eq!(story.points, 0);
        assert!(!story.closed);
        assert!(story.comments.is_empty());
    }

    #[test]
    fn test_story_field_updates() {
        let (mut board, goal_id) = board_with_goal();
        let column_id = add_column(&mut board, goal_id);
        let story_id = add_story(&mut board, goal_id, column_id);
        let author = Uuid::new_v4();

        board
            .apply_story(author, StoryMutation::Rename { story_id, name: "Login".into() })
            .unwrap();
        board
            .apply_story(author, StoryMutation::Points { story_id, points: 5 })
            .unwrap();
        board
            .apply_story(author, StoryMutation::Closed { story_id, closed: true })
            .unwrap();
        board
            .apply_story(
                author,
                StoryMutation::Comment {
                    story_id,
                    comment: "needs design".into(),
                },
            )
            .unwrap();

        let story = board.story_mut(story_id).unwrap();
        assert_eq!(story.name, "Login");
        assert_eq!(story.points, 5);
        assert!(story.closed);
        assert_eq!(story.comments[0].user_id, author);
    }

    #[test]
    fn test_move_story_across_goals_before_sibling() {
        let (mut board, g1) = board_with_goal();
        board.apply_goal(GoalMutation::Add { name: "Goal B".into() }).unwrap();
        let g2 = board.goals[1].id;
        let c1 = add_column(&mut board, g1);
        let c2 = add_column(&mut board, g2);
        let s = add_story(&mut board, g1, c1);
        let stay = add_story(&mut board, g1, c1);
        let s1 = add_story(&mut board, g2, c2);
        let s2 = add_story(&mut board, g2, c2);

        board
            .apply_story(
                Uuid::nil(),
                StoryMutation::Move {
                    story_id: s,
                    goal_id: g2,
                    column_id: c2,
                    place_before: Some(s2),
                },
            )
            .unwrap();

        assert_eq!(story_ids(&board, c1), vec![stay]);
        assert_eq!(story_ids(&board, c2), vec![s1, s, s2]);
        let (gi, ci) = board.locate_column(c2).unwrap();
        let orders: Vec<i32> = board.goals[gi].columns[ci]
            .stories
            .iter()
            .map(|st| st.sort_order)
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
        let (gi, ci) = board.locate_column(c1).unwrap();
        assert_eq!(board.goals[gi].columns[ci].stories[0].sort_order, 0);
    }

    #[test]
    fn test_move_story_to_end_and_within_column() {
        let (mut board, g) = board_with_goal();
        let c = add_column(&mut board, g);
        let a = add_story(&mut board, g, c);
        let b = add_story(&mut board, g, c);
        let d = add_story(&mut board, g, c);

        board
            .apply_story(
                Uuid::nil(),
                StoryMutation::Move {
                    story_id: a,
                    goal_id: g,
                    column_id: c,
                    place_before: None,
                },
            )
            .unwrap();
        assert_eq!(story_ids(&board, c), vec![b, d, a]);

        board
            .apply_story(
                Uuid::nil(),
                StoryMutation::Move {
                    story_id: d,
                    goal_id: g,
                    column_id: c,
                    place_before: Some(b),
                },
            )
            .unwrap();
        assert_eq!(story_ids(&board, c), vec![d, b, a]);
    }

    #[test]
    fn test_move_story_bad_target_leaves_tree_intact() {
        let (mut board, g) = board_with_goal();
        let c = add_column(&mut board, g);
        let s = add_story(&mut board, g, c);
        let before = board.clone();

        let err = board
            .apply_story(
                Uuid::nil(),
                StoryMutation::Move {
                    story_id: s,
                    goal_id: g,
                    column_id: c,
                    place_before: Some(Uuid::new_v4()),
                },
            )
            .unwrap_err();

        assert!(matches!(err, BoardError::PlacementNotFound(_)));
        assert_eq!(board, before);
    }

    #[test]
    fn test_delete_story_renumbers() {
        let (mut board, g) = board_with_goal();
        let c = add_column(&mut board, g);
        let a = add_story(&mut board, g, c);
        let b = add_story(&mut board, g, c);

        board
            .apply_story(Uuid::nil(), StoryMutation::Delete { story_id: a })
            .unwrap();

        assert_eq!(story_ids(&board, c), vec![b]);
        assert_eq!(board.story_mut(b).unwrap().sort_order, 0);
    }

    #[test]
    fn test_persona_lifecycle() {
        let (mut board, _) = board_with_goal();
        board
            .apply_persona(PersonaMutation::Add {
                name: "Ada".into(),
                role: "Admin".into(),
                description: "Runs the place".into(),
            })
            .unwrap();
        let persona_id = board.personas[0].id;

        board
            .apply_persona(PersonaMutation::Update {
                persona_id,
                name: "Ada".into(),
                role: "Owner".into(),
                description: String::new(),
            })
            .unwrap();
        assert_eq!(board.personas[0].role, "Owner");

        board
            .apply_persona(PersonaMutation::Delete { persona_id })
            .unwrap();
        assert!(board.personas.is_empty());
    }

    #[test]
    fn test_set_owner_requires_membership() {
        let (mut board, _) = board_with_goal();
        let stranger = Uuid::new_v4();
        assert_eq!(
            board.set_owner(stranger),
            Err(BoardError::MemberNotFound(stranger))
        );

        board.join(stranger);
        board.set_owner(stranger).unwrap();
        assert!(board.is_owner(stranger));
    }

    #[test]
    fn test_membership_flags() {
        let (mut board, _) = board_with_goal();
        let user = Uuid::new_v4();

        board.join(user);
        board.join(user);
        assert_eq!(board.members.len(), 1);
        assert!(board.membership(user).unwrap().active);

        board.leave(user, 42).unwrap();
        let member = board.membership(user).unwrap();
        assert!(!member.active);
        assert!(!member.abandoned);
        assert_eq!(member.last_active, 42);

        board.abandon(user, 43).unwrap();
        assert!(board.membership(user).unwrap().abandoned);
        assert!(board.presence(|_| None).is_empty());

        board.join(user);
        let member = board.membership(user).unwrap();
        assert!(member.active && !member.abandoned);
    }

    #[test]
    fn test_leave_unknown_member_errors() {
        let (mut board, _) = board_with_goal();
        assert!(board.leave(Uuid::new_v4(), 1).is_err());
    }

    #[test]
    fn test_snapshot_resolves_names() {
        let (mut board, _) = board_with_goal();
        let user = Uuid::new_v4();
        board.join(user);

        let snapshot = board.snapshot(|id| (id == user).then(|| "Thor".to_string()));
        assert_eq!(snapshot.users.len(), 1);
        assert_eq!(snapshot.users[0].name, "Thor");
        assert_eq!(snapshot.goals.len(), 1);
    }

    #[test]
    fn test_deactivate_all() {
        let (mut board, _) = board_with_goal();
        board.join(Uuid::new_v4());
        board.join(Uuid::new_v4());
        board.deactivate_all();
        assert!(board.members.iter().all(|m| !m.active));
    }
}
