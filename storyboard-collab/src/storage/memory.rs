//! `BoardStore`: the bundled [`PersistenceGateway`].
//!
//! Boards, users and credentials live in memory behind one lock. When opened
//! with a [`StoreConfig`] every successful write goes through to RocksDB
//! before it becomes visible; a failed write leaves memory untouched.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use storyboard_core::{
    now_secs, BoardError, BoardRecord, ColumnMutation, Goal, GoalMutation, LegendColor,
    Membership, Persona, PersonaMutation, PresenceEntry, StoryMutation, Storyboard, UserProfile,
};
use uuid::Uuid;

use super::rocks::{BoardDb, StoreConfig, StoreError};
use crate::gateway::{GatewayError, PersistenceGateway};

#[derive(Default)]
struct StoreState {
    users: HashMap<Uuid, UserProfile>,
    credentials: HashMap<String, Uuid>,
    boards: HashMap<Uuid, BoardRecord>,
}

impl StoreState {
    fn name_of(&self, user_id: Uuid) -> Option<String> {
        self.users.get(&user_id).map(|u| u.name.clone())
    }

    fn board(&self, board_id: Uuid) -> Result<&BoardRecord, GatewayError> {
        self.boards
            .get(&board_id)
            .ok_or(GatewayError::BoardNotFound(board_id))
    }

    fn presence(&self, board: &BoardRecord) -> Vec<PresenceEntry> {
        board.presence(|id| self.name_of(id))
    }
}

pub struct BoardStore {
    state: RwLock<StoreState>,
    db: Option<BoardDb>,
}

impl BoardStore {
    /// Memory-only store; contents are lost on drop.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            db: None,
        }
    }

    /// Open a RocksDB-backed store and load everything into memory.
    ///
    /// No socket survives a restart, so every membership comes back inactive.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let db = BoardDb::open(config)?;
        let mut state = StoreState::default();

        for user in db.load_users()? {
            state.users.insert(user.id, user);
        }
        state.credentials.extend(db.load_credentials()?);

        let mut boards = db.load_boards()?;
        for board in &mut boards {
            board.deactivate_all();
        }
        db.put_boards(&boards)?;
        state
            .boards
            .extend(boards.into_iter().map(|board| (board.id, board)));

        log::info!(
            "Recovered {} boards and {} users from {}",
            state.boards.len(),
            state.users.len(),
            db.path().display()
        );
        Ok(Self {
            state: RwLock::new(state),
            db: Some(db),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Administrative operations ───────────────────────────────────

    pub fn create_user(&self, name: impl Into<String>) -> Result<UserProfile, StoreError> {
        let user = UserProfile::new(name);
        let mut state = self.write();
        if let Some(db) = &self.db {
            db.put_user(&user)?;
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Issue a fresh opaque credential for `user_id`.
    pub fn issue_credential(&self, user_id: Uuid) -> Result<String, GatewayError> {
        let mut state = self.write();
        if !state.users.contains_key(&user_id) {
            return Err(GatewayError::UserNotFound(user_id));
        }
        let credential = Uuid::new_v4().simple().to_string();
        if let Some(db) = &self.db {
            db.put_credential(&credential, user_id)?;
        }
        state.credentials.insert(credential.clone(), user_id);
        Ok(credential)
    }

    /// Create a board owned by `owner_id`, who is recorded as a member.
    pub fn create_board(
        &self,
        owner_id: Uuid,
        name: impl Into<String>,
    ) -> Result<Uuid, GatewayError> {
        let mut state = self.write();
        if !state.users.contains_key(&owner_id) {
            return Err(GatewayError::UserNotFound(owner_id));
        }
        let mut board = BoardRecord::new(owner_id, name);
        board.join(owner_id);
        board.deactivate_all();
        if let Some(db) = &self.db {
            db.put_board(&board)?;
        }
        let board_id = board.id;
        state.boards.insert(board_id, board);
        log::info!("Created board {board_id} for {owner_id}");
        Ok(board_id)
    }

    pub fn membership(&self, board_id: Uuid, user_id: Uuid) -> Option<Membership> {
        self.read()
            .boards
            .get(&board_id)
            .and_then(|board| board.membership(user_id).cloned())
    }

    pub fn board_ids(&self) -> Vec<Uuid> {
        self.read().boards.keys().copied().collect()
    }

    pub fn user(&self, user_id: Uuid) -> Option<UserProfile> {
        self.read().users.get(&user_id).cloned()
    }

    // ─── Internals ───────────────────────────────────────────────────

    /// Apply `change` to a copy of the board, persist it, then publish it.
    fn update_board<R>(
        &self,
        board_id: Uuid,
        change: impl FnOnce(&mut BoardRecord) -> Result<R, BoardError>,
    ) -> Result<(R, Vec<PresenceEntry>), GatewayError> {
        let mut state = self.write();
        let mut board = state.board(board_id)?.clone();
        let result = change(&mut board)?;
        if let Some(db) = &self.db {
            if let Err(e) = db.put_board(&board) {
                log::error!("Failed to persist board {board_id}: {e}");
                return Err(e.into());
            }
        }
        let users = state.presence(&board);
        state.boards.insert(board_id, board);
        Ok((result, users))
    }

    fn read_board<R>(
        &self,
        board_id: Uuid,
        view: impl FnOnce(&StoreState, &BoardRecord) -> R,
    ) -> Result<R, GatewayError> {
        let state = self.read();
        let board = state.board(board_id)?;
        Ok(view(&*state, board))
    }
}

impl PersistenceGateway for BoardStore {
    fn resolve_user(&self, credential: &str) -> Result<UserProfile, GatewayError> {
        let state = self.read();
        let user_id = state
            .credentials
            .get(credential)
            .ok_or(GatewayError::Unauthenticated)?;
        state
            .users
            .get(user_id)
            .cloned()
            .ok_or(GatewayError::UserNotFound(*user_id))
    }

    fn confirm_owner(&self, board_id: Uuid, user_id: Uuid) -> Result<(), GatewayError> {
        let owns = self.read_board(board_id, |_, board| board.is_owner(user_id))?;
        if owns {
            Ok(())
        } else {
            Err(GatewayError::NotOwner { board_id, user_id })
        }
    }

    fn board_snapshot(&self, board_id: Uuid) -> Result<Storyboard, GatewayError> {
        self.read_board(board_id, |state, board| {
            board.snapshot(|id| state.name_of(id))
        })
    }

    fn goal_tree(&self, board_id: Uuid) -> Result<Vec<Goal>, GatewayError> {
        self.read_board(board_id, |_, board| board.goals.clone())
    }

    fn personas(&self, board_id: Uuid) -> Result<Vec<Persona>, GatewayError> {
        self.read_board(board_id, |_, board| board.personas.clone())
    }

    fn presence(&self, board_id: Uuid) -> Result<Vec<PresenceEntry>, GatewayError> {
        self.read_board(board_id, |state, board| state.presence(board))
    }

    fn mutate_goal(&self, board_id: Uuid, mutation: GoalMutation) -> Result<(), GatewayError> {
        self.update_board(board_id, |board| board.apply_goal(mutation))
            .map(|_| ())
    }

    fn mutate_column(&self, board_id: Uuid, mutation: ColumnMutation) -> Result<(), GatewayError> {
        self.update_board(board_id, |board| board.apply_column(mutation))
            .map(|_| ())
    }

    fn mutate_story(
        &self,
        board_id: Uuid,
        user_id: Uuid,
        mutation: StoryMutation,
    ) -> Result<(), GatewayError> {
        self.update_board(board_id, |board| board.apply_story(user_id, mutation))
            .map(|_| ())
    }

    fn mutate_persona(
        &self,
        board_id: Uuid,
        mutation: PersonaMutation,
    ) -> Result<(), GatewayError> {
        self.update_board(board_id, |board| board.apply_persona(mutation))
            .map(|_| ())
    }

    fn set_owner(&self, board_id: Uuid, owner_id: Uuid) -> Result<(), GatewayError> {
        self.update_board(board_id, |board| board.set_owner(owner_id))
            .map(|_| ())
    }

    fn revise_color_legend(
        &self,
        board_id: Uuid,
        legend: Vec<LegendColor>,
    ) -> Result<(), GatewayError> {
        self.update_board(board_id, |board| {
            board.revise_color_legend(legend);
            Ok(())
        })
        .map(|_| ())
    }

    fn join_board(&self, board_id: Uuid, user_id: Uuid) -> Result<Vec<PresenceEntry>, GatewayError> {
        if !self.read().users.contains_key(&user_id) {
            return Err(GatewayError::UserNotFound(user_id));
        }
        self.update_board(board_id, |board| {
            board.join(user_id);
            Ok(())
        })
        .map(|(_, users)| users)
    }

    fn leave_board(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<PresenceEntry>, GatewayError> {
        self.update_board(board_id, |board| board.leave(user_id, now_secs()))
            .map(|(_, users)| users)
    }

    fn abandon_board(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<PresenceEntry>, GatewayError> {
        self.update_board(board_id, |board| board.abandon(user_id, now_secs()))
            .map(|(_, users)| users)
    }

    fn delete_board(&self, board_id: Uuid, user_id: Uuid) -> Result<(), GatewayError> {
        let mut state = self.write();
        if !state.board(board_id)?.is_owner(user_id) {
            return Err(GatewayError::NotOwner { board_id, user_id });
        }
        if let Some(db) = &self.db {
            db.delete_board(board_id)?;
        }
        state.boards.remove(&board_id);
        log::info!("Deleted board {board_id}");
        Ok(())
    }

    fn member(&self, board_id: Uuid, user_id: Uuid) -> Result<Option<Membership>, GatewayError> {
        self.read_board(board_id, |_, board| board.membership(user_id).cloned())
    }
}
