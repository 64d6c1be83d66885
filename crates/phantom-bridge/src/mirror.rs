//! Snapshot mirror of online players and loaded worlds
//!
//! Reads like "who is online" cannot run on arbitrary region threads, so a
//! repeating global task copies them into an immutable [`Snapshot`] that
//! any thread can read without blocking.

use crate::tier::EntityId;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// An online player as seen by the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRef {
    /// Player name
    pub name: String,
    /// Unique id
    pub uuid: u128,
    /// Entity backing the player
    pub entity: EntityId,
}

/// A loaded world as seen by the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldRef {
    /// World name
    pub name: String,
    /// Unique id
    pub uuid: u128,
}

/// Source of the live server state, only read from the global tier
pub trait ServerView: Send + Sync + 'static {
    /// Players currently online
    fn online_players(&self) -> Vec<PlayerRef>;

    /// Worlds currently loaded
    fn worlds(&self) -> Vec<WorldRef>;
}

/// One consistent copy of the server state
#[derive(Debug, Default)]
pub struct Snapshot {
    players: Vec<PlayerRef>,
    worlds: Vec<WorldRef>,
    players_by_name: FxHashMap<String, usize>,
    players_by_uuid: FxHashMap<u128, usize>,
    worlds_by_name: FxHashMap<String, usize>,
    worlds_by_uuid: FxHashMap<u128, usize>,
}

impl Snapshot {
    /// Build indexed snapshot from raw lists
    pub fn new(players: Vec<PlayerRef>, worlds: Vec<WorldRef>) -> Self {
        let mut snapshot = Self::default();
        for (i, p) in players.iter().enumerate() {
            snapshot.players_by_name.insert(p.name.clone(), i);
            snapshot.players_by_uuid.insert(p.uuid, i);
        }
        for (i, w) in worlds.iter().enumerate() {
            snapshot.worlds_by_name.insert(w.name.clone(), i);
            snapshot.worlds_by_uuid.insert(w.uuid, i);
        }
        snapshot.players = players;
        snapshot.worlds = worlds;
        snapshot
    }

    /// Online players in server order
    pub fn players(&self) -> &[PlayerRef] {
        &self.players
    }

    /// Loaded worlds in server order
    pub fn worlds(&self) -> &[WorldRef] {
        &self.worlds
    }

    /// Player by exact name
    pub fn player_by_name(&self, name: &str) -> Option<&PlayerRef> {
        self.players_by_name.get(name).map(|&i| &self.players[i])
    }

    /// Player by unique id
    pub fn player_by_uuid(&self, uuid: u128) -> Option<&PlayerRef> {
        self.players_by_uuid.get(&uuid).map(|&i| &self.players[i])
    }

    /// World by name
    pub fn world_by_name(&self, name: &str) -> Option<&WorldRef> {
        self.worlds_by_name.get(name).map(|&i| &self.worlds[i])
    }

    /// World by unique id
    pub fn world_by_uuid(&self, uuid: u128) -> Option<&WorldRef> {
        self.worlds_by_uuid.get(&uuid).map(|&i| &self.worlds[i])
    }
}

/// Holder of the latest snapshot
#[derive(Debug, Default)]
pub struct Mirror {
    current: RwLock<Arc<Snapshot>>,
}

impl Mirror {
    /// Empty mirror; reads return nothing until the first refresh
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Copy the server state into a new snapshot
    pub fn refresh(&self, server: &dyn ServerView) {
        let snapshot = Snapshot::new(server.online_players(), server.worlds());
        *self.current.write() = Arc::new(snapshot);
    }
}
