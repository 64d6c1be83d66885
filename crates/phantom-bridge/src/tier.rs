//! Execution contexts and the tiers that own them
//!
//! Every bridged call names a context: the entity it touches, the location
//! it touches, or nothing in particular. The context decides which
//! scheduler tier must run the call.

use std::fmt;

/// Identifier of a live entity
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Chunk coordinates within a world
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkPos {
    /// World name
    pub world: String,
    /// Chunk x
    pub x: i32,
    /// Chunk z
    pub z: i32,
}

/// A block-space position in a world
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// World name
    pub world: String,
    /// X
    pub x: f64,
    /// Y
    pub y: f64,
    /// Z
    pub z: f64,
}

impl Location {
    /// Create a location
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
        }
    }

    /// Location of the column at block `(x, z)`
    pub fn column(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self::new(world, f64::from(x), 0.0, f64::from(z))
    }

    /// Chunk containing this location
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos {
            world: self.world.clone(),
            x: (self.x.floor() as i32) >> 4,
            z: (self.z.floor() as i32) >> 4,
        }
    }
}

/// What a bridged call touches
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    /// A specific entity (players included)
    Entity(EntityId),
    /// A position in a world
    Location(Location),
    /// A chunk, addressed directly
    Chunk(ChunkPos),
    /// Server-wide state
    Global,
}

/// Scheduler tier that must run a call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tier {
    /// The entity's own scheduler, which follows it across regions
    Entity(EntityId),
    /// The region owning a chunk
    Region(ChunkPos),
    /// The global region
    Global,
}

impl Context {
    /// Tier owning this context
    pub fn tier(&self) -> Tier {
        match self {
            Context::Entity(id) => Tier::Entity(*id),
            Context::Location(loc) => Tier::Region(loc.chunk()),
            Context::Chunk(pos) => Tier::Region(pos.clone()),
            Context::Global => Tier::Global,
        }
    }
}

impl Tier {
    fn specificity(&self) -> u8 {
        match self {
            Tier::Entity(_) => 2,
            Tier::Region(_) => 1,
            Tier::Global => 0,
        }
    }

    /// Most specific tier among `contexts`; the first wins ties and an
    /// empty set classifies as global
    pub fn most_specific<'a>(contexts: impl IntoIterator<Item = &'a Context>) -> Tier {
        let mut best = Tier::Global;
        for tier in contexts.into_iter().map(Context::tier) {
            if tier.specificity() > best.specificity() {
                best = tier;
            }
        }
        best
    }

    /// Whether this is the global tier
    pub fn is_global(&self) -> bool {
        matches!(self, Tier::Global)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Entity(id) => write!(f, "{}", id),
            Tier::Region(pos) => write!(f, "region {}[{}, {}]", pos.world, pos.x, pos.z),
            Tier::Global => write!(f, "global"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_of_negative_coordinates() {
        let loc = Location::new("world", -0.5, 64.0, -17.0);
        assert_eq!(
            loc.chunk(),
            ChunkPos {
                world: "world".into(),
                x: -1,
                z: -2
            }
        );
        assert_eq!(Location::column("world", 31, 32).chunk().x, 1);
    }

    #[test]
    fn test_most_specific_prefers_entity() {
        let contexts = vec![
            Context::Global,
            Context::Location(Location::new("w", 1.0, 2.0, 3.0)),
            Context::Entity(EntityId(7)),
        ];
        assert_eq!(Tier::most_specific(&contexts), Tier::Entity(EntityId(7)));
    }

    #[test]
    fn test_most_specific_first_wins_ties() {
        let contexts = vec![
            Context::Location(Location::new("w", 0.0, 0.0, 0.0)),
            Context::Location(Location::new("w", 100.0, 0.0, 0.0)),
        ];
        match Tier::most_specific(&contexts) {
            Tier::Region(pos) => assert_eq!(pos.x, 0),
            other => panic!("unexpected tier {other}"),
        }
    }

    #[test]
    fn test_empty_is_global() {
        assert!(Tier::most_specific(std::iter::empty()).is_global());
    }
}
