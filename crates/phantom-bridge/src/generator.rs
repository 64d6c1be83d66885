//! Chunk generator adapter

use crate::tier::Location;

/// Generated block data for one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkData {
    /// Block state ids, column-major
    pub blocks: Vec<u16>,
}

/// A plugin-provided world generator
pub trait ChunkGenerator: Send + Sync {
    /// Generate the chunk at `(x, z)`
    fn generate_chunk_data(&self, world: &str, seed: u64, x: i32, z: i32) -> ChunkData;

    #[allow(missing_docs)]
    fn should_generate_noise(&self) -> bool {
        false
    }

    #[allow(missing_docs)]
    fn should_generate_surface(&self) -> bool {
        false
    }

    #[allow(missing_docs)]
    fn should_generate_bedrock(&self) -> bool {
        false
    }

    #[allow(missing_docs)]
    fn should_generate_caves(&self) -> bool {
        false
    }

    #[allow(missing_docs)]
    fn should_generate_decorations(&self) -> bool {
        false
    }

    #[allow(missing_docs)]
    fn should_generate_mobs(&self) -> bool {
        false
    }

    /// Fixed spawn point, if the generator has one
    fn fixed_spawn_location(&self, _world: &str, _seed: u64) -> Option<Location> {
        None
    }
}

/// Generator that forwards every call to the plugin's generator
pub struct DelegatingGenerator {
    inner: Box<dyn ChunkGenerator>,
}

impl DelegatingGenerator {
    /// Wrap `inner`
    pub fn new(inner: Box<dyn ChunkGenerator>) -> Self {
        Self { inner }
    }

    /// Wrap `inner` if present
    pub fn wrap(inner: Option<Box<dyn ChunkGenerator>>) -> Option<Self> {
        inner.map(Self::new)
    }

    /// Unwrap the plugin's generator
    pub fn into_inner(self) -> Box<dyn ChunkGenerator> {
        self.inner
    }
}

impl ChunkGenerator for DelegatingGenerator {
    fn generate_chunk_data(&self, world: &str, seed: u64, x: i32, z: i32) -> ChunkData {
        self.inner.generate_chunk_data(world, seed, x, z)
    }

    fn should_generate_noise(&self) -> bool {
        self.inner.should_generate_noise()
    }

    fn should_generate_surface(&self) -> bool {
        self.inner.should_generate_surface()
    }

    fn should_generate_bedrock(&self) -> bool {
        self.inner.should_generate_bedrock()
    }

    fn should_generate_caves(&self) -> bool {
        self.inner.should_generate_caves()
    }

    fn should_generate_decorations(&self) -> bool {
        self.inner.should_generate_decorations()
    }

    fn should_generate_mobs(&self) -> bool {
        self.inner.should_generate_mobs()
    }

    fn fixed_spawn_location(&self, world: &str, seed: u64) -> Option<Location> {
        self.inner.fixed_spawn_location(world, seed)
    }
}
