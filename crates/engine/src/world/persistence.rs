//! The load/save seam between the world and whatever stores it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use super::coord::Coord;

/// Persisted form of one tile.
///
/// `flagged_by` attributes a flag to a player. The engine never fills it in
/// (identity lives outside the core) but carries it through round-trips so
/// an outer layer can.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSnapshot {
    pub mine: bool,
    pub opened: bool,
    pub flagged: bool,
    pub flagged_by: Option<String>,
}

/// Persisted form of a whole chunk, keyed by its chunk coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSnapshot {
    pub position: Coord,
    pub tiles: Vec<TileSnapshot>,
}

/// Storage collaborator consumed by [`World`](super::World).
///
/// `load` returns `Ok(None)` for a coordinate that has never been
/// persisted; errors are reserved for real I/O failures and are never
/// treated as "not found". `persist` upserts by `snapshot.position`. An
/// implementation's coordinate-to-key mapping must be a bijection over the
/// integer grid.
pub trait ChunkPersistence: Send + Sync + 'static {
    fn load(
        &self,
        pos: Coord,
    ) -> impl Future<Output = anyhow::Result<Option<ChunkSnapshot>>> + Send;

    fn persist(&self, snapshot: ChunkSnapshot) -> impl Future<Output = anyhow::Result<()>> + Send;
}

impl<P: ChunkPersistence> ChunkPersistence for Arc<P> {
    fn load(
        &self,
        pos: Coord,
    ) -> impl Future<Output = anyhow::Result<Option<ChunkSnapshot>>> + Send {
        (**self).load(pos)
    }

    fn persist(&self, snapshot: ChunkSnapshot) -> impl Future<Output = anyhow::Result<()>> + Send {
        (**self).persist(snapshot)
    }
}

/// In-memory store for tests, demos, and worlds that don't need to survive
/// a restart.
///
/// A `std::sync::Mutex` is enough here: every operation is brief and no
/// await happens while it is held.
#[derive(Default)]
pub struct MemoryStore {
    chunks: Mutex<HashMap<Coord, ChunkSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots currently held.
    pub fn len(&self) -> usize {
        self.chunks.lock().expect("memory store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkPersistence for MemoryStore {
    async fn load(&self, pos: Coord) -> anyhow::Result<Option<ChunkSnapshot>> {
        Ok(self
            .chunks
            .lock()
            .expect("memory store poisoned")
            .get(&pos)
            .cloned())
    }

    async fn persist(&self, snapshot: ChunkSnapshot) -> anyhow::Result<()> {
        self.chunks
            .lock()
            .expect("memory store poisoned")
            .insert(snapshot.position, snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pos: Coord, tiles: usize) -> ChunkSnapshot {
        ChunkSnapshot {
            position: pos,
            tiles: vec![
                TileSnapshot {
                    mine: false,
                    opened: false,
                    flagged: false,
                    flagged_by: None,
                };
                tiles
            ],
        }
    }

    #[tokio::test]
    async fn memory_store_upserts_by_coordinate() {
        let store = MemoryStore::new();
        let pos = Coord::new(3, -2);
        assert!(store.load(pos).await.unwrap().is_none());

        store.persist(snapshot(pos, 4)).await.unwrap();
        store.persist(snapshot(pos, 4)).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(pos).await.unwrap().unwrap().tiles.len(), 4);
    }
}
