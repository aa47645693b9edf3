//! The authoritative minesweeper world.
//!
//! [`World`] owns the chunk cache, coalesces concurrent persistence loads,
//! runs the open/flag state machines (flood fill, chording, auto-flag)
//! across chunk boundaries, tracks dirty chunks, and emits one update per
//! touched chunk per mutation.

pub mod chunk;
pub mod coord;
pub mod persistence;
pub mod position;
pub mod tile;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};

use chunk::Chunk;
use coord::Coord;
use persistence::{ChunkPersistence, ChunkSnapshot};
use position::ChunkedPosition;
use tile::{Tile, TileContent};

/// Capacity of the update broadcast channel. 256 updates in flight absorbs
/// a large cascade without lagging subscribers.
pub const UPDATE_BUS_CAPACITY: usize = 256;

/// Immutable per-world configuration, supplied once at construction.
#[derive(Debug, Clone, Copy)]
pub struct WorldConfig {
    /// Tile dimensions of every chunk.
    pub chunk_size: Coord,
    /// Probability that a generated tile is a mine, in `0..=1`.
    pub mine_probability: f64,
}

impl WorldConfig {
    fn validate(&self) {
        assert!(
            self.chunk_size.x > 0 && self.chunk_size.y > 0,
            "chunk size must be positive, got {}",
            self.chunk_size
        );
        assert!(
            (0.0..=1.0).contains(&self.mine_probability),
            "mine probability must be in 0..=1, got {}",
            self.mine_probability
        );
    }
}

/// One notification per chunk touched by a mutation: the chunk's full,
/// freshly recomputed tile contents.
///
/// `Arc<[TileContent]>` keeps the per-subscriber clone to a refcount bump.
#[derive(Debug, Clone)]
pub struct ChunkUpdate {
    pub chunk: Coord,
    pub tiles: Arc<[TileContent]>,
    pub size: Coord,
}

/// Errors crossing the world boundary.
///
/// Internal invariant violations (generating over a cached chunk, touching
/// an unmaterialized chunk) are panics, not variants: they indicate bugs,
/// not conditions a caller can handle.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("loading chunk {pos} failed: {source}")]
    Load {
        pos: Coord,
        #[source]
        source: anyhow::Error,
    },
    #[error("saving chunk {pos} failed: {source}")]
    Save {
        pos: Coord,
        #[source]
        source: anyhow::Error,
    },
}

/// Broadcast to every task awaiting the in-flight load of one coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    /// The load has not finished yet.
    Pending,
    /// A snapshot existed; the chunk is in the cache.
    Loaded,
    /// No snapshot exists for this coordinate.
    Missing,
    /// The store failed. The driving task holds (and logs) the error.
    Failed,
}

/// All mutable world state, behind a single lock: the cache, the in-flight
/// map, and the dirty set transition together, so a coordinate is at most
/// one of absent / in-flight / loaded, and dirty only while loaded.
struct WorldState {
    chunks: HashMap<Coord, Chunk>,
    inflight: HashMap<Coord, watch::Receiver<LoadOutcome>>,
    dirty: HashSet<Coord>,
}

impl WorldState {
    fn tile(&self, pos: &ChunkedPosition) -> &Tile {
        self.chunks
            .get(&pos.chunk())
            .expect("chunk materialized before tile access")
            .tile(pos.offset())
    }

    fn tile_mut(&mut self, pos: &ChunkedPosition) -> &mut Tile {
        self.chunks
            .get_mut(&pos.chunk())
            .expect("chunk materialized before tile access")
            .tile_mut(pos.offset())
    }

    /// Resolve a tile's content from cached chunks only.
    ///
    /// Precedence: memoized number, then flagged, closed, mine, and finally
    /// the freshly counted (and memoized) neighbor number. Returns `None` if
    /// the count needs chunks that are not cached; `missing` then holds the
    /// chunk coordinates to materialize first.
    fn try_resolve(
        &mut self,
        pos: &ChunkedPosition,
        missing: &mut HashSet<Coord>,
    ) -> Option<TileContent> {
        let Some(chunk) = self.chunks.get(&pos.chunk()) else {
            missing.insert(pos.chunk());
            return None;
        };
        let tile = chunk.tile(pos.offset());
        if let Some(count) = tile.cached_content() {
            return Some(TileContent::Number(count));
        }
        if tile.is_flagged() {
            return Some(TileContent::Flagged);
        }
        if !tile.is_open() {
            return Some(TileContent::Closed);
        }
        if tile.is_mine() {
            return Some(TileContent::Mine);
        }

        let mut count: u8 = 0;
        let mut complete = true;
        for neighbor in pos.neighbors() {
            match self.chunks.get(&neighbor.chunk()) {
                Some(chunk) => {
                    if chunk.tile(neighbor.offset()).is_mine() {
                        count += 1;
                    }
                }
                None => {
                    missing.insert(neighbor.chunk());
                    complete = false;
                }
            }
        }
        if !complete {
            return None;
        }
        self.tile_mut(pos).cache_content(count);
        Some(TileContent::Number(count))
    }
}

/// The world engine. Cheap to share behind an [`Arc`]; every method takes
/// `&self`.
pub struct World<P> {
    config: WorldConfig,
    store: P,
    state: Mutex<WorldState>,
    update_tx: broadcast::Sender<ChunkUpdate>,
}

impl<P: ChunkPersistence> World<P> {
    pub fn new(config: WorldConfig, store: P) -> Self {
        config.validate();
        let (update_tx, _) = broadcast::channel(UPDATE_BUS_CAPACITY);
        Self {
            config,
            store,
            state: Mutex::new(WorldState {
                chunks: HashMap::new(),
                inflight: HashMap::new(),
                dirty: HashSet::new(),
            }),
            update_tx,
        }
    }

    pub fn chunk_size(&self) -> Coord {
        self.config.chunk_size
    }

    /// Wrap a (chunk, offset) pair into a position for this world.
    pub fn position(&self, chunk: Coord, offset: Coord) -> ChunkedPosition {
        ChunkedPosition::new(chunk, offset, self.config.chunk_size)
    }

    /// Subscribe to per-chunk update notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChunkUpdate> {
        self.update_tx.subscribe()
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Open a tile.
    ///
    /// An already-open tile attempts a chord; a closed tile opens (flagged
    /// tiles stay put); a tile that resolves to zero cascades. Returns the
    /// tile's content after the operation.
    pub async fn open_tile(&self, pos: ChunkedPosition) -> Result<TileContent, WorldError> {
        self.materialize(pos.chunk(), true).await?;
        let mut touched = HashSet::new();

        let already_open = {
            let mut state = self.state.lock().await;
            let tile = state.tile_mut(&pos);
            if tile.is_open() {
                true
            } else {
                if tile.open() {
                    touched.insert(pos.chunk());
                }
                false
            }
        };

        if already_open {
            self.try_chord(&pos, &mut touched).await?;
        }

        let content = self.resolve_content(&pos).await?;
        if content == TileContent::Number(0) {
            self.flood_open(&pos, &mut touched).await?;
        }

        self.commit(&touched).await?;
        Ok(content)
    }

    /// Flag a tile.
    ///
    /// An open tile attempts auto-flag; a closed mine is flagged; a closed
    /// safe tile is opened instead, cascading like a normal reveal. Returns
    /// the tile's own flagged state afterwards.
    pub async fn flag(&self, pos: ChunkedPosition) -> Result<bool, WorldError> {
        self.materialize(pos.chunk(), true).await?;
        let mut touched = HashSet::new();

        enum Action {
            AutoFlag,
            Flagged,
            Opened,
        }
        let action = {
            let mut state = self.state.lock().await;
            let tile = state.tile_mut(&pos);
            if tile.is_open() {
                Action::AutoFlag
            } else if tile.is_mine() {
                if tile.flag() {
                    touched.insert(pos.chunk());
                }
                Action::Flagged
            } else {
                // A flag on a safe tile reveals it instead of protecting it.
                if tile.open() {
                    touched.insert(pos.chunk());
                }
                Action::Opened
            }
        };

        let flagged = match action {
            Action::AutoFlag => {
                self.try_auto_flag(&pos, &mut touched).await?;
                false
            }
            Action::Flagged => true,
            Action::Opened => {
                if self.resolve_content(&pos).await? == TileContent::Number(0) {
                    self.flood_open(&pos, &mut touched).await?;
                }
                false
            }
        };

        self.commit(&touched).await?;
        Ok(flagged)
    }

    /// Chording: if an open tile's number equals its count of neighbors
    /// that are flagged or open mines, open every closed unflagged
    /// neighbor. A count mismatch is a silent no-op.
    async fn try_chord(
        &self,
        pos: &ChunkedPosition,
        touched: &mut HashSet<Coord>,
    ) -> Result<(), WorldError> {
        let TileContent::Number(number) = self.resolve_content(pos).await? else {
            return Ok(());
        };

        self.materialize_neighborhood(pos).await?;
        let to_open: Vec<ChunkedPosition> = {
            let state = self.state.lock().await;
            let satisfied = pos
                .neighbors()
                .iter()
                .filter(|neighbor| {
                    let tile = state.tile(neighbor);
                    tile.is_flagged() || (tile.is_open() && tile.is_mine())
                })
                .count();
            if usize::from(number) != satisfied {
                return Ok(());
            }
            pos.neighbors()
                .into_iter()
                .filter(|neighbor| {
                    let tile = state.tile(neighbor);
                    !tile.is_open() && !tile.is_flagged()
                })
                .collect()
        };

        for neighbor in to_open {
            let opened = {
                let mut state = self.state.lock().await;
                if state.tile_mut(&neighbor).open() {
                    touched.insert(neighbor.chunk());
                    true
                } else {
                    false
                }
            };
            if !opened {
                continue;
            }
            if self.resolve_content(&neighbor).await? == TileContent::Number(0) {
                self.flood_open(&neighbor, touched).await?;
            }
        }
        Ok(())
    }

    /// Auto-flag: if an open tile's number equals its count of neighbors
    /// that are unopened, flagged, or open mines, every closed unflagged
    /// neighbor is a certain mine and gets flagged.
    async fn try_auto_flag(
        &self,
        pos: &ChunkedPosition,
        touched: &mut HashSet<Coord>,
    ) -> Result<(), WorldError> {
        let TileContent::Number(number) = self.resolve_content(pos).await? else {
            return Ok(());
        };

        self.materialize_neighborhood(pos).await?;
        let mut state = self.state.lock().await;
        let certain = pos
            .neighbors()
            .iter()
            .filter(|neighbor| {
                let tile = state.tile(neighbor);
                !tile.is_open() || tile.is_mine() || tile.is_flagged()
            })
            .count();
        if usize::from(number) != certain {
            return Ok(());
        }

        for neighbor in pos.neighbors() {
            if state.tile_mut(&neighbor).flag() {
                touched.insert(neighbor.chunk());
            }
        }
        Ok(())
    }

    /// Flood fill from a tile that resolved to zero: open every reachable
    /// closed unflagged tile connected through zero tiles, 8-connected.
    ///
    /// An explicit worklist bounds the stack while the region spans
    /// arbitrarily many chunks materializing on demand.
    async fn flood_open(
        &self,
        origin: &ChunkedPosition,
        touched: &mut HashSet<Coord>,
    ) -> Result<(), WorldError> {
        self.materialize_neighborhood(origin).await?;
        let mut worklist: Vec<ChunkedPosition> = {
            let state = self.state.lock().await;
            origin
                .neighbors()
                .into_iter()
                .filter(|neighbor| !state.tile(neighbor).is_open())
                .collect()
        };

        while let Some(pos) = worklist.pop() {
            self.materialize_neighborhood(&pos).await?;
            let mut state = self.state.lock().await;
            let tile = state.tile_mut(&pos);
            if tile.is_open() || tile.is_flagged() {
                continue;
            }
            tile.open();
            touched.insert(pos.chunk());

            let mut missing = HashSet::new();
            let content = state
                .try_resolve(&pos, &mut missing)
                .expect("neighborhood materialized before resolve");
            if content == TileContent::Number(0) {
                worklist.extend(
                    pos.neighbors()
                        .into_iter()
                        .filter(|neighbor| !state.tile(neighbor).is_open()),
                );
            }
        }
        Ok(())
    }

    /// Resolve a tile's visible content, materializing whatever chunks its
    /// neighbor count spans.
    async fn resolve_content(&self, pos: &ChunkedPosition) -> Result<TileContent, WorldError> {
        self.materialize(pos.chunk(), true).await?;
        loop {
            let missing: Vec<Coord> = {
                let mut state = self.state.lock().await;
                let mut missing = HashSet::new();
                if let Some(content) = state.try_resolve(pos, &mut missing) {
                    return Ok(content);
                }
                missing.into_iter().collect()
            };
            // Chunks are never evicted, so one materialization round makes
            // the next resolve attempt complete.
            for chunk_pos in missing {
                self.materialize(chunk_pos, true).await?;
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Visible contents of a chunk, row-major.
    ///
    /// A chunk with a persisted snapshot is loaded on demand; a chunk that
    /// has never existed reports as entirely closed WITHOUT being
    /// generated. (Resolving the numbers of opened border tiles may still
    /// materialize neighboring chunks.)
    pub async fn chunk_tiles(&self, chunk_pos: Coord) -> Result<Vec<TileContent>, WorldError> {
        if !self.materialize(chunk_pos, false).await? {
            return Ok(vec![TileContent::Closed; self.config.chunk_size.area()]);
        }
        self.loaded_chunk_contents(chunk_pos).await
    }

    /// Number of chunks resident in the cache.
    pub async fn chunk_count(&self) -> usize {
        self.state.lock().await.chunks.len()
    }

    /// Number of chunks modified since their last successful save.
    pub async fn dirty_count(&self) -> usize {
        self.state.lock().await.dirty.len()
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Persist every loaded dirty chunk.
    ///
    /// A successful save clears that chunk's dirty mark; a failed save
    /// keeps it for the next cycle. The first failure is returned once the
    /// whole batch has been attempted. No retries happen here.
    pub async fn flush(&self) -> Result<usize, WorldError> {
        let batch: Vec<ChunkSnapshot> = {
            let state = self.state.lock().await;
            state
                .dirty
                .iter()
                .filter_map(|pos| state.chunks.get(pos))
                .map(Chunk::to_snapshot)
                .collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let mut saved = 0usize;
        let mut failure = None;
        for snapshot in batch {
            let pos = snapshot.position;
            match self.store.persist(snapshot).await {
                Ok(()) => {
                    self.state.lock().await.dirty.remove(&pos);
                    saved += 1;
                }
                Err(source) => {
                    tracing::error!("saving chunk {pos} failed: {source:#}");
                    if failure.is_none() {
                        failure = Some(WorldError::Save { pos, source });
                    }
                }
            }
        }
        tracing::debug!("flushed {saved} dirty chunks");
        match failure {
            Some(error) => Err(error),
            None => Ok(saved),
        }
    }

    // ── Chunk materialization ───────────────────────────────────────────

    /// Generate-or-load with request coalescing: concurrent calls for one
    /// uncached coordinate issue a single persistence read.
    ///
    /// Returns whether the chunk is cached afterwards; with `generate` set
    /// this is always true on `Ok`.
    async fn materialize(&self, pos: Coord, generate: bool) -> Result<bool, WorldError> {
        loop {
            let mut waiter;
            {
                let mut state = self.state.lock().await;
                if state.chunks.contains_key(&pos) {
                    return Ok(true);
                }
                if let Some(rx) = state.inflight.get(&pos).cloned() {
                    waiter = rx;
                } else {
                    let (tx, rx) = watch::channel(LoadOutcome::Pending);
                    state.inflight.insert(pos, rx);
                    drop(state);
                    let outcome = self.drive_load(pos, tx).await?;
                    return self.conclude(pos, generate, outcome).await;
                }
            }

            tracing::trace!("awaiting in-flight load for chunk {pos}");
            // Wakes on the outcome broadcast, or on the driving task being
            // dropped mid-load.
            let _ = waiter.changed().await;
            let outcome = *waiter.borrow();
            if outcome == LoadOutcome::Pending {
                // The driving task died before finishing. Clear the stale
                // entry (unless a newer load replaced it) and start over.
                let mut state = self.state.lock().await;
                if state
                    .inflight
                    .get(&pos)
                    .is_some_and(|rx| rx.same_channel(&waiter))
                {
                    state.inflight.remove(&pos);
                }
                continue;
            }
            return self.conclude(pos, generate, outcome).await;
        }
    }

    /// Run the single coalesced store read for `pos`, install a loaded
    /// snapshot, and broadcast the outcome to waiters -- also on failure.
    async fn drive_load(
        &self,
        pos: Coord,
        done: watch::Sender<LoadOutcome>,
    ) -> Result<LoadOutcome, WorldError> {
        let result = self.store.load(pos).await;

        let mut state = self.state.lock().await;
        state.inflight.remove(&pos);
        let outcome = match &result {
            Ok(Some(snapshot)) => {
                // A racing path may have populated the cache meanwhile; the
                // cached chunk wins over the snapshot.
                if !state.chunks.contains_key(&pos) {
                    let chunk = Chunk::from_snapshot(pos, self.config.chunk_size, snapshot);
                    state.chunks.insert(pos, chunk);
                }
                LoadOutcome::Loaded
            }
            Ok(None) => LoadOutcome::Missing,
            Err(_) => LoadOutcome::Failed,
        };
        drop(state);
        let _ = done.send(outcome);

        match result {
            Err(source) => Err(WorldError::Load { pos, source }),
            Ok(_) => Ok(outcome),
        }
    }

    /// Turn a finished load into the caller's answer: a cached chunk wins;
    /// otherwise generate on demand or report the chunk absent.
    async fn conclude(
        &self,
        pos: Coord,
        generate: bool,
        outcome: LoadOutcome,
    ) -> Result<bool, WorldError> {
        let mut state = self.state.lock().await;
        if state.chunks.contains_key(&pos) {
            return Ok(true);
        }
        match outcome {
            LoadOutcome::Missing => {
                if generate {
                    self.generate_chunk(&mut state, pos);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            LoadOutcome::Failed => Err(WorldError::Load {
                pos,
                source: anyhow::anyhow!("the coalesced load for this chunk failed"),
            }),
            LoadOutcome::Loaded | LoadOutcome::Pending => {
                unreachable!("load outcome {outcome:?} for chunk {pos} left no cached chunk")
            }
        }
    }

    /// Procedurally generate `pos` into the cache.
    ///
    /// Panics if the coordinate is already cached: reaching generation with
    /// a cached chunk means the coalescing guard failed, and overwriting
    /// would destroy player-visible state.
    fn generate_chunk(&self, state: &mut WorldState, pos: Coord) {
        assert!(
            !state.chunks.contains_key(&pos),
            "generated chunk {pos} would overwrite a cached chunk"
        );
        tracing::debug!("generating chunk {pos}");
        let chunk = Chunk::generate(pos, self.config.chunk_size, self.config.mine_probability);
        state.chunks.insert(pos, chunk);
    }

    /// Materialize the chunk containing `pos` plus every chunk its
    /// 8-neighborhood reaches into (at most 4 distinct chunks).
    async fn materialize_neighborhood(&self, pos: &ChunkedPosition) -> Result<(), WorldError> {
        let mut needed = HashSet::new();
        needed.insert(pos.chunk());
        for neighbor in pos.neighbors() {
            needed.insert(neighbor.chunk());
        }
        for chunk_pos in needed {
            self.materialize(chunk_pos, true).await?;
        }
        Ok(())
    }

    // ── Dirty tracking and notification ─────────────────────────────────

    /// Mark every touched chunk dirty and emit its update: exactly once per
    /// chunk per operation, and only for chunks whose tiles actually
    /// changed.
    async fn commit(&self, touched: &HashSet<Coord>) -> Result<(), WorldError> {
        for &chunk_pos in touched {
            let tiles = self.loaded_chunk_contents(chunk_pos).await?;
            self.state.lock().await.dirty.insert(chunk_pos);
            // No subscribers is fine; the update is simply dropped.
            let _ = self.update_tx.send(ChunkUpdate {
                chunk: chunk_pos,
                tiles: tiles.into(),
                size: self.config.chunk_size,
            });
        }
        Ok(())
    }

    /// Full content array of a chunk known to be cached, materializing
    /// neighbor chunks where border numbers need them.
    async fn loaded_chunk_contents(
        &self,
        chunk_pos: Coord,
    ) -> Result<Vec<TileContent>, WorldError> {
        let size = self.config.chunk_size;
        loop {
            let missing: Vec<Coord> = {
                let mut state = self.state.lock().await;
                let mut missing = HashSet::new();
                let mut contents = Vec::with_capacity(size.area());
                let mut complete = true;
                for index in 0..size.area() {
                    let pos = ChunkedPosition::new(chunk_pos, Coord::from_index(index, size), size);
                    match state.try_resolve(&pos, &mut missing) {
                        Some(content) => {
                            if complete {
                                contents.push(content);
                            }
                        }
                        // Keep scanning so one round gathers every missing
                        // chunk the whole array needs.
                        None => complete = false,
                    }
                }
                if complete {
                    return Ok(contents);
                }
                missing.into_iter().collect()
            };
            for pos in missing {
                self.materialize(pos, true).await?;
            }
        }
    }
}

/// Spawn the fixed-interval flush task for `world`.
pub fn start_autoflush<P: ChunkPersistence>(
    world: Arc<World<P>>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            match world.flush().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("autoflush: {n} chunks saved"),
                Err(error) => tracing::error!("autoflush failed: {error}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryStore;

    #[test]
    #[should_panic]
    fn zero_chunk_size_is_rejected() {
        World::new(
            WorldConfig {
                chunk_size: Coord::new(0, 4),
                mine_probability: 0.1,
            },
            MemoryStore::new(),
        );
    }

    #[test]
    #[should_panic]
    fn probability_above_one_is_rejected() {
        World::new(
            WorldConfig {
                chunk_size: Coord::new(4, 4),
                mine_probability: 1.5,
            },
            MemoryStore::new(),
        );
    }
}
