//! Transport-facing facade: one object bundling the world, the listener
//! registries, and the pump that fans world updates out to watchers.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

use crate::listener::{ClickUpdate, ListenerRegistry, ListenerToken};
use crate::world::coord::Coord;
use crate::world::persistence::ChunkPersistence;
use crate::world::position::ChunkedPosition;
use crate::world::tile::TileContent;
use crate::world::{ChunkUpdate, World, WorldConfig, WorldError};

pub struct Game<P> {
    world: Arc<World<P>>,
    chunk_listeners: Arc<ListenerRegistry<ChunkUpdate>>,
    click_listeners: ListenerRegistry<ClickUpdate>,
}

impl<P: ChunkPersistence> Game<P> {
    /// Build a game and start its update pump. Must be called inside a
    /// tokio runtime.
    pub fn start(config: WorldConfig, store: P) -> Arc<Self> {
        let world = Arc::new(World::new(config, store));
        let chunk_listeners = Arc::new(ListenerRegistry::new());

        let mut updates = world.subscribe();
        let pump = Arc::clone(&chunk_listeners);
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        pump.dispatch(update.chunk, &update);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("update pump lagged, {skipped} chunk updates dropped");
                    }
                    // The world is gone; nothing left to pump.
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Arc::new(Self {
            world,
            chunk_listeners,
            click_listeners: ListenerRegistry::new(),
        })
    }

    pub fn world(&self) -> &Arc<World<P>> {
        &self.world
    }

    pub fn chunk_size(&self) -> Coord {
        self.world.chunk_size()
    }

    pub async fn open_tile(&self, pos: ChunkedPosition) -> Result<TileContent, WorldError> {
        self.world.open_tile(pos).await
    }

    pub async fn flag(&self, pos: ChunkedPosition) -> Result<bool, WorldError> {
        self.world.flag(pos).await
    }

    pub async fn chunk_tiles(&self, chunk: Coord) -> Result<Vec<TileContent>, WorldError> {
        self.world.chunk_tiles(chunk).await
    }

    /// Watch a chunk for updates.
    pub fn watch_chunk(&self, chunk: Coord) -> (ListenerToken, mpsc::UnboundedReceiver<ChunkUpdate>) {
        self.chunk_listeners.register(chunk)
    }

    pub fn unwatch_chunk(&self, token: ListenerToken) {
        self.chunk_listeners.unregister(token);
    }

    /// Watch a chunk for other players' clicks.
    pub fn watch_clicks(&self, chunk: Coord) -> (ListenerToken, mpsc::UnboundedReceiver<ClickUpdate>) {
        self.click_listeners.register(chunk)
    }

    pub fn unwatch_clicks(&self, token: ListenerToken) {
        self.click_listeners.unregister(token);
    }

    /// Fan a player's click out to everyone watching the clicked chunk.
    pub fn publish_click(&self, click: ClickUpdate) {
        self.click_listeners.dispatch(click.position.chunk(), &click);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::persistence::MemoryStore;
    use std::time::Duration;

    fn test_config() -> WorldConfig {
        WorldConfig {
            chunk_size: Coord::new(4, 4),
            mine_probability: 1.0,
        }
    }

    #[tokio::test]
    async fn updates_reach_chunk_watchers_through_the_pump() {
        let game = Game::start(test_config(), MemoryStore::new());
        let chunk = Coord::new(0, 0);
        let (token, mut updates) = game.watch_chunk(chunk);

        let pos = game.world().position(chunk, Coord::new(1, 1));
        game.open_tile(pos).await.unwrap();

        let update = tokio::time::timeout(Duration::from_secs(1), updates.recv())
            .await
            .expect("update should arrive")
            .expect("pump alive");
        assert_eq!(update.chunk, chunk);
        assert_eq!(update.tiles.len(), 16);

        // After unwatching, further mutations deliver nothing here.
        game.unwatch_chunk(token);
        game.open_tile(game.world().position(chunk, Coord::new(2, 2)))
            .await
            .unwrap();
        assert!(updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn clicks_fan_out_to_chunk_watchers() {
        let game = Game::start(test_config(), MemoryStore::new());
        let chunk = Coord::new(2, -3);
        let (_token, mut clicks) = game.watch_clicks(chunk);
        let (_other, mut elsewhere) = game.watch_clicks(Coord::new(0, 0));

        let position = game.world().position(chunk, Coord::new(0, 0));
        game.publish_click(ClickUpdate {
            position,
            player: "ada".into(),
        });

        let click = clicks.try_recv().unwrap();
        assert_eq!(click.player, "ada");
        assert_eq!(click.position.chunk(), chunk);
        assert!(elsewhere.try_recv().is_err());
    }
}
