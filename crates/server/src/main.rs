use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use minefield_engine::game::Game;
use minefield_engine::world::coord::Coord;
use minefield_engine::world::persistence::{ChunkPersistence, MemoryStore};
use minefield_engine::world::tile::TileContent;
use minefield_engine::world::{self, World, WorldConfig};
use minefield_server::persistence::JsonDirStore;

/// Default interval between flushes of dirty chunks.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default tile dimensions of a chunk.
const DEFAULT_CHUNK_SIZE: Coord = Coord::new(64, 32);
/// Default per-tile mine probability.
const DEFAULT_MINE_PROBABILITY: f64 = 0.2;

#[tokio::main]
async fn main() {
    let demo_mode = std::env::args().any(|a| a == "--demo");
    let memory_mode = std::env::args().any(|a| a == "--memory");
    let world_dir: PathBuf = std::env::args()
        .skip_while(|a| a != "--world")
        .nth(1)
        .unwrap_or_else(|| "world".into())
        .into();
    let chunk_size = std::env::args()
        .skip_while(|a| a != "--chunk-size")
        .nth(1)
        .and_then(|s| parse_chunk_size(&s))
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    let mine_probability: f64 = std::env::args()
        .skip_while(|a| a != "--mine-probability")
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MINE_PROBABILITY);
    let flush_interval = std::env::args()
        .skip_while(|a| a != "--flush-interval")
        .nth(1)
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(FLUSH_INTERVAL);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    if demo_mode {
        run_demo().await;
        return;
    }

    tracing::info!("Minefield -- persistent infinite minesweeper world server");

    let config = WorldConfig {
        chunk_size,
        mine_probability,
    };

    if memory_mode {
        tracing::info!("Using in-memory chunk store (state dies with the process)");
        run(Game::start(config, MemoryStore::new()), flush_interval).await;
    } else {
        let store = match JsonDirStore::open(&world_dir).await {
            Ok(store) => store,
            Err(error) => {
                tracing::error!("Opening world directory failed: {error:#}");
                std::process::exit(1);
            }
        };
        match store.stored_count().await {
            Ok(0) => tracing::info!("Starting a fresh world in {}", world_dir.display()),
            Ok(n) => tracing::info!("Found {} persisted chunks in {}", n, world_dir.display()),
            Err(error) => tracing::warn!("Could not inspect the world directory: {error:#}"),
        }
        run(Game::start(config, store), flush_interval).await;
    }
}

/// Host the world until ctrl-c, then flush it one last time.
async fn run<P: ChunkPersistence>(game: Arc<Game<P>>, flush_interval: Duration) {
    let flush_task = world::start_autoflush(Arc::clone(game.world()), flush_interval);
    tracing::info!(
        "World ready: chunk size {}, flushing every {:?}",
        game.chunk_size(),
        flush_interval,
    );

    // No transport is wired in here; the process hosts the world and its
    // autosave until interrupted.
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl+C received, shutting down..."),
        Err(error) => tracing::error!("Failed to listen for shutdown signal: {error}"),
    }
    flush_task.abort();

    tracing::info!("Saving world before exit...");
    match game.world().flush().await {
        Ok(n) => tracing::info!("Shutdown save complete: {n} chunks written"),
        Err(error) => tracing::error!("Shutdown save failed: {error}"),
    }
}

/// Parse a `WIDTHxHEIGHT` chunk size argument, e.g. `64x32`.
fn parse_chunk_size(arg: &str) -> Option<Coord> {
    let (width, height) = arg.split_once('x')?;
    let width: i32 = width.parse().ok()?;
    let height: i32 = height.parse().ok()?;
    (width > 0 && height > 0).then(|| Coord::new(width, height))
}

/// Scripted session against an in-memory store: a cascade, some flags, a
/// flush, and a reload, with the resulting chunk rendered as text.
async fn run_demo() {
    tracing::info!("Minefield -- world engine demo");

    let store = Arc::new(MemoryStore::new());
    let config = WorldConfig {
        chunk_size: Coord::new(8, 8),
        mine_probability: 0.12,
    };
    let world = World::new(config, Arc::clone(&store));
    let mut updates = world.subscribe();

    let origin = Coord::new(0, 0);
    let center = world.position(origin, Coord::new(4, 4));
    let content = world
        .open_tile(center)
        .await
        .expect("in-memory store cannot fail");
    tracing::info!("Opened the chunk center: {content:?}");

    // A flag on a closed mine sticks; on a safe tile it opens instead.
    let corner = world.position(origin, Coord::new(0, 0));
    let flagged = world.flag(corner).await.expect("in-memory store cannot fail");
    tracing::info!("Flag attempt on the corner: flagged={flagged}");

    while let Ok(update) = updates.try_recv() {
        tracing::info!("Chunk {} updated ({} tiles)", update.chunk, update.tiles.len());
    }

    let saved = world.flush().await.expect("in-memory store cannot fail");
    tracing::info!(
        "Flushed {saved} dirty chunks ({} loaded, {} stored)",
        world.chunk_count().await,
        store.len(),
    );

    // A second world over the same store sees the persisted state.
    let reloaded = World::new(config, Arc::clone(&store));
    let tiles = reloaded
        .chunk_tiles(origin)
        .await
        .expect("in-memory store cannot fail");
    tracing::info!("Reloaded chunk {origin}:");
    for row in render_chunk(&tiles, config.chunk_size) {
        println!("    {row}");
    }
}

/// Render a chunk's contents as one text row per tile row.
fn render_chunk(tiles: &[TileContent], size: Coord) -> Vec<String> {
    (0..size.y)
        .map(|y| {
            (0..size.x)
                .map(|x| match tiles[Coord::new(x, y).to_index(size)] {
                    TileContent::Closed => '.',
                    TileContent::Flagged => 'F',
                    TileContent::Mine => '*',
                    TileContent::Number(0) => ' ',
                    TileContent::Number(n) => char::from(b'0' + n),
                })
                .collect()
        })
        .collect()
}
