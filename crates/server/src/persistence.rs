//! On-disk chunk persistence: one JSON file per chunk.
//!
//! Snapshots live at `<root>/chunks/c.<x>.<y>.json`. The filename is the
//! persistence key, so the coordinate-to-key mapping is a bijection over
//! the integer grid. Saves go through a temp file and a rename, so a crash
//! mid-write never truncates an existing snapshot.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use minefield_engine::world::coord::Coord;
use minefield_engine::world::persistence::{ChunkPersistence, ChunkSnapshot, TileSnapshot};

// ── Chunk file structs (serde) ───────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug)]
struct ChunkFile {
    x: i32,
    y: i32,
    tiles: Vec<TileRecord>,
}

#[derive(Serialize, Deserialize, Debug)]
struct TileRecord {
    mine: bool,
    opened: bool,
    flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flagged_by: Option<String>,
}

impl ChunkFile {
    fn from_snapshot(snapshot: &ChunkSnapshot) -> Self {
        Self {
            x: snapshot.position.x,
            y: snapshot.position.y,
            tiles: snapshot
                .tiles
                .iter()
                .map(|tile| TileRecord {
                    mine: tile.mine,
                    opened: tile.opened,
                    flagged: tile.flagged,
                    flagged_by: tile.flagged_by.clone(),
                })
                .collect(),
        }
    }

    fn into_snapshot(self) -> ChunkSnapshot {
        ChunkSnapshot {
            position: Coord::new(self.x, self.y),
            tiles: self
                .tiles
                .into_iter()
                .map(|tile| TileSnapshot {
                    mine: tile.mine,
                    opened: tile.opened,
                    flagged: tile.flagged,
                    flagged_by: tile.flagged_by,
                })
                .collect(),
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// File-per-chunk store rooted at a world directory.
pub struct JsonDirStore {
    chunk_dir: PathBuf,
}

impl JsonDirStore {
    /// Open a store rooted at `dir`, creating the chunk directory if needed.
    pub async fn open(dir: &Path) -> Result<Self> {
        let chunk_dir = dir.join("chunks");
        tokio::fs::create_dir_all(&chunk_dir)
            .await
            .with_context(|| format!("creating chunk directory {}", chunk_dir.display()))?;
        Ok(Self { chunk_dir })
    }

    fn chunk_path(&self, pos: Coord) -> PathBuf {
        self.chunk_dir.join(format!("c.{}.{}.json", pos.x, pos.y))
    }

    /// Number of chunk files currently on disk.
    pub async fn stored_count(&self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.chunk_dir)
            .await
            .with_context(|| format!("reading chunk directory {}", self.chunk_dir.display()))?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with("c.") && name.ends_with(".json") {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl ChunkPersistence for JsonDirStore {
    async fn load(&self, pos: Coord) -> Result<Option<ChunkSnapshot>> {
        let path = self.chunk_path(pos);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("reading chunk file {}", path.display()));
            }
        };
        let file: ChunkFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing chunk file {}", path.display()))?;
        if Coord::new(file.x, file.y) != pos {
            bail!(
                "chunk file {} claims coordinate {},{}",
                path.display(),
                file.x,
                file.y
            );
        }
        Ok(Some(file.into_snapshot()))
    }

    async fn persist(&self, snapshot: ChunkSnapshot) -> Result<()> {
        let path = self.chunk_path(snapshot.position);
        let bytes = serde_json::to_vec(&ChunkFile::from_snapshot(&snapshot))
            .with_context(|| format!("serializing chunk {}", snapshot.position))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("writing chunk file {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing chunk file {}", path.display()))?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_store_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("minefield_test_{name}"));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample_snapshot(pos: Coord) -> ChunkSnapshot {
        ChunkSnapshot {
            position: pos,
            tiles: vec![
                TileSnapshot {
                    mine: true,
                    opened: false,
                    flagged: true,
                    flagged_by: Some("ada".into()),
                },
                TileSnapshot {
                    mine: false,
                    opened: true,
                    flagged: false,
                    flagged_by: None,
                },
                TileSnapshot {
                    mine: false,
                    opened: false,
                    flagged: false,
                    flagged_by: None,
                },
                TileSnapshot {
                    mine: true,
                    opened: false,
                    flagged: false,
                    flagged_by: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn roundtrip_preserves_every_tile_field() {
        let dir = temp_store_dir("roundtrip");
        let store = JsonDirStore::open(&dir).await.unwrap();

        let snapshot = sample_snapshot(Coord::new(4, -9));
        store.persist(snapshot.clone()).await.unwrap();
        let loaded = store.load(Coord::new(4, -9)).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_chunk_is_none_not_an_error() {
        let dir = temp_store_dir("missing");
        let store = JsonDirStore::open(&dir).await.unwrap();
        assert!(store.load(Coord::new(0, 0)).await.unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn corrupt_chunk_file_is_an_error_not_none() {
        let dir = temp_store_dir("corrupt");
        let store = JsonDirStore::open(&dir).await.unwrap();

        fs::write(dir.join("chunks/c.0.0.json"), b"not json").unwrap();
        assert!(store.load(Coord::new(0, 0)).await.is_err());

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn negative_coordinates_map_to_distinct_files() {
        let dir = temp_store_dir("negative");
        let store = JsonDirStore::open(&dir).await.unwrap();

        for pos in [
            Coord::new(-1, 2),
            Coord::new(1, -2),
            Coord::new(-1, -2),
            Coord::new(1, 2),
        ] {
            store.persist(sample_snapshot(pos)).await.unwrap();
        }
        assert_eq!(store.stored_count().await.unwrap(), 4);
        for pos in [Coord::new(-1, 2), Coord::new(1, -2)] {
            assert_eq!(store.load(pos).await.unwrap().unwrap().position, pos);
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn persist_upserts_in_place() {
        let dir = temp_store_dir("upsert");
        let store = JsonDirStore::open(&dir).await.unwrap();
        let pos = Coord::new(7, 7);

        let mut snapshot = sample_snapshot(pos);
        store.persist(snapshot.clone()).await.unwrap();
        snapshot.tiles[2].opened = true;
        store.persist(snapshot.clone()).await.unwrap();

        assert_eq!(store.stored_count().await.unwrap(), 1);
        let loaded = store.load(pos).await.unwrap().unwrap();
        assert!(loaded.tiles[2].opened);

        let _ = fs::remove_dir_all(&dir);
    }
}
