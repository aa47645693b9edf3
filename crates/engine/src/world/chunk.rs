use rand::Rng;

use super::coord::Coord;
use super::persistence::{ChunkSnapshot, TileSnapshot};
use super::tile::Tile;

/// A fixed-size rectangular block of tiles: the unit of generation,
/// persistence, and caching.
///
/// Stored as a flat row-major array. A chunk exclusively owns its tiles;
/// the world reaches them only through [`Chunk::tile`] / [`Chunk::tile_mut`],
/// so tile state never escapes the cache entry that owns it.
pub struct Chunk {
    position: Coord,
    size: Coord,
    tiles: Vec<Tile>,
}

impl Chunk {
    /// Procedurally generate a fresh chunk: each tile is independently a
    /// mine with probability `mine_probability`.
    pub fn generate(position: Coord, size: Coord, mine_probability: f64) -> Self {
        let mut rng = rand::thread_rng();
        let tiles = (0..size.area())
            .map(|_| Tile::new(rng.gen_bool(mine_probability)))
            .collect();
        Self {
            position,
            size,
            tiles,
        }
    }

    /// Rebuild a chunk from a persisted snapshot.
    ///
    /// Panics if the snapshot's tile count does not match `size`: a
    /// snapshot written for a different chunk size cannot be interpreted.
    pub fn from_snapshot(position: Coord, size: Coord, snapshot: &ChunkSnapshot) -> Self {
        assert_eq!(
            snapshot.tiles.len(),
            size.area(),
            "snapshot for chunk {position} does not match chunk size {size}"
        );
        let tiles = snapshot
            .tiles
            .iter()
            .map(|tile| Tile::from_parts(tile.mine, tile.opened, tile.flagged))
            .collect();
        Self {
            position,
            size,
            tiles,
        }
    }

    pub fn to_snapshot(&self) -> ChunkSnapshot {
        ChunkSnapshot {
            position: self.position,
            tiles: self
                .tiles
                .iter()
                .map(|tile| TileSnapshot {
                    mine: tile.is_mine(),
                    opened: tile.is_open(),
                    flagged: tile.is_flagged(),
                    flagged_by: None,
                })
                .collect(),
        }
    }

    pub const fn position(&self) -> Coord {
        self.position
    }

    pub const fn size(&self) -> Coord {
        self.size
    }

    pub fn tile(&self, offset: Coord) -> &Tile {
        &self.tiles[self.index(offset)]
    }

    pub fn tile_mut(&mut self, offset: Coord) -> &mut Tile {
        let index = self.index(offset);
        &mut self.tiles[index]
    }

    pub fn mine_count(&self) -> usize {
        self.tiles.iter().filter(|tile| tile.is_mine()).count()
    }

    pub fn opened_count(&self) -> usize {
        self.tiles.iter().filter(|tile| tile.is_open()).count()
    }

    fn index(&self, offset: Coord) -> usize {
        assert!(
            offset.in_bounds(self.size),
            "offset {offset} outside chunk {} of size {}",
            self.position,
            self.size
        );
        offset.to_index(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_respects_probability_extremes() {
        let size = Coord::new(6, 6);
        let empty = Chunk::generate(Coord::new(0, 0), size, 0.0);
        assert_eq!(empty.mine_count(), 0);
        let full = Chunk::generate(Coord::new(0, 0), size, 1.0);
        assert_eq!(full.mine_count(), size.area());
    }

    #[test]
    fn snapshot_roundtrip_preserves_tile_state() {
        let size = Coord::new(4, 3);
        let mut chunk = Chunk::generate(Coord::new(2, -7), size, 0.5);
        for index in 0..size.area() {
            let offset = Coord::from_index(index, size);
            match index % 3 {
                0 => {
                    chunk.tile_mut(offset).open();
                }
                1 => {
                    chunk.tile_mut(offset).flag();
                }
                _ => {}
            }
        }

        let restored = Chunk::from_snapshot(chunk.position(), size, &chunk.to_snapshot());
        for index in 0..size.area() {
            let offset = Coord::from_index(index, size);
            let before = chunk.tile(offset);
            let after = restored.tile(offset);
            assert_eq!(before.is_mine(), after.is_mine());
            assert_eq!(before.is_open(), after.is_open());
            assert_eq!(before.is_flagged(), after.is_flagged());
        }
    }

    #[test]
    #[should_panic]
    fn mismatched_snapshot_size_is_rejected() {
        let chunk = Chunk::generate(Coord::new(0, 0), Coord::new(4, 4), 0.0);
        Chunk::from_snapshot(Coord::new(0, 0), Coord::new(8, 8), &chunk.to_snapshot());
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_tile_access_is_rejected() {
        let chunk = Chunk::generate(Coord::new(0, 0), Coord::new(4, 4), 0.0);
        chunk.tile(Coord::new(0, 4));
    }
}
