use super::coord::Coord;

/// Relative offsets of the 8-neighborhood, row-major.
const NEIGHBOR_OFFSETS: [Coord; 8] = [
    Coord::new(-1, -1),
    Coord::new(0, -1),
    Coord::new(1, -1),
    Coord::new(-1, 0),
    Coord::new(1, 0),
    Coord::new(-1, 1),
    Coord::new(0, 1),
    Coord::new(1, 1),
];

/// A tile address on the infinite plane: which chunk, and where inside it.
///
/// Invariant: `0 <= offset.axis < size.axis` on both axes, always. `size`
/// is the world-wide chunk size and is identical on every position of one
/// world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkedPosition {
    chunk: Coord,
    offset: Coord,
    size: Coord,
}

impl ChunkedPosition {
    pub fn new(chunk: Coord, offset: Coord, size: Coord) -> Self {
        assert!(
            offset.in_bounds(size),
            "offset {offset} outside chunk size {size}"
        );
        Self {
            chunk,
            offset,
            size,
        }
    }

    pub const fn chunk(&self) -> Coord {
        self.chunk
    }

    pub const fn offset(&self) -> Coord {
        self.offset
    }

    pub const fn size(&self) -> Coord {
        self.size
    }

    /// Add a tile-space delta, carrying overflow into the chunk coordinate.
    ///
    /// Floor division does the carrying per axis, so negative deltas and
    /// deltas spanning several chunks resolve in a single call.
    pub fn add(self, delta: Coord) -> ChunkedPosition {
        let raw = self.offset + delta;
        ChunkedPosition {
            chunk: self.chunk + raw.div_euclid(self.size),
            offset: raw.rem_euclid(self.size),
            size: self.size,
        }
    }

    /// The 8 surrounding positions. Up to 3 of them live in other chunks.
    pub fn neighbors(self) -> [ChunkedPosition; 8] {
        NEIGHBOR_OFFSETS.map(|delta| self.add(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(chunk: (i32, i32), offset: (i32, i32)) -> ChunkedPosition {
        ChunkedPosition::new(
            Coord::new(chunk.0, chunk.1),
            Coord::new(offset.0, offset.1),
            Coord::new(8, 4),
        )
    }

    #[test]
    fn add_stays_inside_chunk() {
        assert_eq!(pos((0, 0), (2, 1)).add(Coord::new(3, 2)), pos((0, 0), (5, 3)));
    }

    #[test]
    fn add_carries_across_boundaries() {
        assert_eq!(pos((0, 0), (7, 3)).add(Coord::new(1, 1)), pos((1, 1), (0, 0)));
        assert_eq!(pos((0, 0), (0, 0)).add(Coord::new(-1, -1)), pos((-1, -1), (7, 3)));
    }

    #[test]
    fn add_spans_multiple_chunks_in_one_step() {
        assert_eq!(
            pos((0, 0), (3, 2)).add(Coord::new(21, -11)),
            pos((3, -3), (0, 3))
        );
    }

    #[test]
    fn add_is_associative_under_normalization() {
        let start = pos((2, -1), (6, 0));
        let deltas = [
            (Coord::new(1, 1), Coord::new(-9, 4)),
            (Coord::new(-17, -5), Coord::new(3, 40)),
            (Coord::new(0, -1), Coord::new(-1, 0)),
        ];
        for (d1, d2) in deltas {
            assert_eq!(start.add(d1).add(d2), start.add(d1 + d2));
        }
    }

    #[test]
    fn offset_invariant_holds_after_any_add() {
        let start = pos((0, 0), (0, 0));
        for dx in -20..=20 {
            for dy in -20..=20 {
                let result = start.add(Coord::new(dx, dy));
                assert!(result.offset().in_bounds(result.size()));
            }
        }
    }

    #[test]
    fn neighbors_cross_into_adjacent_chunks() {
        let corner = pos((0, 0), (0, 0));
        let neighbors = corner.neighbors();
        assert_eq!(neighbors[0], pos((-1, -1), (7, 3)));
        assert_eq!(neighbors[7], pos((0, 0), (1, 1)));
        let distinct_chunks: std::collections::HashSet<_> =
            neighbors.iter().map(|n| n.chunk()).collect();
        assert_eq!(distinct_chunks.len(), 4);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_offset_is_rejected() {
        ChunkedPosition::new(Coord::new(0, 0), Coord::new(8, 0), Coord::new(8, 4));
    }
}
