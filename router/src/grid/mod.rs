pub mod dense;

pub use dense::{Cell, DenseGrid, Owner, Stub};

use maze_common::geom::coord::GridCoord;

/// The six moves of the routing lattice. North is +y, East is +x, Up is the next layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Dir {
    pub fn opposite(self) -> Dir {
        match self {
            Dir::North => Dir::South,
            Dir::South => Dir::North,
            Dir::East => Dir::West,
            Dir::West => Dir::East,
            Dir::Up => Dir::Down,
            Dir::Down => Dir::Up,
        }
    }

    pub fn is_via(self) -> bool {
        matches!(self, Dir::Up | Dir::Down)
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Dir::East | Dir::West)
    }
}

pub trait RoutingGrid {
    fn width(&self, layer: u8) -> u32;
    fn height(&self, layer: u8) -> u32;
    fn layers(&self) -> u8;

    fn contains(&self, c: GridCoord) -> bool {
        c.z < self.layers() && c.x < self.width(c.z) && c.y < self.height(c.z)
    }

    fn cell(&self, c: GridCoord) -> Cell;

    /// Neighbor of `c` in direction `d`, if it lies on the grid.
    fn neighbor(&self, c: GridCoord, d: Dir) -> Option<GridCoord> {
        let n = match d {
            Dir::North => GridCoord::new(c.x, c.y.checked_add(1)?, c.z),
            Dir::South => GridCoord::new(c.x, c.y.checked_sub(1)?, c.z),
            Dir::East => GridCoord::new(c.x.checked_add(1)?, c.y, c.z),
            Dir::West => GridCoord::new(c.x.checked_sub(1)?, c.y, c.z),
            Dir::Up => GridCoord::new(c.x, c.y, c.z.checked_add(1)?),
            Dir::Down => GridCoord::new(c.x, c.y, c.z.checked_sub(1)?),
        };
        self.contains(n).then_some(n)
    }
}
