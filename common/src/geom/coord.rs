use std::fmt;

/// Integer routing-grid address: track `x`, track `y`, routing layer `z`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl GridCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    pub fn with_layer(self, z: u8) -> Self {
        Self { z, ..self }
    }

    pub fn same_column(&self, other: &GridCoord) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, L{})", self.x, self.y, self.z)
    }
}
