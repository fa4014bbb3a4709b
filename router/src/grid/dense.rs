use super::{Dir, RoutingGrid};
use maze_common::db::indices::{NetId, NodeId};
use maze_common::geom::coord::GridCoord;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Owner {
    #[default]
    Free,
    /// Permanently unroutable.
    Blocked,
    Net(NetId),
}

/// Classification of a cell near a pin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stub {
    #[default]
    None,
    /// Halo cell reaching its pin with a vertical stub.
    NorthSouth,
    /// Halo cell reaching its pin with a horizontal stub.
    EastWest,
    /// Diagonal halo cell; no stub can reach the pin.
    Unroutable,
    /// Pin tap that must shift off-grid to clear a nearby obstruction.
    OffsetTap,
}

impl Stub {
    pub fn is_halo(self) -> bool {
        matches!(self, Stub::NorthSouth | Stub::EastWest | Stub::Unroutable)
    }
}

pub const BLOCKED_N: u16 = 1 << 0;
pub const BLOCKED_S: u16 = 1 << 1;
pub const BLOCKED_E: u16 = 1 << 2;
pub const BLOCKED_W: u16 = 1 << 3;
pub const OBSTRUCT_N: u16 = 1 << 4;
pub const OBSTRUCT_S: u16 = 1 << 5;
pub const OBSTRUCT_E: u16 = 1 << 6;
pub const OBSTRUCT_W: u16 = 1 << 7;
pub const OBSTRUCT_MASK: u16 = OBSTRUCT_N | OBSTRUCT_S | OBSTRUCT_E | OBSTRUCT_W;
/// A committed wire passes over a cell that was blocked before the commit.
pub const ROUTED_OVER: u16 = 1 << 8;

/// Permanent state of one grid point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    pub owner: Owner,
    pub stub: Stub,
    pub flags: u16,
}

impl Cell {
    /// True if a wire may not enter this cell through its `side` face.
    pub fn blocks_entry_from(&self, side: Dir) -> bool {
        let bit = match side {
            Dir::North => BLOCKED_N,
            Dir::South => BLOCKED_S,
            Dir::East => BLOCKED_E,
            Dir::West => BLOCKED_W,
            Dir::Up | Dir::Down => return false,
        };
        self.flags & bit != 0
    }

    /// Side of the nearest obstruction for cells in a keepout band.
    pub fn obstruct_side(&self) -> Option<Dir> {
        match self.flags & OBSTRUCT_MASK {
            OBSTRUCT_N => Some(Dir::North),
            OBSTRUCT_S => Some(Dir::South),
            OBSTRUCT_E => Some(Dir::East),
            OBSTRUCT_W => Some(Dir::West),
            _ => None,
        }
    }
}

pub fn obstruct_flag(side: Dir) -> u16 {
    match side {
        Dir::North => OBSTRUCT_N,
        Dir::South => OBSTRUCT_S,
        Dir::East => OBSTRUCT_E,
        Dir::West => OBSTRUCT_W,
        Dir::Up | Dir::Down => 0,
    }
}

pub fn blocked_flag(side: Dir) -> u16 {
    match side {
        Dir::North => BLOCKED_N,
        Dir::South => BLOCKED_S,
        Dir::East => BLOCKED_E,
        Dir::West => BLOCKED_W,
        Dir::Up | Dir::Down => 0,
    }
}

/// Occupancy grid with per-layer extents, flattened layer after layer.
///
/// Alongside the cell state it keeps the stub distance of each point and two
/// node lookups: `node_at` drives crossing penalties and is cleared once a net
/// is complete, `node_saved` is never cleared and marks terminal cells.
pub struct DenseGrid {
    widths: Vec<u32>,
    heights: Vec<u32>,
    offsets: Vec<usize>,
    cells: Vec<Cell>,
    stub: Vec<f32>,
    node_at: Vec<Option<NodeId>>,
    node_saved: Vec<Option<NodeId>>,
}

impl DenseGrid {
    /// `extents[layer]` is the (width, height) of that layer.
    pub fn new(extents: &[(u32, u32)]) -> Self {
        let mut offsets = Vec::with_capacity(extents.len());
        let mut size = 0usize;
        for &(w, h) in extents {
            offsets.push(size);
            size += (w as usize) * (h as usize);
        }

        if size > 500_000_000 {
            log::warn!(
                "Allocating large routing grid: {} points. Ensure sufficient RAM.",
                size
            );
        }

        Self {
            widths: extents.iter().map(|e| e.0).collect(),
            heights: extents.iter().map(|e| e.1).collect(),
            offsets,
            cells: vec![Cell::default(); size],
            stub: vec![0.0; size],
            node_at: vec![None; size],
            node_saved: vec![None; size],
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline(always)]
    pub fn index(&self, x: u32, y: u32, layer: u8) -> usize {
        let l = layer as usize;
        self.offsets[l] + (y as usize) * (self.widths[l] as usize) + (x as usize)
    }

    #[inline(always)]
    pub fn idx(&self, c: GridCoord) -> usize {
        self.index(c.x, c.y, c.z)
    }

    pub fn coord(&self, idx: usize) -> GridCoord {
        let layer = self.offsets.partition_point(|&o| o <= idx) - 1;
        let local = idx - self.offsets[layer];
        let w = self.widths[layer] as usize;
        GridCoord::new((local % w) as u32, (local / w) as u32, layer as u8)
    }

    pub fn cell_mut(&mut self, c: GridCoord) -> &mut Cell {
        let i = self.idx(c);
        &mut self.cells[i]
    }

    pub fn cell_at(&self, idx: usize) -> Cell {
        self.cells[idx]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn set_owner(&mut self, c: GridCoord, owner: Owner) {
        self.cell_mut(c).owner = owner;
    }

    pub fn stub_distance(&self, c: GridCoord) -> f32 {
        self.stub[self.idx(c)]
    }

    pub fn set_stub_distance(&mut self, c: GridCoord, d: f32) {
        let i = self.idx(c);
        self.stub[i] = d;
    }

    pub fn node_at(&self, c: GridCoord) -> Option<NodeId> {
        self.node_at[self.idx(c)]
    }

    pub fn set_node_at(&mut self, c: GridCoord, node: Option<NodeId>) {
        let i = self.idx(c);
        self.node_at[i] = node;
    }

    pub fn node_saved(&self, c: GridCoord) -> Option<NodeId> {
        self.node_saved[self.idx(c)]
    }

    pub fn node_saved_at(&self, idx: usize) -> Option<NodeId> {
        self.node_saved[idx]
    }

    /// Records `node` in both lookups.
    pub fn attach_node(&mut self, c: GridCoord, node: Option<NodeId>) {
        let i = self.idx(c);
        self.node_at[i] = node;
        self.node_saved[i] = node;
    }
}

impl RoutingGrid for DenseGrid {
    fn width(&self, layer: u8) -> u32 {
        self.widths[layer as usize]
    }
    fn height(&self, layer: u8) -> u32 {
        self.heights[layer as usize]
    }
    fn layers(&self) -> u8 {
        self.widths.len() as u8
    }

    fn cell(&self, c: GridCoord) -> Cell {
        self.cells[self.idx(c)]
    }
}
