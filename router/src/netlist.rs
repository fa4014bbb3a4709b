use maze_common::db::core::SegmentKind;
use maze_common::db::indices::{NetId, NodeId};
use maze_common::geom::coord::GridCoord;
use maze_common::geom::point::Point;
use std::collections::BTreeSet;

/// One terminal of a net.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub net: NetId,
    /// Grid points inside the pin geometry.
    pub taps: Vec<GridCoord>,
    /// Grid points inside the keepout halo but outside the geometry.
    pub extends: Vec<GridCoord>,
    /// Physical reference point used in reports.
    pub position: Point<f64>,
}

impl Node {
    pub fn points(&self) -> impl Iterator<Item = GridCoord> + '_ {
        self.taps.iter().chain(self.extends.iter()).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetStatus {
    Unrouted,
    Routed,
    /// Waiting in the rip-up queue.
    Failed,
    Abandoned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Wire layer, or the lower layer of a via.
    pub layer: u8,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub offset_start: bool,
    pub offset_end: bool,
}

impl Segment {
    pub fn wire(layer: u8, x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            kind: SegmentKind::Wire,
            layer,
            x1,
            y1,
            x2,
            y2,
            offset_start: false,
            offset_end: false,
        }
    }

    pub fn via(layer: u8, x: u32, y: u32) -> Self {
        Self {
            kind: SegmentKind::Via,
            ..Self::wire(layer, x, y, x, y)
        }
    }

    pub fn start(&self) -> GridCoord {
        GridCoord::new(self.x1, self.y1, self.layer)
    }

    pub fn end(&self) -> GridCoord {
        match self.kind {
            SegmentKind::Wire => GridCoord::new(self.x2, self.y2, self.layer),
            SegmentKind::Via => GridCoord::new(self.x2, self.y2, self.layer + 1),
        }
    }

    pub fn length(&self) -> u32 {
        self.x1.abs_diff(self.x2) + self.y1.abs_diff(self.y2)
    }

    /// Every grid point the segment occupies; a via covers both of its layers.
    pub fn cells(&self) -> Vec<GridCoord> {
        match self.kind {
            SegmentKind::Via => vec![self.start(), self.end()],
            SegmentKind::Wire => {
                let (xl, xh) = (self.x1.min(self.x2), self.x1.max(self.x2));
                let (yl, yh) = (self.y1.min(self.y2), self.y1.max(self.y2));
                let mut out = Vec::with_capacity((xh - xl + yh - yl + 1) as usize);
                for x in xl..=xh {
                    for y in yl..=yh {
                        out.push(GridCoord::new(x, y, self.layer));
                    }
                }
                out
            }
        }
    }
}

/// Wiring that joins `node` to the already-connected part of its net.
#[derive(Clone, Debug)]
pub struct Route {
    pub node: NodeId,
    pub segments: Vec<Segment>,
    /// Cost of the searched path. Detours added to split via stacks are not
    /// charged, so this can be lower than the cost of `segments`.
    pub cost: u32,
    /// Whether the segments have been stamped into the occupancy grid.
    pub written: bool,
}

impl Route {
    pub fn cells(&self) -> impl Iterator<Item = GridCoord> + '_ {
        self.segments.iter().flat_map(|s| s.cells())
    }
}

#[derive(Clone, Debug)]
pub struct Net {
    pub id: NetId,
    pub name: String,
    pub nodes: Vec<NodeId>,
    /// 1-based routing order; 0 until assigned.
    pub order: usize,
    pub routes: Vec<Route>,
    /// Nets this net may no longer evict.
    pub noripup: BTreeSet<NetId>,
    /// Set once `noripup` has been cleared for a retry.
    pub pending: bool,
    pub status: NetStatus,
    /// Position in the critical-net list.
    pub critical: Option<usize>,
    /// Listed as do-not-route.
    pub skip: bool,
}

impl Net {
    pub fn new(id: NetId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            nodes: Vec::new(),
            order: 0,
            routes: Vec::new(),
            noripup: BTreeSet::new(),
            pending: false,
            status: NetStatus::Unrouted,
            critical: None,
            skip: false,
        }
    }

    pub fn is_routable(&self) -> bool {
        !self.skip && self.nodes.len() >= 2
    }

    pub fn cells(&self) -> impl Iterator<Item = GridCoord> + '_ {
        self.routes.iter().flat_map(|r| r.cells())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Netlist {
    pub nets: Vec<Net>,
    pub nodes: Vec<Node>,
}

impl Netlist {
    pub fn net(&self, id: NetId) -> &Net {
        &self.nets[id.index()]
    }

    pub fn net_mut(&mut self, id: NetId) -> &mut Net {
        &mut self.nets[id.index()]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Nodes joined to the net's first node through its routes.
    pub fn connected_nodes(&self, id: NetId) -> Vec<bool> {
        let net = self.net(id);
        let mut connected = vec![false; net.nodes.len()];
        if let Some(first) = connected.first_mut() {
            *first = true;
        }
        for route in &net.routes {
            if let Some(pos) = net.nodes.iter().position(|&n| n == route.node) {
                connected[pos] = true;
            }
        }
        connected
    }
}
