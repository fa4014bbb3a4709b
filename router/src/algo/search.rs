use crate::grid::{DenseGrid, Dir, Owner, RoutingGrid, Stub};
use crate::netlist::Netlist;
use maze_common::db::core::LayerDirection;
use maze_common::db::indices::{NetId, NodeId};
use maze_common::geom::coord::GridCoord;
use maze_common::util::config::DetailedRoutingConfig;
use std::collections::{BTreeSet, HashMap};

/// Cost of a cell the search has not reached.
pub const MAXRT: u32 = 10_000_000;

pub const PROCESSED: u8 = 1 << 0;
pub const SOURCE: u8 = 1 << 1;
pub const TARGET: u8 = 1 << 2;
/// Cell is held by another net and may be crossed at a penalty.
pub const CONFLICT: u8 = 1 << 3;
/// Cell may be entered.
pub const COST: u8 = 1 << 4;

/// How strictly other nets' wires are respected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Strict,
    Conflict,
}

impl Stage {
    fn level(self) -> u32 {
        match self {
            Stage::Strict => 0,
            Stage::Conflict => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchCell {
    pub cost: u32,
    /// Direction back toward the source.
    pub pred: Option<Dir>,
    pub flags: u8,
    /// Net whose wire sits here, if the cell could be taken over in conflict mode.
    pub occupant: Option<NetId>,
}

impl Default for SearchCell {
    fn default() -> Self {
        Self {
            cost: MAXRT,
            pred: None,
            flags: 0,
            occupant: None,
        }
    }
}

impl SearchCell {
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CostTable {
    pub seg: u32,
    pub via: u32,
    pub jog: u32,
    pub xver: u32,
    pub block: u32,
    pub conflict: u32,
}

impl From<&DetailedRoutingConfig> for CostTable {
    fn from(c: &DetailedRoutingConfig) -> Self {
        Self {
            seg: c.seg_cost,
            via: c.via_cost,
            jog: c.jog_cost,
            xver: c.xver_cost,
            block: c.block_cost,
            conflict: c.conflict_cost,
        }
    }
}

/// Read-only view of the routing state shared by one leg.
pub struct SearchContext<'a> {
    pub grid: &'a DenseGrid,
    pub netlist: &'a Netlist,
    pub directions: &'a [LayerDirection],
    pub costs: &'a CostTable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prepared {
    /// Sources and targets are marked; call `expand`.
    Ready,
    /// Every node is already connected.
    Complete,
    /// The node touches the routed part of the net already.
    Adjacent(NodeId),
    /// The node has no grid points at all; the net can never be completed.
    NodeFatal(NodeId),
    NoSources,
    NoTargets,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { target: GridCoord, cost: u32 },
    Exhausted,
    /// The worklist outgrew the configured limit.
    Capacity,
}

const HORIZONTAL_ORDER: [Dir; 6] = [Dir::East, Dir::West, Dir::South, Dir::North, Dir::Down, Dir::Up];
const VERTICAL_ORDER: [Dir; 6] = [Dir::North, Dir::South, Dir::East, Dir::West, Dir::Down, Dir::Up];

/// Label-correcting maze search over the whole grid. State is kept between legs
/// and reset at the start of each.
pub struct MazeSearch {
    cells: Vec<SearchCell>,
    worklist: Vec<usize>,
    deferred: Vec<usize>,
    targets: HashMap<usize, NodeId>,
    noripup: BTreeSet<NetId>,
    stage: Stage,
    maxcost: u32,
    num_passes: u32,
    max_points: usize,
}

impl MazeSearch {
    pub fn new(config: &DetailedRoutingConfig) -> Self {
        Self {
            cells: Vec::new(),
            worklist: Vec::new(),
            deferred: Vec::new(),
            targets: HashMap::new(),
            noripup: BTreeSet::new(),
            stage: Stage::Strict,
            maxcost: 1,
            num_passes: config.num_passes.max(1),
            max_points: config.max_search_points,
        }
    }

    pub fn cell(&self, idx: usize) -> SearchCell {
        self.cells[idx]
    }

    pub fn target_node(&self, idx: usize) -> Option<NodeId> {
        self.targets.get(&idx).copied()
    }

    fn reset(&mut self, size: usize) {
        self.cells.clear();
        self.cells.resize(size, SearchCell::default());
        self.worklist.clear();
        self.deferred.clear();
        self.targets.clear();
    }

    /// Builds the working copy of the grid for one leg of `net` and seeds the
    /// worklist with the connected part of the net.
    pub fn prepare(&mut self, ctx: &SearchContext, net_id: NetId, stage: Stage) -> Prepared {
        let grid = ctx.grid;
        let net = ctx.netlist.net(net_id);

        for &n in &net.nodes {
            let node = ctx.netlist.node(n);
            if node.taps.is_empty() && node.extends.is_empty() {
                return Prepared::NodeFatal(n);
            }
        }
        let connected = ctx.netlist.connected_nodes(net_id);
        if connected.iter().all(|&c| c) {
            return Prepared::Complete;
        }

        self.reset(grid.len());
        self.stage = stage;
        self.noripup = net.noripup.clone();

        for i in 0..grid.len() {
            let cell = grid.cell_at(i);
            let sc = &mut self.cells[i];
            match cell.owner {
                Owner::Free => sc.flags = COST,
                Owner::Net(n) if n == net_id => {
                    if cell.stub != Stub::Unroutable {
                        sc.flags = COST;
                    }
                }
                Owner::Net(other) => {
                    if cell.stub == Stub::None && grid.node_saved_at(i).is_none() {
                        sc.occupant = Some(other);
                    }
                }
                Owner::Blocked => {}
            }
        }

        let mut bbox = BoundingBox::default();

        for (pos, &n) in net.nodes.iter().enumerate() {
            if !connected[pos] {
                continue;
            }
            let node = ctx.netlist.node(n);
            for &t in &node.taps {
                if grid.cell(t).owner == Owner::Net(net_id) {
                    self.mark_source(grid.idx(t), t, &mut bbox);
                }
            }
            for &e in &node.extends {
                let foreign = grid.node_saved(e).is_some_and(|s| s != n);
                if !foreign && grid.cell(e).owner == Owner::Net(net_id) {
                    self.mark_source(grid.idx(e), e, &mut bbox);
                }
            }
        }
        for route in &net.routes {
            for c in route.cells() {
                self.mark_source(grid.idx(c), c, &mut bbox);
            }
        }

        let mut any_target = false;
        for (pos, &n) in net.nodes.iter().enumerate() {
            if connected[pos] {
                continue;
            }
            let node = ctx.netlist.node(n);
            let mut points: Vec<GridCoord> = node
                .points()
                .filter(|&c| self.is_target_point(grid, c, net_id, n))
                .collect();
            if points.is_empty() {
                points = self.escalate_taps(grid, &node.taps, net_id, n);
            }
            if points.is_empty() {
                log::debug!(
                    "Net '{}': node {} has no usable grid point this pass",
                    net.name,
                    n.index()
                );
                continue;
            }
            for c in points {
                let i = grid.idx(c);
                if self.cells[i].has(SOURCE) {
                    return Prepared::Adjacent(n);
                }
                let sc = &mut self.cells[i];
                sc.flags |= TARGET | COST;
                sc.cost = MAXRT;
                self.targets.insert(i, n);
                bbox.include(c);
                any_target = true;
            }
        }

        if self.worklist.is_empty() {
            return Prepared::NoSources;
        }
        if !any_target {
            return Prepared::NoTargets;
        }

        let span = bbox.span();
        let legs = (net.nodes.len() as u32).saturating_sub(1).max(1);
        self.maxcost =
            ((2 * span * ctx.costs.seg + stage.level() * ctx.costs.conflict) / legs).max(1);
        Prepared::Ready
    }

    fn mark_source(&mut self, idx: usize, c: GridCoord, bbox: &mut BoundingBox) {
        let sc = &mut self.cells[idx];
        sc.cost = 0;
        sc.flags |= SOURCE | COST;
        self.worklist.push(idx);
        bbox.include(c);
    }

    fn is_target_point(&self, grid: &DenseGrid, c: GridCoord, net: NetId, node: NodeId) -> bool {
        let cell = grid.cell(c);
        cell.owner == Owner::Net(net)
            && cell.stub != Stub::Unroutable
            && grid.node_saved(c).is_none_or(|s| s == node)
            && self.cells[grid.idx(c)].has(COST)
    }

    /// Last resort for a node with no usable point. In the conflict stage, taps
    /// under another net's wire become conflicted targets. In the strict stage,
    /// taps left under an obstruction are tried, but only when no other net
    /// holds any of them.
    fn escalate_taps(
        &mut self,
        grid: &DenseGrid,
        taps: &[GridCoord],
        net: NetId,
        node: NodeId,
    ) -> Vec<GridCoord> {
        let foreign: Vec<(GridCoord, NetId)> = taps
            .iter()
            .filter_map(|&t| match grid.cell(t).owner {
                Owner::Net(other) if other != net => Some((t, other)),
                _ => None,
            })
            .collect();

        match self.stage {
            Stage::Conflict => {
                let mut covered = Vec::new();
                for (t, other) in foreign {
                    // Another pin sitting on the tap is never taken over.
                    let pinned = grid.node_saved(t).is_some_and(|s| s != node);
                    if pinned || self.noripup.contains(&other) {
                        continue;
                    }
                    let sc = &mut self.cells[grid.idx(t)];
                    sc.flags |= CONFLICT;
                    sc.occupant = Some(other);
                    covered.push(t);
                }
                covered
            }
            Stage::Strict if foreign.is_empty() => taps
                .iter()
                .copied()
                .filter(|&t| grid.cell(t).owner == Owner::Blocked)
                .collect(),
            Stage::Strict => Vec::new(),
        }
    }

    /// Runs passes until a target is settled, the worklist drains, or the pass
    /// budget is spent.
    pub fn expand(&mut self, ctx: &SearchContext) -> SearchOutcome {
        let mut best: Option<(usize, u32)> = None;

        for _ in 0..self.num_passes {
            while let Some(i) = self.worklist.pop() {
                if self.worklist.len() + self.deferred.len() > self.max_points {
                    return SearchOutcome::Capacity;
                }
                let cell = self.cells[i];
                if cell.has(PROCESSED) {
                    continue;
                }
                if cell.has(TARGET) {
                    if best.is_none_or(|(_, c)| cell.cost < c) {
                        best = Some((i, cell.cost));
                    }
                    if cell.cost < self.maxcost {
                        self.maxcost = cell.cost;
                    }
                    self.cells[i].flags |= PROCESSED;
                    continue;
                }
                if !cell.has(SOURCE) && cell.cost > self.maxcost {
                    self.deferred.push(i);
                    continue;
                }
                self.cells[i].flags |= PROCESSED;

                let c = ctx.grid.coord(i);
                let order = if ctx.directions[c.z as usize].is_vertical() {
                    &VERTICAL_ORDER
                } else {
                    &HORIZONTAL_ORDER
                };
                for &d in order {
                    if let Some(n) = ctx.grid.neighbor(c, d) {
                        self.eval(ctx, i, n, d);
                    }
                }
            }

            if let Some((i, cost)) = best {
                if cost <= self.maxcost || self.deferred.is_empty() {
                    return SearchOutcome::Found {
                        target: ctx.grid.coord(i),
                        cost,
                    };
                }
            }
            if self.deferred.is_empty() {
                return SearchOutcome::Exhausted;
            }
            self.maxcost = self.maxcost.saturating_mul(2);
            self.worklist.append(&mut self.deferred);
        }
        SearchOutcome::Exhausted
    }

    fn eval(&mut self, ctx: &SearchContext, from: usize, to: GridCoord, d: Dir) {
        let ti = ctx.grid.idx(to);
        let mut target = self.cells[ti];

        if !target.has(COST) && !target.has(SOURCE) {
            match target.occupant {
                Some(o) if self.stage >= Stage::Conflict && !self.noripup.contains(&o) => {
                    target.flags |= CONFLICT | COST;
                    self.cells[ti].flags = target.flags;
                }
                _ => return,
            }
        }
        if ctx.grid.cell(to).blocks_entry_from(d.opposite()) {
            return;
        }

        let new_cost = self.cells[from]
            .cost
            .saturating_add(self.move_cost(ctx, to, d));
        if new_cost < target.cost {
            let sc = &mut self.cells[ti];
            sc.cost = new_cost;
            sc.pred = Some(d.opposite());
            sc.flags &= !PROCESSED;
            self.worklist.push(ti);
        }
    }

    /// Cost of stepping into `to` by moving in direction `d`.
    pub fn move_cost(&self, ctx: &SearchContext, to: GridCoord, d: Dir) -> u32 {
        let costs = ctx.costs;
        let mut cost = 0;

        let below = to.z.checked_sub(1).map(|z| to.with_layer(z));
        let above = Some(to.with_layer(to.z + 1));
        for c in below.into_iter().chain(above) {
            if !ctx.grid.contains(c) {
                continue;
            }
            if let Some(node) = ctx.grid.node_at(c) {
                let sc = self.cells[ctx.grid.idx(c)];
                if !sc.has(SOURCE) && !sc.has(TARGET) {
                    cost += if ctx.netlist.node(node).taps.len() == 1 {
                        costs.block
                    } else {
                        costs.xver
                    };
                }
            }
        }

        let vertical = ctx.directions[to.z as usize].is_vertical();
        cost += if d.is_via() {
            costs.via
        } else if d.is_horizontal() == vertical {
            costs.jog
        } else {
            costs.seg
        };

        if self.cells[ctx.grid.idx(to)].has(CONFLICT) {
            cost += costs.conflict;
        }
        cost
    }
}

#[derive(Default)]
struct BoundingBox {
    bounds: Option<(u32, u32, u32, u32)>,
}

impl BoundingBox {
    fn include(&mut self, c: GridCoord) {
        self.bounds = Some(match self.bounds {
            None => (c.x, c.x, c.y, c.y),
            Some((x0, x1, y0, y1)) => (x0.min(c.x), x1.max(c.x), y0.min(c.y), y1.max(c.y)),
        });
    }

    fn span(&self) -> u32 {
        match self.bounds {
            None => 0,
            Some((x0, x1, y0, y1)) => (x1 - x0).max(y1 - y0),
        }
    }
}
