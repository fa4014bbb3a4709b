use crate::algo::search::{COST, MAXRT, MazeSearch, SOURCE, Stage};
use crate::error::RouteError;
use crate::grid::dense::ROUTED_OVER;
use crate::grid::{DenseGrid, Dir, Owner, RoutingGrid, Stub};
use crate::netlist::{Netlist, Route, Segment};
use maze_common::db::core::SegmentKind;
use maze_common::db::indices::NetId;
use maze_common::geom::coord::GridCoord;

/// Turns the best target of a finished search into a route of `net`.
/// Strict-stage routes are stamped into the grid right away.
pub fn commit(
    search: &MazeSearch,
    grid: &mut DenseGrid,
    net: NetId,
    target: GridCoord,
    stage: Stage,
    max_stacked: u8,
) -> Result<Route, RouteError> {
    let mut path = trace_path(search, grid, target)?;
    legalize_stacks(&mut path, search, grid, max_stacked);

    let ti = grid.idx(target);
    let node = search
        .target_node(ti)
        .ok_or(RouteError::UnreachedTarget { at: target })?;
    let mut route = Route {
        node,
        segments: coalesce(&path, grid, net),
        cost: search.cell(ti).cost,
        written: false,
    };
    if stage == Stage::Strict {
        writeback(grid, net, &mut route);
    }
    Ok(route)
}

/// Follows predecessor links from `target` to a source. The target comes first.
pub fn trace_path(
    search: &MazeSearch,
    grid: &DenseGrid,
    target: GridCoord,
) -> Result<Vec<GridCoord>, RouteError> {
    let start = search.cell(grid.idx(target));
    if !start.has(COST) || start.cost >= MAXRT {
        return Err(RouteError::UnreachedTarget { at: target });
    }

    let mut path = Vec::new();
    let mut at = target;
    loop {
        path.push(at);
        let cell = search.cell(grid.idx(at));
        if cell.has(SOURCE) {
            return Ok(path);
        }
        let next = cell.pred.and_then(|d| grid.neighbor(at, d));
        match next {
            Some(n) if path.len() <= grid.len() => at = n,
            _ => return Err(RouteError::BrokenPath { from: target, at }),
        }
    }
}

fn stack_height(path: &[GridCoord], from: usize) -> usize {
    let mut h = 0;
    let mut k = from;
    while k + 1 < path.len() && path[k].same_column(&path[k + 1]) && path[k].z != path[k + 1].z {
        h += 1;
        k += 1;
    }
    h
}

/// Lateral neighbor of `at` from which a via to `other_layer` was also reachable.
fn detour(
    search: &MazeSearch,
    grid: &DenseGrid,
    at: GridCoord,
    other_layer: u8,
) -> Option<(GridCoord, GridCoord)> {
    let mut best: Option<(u32, GridCoord)> = None;
    for d in [Dir::East, Dir::West, Dir::North, Dir::South] {
        let Some(n) = grid.neighbor(at, d) else {
            continue;
        };
        let below = n.with_layer(other_layer);
        if !grid.contains(below) {
            continue;
        }
        let a = search.cell(grid.idx(n));
        let b = search.cell(grid.idx(below));
        if a.pred.is_none() || b.pred.is_none() || b.cost >= MAXRT {
            continue;
        }
        if best.is_none_or(|(c, _)| a.cost < c) {
            best = Some((a.cost, n));
        }
    }
    best.map(|(_, n)| (n, n.with_layer(other_layer)))
}

/// Drops immediate back-and-forth moves left behind by a detour.
fn simplify(path: &mut Vec<GridCoord>) {
    let mut j = 0;
    while j + 2 < path.len() {
        if path[j] == path[j + 2] {
            path.drain(j + 1..j + 3);
            j = j.saturating_sub(1);
        } else {
            j += 1;
        }
    }
}

/// Splits via stacks taller than `max_stacked` by moving one contact to a
/// neighboring column. Returns false if some stack could not be broken.
pub fn legalize_stacks(
    path: &mut Vec<GridCoord>,
    search: &MazeSearch,
    grid: &DenseGrid,
    max_stacked: u8,
) -> bool {
    let max = max_stacked.max(1) as usize;
    if max + 1 >= grid.layers() as usize {
        return true;
    }

    let mut legal = true;
    let mut budget = path.len() * 4 + 16;
    let mut i = 0;
    while i < path.len() {
        let h = stack_height(path, i);
        if h <= max {
            i += 1;
            continue;
        }
        if budget == 0 {
            log::warn!("Gave up legalizing via stacks near {}", path[i]);
            return false;
        }
        budget -= 1;

        let (cur, prev, ppre) = (path[i], path[i + 1], path[i + 2]);
        if let Some((a, b)) = detour(search, grid, prev, ppre.z) {
            path.insert(i + 2, a);
            path.insert(i + 3, b);
        } else if let Some((a, b)) = detour(search, grid, cur, prev.z) {
            path.insert(i + 1, a);
            path.insert(i + 2, b);
        } else {
            log::warn!("Via stack of height {} at {} left in place", h, cur);
            legal = false;
            i += h;
            continue;
        }
        simplify(path);
        i = 0;
    }
    legal
}

fn has_offset(grid: &DenseGrid, c: GridCoord, net: NetId) -> bool {
    let cell = grid.cell(c);
    cell.owner == Owner::Net(net)
        && matches!(cell.stub, Stub::OffsetTap | Stub::NorthSouth | Stub::EastWest)
}

/// Merges the point list into maximal straight wires and single vias.
pub fn coalesce(path: &[GridCoord], grid: &DenseGrid, net: NetId) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut i = 0;
    while i + 1 < path.len() {
        let a = path[i];
        let b = path[i + 1];
        if a.z != b.z {
            let mut via = Segment::via(a.z.min(b.z), a.x, a.y);
            via.offset_start = has_offset(grid, via.start(), net);
            via.offset_end = has_offset(grid, via.end(), net);
            segments.push(via);
            i += 1;
            continue;
        }

        let step = delta(a, b);
        let mut j = i + 1;
        while j + 1 < path.len() && path[j + 1].z == a.z && delta(path[j], path[j + 1]) == step {
            j += 1;
        }
        let end = path[j];
        let mut wire = Segment::wire(a.z, a.x, a.y, end.x, end.y);
        wire.offset_start = has_offset(grid, a, net);
        wire.offset_end = has_offset(grid, end, net);
        segments.push(wire);
        i = j;
    }

    // A via sitting on an offset tap drags the wire it meets along with it.
    for k in 0..segments.len() {
        let s = segments[k];
        if s.kind != SegmentKind::Via || !(s.offset_start || s.offset_end) {
            continue;
        }
        for n in [k.wrapping_sub(1), k + 1] {
            let Some(w) = segments.get_mut(n) else {
                continue;
            };
            if w.kind != SegmentKind::Wire {
                continue;
            }
            if w.start().same_column(&s.start()) {
                w.offset_start = true;
            }
            if w.end().same_column(&s.start()) {
                w.offset_end = true;
            }
        }
    }
    segments
}

fn delta(a: GridCoord, b: GridCoord) -> (i64, i64) {
    (b.x as i64 - a.x as i64, b.y as i64 - a.y as i64)
}

/// Claims every cell of `route` for `net`, remembering cells that were blocked.
pub fn writeback(grid: &mut DenseGrid, net: NetId, route: &mut Route) {
    for c in route.cells() {
        let cell = grid.cell_mut(c);
        match cell.owner {
            Owner::Net(n) if n == net => {}
            Owner::Blocked => {
                cell.owner = Owner::Net(net);
                cell.flags |= ROUTED_OVER;
            }
            _ => cell.owner = Owner::Net(net),
        }
    }
    route.written = true;
}

/// Removes every written route of `net` from the grid and forgets all routes.
/// Terminal cells are left untouched.
pub fn ripup(grid: &mut DenseGrid, netlist: &mut Netlist, net_id: NetId) -> Result<(), RouteError> {
    let net = netlist.net(net_id);
    for route in net.routes.iter().filter(|r| r.written) {
        for c in route.cells() {
            if grid.node_saved(c).is_some() {
                continue;
            }
            let cell = grid.cell_mut(c);
            match cell.owner {
                Owner::Net(n) if n == net_id => {
                    if cell.flags & ROUTED_OVER != 0 {
                        cell.owner = Owner::Blocked;
                        cell.flags &= !ROUTED_OVER;
                    } else {
                        cell.owner = Owner::Free;
                    }
                }
                Owner::Net(_) => {
                    return Err(RouteError::OwnershipMismatch {
                        net: net.name.clone(),
                        at: c,
                    });
                }
                Owner::Free | Owner::Blocked => {}
            }
        }
    }

    for &n in &net.nodes {
        for &t in &netlist.node(n).taps {
            if grid.node_saved(t) == Some(n) {
                grid.set_node_at(t, Some(n));
            }
        }
    }
    netlist.net_mut(net_id).routes.clear();
    Ok(())
}

/// Other nets whose cells the routes of `net` run over, in order of discovery.
pub fn find_colliding(grid: &DenseGrid, netlist: &Netlist, net: NetId) -> Vec<NetId> {
    let mut found = Vec::new();
    for c in netlist.net(net).cells() {
        if let Owner::Net(other) = grid.cell(c).owner {
            if other != net && !found.contains(&other) {
                found.push(other);
            }
        }
    }
    found
}
