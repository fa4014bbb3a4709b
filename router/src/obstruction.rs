use crate::error::RouteError;
use crate::grid::dense::{OBSTRUCT_MASK, blocked_flag, obstruct_flag};
use crate::grid::{Cell, DenseGrid, Dir, Owner, RoutingGrid, Stub};
use crate::netlist::{Net, Netlist, Node};
use crate::utils::conversion::GridConverter;
use maze_common::db::core::{LayerData, LayerDirection, NetlistDB};
use maze_common::db::indices::{CellId, NetId, NodeId};
use maze_common::geom::coord::GridCoord;
use maze_common::geom::point::Point;
use maze_common::geom::rect::Rect;
use maze_common::util::config::DetailedRoutingConfig;

const MAX_GRID_POINTS: u64 = 2_000_000_000;

/// Everything the search needs, derived once from the placed design.
pub struct RoutingModel {
    pub grid: DenseGrid,
    pub netlist: Netlist,
    pub converter: GridConverter,
    pub directions: Vec<LayerDirection>,
}

pub fn build(db: &NetlistDB, config: &DetailedRoutingConfig) -> Result<RoutingModel, RouteError> {
    if db.layers.is_empty() {
        return Err(RouteError::NoLayers);
    }
    for layer in &db.layers {
        if !(layer.pitch_x > 0.0 && layer.pitch_y > 0.0) {
            return Err(RouteError::ZeroPitch {
                layer: layer.name.clone(),
            });
        }
    }
    let die = db.die_area;
    if !(die.width() > 0.0 && die.height() > 0.0) {
        return Err(RouteError::EmptyDie);
    }

    let step_x = db.layers.iter().map(|l| l.pitch_x).fold(f64::INFINITY, f64::min);
    let step_y = db.layers.iter().map(|l| l.pitch_y).fold(f64::INFINITY, f64::min);
    let w = GridConverter::channels(die.width(), step_x);
    let h = GridConverter::channels(die.height(), step_y);
    let layers = db.layers.len();

    let points = w as u64 * h as u64 * layers as u64;
    if points > MAX_GRID_POINTS {
        return Err(RouteError::GridTooLarge { points });
    }

    log::info!(
        "Routing grid: {}x{} tracks on {} layers (pitch {:.3} x {:.3})",
        w,
        h,
        layers,
        step_x,
        step_y
    );

    let mut builder = ModelBuilder {
        grid: DenseGrid::new(&vec![(w, h); layers]),
        converter: GridConverter::new(die.min, step_x, step_y, w, h),
        keepouts: db.layers.iter().map(LayerData::route_keepout).collect(),
    };

    for i in 0..db.num_cells() {
        let cell = CellId::new(i);
        let shapes = db
            .cell_obstructions(cell)
            .into_iter()
            .chain(db.unconnected_pin_shapes(cell));
        for shape in shapes {
            match shape.layer {
                Some(l) if (l as usize) < layers => builder.mark_obstruction(l, &shape.rect),
                _ => log::debug!(
                    "Skipping blockage of '{}' on a non-routing layer",
                    db.cells[i].name
                ),
            }
        }
    }

    builder.block_coarse_tracks(&db.layers);

    let mut netlist = builder.build_nodes(db);

    for (rank, name) in config.critical_nets.iter().enumerate() {
        match db.net_name_map.get(name) {
            Some(&id) => {
                let net = netlist.net_mut(id);
                net.critical = net.critical.or(Some(rank));
            }
            None => log::warn!("Critical net '{}' not found in design", name),
        }
    }
    for name in &config.dont_route {
        match db.net_name_map.get(name) {
            Some(&id) => netlist.net_mut(id).skip = true,
            None => log::warn!("Do-not-route net '{}' not found in design", name),
        }
    }

    Ok(RoutingModel {
        grid: builder.grid,
        netlist,
        converter: builder.converter,
        directions: db.layers.iter().map(|l| l.direction).collect(),
    })
}

struct ModelBuilder {
    grid: DenseGrid,
    converter: GridConverter,
    keepouts: Vec<f64>,
}

impl ModelBuilder {
    fn points(&self, layer: u8, r: &Rect) -> Vec<GridCoord> {
        let Some((xs, ys)) = self.converter.span(r) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for x in xs {
            for y in ys.clone() {
                out.push(GridCoord::new(x, y, layer));
            }
        }
        out
    }

    /// Blocks every point within keepout of `rect`. Points outside the rectangle
    /// remember the nearest side and their clearance from it.
    fn mark_obstruction(&mut self, layer: u8, rect: &Rect) {
        let k = self.keepouts[layer as usize];
        for c in self.points(layer, &rect.expand(k)) {
            let cell = self.grid.cell(c);
            if matches!(cell.owner, Owner::Net(_)) {
                continue;
            }
            let p = self.converter.to_world(c);
            match nearest_side(rect, p) {
                None => {
                    *self.grid.cell_mut(c) = Cell {
                        owner: Owner::Blocked,
                        stub: Stub::None,
                        flags: cell.flags & !OBSTRUCT_MASK,
                    };
                    self.grid.set_stub_distance(c, 0.0);
                }
                Some((side, gap)) => {
                    let tighter = cell.obstruct_side().is_some()
                        && (gap as f32) < self.grid.stub_distance(c);
                    if cell.owner == Owner::Free || tighter {
                        *self.grid.cell_mut(c) = Cell {
                            owner: Owner::Blocked,
                            stub: Stub::None,
                            flags: (cell.flags & !OBSTRUCT_MASK) | obstruct_flag(side),
                        };
                        self.grid.set_stub_distance(c, gap as f32);
                    }
                }
            }
        }
    }

    /// Keeps only every Nth track of layers coarser than the shared lattice.
    fn block_coarse_tracks(&mut self, layers: &[LayerData]) {
        let step_x = self.converter.step_x();
        let step_y = self.converter.step_y();
        for layer in layers {
            let (ratio, vertical) = match layer.direction {
                LayerDirection::Vertical => ((layer.pitch_x / step_x).round() as u32, true),
                LayerDirection::Horizontal => ((layer.pitch_y / step_y).round() as u32, false),
                LayerDirection::Unknown => continue,
            };
            if ratio <= 1 {
                continue;
            }
            log::debug!(
                "Layer {} pitch is {}x the grid; blocking intermediate tracks",
                layer.name,
                ratio
            );
            let l = layer.index;
            for x in 0..self.grid.width(l) {
                for y in 0..self.grid.height(l) {
                    let track = if vertical { x } else { y };
                    let c = GridCoord::new(x, y, l);
                    if track % ratio != 0 && self.grid.cell(c).owner == Owner::Free {
                        self.grid.set_owner(c, Owner::Blocked);
                    }
                }
            }
        }
    }

    fn build_nodes(&mut self, db: &NetlistDB) -> Netlist {
        let layers = self.grid.layers();
        let mut netlist = Netlist::default();

        for (i, data) in db.nets.iter().enumerate() {
            let net_id = NetId::new(i);
            let mut net = Net::new(net_id, &data.name);

            for &pin in &data.pins {
                let mut shapes: Vec<(u8, Rect)> = Vec::new();
                for s in &db.pin_shapes[pin.index()] {
                    match s.layer {
                        Some(l) if l < layers => shapes.push((l, s.rect)),
                        _ => log::warn!(
                            "Pin {} of net '{}' has a shape without a routing layer; dropped",
                            db.pin_label(pin),
                            data.name
                        ),
                    }
                }
                if shapes.is_empty() {
                    log::warn!(
                        "Pin {} of net '{}' has no routable geometry; net loses this terminal",
                        db.pin_label(pin),
                        data.name
                    );
                    continue;
                }

                let node_id = NodeId::new(netlist.nodes.len());
                let mut node = Node {
                    id: node_id,
                    net: net_id,
                    taps: Vec::new(),
                    extends: Vec::new(),
                    position: shapes[0].1.center(),
                };
                for (l, r) in &shapes {
                    for c in self.points(*l, r) {
                        if !node.taps.contains(&c) {
                            node.taps.push(c);
                        }
                    }
                }
                for (l, r) in &shapes {
                    let k = self.keepouts[*l as usize];
                    for c in self.points(*l, &r.expand(k)) {
                        if !node.taps.contains(&c) && !node.extends.contains(&c) {
                            node.extends.push(c);
                        }
                    }
                }

                for &t in &node.taps {
                    self.mark_tap(t, net_id, node_id);
                }
                for (l, r) in &shapes {
                    self.mark_halo(*l, r, net_id, node_id);
                }

                net.nodes.push(node_id);
                netlist.nodes.push(node);
            }
            netlist.nets.push(net);
        }
        netlist
    }

    fn mark_tap(&mut self, c: GridCoord, net: NetId, node: NodeId) {
        let cell = self.grid.cell(c);
        if let Owner::Net(other) = cell.owner {
            if other != net && !cell.stub.is_halo() && self.grid.node_saved(c).is_some() {
                log::warn!("Pins of two nets overlap at {}; keeping the first", c);
                return;
            }
        }

        let (stub, dist, flags) = match (cell.owner, cell.obstruct_side()) {
            (Owner::Blocked, Some(side)) => {
                let k = self.keepouts[c.z as usize];
                let shift = (k - self.grid.stub_distance(c) as f64).max(0.0);
                let signed = match side {
                    Dir::East | Dir::North => -shift,
                    _ => shift,
                };
                (Stub::OffsetTap, signed as f32, cell.flags | blocked_flag(side))
            }
            _ => (Stub::None, 0.0, cell.flags),
        };
        *self.grid.cell_mut(c) = Cell {
            owner: Owner::Net(net),
            stub,
            flags,
        };
        self.grid.set_stub_distance(c, dist);
        self.grid.attach_node(c, Some(node));

        // A halo of another net directly above a pin would hide the pin from vias.
        if c.z + 1 < self.grid.layers() {
            let up = c.with_layer(c.z + 1);
            let above = self.grid.cell(up);
            if above.stub.is_halo() && above.owner != Owner::Net(net) {
                *self.grid.cell_mut(up) = Cell {
                    owner: Owner::Free,
                    stub: Stub::None,
                    flags: above.flags,
                };
                self.grid.set_stub_distance(up, 0.0);
                self.grid.attach_node(up, None);
            }
        }
    }

    fn mark_halo(&mut self, layer: u8, rect: &Rect, net: NetId, node: NodeId) {
        let k = self.keepouts[layer as usize];
        for c in self.points(layer, &rect.expand(k)) {
            let p = self.converter.to_world(c);
            if rect.contains(p) {
                continue;
            }
            let cell = self.grid.cell(c);
            let below = if layer > 0 {
                self.grid.node_saved(c.with_layer(layer - 1))
            } else {
                None
            };

            if cell.owner == Owner::Free
                && cell.stub == Stub::None
                && self.grid.node_saved(c).is_none()
                && below.is_none()
            {
                let (stub, dist) = classify_stub(rect, p, k);
                *self.grid.cell_mut(c) = Cell {
                    owner: Owner::Net(net),
                    stub,
                    flags: cell.flags,
                };
                self.grid.set_stub_distance(c, dist);
                self.grid.attach_node(c, Some(node));
            } else if cell.stub.is_halo() && cell.owner != Owner::Net(net) {
                // Two nets' halos meet here.
                *self.grid.cell_mut(c) = Cell {
                    owner: Owner::Blocked,
                    stub: Stub::None,
                    flags: cell.flags,
                };
                self.grid.set_stub_distance(c, 0.0);
                self.grid.attach_node(c, None);
            }
        }
    }
}

/// Side of `rect` facing `p`, with the clearance along that axis. `None` inside.
fn nearest_side(rect: &Rect, p: Point<f64>) -> Option<(Dir, f64)> {
    let gaps = [
        (Dir::East, rect.min.x - p.x),
        (Dir::West, p.x - rect.max.x),
        (Dir::North, rect.min.y - p.y),
        (Dir::South, p.y - rect.max.y),
    ];
    let mut best: Option<(Dir, f64)> = None;
    for (side, gap) in gaps {
        if gap > 0.0 && best.is_none_or(|(_, g)| gap > g) {
            best = Some((side, gap));
        }
    }
    best
}

fn classify_stub(rect: &Rect, p: Point<f64>, k: f64) -> (Stub, f32) {
    let center = rect.center();
    if p.y >= rect.min.y && p.y <= rect.max.y {
        (Stub::EastWest, (center.x - p.x).clamp(-k, k) as f32)
    } else if p.x >= rect.min.x && p.x <= rect.max.x {
        (Stub::NorthSouth, (center.y - p.y).clamp(-k, k) as f32)
    } else {
        (Stub::Unroutable, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{add_blockage, add_pin, design};
    use maze_common::db::core::LayerRect;

    fn model(db: &NetlistDB) -> RoutingModel {
        build(db, &DetailedRoutingConfig::default()).unwrap()
    }

    #[test]
    fn zero_pitch_is_fatal() {
        let mut db = design(10.0);
        db.layers[1].pitch_x = 0.0;
        assert!(matches!(
            build(&db, &DetailedRoutingConfig::default()),
            Err(RouteError::ZeroPitch { .. })
        ));
    }

    #[test]
    fn missing_layers_are_fatal() {
        let mut db = design(10.0);
        db.layers.clear();
        assert!(matches!(
            build(&db, &DetailedRoutingConfig::default()),
            Err(RouteError::NoLayers)
        ));
    }

    #[test]
    fn channels_cover_the_die() {
        let m = model(&design(10.0));
        assert_eq!(m.grid.width(0), 11);
        assert_eq!(m.grid.height(1), 11);
        assert_eq!(m.grid.layers(), 2);
    }

    #[test]
    fn blockage_band_records_nearest_side() {
        let mut db = design(10.0);
        db.layers[0].keepout = Some(1.0);
        add_blockage(&mut db, 0, Rect::from_corners(3.8, 3.8, 4.2, 4.2));
        let m = model(&db);
        let g = &m.grid;

        let inner = g.cell(GridCoord::new(4, 4, 0));
        assert_eq!(inner.owner, Owner::Blocked);
        assert_eq!(inner.obstruct_side(), None);
        assert_eq!(g.cell(GridCoord::new(3, 4, 0)).obstruct_side(), Some(Dir::East));
        assert_eq!(g.cell(GridCoord::new(5, 4, 0)).obstruct_side(), Some(Dir::West));
        assert_eq!(g.cell(GridCoord::new(4, 5, 0)).obstruct_side(), Some(Dir::South));
        assert!((g.stub_distance(GridCoord::new(4, 3, 0)) - 0.8).abs() < 1e-5);
        assert_eq!(g.cell(GridCoord::new(2, 4, 0)).owner, Owner::Free);
        assert_eq!(g.cell(GridCoord::new(4, 4, 1)).owner, Owner::Free);
    }

    #[test]
    fn taps_and_halo_get_stubs() {
        let mut db = design(10.0);
        db.layers[0].keepout = Some(1.0);
        add_pin(&mut db, "a", 2, 2, 0);
        add_pin(&mut db, "a", 8, 8, 0);
        let m = model(&db);
        let g = &m.grid;
        let net = NetId::new(0);

        let node = &m.netlist.nodes[0];
        assert_eq!(node.taps, vec![GridCoord::new(2, 2, 0)]);
        assert_eq!(node.extends.len(), 8);
        assert_eq!(g.node_saved(GridCoord::new(2, 2, 0)), Some(node.id));

        let east = GridCoord::new(1, 2, 0);
        assert_eq!(g.cell(east).owner, Owner::Net(net));
        assert_eq!(g.cell(east).stub, Stub::EastWest);
        assert!((g.stub_distance(east) - 1.0).abs() < 1e-5);

        let north = GridCoord::new(2, 3, 0);
        assert_eq!(g.cell(north).stub, Stub::NorthSouth);
        assert!((g.stub_distance(north) + 1.0).abs() < 1e-5);

        assert_eq!(g.cell(GridCoord::new(1, 1, 0)).stub, Stub::Unroutable);
    }

    #[test]
    fn overlapping_halos_of_two_nets_are_blocked() {
        let mut db = design(10.0);
        db.layers[0].keepout = Some(1.0);
        add_pin(&mut db, "a", 2, 2, 0);
        add_pin(&mut db, "b", 4, 2, 0);
        let m = model(&db);
        let shared = GridCoord::new(3, 2, 0);
        assert_eq!(m.grid.cell(shared).owner, Owner::Blocked);
        assert_eq!(m.grid.cell(shared).stub, Stub::None);
        assert_eq!(m.grid.node_saved(shared), None);
        assert_eq!(m.grid.cell(GridCoord::new(1, 2, 0)).owner, Owner::Net(NetId::new(0)));
        assert_eq!(m.grid.cell(GridCoord::new(5, 2, 0)).owner, Owner::Net(NetId::new(1)));
    }

    #[test]
    fn pin_inside_keepout_band_becomes_offset_tap() {
        let mut db = design(10.0);
        db.layers[0].keepout = Some(1.0);
        add_blockage(&mut db, 0, Rect::from_corners(4.5, 1.5, 5.5, 2.5));
        add_pin(&mut db, "a", 4, 2, 0);
        let m = model(&db);
        let tap = GridCoord::new(4, 2, 0);
        let cell = m.grid.cell(tap);
        assert_eq!(cell.owner, Owner::Net(NetId::new(0)));
        assert_eq!(cell.stub, Stub::OffsetTap);
        assert!(cell.blocks_entry_from(Dir::East));
        assert!((m.grid.stub_distance(tap) + 0.5).abs() < 1e-5);
    }

    #[test]
    fn coarse_layer_keeps_every_other_track() {
        let mut db = design(10.0);
        db.layers[1].pitch_x = 2.0;
        let m = model(&db);
        assert_eq!(m.grid.cell(GridCoord::new(1, 5, 1)).owner, Owner::Blocked);
        assert_eq!(m.grid.cell(GridCoord::new(2, 5, 1)).owner, Owner::Free);
        assert_eq!(m.grid.cell(GridCoord::new(1, 5, 0)).owner, Owner::Free);
    }

    #[test]
    fn shapes_without_layer_are_dropped() {
        let mut db = design(10.0);
        add_pin(&mut db, "a", 2, 2, 0);
        let net = db.add_net("a");
        let r = Rect::from_corners(6.9, 6.9, 7.1, 7.1);
        db.add_io_pin("floating", net, vec![LayerRect { layer: None, rect: r }]);
        let m = model(&db);
        assert_eq!(m.netlist.nets[0].nodes.len(), 1);
        assert!(!m.netlist.nets[0].is_routable());
    }

    #[test]
    fn name_lists_mark_critical_and_skipped_nets() {
        let mut db = design(10.0);
        add_pin(&mut db, "a", 1, 1, 0);
        add_pin(&mut db, "b", 3, 3, 0);
        let config = DetailedRoutingConfig {
            critical_nets: vec!["b".into(), "a".into()],
            dont_route: vec!["a".into(), "missing".into()],
            ..Default::default()
        };
        let m = build(&db, &config).unwrap();
        assert_eq!(m.netlist.nets[1].critical, Some(0));
        assert_eq!(m.netlist.nets[0].critical, Some(1));
        assert!(m.netlist.nets[0].skip);
    }
}
