use crate::algo::search::{CostTable, MazeSearch, Prepared, SearchContext, SearchOutcome, Stage};
use crate::commit;
use crate::error::RouteError;
use crate::grid::{DenseGrid, Dir, Owner, RoutingGrid, Stub};
use crate::netlist::{NetStatus, Netlist, Route, Segment};
use crate::obstruction::{self, RoutingModel};
use crate::order;
use crate::utils::conversion::GridConverter;
use maze_common::db::core::{LayerDirection, NetlistDB, RouteSegment, SegmentKind};
use maze_common::db::indices::{NetId, NodeId};
use maze_common::geom::coord::GridCoord;
use maze_common::geom::point::Point;
use maze_common::util::config::DetailedRoutingConfig;
use maze_common::util::profiler::ScopedTimer;
use std::collections::VecDeque;

/// Result of one search from the routed part of a net toward one more node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LegOutcome {
    Connected,
    /// Nothing left to connect.
    Complete,
    Failed,
    /// A node of the net has no grid points.
    Fatal(NodeId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetOutcome {
    Routed,
    Failed,
    Unroutable,
}

#[derive(Clone, Debug)]
pub struct AbandonedNet {
    pub name: String,
    /// Physical positions of the net's terminals.
    pub endpoints: Vec<Point<f64>>,
}

#[derive(Clone, Debug, Default)]
pub struct RouteReport {
    pub attempted: usize,
    pub routed: usize,
    /// Routed nets still sharing cells with another net.
    pub conflicted: Vec<String>,
    pub abandoned: Vec<AbandonedNet>,
    /// Routes committed over the whole run, including ones later ripped up.
    pub total_routes: usize,
}

impl RouteReport {
    pub fn log_summary(&self) {
        log::info!(
            "Routing summary: {} attempted, {} routed, {} conflicted, {} abandoned, {} routes committed",
            self.attempted,
            self.routed,
            self.conflicted.len(),
            self.abandoned.len(),
            self.total_routes
        );
        for name in &self.conflicted {
            log::warn!("Net '{}' routed with unresolved conflicts", name);
        }
        for net in &self.abandoned {
            let ends: Vec<String> = net
                .endpoints
                .iter()
                .map(|p| format!("({:.3}, {:.3})", p.x, p.y))
                .collect();
            log::warn!("Net '{}' abandoned; terminals {}", net.name, ends.join(" "));
        }
    }
}

/// Routing context for one run: the occupancy grid, the nets, and the
/// rip-up queue.
pub struct Router {
    pub grid: DenseGrid,
    pub netlist: Netlist,
    converter: GridConverter,
    directions: Vec<LayerDirection>,
    config: DetailedRoutingConfig,
    costs: CostTable,
    search: MazeSearch,
    failed: VecDeque<NetId>,
    attempted: usize,
    total_routes: usize,
}

impl Router {
    pub fn new(model: RoutingModel, config: &DetailedRoutingConfig) -> Self {
        Self {
            grid: model.grid,
            netlist: model.netlist,
            converter: model.converter,
            directions: model.directions,
            config: config.clone(),
            costs: CostTable::from(config),
            search: MazeSearch::new(config),
            failed: VecDeque::new(),
            attempted: 0,
            total_routes: 0,
        }
    }

    pub fn run(&mut self) -> Result<(), RouteError> {
        let mut critical: Vec<(usize, NetId)> = self
            .netlist
            .nets
            .iter()
            .filter_map(|n| n.critical.map(|rank| (rank, n.id)))
            .collect();
        critical.sort_unstable();
        let critical: Vec<NetId> = critical.into_iter().map(|(_, id)| id).collect();
        let order = order::assign(&mut self.netlist, &critical);

        {
            let _t = ScopedTimer::new("Initial routing");
            self.initial_pass(&order)?;
        }
        if !self.failed.is_empty() {
            let _t = ScopedTimer::new("Rip-up and reroute");
            self.second_stage()?;
        }
        Ok(())
    }

    pub fn failed_queue(&self) -> &VecDeque<NetId> {
        &self.failed
    }

    fn endpoints(&self, id: NetId) -> String {
        self.netlist
            .net(id)
            .nodes
            .iter()
            .map(|&n| {
                let p = self.netlist.node(n).position;
                format!("({:.3}, {:.3})", p.x, p.y)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn route_leg(&mut self, id: NetId, stage: Stage) -> Result<LegOutcome, RouteError> {
        let ctx = SearchContext {
            grid: &self.grid,
            netlist: &self.netlist,
            directions: &self.directions,
            costs: &self.costs,
        };
        match self.search.prepare(&ctx, id, stage) {
            Prepared::Complete => {
                for &n in &self.netlist.net(id).nodes {
                    for &t in &self.netlist.node(n).taps {
                        if self.grid.node_saved(t) == Some(n) {
                            self.grid.set_node_at(t, None);
                        }
                    }
                }
                Ok(LegOutcome::Complete)
            }
            Prepared::NodeFatal(n) => Ok(LegOutcome::Fatal(n)),
            Prepared::NoSources | Prepared::NoTargets => {
                log::debug!(
                    "Net '{}' has no usable sources or targets at {:?} stage",
                    self.netlist.net(id).name,
                    stage
                );
                Ok(LegOutcome::Failed)
            }
            Prepared::Adjacent(node) => {
                self.netlist.net_mut(id).routes.push(Route {
                    node,
                    segments: Vec::new(),
                    cost: 0,
                    written: stage == Stage::Strict,
                });
                self.total_routes += 1;
                Ok(LegOutcome::Connected)
            }
            Prepared::Ready => match self.search.expand(&ctx) {
                SearchOutcome::Found { target, .. } => {
                    let route = commit::commit(
                        &self.search,
                        &mut self.grid,
                        id,
                        target,
                        stage,
                        self.config.stacked_contacts,
                    )?;
                    self.netlist.net_mut(id).routes.push(route);
                    self.total_routes += 1;
                    Ok(LegOutcome::Connected)
                }
                SearchOutcome::Exhausted => {
                    log::debug!(
                        "Net '{}' failed at {:?} stage between {}",
                        self.netlist.net(id).name,
                        stage,
                        self.endpoints(id)
                    );
                    Ok(LegOutcome::Failed)
                }
                SearchOutcome::Capacity => {
                    log::warn!(
                        "Net '{}' exceeded {} search points",
                        self.netlist.net(id).name,
                        self.config.max_search_points
                    );
                    Ok(LegOutcome::Failed)
                }
            },
        }
    }

    /// Connects legs until the net is complete or a leg fails.
    pub fn route_net(&mut self, id: NetId, stage: Stage) -> Result<NetOutcome, RouteError> {
        loop {
            match self.route_leg(id, stage)? {
                LegOutcome::Connected => continue,
                LegOutcome::Complete => return Ok(NetOutcome::Routed),
                LegOutcome::Failed => return Ok(NetOutcome::Failed),
                LegOutcome::Fatal(node) => {
                    log::warn!(
                        "Net '{}': node {} has no grid points",
                        self.netlist.net(id).name,
                        node.index()
                    );
                    return Ok(NetOutcome::Unroutable);
                }
            }
        }
    }

    pub fn initial_pass(&mut self, order: &[NetId]) -> Result<(), RouteError> {
        for &id in order {
            if !self.netlist.net(id).is_routable() {
                continue;
            }
            self.attempted += 1;
            match self.route_net(id, Stage::Strict)? {
                NetOutcome::Routed => self.netlist.net_mut(id).status = NetStatus::Routed,
                NetOutcome::Failed => {
                    self.netlist.net_mut(id).status = NetStatus::Failed;
                    self.failed.push_back(id);
                }
                NetOutcome::Unroutable => self.abandon(id)?,
            }
        }
        log::info!(
            "Initial pass: {} of {} nets need rip-up",
            self.failed.len(),
            self.attempted
        );
        Ok(())
    }

    pub fn second_stage(&mut self) -> Result<(), RouteError> {
        let initial = self.failed.len();
        let window = (initial * self.config.stall_budget_factor).max(8);
        let mut checkpoint = initial;
        let mut pops = 0usize;

        while let Some(id) = self.failed.pop_front() {
            if self.netlist.net(id).status == NetStatus::Abandoned {
                continue;
            }
            pops += 1;
            if pops % window == 0 {
                let remaining = self.failed.len() + 1;
                if remaining * 2 > checkpoint {
                    log::warn!(
                        "Rip-up stalled with {} nets pending after {} attempts; giving up",
                        remaining,
                        pops
                    );
                    self.abandon(id)?;
                    while let Some(rest) = self.failed.pop_front() {
                        if self.netlist.net(rest).status != NetStatus::Abandoned {
                            self.abandon(rest)?;
                        }
                    }
                    break;
                }
                checkpoint = remaining;
            }
            self.reroute(id)?;
        }
        Ok(())
    }

    /// One rip-up attempt for a failed net.
    fn reroute(&mut self, id: NetId) -> Result<(), RouteError> {
        if self.route_net(id, Stage::Strict)? == NetOutcome::Routed {
            self.netlist.net_mut(id).status = NetStatus::Routed;
            return Ok(());
        }

        let mut outcome = self.route_net(id, Stage::Conflict)?;
        let net = self.netlist.net(id);
        if outcome == NetOutcome::Failed && !net.noripup.is_empty() && !net.pending {
            log::debug!("Net '{}': clearing its protected set and retrying", net.name);
            let net = self.netlist.net_mut(id);
            net.noripup.clear();
            net.pending = true;
            outcome = self.route_net(id, Stage::Conflict)?;
        }
        if outcome != NetOutcome::Routed {
            self.abandon(id)?;
            self.failed.retain(|&n| n != id);
            return Ok(());
        }

        for victim in commit::find_colliding(&self.grid, &self.netlist, id) {
            log::debug!(
                "Net '{}' evicts net '{}'",
                self.netlist.net(id).name,
                self.netlist.net(victim).name
            );
            commit::ripup(&mut self.grid, &mut self.netlist, victim)?;
            self.netlist.net_mut(victim).status = NetStatus::Failed;
            if !self.failed.contains(&victim) {
                self.failed.push_back(victim);
            }
            self.netlist.net_mut(id).noripup.insert(victim);
        }

        let net = &mut self.netlist.nets[id.index()];
        for route in net.routes.iter_mut().filter(|r| !r.written) {
            commit::writeback(&mut self.grid, id, route);
        }
        net.status = NetStatus::Routed;
        Ok(())
    }

    fn abandon(&mut self, id: NetId) -> Result<(), RouteError> {
        commit::ripup(&mut self.grid, &mut self.netlist, id)?;
        let net = self.netlist.net_mut(id);
        net.status = NetStatus::Abandoned;
        log::warn!("Net '{}' abandoned", net.name);
        Ok(())
    }

    pub fn report(&self) -> RouteReport {
        let mut report = RouteReport {
            attempted: self.attempted,
            total_routes: self.total_routes,
            ..Default::default()
        };
        for net in &self.netlist.nets {
            match net.status {
                NetStatus::Routed => {
                    report.routed += 1;
                    if !commit::find_colliding(&self.grid, &self.netlist, net.id).is_empty() {
                        report.conflicted.push(net.name.clone());
                    }
                }
                NetStatus::Abandoned => report.abandoned.push(AbandonedNet {
                    name: net.name.clone(),
                    endpoints: net
                        .nodes
                        .iter()
                        .map(|&n| self.netlist.node(n).position)
                        .collect(),
                }),
                NetStatus::Unrouted | NetStatus::Failed => {}
            }
        }
        report
    }

    /// Writes the committed routes back to the design in physical units.
    pub fn export(&self, db: &mut NetlistDB) {
        for net in &self.netlist.nets {
            let mut out = Vec::new();
            for seg in net.routes.iter().flat_map(|r| r.segments.iter()) {
                self.export_segment(net.id, seg, &mut out);
            }
            db.nets[net.id.index()].route_segments = out;
        }
    }

    fn export_segment(&self, net: NetId, seg: &Segment, out: &mut Vec<RouteSegment>) {
        let start = seg.start();
        let end = seg.end();
        let mut p1 = self.converter.to_world(start);
        let mut p2 = self.converter.to_world(end);

        let shift_start = if seg.offset_start { self.tap_shift(start) } else { None };
        let shift_end = if seg.offset_end { self.tap_shift(end) } else { None };
        match seg.kind {
            SegmentKind::Wire => {
                if let Some(d) = shift_start {
                    p1 = p1 + d;
                }
                if let Some(d) = shift_end {
                    p2 = p2 + d;
                }
            }
            SegmentKind::Via => {
                if let Some(d) = shift_start.or(shift_end) {
                    p1 = p1 + d;
                    p2 = p2 + d;
                }
            }
        }

        out.push(RouteSegment {
            kind: seg.kind,
            layer: seg.layer,
            start,
            end,
            p1,
            p2,
            offset_start: seg.offset_start,
            offset_end: seg.offset_end,
        });

        for (flagged, c) in [(seg.offset_start, start), (seg.offset_end, end)] {
            if flagged {
                if let Some(stub) = self.halo_stub(net, c) {
                    out.push(stub);
                }
            }
        }
    }

    /// Shift of an offset tap in the column of `c`, away from its obstruction.
    fn tap_shift(&self, c: GridCoord) -> Option<Point<f64>> {
        let layers = [Some(c.z), c.z.checked_sub(1), c.z.checked_add(1)];
        for z in layers.into_iter().flatten() {
            let at = c.with_layer(z);
            if !self.grid.contains(at) {
                continue;
            }
            let cell = self.grid.cell(at);
            if cell.stub != Stub::OffsetTap {
                continue;
            }
            let d = self.grid.stub_distance(at) as f64;
            return Some(match cell.obstruct_side() {
                Some(Dir::North) | Some(Dir::South) => Point::new(0.0, d),
                _ => Point::new(d, 0.0),
            });
        }
        None
    }

    /// Short wire from a halo point of `net` toward its pin.
    fn halo_stub(&self, net: NetId, c: GridCoord) -> Option<RouteSegment> {
        let cell = self.grid.cell(c);
        if cell.owner != Owner::Net(net) {
            return None;
        }
        let d = self.grid.stub_distance(c) as f64;
        let shift = match cell.stub {
            Stub::NorthSouth => Point::new(0.0, d),
            Stub::EastWest => Point::new(d, 0.0),
            _ => return None,
        };
        let p = self.converter.to_world(c);
        Some(RouteSegment {
            kind: SegmentKind::Wire,
            layer: c.z,
            start: c,
            end: c,
            p1: p,
            p2: p + shift,
            offset_start: false,
            offset_end: true,
        })
    }
}

/// Routes every net of `db` and stores the resulting wiring on it.
pub fn run(db: &mut NetlistDB, config: &DetailedRoutingConfig) -> Result<RouteReport, RouteError> {
    log::info!("Starting maze routing of {} nets", db.num_nets());

    let model = {
        let _t = ScopedTimer::new("Routing model");
        obstruction::build(db, config)?
    };
    let mut router = Router::new(model, config);
    router.run()?;

    crate::check::run(&router.netlist)?;
    router.export(db);

    let report = router.report();
    report.log_summary();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{add_blockage, add_pin, design, layered_design};
    use maze_common::geom::rect::Rect;

    fn router(db: &NetlistDB) -> Router {
        let config = DetailedRoutingConfig::default();
        Router::new(obstruction::build(db, &config).unwrap(), &config)
    }

    /// One layer, a wall at x = 5 with a single gap at y = 5 that both nets need.
    fn contested_gap() -> NetlistDB {
        let mut db = layered_design(10.0, 1);
        add_blockage(&mut db, 0, Rect::from_corners(4.9, -0.5, 5.1, 4.5));
        add_blockage(&mut db, 0, Rect::from_corners(4.9, 5.5, 5.1, 10.5));
        add_pin(&mut db, "a", 2, 5, 0);
        add_pin(&mut db, "a", 8, 5, 0);
        add_pin(&mut db, "b", 2, 3, 0);
        add_pin(&mut db, "b", 8, 7, 0);
        db
    }

    #[test]
    fn conflict_stage_finds_the_blocking_net() {
        let db = contested_gap();
        let mut r = router(&db);
        let order = order::assign(&mut r.netlist, &[]);
        r.initial_pass(&order).unwrap();

        let (a, b) = (NetId::new(0), NetId::new(1));
        assert_eq!(r.netlist.net(a).status, NetStatus::Routed);
        assert_eq!(r.netlist.net(b).status, NetStatus::Failed);
        assert_eq!(r.failed_queue().iter().copied().collect::<Vec<_>>(), vec![b]);

        assert_eq!(r.route_net(b, Stage::Strict).unwrap(), NetOutcome::Failed);
        assert_eq!(r.route_net(b, Stage::Conflict).unwrap(), NetOutcome::Routed);
        assert!(r.netlist.net(b).routes.iter().all(|rt| !rt.written));
        assert!(r.netlist.net(b).cells().any(|c| c == GridCoord::new(5, 5, 0)));
        assert_eq!(commit::find_colliding(&r.grid, &r.netlist, b), vec![a]);
    }

    #[test]
    fn contested_gap_settles_with_one_net_abandoned() {
        let db = contested_gap();
        let mut r = router(&db);
        r.run().unwrap();

        let (a, b) = (NetId::new(0), NetId::new(1));
        assert_eq!(r.netlist.net(a).status, NetStatus::Routed);
        assert_eq!(r.netlist.net(b).status, NetStatus::Abandoned);
        assert!(r.netlist.net(b).routes.is_empty());
        assert!(r.netlist.net(a).pending);
        assert!(r.failed_queue().is_empty());
        assert_eq!(r.grid.cell(GridCoord::new(5, 5, 0)).owner, Owner::Net(a));

        let report = r.report();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.routed, 1);
        assert!(report.conflicted.is_empty());
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].name, "b");
        assert_eq!(report.abandoned[0].endpoints.len(), 2);
        assert!(crate::check::run(&r.netlist).is_ok());
    }

    /// Net b's second pin sits on a's tap, so only a may own that point.
    fn pin_on_foreign_tap() -> NetlistDB {
        let mut db = design(10.0);
        add_pin(&mut db, "a", 2, 2, 0);
        add_pin(&mut db, "a", 6, 2, 0);
        add_pin(&mut db, "b", 2, 7, 0);
        add_pin(&mut db, "b", 2, 2, 0);
        db
    }

    #[test]
    fn foreign_tap_is_never_taken_over() {
        let db = pin_on_foreign_tap();
        let mut r = router(&db);
        let (a, b) = (NetId::new(0), NetId::new(1));
        let shared = GridCoord::new(2, 2, 0);

        assert_eq!(r.route_net(a, Stage::Strict).unwrap(), NetOutcome::Routed);
        assert_eq!(r.grid.cell(shared).owner, Owner::Net(a));

        assert_eq!(r.route_net(b, Stage::Strict).unwrap(), NetOutcome::Failed);
        assert_eq!(r.route_net(b, Stage::Conflict).unwrap(), NetOutcome::Failed);
        assert_eq!(r.grid.cell(shared).owner, Owner::Net(a));
        assert!(r.netlist.net(b).routes.is_empty());
        assert!(crate::check::run(&r.netlist).is_ok());
    }

    #[test]
    fn run_abandons_net_whose_pin_is_held_by_another() {
        let mut db = pin_on_foreign_tap();
        let report = run(&mut db, &DetailedRoutingConfig::default()).unwrap();
        assert_eq!(report.routed, 1);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].name, "b");
        assert!(db.nets[1].route_segments.is_empty());
        assert!(!db.nets[0].route_segments.is_empty());
    }

    #[test]
    fn critical_nets_route_first_in_listed_order() {
        let mut db = design(10.0);
        for (net, y) in [("a", 1), ("b", 3), ("c", 5)] {
            add_pin(&mut db, net, 1, y, 0);
            add_pin(&mut db, net, 6, y, 0);
        }
        add_pin(&mut db, "c", 8, 8, 0);
        let config = DetailedRoutingConfig {
            critical_nets: vec!["b".into(), "a".into()],
            ..Default::default()
        };
        let mut r = Router::new(obstruction::build(&db, &config).unwrap(), &config);
        r.run().unwrap();
        let order: Vec<usize> = r.netlist.nets.iter().map(|n| n.order).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn skipped_and_single_pin_nets_are_not_attempted() {
        let mut db = design(10.0);
        add_pin(&mut db, "a", 1, 1, 0);
        add_pin(&mut db, "a", 4, 1, 0);
        add_pin(&mut db, "lonely", 6, 6, 0);
        add_pin(&mut db, "skip", 2, 8, 0);
        add_pin(&mut db, "skip", 7, 8, 0);
        let config = DetailedRoutingConfig {
            dont_route: vec!["skip".into()],
            ..Default::default()
        };
        let mut r = Router::new(obstruction::build(&db, &config).unwrap(), &config);
        r.run().unwrap();
        let report = r.report();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.routed, 1);
        assert!(r.netlist.nets[2].routes.is_empty());
    }

    #[test]
    fn offset_tap_shifts_exported_endpoint() {
        let mut db = design(10.0);
        add_blockage(&mut db, 0, Rect::from_corners(4.2, 1.5, 5.0, 2.5));
        add_pin(&mut db, "a", 4, 2, 0);
        add_pin(&mut db, "a", 1, 2, 0);
        let report = run(&mut db, &DetailedRoutingConfig::default()).unwrap();
        assert_eq!(report.routed, 1);

        let segs = &db.nets[0].route_segments;
        assert_eq!(segs.len(), 1);
        let wire = &segs[0];
        assert_eq!(wire.kind, SegmentKind::Wire);
        let (shifted, plain) = if wire.start.x == 4 {
            (wire.p1, wire.p2)
        } else {
            (wire.p2, wire.p1)
        };
        assert!((shifted.x - 3.9).abs() < 1e-6);
        assert!((shifted.y - 2.0).abs() < 1e-6);
        assert!((plain.x - 1.0).abs() < 1e-6);
    }
}
