use maze_common::db::core::{
    LayerData, LayerDirection, LayerRect, MacroData, NetlistDB, Orientation, SegmentKind,
};
use maze_common::db::indices::NetId;
use maze_common::geom::coord::GridCoord;
use maze_common::geom::point::Point;
use maze_common::geom::rect::Rect;
use maze_common::util::config::{Config, DetailedRoutingConfig};
use maze_router::algo::search::Stage;
use maze_router::detailed_router::{NetOutcome, Router};
use maze_router::grid::{Owner, RoutingGrid};
use maze_router::netlist::{NetStatus, Segment};
use maze_router::{check, commit, obstruction, order};
use std::collections::HashSet;

fn layered_design(size: f64, layers: usize) -> NetlistDB {
    let mut db = NetlistDB::new();
    for i in 0..layers {
        let dir = if i % 2 == 0 {
            LayerDirection::Horizontal
        } else {
            LayerDirection::Vertical
        };
        db.add_layer(LayerData::new(&format!("M{}", i + 1), dir, 1.0, 0.2, 0.2));
    }
    db.die_area = Rect::from_corners(0.0, 0.0, size, size);
    db
}

fn pin(db: &mut NetlistDB, net: &str, x: u32, y: u32, layer: u8) {
    let id = db.add_net(net);
    let (fx, fy) = (x as f64, y as f64);
    let rect = Rect::from_corners(fx - 0.1, fy - 0.1, fx + 0.1, fy + 0.1);
    let name = format!("{}_{}", net, db.nets[id.index()].pins.len());
    db.add_io_pin(&name, id, vec![LayerRect::new(layer, rect)]);
}

fn blockage(db: &mut NetlistDB, layer: u8, rect: Rect) {
    let name = format!("OBS{}", db.macros.len());
    let mut m = MacroData::new(&name, 0.0, 0.0);
    m.obstructions.push(LayerRect::new(layer, rect));
    db.add_macro(m);
    let cell = format!("obs{}", db.num_cells());
    db.add_cell(&cell, &name, Point::new(0.0, 0.0), Orientation::N, true);
}

fn router_for(db: &NetlistDB, config: &DetailedRoutingConfig) -> Router {
    Router::new(obstruction::build(db, config).unwrap(), config)
}

/// Cost of a route recomputed from its segments, for designs without foreign pins.
fn segment_cost(segments: &[Segment], directions: &[LayerDirection], config: &DetailedRoutingConfig) -> u32 {
    segments
        .iter()
        .map(|s| match s.kind {
            SegmentKind::Via => config.via_cost,
            SegmentKind::Wire => {
                let along = if directions[s.layer as usize].is_vertical() {
                    s.x1 == s.x2
                } else {
                    s.y1 == s.y2
                };
                let unit = if along { config.seg_cost } else { config.jog_cost };
                s.length() * unit
            }
        })
        .sum()
}

/// Single layer split by a wall at x = 5 whose only gap is at y = 5.
fn contested_gap(extra: bool) -> NetlistDB {
    let mut db = layered_design(10.0, 1);
    blockage(&mut db, 0, Rect::from_corners(4.9, -0.5, 5.1, 4.5));
    blockage(&mut db, 0, Rect::from_corners(4.9, 5.5, 5.1, 10.5));
    pin(&mut db, "a", 2, 5, 0);
    pin(&mut db, "a", 8, 5, 0);
    pin(&mut db, "b", 2, 3, 0);
    pin(&mut db, "b", 8, 7, 0);
    if extra {
        pin(&mut db, "c", 2, 7, 0);
        pin(&mut db, "c", 8, 3, 0);
    }
    db
}

#[test]
fn straight_run_on_one_layer() {
    let mut db = layered_design(10.0, 2);
    pin(&mut db, "a", 2, 2, 0);
    pin(&mut db, "a", 7, 2, 0);
    let config = DetailedRoutingConfig::default();

    let mut r = router_for(&db, &config);
    r.run().unwrap();
    let net = r.netlist.net(NetId::new(0));
    assert_eq!(net.status, NetStatus::Routed);
    assert_eq!(net.routes.len(), 1);
    let route = &net.routes[0];
    assert_eq!(route.cost, 5 * config.seg_cost);
    assert_eq!(route.segments.len(), 1);
    assert_eq!(route.segments[0].kind, SegmentKind::Wire);
    assert_eq!(route.segments[0].length(), 5);

    let report = maze_router::route(&mut db, &Config::default()).unwrap();
    assert_eq!(report.routed, 1);
    assert!(report.abandoned.is_empty());
    let segs = &db.nets[0].route_segments;
    assert_eq!(segs.len(), 1);
    assert!(((segs[0].p1.x - segs[0].p2.x).abs() - 5.0).abs() < 1e-9);
    assert!((segs[0].p1.y - 2.0).abs() < 1e-9);
}

#[test]
fn stacked_pins_join_with_one_via() {
    let mut db = layered_design(10.0, 2);
    pin(&mut db, "a", 3, 3, 0);
    pin(&mut db, "a", 3, 3, 1);
    let config = DetailedRoutingConfig::default();

    let mut r = router_for(&db, &config);
    r.run().unwrap();
    let net = r.netlist.net(NetId::new(0));
    assert_eq!(net.status, NetStatus::Routed);
    let route = &net.routes[0];
    assert_eq!(route.cost, config.via_cost);
    assert_eq!(route.segments, vec![Segment::via(0, 3, 3)]);
}

#[test]
fn obstruction_forces_a_detour() {
    let mut db = layered_design(12.0, 2);
    let wall = Rect::from_corners(4.8, 2.5, 6.2, 7.5);
    blockage(&mut db, 0, wall);
    blockage(&mut db, 1, wall);
    pin(&mut db, "a", 2, 5, 0);
    pin(&mut db, "a", 9, 5, 0);
    let config = DetailedRoutingConfig::default();

    let model = obstruction::build(&db, &config).unwrap();
    let blocked: HashSet<GridCoord> = model
        .grid
        .cells()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.owner == Owner::Blocked)
        .map(|(i, _)| model.grid.coord(i))
        .collect();
    assert!(blocked.contains(&GridCoord::new(5, 5, 0)));
    assert!(blocked.contains(&GridCoord::new(6, 5, 1)));

    let mut r = Router::new(model, &config);
    r.run().unwrap();
    let net = r.netlist.net(NetId::new(0));
    assert_eq!(net.status, NetStatus::Routed);
    let cost: u32 = net.routes.iter().map(|rt| rt.cost).sum();
    assert!(cost > 7 * config.seg_cost);
    assert!(net.cells().all(|c| !blocked.contains(&c)));
    assert!(check::run(&r.netlist).is_ok());
}

#[test]
fn shared_gap_is_taken_through_rip_up() {
    let db = contested_gap(false);
    let config = DetailedRoutingConfig::default();
    let mut r = router_for(&db, &config);
    let (a, b) = (NetId::new(0), NetId::new(1));
    let gap = GridCoord::new(5, 5, 0);

    let order = order::assign(&mut r.netlist, &[]);
    r.initial_pass(&order).unwrap();
    assert_eq!(r.netlist.net(a).status, NetStatus::Routed);
    assert_eq!(r.netlist.net(b).status, NetStatus::Failed);

    assert_eq!(r.route_net(b, Stage::Strict).unwrap(), NetOutcome::Failed);
    assert_eq!(r.route_net(b, Stage::Conflict).unwrap(), NetOutcome::Routed);
    assert!(r.netlist.net(b).cells().any(|c| c == gap));
    assert_eq!(r.grid.cell(gap).owner, Owner::Net(a));
    assert_eq!(commit::find_colliding(&r.grid, &r.netlist, b), vec![a]);

    // Drop the trial route and let the orchestrator resolve the fight.
    commit::ripup(&mut r.grid, &mut r.netlist, b).unwrap();
    r.second_stage().unwrap();
    assert!(r.netlist.net(a).pending);
    assert_eq!(r.netlist.net(a).status, NetStatus::Routed);
    assert_eq!(r.netlist.net(b).status, NetStatus::Abandoned);
    assert!(r.failed_queue().is_empty());
}

#[test]
fn rip_up_restores_grid_state() {
    let mut db = layered_design(10.0, 2);
    pin(&mut db, "a", 1, 1, 0);
    pin(&mut db, "a", 6, 4, 0);
    pin(&mut db, "a", 3, 8, 0);
    let config = DetailedRoutingConfig::default();
    let mut r = router_for(&db, &config);
    let id = NetId::new(0);

    let before = r.grid.cells().to_vec();
    let taps: HashSet<usize> = r
        .netlist
        .net(id)
        .nodes
        .iter()
        .flat_map(|&n| r.netlist.node(n).taps.clone())
        .map(|t| r.grid.idx(t))
        .collect();

    assert_eq!(r.route_net(id, Stage::Strict).unwrap(), NetOutcome::Routed);
    assert_eq!(r.netlist.net(id).routes.len(), 2);
    assert_ne!(r.grid.cells(), &before[..]);

    commit::ripup(&mut r.grid, &mut r.netlist, id).unwrap();
    assert!(r.netlist.net(id).routes.is_empty());
    for (i, cell) in r.grid.cells().iter().enumerate() {
        if !taps.contains(&i) {
            assert_eq!(*cell, before[i], "cell {:?} changed", r.grid.coord(i));
        }
    }
    for &n in &r.netlist.net(id).nodes {
        for &t in &r.netlist.node(n).taps {
            assert_eq!(r.grid.node_at(t), Some(n));
        }
    }
}

#[test]
fn routed_nets_connect_every_node() {
    let mut db = layered_design(16.0, 2);
    pin(&mut db, "clk", 1, 1, 0);
    pin(&mut db, "clk", 14, 2, 0);
    pin(&mut db, "clk", 8, 13, 0);
    pin(&mut db, "clk", 3, 9, 0);
    pin(&mut db, "d0", 2, 5, 0);
    pin(&mut db, "d0", 12, 6, 0);
    pin(&mut db, "d1", 5, 14, 0);
    pin(&mut db, "d1", 13, 10, 0);
    blockage(&mut db, 0, Rect::from_corners(6.6, 6.6, 9.4, 9.4));
    let config = DetailedRoutingConfig::default();

    let mut r = router_for(&db, &config);
    r.run().unwrap();
    assert!(check::run(&r.netlist).is_ok());
    for net in &r.netlist.nets {
        if net.status != NetStatus::Routed {
            continue;
        }
        let connected = r.netlist.connected_nodes(net.id);
        assert!(connected.iter().all(|&c| c), "net {} incomplete", net.name);
        assert_eq!(net.routes.len(), net.nodes.len() - 1);
    }
    assert_eq!(r.report().routed, 3);
}

#[test]
fn route_cost_is_the_sum_of_its_steps() {
    let mut db = layered_design(10.0, 2);
    pin(&mut db, "a", 2, 2, 0);
    pin(&mut db, "a", 7, 6, 0);
    let config = DetailedRoutingConfig::default();
    let model = obstruction::build(&db, &config).unwrap();
    let directions = model.directions.clone();

    let mut r = Router::new(model, &config);
    r.run().unwrap();
    let route = &r.netlist.net(NetId::new(0)).routes[0];
    // Five along M1, four along M2, up and back down.
    assert_eq!(route.cost, 5 + 4 + 2 * config.via_cost);
    assert_eq!(segment_cost(&route.segments, &directions, &config), route.cost);
}

#[test]
fn stacked_vias_respect_the_limit() {
    let mut db = layered_design(10.0, 4);
    pin(&mut db, "a", 4, 4, 0);
    pin(&mut db, "a", 4, 4, 3);
    let config = DetailedRoutingConfig {
        stacked_contacts: 2,
        ..Default::default()
    };

    let mut r = router_for(&db, &config);
    r.run().unwrap();
    let net = r.netlist.net(NetId::new(0));
    assert_eq!(net.status, NetStatus::Routed);
    for route in &net.routes {
        let mut run = 0u8;
        let mut column = None;
        for s in &route.segments {
            if s.kind == SegmentKind::Via && column == Some((s.x1, s.y1)) {
                run += 1;
            } else if s.kind == SegmentKind::Via {
                run = 1;
                column = Some((s.x1, s.y1));
            } else {
                run = 0;
                column = None;
            }
            assert!(run <= config.stacked_contacts);
        }
    }
    assert!(check::run(&r.netlist).is_ok());
}

#[test]
fn rip_up_loop_terminates_on_an_impossible_design() {
    let db = contested_gap(true);
    let config = DetailedRoutingConfig::default();
    let mut r = router_for(&db, &config);
    r.run().unwrap();

    assert!(r.failed_queue().is_empty());
    assert!(
        r.netlist
            .nets
            .iter()
            .all(|n| matches!(n.status, NetStatus::Routed | NetStatus::Abandoned))
    );
    let report = r.report();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.routed, 1);
    assert_eq!(report.abandoned.len(), 2);
    assert!(report.conflicted.is_empty());
    assert!(check::run(&r.netlist).is_ok());
}

/// Ten nets that all need the single gap at (10, 10).
fn crowded_gap() -> NetlistDB {
    let mut db = layered_design(20.0, 1);
    blockage(&mut db, 0, Rect::from_corners(9.9, -0.5, 10.1, 9.5));
    blockage(&mut db, 0, Rect::from_corners(9.9, 10.5, 10.1, 20.5));
    for k in 0..10u32 {
        let name = format!("n{}", k);
        pin(&mut db, &name, 2, 1 + 2 * k, 0);
        pin(&mut db, &name, 18, 19 - 2 * k, 0);
    }
    db
}

#[test]
fn stalled_rip_up_gives_up_and_abandons_the_queue() {
    let config = DetailedRoutingConfig {
        stall_budget_factor: 1,
        ..Default::default()
    };
    let mut r = router_for(&crowded_gap(), &config);
    r.run().unwrap();

    assert!(r.failed_queue().is_empty());
    let report = r.report();
    assert_eq!(report.attempted, 10);
    assert_eq!(report.routed, 1);
    assert_eq!(report.abandoned.len(), 9);
    // The first route plus one eviction per pop before the nine-pop window closed.
    assert_eq!(report.total_routes, 9);
    assert_eq!(r.netlist.net(NetId::new(8)).status, NetStatus::Routed);
    assert!(
        r.netlist
            .nets
            .iter()
            .filter(|n| n.id != NetId::new(8))
            .all(|n| n.status == NetStatus::Abandoned && n.routes.is_empty())
    );
    assert!(check::run(&r.netlist).is_ok());
}
