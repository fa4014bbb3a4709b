use crate::netlist::{NetStatus, Netlist};
use maze_common::db::indices::NetId;
use maze_common::geom::coord::GridCoord;
use rayon::prelude::*;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("net '{net}' is split into {components} disconnected pieces")]
    Open { net: String, components: usize },

    #[error("nets '{first}' and '{second}' both occupy {at}")]
    Short {
        first: String,
        second: String,
        at: GridCoord,
    },
}

/// Verifies the committed routes: every routed net is one connected piece and
/// no grid point carries wires of two nets.
pub fn run(netlist: &Netlist) -> Result<(), CheckError> {
    log::info!("Verifying routed nets");

    let (shorts, opens) = rayon::join(|| check_shorts(netlist), || check_opens(netlist));

    match &shorts {
        Ok(()) => log::info!("PASS: no shorts"),
        Err(e) => log::error!("FAIL: {}", e),
    }
    match &opens {
        Ok(()) => log::info!("PASS: all routed nets connected"),
        Err(e) => log::error!("FAIL: {}", e),
    }
    shorts?;
    opens
}

fn check_shorts(netlist: &Netlist) -> Result<(), CheckError> {
    let mut claims: HashMap<GridCoord, usize> = HashMap::new();
    for (i, net) in netlist.nets.iter().enumerate() {
        for c in net.cells() {
            let owner = *claims.entry(c).or_insert(i);
            if owner != i {
                return Err(CheckError::Short {
                    first: netlist.nets[owner].name.clone(),
                    second: net.name.clone(),
                    at: c,
                });
            }
        }
    }
    Ok(())
}

fn check_opens(netlist: &Netlist) -> Result<(), CheckError> {
    let broken: Option<CheckError> = netlist
        .nets
        .par_iter()
        .filter(|n| n.status == NetStatus::Routed && n.nodes.len() >= 2)
        .find_map_any(|net| {
            let components = count_components(netlist, net.id);
            (components > 1).then(|| CheckError::Open {
                net: net.name.clone(),
                components,
            })
        });
    match broken {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Number of separate pieces the net's terminals fall into.
fn count_components(netlist: &Netlist, id: NetId) -> usize {
    let net = netlist.net(id);
    let mut index: HashMap<GridCoord, usize> = HashMap::new();
    let mut sets = DisjointSet::default();

    for route in &net.routes {
        for seg in &route.segments {
            let cells = seg.cells();
            let Some(&first) = cells.first() else {
                continue;
            };
            let root = slot(&mut index, &mut sets, first);
            for &c in &cells[1..] {
                let s = slot(&mut index, &mut sets, c);
                sets.union(root, s);
            }
        }
    }

    let mut roots: Vec<usize> = Vec::new();
    for &n in &net.nodes {
        let node = netlist.node(n);
        let mut members: Vec<usize> = node
            .taps
            .iter()
            .map(|&t| slot(&mut index, &mut sets, t))
            .collect();
        for &e in &node.extends {
            if let Some(&s) = index.get(&e) {
                members.push(s);
            }
        }
        let Some(&head) = members.first() else {
            return usize::MAX;
        };
        for &m in &members[1..] {
            sets.union(head, m);
        }
        roots.push(head);
    }

    let mut distinct: Vec<usize> = roots.into_iter().map(|r| sets.find(r)).collect();
    distinct.sort_unstable();
    distinct.dedup();
    distinct.len()
}

fn slot(index: &mut HashMap<GridCoord, usize>, sets: &mut DisjointSet, c: GridCoord) -> usize {
    *index.entry(c).or_insert_with(|| sets.make())
}

#[derive(Default)]
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn make(&mut self) -> usize {
        self.parent.push(self.parent.len());
        self.parent.len() - 1
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}
