use crate::netlist::Netlist;
use maze_common::db::indices::NetId;

/// Assigns every net its routing order and returns the nets in that order.
///
/// Critical nets come first, in the order they were listed. The rest follow by
/// decreasing node count, ties broken by net id so the result is stable.
pub fn assign(netlist: &mut Netlist, critical: &[NetId]) -> Vec<NetId> {
    let mut order: Vec<NetId> = Vec::with_capacity(netlist.nets.len());
    for &id in critical {
        if !order.contains(&id) {
            order.push(id);
        }
    }

    let mut rest: Vec<NetId> = netlist
        .nets
        .iter()
        .map(|n| n.id)
        .filter(|id| !order.contains(id))
        .collect();
    rest.sort_by(|a, b| {
        let na = netlist.net(*a).nodes.len();
        let nb = netlist.net(*b).nodes.len();
        nb.cmp(&na).then(a.cmp(b))
    });
    order.extend(rest);

    for (i, &id) in order.iter().enumerate() {
        netlist.net_mut(id).order = i + 1;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::Net;
    use maze_common::db::indices::NodeId;

    fn netlist(node_counts: &[usize]) -> Netlist {
        let mut nl = Netlist::default();
        let mut next = 0;
        for (i, &n) in node_counts.iter().enumerate() {
            let mut net = Net::new(NetId::new(i), &format!("n{}", i));
            for _ in 0..n {
                net.nodes.push(NodeId::new(next));
                next += 1;
            }
            nl.nets.push(net);
        }
        nl
    }

    #[test]
    fn larger_nets_route_first() {
        let mut nl = netlist(&[2, 5, 3, 5]);
        let order = assign(&mut nl, &[]);
        assert_eq!(
            order,
            vec![NetId::new(1), NetId::new(3), NetId::new(2), NetId::new(0)]
        );
        assert_eq!(nl.nets[1].order, 1);
        assert_eq!(nl.nets[0].order, 4);
    }

    #[test]
    fn critical_nets_keep_listed_order() {
        let mut nl = netlist(&[2, 5, 3, 4]);
        let order = assign(&mut nl, &[NetId::new(2), NetId::new(0)]);
        assert_eq!(
            order,
            vec![NetId::new(2), NetId::new(0), NetId::new(1), NetId::new(3)]
        );
        assert_eq!(nl.nets[2].order, 1);
    }
}
