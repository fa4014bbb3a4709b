use maze_common::db::core::{LayerData, LayerDirection, LayerRect, MacroData, NetlistDB, Orientation};
use maze_common::geom::point::Point;
use maze_common::geom::rect::Rect;

/// Square die of side `size` with a horizontal M1 and a vertical M2 on a unit pitch.
pub fn design(size: f64) -> NetlistDB {
    layered_design(size, 2)
}

pub fn layered_design(size: f64, layers: usize) -> NetlistDB {
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

/// Adds a small IO pin of `net` centred on grid point (x, y).
pub fn add_pin(db: &mut NetlistDB, net: &str, x: u32, y: u32, layer: u8) {
    let id = db.add_net(net);
    let (fx, fy) = (x as f64, y as f64);
    let rect = Rect::from_corners(fx - 0.1, fy - 0.1, fx + 0.1, fy + 0.1);
    let name = format!("{}_{}", net, db.nets[id.index()].pins.len());
    db.add_io_pin(&name, id, vec![LayerRect::new(layer, rect)]);
}

/// Places a cell whose only content is an obstruction at `rect`.
pub fn add_blockage(db: &mut NetlistDB, layer: u8, rect: Rect) {
    let name = format!("BLK{}", db.macros.len());
    let mut m = MacroData::new(&name, 0.0, 0.0);
    m.obstructions.push(LayerRect::new(layer, rect));
    db.add_macro(m);
    let cell = format!("blk{}", db.num_cells());
    db.add_cell(&cell, &name, Point::new(0.0, 0.0), Orientation::N, true);
}
