use crate::db::indices::*;
use crate::geom::coord::GridCoord;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use std::collections::HashMap;

pub const IO_CELL_NAME: &str = "IO_VIRTUAL_CELL";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerDirection {
    Vertical,
    Horizontal,
    Unknown,
}

impl LayerDirection {
    /// Layers without a declared direction route like horizontal ones.
    pub fn is_vertical(&self) -> bool {
        matches!(self, LayerDirection::Vertical)
    }
}

#[derive(Clone, Debug)]
pub struct LayerData {
    pub name: String,
    pub index: u8,
    pub direction: LayerDirection,
    pub pitch_x: f64,
    pub pitch_y: f64,
    pub width: f64,
    pub spacing: f64,
    pub via_width: f64,
    /// Explicit keepout; derived from width and spacing when absent.
    pub keepout: Option<f64>,
}

impl LayerData {
    pub fn new(name: &str, direction: LayerDirection, pitch: f64, width: f64, spacing: f64) -> Self {
        Self {
            name: name.to_string(),
            index: 0,
            direction,
            pitch_x: pitch,
            pitch_y: pitch,
            width,
            spacing,
            via_width: width,
            keepout: None,
        }
    }

    /// Distance around a shape on this layer that a foreign wire centerline may not enter.
    pub fn route_keepout(&self) -> f64 {
        self.keepout
            .unwrap_or(self.spacing + self.width.max(self.via_width) / 2.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    N,
    S,
    FN,
    FS,
}

impl Orientation {
    pub fn from_def(token: &str) -> Option<Self> {
        match token {
            "N" => Some(Orientation::N),
            "S" => Some(Orientation::S),
            "FN" => Some(Orientation::FN),
            "FS" => Some(Orientation::FS),
            _ => None,
        }
    }

    pub fn as_def(&self) -> &'static str {
        match self {
            Orientation::N => "N",
            Orientation::S => "S",
            Orientation::FN => "FN",
            Orientation::FS => "FS",
        }
    }

    /// Maps a macro-relative rectangle into the placed cell frame.
    pub fn apply(&self, r: Rect, width: f64, height: f64) -> Rect {
        match self {
            Orientation::N => r,
            Orientation::S => {
                Rect::from_corners(width - r.min.x, height - r.min.y, width - r.max.x, height - r.max.y)
            }
            Orientation::FN => Rect::from_corners(width - r.min.x, r.min.y, width - r.max.x, r.max.y),
            Orientation::FS => Rect::from_corners(r.min.x, height - r.min.y, r.max.x, height - r.max.y),
        }
    }
}

/// A rectangle on one routing layer. Shapes whose layer name did not resolve carry `None`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerRect {
    pub layer: Option<u8>,
    pub rect: Rect,
}

impl LayerRect {
    pub fn new(layer: u8, rect: Rect) -> Self {
        Self {
            layer: Some(layer),
            rect,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MacroPin {
    pub name: String,
    pub shapes: Vec<LayerRect>,
}

#[derive(Clone, Debug, Default)]
pub struct MacroData {
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub pins: Vec<MacroPin>,
    pub obstructions: Vec<LayerRect>,
}

impl MacroData {
    pub fn new(name: &str, width: f64, height: f64) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            ..Default::default()
        }
    }

    pub fn pin(&self, name: &str) -> Option<&MacroPin> {
        self.pins.iter().find(|p| p.name == name)
    }

    pub fn pin_mut(&mut self, name: &str) -> &mut MacroPin {
        if let Some(idx) = self.pins.iter().position(|p| p.name == name) {
            return &mut self.pins[idx];
        }
        self.pins.push(MacroPin {
            name: name.to_string(),
            shapes: Vec::new(),
        });
        let last = self.pins.len() - 1;
        &mut self.pins[last]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Wire,
    Via,
}

/// A committed wire or via, in grid and physical coordinates.
#[derive(Clone, Debug)]
pub struct RouteSegment {
    pub kind: SegmentKind,
    pub layer: u8,
    pub start: GridCoord,
    pub end: GridCoord,
    pub p1: Point<f64>,
    pub p2: Point<f64>,
    pub offset_start: bool,
    pub offset_end: bool,
}

#[derive(Clone, Debug)]
pub struct CellData {
    pub name: String,
    pub lib_name: String,
    pub width: f64,
    pub height: f64,
    pub orient: Orientation,
    pub is_fixed: bool,
    pub pins: Vec<PinId>,
}

#[derive(Clone, Debug)]
pub struct NetData {
    pub name: String,
    pub pins: Vec<PinId>,
    pub route_segments: Vec<RouteSegment>,
}

pub struct NetlistDB {
    pub layers: Vec<LayerData>,
    pub macros: HashMap<String, MacroData>,
    pub cells: Vec<CellData>,
    pub nets: Vec<NetData>,

    pub pin_names: Vec<String>,
    pub pin_to_cell: Vec<CellId>,
    pub pin_to_net: Vec<NetId>,
    /// Absolute pin geometry, one list per pin.
    pub pin_shapes: Vec<Vec<LayerRect>>,

    pub positions: Vec<Point<f64>>,
    pub die_area: Rect,

    pub cell_name_map: HashMap<String, CellId>,
    pub net_name_map: HashMap<String, NetId>,
    pub layer_name_map: HashMap<String, u8>,
}

impl Default for NetlistDB {
    fn default() -> Self {
        Self::new()
    }
}

impl NetlistDB {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            macros: HashMap::new(),
            cells: Vec::with_capacity(1000),
            nets: Vec::with_capacity(1000),
            pin_names: Vec::with_capacity(5000),
            pin_to_cell: Vec::with_capacity(5000),
            pin_to_net: Vec::with_capacity(5000),
            pin_shapes: Vec::with_capacity(5000),
            positions: Vec::with_capacity(1000),
            die_area: Rect::default(),
            cell_name_map: HashMap::new(),
            net_name_map: HashMap::new(),
            layer_name_map: HashMap::new(),
        }
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }
    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn add_layer(&mut self, mut layer: LayerData) -> u8 {
        let idx = self.layers.len() as u8;
        layer.index = idx;
        self.layer_name_map.insert(layer.name.clone(), idx);
        self.layers.push(layer);
        idx
    }

    pub fn layer_index(&self, name: &str) -> Option<u8> {
        self.layer_name_map.get(name).copied()
    }

    pub fn add_macro(&mut self, m: MacroData) {
        self.macros.insert(m.name.clone(), m);
    }

    pub fn add_cell(
        &mut self,
        name: &str,
        lib_name: &str,
        position: Point<f64>,
        orient: Orientation,
        is_fixed: bool,
    ) -> CellId {
        let (width, height) = match self.macros.get(lib_name) {
            Some(m) => (m.width, m.height),
            None => {
                log::warn!("Cell '{}' references unknown macro '{}'", name, lib_name);
                (0.0, 0.0)
            }
        };
        let id = CellId::new(self.cells.len());
        self.cells.push(CellData {
            name: name.to_string(),
            lib_name: lib_name.to_string(),
            width,
            height,
            orient,
            is_fixed,
            pins: Vec::new(),
        });
        self.positions.push(position);
        self.cell_name_map.insert(name.to_string(), id);
        id
    }

    pub fn add_net(&mut self, name: &str) -> NetId {
        if let Some(&id) = self.net_name_map.get(name) {
            return id;
        }
        let id = NetId::new(self.nets.len());
        self.nets.push(NetData {
            name: name.to_string(),
            pins: Vec::new(),
            route_segments: Vec::new(),
        });
        self.net_name_map.insert(name.to_string(), id);
        id
    }

    fn add_pin(&mut self, cell: CellId, net: NetId, name: &str, shapes: Vec<LayerRect>) -> PinId {
        let pid = PinId::new(self.pin_names.len());
        self.pin_names.push(name.to_string());
        self.pin_to_cell.push(cell);
        self.pin_to_net.push(net);
        self.pin_shapes.push(shapes);

        self.cells[cell.index()].pins.push(pid);
        self.nets[net.index()].pins.push(pid);
        pid
    }

    /// Connects a macro pin of a placed cell to `net`, resolving its absolute geometry.
    pub fn connect(&mut self, cell: CellId, pin_name: &str, net: NetId) -> PinId {
        let shapes = match self.macros.get(&self.cells[cell.index()].lib_name) {
            Some(m) => match m.pin(pin_name) {
                Some(pin) => self.place_shapes(cell, &pin.shapes),
                None => {
                    log::warn!(
                        "Macro '{}' has no pin '{}'",
                        self.cells[cell.index()].lib_name,
                        pin_name
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        self.add_pin(cell, net, pin_name, shapes)
    }

    /// Adds a top-level IO pin with absolute geometry.
    pub fn add_io_pin(&mut self, name: &str, net: NetId, shapes: Vec<LayerRect>) -> PinId {
        let io = self.get_or_create_io_cell();
        self.add_pin(io, net, name, shapes)
    }

    pub fn get_or_create_io_cell(&mut self) -> CellId {
        if let Some(&id) = self.cell_name_map.get(IO_CELL_NAME) {
            return id;
        }
        let id = CellId::new(self.cells.len());
        self.cells.push(CellData {
            name: IO_CELL_NAME.to_string(),
            lib_name: String::new(),
            width: 0.0,
            height: 0.0,
            orient: Orientation::N,
            is_fixed: true,
            pins: Vec::new(),
        });
        self.positions.push(Point::new(0.0, 0.0));
        self.cell_name_map.insert(IO_CELL_NAME.to_string(), id);
        id
    }

    fn place_shapes(&self, cell: CellId, shapes: &[LayerRect]) -> Vec<LayerRect> {
        let c = &self.cells[cell.index()];
        let pos = self.positions[cell.index()];
        shapes
            .iter()
            .map(|s| LayerRect {
                layer: s.layer,
                rect: c.orient.apply(s.rect, c.width, c.height).translate(pos),
            })
            .collect()
    }

    /// Blockage geometry of a placed cell in absolute coordinates.
    pub fn cell_obstructions(&self, cell: CellId) -> Vec<LayerRect> {
        match self.macros.get(&self.cells[cell.index()].lib_name) {
            Some(m) => self.place_shapes(cell, &m.obstructions),
            None => Vec::new(),
        }
    }

    /// Geometry of macro pins that no net connects to.
    pub fn unconnected_pin_shapes(&self, cell: CellId) -> Vec<LayerRect> {
        let c = &self.cells[cell.index()];
        let Some(m) = self.macros.get(&c.lib_name) else {
            return Vec::new();
        };
        let mut shapes = Vec::new();
        for pin in &m.pins {
            let used = c
                .pins
                .iter()
                .any(|pid| self.pin_names[pid.index()] == pin.name);
            if !used {
                shapes.extend(self.place_shapes(cell, &pin.shapes));
            }
        }
        shapes
    }

    pub fn pin_label(&self, pin: PinId) -> String {
        let cell = &self.cells[self.pin_to_cell[pin.index()].index()];
        if cell.name == IO_CELL_NAME {
            format!("PIN/{}", self.pin_names[pin.index()])
        } else {
            format!("{}/{}", cell.name, self.pin_names[pin.index()])
        }
    }
}
