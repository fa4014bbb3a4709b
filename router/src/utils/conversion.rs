use maze_common::geom::coord::GridCoord;
use maze_common::geom::point::Point;
use maze_common::geom::rect::Rect;
use std::ops::RangeInclusive;

const SNAP: f64 = 1e-6;

/// Maps between track indices and physical coordinates.
/// Track `i` sits at `origin + i * step`.
#[derive(Clone, Debug)]
pub struct GridConverter {
    step_x: f64,
    step_y: f64,
    origin_x: f64,
    origin_y: f64,
    grid_w: u32,
    grid_h: u32,
}

impl GridConverter {
    pub fn new(origin: Point<f64>, step_x: f64, step_y: f64, grid_w: u32, grid_h: u32) -> Self {
        Self {
            step_x,
            step_y,
            origin_x: origin.x,
            origin_y: origin.y,
            grid_w,
            grid_h,
        }
    }

    /// Number of tracks needed to cover `extent` at `step`.
    pub fn channels(extent: f64, step: f64) -> u32 {
        (1.5 + extent / step) as u32
    }

    pub fn step_x(&self) -> f64 {
        self.step_x
    }

    pub fn step_y(&self) -> f64 {
        self.step_y
    }

    pub fn to_world(&self, g: GridCoord) -> Point<f64> {
        Point::new(
            self.origin_x + g.x as f64 * self.step_x,
            self.origin_y + g.y as f64 * self.step_y,
        )
    }

    /// Track indices whose physical position lies inside `r`, boundary included.
    pub fn span(&self, r: &Rect) -> Option<(RangeInclusive<u32>, RangeInclusive<u32>)> {
        let xs = Self::axis_span(r.min.x, r.max.x, self.origin_x, self.step_x, self.grid_w)?;
        let ys = Self::axis_span(r.min.y, r.max.y, self.origin_y, self.step_y, self.grid_h)?;
        Some((xs, ys))
    }

    fn axis_span(lo: f64, hi: f64, origin: f64, step: f64, n: u32) -> Option<RangeInclusive<u32>> {
        if n == 0 {
            return None;
        }
        let first = ((lo - origin) / step - SNAP).ceil().max(0.0);
        let last = ((hi - origin) / step + SNAP).floor();
        if last < 0.0 || first > last {
            return None;
        }
        let last = last.min((n - 1) as f64);
        if first > last {
            return None;
        }
        Some(first as u32..=last as u32)
    }
}
