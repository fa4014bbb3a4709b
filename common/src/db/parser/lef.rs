use crate::db::core::{LayerData, LayerDirection, LayerRect, MacroData, NetlistDB};
use crate::geom::rect::Rect;
use anyhow::{Context, Result};

pub fn parse(db: &mut NetlistDB, filename: &str) -> Result<()> {
    let text = std::fs::read_to_string(filename)
        .with_context(|| format!("cannot read LEF file '{}'", filename))?;
    parse_str(db, &text)
}

/// Reads routing layers and macro geometry from LEF text.
///
/// Only `TYPE ROUTING` layers are kept; cut layers and via definitions are skipped.
/// Layer names inside macros that do not match a routing layer leave the shape
/// without a layer, which the router later reports and drops.
pub fn parse_str(db: &mut NetlistDB, text: &str) -> Result<()> {
    let mut current_layer = String::new();
    let mut current_pin = String::new();
    let mut current_macro: Option<MacroData> = None;
    let mut geom_layer: Option<u8> = None;

    let mut in_layer = false;
    let mut in_pin = false;
    let mut in_obs = false;
    let mut layer_type = String::new();
    let mut layer = LayerData::new("", LayerDirection::Unknown, 0.0, 0.0, 0.0);

    for (lineno, line) in text.lines().enumerate() {
        let parts: Vec<&str> = line
            .split_whitespace()
            .map(|p| p.trim_end_matches(';'))
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() || parts[0].starts_with('#') {
            continue;
        }

        match parts[0] {
            "LAYER" if current_macro.is_none() => {
                current_layer = arg(&parts, 1, lineno)?.to_string();
                in_layer = true;
                layer_type.clear();
                layer = LayerData::new(&current_layer, LayerDirection::Unknown, 0.0, 0.0, 0.0);
            }
            "LAYER" => {
                let name = arg(&parts, 1, lineno)?;
                geom_layer = db.layer_index(name);
                if geom_layer.is_none() {
                    log::debug!("LEF line {}: layer '{}' is not a routing layer", lineno + 1, name);
                }
            }
            "TYPE" if in_layer => {
                layer_type = arg(&parts, 1, lineno)?.to_string();
            }
            "DIRECTION" if in_layer => {
                layer.direction = match arg(&parts, 1, lineno)? {
                    "VERTICAL" => LayerDirection::Vertical,
                    "HORIZONTAL" => LayerDirection::Horizontal,
                    _ => LayerDirection::Unknown,
                };
            }
            "PITCH" if in_layer => {
                layer.pitch_x = num(&parts, 1, lineno)?;
                layer.pitch_y = if parts.len() > 2 {
                    num(&parts, 2, lineno)?
                } else {
                    layer.pitch_x
                };
            }
            "WIDTH" if in_layer => {
                layer.width = num(&parts, 1, lineno)?;
                layer.via_width = layer.via_width.max(layer.width);
            }
            "SPACING" if in_layer => {
                layer.spacing = num(&parts, 1, lineno)?;
            }
            "MACRO" => {
                current_macro = Some(MacroData::new(arg(&parts, 1, lineno)?, 0.0, 0.0));
            }
            "SIZE" => {
                if let Some(m) = current_macro.as_mut() {
                    m.width = num(&parts, 1, lineno)?;
                    m.height = num(&parts, 3, lineno)?;
                }
            }
            "PIN" if current_macro.is_some() => {
                current_pin = arg(&parts, 1, lineno)?.to_string();
                in_pin = true;
                geom_layer = None;
            }
            "OBS" if current_macro.is_some() => {
                in_obs = true;
                geom_layer = None;
            }
            "RECT" => {
                let Some(m) = current_macro.as_mut() else {
                    continue;
                };
                let base = if parts.get(1) == Some(&"MASK") { 3 } else { 1 };
                let rect = Rect::from_corners(
                    num(&parts, base, lineno)?,
                    num(&parts, base + 1, lineno)?,
                    num(&parts, base + 2, lineno)?,
                    num(&parts, base + 3, lineno)?,
                );
                let shape = LayerRect {
                    layer: geom_layer,
                    rect,
                };
                if in_obs {
                    m.obstructions.push(shape);
                } else if in_pin {
                    m.pin_mut(&current_pin).shapes.push(shape);
                }
            }
            "END" => {
                let Some(name) = parts.get(1) else {
                    // Bare END closes PORT or OBS.
                    in_obs = false;
                    continue;
                };
                if in_layer && *name == current_layer {
                    if layer_type == "ROUTING" {
                        db.add_layer(layer.clone());
                    }
                    in_layer = false;
                } else if in_pin && *name == current_pin {
                    in_pin = false;
                    current_pin.clear();
                } else if current_macro.as_ref().is_some_and(|m| m.name == *name) {
                    if let Some(m) = current_macro.take() {
                        db.add_macro(m);
                    }
                    in_obs = false;
                }
            }
            _ => {}
        }
    }

    if db.layers.is_empty() {
        log::warn!("No routing layers found in LEF.");
    }

    Ok(())
}

fn arg<'a>(parts: &[&'a str], i: usize, lineno: usize) -> Result<&'a str> {
    parts
        .get(i)
        .copied()
        .with_context(|| format!("line {}: missing field {}", lineno + 1, i))
}

fn num(parts: &[&str], i: usize, lineno: usize) -> Result<f64> {
    let s = arg(parts, i, lineno)?;
    s.parse::<f64>()
        .with_context(|| format!("line {}: '{}' is not a number", lineno + 1, s))
}
