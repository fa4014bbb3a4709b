use crate::db::core::{LayerRect, NetlistDB, Orientation};
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use anyhow::{Context, Result, bail};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Components,
    Pins,
    Nets,
    Skip,
}

pub fn parse(db: &mut NetlistDB, filename: &str) -> Result<()> {
    let text = std::fs::read_to_string(filename)
        .with_context(|| format!("cannot read DEF file '{}'", filename))?;
    parse_str(db, &text)
}

/// Reads die area, placed components, IO pins and net connectivity.
///
/// Statements inside sections may span several lines and end at `;`.
/// Macros must already be loaded so pin geometry can be resolved.
pub fn parse_str(db: &mut NetlistDB, text: &str) -> Result<()> {
    let mut section = Section::None;
    let mut def_units = 1000.0;
    let mut stmt: Vec<String> = Vec::new();

    for line in text.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() || parts[0].starts_with('#') {
            continue;
        }

        if section != Section::None {
            if parts[0] == "END" {
                section = Section::None;
                stmt.clear();
                continue;
            }
            if section == Section::Skip {
                continue;
            }
            for part in parts {
                let done = part.ends_with(';');
                let token = part.trim_end_matches(';');
                if !token.is_empty() {
                    stmt.push(token.to_string());
                }
                if done {
                    if stmt.first().map(String::as_str) == Some("-") {
                        match section {
                            Section::Components => component(db, &stmt, def_units)?,
                            Section::Pins => io_pin(db, &stmt, def_units)?,
                            Section::Nets => net(db, &stmt),
                            _ => {}
                        }
                    }
                    stmt.clear();
                }
            }
            continue;
        }

        match parts[0] {
            "UNITS" => {
                for (i, &part) in parts.iter().enumerate() {
                    if part == "MICRONS" && i + 1 < parts.len() {
                        let val_str = parts[i + 1].trim_matches(';');
                        if let Ok(val) = val_str.parse::<f64>() {
                            def_units = val;
                            log::debug!("DEF units: {} per micron", def_units);
                        }
                        break;
                    }
                }
            }
            "DIEAREA" => {
                if parts.len() < 8 {
                    bail!("malformed DIEAREA: '{}'", line.trim());
                }
                let x1: f64 = parts[2].parse()?;
                let y1: f64 = parts[3].parse()?;
                let x2: f64 = parts[6].parse()?;
                let y2: f64 = parts[7].parse()?;
                db.die_area = Rect::from_corners(
                    x1 / def_units,
                    y1 / def_units,
                    x2 / def_units,
                    y2 / def_units,
                );
            }
            "COMPONENTS" => section = Section::Components,
            "PINS" => section = Section::Pins,
            "NETS" => section = Section::Nets,
            "SPECIALNETS" | "VIAS" | "BLOCKAGES" => section = Section::Skip,
            _ => {}
        }
    }
    Ok(())
}

fn component(db: &mut NetlistDB, stmt: &[String], units: f64) -> Result<()> {
    if stmt.len() < 3 {
        bail!("malformed component: '{}'", stmt.join(" "));
    }
    let name = &stmt[1];
    let lib_name = &stmt[2];
    let mut pos = Point::new(0.0, 0.0);
    let mut orient = Orientation::N;
    let mut is_fixed = false;

    for (i, part) in stmt.iter().enumerate() {
        if part == "PLACED" || part == "FIXED" {
            is_fixed = part == "FIXED";
            let x: f64 = field(stmt, i + 2)?.parse()?;
            let y: f64 = field(stmt, i + 3)?.parse()?;
            pos = Point::new(x / units, y / units);
            if let Some(o) = stmt.get(i + 5) {
                orient = Orientation::from_def(o).unwrap_or_else(|| {
                    log::warn!("Component '{}': orientation {} treated as N", name, o);
                    Orientation::N
                });
            }
        }
    }

    db.add_cell(name, lib_name, pos, orient, is_fixed);
    Ok(())
}

fn io_pin(db: &mut NetlistDB, stmt: &[String], units: f64) -> Result<()> {
    let pin_name = field(stmt, 1)?.to_string();
    let mut net_name = None;
    let mut layer = None;
    let mut local: Option<Rect> = None;
    let mut pos = Point::new(0.0, 0.0);

    let mut i = 2;
    while i < stmt.len() {
        match stmt[i].as_str() {
            "NET" => {
                net_name = stmt.get(i + 1).cloned();
                i += 1;
            }
            "LAYER" => {
                let name = field(stmt, i + 1)?;
                layer = db.layer_index(name);
                if layer.is_none() {
                    log::warn!("IO pin '{}' uses unknown layer '{}'", pin_name, name);
                }
                // LAYER name ( x1 y1 ) ( x2 y2 )
                let x1: f64 = field(stmt, i + 3)?.parse()?;
                let y1: f64 = field(stmt, i + 4)?.parse()?;
                let x2: f64 = field(stmt, i + 7)?.parse()?;
                let y2: f64 = field(stmt, i + 8)?.parse()?;
                local = Some(Rect::from_corners(
                    x1 / units,
                    y1 / units,
                    x2 / units,
                    y2 / units,
                ));
                i += 9;
            }
            "PLACED" | "FIXED" => {
                let x: f64 = field(stmt, i + 2)?.parse()?;
                let y: f64 = field(stmt, i + 3)?.parse()?;
                pos = Point::new(x / units, y / units);
                i += 4;
            }
            _ => {}
        }
        i += 1;
    }

    let Some(net_name) = net_name else {
        return Ok(());
    };
    let net = db.add_net(&net_name);
    let shapes = local
        .map(|r| {
            vec![LayerRect {
                layer,
                rect: r.translate(pos),
            }]
        })
        .unwrap_or_default();
    db.add_io_pin(&pin_name, net, shapes);
    Ok(())
}

fn net(db: &mut NetlistDB, stmt: &[String]) {
    let Some(net_name) = stmt.get(1) else {
        return;
    };
    let net_id = db.add_net(net_name);

    let mut i = 2;
    while i < stmt.len() {
        if stmt[i] == "+" {
            break;
        }
        if stmt[i] == "(" && i + 2 < stmt.len() {
            let node = &stmt[i + 1];
            let pin_name = &stmt[i + 2];
            // IO pins are attached to their net in the PINS section.
            if node != "PIN" {
                match db.cell_name_map.get(node.as_str()).copied() {
                    Some(cell_id) => {
                        db.connect(cell_id, pin_name, net_id);
                    }
                    None => log::warn!("Net '{}' references unknown component '{}'", net_name, node),
                }
            }
            i += 3;
            continue;
        }
        i += 1;
    }
}

fn field(stmt: &[String], i: usize) -> Result<&str> {
    stmt.get(i)
        .map(String::as_str)
        .with_context(|| format!("truncated statement: '{}'", stmt.join(" ")))
}
