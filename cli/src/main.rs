use clap::{Parser, Subcommand};
use maze_common::db::core::{IO_CELL_NAME, NetlistDB, SegmentKind};
use maze_common::db::parser::{def, lef};
use maze_common::util::config::Config;
use maze_common::util::logger;
use maze_router::RouteReport;
use maze_router::utils::conversion::GridConverter;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Log search and rip-up decisions.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Route the input design and write the routed DEF.
    Route {
        /// Also write the run summary as TOML.
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },
    /// Print the layer stack, grid size and net counts of the input design.
    Info,
}

#[derive(Serialize)]
struct ReportFile {
    attempted: usize,
    routed: usize,
    total_routes: usize,
    conflicted: Vec<String>,
    abandoned: Vec<AbandonedEntry>,
}

#[derive(Serialize)]
struct AbandonedEntry {
    name: String,
    endpoints: Vec<[f64; 2]>,
}

impl From<&RouteReport> for ReportFile {
    fn from(r: &RouteReport) -> Self {
        Self {
            attempted: r.attempted,
            routed: r.routed,
            total_routes: r.total_routes,
            conflicted: r.conflicted.clone(),
            abandoned: r
                .abandoned
                .iter()
                .map(|n| AbandonedEntry {
                    name: n.name.clone(),
                    endpoints: n.endpoints.iter().map(|p| [p.x, p.y]).collect(),
                })
                .collect(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(if args.verbose { "debug" } else { "info" });

    let config = if args.config.exists() {
        log::info!("Loading configuration from {:?}", args.config);
        let config_str = std::fs::read_to_string(&args.config)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?
    } else {
        log::warn!(
            "Configuration file {:?} not found. Using internal defaults.",
            args.config
        );
        Config::default()
    };

    let command = args.command.unwrap_or(Commands::Route { report: None });

    match command {
        Commands::Info => {
            validate_input_paths(&config)?;
            let db = load_design(&config)?;
            print_info(&db);
        }
        Commands::Route { report } => {
            validate_input_paths(&config)?;
            prepare_output_dir(&config.input.output_def)?;

            let summary = match run_routing(&config) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("{:#}", e);
                    std::process::exit(1);
                }
            };
            if let Some(path) = report {
                let text = toml::to_string(&ReportFile::from(&summary))?;
                std::fs::write(&path, text)?;
                log::info!("Wrote run summary to {:?}", path);
            }
            if !summary.abandoned.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn validate_input_paths(config: &Config) -> anyhow::Result<()> {
    for lef in &config.input.lef_files {
        if !Path::new(lef).exists() {
            return Err(anyhow::anyhow!("Input LEF file missing: {}", lef));
        }
    }
    if !Path::new(&config.input.def_file).exists() {
        return Err(anyhow::anyhow!(
            "Input DEF file missing: {}",
            config.input.def_file
        ));
    }
    Ok(())
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent() {
        if !parent.exists() && !parent.as_os_str().is_empty() {
            log::info!("Creating output directory: {:?}", parent);
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Reads every LEF in order, then the placed DEF.
fn load_design(config: &Config) -> anyhow::Result<NetlistDB> {
    let mut db = NetlistDB::new();
    for lef_path in &config.input.lef_files {
        log::info!("Parsing LEF: {}", lef_path);
        lef::parse(&mut db, lef_path)
            .map_err(|e| anyhow::anyhow!("Invalid LEF syntax in '{}': {:#}", lef_path, e))?;
    }

    log::info!("Parsing DEF: {}", config.input.def_file);
    def::parse(&mut db, &config.input.def_file).map_err(|e| {
        anyhow::anyhow!("Invalid DEF syntax in '{}': {:#}", config.input.def_file, e)
    })?;
    Ok(db)
}

fn print_info(db: &NetlistDB) {
    println!("Layers:");
    for layer in &db.layers {
        println!(
            "  {:<6} {:<10} pitch {:.3} x {:.3}  width {:.3}  keepout {:.3}",
            layer.name,
            format!("{:?}", layer.direction),
            layer.pitch_x,
            layer.pitch_y,
            layer.width,
            layer.route_keepout()
        );
    }

    let die = db.die_area;
    println!(
        "Die: ({:.3}, {:.3}) - ({:.3}, {:.3})",
        die.min.x, die.min.y, die.max.x, die.max.y
    );
    if !db.layers.is_empty() {
        let step_x = db.layers.iter().map(|l| l.pitch_x).fold(f64::INFINITY, f64::min);
        let step_y = db.layers.iter().map(|l| l.pitch_y).fold(f64::INFINITY, f64::min);
        println!(
            "Grid: {} x {} tracks on {} layers",
            GridConverter::channels(die.width(), step_x),
            GridConverter::channels(die.height(), step_y),
            db.layers.len()
        );
    }

    let multi = db.nets.iter().filter(|n| n.pins.len() >= 2).count();
    println!(
        "Cells: {}  Nets: {} ({} with two or more pins)",
        db.cells.iter().filter(|c| c.name != IO_CELL_NAME).count(),
        db.num_nets(),
        multi
    );
}

fn run_routing(config: &Config) -> anyhow::Result<RouteReport> {
    let mut db = load_design(config)?;
    if db.layers.is_empty() {
        return Err(anyhow::anyhow!("No layers defined! Cannot route."));
    }

    log::info!("Starting Routing...");
    let report = maze_router::route(&mut db, config).map_err(|e| anyhow::anyhow!(e))?;

    log::info!("Writing routed DEF to {}", config.input.output_def);
    save_def(&db, &config.input.output_def)?;
    Ok(report)
}

fn dbu(v: f64) -> i64 {
    (v * 1000.0).round() as i64
}

fn save_def(db: &NetlistDB, filename: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::io::BufWriter::new(std::fs::File::create(filename)?);

    writeln!(file, "VERSION 5.8 ;")?;
    writeln!(file, "DIVIDERCHAR \"/\" ;")?;
    writeln!(file, "BUSBITCHARS \"[]\" ;")?;
    writeln!(file, "DESIGN routed ;")?;
    writeln!(file, "UNITS DISTANCE MICRONS 1000 ;")?;
    writeln!(
        file,
        "DIEAREA ( {} {} ) ( {} {} ) ;",
        dbu(db.die_area.min.x),
        dbu(db.die_area.min.y),
        dbu(db.die_area.max.x),
        dbu(db.die_area.max.y)
    )?;

    let real_cells: Vec<usize> = (0..db.num_cells())
        .filter(|&i| db.cells[i].name != IO_CELL_NAME)
        .collect();

    writeln!(file, "COMPONENTS {} ;", real_cells.len())?;
    for &i in &real_cells {
        let pos = db.positions[i];
        let cell = &db.cells[i];
        writeln!(
            file,
            "- {} {} + {} ( {} {} ) {} ;",
            cell.name,
            cell.lib_name,
            if cell.is_fixed { "FIXED" } else { "PLACED" },
            dbu(pos.x),
            dbu(pos.y),
            cell.orient.as_def()
        )?;
    }
    writeln!(file, "END COMPONENTS")?;

    let io_pins = match db.cell_name_map.get(IO_CELL_NAME) {
        Some(&io) => db.cells[io.index()].pins.clone(),
        None => Vec::new(),
    };
    if !io_pins.is_empty() {
        writeln!(file, "PINS {} ;", io_pins.len())?;
        for &pin_id in &io_pins {
            let pin_name = &db.pin_names[pin_id.index()];
            let net_name = &db.nets[db.pin_to_net[pin_id.index()].index()].name;
            write!(file, "- {} + NET {}", pin_name, net_name)?;
            if let Some(shape) = db.pin_shapes[pin_id.index()].first() {
                let c = shape.rect.center();
                if let Some(layer) = shape.layer {
                    write!(
                        file,
                        " + LAYER {} ( {} {} ) ( {} {} )",
                        db.layers[layer as usize].name,
                        dbu(shape.rect.min.x - c.x),
                        dbu(shape.rect.min.y - c.y),
                        dbu(shape.rect.max.x - c.x),
                        dbu(shape.rect.max.y - c.y)
                    )?;
                }
                write!(file, " + PLACED ( {} {} ) N", dbu(c.x), dbu(c.y))?;
            }
            writeln!(file, " ;")?;
        }
        writeln!(file, "END PINS")?;
    }

    writeln!(file, "NETS {} ;", db.num_nets())?;
    for net in &db.nets {
        write!(file, "- {} ", net.name)?;
        for &pin_id in &net.pins {
            let cell_name = &db.cells[db.pin_to_cell[pin_id.index()].index()].name;
            let pin_name = &db.pin_names[pin_id.index()];
            if cell_name == IO_CELL_NAME {
                write!(file, "( PIN {} ) ", pin_name)?;
            } else {
                write!(file, "( {} {} ) ", cell_name, pin_name)?;
            }
        }
        writeln!(file)?;

        let mut keyword = "+ ROUTED";
        for seg in &net.route_segments {
            let layer_name = &db.layers[seg.layer as usize].name;
            match seg.kind {
                SegmentKind::Via => {
                    let upper = (seg.layer as usize + 1).min(db.layers.len() - 1);
                    writeln!(
                        file,
                        "  {} {} ( {} {} ) VIA_{}_{}",
                        keyword,
                        layer_name,
                        dbu(seg.p1.x),
                        dbu(seg.p1.y),
                        layer_name,
                        db.layers[upper].name
                    )?;
                }
                SegmentKind::Wire => {
                    writeln!(
                        file,
                        "  {} {} ( {} {} ) ( {} {} )",
                        keyword,
                        layer_name,
                        dbu(seg.p1.x),
                        dbu(seg.p1.y),
                        dbu(seg.p2.x),
                        dbu(seg.p2.y)
                    )?;
                }
            }
            keyword = "NEW";
        }
        writeln!(file, "  ;")?;
    }
    writeln!(file, "END NETS")?;
    writeln!(file, "END DESIGN")?;
    file.flush()
}
