pub mod algo;
pub mod check;
pub mod commit;
pub mod detailed_router;
pub mod error;
pub mod grid;
pub mod netlist;
pub mod obstruction;
pub mod order;
pub mod utils;

#[cfg(test)]
mod testutil;

pub use detailed_router::{AbandonedNet, RouteReport};
pub use error::RouteError;

use maze_common::db::core::NetlistDB;
use maze_common::util::config::Config;

pub fn route(db: &mut NetlistDB, config: &Config) -> Result<RouteReport, RouteError> {
    detailed_router::run(db, &config.detailed_routing)
}
