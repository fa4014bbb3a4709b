use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detailed_routing: DetailedRoutingConfig,
    #[serde(default)]
    pub input: InputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detailed_routing: DetailedRoutingConfig::default(),
            input: InputConfig::default(),
        }
    }
}

/// Cost model and search limits of the maze router.
#[derive(Debug, Deserialize, Clone)]
pub struct DetailedRoutingConfig {
    /// Cost of one track step along the layer's preferred direction.
    #[serde(default = "default_seg_cost")]
    pub seg_cost: u32,
    #[serde(default = "default_via_cost")]
    pub via_cost: u32,
    /// Cost of one track step against the preferred direction.
    #[serde(default = "default_jog_cost")]
    pub jog_cost: u32,
    /// Penalty for passing over or under a multi-tap pin.
    #[serde(default = "default_xver_cost")]
    pub xver_cost: u32,
    /// Penalty for passing over or under a single-tap pin.
    #[serde(default = "default_block_cost")]
    pub block_cost: u32,
    #[serde(default = "default_conflict_cost")]
    pub conflict_cost: u32,
    #[serde(default = "default_num_passes")]
    pub num_passes: u32,
    /// Maximum number of vias stacked at one grid point.
    #[serde(default = "default_stacked_contacts")]
    pub stacked_contacts: u8,
    #[serde(default = "default_max_search_points")]
    pub max_search_points: usize,
    #[serde(default = "default_stall_budget_factor")]
    pub stall_budget_factor: usize,
    #[serde(default)]
    pub critical_nets: Vec<String>,
    #[serde(default)]
    pub dont_route: Vec<String>,
}

impl Default for DetailedRoutingConfig {
    fn default() -> Self {
        Self {
            seg_cost: default_seg_cost(),
            via_cost: default_via_cost(),
            jog_cost: default_jog_cost(),
            xver_cost: default_xver_cost(),
            block_cost: default_block_cost(),
            conflict_cost: default_conflict_cost(),
            num_passes: default_num_passes(),
            stacked_contacts: default_stacked_contacts(),
            max_search_points: default_max_search_points(),
            stall_budget_factor: default_stall_budget_factor(),
            critical_nets: Vec::new(),
            dont_route: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_lef_files")]
    pub lef_files: Vec<String>,
    #[serde(default = "default_def_file")]
    pub def_file: String,
    #[serde(default = "default_output_def")]
    pub output_def: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            lef_files: default_lef_files(),
            def_file: default_def_file(),
            output_def: default_output_def(),
        }
    }
}

fn default_seg_cost() -> u32 {
    1
}

fn default_via_cost() -> u32 {
    5
}

fn default_jog_cost() -> u32 {
    10
}

fn default_xver_cost() -> u32 {
    4
}

fn default_block_cost() -> u32 {
    25
}

fn default_conflict_cost() -> u32 {
    50
}

fn default_num_passes() -> u32 {
    10
}

fn default_stacked_contacts() -> u8 {
    2
}

fn default_max_search_points() -> usize {
    4_000_000
}

fn default_stall_budget_factor() -> usize {
    4
}

fn default_lef_files() -> Vec<String> {
    vec!["inputs/tech.lef".to_string()]
}

fn default_def_file() -> String {
    "inputs/placed.def".to_string()
}

fn default_output_def() -> String {
    "output/routed.def".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.detailed_routing.via_cost, 5);
        assert_eq!(cfg.detailed_routing.num_passes, 10);
        assert_eq!(cfg.input.def_file, "inputs/placed.def");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [detailed_routing]
            jog_cost = 3
            stacked_contacts = 1
            critical_nets = ["clk", "rst"]
            "#,
        )
        .unwrap();
        let dr = &cfg.detailed_routing;
        assert_eq!(dr.jog_cost, 3);
        assert_eq!(dr.stacked_contacts, 1);
        assert_eq!(dr.seg_cost, 1);
        assert_eq!(dr.critical_nets, vec!["clk", "rst"]);
        assert!(dr.dont_route.is_empty());
    }
}
