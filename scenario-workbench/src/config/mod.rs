use crate::config::cli::CliOpt;

pub mod cli;

/// Validated scenario parameters
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ScenarioParams {
    /// Number of csma nodes besides the one shared with the point-to-point link (at least 1)
    pub n_csma: u32,
    pub verbose: bool,
}

impl ScenarioParams {
    pub fn new(n_csma: u32, verbose: bool) -> Self {
        Self {
            n_csma: n_csma.max(1),
            verbose,
        }
    }

    /// Number of nodes attached to the csma segment
    pub fn csma_node_count(&self) -> usize {
        self.n_csma as usize + 1
    }
}

impl From<&CliOpt> for ScenarioParams {
    fn from(options: &CliOpt) -> Self {
        Self::new(options.n_csma, options.verbose)
    }
}
