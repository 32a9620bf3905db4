use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

/// Runs a point-to-point link followed by a csma segment, with a udp echo client on one end and
/// a udp echo server on the other
#[derive(Parser, Debug, Clone)]
pub struct CliOpt {
    /// Number of "extra" csma nodes/devices (0 is treated as 1)
    #[arg(long = "nCsma", default_value_t = 100)]
    pub n_csma: u32,

    /// Tell echo applications to log if true
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
    )]
    pub verbose: bool,
}
