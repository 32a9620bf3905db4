use crate::config::ScenarioParams;
use crate::config::cli::CliOpt;
use clap::Parser;
use sim_network::pcap_exporter::FileBasedPcapExporterFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod scenario;
mod util;

fn main() -> anyhow::Result<()> {
    let options = CliOpt::parse();
    let params = ScenarioParams::from(&options);
    init_logging(params.verbose);

    println!("--- Params ---");
    println!("* nCsma: {}", params.n_csma);
    println!("* verbose: {}", params.verbose);
    println!("* Network seed: {}", scenario::NETWORK_RNG_SEED);

    let pcap_exporter_factory = Arc::new(FileBasedPcapExporterFactory {
        directory: PathBuf::from("."),
    });
    let (layout, report) = scenario::run(&params, pcap_exporter_factory)?;

    util::print_topology(&layout);
    util::print_applications(&layout, &report);
    util::print_node_stats(&layout, &report);
    util::print_capture_files(&report);

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_directives = if verbose {
        "warn,udp_echo_client=info,udp_echo_server=info"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_level(false)
        .init();
}
