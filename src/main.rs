use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use toml::Table;
use tlbcoh::memsys::{Protocol, SystemConfig};
use tlbcoh::sim::config::{Config, SimConfig};
use tlbcoh::sim::top::Sim;

#[derive(Parser)]
#[command(version, about)]
struct TlbcohArgs {
    #[arg(help="Path to config.toml")]
    config_path: PathBuf,
    #[arg(long, help="Override number of cores")]
    num_cores: Option<usize>,
    #[arg(long, help="Override coherence protocol (none, moesi)")]
    protocol: Option<Protocol>,
    #[arg(long, help="Override inclusion between levels")]
    inclusive: Option<bool>,
    #[arg(long, help="Override simulation timeout in cycles")]
    timeout: Option<u64>,
    #[arg(long, help="Enable log at level (0:none, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help="Include final cache contents in the report")]
    dump_contents: Option<bool>,
    #[arg(long, help="Write the JSON report here instead of stdout")]
    output: Option<PathBuf>,
}

fn init_logger(level: u64) {
    let filter = match level {
        0 => "off",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}

pub fn main() -> Result<()> {
    let argv = TlbcohArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;
    let mut sim_config = SimConfig::from_section(config_table.get("sim"));
    let mut system_config = SystemConfig::from_section(config_table.get("system"));

    // override toml configs with argv
    sim_config.log_level = argv.log.unwrap_or(sim_config.log_level);
    sim_config.timeout = argv.timeout.unwrap_or(sim_config.timeout);
    sim_config.dump_contents = argv.dump_contents.unwrap_or(sim_config.dump_contents);
    system_config.num_cores = argv.num_cores.unwrap_or(system_config.num_cores);
    system_config.protocol = argv.protocol.unwrap_or(system_config.protocol);
    system_config.inclusive = argv.inclusive.unwrap_or(system_config.inclusive);

    init_logger(sim_config.log_level);

    let report = Sim::new(sim_config, system_config).simulate();
    let json = serde_json::to_string_pretty(&report).context("cannot serialize run report")?;
    match argv.output {
        Some(path) => fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
