use std::time::Instant;

use clap::{Parser, Subcommand};

use simplelog::{debug, error, info, warn, ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use epanet_engine::error::EngineResult;
use epanet_engine::model::network::Network;
use epanet_engine::project::Project;

#[derive(Parser, Debug)]
#[command(
  version = "0.1.0",
  about = "Extended-period hydraulic and water quality simulation of pressurized pipe networks"
)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Run a simulation on a network
  Run {
    /// Network file (.json or .msgpack/.mpk)
    input_file: String,
    /// Output file for results (.json or .msgpack/.mpk)
    output_file: Option<String>,
    /// Run water quality along with the hydraulics
    #[arg(long)]
    quality: bool,
    /// Print verbose output during solving
    #[arg(short, long)]
    verbose: bool,
    /// Print results to stdout
    #[arg(long)]
    print_results: bool,
    /// Suppress all output except for errors
    #[arg(long)]
    quiet: bool,
  },
  /// Convert a network file to a different format
  Convert {
    /// Input file (.json or .msgpack/.mpk)
    input_file: String,
    /// Output file (.json or .msgpack/.mpk)
    output_file: String,
  },
}

fn main() -> Result<(), String> {
  let cli = Cli::parse();

  // Determine log level based on command
  let log_level = match &cli.command {
    Commands::Run { quiet, verbose, .. } => {
      if *quiet {
        LevelFilter::Error
      } else if *verbose {
        LevelFilter::Debug
      } else {
        LevelFilter::Info
      }
    }
    _ => LevelFilter::Info,
  };

  TermLogger::init(log_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto)
    .map_err(|e| format!("Failed to initialize logger: {e}"))?;

  let result = match cli.command {
    Commands::Run { input_file, output_file, quality, print_results, .. } => {
      run_simulation(&input_file, output_file.as_deref(), quality, print_results)
    }
    Commands::Convert { input_file, output_file } => convert_network(&input_file, &output_file),
  };
  result.map_err(|e| {
    error!("Error {}: {}", e.code(), e);
    e.to_string()
  })
}

/// Run a simulation on a network
fn run_simulation(input_file: &str, output_file: Option<&str>, quality: bool, print_results: bool) -> EngineResult<()> {
  let start_time = Instant::now();
  info!("Loading network from file: {}", input_file);

  let mut network = Network::default();
  network.read_file(input_file)?;
  info!("Loaded network with {} nodes and {} links", network.nodes.len(), network.links.len());
  debug!("Network loaded in {:?}", start_time.elapsed());

  let start_time = Instant::now();
  let mut project = Project::new(network)?;
  let results = project.run_simulation(quality)?;
  info!("Simulation finished in {:?}", start_time.elapsed());
  if let Some(warning) = project.warning() {
    warn!("{}", warning);
  }
  if let Some(balance) = &results.mass_balance {
    info!("Water quality mass balance ratio: {:.4}", balance.ratio());
  }

  if let Some(output_file) = output_file {
    let start_time = Instant::now();
    results.write(output_file)?;
    info!("Results written to {} in {:?}", output_file, start_time.elapsed());
  }

  if print_results {
    let Some(last) = results.times.len().checked_sub(1) else { return Ok(()) };
    println!("Results at t = {} s:", results.times[last]);
    println!("=== Heads:");
    for (i, id) in results.nodes.iter().enumerate() {
      println!("Node {}: {:.2}", id, results.heads[last][i]);
    }
    println!("=== Flows:");
    for (i, id) in results.links.iter().enumerate() {
      println!("Link {}: {:.2}", id, results.flows[last][i]);
    }
    if !results.energy.pumps.is_empty() {
      println!("=== Energy:");
      for pump in results.energy.pumps.iter() {
        println!(
          "Pump {}: {:.2} h on line, {:.1}% efficiency, {:.2} kW/cfs, {:.2} kWh, cost {:.2}",
          results.links[pump.link],
          pump.hours_on_line,
          pump.average_efficiency(),
          pump.average_kw_per_flow(),
          pump.kwh,
          pump.cost
        );
      }
    }
    if let Some(quality) = results.node_quality.get(last) {
      println!("=== Quality:");
      for (i, id) in results.nodes.iter().enumerate() {
        println!("Node {}: {:.3}", id, quality[i]);
      }
    }
  }
  Ok(())
}

/// Convert a network file to a different format
fn convert_network(input_file: &str, output_file: &str) -> EngineResult<()> {
  let start_time = Instant::now();

  info!("Loading network from file: {}", input_file);
  let mut network = Network::default();
  network.read_file(input_file)?;

  let load_time = Instant::now();
  info!(
    "Loaded network with {} nodes and {} links in {:?}",
    network.nodes.len(),
    network.links.len(),
    load_time.duration_since(start_time)
  );

  info!("Converting to: {}", output_file);
  network.save_network(output_file)?;
  info!("Network saved in {:?}", load_time.elapsed());
  Ok(())
}
