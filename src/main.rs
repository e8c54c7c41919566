//! lenia-stream CLI - run the windowed simulation from JSON configuration.

use std::fs;
use std::path::PathBuf;

use lenia_stream::render;
use lenia_stream::schema::{Seed, SimulationConfig};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return;
    }

    // Default configuration unless a config file is given.
    let (config, seed) = match args.get(1) {
        Some(path) => load_config(PathBuf::from(path)),
        None => (SimulationConfig::default(), Seed::default()),
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    log::info!(
        "Grid: {}x{} ({} channels), {} kernels, dt {}",
        config.width,
        config.height,
        config.channels,
        config.kernels.len(),
        config.dt
    );

    if let Err(e) = render::run(config, seed) {
        eprintln!("Event loop error: {}", e);
        std::process::exit(1);
    }
}

/// Load `config.json` and, if present next to it, `config.seed.json`.
fn load_config(config_path: PathBuf) -> (SimulationConfig, Seed) {
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });
    let config: SimulationConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    let seed_path = config_path.with_extension("seed.json");
    let seed: Seed = if seed_path.exists() {
        let seed_str = fs::read_to_string(&seed_path).unwrap_or_else(|e| {
            eprintln!("Error reading seed file: {}", e);
            std::process::exit(1);
        });
        serde_json::from_str(&seed_str).unwrap_or_else(|e| {
            eprintln!("Error parsing seed: {}", e);
            std::process::exit(1);
        })
    } else {
        Seed::default()
    };

    (config, seed)
}

fn print_example_config() {
    let config = SimulationConfig::default();
    let seed = Seed::default();

    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
    println!();
    println!("Example seed (config.seed.json):");
    println!("{}", serde_json::to_string_pretty(&seed).unwrap());
}
