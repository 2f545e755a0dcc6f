//! sheetcache-worker - formula evaluation worker speaking JSON lines over stdio

mod config;
mod error;
mod transport;

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use sheetcache_core::worker::{RequestHandler, Worker};
use sheetcache_core::RhaiEvaluator;

use crate::error::WorkerError;

fn print_usage() {
    eprintln!("Usage: sheetcache-worker [OPTIONS]");
    eprintln!();
    eprintln!("Reads JSON requests from stdin (one per line) and writes one JSON");
    eprintln!("response per line to stdout.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>       Load settings from TOML file (default: worker.toml in the config dir)");
    eprintln!("  -f, --functions <FILE>    Load custom Rhai functions (can be repeated)");
    eprintln!("  --max-size <N>            Maximum number of cached results");
    eprintln!("  --ttl <MS>                Cache entry lifetime in milliseconds");
    eprintln!("  -h, --help                Print help");
}

struct Options {
    config_file: Option<PathBuf>,
    functions_files: Vec<PathBuf>,
    max_size: Option<usize>,
    ttl_ms: Option<u64>,
}

fn parse_number<T: std::str::FromStr>(flag: &'static str, value: &str) -> Result<T, WorkerError> {
    value.parse().map_err(|_| WorkerError::InvalidArgument {
        flag,
        value: value.to_string(),
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    let mut options = Options {
        config_file: None,
        functions_files: Vec::new(),
        max_size: None,
        ttl_ms: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return;
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a file path");
                    std::process::exit(1);
                }
                options.config_file = Some(PathBuf::from(&args[i]));
            }
            "-f" | "--functions" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --functions requires a file path");
                    std::process::exit(1);
                }
                options.functions_files.push(PathBuf::from(&args[i]));
            }
            "--max-size" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --max-size requires a value");
                    std::process::exit(1);
                }
                match parse_number("--max-size", &args[i]) {
                    Ok(n) => options.max_size = Some(n),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            "--ttl" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --ttl requires a value");
                    std::process::exit(1);
                }
                match parse_number("--ttl", &args[i]) {
                    Ok(n) => options.ttl_ms = Some(n),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            arg => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if let Err(e) = run(options) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(options: Options) -> anyhow::Result<()> {
    let (mut cache_config, warnings) = config::load_config(options.config_file.as_ref());
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }
    if let Some(max_size) = options.max_size {
        cache_config.max_size = max_size;
    }
    if let Some(ttl_ms) = options.ttl_ms {
        cache_config.ttl_ms = ttl_ms;
    }
    cache_config.validate()?;

    let evaluator = match config::read_functions(&options.functions_files)
        .context("failed to load custom functions")?
    {
        Some(script) => {
            RhaiEvaluator::with_functions(script).context("failed to compile custom functions")?
        }
        None => RhaiEvaluator::new(),
    };

    log::info!(
        "starting worker: max_size={}, ttl_ms={}, custom functions: {}",
        cache_config.max_size,
        cache_config.ttl_ms,
        options.functions_files.len()
    );
    let worker = Worker::spawn(RequestHandler::new(evaluator, cache_config))?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout().lock();
    let written = transport::serve(worker, stdin, stdout)?;
    log::info!("input closed after {} responses", written);
    Ok(())
}
