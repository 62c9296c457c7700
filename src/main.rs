//! termweave - replay a recorded terminal byte log through a session
//!
//! Feeds a file (or stdin) through an in-memory backend in chunks, exactly
//! as live output notifications would arrive, flushes a snapshot, then
//! loads a second session from that snapshot and prints both screens.
//!
//! # Quick Start
//!
//! ```text
//! termweave session.log                 # 80x24, 4 KiB chunks
//! termweave --cols 120 --rows 40 log    # custom size
//! cat out.log | termweave --chunk 64    # many small notifications
//! ```

use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use termweave::{config, Config, MemoryBackend, SessionController, TermSize, TerminalSurface, VtSurface};

/// Command line options
struct Args {
    cols: u16,
    rows: u16,
    /// Bytes per simulated output notification
    chunk: usize,
    /// Input log; stdin when absent
    file: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            chunk: 4096,
            file: None,
        }
    }
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

const SESSION_ID: &str = "replay";

fn print_version() {
    eprintln!("termweave {}", VERSION);
}

fn print_help() {
    eprintln!("termweave {} - terminal session replay", VERSION);
    eprintln!();
    eprintln!("Usage: termweave [OPTIONS] [FILE]");
    eprintln!();
    eprintln!("Replays FILE (or stdin) as backend output, saves a snapshot,");
    eprintln!("reloads a second session from it and prints both screens.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --cols <N>            Terminal width (default 80)");
    eprintln!("  --rows <N>            Terminal height (default 24)");
    eprintln!("  --chunk <N>           Bytes per output notification (default 4096)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.termweave/config.toml");
    eprintln!("Log file:      ~/.termweave/termweave.log (level from RUST_LOG)");
}

fn parse_number<T: std::str::FromStr>(args: &[String], i: usize, name: &str) -> Result<T, String> {
    let value = args
        .get(i)
        .ok_or_else(|| format!("Missing value for {}", name))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", name, value))
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "--cols" => {
                i += 1;
                parsed.cols = parse_number(&args, i, "--cols")?;
            }
            "--rows" => {
                i += 1;
                parsed.rows = parse_number(&args, i, "--rows")?;
            }
            "--chunk" => {
                i += 1;
                parsed.chunk = parse_number(&args, i, "--chunk")?;
            }
            arg if arg.starts_with('-') && arg != "-" => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            path => {
                if parsed.file.is_some() {
                    return Err("Only one input file can be given".to_string());
                }
                if path != "-" {
                    parsed.file = Some(PathBuf::from(path));
                }
            }
        }
        i += 1;
    }

    if parsed.cols == 0 || parsed.rows == 0 || parsed.chunk == 0 {
        return Err("--cols, --rows and --chunk must be positive".to_string());
    }
    Ok(parsed)
}

/// Log to ~/.termweave/termweave.log; stdout is for the screens
fn init_logging() {
    let log_path = config::data_dir()
        .map(|dir| dir.join("termweave.log"))
        .unwrap_or_else(|| PathBuf::from("termweave.log"));

    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn read_input(file: Option<&PathBuf>) -> anyhow::Result<Vec<u8>> {
    let mut data = Vec::new();
    match file {
        Some(path) => {
            data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        }
        None => {
            io::stdin()
                .read_to_end(&mut data)
                .context("failed to read stdin")?;
        }
    }
    Ok(data)
}

fn print_screen(label: &str, session: &SessionController<VtSurface>) {
    let Some(surface) = session.surface() else {
        return;
    };
    let status = session.status();
    println!(
        "== {} ({}, offset {}, title {:?})",
        label,
        surface.dimensions(),
        status.stream_offset,
        surface.title()
    );
    let mut lines = surface.screen_lines();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    for line in lines {
        println!("{}", line);
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("termweave starting...");

    let config = Config::load();
    let data = read_input(args.file.as_ref())?;
    let size = TermSize::new(args.rows, args.cols);
    let backend = MemoryBackend::new();

    let mut live = SessionController::new(SESSION_ID, VtSurface::new(size), Box::new(backend.clone()), &config);
    live.fit(size);
    live.load(Instant::now());

    for chunk in data.chunks(args.chunk) {
        backend.append(SESSION_ID, chunk);
        live.process_backend_events();
        live.poll_timers(Instant::now());
    }
    if !live.flush_cache() {
        info!("no output since the last snapshot");
    }
    print_screen("live", &live);
    live.dispose();

    let Some(snapshot) = backend.cache(SESSION_ID, &config.output.cache_kind) else {
        if data.is_empty() {
            return Ok(());
        }
        bail!("snapshot was not saved");
    };
    info!(bytes = snapshot.data.len(), offset = snapshot.offset(), "reloading from snapshot");

    let mut reloaded =
        SessionController::new(SESSION_ID, VtSurface::new(size), Box::new(backend.clone()), &config);
    reloaded.load(Instant::now());
    println!();
    print_screen("reloaded", &reloaded);

    Ok(())
}
