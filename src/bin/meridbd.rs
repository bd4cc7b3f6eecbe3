//! # meridbd — Server Entry Point
//!
//! Thin startup shell around the catalog engine: parse arguments, load
//! and validate the instance configuration, take the instance lock, and
//! signal readiness. Connection handling and process supervision live
//! outside this binary.
//!
//! ## Usage
//!
//! ```bash
//! meridbd --instance <name> [--daemon]
//! ```
//!
//! ## Exit codes
//!
//! | Code | Meaning                         |
//! |------|---------------------------------|
//! | 0    | success                         |
//! | 1    | usage error                     |
//! | 2    | configuration / startup failure |
//! | 3    | daemonization failure           |
//! | 4    | runtime fatal error             |

use eyre::{bail, Result, WrapErr};
use std::env;
use std::process::ExitCode;

use meridb::config::InstanceOptions;
use meridb::Instance;

const EXIT_USAGE: u8 = 1;
const EXIT_STARTUP: u8 = 2;
const EXIT_DAEMONIZE: u8 = 3;
const EXIT_RUNTIME: u8 = 4;

struct Args {
    instance_name: String,
    daemon: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            print_usage();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.daemon {
        if let Err(error) = daemonize() {
            eprintln!("Error: {error}");
            return ExitCode::from(EXIT_DAEMONIZE);
        }
    }

    let instance = match start_instance(&args) {
        Ok(instance) => instance,
        Err(error) => {
            eprintln!("Error: {error:#}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    match run(instance) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn parse_args() -> Result<Option<Args>> {
    let args: Vec<String> = env::args().collect();

    let mut instance_name: Option<String> = None;
    let mut daemon = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            "--version" | "-v" => {
                println!("meridbd {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--daemon" => {
                daemon = true;
            }
            "--instance" => {
                i += 1;
                match args.get(i) {
                    Some(value) => instance_name = Some(value.clone()),
                    None => bail!("--instance requires a value"),
                }
            }
            other => bail!("Unknown option: {other}"),
        }
        i += 1;
    }

    match instance_name {
        Some(instance_name) => Ok(Some(Args {
            instance_name,
            daemon,
        })),
        None => bail!("--instance is required"),
    }
}

fn start_instance(args: &Args) -> Result<std::sync::Arc<Instance>> {
    let options = InstanceOptions::load(&args.instance_name)
        .wrap_err_with(|| format!("cannot load configuration of instance '{}'", args.instance_name))?;
    let instance = Instance::new(options, None)
        .wrap_err_with(|| format!("cannot start instance '{}'", args.instance_name))?;
    instance.finish_startup()?;
    Ok(instance)
}

fn run(_instance: std::sync::Arc<Instance>) -> Result<()> {
    // Connection servers are external collaborators; this shell only
    // keeps the instance (and its advisory lock) alive until terminated.
    loop {
        std::thread::park();
    }
}

fn daemonize() -> Result<()> {
    // SAFETY: fork/setsid in a single-threaded context, before any worker
    // threads exist; the parent exits immediately without running any
    // destructors that touch shared state.
    unsafe {
        let pid = libc::fork();
        if pid < 0 {
            bail!("fork failed: {}", std::io::Error::last_os_error());
        }
        if pid > 0 {
            libc::_exit(0);
        }
        if libc::setsid() < 0 {
            bail!("setsid failed: {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}

fn print_usage() {
    println!("meridbd - single-node relational database server");
    println!();
    println!("USAGE:");
    println!("    meridbd --instance <NAME> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --instance <NAME>  Instance to start (configuration under");
    println!("                       /etc/meridb/instances/<NAME>/config)");
    println!("    --daemon           Detach from the controlling terminal");
    println!("    -h, --help         Print help information");
    println!("    -v, --version      Print version information");
}
