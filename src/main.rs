//! exchange-sim entry point.
//!
//! Runs an exchange client against in-process producers and reports how
//! pages moved through it.
//!
//! ## CLI Subcommands
//!
//! - `exchange-sim` or `exchange-sim run` - Run a simulation (default)
//! - `exchange-sim config show|defaults|validate` - Inspect configuration

use std::path::Path;
use std::process::ExitCode;

use exchange_client::cli::{self, config_cmd};
use exchange_client::telemetry::{self, LogConfig, LogFormat};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("run");

    match command {
        _ if command == "run" || command.starts_with("--") => {
            let start = if command == "run" { 2 } else { 1 };
            let rest = args.get(start..).unwrap_or_default();
            match cli::parse_args(rest) {
                Ok(options) => run(options),
                Err(e) => {
                    eprintln!("{e}");
                    print_command_help("run");
                    ExitCode::from(2u8)
                }
            }
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show(args.get(3).map(|s| s.as_str()) == Some("--json"));
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => {
                    let path = match args.get(3).map(|s| s.as_str()) {
                        Some("--file") => args.get(4).map(Path::new),
                        _ => None,
                    };
                    let code = config_cmd::run_validate(path);
                    ExitCode::from(code as u8)
                }
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("exchange-sim {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn run(options: cli::SimOptions) -> ExitCode {
    let mut log_config = LogConfig::from_env();
    if std::env::var("EXCHANGE_LOG_FORMAT").is_err() {
        log_config.format = LogFormat::Compact;
    }
    if let Err(e) = telemetry::init_logging(&log_config) {
        eprintln!("Logging setup failed: {e}");
        return ExitCode::FAILURE;
    }
    telemetry::init_metrics();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli::worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let json = options.json;
    let result = runtime.block_on(async move {
        tokio::select! {
            result = cli::run_sim(options) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    });

    match result {
        Some(Ok(report)) => {
            cli::print_report(&report, json);
            ExitCode::SUCCESS
        }
        Some(Err(e)) => {
            eprintln!("Simulation failed: {e}");
            ExitCode::from(e.exit_code())
        }
        None => {
            eprintln!("Interrupted");
            ExitCode::from(130u8)
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "exchange-sim v{}

USAGE:
    exchange-sim [COMMAND] [OPTIONS]

COMMANDS:
    run          Simulate producers feeding one exchange client (default)
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    EXCHANGE_MAX_QUEUED_BYTES                 Byte budget (default: 33554432)
    EXCHANGE_MIN_OUTPUT_BATCH_BYTES           Consumer batch threshold (default: 0)
    EXCHANGE_NUM_CONSUMERS                    Consumers per client (default: 1)
    EXCHANGE_REQUEST_DATA_MAX_WAIT_MS         Data request wait (default: 100)
    EXCHANGE_REQUEST_DATA_SIZES_MAX_WAIT_SECS Size probe wait (default: 10)
    EXCHANGE_SIM_THREADS                      Runtime worker threads (default: CPUs)
    EXCHANGE_LOG                              Log filter (default: info)
    EXCHANGE_LOG_FORMAT                       json, pretty or compact

EXIT CODES:
    0  Success
    1  Failure
    2  Invalid arguments or configuration
",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "run" => {
            eprintln!(
                "exchange-sim run - Simulate an exchange

USAGE:
    exchange-sim run [OPTIONS]

OPTIONS:
    --producers N        Producer tasks (default: 4)
    --pages N            Pages per producer (default: 256)
    --page-bytes N       Maximum page size (default: 65536)
    --interval-ms N      Pause between produced pages (default: 0)
    --consumer-bytes N   Bytes per consumer batch (default: 1048576)
    --config FILE        Load client configuration from a TOML file
    --json               Print the report as JSON
"
            );
        }
        "config" => {
            eprintln!(
                "exchange-sim config - Inspect configuration

USAGE:
    exchange-sim config show [--json]
    exchange-sim config defaults
    exchange-sim config validate [--file FILE]
"
            );
        }
        _ => print_usage(),
    }
}
