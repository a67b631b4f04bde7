//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration from `EXCHANGE_*` environment variables or a
//! TOML file; nothing is started.

use std::path::Path;

use crate::config::{
    self, EffectiveConfig, ExchangeClientConfig, DEFAULT_MAX_QUEUED_BYTES,
    DEFAULT_REQUEST_DATA_MAX_WAIT, DEFAULT_REQUEST_DATA_SIZES_MAX_WAIT,
};

const SHOW_TASK_ID: &str = "exchange-sim";

/// Print the effective env-derived config to stdout.
pub fn run_show(json: bool) {
    let cfg = config::load(SHOW_TASK_ID, 0).effective_config();
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Failed to serialize config: {e}"),
        }
    } else {
        print_config(&cfg);
    }
}

/// Print default values (no env overrides) to stdout.
pub fn run_defaults() {
    println!("EXCHANGE_MAX_QUEUED_BYTES={DEFAULT_MAX_QUEUED_BYTES}");
    println!("EXCHANGE_MIN_OUTPUT_BATCH_BYTES=0");
    println!("EXCHANGE_NUM_CONSUMERS=1");
    println!(
        "EXCHANGE_REQUEST_DATA_MAX_WAIT_MS={}",
        DEFAULT_REQUEST_DATA_MAX_WAIT.as_millis()
    );
    println!(
        "EXCHANGE_REQUEST_DATA_SIZES_MAX_WAIT_SECS={}",
        DEFAULT_REQUEST_DATA_SIZES_MAX_WAIT.as_secs()
    );
}

/// Validate a config file, or the environment when `path` is `None`.
///
/// Returns 0 if valid, 1 on warnings, 2 on errors.
pub fn run_validate(path: Option<&Path>) -> i32 {
    let cfg = match path {
        Some(path) => match config::from_toml_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("ERROR: {e}");
                return 2;
            }
        },
        None => config::load(SHOW_TASK_ID, 0),
    };
    if let Err(e) = cfg.validate() {
        eprintln!("ERROR: {e}");
        return 2;
    }

    let warnings = collect_warnings(&cfg);
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn collect_warnings(cfg: &ExchangeClientConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if cfg.request_data_max_wait.is_zero() {
        warnings.push("request_data_max_wait is 0; idle sources will be polled in a tight loop".to_string());
    }
    if cfg.min_output_batch_bytes == cfg.max_queued_bytes {
        warnings.push(format!(
            "min_output_batch_bytes equals max_queued_bytes ({}); consumers wait for a full queue",
            cfg.max_queued_bytes
        ));
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    println!("EXCHANGE_MAX_QUEUED_BYTES={}", cfg.max_queued_bytes);
    println!("EXCHANGE_MIN_OUTPUT_BATCH_BYTES={}", cfg.min_output_batch_bytes);
    println!("EXCHANGE_NUM_CONSUMERS={}", cfg.number_of_consumers);
    println!("EXCHANGE_REQUEST_DATA_MAX_WAIT_MS={}", cfg.request_data_max_wait_ms);
    println!(
        "EXCHANGE_REQUEST_DATA_SIZES_MAX_WAIT_SECS={}",
        cfg.request_data_sizes_max_wait_secs
    );
}
