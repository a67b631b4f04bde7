//! CLI subcommands for the `exchange-sim` binary.
//!
//! ## Usage
//!
//! ```bash
//! exchange-sim run --producers 8 --pages 1000   # Simulate an exchange
//! exchange-sim config show                      # Effective configuration
//! exchange-sim config validate --file sim.toml  # Check a config file
//! ```

pub mod config_cmd;
pub mod sim_cmd;

pub use sim_cmd::{parse_args, print_report, run_sim, SimError, SimOptions, SimReport};

/// Worker threads for the simulator runtime, from `EXCHANGE_SIM_THREADS`
/// or the number of CPUs.
pub fn worker_threads() -> usize {
    std::env::var("EXCHANGE_SIM_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(num_cpus::get)
        .max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_threads_has_a_floor() {
        assert!(worker_threads() >= 2);
    }
}
