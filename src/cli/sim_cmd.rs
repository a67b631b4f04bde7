//! `exchange-sim run`: drive an exchange client against in-process producers.
//!
//! Spawns producer tasks that fill [`OutputBuffer`]s with randomly sized
//! pages, registers them with one client and drains it from several
//! consumers. Produced and consumed totals must match.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::{self, ExchangeClientConfig};
use crate::exchange::{
    CallbackExecutor, ConfigError, ExchangeClient, ExchangeConsumer, ExchangeError,
    OutputBuffer, OutputBufferRegistry, RuntimeMetric, SerializedPage,
};
use crate::memory::MemoryTracker;

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOptions {
    pub producers: usize,
    pub pages_per_producer: usize,
    pub max_page_bytes: usize,
    /// Pause between produced pages; zero produces as fast as possible.
    pub produce_interval: Duration,
    pub consumer_max_bytes: u64,
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            producers: 4,
            pages_per_producer: 256,
            max_page_bytes: 64 * 1024,
            produce_interval: Duration::ZERO,
            consumer_max_bytes: 1 << 20,
            config_path: None,
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("Task failed: {0}")]
    Task(String),
    #[error("Lost data: produced {produced} bytes, consumed {consumed}")]
    Mismatch { produced: u64, consumed: u64 },
}

impl SimError {
    /// Process exit code: 2 for bad arguments or configuration, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidArgument(_) => 2,
            Self::Config(ConfigError::NoRuntime) => 1,
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub producers: usize,
    pub consumers: usize,
    pub produced_pages: u64,
    pub produced_bytes: u64,
    pub consumed_pages: u64,
    pub consumed_bytes: u64,
    pub elapsed_ms: u64,
    pub peak_memory_bytes: i64,
    pub stats: HashMap<String, RuntimeMetric>,
}

/// Parse `run` flags. `args` starts after the subcommand.
pub fn parse_args(args: &[String]) -> Result<SimOptions, SimError> {
    let mut options = SimOptions::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--json" {
            options.json = true;
            i += 1;
            continue;
        }
        let value = args
            .get(i + 1)
            .ok_or_else(|| SimError::InvalidArgument(format!("missing value for {flag}")))?;
        match flag {
            "--producers" => options.producers = parse_number(flag, value)?,
            "--pages" => options.pages_per_producer = parse_number(flag, value)?,
            "--page-bytes" => options.max_page_bytes = parse_number(flag, value)?,
            "--interval-ms" => {
                options.produce_interval = Duration::from_millis(parse_number(flag, value)?)
            }
            "--consumer-bytes" => options.consumer_max_bytes = parse_number(flag, value)?,
            "--config" => options.config_path = Some(PathBuf::from(value)),
            _ => return Err(SimError::InvalidArgument(format!("unknown flag {flag}"))),
        }
        i += 2;
    }
    if options.producers == 0 || options.max_page_bytes == 0 {
        return Err(SimError::InvalidArgument(
            "--producers and --page-bytes must be positive".to_string(),
        ));
    }
    Ok(options)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, SimError> {
    value
        .parse()
        .map_err(|_| SimError::InvalidArgument(format!("{flag} expects a number, got {value:?}")))
}

fn client_config(options: &SimOptions) -> Result<ExchangeClientConfig, SimError> {
    let task_id = format!("sim-consumer-{}", Uuid::new_v4());
    match &options.config_path {
        Some(path) => {
            let mut config = config::from_toml_file(path)?;
            if config.task_id.is_empty() {
                config.task_id = task_id;
            }
            Ok(config)
        }
        None => Ok(config::load(task_id, 0)),
    }
}

/// Run the simulation on the current runtime.
pub async fn run_sim(options: SimOptions) -> Result<SimReport, SimError> {
    let config = client_config(&options)?;
    let destination = config.destination;
    let consumers = config.number_of_consumers;
    info!(
        producers = options.producers,
        pages_per_producer = options.pages_per_producer,
        consumers,
        "starting exchange simulation"
    );

    let registry = Arc::new(OutputBufferRegistry::new());
    let producer_memory = MemoryTracker::new_root("producers", None);
    let client_memory = MemoryTracker::new_root("exchange-client", None);
    let client = ExchangeClient::new(
        config,
        Arc::clone(&client_memory),
        CallbackExecutor::current()?,
        registry.clone(),
    )?;

    let start = Instant::now();
    let mut producers = Vec::with_capacity(options.producers);
    let mut produced_bytes = 0u64;
    for _ in 0..options.producers {
        let buffer = OutputBuffer::new(
            format!("producer-{}", Uuid::new_v4()),
            Arc::clone(&producer_memory),
        );
        registry.register(Arc::clone(&buffer));
        client.add_remote_task_id(buffer.task_id())?;

        let sizes = random_page_sizes(options.pages_per_producer, options.max_page_bytes);
        produced_bytes += sizes.iter().sum::<usize>() as u64;
        let interval = options.produce_interval;
        producers.push(tokio::spawn(async move {
            for size in sizes {
                buffer.enqueue(destination, SerializedPage::new(vec![0u8; size]));
                if interval.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(interval).await;
                }
            }
            buffer.no_more_data();
        }));
    }
    client.no_more_remote_tasks();

    let readers: Vec<_> = (0..consumers)
        .map(|consumer_id| {
            let consumer =
                ExchangeConsumer::new(Arc::clone(&client), consumer_id, options.consumer_max_bytes);
            tokio::spawn(async move { consumer.drain().await })
        })
        .collect();

    let mut consumed_pages = 0u64;
    let mut consumed_bytes = 0u64;
    for reader in readers {
        let (pages, bytes) = reader.await.map_err(|e| SimError::Task(e.to_string()))??;
        consumed_pages += pages;
        consumed_bytes += bytes;
    }
    for producer in producers {
        producer.await.map_err(|e| SimError::Task(e.to_string()))?;
    }

    let report = SimReport {
        producers: options.producers,
        consumers,
        produced_pages: (options.producers * options.pages_per_producer) as u64,
        produced_bytes,
        consumed_pages,
        consumed_bytes,
        elapsed_ms: start.elapsed().as_millis() as u64,
        peak_memory_bytes: client_memory.peak(),
        stats: client.stats(),
    };
    client.close();
    info!(
        consumed_pages,
        consumed_bytes,
        elapsed_ms = report.elapsed_ms,
        "exchange simulation finished"
    );

    if consumed_bytes != produced_bytes {
        return Err(SimError::Mismatch {
            produced: produced_bytes,
            consumed: consumed_bytes,
        });
    }
    Ok(report)
}

fn random_page_sizes(count: usize, max_page_bytes: usize) -> Vec<usize> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(1..=max_page_bytes)).collect()
}

/// Print a report as text or JSON.
pub fn print_report(report: &SimReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Failed to serialize report: {e}"),
        }
        return;
    }
    println!("producers:       {}", report.producers);
    println!("consumers:       {}", report.consumers);
    println!("pages:           {} / {}", report.consumed_pages, report.produced_pages);
    println!("bytes:           {} / {}", report.consumed_bytes, report.produced_bytes);
    println!("elapsed:         {} ms", report.elapsed_ms);
    println!("peak memory:     {} bytes", report.peak_memory_bytes);
    let mut names: Vec<&String> = report.stats.keys().collect();
    names.sort();
    for name in names {
        let metric = &report.stats[name];
        println!("{name}: sum={} count={}", metric.sum, metric.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_defaults() {
        assert_eq!(parse_args(&[]).unwrap(), SimOptions::default());
    }

    #[test]
    fn parse_all_flags() {
        let options = parse_args(&args(&[
            "--producers",
            "2",
            "--pages",
            "10",
            "--page-bytes",
            "512",
            "--interval-ms",
            "3",
            "--consumer-bytes",
            "4096",
            "--json",
        ]))
        .unwrap();
        assert_eq!(options.producers, 2);
        assert_eq!(options.pages_per_producer, 10);
        assert_eq!(options.max_page_bytes, 512);
        assert_eq!(options.produce_interval, Duration::from_millis(3));
        assert_eq!(options.consumer_max_bytes, 4096);
        assert!(options.json);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(parse_args(&args(&["--producers"])).is_err());
        assert!(parse_args(&args(&["--producers", "many"])).is_err());
        assert!(parse_args(&args(&["--producers", "0"])).is_err());
        assert!(parse_args(&args(&["--bogus", "1"])).is_err());
    }

    #[test]
    fn page_sizes_are_bounded() {
        let sizes = random_page_sizes(100, 7);
        assert_eq!(sizes.len(), 100);
        assert!(sizes.iter().all(|&s| (1..=7).contains(&s)));
    }

    #[tokio::test]
    async fn bad_config_file_exits_with_usage_code() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_queued_bytes = \"lots\"").unwrap();
        let options = SimOptions {
            config_path: Some(file.path().to_path_buf()),
            ..SimOptions::default()
        };
        let err = run_sim(options).await.unwrap_err();
        assert!(matches!(err, SimError::Config(_)));
        assert_eq!(err.exit_code(), 2);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_queued_bytes = 0").unwrap();
        let options = SimOptions {
            config_path: Some(file.path().to_path_buf()),
            ..SimOptions::default()
        };
        let err = run_sim(options).await.unwrap_err();
        assert!(matches!(err, SimError::Config(ConfigError::ZeroQueuedBytes)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn runtime_failures_exit_with_failure_code() {
        let err = SimError::Mismatch {
            produced: 10,
            consumed: 9,
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(SimError::InvalidArgument("x".into()).exit_code(), 2);
        assert_eq!(SimError::Config(ConfigError::NoRuntime).exit_code(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn small_run_moves_every_byte() {
        let options = SimOptions {
            producers: 3,
            pages_per_producer: 20,
            max_page_bytes: 256,
            ..SimOptions::default()
        };
        let report = tokio::time::timeout(Duration::from_secs(20), run_sim(options))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.consumed_pages, 60);
        assert_eq!(report.consumed_bytes, report.produced_bytes);
    }
}
