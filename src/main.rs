//! CLI Entry Point for mechatest
//!
//! Drives one test rig from the command line:
//! - `status`: connect, print equipment and device status plus health metrics
//! - `calibrate`: run a calibration cycle
//! - `test <device>`: run a single device test
//! - `suite <file> --device ..`: run a JSON test suite across devices
//! - `interactive` (default): line-oriented console
//!
//! # Usage
//!
//! ```bash
//! mechatest --port /dev/ttyUSB0 --baud 115200 test D1 --param voltage --param 5.0
//! mechatest --transport simulated suite suites/acceptance.json --device D1 --device D2 --parallel
//! ```
//!
//! When the rig cannot be reached the controller falls back to simulation mode and every
//! command still runs, reporting "Hardware not connected" where the device is needed.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mechatest::config::EquipmentConfig;
use mechatest::controller::EquipmentController;
use mechatest::logging::{self, LogFormat};
use mechatest::suite::{SuiteRunner, SuiteSummary, TestBatch, TestSuite};
use mechatest::transport::TransportKind;
use mechatest::TestResult;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "mechatest")]
#[command(about = "Equipment controller for mechatronic test rigs", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial device or host:port, overrides the configuration
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate, overrides the configuration
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// serial, network or simulated
    #[arg(long, global = true)]
    transport: Option<TransportKind>,

    /// Measurement tolerance, overrides the configuration
    #[arg(long, global = true)]
    tolerance: Option<f64>,

    /// Console log format: pretty, compact or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print equipment status, device status and health metrics
    Status,

    /// Run a calibration cycle
    Calibrate,

    /// Run a single test on a device
    Test {
        /// Device identifier
        device: String,

        /// Test parameter, repeatable and sent in order
        #[arg(long = "param")]
        params: Vec<String>,
    },

    /// Run a JSON test suite on one or more devices
    Suite {
        /// Suite file
        file: PathBuf,

        /// Device identifier, repeatable
        #[arg(long = "device", required = true)]
        devices: Vec<String>,

        /// Test devices concurrently
        #[arg(long)]
        parallel: bool,

        /// Devices in flight at once with --parallel
        #[arg(long, default_value = "4")]
        max_workers: usize,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive console (default)
    Interactive,
}

const DEFAULT_TEST_PARAMS: [&str; 4] = ["voltage", "5.0", "current", "0.1"];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    logging::init_from_config(&config).context("Failed to initialize logging")?;

    println!("🔧 mechatest - Mechatronic Test Controller");
    println!(
        "   Transport: {}  Port: {}  Baud: {}",
        config.transport, config.device_port, config.baud_rate
    );
    println!();

    let controller = EquipmentController::new();
    controller.subscribe(|status, message| {
        println!("📣 Status changed to: {} - {}", status, message);
    });

    if !controller.initialize(config).await {
        println!("⚠️  Running in simulation mode: {}", controller.last_error());
        println!();
    }

    let outcome = match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Status => show_status(&controller).await,
        Commands::Calibrate => run_calibration(&controller).await,
        Commands::Test { device, params } => run_single_test(&controller, &device, params).await,
        Commands::Suite {
            file,
            devices,
            parallel,
            max_workers,
            json,
        } => run_suite(&controller, file, devices, parallel, max_workers, json).await,
        Commands::Interactive => interactive(&controller).await,
    };

    controller.shutdown().await;
    outcome
}

fn load_config(cli: &Cli) -> Result<EquipmentConfig> {
    let mut config = match &cli.config {
        Some(path) => EquipmentConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EquipmentConfig::from_env().context("Failed to load configuration")?,
    };

    if let Some(kind) = cli.transport {
        config.transport = kind;
    }
    if let Some(port) = &cli.port {
        config.device_port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    if let Some(tolerance) = cli.tolerance {
        config.measurement_tolerance = tolerance;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

fn print_result(result: &TestResult) {
    let mark = if result.passed { "✅ PASS" } else { "❌ FAIL" };
    println!("{} {} [{}]", mark, result.device_id, result.test_id);
    println!("   Measurement: {} {}", result.measurement_value, result.units);
    println!("   Notes: {}", result.notes);
}

async fn show_status(controller: &EquipmentController) -> Result<()> {
    println!("Equipment status: {}", controller.status());
    if controller.is_simulation() {
        println!("Mode: simulation");
    }

    match controller.query_device_status().await {
        Some(device) => println!(
            "Device status: {} ({})",
            device.state,
            if device.ok { "OK" } else { "ERR" }
        ),
        None => println!("Device status: unavailable ({})", controller.last_error()),
    }

    println!();
    println!("Health Metrics:");
    for (name, value) in controller.health_metrics() {
        println!("   {}: {:.3}", name, value);
    }
    Ok(())
}

async fn run_calibration(controller: &EquipmentController) -> Result<()> {
    println!("🎯 Calibrating...");
    if controller.calibrate().await {
        println!("✅ Calibration completed successfully");
        Ok(())
    } else {
        anyhow::bail!("Calibration failed: {}", controller.last_error())
    }
}

async fn run_single_test(
    controller: &EquipmentController,
    device: &str,
    params: Vec<String>,
) -> Result<()> {
    let params = if params.is_empty() {
        DEFAULT_TEST_PARAMS.iter().map(|p| p.to_string()).collect()
    } else {
        params
    };

    controller.start().await;
    let result = controller.run_test(device, params.as_slice()).await;
    controller.stop().await;

    print_result(&result);
    if result.passed {
        Ok(())
    } else {
        anyhow::bail!("Test failed on {}", device)
    }
}

async fn run_suite(
    controller: &EquipmentController,
    file: PathBuf,
    devices: Vec<String>,
    parallel: bool,
    max_workers: usize,
    json: bool,
) -> Result<()> {
    let suite = TestSuite::load(&file)
        .with_context(|| format!("Failed to load test suite {}", file.display()))?;
    println!("📋 Suite '{}': {}", suite.name, suite.description);

    let batch = if parallel {
        TestBatch::parallel(devices, max_workers)
    } else {
        TestBatch::sequential(devices)
    };

    controller.start().await;
    let results = SuiteRunner::new(controller).run_batch(&suite, &batch).await;
    controller.stop().await;

    for (device, device_results) in &results {
        println!();
        println!("Device {}:", device);
        for result in device_results {
            print_result(result);
        }
    }

    let summary = SuiteSummary::from_results(results.values().flatten());
    println!();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "📊 {} tests, {} passed, {} failed ({:.1}% pass rate)",
            summary.total_tests, summary.passed, summary.failed, summary.pass_rate
        );
        for (device, stats) in &summary.device_statistics {
            println!(
                "   {}: {}/{} passed, mean measurement {:.4}",
                device, stats.passed, stats.total_tests, stats.avg_measurement
            );
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("   start | stop | pause | resume");
    println!("   test <device> [param ...]");
    println!("   calibrate");
    println!("   status | device | metrics");
    println!("   help | quit");
}

async fn interactive(controller: &EquipmentController) -> Result<()> {
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };

        match command.to_lowercase().as_str() {
            "start" => report(controller, controller.start().await),
            "stop" => report(controller, controller.stop().await),
            "pause" => report(controller, controller.pause().await),
            "resume" => report(controller, controller.resume().await),
            "calibrate" => report(controller, controller.calibrate().await),
            "test" => match words.next() {
                Some(device) => {
                    let mut params: Vec<&str> = words.collect();
                    if params.is_empty() {
                        params = DEFAULT_TEST_PARAMS.to_vec();
                    }
                    print_result(&controller.run_test(device, params.as_slice()).await);
                }
                None => println!("Usage: test <device> [param ...]"),
            },
            "status" => println!("Status: {}", controller.status()),
            "device" => match controller.query_device_status().await {
                Some(device) => println!("Device: {} ({})", device.state, if device.ok { "OK" } else { "ERR" }),
                None => println!("Device status unavailable: {}", controller.last_error()),
            },
            "metrics" => {
                for (name, value) in controller.health_metrics() {
                    println!("   {}: {:.3}", name, value);
                }
            }
            "help" => print_help(),
            "quit" | "exit" => break,
            other => println!("Unknown command '{}'. Type 'help' for a list.", other),
        }
    }

    println!("👋 Shutting down...");
    Ok(())
}

fn report(controller: &EquipmentController, ok: bool) {
    if !ok {
        println!("❌ {}", controller.last_error());
    }
}
