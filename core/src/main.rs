use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flow_sentinel_core::{
    Config, SentinelError,
    config::CaptureStrategy,
    model::Artifacts,
    network::PnetBackend,
    pipeline::{self, Pipeline, ScanOutcome},
    utils::{format_timestamp, generate_session_id, save_json},
    verdict::{Severity, Verdict},
};

fn capture_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("interface")
                .short('i')
                .long("interface")
                .value_name("INTERFACE")
                .help("Network interface to capture from")
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("SECONDS")
                .help("Capture window in seconds")
        )
        .arg(
            Arg::new("max-packets")
                .short('n')
                .long("max-packets")
                .value_name("COUNT")
                .help("Stop after this many packets")
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .value_parser(["streaming", "block"])
                .help("streaming stops at the deadline and honours Ctrl-C; block always runs the full window")
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file path")
        .default_value("config/sentinel.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("flow-sentinel")
        .version("0.1.0")
        .about("Classifies a window of live traffic as benign or as an attack category")
        .subcommand_required(true)
        .arg(config_arg())
        .subcommand(capture_args(Command::new("scan").about("Capture a window of traffic and classify it")))
        .subcommand(capture_args(Command::new("probe").about("Capture a window and report what was seen, without a model")))
        .subcommand(
            Command::new("classify")
                .about("Classify a recorded feature set (JSON object of feature name to value)")
                .arg(
                    Arg::new("features")
                        .short('f')
                        .long("features")
                        .value_name("FILE")
                        .help("Feature record to classify")
                        .required(true)
                )
        )
        .subcommand(
            Command::new("init-config")
                .about("Write the default configuration file")
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| "config/sentinel.json".to_string());

    let mut config = if std::path::Path::new(&config_path).exists() {
        Config::from_file(&config_path).with_context(|| format!("loading {}", config_path))?
    } else {
        Config::default()
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.logging.level.as_str())).init();

    match matches.subcommand() {
        Some(("scan", sub_matches)) => {
            apply_capture_overrides(&mut config, sub_matches)?;
            run_scan_mode(&config).await
        }
        Some(("probe", sub_matches)) => {
            apply_capture_overrides(&mut config, sub_matches)?;
            run_probe_mode(&config).await
        }
        Some(("classify", sub_matches)) => {
            let features = sub_matches
                .get_one::<String>("features")
                .context("--features is required")?;
            run_classify_mode(&config, features)
        }
        Some(("init-config", _)) => {
            if let Some(parent) = std::path::Path::new(&config_path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            Config::default().to_file(&config_path)?;
            println!("Default configuration written to {}", config_path);
            Ok(())
        }
        _ => {
            eprintln!("No subcommand provided. Use --help for usage information.");
            std::process::exit(1);
        }
    }
}

fn apply_capture_overrides(config: &mut Config, matches: &ArgMatches) -> flow_sentinel_core::Result<()> {
    if let Some(interface) = matches.get_one::<String>("interface") {
        config.capture.interface = interface.clone();
    }
    if let Some(duration) = matches.get_one::<String>("duration") {
        config.capture.window_secs = duration
            .parse()
            .map_err(|_| SentinelError::Parse(format!("Invalid duration: {}", duration)))?;
    }
    if let Some(max) = matches.get_one::<String>("max-packets") {
        let max = max
            .parse()
            .map_err(|_| SentinelError::Parse(format!("Invalid packet count: {}", max)))?;
        config.capture.max_packets = Some(max);
    }
    if let Some(mode) = matches.get_one::<String>("mode") {
        config.capture.strategy = match mode.as_str() {
            "block" => CaptureStrategy::BlockThenDrain,
            _ => CaptureStrategy::Streaming,
        };
    }
    config.validate()
}

fn load_artifacts(config: &Config) -> anyhow::Result<Arc<Artifacts>> {
    info!("Loading model, label encoder and feature schema...");
    let artifacts = Artifacts::load(&config.model)
        .context("the pipeline cannot start without its model files")?;
    info!("Artifacts loaded successfully");
    Ok(Arc::new(artifacts))
}

async fn run_scan_mode(config: &Config) -> anyhow::Result<()> {
    let artifacts = load_artifacts(config)?;
    let pipeline = Arc::new(Pipeline::new(artifacts, Arc::new(PnetBackend)));
    let stop = Arc::new(AtomicBool::new(false));

    if config.capture.strategy == CaptureStrategy::BlockThenDrain {
        warn!("Block mode captures for the full {}s window and cannot be interrupted", config.capture.window_secs);
    }
    println!(
        "Capturing on {} for {} seconds. Generate some traffic now...",
        config.capture.interface, config.capture.window_secs
    );

    let scan = pipeline.scan_async(config.capture.clone(), Some(stop.clone()));
    tokio::pin!(scan);

    let outcome = tokio::select! {
        outcome = &mut scan => outcome,
        _ = tokio::signal::ctrl_c() => {
            println!("\nCtrl+C received, stopping capture...");
            stop.store(true, Ordering::SeqCst);
            (&mut scan).await
        }
    };

    print_outcome(&outcome);

    if let Some(dir) = &config.output.results_dir {
        let path = save_json(dir, "scan", outcome.session_id(), &outcome)?;
        info!("Results saved to: {}", path.display());
    }

    if let ScanOutcome::Failed(_) = outcome {
        std::process::exit(2);
    }
    Ok(())
}

async fn run_probe_mode(config: &Config) -> anyhow::Result<()> {
    println!(
        "Probing {} for {} seconds...",
        config.capture.interface, config.capture.window_secs
    );

    let capture = config.capture.clone();
    let report = tokio::task::spawn_blocking(move || pipeline::probe(&PnetBackend, &capture))
        .await
        .context("probe task failed")?;

    match report {
        Ok(report) => {
            println!("\n=== CAPTURE PROBE ===");
            println!("Interface: {}", report.interface);
            println!("Packets captured: {}", report.packets_captured);
            println!("TCP packets: {}", report.tcp_packets);
            println!("Capture time: {:.2}s ({:?})", report.capture_secs, report.stop_reason);
            if report.analysable {
                println!("Enough traffic to analyse a flow.");
            } else {
                println!("Not enough packets captured to analyse a flow.");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Capture error: {}", e);
            eprintln!("Hint: {}", e.kind().operator_hint());
            std::process::exit(2);
        }
    }
}

fn run_classify_mode(config: &Config, features_path: &str) -> anyhow::Result<()> {
    let artifacts = load_artifacts(config)?;
    let pipeline = Pipeline::new(artifacts, Arc::new(PnetBackend));

    let content = std::fs::read_to_string(features_path)
        .with_context(|| format!("reading {}", features_path))?;
    let record: HashMap<String, Option<f64>> = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", features_path))?;

    let result = pipeline.classify_record(&record)?;

    println!("\n=== OFFLINE CLASSIFICATION ===");
    for feature in &result.features {
        println!("{}: {}", feature.name, feature.value);
    }
    print_verdict(&result.verdict);

    if let Some(dir) = &config.output.results_dir {
        let path = save_json(dir, "classify", &generate_session_id(), &result)?;
        info!("Results saved to: {}", path.display());
    }
    Ok(())
}

fn print_outcome(outcome: &ScanOutcome) {
    match outcome {
        ScanOutcome::Completed(report) => {
            println!("\n=== SCAN COMPLETE ===");
            println!("Session ID: {}", report.session_id);
            println!("Timestamp: {}", format_timestamp(report.timestamp));
            println!("Packets processed: {}", report.packets_captured);
            println!("Capture time: {:.2}s", report.capture_secs);
            print_verdict(&report.verdict);
        }
        ScanOutcome::Failed(failure) => {
            println!("\n=== SCAN FAILED ===");
            println!("Session ID: {}", failure.session_id);
            println!("{}", failure.message);
            println!("Hint: {}", failure.hint);
        }
    }
}

fn print_verdict(verdict: &Verdict) {
    match verdict.severity {
        Severity::Benign => println!("\nAll clear: traffic classified as BENIGN"),
        Severity::Alert => {
            println!("\nALERT: attack detected");
            if let Some(ref attack) = verdict.attack_type {
                println!("Attack type: {}", attack);
            }
        }
    }
    if let Some(confidence) = verdict.confidence {
        println!("Confidence: {:.2}%", confidence * 100.0);
    }
}
