//! CognitiveSense CLI
//!
//! Live cognitive-state inference from keyboard, mouse and eye signals.

use anyhow::Context;
use clap::{Parser, Subcommand};
use cognitivesense::{
    collector::{check_permission, EarStreamProvider, EyeCollector, LandmarkProvider},
    config::Config,
    core::{Aggregator, FATIGUE_SCORE},
    model::{ModelBundle, ModelServer},
    server::{self, PredictResponse},
    service::{LiveEngine, LABELS},
    FeatureWindow, VERSION,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cognitivesense")]
#[command(version = VERSION)]
#[command(about = "Real-time behavioral signal aggregation and cognitive-state inference", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live engine and HTTP/WebSocket server
    Serve {
        /// Model artifact (overrides config and COGNITIVESENSE_MODEL)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Side-car model metadata
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// EAR/landmark stream for the eye collector
        #[arg(long)]
        eye_source: Option<PathBuf>,

        /// Sampling window in seconds (also used as the pause between cycles)
        #[arg(long)]
        window_secs: Option<f64>,
    },

    /// Classify one feature map from a JSON file
    Predict {
        /// Model artifact
        #[arg(long)]
        model: PathBuf,

        /// Side-car model metadata
        #[arg(long)]
        metadata: Option<PathBuf>,

        /// JSON object of feature name to value
        features: PathBuf,
    },

    /// Collect labeled feature windows for training
    Collect {
        /// Integer label attached to every window
        #[arg(long)]
        label: i64,

        /// Output JSONL file (defaults to the data directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// EAR/landmark stream for the eye collector
        #[arg(long)]
        eye_source: Option<PathBuf>,
    },

    /// Show configuration
    Config,

    /// Show the label map
    Labels,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            model,
            metadata,
            port,
            bind,
            eye_source,
            window_secs,
        } => load_config().and_then(|mut config| {
            if let Some(model) = model {
                config.model_path = model;
            }
            if metadata.is_some() {
                config.metadata_path = metadata;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if eye_source.is_some() {
                config.eye_source = eye_source;
            }
            if let Some(secs) = window_secs {
                let window = Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("invalid window length {secs}"))?;
                config.window_duration = window;
                config.cycle_pause = window;
            }
            cmd_serve(config)
        }),
        Commands::Predict {
            model,
            metadata,
            features,
        } => cmd_predict(&model, metadata.as_deref(), &features),
        Commands::Collect {
            label,
            output,
            eye_source,
        } => load_config().and_then(|mut config| {
            if eye_source.is_some() {
                config.eye_source = eye_source;
            }
            cmd_collect(&config, label, output)
        }),
        Commands::Config => cmd_config(),
        Commands::Labels => {
            cmd_labels();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cognitivesense=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config() -> anyhow::Result<Config> {
    Config::load().context("failed to load configuration")
}

/// Eye collector for the configured source, degraded when there is none or
/// it cannot be opened.
fn eye_collector(config: &Config) -> EyeCollector {
    let provider: Option<Box<dyn LandmarkProvider>> =
        config
            .eye_source
            .as_deref()
            .and_then(|path| match EarStreamProvider::open(path) {
                Ok(provider) => Some(Box::new(provider) as Box<dyn LandmarkProvider>),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not open eye source");
                    None
                }
            });
    EyeCollector::from_provider(provider, config.eye_sample_interval)
}

fn warn_if_no_input_permission() {
    if !check_permission() {
        warn!("Input monitoring permission not granted; keyboard and mouse features will stay at zero");
    }
}

fn cmd_serve(config: Config) -> anyhow::Result<()> {
    println!("CognitiveSense v{VERSION}");
    println!();

    let aggregator = Aggregator::with_collectors(eye_collector(&config), config.window_duration);
    let model = ModelServer::load(
        &config.model_path,
        config.metadata_path.as_deref(),
        aggregator,
    )
    .with_context(|| format!("failed to load model {}", config.model_path.display()))?;

    println!("  Model: {} ({})", config.model_path.display(), model.bundle().backend());
    println!("  Window: {:.1}s", config.window_duration.as_secs_f64());
    println!(
        "  Eye source: {}",
        if model.aggregator().eye().is_degraded() {
            "none (degraded)".to_string()
        } else {
            config
                .eye_source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        }
    );

    warn_if_no_input_permission();
    model.aggregator().start();

    let engine = Arc::new(LiveEngine::new(
        model,
        config.history_capacity,
        config.cycle_pause,
    ));

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async {
        let (addr, shutdown) = server::run(&config, Arc::clone(&engine)).await?;
        println!("  Listening: http://{addr}  (stream at ws://{addr}/ws/live)");
        println!();
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        let _ = shutdown.send(());
        anyhow::Ok(())
    })?;

    engine.server().aggregator().stop();
    info!("{}", engine.stats().summary());
    Ok(())
}

fn cmd_predict(model: &Path, metadata: Option<&Path>, features: &Path) -> anyhow::Result<()> {
    let bundle = ModelBundle::load(model, metadata)
        .with_context(|| format!("failed to load model {}", model.display()))?;

    let raw = std::fs::read_to_string(features)
        .with_context(|| format!("failed to read {}", features.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let window = FeatureWindow::from_json(&value)?;

    let prediction = bundle.predict(&window)?;
    let response = PredictResponse {
        pred: prediction.label_id,
        proba: prediction.probabilities,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn cmd_collect(config: &Config, label: i64, output: Option<PathBuf>) -> anyhow::Result<()> {
    let output = match output {
        Some(path) => path,
        None => {
            config.ensure_directories()?;
            config.dataset_path()
        }
    };

    println!("CognitiveSense v{VERSION} - collecting label {label}");
    println!("  Output: {}", output.display());
    println!("  Window: {:.1}s", config.window_duration.as_secs_f64());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&output)
        .with_context(|| format!("failed to open {}", output.display()))?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(Arc::clone(&running))?;

    let aggregator = Aggregator::with_collectors(eye_collector(config), config.window_duration);
    warn_if_no_input_permission();
    aggregator.start();

    let mut windows = 0u64;
    while running.load(Ordering::SeqCst) {
        let features = aggregator.collect_features(Some(label));
        if !running.load(Ordering::SeqCst) {
            break;
        }
        writeln!(file, "{}", serde_json::to_string(&features)?)?;
        windows += 1;
        println!(
            "[{windows}] fatigue_score={:.0}",
            features.get_or_zero(FATIGUE_SCORE)
        );

        let resume_at = Instant::now() + config.cycle_pause;
        while running.load(Ordering::SeqCst) && Instant::now() < resume_at {
            thread::sleep(Duration::from_millis(100));
        }
    }

    aggregator.stop();
    println!();
    println!("Collected {windows} windows into {}", output.display());
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = load_config()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_labels() {
    for (id, name) in LABELS {
        println!("{id}: {name}");
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
