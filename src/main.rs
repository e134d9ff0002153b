//! edge-tune CLI
//!
//! # Usage
//!
//! ```bash
//! # Search 100 trials on ./data, finalize into best_model.json
//! edge-tune tune --data-root data --trials 100 --workers 4
//!
//! # Start from a config file, override the budget and narrow the search
//! edge-tune tune --config tune.json --trials 20 --lr-max 0.01 --dense-min 128
//!
//! # Second run into the same trial log needs its own study name
//! edge-tune tune --tracker trials.jsonl --study-name rerun
//!
//! # Serve the finalized artifact
//! edge-tune serve --artifact best_model.json --address 0.0.0.0:8000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use edge_tune::config::{ServeConfig, TuneConfig};
use edge_tune::experiment::{ExperimentTracker, JsonlTrackerStore, MemoryTrackerStore, TrackerStore};
use edge_tune::model::{Dataset, EdgeClassifierBuilder, Preprocessor};
use edge_tune::search::{RandomSampler, SearchController, SearchSpace, Study};
use edge_tune::serve::http;
use edge_tune::{Error, Finalizer, InferenceService, TrialExecutor};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "edge-tune", version, about = "Hyperparameter search and serving for edge image classifiers")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = "EDGE_TUNE_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search hyperparameters, then retrain and save the best model
    Tune(TuneArgs),
    /// Serve predictions from a saved artifact
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct TuneArgs {
    /// JSON config (search space, pruner, data); flags below override it
    #[arg(long, env = "EDGE_TUNE_CONFIG")]
    config: Option<PathBuf>,
    /// Study name; must not already appear in the tracker log
    #[arg(long, env = "EDGE_TUNE_STUDY")]
    study_name: Option<String>,
    /// Dataset root (one subdirectory per class)
    #[arg(long, env = "EDGE_TUNE_DATA_ROOT")]
    data_root: Option<PathBuf>,
    /// Trial budget
    #[arg(long, env = "EDGE_TUNE_TRIALS")]
    trials: Option<usize>,
    /// Concurrent trials
    #[arg(long, env = "EDGE_TUNE_WORKERS")]
    workers: Option<usize>,
    /// Seed for sampling, training and finalization
    #[arg(long, env = "EDGE_TUNE_SEED")]
    seed: Option<u64>,
    /// Per-trial wall-clock limit in seconds
    #[arg(long, env = "EDGE_TUNE_TRIAL_TIMEOUT")]
    trial_timeout: Option<u64>,
    /// JSON-lines trial log
    #[arg(long, env = "EDGE_TUNE_TRACKER")]
    tracker: Option<PathBuf>,
    /// Parquet trial summary
    #[arg(long, env = "EDGE_TUNE_SUMMARY_PARQUET")]
    summary_parquet: Option<PathBuf>,
    /// Output artifact
    #[arg(long, env = "EDGE_TUNE_ARTIFACT")]
    artifact: Option<PathBuf>,
    /// Disable training-time augmentation
    #[arg(long)]
    no_augment: bool,
    #[command(flatten)]
    bounds: BoundArgs,
}

/// Search-space bound overrides.
#[derive(Debug, Args)]
struct BoundArgs {
    /// Lowest learning rate
    #[arg(long)]
    lr_min: Option<f64>,
    /// Highest learning rate
    #[arg(long)]
    lr_max: Option<f64>,
    /// Lowest dropout rate
    #[arg(long)]
    dropout_min: Option<f64>,
    /// Highest dropout rate
    #[arg(long)]
    dropout_max: Option<f64>,
    /// Fewest dense neurons
    #[arg(long)]
    dense_min: Option<u32>,
    /// Most dense neurons
    #[arg(long)]
    dense_max: Option<u32>,
    /// Fewest training epochs
    #[arg(long)]
    epochs_min: Option<u32>,
    /// Most training epochs
    #[arg(long)]
    epochs_max: Option<u32>,
}

impl BoundArgs {
    fn apply(&self, space: SearchSpace) -> edge_tune::Result<SearchSpace> {
        Ok(SearchSpace {
            learning_rate: space.learning_rate.with_bounds(self.lr_min, self.lr_max)?,
            dropout_rate: space
                .dropout_rate
                .with_bounds(self.dropout_min, self.dropout_max)?,
            dense_neurons: space.dense_neurons.with_bounds(
                self.dense_min.map(f64::from),
                self.dense_max.map(f64::from),
            )?,
            epochs: space.epochs.with_bounds(
                self.epochs_min.map(f64::from),
                self.epochs_max.map(f64::from),
            )?,
            ..space
        })
    }
}

impl TuneArgs {
    fn resolve(self) -> anyhow::Result<TuneConfig> {
        let mut config = match &self.config {
            Some(path) => TuneConfig::from_json_file(path)?,
            None => TuneConfig::default(),
        };
        if let Some(name) = self.study_name {
            config.study_name = name;
        }
        config.space = self.bounds.apply(config.space)?;
        if let Some(root) = self.data_root {
            config.data.root = root;
        }
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.trial_timeout.is_some() {
            config.trial_timeout_secs = self.trial_timeout;
        }
        if self.tracker.is_some() {
            config.tracker_path = self.tracker;
        }
        if self.summary_parquet.is_some() {
            config.summary_parquet = self.summary_parquet;
        }
        if let Some(artifact) = self.artifact {
            config.artifact_path = artifact;
        }
        if self.no_augment {
            config.data.augment = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// JSON config; flags below override it
    #[arg(long, env = "EDGE_TUNE_SERVE_CONFIG")]
    config: Option<PathBuf>,
    /// Artifact to load
    #[arg(long, env = "EDGE_TUNE_ARTIFACT")]
    artifact: Option<PathBuf>,
    /// Listen address
    #[arg(long, env = "EDGE_TUNE_ADDRESS")]
    address: Option<SocketAddr>,
    /// Square side request images are resized to
    #[arg(long, env = "EDGE_TUNE_IMAGE_SIZE")]
    image_size: Option<u32>,
}

impl ServeArgs {
    fn resolve(self) -> anyhow::Result<ServeConfig> {
        let mut config = match &self.config {
            Some(path) => ServeConfig::from_json_file(path)?,
            None => ServeConfig::default(),
        };
        if let Some(artifact) = self.artifact {
            config.artifact = artifact;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(size) = self.image_size {
            config.image_size = size;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = edge_tune::logging::init(&cli.log) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let outcome = match cli.command {
        Command::Tune(args) => match args.resolve() {
            Ok(config) => tokio::task::spawn_blocking(move || tune(&config))
                .await
                .context("tune task panicked")
                .and_then(|r| r),
            Err(e) => Err(e),
        },
        Command::Serve(args) => match args.resolve() {
            Ok(config) => serve(config).await,
            Err(e) => Err(e),
        },
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn tune(config: &TuneConfig) -> anyhow::Result<()> {
    let dataset = Dataset::load(&config.data)
        .with_context(|| format!("loading dataset from {}", config.data.root.display()))?;

    let store: Arc<dyn TrackerStore> = match &config.tracker_path {
        Some(path) => Arc::new(JsonlTrackerStore::open(path)?),
        None => Arc::new(MemoryTrackerStore::new()),
    };
    let tracker = Arc::new(ExperimentTracker::new(
        config.study_name.clone(),
        config.direction,
        store,
    ));
    tracker.ensure_unused()?;

    let study = Study::new(config.study_name.clone(), config.direction, config.space.clone())?;
    let controller = SearchController::builder(study)
        .sampler(RandomSampler::with_seed(config.seed))
        .pruner(config.pruner)
        .tracker(Arc::clone(&tracker))
        .build();

    let builder = EdgeClassifierBuilder::default();
    let mut executor = TrialExecutor::new(builder).with_seed(config.seed);
    if let Some(timeout) = config.trial_timeout() {
        executor = executor.with_timeout(timeout);
    }

    let summary = controller.optimize(&executor, &dataset, config.trials, config.workers)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if let Some(path) = &config.summary_parquet {
        let rows = tracker.export_parquet(path)?;
        info!(path = %path.display(), rows, "trial summary exported");
    }

    match Finalizer::new(builder, config.seed).finalize(
        &controller.study(),
        &dataset,
        &config.artifact_path,
    ) {
        Ok(artifact) => {
            info!(
                trial = artifact.trial_id(),
                metric = artifact.final_metric(),
                path = %config.artifact_path.display(),
                "best model saved"
            );
            Ok(())
        }
        Err(Error::NoCompletedTrials) => {
            anyhow::bail!("no trial completed; nothing to finalize")
        }
        Err(e) => Err(e).context("finalizing best trial"),
    }
}

async fn serve(config: ServeConfig) -> anyhow::Result<()> {
    let preprocessor = Preprocessor::new(config.image_size)?;
    let service = InferenceService::load(&config.artifact, &EdgeClassifierBuilder::default(), preprocessor)
        .with_context(|| format!("loading artifact {}", config.artifact.display()))?;
    http::serve(Arc::new(service), config.address).await?;
    Ok(())
}
