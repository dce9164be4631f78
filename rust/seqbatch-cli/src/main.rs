// rust/seqbatch-cli/src/main.rs

//! Sequence batching inspector
//!
//! Reads a plain-text corpus, runs it through the training or inference
//! batching pipeline and reports how it was batched.
//!
//! # Usage
//!
//! ```bash
//! # Bucketed training batches of a parallel corpus
//! seqbatch --features train.src --labels train.tgt --config pipeline.toml
//!
//! # Length-reordered inference batches, restored to input order
//! seqbatch --features test.src --mode inference
//! ```

mod corpus;
mod stats;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqbatch_core::{
    restore_order, AsyncPrefetchingIterator, BoxedDataset, DatasetExt, Example, InMemoryDataset,
    InferencePipeline, PipelineConfig, PipelineError, TrainingPipeline, INDEX_KEY,
};

use corpus::{load_features, load_parallel, record_length, Vocabulary};
use stats::{BatchSummary, RunStats};

/// Batches consumed ahead of reporting.
const READ_AHEAD: usize = 4;

/// Sequence batching inspector
#[derive(Parser, Debug)]
#[command(name = "seqbatch")]
#[command(about = "Inspect how a corpus is bucketed and batched")]
struct Args {
    /// Features (source) text file, one sequence per line
    #[arg(short, long)]
    features: PathBuf,

    /// Labels (target) text file aligned with the features
    #[arg(short, long)]
    labels: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pipeline to run (training, inference)
    #[arg(short, long, default_value = "training")]
    mode: String,

    /// Stop after this many batches
    #[arg(long)]
    max_batches: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Training,
    Inference,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = match args.mode.to_lowercase().as_str() {
        "training" | "train" => Mode::Training,
        "inference" | "infer" => Mode::Inference,
        other => {
            return Err(PipelineError::invalid_configuration(format!(
                "unknown mode '{}'; should be 'training' or 'inference'",
                other
            ))
            .into());
        }
    };

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;

    let mut vocabulary = Vocabulary::new();
    let (batches, num_examples) = match mode {
        Mode::Training => {
            let examples = load_parallel(&args.features, args.labels.as_deref(), &mut vocabulary)?;
            let num_examples = examples.len();
            let mut training = config.training.clone();
            training.single_pass = true;
            training.dataset_size.get_or_insert(num_examples);

            tracing::info!("Training pipeline on {} examples", num_examples);
            tracing::info!("  Batch size: {} ({})", training.batch_size, training.batch_type);
            tracing::info!("  Bucket width: {:?}", training.bucket_width);

            let pipeline = TrainingPipeline::new(training)
                .features_length_fn(record_length())
                .labels_length_fn(record_length());
            let batches = InMemoryDataset::new(examples).boxed().apply(&pipeline)?;
            (batches, num_examples)
        }
        Mode::Inference => {
            let examples = load_features(&args.features, &mut vocabulary)?;
            let num_examples = examples.len();

            tracing::info!("Inference pipeline on {} examples", num_examples);
            tracing::info!("  Batch size: {}", config.inference.batch_size);
            tracing::info!("  Bucket width: {:?}", config.inference.bucket_width);

            let pipeline = InferencePipeline::new(config.inference.clone()).length_fn(record_length());
            let batches = InMemoryDataset::new(examples).boxed().apply(&pipeline)?;
            (batches, num_examples)
        }
    };
    tracing::info!("Vocabulary size: {}", vocabulary.len());

    let collected = report(batches, args.max_batches).await?;

    if mode == Mode::Inference && config.inference.bucket_width.unwrap_or(0) > 0 {
        let restored = restore_order(collected)?;
        let in_order = restored.iter().enumerate().all(|(position, example)| {
            example
                .tensor(INDEX_KEY)
                .and_then(|t| t.to_scalar_i64())
                == Some(position as i64)
        });
        if in_order && restored.len() == num_examples {
            tracing::info!("Restored original order of {} examples", restored.len());
        } else {
            tracing::warn!(
                "Recovered {} of {} examples in input order",
                restored.len(),
                num_examples
            );
        }
    }

    Ok(())
}

/// Consumes batches from a background producer, logging each one, and
/// returns them.
async fn report(
    batches: BoxedDataset<Example>,
    max_batches: Option<usize>,
) -> seqbatch_core::Result<Vec<Example>> {
    let mut iter = AsyncPrefetchingIterator::new(batches, READ_AHEAD);
    let mut totals = RunStats::default();
    let mut collected = Vec::new();

    while let Some(batch) = iter.next_item().await? {
        let summary = BatchSummary::of(&batch)?;
        tracing::info!(
            "Batch {}: {} examples, padded length {}, padding {:.1}%",
            totals.batches,
            summary.size,
            summary.padded_length,
            summary.padding_ratio() * 100.0
        );
        totals.record(&summary);
        collected.push(batch);

        if max_batches.is_some_and(|max| totals.batches >= max) {
            iter.stop().await;
            break;
        }
    }

    tracing::info!(
        "{} batches, {} examples, {} tokens, padding {:.1}%",
        totals.batches,
        totals.examples,
        totals.tokens,
        totals.padding_ratio() * 100.0
    );
    Ok(collected)
}
