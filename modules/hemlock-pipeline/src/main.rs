use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAiModel;
use hemlock_common::{Config, HemlockError, QueryPair};
use hemlock_pipeline::runner::{Runner, Stage};

/// Poisoned-corpus generation pipeline: graph extraction, base text
/// generation, cross-reference enhancement, merge.
#[derive(Parser, Debug)]
#[command(name = "hemlock", version, about)]
struct Args {
    /// Run all four stages in order (the default when no stage is selected).
    #[arg(long)]
    run_all: bool,

    /// Run only the graph extraction stage.
    #[arg(long)]
    run_graph: bool,

    /// Run only the base text generation stage.
    #[arg(long)]
    run_generator: bool,

    /// Run only the cross-reference enhancement stage.
    #[arg(long)]
    run_enhancer: bool,

    /// Run only the merge stage.
    #[arg(long)]
    run_merger: bool,

    /// Directory for pipeline artifacts.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Maximum in-flight generation calls per stage.
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Input file: a JSON array of {"query", "incorrect_answer"} objects.
    #[arg(long, default_value = "queries.json")]
    queries: PathBuf,
}

impl Args {
    fn selected_stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if self.run_graph {
            stages.push(Stage::Graph);
        }
        if self.run_generator {
            stages.push(Stage::Generate);
        }
        if self.run_enhancer {
            stages.push(Stage::Enhance);
        }
        if self.run_merger {
            stages.push(Stage::Merge);
        }
        stages
    }
}

fn load_queries(path: &PathBuf) -> Result<Vec<QueryPair>, HemlockError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            HemlockError::MissingDependency {
                artifact: path.display().to_string(),
            }
        } else {
            HemlockError::Persistence(format!("failed to read {}: {e}", path.display()))
        }
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        HemlockError::Config(format!("failed to parse {}: {e}", path.display()))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hemlock=info".parse()?))
        .init();

    let args = Args::parse();

    info!("Hemlock pipeline starting...");

    let config = Config::from_env();
    config.log_redacted();

    let model = Arc::new(
        OpenAiModel::new(&config.api_key, &config.model, config.temperature)
            .with_base_url(&config.api_base_url),
    );
    let runner = Runner::new(config, model, &args.output_dir, args.batch_size);

    let stages = args.selected_stages();
    let summary = if stages.is_empty() || args.run_all {
        // Full run. Selective stage flags are ignored when --run-all is set.
        let pairs = load_queries(&args.queries)?;
        info!(pairs = pairs.len(), queries = %args.queries.display(), "Loaded query pairs");
        runner.run_all(&pairs).await?
    } else {
        let pairs = if stages.contains(&Stage::Graph) {
            Some(load_queries(&args.queries).context("graph stage needs the queries file")?)
        } else {
            None
        };
        runner.run_stages(&stages, pairs.as_deref()).await?
    };

    info!("{summary}");

    if !summary.is_success() {
        bail!("pipeline run did not complete successfully");
    }
    Ok(())
}
