use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use ai_client::TextModel;
use hemlock_common::artifacts::{
    ENHANCED_POISON_TEXTS, FAILED_QUERIES, GRAPH_DATA, MERGED_POISON_TEXTS_JSON,
    MERGED_POISON_TEXTS_TXT, POISON_TEXTS,
};
use hemlock_common::{
    ArtifactStore, BaseText, BatchPolicy, Config, EnhancedText, HemlockError, QueryPair,
};
use hemlock_graph::{GraphBuilder, GraphStore};

use crate::enhancer::TextEnhancer;
use crate::generator::TextGenerator;
use crate::merger;

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Graph,
    Generate,
    Enhance,
    Merge,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Graph, Stage::Generate, Stage::Enhance, Stage::Merge];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Graph => "graph",
            Stage::Generate => "generate",
            Stage::Enhance => "enhance",
            Stage::Merge => "merge",
        }
    }

    /// Artifacts that must already exist on durable storage before this
    /// stage may run.
    fn requires(&self) -> &'static [&'static str] {
        match self {
            Stage::Graph => &[],
            Stage::Generate => &[GRAPH_DATA],
            Stage::Enhance => &[GRAPH_DATA, POISON_TEXTS],
            Stage::Merge => &[POISON_TEXTS, ENHANCED_POISON_TEXTS],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "Pending",
            StageStatus::Running => "Running",
            StageStatus::Done => "Done",
            StageStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Per-stage outcome: status plus succeeded/failed item counts.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed pair queries or theme names, for the run summary.
    pub failed_items: Vec<String>,
}

impl StageReport {
    fn done(stage: Stage, succeeded: usize, failed_items: Vec<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Done,
            succeeded,
            failed: failed_items.len(),
            failed_items,
        }
    }

    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            succeeded: 0,
            failed: 0,
            failed_items: Vec::new(),
        }
    }

    fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            1.0
        } else {
            self.succeeded as f64 / total as f64
        }
    }
}

/// Final run summary: one report per requested stage plus every
/// incomplete-theme warning, logged before exit.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub reports: Vec<StageReport>,
    pub warnings: Vec<String>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            reports: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.reports.is_empty()
            && self.reports.iter().all(|r| r.status == StageStatus::Done)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary (started {}):", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        for report in &self.reports {
            write!(
                f,
                "  {}: {} ({} succeeded, {} failed)",
                report.stage, report.status, report.succeeded, report.failed
            )?;
            if report.failed_items.is_empty() {
                writeln!(f)?;
            } else {
                writeln!(f, " [{}]", report.failed_items.join(", "))?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }
        Ok(())
    }
}

/// Sequences the four stages over durable artifacts. Stages never overlap;
/// each reads its inputs from the artifact store and writes its output
/// before the next stage starts, so any stage can be re-run alone against
/// a prior run's artifacts.
pub struct Runner {
    config: Config,
    model: Arc<dyn TextModel>,
    artifacts: ArtifactStore,
    policy: BatchPolicy,
}

impl Runner {
    pub fn new(
        config: Config,
        model: Arc<dyn TextModel>,
        output_dir: impl Into<PathBuf>,
        batch_size: usize,
    ) -> Self {
        let policy = BatchPolicy::new(batch_size, config.stage_timeout_secs);
        Self {
            config,
            model,
            artifacts: ArtifactStore::new(output_dir),
            policy,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run all four stages in order, short-circuiting when a stage's
    /// success rate falls below the configured minimum. Skipped stages are
    /// reported as Pending.
    pub async fn run_all(&self, pairs: &[QueryPair]) -> Result<RunSummary, HemlockError> {
        let mut summary = RunSummary::new();

        for (position, stage) in Stage::ALL.iter().enumerate() {
            let mut report = self.run_stage(*stage, Some(pairs), &mut summary.warnings).await?;

            if report.success_rate() < self.config.min_success_rate {
                error!(
                    stage = stage.name(),
                    rate = report.success_rate(),
                    minimum = self.config.min_success_rate,
                    "Stage success rate below minimum, short-circuiting"
                );
                report.status = StageStatus::Failed;
                summary.reports.push(report);
                for skipped in &Stage::ALL[position + 1..] {
                    summary.reports.push(StageReport::pending(*skipped));
                }
                return Ok(summary);
            }

            summary.reports.push(report);
        }

        Ok(summary)
    }

    /// Run an explicit subset of stages, in pipeline order. Each stage's
    /// upstream artifacts must exist on durable storage when it starts;
    /// otherwise the run fails with `MissingDependency` before any write.
    pub async fn run_stages(
        &self,
        stages: &[Stage],
        pairs: Option<&[QueryPair]>,
    ) -> Result<RunSummary, HemlockError> {
        let mut summary = RunSummary::new();
        for stage in stages {
            let report = self.run_stage(*stage, pairs, &mut summary.warnings).await?;
            summary.reports.push(report);
        }
        Ok(summary)
    }

    async fn run_stage(
        &self,
        stage: Stage,
        pairs: Option<&[QueryPair]>,
        warnings: &mut Vec<String>,
    ) -> Result<StageReport, HemlockError> {
        for artifact in stage.requires() {
            self.artifacts.require(artifact)?;
        }
        info!(stage = stage.name(), status = %StageStatus::Running, "Stage starting");

        let report = match stage {
            Stage::Graph => {
                let pairs = pairs.ok_or_else(|| {
                    HemlockError::Config("graph stage requires query pairs".to_string())
                })?;
                let build = GraphBuilder::new(Arc::clone(&self.model))
                    .build(pairs, &self.policy)
                    .await;
                self.artifacts.write_json(GRAPH_DATA, &build.store)?;
                self.artifacts.write_json(FAILED_QUERIES, &build.failed)?;
                let failed_items = build.failed.iter().map(|p| p.query.clone()).collect();
                StageReport::done(stage, pairs.len() - build.failed.len(), failed_items)
            }
            Stage::Generate => {
                let graph: GraphStore = self.artifacts.read_json(GRAPH_DATA)?;
                let outcome = TextGenerator::new(
                    Arc::clone(&self.model),
                    self.config.max_poison_words,
                )
                .generate(&graph, &self.policy)
                .await;
                self.artifacts.write_json(POISON_TEXTS, &outcome.completed)?;
                let failed_items = outcome.failed.iter().map(|u| u.key.clone()).collect();
                StageReport::done(stage, outcome.completed.len(), failed_items)
            }
            Stage::Enhance => {
                let graph: GraphStore = self.artifacts.read_json(GRAPH_DATA)?;
                let base_texts: BTreeMap<String, BaseText> =
                    self.artifacts.read_json(POISON_TEXTS)?;
                let outcome = TextEnhancer::new(
                    Arc::clone(&self.model),
                    self.config.max_cross_refs,
                )
                .enhance(&graph, &base_texts, &self.policy)
                .await;
                self.artifacts.write_json(ENHANCED_POISON_TEXTS, &outcome.completed)?;
                let failed_items = outcome.failed.iter().map(|u| u.key.clone()).collect();
                StageReport::done(stage, outcome.completed.len(), failed_items)
            }
            Stage::Merge => {
                let base_texts: BTreeMap<String, BaseText> =
                    self.artifacts.read_json(POISON_TEXTS)?;
                let enhanced_texts: BTreeMap<String, EnhancedText> =
                    self.artifacts.read_json(ENHANCED_POISON_TEXTS)?;
                let outcome = merger::merge(&base_texts, &enhanced_texts);
                self.artifacts.write_json(MERGED_POISON_TEXTS_JSON, &outcome.records)?;
                self.artifacts
                    .write_text(MERGED_POISON_TEXTS_TXT, &merger::render_text(&outcome))?;
                warnings.extend(outcome.warnings.iter().map(ToString::to_string));
                StageReport::done(stage, outcome.records.len(), Vec::new())
            }
        };

        info!(
            stage = stage.name(),
            status = %report.status,
            succeeded = report.succeeded,
            failed = report.failed,
            "Stage complete"
        );
        Ok(report)
    }
}
