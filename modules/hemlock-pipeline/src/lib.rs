pub mod enhancer;
pub mod generator;
pub mod merger;
pub mod runner;

pub use enhancer::TextEnhancer;
pub use generator::TextGenerator;
pub use merger::{merge, render_text, IncompleteTheme, MergeOutcome};
pub use runner::{Runner, RunSummary, Stage, StageReport, StageStatus};
