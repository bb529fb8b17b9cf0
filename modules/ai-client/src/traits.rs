use anyhow::Result;
use async_trait::async_trait;

/// The external generation capability: a prompt in, raw text out.
///
/// Implementations may fail or return malformed content; callers own
/// validation, retry, and timeout policy. The call is the only operation
/// in the pipeline that suspends.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}
