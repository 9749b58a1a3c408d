use std::sync::Arc;

use async_trait::async_trait;
use triage_types::Result;

use crate::{GenerationRequest, RawOutput};

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// The opaque text-generation call behind every stage.
///
/// Implementations classify their own failures: errors for which
/// [`TriageError::is_retryable`](triage_types::TriageError::is_retryable) holds
/// are retried by the pipeline, all others trigger the stage fallback. Calls
/// must be safe to repeat.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<RawOutput>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<RawOutput> {
        (**self).generate(request).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
