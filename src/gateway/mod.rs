//! Provider gateway for streamed text generation.

pub mod error;
pub mod openai;
pub mod pricing;
pub mod types;

pub use error::{ErrorContext, ProviderError};
pub use openai::{OpenAiAdapter, RetryConfig};
pub use pricing::{
    estimate_text_token_cost_usd, resolve_pricing_model, PricingRecord, DEFAULT_PRICING_MODEL,
};
pub use types::*;

/// Default generation model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-5.2";

/// Text-generation capability used by every pipeline stage.
///
/// Implementations must hand back a stream that releases its provider handle
/// when dropped, whether or not it was drained.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    /// Open a streaming generation call.
    async fn stream_text(&self, req: TextRequest) -> Result<TextStream, ProviderError>;

    /// Count the input tokens the request would consume.
    async fn count_input_tokens(&self, req: &TextRequest) -> Result<u64, ProviderError>;
}
