pub mod openai;
pub mod sse;

pub use openai::{
    ChunkStream, CompletionBackend, CompletionOptions, CompletionRequest, CompletionResponse,
    OpenAIClient,
};
pub use sse::{parse_completion, parse_delta, SseLine, SseLineDecoder};
