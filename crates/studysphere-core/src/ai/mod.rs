pub mod client;
pub mod gemini;

pub use client::{
    build_request, Content, GenerateRequest, ModelService, Part, ResponseClient,
    SYSTEM_INSTRUCTION,
};
pub use gemini::GeminiClient;
