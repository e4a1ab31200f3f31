//! The response client: one request per prompt, errors folded into text.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ChatError;
use crate::ingest::EncodedImage;

pub const SYSTEM_INSTRUCTION: &str = "You are an expert AI tutor. Provide detailed, step-by-step, and easy-to-understand answers suitable for a student. Use Markdown for formatting, including headings, lists, and bold text to structure your explanations clearly. Explain concepts thoroughly.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
}

/// Request content: bare prompt text, or images followed by the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub system_instruction: String,
    pub content: Content,
}

pub fn build_request(prompt: &str, images: &[EncodedImage]) -> GenerateRequest {
    let content = if images.is_empty() {
        Content::Text(prompt.to_string())
    } else {
        let mut parts: Vec<Part> = images
            .iter()
            .map(|image| Part::InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            })
            .collect();
        parts.push(Part::Text(prompt.to_string()));
        Content::Parts(parts)
    };

    GenerateRequest {
        system_instruction: SYSTEM_INSTRUCTION.to_string(),
        content,
    }
}

/// A hosted text-generation service
#[async_trait]
pub trait ModelService: Send + Sync {
    async fn generate_content(&self, request: &GenerateRequest) -> Result<String, ChatError>;
}

#[derive(Clone)]
pub struct ResponseClient {
    service: Arc<dyn ModelService>,
}

impl ResponseClient {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        Self { service }
    }

    /// Issue exactly one request. Failures come back as the reply text.
    pub async fn generate(&self, prompt: &str, images: &[EncodedImage]) -> String {
        let request = build_request(prompt, images);
        match self.service.generate_content(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Model request failed");
                format!("Failed to get response from AI. Details: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingService {
        requests: Mutex<Vec<GenerateRequest>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl ModelService for RecordingService {
        async fn generate_content(&self, request: &GenerateRequest) -> Result<String, ChatError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.fail_with {
                Some(msg) => Err(ChatError::ServiceFailure(msg.clone())),
                None => Ok("4".to_string()),
            }
        }
    }

    #[test]
    fn test_text_only_request_is_bare_prompt() {
        let request = build_request("2+2?", &[]);
        assert_eq!(request.content, Content::Text("2+2?".to_string()));
        assert_eq!(request.system_instruction, SYSTEM_INSTRUCTION);
    }

    #[test]
    fn test_images_come_before_trailing_text() {
        let images = vec![
            EncodedImage::from_bytes("image/png", b"first"),
            EncodedImage::from_bytes("image/jpeg", b"second"),
        ];
        let request = build_request("What is shown?", &images);

        let Content::Parts(parts) = request.content else {
            panic!("expected multi-part content");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], Part::InlineData { mime_type, .. } if mime_type == "image/png"));
        assert!(matches!(&parts[1], Part::InlineData { mime_type, .. } if mime_type == "image/jpeg"));
        assert_eq!(parts[2], Part::Text("What is shown?".to_string()));
    }

    #[tokio::test]
    async fn test_generate_issues_one_request() {
        let service = Arc::new(RecordingService::default());
        let client = ResponseClient::new(service.clone());

        assert_eq!(client.generate("2+2?", &[]).await, "4");
        assert_eq!(service.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_becomes_reply_text() {
        let service = Arc::new(RecordingService {
            fail_with: Some("quota exceeded".to_string()),
            ..Default::default()
        });
        let client = ResponseClient::new(service.clone());

        let reply = client.generate("2+2?", &[]).await;
        assert_eq!(reply, "Failed to get response from AI. Details: quota exceeded");
        assert_eq!(service.requests.lock().unwrap().len(), 1);
    }
}
