pub mod ai;
pub mod camera;
pub mod config;
pub mod controller;
pub mod error;
pub mod ingest;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use ai::{GeminiClient, ModelService, ResponseClient};
pub use camera::{CameraDevice, CaptureSession, CommandCamera, FacingMode};
pub use config::Config;
pub use controller::{Controller, PendingRequest, Reply, SubmitRejected};
pub use error::ChatError;
pub use ingest::{Attachments, CandidateId, EncodedImage, UploadCandidate};
pub use state::{Conversation, ConversationId, Message, Role, SessionState};
pub use store::{BlobStore, ConversationStore, FileBlobStore, MemoryBlobStore};
