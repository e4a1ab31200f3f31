//! Image ingestion: turns picked files and camera frames into base64 payloads.
//!
//! Files are encoded by background tasks that report progress over a channel;
//! the owner of [`Attachments`] drains it with [`Attachments::poll`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ChatError;

const READ_CHUNK_BYTES: usize = 64 * 1024;

static NEXT_CANDIDATE: AtomicU64 = AtomicU64::new(1);

/// A base64 image payload plus its content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data: String,
}

impl EncodedImage {
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Parse a `data:<mime>;base64,<data>` URL
    pub fn from_data_url(url: &str) -> Result<Self, ChatError> {
        let (header, data) = url
            .split_once(',')
            .ok_or_else(|| ChatError::ServiceFailure("Invalid data URL".to_string()))?;
        let mime_type = header
            .strip_prefix("data:")
            .and_then(|rest| rest.split(';').next())
            .filter(|mime| !mime.is_empty())
            .ok_or_else(|| {
                ChatError::ServiceFailure("Could not parse MIME type from data URL".to_string())
            })?;

        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}

/// Content type guessed from the file extension
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(u64);

impl CandidateId {
    fn next() -> Self {
        Self(NEXT_CANDIDATE.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    File(PathBuf),
    Camera,
}

/// An image attachment that is not yet part of a message
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    pub id: CandidateId,
    pub source: CandidateSource,
    /// Short label shown in the attachment tray
    pub preview: String,
    pub progress: u8,
    pub payload: Option<EncodedImage>,
}

impl UploadCandidate {
    /// A camera frame arrives fully encoded, with no progressive phase.
    pub fn from_camera_frame(jpeg: &[u8]) -> Self {
        let id = CandidateId::next();
        Self {
            id,
            source: CandidateSource::Camera,
            preview: format!("capture-{}.jpg", id.0),
            progress: 100,
            payload: Some(EncodedImage::from_bytes("image/jpeg", jpeg)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.payload.is_some()
    }
}

#[derive(Debug)]
enum EncodeUpdate {
    Progress(CandidateId, u8),
    Done(CandidateId, EncodedImage),
    Failed(CandidateId, String),
}

/// The attachment tray of the input box.
pub struct Attachments {
    candidates: Vec<UploadCandidate>,
    tasks: HashMap<CandidateId, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<EncodeUpdate>,
    rx: mpsc::UnboundedReceiver<EncodeUpdate>,
}

impl Default for Attachments {
    fn default() -> Self {
        Self::new()
    }
}

impl Attachments {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            candidates: Vec::new(),
            tasks: HashMap::new(),
            tx,
            rx,
        }
    }

    pub fn candidates(&self) -> &[UploadCandidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, id: CandidateId) -> Option<&UploadCandidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    /// True while any candidate is still being encoded
    pub fn has_pending(&self) -> bool {
        self.candidates.iter().any(|c| !c.is_ready())
    }

    /// Register `path` and start encoding it in the background. Must be
    /// called from within a tokio runtime.
    pub fn begin_encode(&mut self, path: impl Into<PathBuf>) -> CandidateId {
        let path = path.into();
        let id = CandidateId::next();
        let preview = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.candidates.push(UploadCandidate {
            id,
            source: CandidateSource::File(path.clone()),
            preview,
            progress: 0,
            payload: None,
        });

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let update = match encode_file(id, &path, &tx).await {
                Ok(image) => EncodeUpdate::Done(id, image),
                Err(e) => EncodeUpdate::Failed(id, format!("Could not read {}: {}", path.display(), e)),
            };
            let _ = tx.send(update);
        });
        self.tasks.insert(id, handle);

        tracing::debug!(candidate = id.0, "Started encoding attachment");
        id
    }

    /// Add an already-encoded candidate, e.g. a camera capture
    pub fn push_ready(&mut self, candidate: UploadCandidate) {
        self.candidates.push(candidate);
    }

    /// Apply queued encoder updates. Returns read failures; the failed
    /// candidates are removed from the tray.
    pub fn poll(&mut self) -> Vec<ChatError> {
        let mut failures = Vec::new();

        while let Ok(update) = self.rx.try_recv() {
            match update {
                EncodeUpdate::Progress(id, percent) => {
                    if let Some(candidate) = self.candidates.iter_mut().find(|c| c.id == id) {
                        candidate.progress = candidate.progress.max(percent);
                    }
                }
                EncodeUpdate::Done(id, image) => {
                    self.tasks.remove(&id);
                    if let Some(candidate) = self.candidates.iter_mut().find(|c| c.id == id) {
                        candidate.progress = 100;
                        candidate.payload = Some(image);
                    }
                }
                EncodeUpdate::Failed(id, message) => {
                    self.tasks.remove(&id);
                    // A released candidate may still report; only surface live ones
                    if self.get(id).is_some() {
                        self.candidates.retain(|c| c.id != id);
                        tracing::warn!(candidate = id.0, error = %message, "Attachment encoding failed");
                        failures.push(ChatError::DeviceUnavailable(message));
                    }
                }
            }
        }

        failures
    }

    /// Discard a candidate and stop its encoder. Releasing twice is harmless.
    pub fn release(&mut self, id: CandidateId) {
        if let Some(handle) = self.tasks.remove(&id) {
            handle.abort();
        }
        self.candidates.retain(|c| c.id != id);
    }

    pub fn release_last(&mut self) -> Option<CandidateId> {
        let id = self.candidates.last()?.id;
        self.release(id);
        Some(id)
    }

    /// Encoded payloads in tray order, or `None` while anything is still
    /// encoding.
    pub fn ready_images(&self) -> Option<Vec<EncodedImage>> {
        if self.has_pending() {
            return None;
        }
        Some(
            self.candidates
                .iter()
                .filter_map(|c| c.payload.clone())
                .collect(),
        )
    }

    /// Empty the tray once its images have been sent
    pub fn clear(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
        self.candidates.clear();
    }
}

impl Drop for Attachments {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

async fn encode_file(
    id: CandidateId,
    path: &Path,
    tx: &mpsc::UnboundedSender<EncodeUpdate>,
) -> std::io::Result<EncodedImage> {
    let mut file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len();

    let mut bytes = Vec::with_capacity(total as usize);
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut last_reported = 0u8;

    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);

        if total > 0 {
            // 100 is reserved for the moment the payload is attached
            let percent = ((bytes.len() as u64 * 100) / total).min(99) as u8;
            if percent > last_reported {
                last_reported = percent;
                let _ = tx.send(EncodeUpdate::Progress(id, percent));
            }
        }
    }

    Ok(EncodedImage::from_bytes(mime_type_for(path), &bytes))
}
