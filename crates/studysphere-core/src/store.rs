//! Conversation store and the blob stores it persists to.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::ChatError;
use crate::ingest::EncodedImage;
use crate::state::{Conversation, ConversationId, Message};

/// Key under which the whole conversation collection is stored
pub const CONVERSATIONS_KEY: &str = "studysphere-ai-conversations";

/// Minimal key-value blob storage
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

/// Stores each key as `<dir>/<key>.json`
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        // Write beside the target and rename so a crash never leaves half a document
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)
    }
}

/// In-process blob store, handy for tests and the one-shot CLI dry runs
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "blob store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "blob store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Ordered collection of conversations, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    /// Start a new conversation with `first_message` and put it at the top of
    /// the history.
    pub fn create_conversation(&mut self, first_message: Message) -> ConversationId {
        let mut conversation = Conversation::start(first_message);
        while self.contains(&conversation.id) {
            conversation.id = ConversationId::generate();
        }
        let id = conversation.id.clone();
        tracing::debug!(conversation_id = %id, title = %conversation.title, "Created conversation");
        self.conversations.insert(0, conversation);
        id
    }

    /// Append to an existing conversation. A missing target is not an error
    /// for the caller: the message is dropped and the miss is logged.
    pub fn append_message(&mut self, id: &ConversationId, message: Message) -> bool {
        match self.conversations.iter_mut().find(|c| &c.id == id) {
            Some(conversation) => {
                conversation.messages.push(message);
                true
            }
            None => {
                let err = ChatError::StaleTarget(id.to_string());
                tracing::warn!(error = %err, role = ?message.role, "Dropping message for missing conversation");
                false
            }
        }
    }

    pub fn delete_conversation(&mut self, id: &ConversationId) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| &c.id != id);
        let removed = self.conversations.len() != before;
        if removed {
            tracing::debug!(conversation_id = %id, "Deleted conversation");
        }
        removed
    }

    /// Serialize the whole collection under [`CONVERSATIONS_KEY`].
    pub fn persist(&self, blobs: &dyn BlobStore) -> anyhow::Result<()> {
        let json = serde_json::to_string(&self.conversations)?;
        blobs.set(CONVERSATIONS_KEY, &json)?;
        Ok(())
    }

    /// Rebuild the collection from storage. Never fails: anything unreadable
    /// is logged and treated as an empty history.
    pub fn restore(blobs: &dyn BlobStore) -> Self {
        let raw = match blobs.get(CONVERSATIONS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Self::new(),
            Err(e) => {
                let err = ChatError::PersistenceCorrupt(e.to_string());
                tracing::warn!(error = %err, "Failed to read conversations, starting empty");
                return Self::new();
            }
        };

        let parsed: Vec<Conversation> = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                let err = ChatError::PersistenceCorrupt(e.to_string());
                tracing::warn!(error = %err, "Failed to parse conversations, starting empty");
                return Self::new();
            }
        };

        let mut seen = HashSet::new();
        let mut conversations = Vec::with_capacity(parsed.len());
        for mut conversation in parsed {
            if seen.insert(conversation.id.clone()) {
                drop_unreadable_images(&mut conversation);
                conversations.push(conversation);
            } else {
                tracing::warn!(conversation_id = %conversation.id, "Skipping duplicate stored conversation");
            }
        }

        tracing::info!(count = conversations.len(), "Restored conversations");
        Self { conversations }
    }
}

/// Stored images must be data URLs; anything else could never be sent
/// back to the model, so it is dropped with a warning.
fn drop_unreadable_images(conversation: &mut Conversation) {
    for message in &mut conversation.messages {
        let Some(images) = message.images.take() else {
            continue;
        };
        let before = images.len();
        let kept: Vec<String> = images
            .into_iter()
            .filter(|url| EncodedImage::from_data_url(url).is_ok())
            .collect();

        if kept.len() != before {
            let err = ChatError::PersistenceCorrupt(format!(
                "{} stored image(s) are not data URLs",
                before - kept.len()
            ));
            tracing::warn!(conversation_id = %conversation.id, error = %err, "Dropping unreadable images");
        }
        message.images = if kept.is_empty() { None } else { Some(kept) };
    }
}
