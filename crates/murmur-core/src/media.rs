use crate::error::CoreError;
use async_trait::async_trait;
use murmur_api::MessageKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Turns a binary blob into a durable reference.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, kind: MessageKind, blob: Vec<u8>) -> Result<String, CoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryMedia {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail: Arc<AtomicBool>,
}

impl InMemoryMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(reference).cloned()
    }
}

#[async_trait]
impl MediaUploader for InMemoryMedia {
    async fn upload(&self, kind: MessageKind, blob: Vec<u8>) -> Result<String, CoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::Media("upload rejected".to_string()));
        }
        let ext = match kind {
            MessageKind::Audio => "webm",
            _ => "jpg",
        };
        let reference = format!("mem://chat-media/{}.{}", Uuid::new_v4(), ext);
        self.objects.lock().await.insert(reference.clone(), blob);
        Ok(reference)
    }
}
