use murmur_api::ValidationLimits;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub max_text_bytes: usize,
    pub max_media_bytes: usize,
}

impl Policy {
    pub fn limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_text_bytes: self.max_text_bytes,
            max_media_bytes: self.max_media_bytes,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_text_bytes: 4 * 1024,
            max_media_bytes: 10 * 1024 * 1024,
        }
    }
}
