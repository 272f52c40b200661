//! Bridge configuration

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EventKind;
use crate::memory::BufferCapacities;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub instance_id: String,
    /// URL of the page the guest runs in; origin and hash come from here
    pub page_url: String,
    pub buffers: BufferCapacities,
    /// Kinds delivered without an explicit listener
    pub capture: Vec<EventKind>,
    /// Local storage quota in bytes (keys plus values)
    pub storage_quota: usize,
    pub object_url_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            instance_id: Uuid::now_v7().to_string(),
            page_url: "http://localhost/".to_string(),
            buffers: BufferCapacities::default(),
            capture: vec![
                EventKind::Click,
                EventKind::Input,
                EventKind::Submit,
                EventKind::KeyDown,
                EventKind::KeyUp,
                EventKind::Focus,
                EventKind::Blur,
                EventKind::VisibilityChange,
            ],
            storage_quota: 5 * 1024 * 1024,
            object_url_prefix: "blob:ward/".to_string(),
        }
    }
}
