//! Wire types of the hospital backend's notification endpoints.

use serde::{Deserialize, Serialize};

use crate::notifications::NotificationRecord;

/// Response of `GET /notifications?page=N&perPage=M`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub data: PageData,
    #[serde(default)]
    pub unread_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

/// Paginator body nested under `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    #[serde(default)]
    pub data: Vec<NotificationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl NotificationPage {
    pub fn records(&self) -> &[NotificationRecord] {
        &self.data.data
    }

    /// A full page means there might be another one after it.
    pub fn may_have_more(&self, per_page: u32) -> bool {
        self.records().len() == per_page as usize
    }
}

/// Response of the mutation endpoints (read, read-all, delete, clear-all).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
