// Task Result & Citation Domain Model

use super::work_item::{WorkItem, WorkItemId};
use serde::{Deserialize, Serialize};

/// Maximum citations kept per result
pub const MAX_CITATIONS: usize = 30;

/// Maximum citation title length (characters)
pub const MAX_TITLE_CHARS: usize = 200;

/// A source link cited by a generated answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// 1-based, first-encounter order
    pub position: u32,
    pub url: String,
    pub title: String,
    pub domain: String,
}

/// Outcome of one pipeline run. Exactly one per work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: WorkItemId,
    pub query_item_id: String,
    pub target_id: String,
    pub success: bool,
    pub response_text: String,
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl TaskResult {
    pub fn success(
        item: &WorkItem,
        response_text: String,
        citations: Vec<Citation>,
        duration_ms: i64,
    ) -> Self {
        Self {
            task_id: item.id.clone(),
            query_item_id: item.source_ids.query_item_id.clone(),
            target_id: item.target_id.clone(),
            success: true,
            response_text,
            citations,
            error: None,
            duration_ms,
        }
    }

    pub fn failure(item: &WorkItem, error: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            task_id: item.id.clone(),
            query_item_id: item.source_ids.query_item_id.clone(),
            target_id: item.target_id.clone(),
            success: false,
            response_text: String::new(),
            citations: Vec::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }
}
