use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "body", alias = "content")]
    pub message: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: Option<String>,
    #[serde(default, alias = "isRead")]
    pub read: bool,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}
