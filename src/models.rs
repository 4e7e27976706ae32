use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::encoder::ImageMime;

/// Everything the presentation layer needs to render one session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionView {
    pub id: Uuid,
    pub state: String,
    pub has_image: bool,
    pub image_name: Option<String>,
    pub image_mime: Option<ImageMime>,
    pub image_size: Option<u64>,
    pub image_preview: Option<String>,
    pub prompt: String,
    pub result: Option<String>,
    pub result_generated_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub is_loading: bool,
    pub can_submit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromptUpdate {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DataUriUpload {
    #[serde(default)]
    pub name: Option<String>,
    pub data_uri: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub error: String,
}
