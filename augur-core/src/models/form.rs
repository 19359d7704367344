use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    pub id: Uuid,
    pub created_by: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
}

/// A question as stored on its form. `id` is only unique within the form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Question {
    pub fn new(id: impl Into<String>, question_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question_text: question_text.into(),
            options: Vec::new(),
        }
    }
}

impl Form {
    pub fn new(created_by: Uuid, name: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_by,
            name: name.into(),
            description: None,
            questions,
            created_at: Utc::now(),
        }
    }
}
