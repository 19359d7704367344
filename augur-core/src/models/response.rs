use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AugurError;

/// One submitted answer.
///
/// The value lives in a single slot whatever the question type; on the wire
/// it is `optionId` for both choice and free-text questions. Numbers and
/// booleans are kept as their text; lists and objects read as no answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: String,
    #[serde(
        rename = "optionId",
        alias = "value",
        default,
        deserialize_with = "scalar_as_text"
    )]
    pub value: Option<String>,
}

fn scalar_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

impl Answer {
    pub fn new(question_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            value: Some(value.into()),
        }
    }

    pub fn skipped(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: Uuid,
    pub form_id: Uuid,
    pub user_id: Option<Uuid>,
    #[serde(rename = "response")]
    pub answers: Vec<Answer>,
    pub created_at: DateTime<Utc>,
}

impl Response {
    pub fn new(form_id: Uuid, user_id: Option<Uuid>, answers: Vec<Answer>) -> Self {
        Self {
            id: Uuid::new_v4(),
            form_id,
            user_id,
            answers,
            created_at: Utc::now(),
        }
    }

    /// A stored response must carry at least one answer.
    pub fn validate(&self) -> Result<(), AugurError> {
        if self.answers.is_empty() {
            return Err(AugurError::InvalidInput(
                "a response must contain at least one answer".to_string(),
            ));
        }
        Ok(())
    }
}
