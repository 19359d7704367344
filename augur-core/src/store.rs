//! Form and response storage.
//!
//! The prediction pipeline only ever reads through `FormStore`. Two backends:
//! - `PgFormStore` — Postgres, questions and answers kept as JSONB
//! - `MemoryFormStore` — process-local, for tests and local runs
//!
//! Expected Postgres tables:
//!
//! ```sql
//! CREATE TABLE forms (
//!     id          UUID PRIMARY KEY,
//!     created_by  UUID NOT NULL,
//!     name        TEXT NOT NULL,
//!     description TEXT,
//!     questions   JSONB NOT NULL DEFAULT '[]',
//!     created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE responses (
//!     id         UUID PRIMARY KEY,
//!     form_id    UUID NOT NULL REFERENCES forms(id) ON DELETE CASCADE,
//!     user_id    UUID,
//!     answers    JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AugurError;
use crate::models::{Answer, Form, Question, Response};

#[async_trait]
pub trait FormStore: Send + Sync {
    async fn find_form_by_id(&self, id: Uuid) -> Result<Option<Form>, AugurError>;

    /// All responses for a form in storage order: oldest first, ties broken by id.
    async fn find_responses_by_form_id(&self, form_id: Uuid) -> Result<Vec<Response>, AugurError>;

    async fn insert_form(&self, form: &Form) -> Result<(), AugurError>;

    /// Store a response. Rejects responses without answers.
    async fn insert_response(&self, response: &Response) -> Result<(), AugurError>;

    /// Short status line for health checks.
    async fn health(&self) -> Result<String, AugurError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Postgres
// ============================================================================

pub struct PgFormStore {
    pool: PgPool,
}

impl PgFormStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FormRow {
    id: Uuid,
    created_by: Uuid,
    name: String,
    description: Option<String>,
    questions: Json<Vec<Question>>,
    created_at: DateTime<Utc>,
}

impl From<FormRow> for Form {
    fn from(row: FormRow) -> Self {
        Self {
            id: row.id,
            created_by: row.created_by,
            name: row.name,
            description: row.description,
            questions: row.questions.0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResponseRow {
    id: Uuid,
    form_id: Uuid,
    user_id: Option<Uuid>,
    answers: Json<Vec<Answer>>,
    created_at: DateTime<Utc>,
}

impl From<ResponseRow> for Response {
    fn from(row: ResponseRow) -> Self {
        Self {
            id: row.id,
            form_id: row.form_id,
            user_id: row.user_id,
            answers: row.answers.0,
            created_at: row.created_at,
        }
    }
}

fn unavailable(e: sqlx::Error) -> AugurError {
    AugurError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl FormStore for PgFormStore {
    async fn find_form_by_id(&self, id: Uuid) -> Result<Option<Form>, AugurError> {
        let row: Option<FormRow> = sqlx::query_as(
            "SELECT id, created_by, name, description, questions, created_at FROM forms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(row.map(Form::from))
    }

    async fn find_responses_by_form_id(&self, form_id: Uuid) -> Result<Vec<Response>, AugurError> {
        let rows: Vec<ResponseRow> = sqlx::query_as(
            r#"
            SELECT id, form_id, user_id, answers, created_at
            FROM responses
            WHERE form_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(form_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(rows.into_iter().map(Response::from).collect())
    }

    async fn insert_form(&self, form: &Form) -> Result<(), AugurError> {
        sqlx::query(
            r#"
            INSERT INTO forms (id, created_by, name, description, questions, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(form.id)
        .bind(form.created_by)
        .bind(&form.name)
        .bind(&form.description)
        .bind(Json(&form.questions))
        .bind(form.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_response(&self, response: &Response) -> Result<(), AugurError> {
        response.validate()?;

        sqlx::query(
            r#"
            INSERT INTO responses (id, form_id, user_id, answers, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(response.id)
        .bind(response.form_id)
        .bind(response.user_id)
        .bind(Json(&response.answers))
        .bind(response.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(response_id = %response.id, form_id = %response.form_id, "Response stored");
        Ok(())
    }

    async fn health(&self) -> Result<String, AugurError> {
        crate::db::health_check(&self.pool).await.map_err(unavailable)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store. Responses keep insertion order.
#[derive(Default)]
pub struct MemoryFormStore {
    forms: RwLock<HashMap<Uuid, Form>>,
    responses: RwLock<Vec<Response>>,
}

impl MemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FormStore for MemoryFormStore {
    async fn find_form_by_id(&self, id: Uuid) -> Result<Option<Form>, AugurError> {
        Ok(self.forms.read().await.get(&id).cloned())
    }

    async fn find_responses_by_form_id(&self, form_id: Uuid) -> Result<Vec<Response>, AugurError> {
        Ok(self
            .responses
            .read()
            .await
            .iter()
            .filter(|r| r.form_id == form_id)
            .cloned()
            .collect())
    }

    async fn insert_form(&self, form: &Form) -> Result<(), AugurError> {
        self.forms.write().await.insert(form.id, form.clone());
        Ok(())
    }

    async fn insert_response(&self, response: &Response) -> Result<(), AugurError> {
        response.validate()?;
        self.responses.write().await.push(response.clone());
        Ok(())
    }

    async fn health(&self) -> Result<String, AugurError> {
        Ok("in-memory".to_string())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
