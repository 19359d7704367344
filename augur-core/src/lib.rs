pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod models;
pub mod predictor;
pub mod store;

pub use config::AugurConfig;
pub use error::AugurError;
pub use features::{FeatureField, FeaturePayload, FeatureSchema, QuestionMatcher};
pub use models::{Answer, Form, PredictionResult, Question, Response};
pub use predictor::{HttpPredictor, Prediction, Predictor, PredictorError};
pub use store::{FormStore, MemoryFormStore, PgFormStore};
