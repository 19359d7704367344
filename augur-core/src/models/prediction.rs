use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::features::FeaturePayload;
use crate::models::Response;
use crate::predictor::{Prediction, PredictorError};

/// Label recorded when the predictor call for a response failed.
pub const PREDICTION_ERROR: &str = "Error";

/// Confidence recorded when the predictor call for a response failed.
pub const CONFIDENCE_ERROR: &str = "-";

/// Outcome for one response in a prediction batch.
///
/// `prediction` and `confidence` carry the predictor's JSON values verbatim,
/// or the `"Error"` / `"-"` sentinels on failure. `raw_data` is the payload
/// that was sent.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub response_id: Uuid,
    pub user_id: Option<Uuid>,
    pub prediction: Value,
    pub confidence: Value,
    pub raw_data: FeaturePayload,
}

impl PredictionResult {
    pub fn from_outcome(
        response: &Response,
        payload: FeaturePayload,
        outcome: Result<Prediction, PredictorError>,
    ) -> Self {
        let (prediction, confidence) = match outcome {
            Ok(p) => (p.prediction, p.confidence),
            Err(_) => (
                Value::String(PREDICTION_ERROR.to_string()),
                Value::String(CONFIDENCE_ERROR.to_string()),
            ),
        };

        Self {
            response_id: response.id,
            user_id: response.user_id,
            prediction,
            confidence,
            raw_data: payload,
        }
    }
}
