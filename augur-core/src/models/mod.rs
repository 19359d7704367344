pub mod form;
pub mod prediction;
pub mod response;

pub use form::{Form, Question};
pub use prediction::{PredictionResult, CONFIDENCE_ERROR, PREDICTION_ERROR};
pub use response::{Answer, Response};
