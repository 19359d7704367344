//! Feature extraction — turns a form's questions and one response's answers
//! into the flat record the prediction API consumes.
//!
//! The field table (`FeatureSchema`) is data: each canonical field name owns a
//! `QuestionMatcher` that picks the question feeding it. The built-in table is
//! `student-outcome/1`; its names and keys are the contract with the external
//! predictor, so any change to them needs a new schema version.
//!
//! Extraction never fails. A field whose question or answer cannot be found
//! is recorded as absent (`null` on the wire).

use regex::{Regex, RegexBuilder};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::FeaturesConfig;
use crate::error::AugurError;
use crate::models::{Answer, Question};

/// Version tag of the built-in schema.
pub const STUDENT_OUTCOME_V1: &str = "student-outcome/1";

/// (canonical field name, semantic key) pairs of `student-outcome/1`, in wire order.
const STUDENT_OUTCOME_V1_FIELDS: [(&str, &str); 7] = [
    ("Gender", "gender"),
    ("AttendanceRate", "attendance rate"),
    ("StudyHoursPerWeek", "study per week"),
    ("PreviousGrade", "previous grade"),
    ("ExtracurricularActivities", "extracurricular activities"),
    ("ParentalSupport", "parental support"),
    ("Online Classes Taken", "online classes"),
];

// ============================================================================
// Question Matcher
// ============================================================================

/// Predicate over question text. Both kinds ignore case.
#[derive(Debug, Clone)]
pub enum QuestionMatcher {
    /// Lowercased key that must occur somewhere in the lowercased question text.
    Substring(String),
    /// Case-insensitive regular expression searched in the question text.
    Pattern(Regex),
}

impl QuestionMatcher {
    pub fn substring(key: impl AsRef<str>) -> Self {
        Self::Substring(key.as_ref().to_lowercase())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(Self::Pattern)
    }

    pub fn matches(&self, question_text: &str) -> bool {
        match self {
            Self::Substring(key) => question_text.to_lowercase().contains(key.as_str()),
            Self::Pattern(re) => re.is_match(question_text),
        }
    }

    /// First question, in form order, whose text matches.
    ///
    /// Later matches are ignored: two questions mentioning "grade" always
    /// resolve to the earlier one.
    pub fn find_question<'a>(&self, questions: &'a [Question]) -> Option<&'a Question> {
        questions.iter().find(|q| self.matches(&q.question_text))
    }
}

/// Resolve a semantic key to the first question whose text contains it,
/// ignoring case.
pub fn find_question<'a>(questions: &'a [Question], semantic_key: &str) -> Option<&'a Question> {
    QuestionMatcher::substring(semantic_key).find_question(questions)
}

// ============================================================================
// Answer Resolver
// ============================================================================

/// Value of the first answer tied to `question`, if that answer has one.
pub fn find_answer<'a>(answers: &'a [Answer], question: &Question) -> Option<&'a str> {
    answers
        .iter()
        .find(|a| a.question_id == question.id)
        .and_then(|a| a.value.as_deref())
}

// ============================================================================
// Payload
// ============================================================================

/// Flat feature record for one response, keyed by canonical field name.
///
/// Always holds every field of the schema that built it, in schema order.
/// Serializes as a JSON object with `null` for absent fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeaturePayload {
    fields: Vec<(String, Option<String>)>,
}

impl FeaturePayload {
    /// Value of `name`. `None` both for an absent value and an unknown field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn present_count(&self) -> usize {
        self.fields.iter().filter(|(_, v)| v.is_some()).count()
    }
}

impl Serialize for FeaturePayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

// ============================================================================
// Schema + Payload Builder
// ============================================================================

#[derive(Debug, Clone)]
pub struct FeatureField {
    pub name: String,
    pub matcher: QuestionMatcher,
}

impl FeatureField {
    pub fn new(name: impl Into<String>, matcher: QuestionMatcher) -> Self {
        Self {
            name: name.into(),
            matcher,
        }
    }
}

/// Ordered field table shared with the external predictor.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    pub version: String,
    pub fields: Vec<FeatureField>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::student_outcome_v1()
    }
}

impl FeatureSchema {
    /// The seven-field student outcome schema.
    pub fn student_outcome_v1() -> Self {
        Self {
            version: STUDENT_OUTCOME_V1.to_string(),
            fields: STUDENT_OUTCOME_V1_FIELDS
                .iter()
                .map(|(name, key)| FeatureField::new(*name, QuestionMatcher::substring(key)))
                .collect(),
        }
    }

    /// Build the schema from `[features]`, falling back to `student-outcome/1`
    /// when no fields are configured.
    pub fn from_config(config: &FeaturesConfig) -> Result<Self, AugurError> {
        if config.fields.is_empty() {
            return Ok(Self::student_outcome_v1());
        }

        let mut fields: Vec<FeatureField> = Vec::with_capacity(config.fields.len());
        for field in &config.fields {
            if field.name.trim().is_empty() {
                return Err(AugurError::InvalidInput(
                    "feature field name cannot be empty".to_string(),
                ));
            }
            if fields.iter().any(|f| f.name == field.name) {
                return Err(AugurError::InvalidInput(format!(
                    "duplicate feature field '{}'",
                    field.name
                )));
            }

            let matcher = match (&field.pattern, &field.key) {
                (Some(pattern), _) => QuestionMatcher::pattern(pattern).map_err(|e| {
                    AugurError::InvalidInput(format!(
                        "feature field '{}' has an invalid pattern: {}",
                        field.name, e
                    ))
                })?,
                (None, Some(key)) if !key.trim().is_empty() => QuestionMatcher::substring(key),
                _ => {
                    return Err(AugurError::InvalidInput(format!(
                        "feature field '{}' needs a key or a pattern",
                        field.name
                    )))
                }
            };
            fields.push(FeatureField::new(field.name.clone(), matcher));
        }

        Ok(Self {
            version: config.version.clone().unwrap_or_else(|| "custom".to_string()),
            fields,
        })
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Build the payload for one response. Never fails; unmatched fields are absent.
    pub fn build_payload(&self, questions: &[Question], answers: &[Answer]) -> FeaturePayload {
        let fields = self
            .fields
            .iter()
            .map(|field| {
                let value = match field.matcher.find_question(questions) {
                    Some(question) => {
                        let value = find_answer(answers, question);
                        if value.is_none() {
                            tracing::debug!(
                                field = %field.name,
                                question_id = %question.id,
                                "No answer for matched question"
                            );
                        }
                        value.map(str::to_owned)
                    }
                    None => {
                        tracing::debug!(field = %field.name, "No question matches feature field");
                        None
                    }
                };
                (field.name.clone(), value)
            })
            .collect();

        FeaturePayload { fields }
    }
}
