use std::{collections::HashSet, fmt};

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// One cell of trial data as supplied by the experiment front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    /// Keeps the exact digits the client sent.
    Number(Number),
    Bool(bool),
    Null,
}

impl FieldValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text),
            Value::Number(number) => Self::Number(number),
            Value::Bool(flag) => Self::Bool(flag),
            Value::Null => Self::Null,
            // Nested structures are flattened to their compact JSON text.
            nested @ (Value::Array(_) | Value::Object(_)) => Self::Text(nested.to_string()),
        }
    }
}

/// Renders the value the way it lands in a CSV cell; `Null` is empty.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Number(number) => write!(f, "{number}"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Null => Ok(()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// ---------------------------------------------------------------------------
// Records and batches
// ---------------------------------------------------------------------------

/// One row of experiment data. Field order follows the request body.
#[derive(Debug, Clone, Default)]
pub struct TrialRecord {
    fields: IndexMap<String, FieldValue>,
}

/// Two records are equal when they hold the same fields in the same order.
impl PartialEq for TrialRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fields.iter().eq(other.fields.iter())
    }
}

impl TrialRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_object(object: Map<String, Value>) -> Self {
        object
            .into_iter()
            .map(|(name, value)| (name, FieldValue::from_json(value)))
            .collect()
    }

    /// Sets `name`, replacing an earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for TrialRecord
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

/// Non-empty, ordered set of records submitted in one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    records: Vec<TrialRecord>,
}

impl Batch {
    pub fn new(records: Vec<TrialRecord>) -> Result<Self, BatchError> {
        if records.is_empty() {
            return Err(BatchError::InvalidShape("payload array must not be empty"));
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrialRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a TrialRecord;
    type IntoIter = std::slice::Iter<'a, TrialRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid payload shape: {0}")]
    InvalidShape(&'static str),
    #[error("no record supplies a non-empty participant_id")]
    MissingParticipantId,
}

/// Decodes a request body into a batch: a non-empty JSON array of objects.
pub fn decode_batch(body: &[u8]) -> Result<Batch, BatchError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|err| BatchError::InvalidJson(err.to_string()))?;
    let Value::Array(items) = value else {
        return Err(BatchError::InvalidShape("payload must be a JSON array"));
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(object) => records.push(TrialRecord::from_json_object(object)),
            _ => {
                return Err(BatchError::InvalidShape(
                    "every array element must be a JSON object",
                ));
            }
        }
    }
    Batch::new(records)
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

pub const PARTICIPANT_ID_FIELD: &str = "participant_id";
pub const EXPERIMENT_VERSION_FIELD: &str = "experiment_version";
pub const EXPERIMENT_START_TIME_FIELD: &str = "experiment_start_time";
pub const UNKNOWN_EXPERIMENT_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMetadata {
    pub participant_id: String,
    pub experiment_version: Option<String>,
    pub experiment_start_time: Option<String>,
}

impl BatchMetadata {
    /// Version used in the output file name. Rows are never rewritten with it.
    pub fn version_or_unknown(&self) -> &str {
        self.experiment_version
            .as_deref()
            .unwrap_or(UNKNOWN_EXPERIMENT_VERSION)
    }
}

/// Picks the first non-empty occurrence of each metadata field, in record order.
pub fn extract_metadata(batch: &Batch) -> Result<BatchMetadata, BatchError> {
    let mut participant_id = None;
    let mut experiment_version = None;
    let mut experiment_start_time = None;

    for record in batch {
        take_first_non_empty(&mut participant_id, record, PARTICIPANT_ID_FIELD);
        take_first_non_empty(&mut experiment_version, record, EXPERIMENT_VERSION_FIELD);
        take_first_non_empty(
            &mut experiment_start_time,
            record,
            EXPERIMENT_START_TIME_FIELD,
        );
        if participant_id.is_some()
            && experiment_version.is_some()
            && experiment_start_time.is_some()
        {
            break;
        }
    }

    Ok(BatchMetadata {
        participant_id: participant_id.ok_or(BatchError::MissingParticipantId)?,
        experiment_version,
        experiment_start_time,
    })
}

fn take_first_non_empty(slot: &mut Option<String>, record: &TrialRecord, field: &str) {
    if slot.is_some() {
        return;
    }
    if let Some(value) = record.get(field) {
        let text = value.to_string();
        if !text.is_empty() {
            *slot = Some(text);
        }
    }
}

// ---------------------------------------------------------------------------
// Column ordering
// ---------------------------------------------------------------------------

/// Known jsPsych trial fields, in the order analysts expect to read them.
pub const PREFERRED_COLUMN_ORDER: [&str; 30] = [
    "participant_id",
    "experiment_version",
    "experiment_start_time",
    "assigned_group",
    "assigned_trial_type",
    "sona_survey_code",
    "task",
    "block",
    "stimulus_name",
    "stimulus_trial_type",
    "competence_response",
    "vote_response",
    "familiarity_response",
    "confidence_response",
    "responded_on_time",
    "reaction_time_ms",
    "response_time_limit_ms",
    "attention_check_question",
    "attention_check_correct_key",
    "attention_check_response",
    "memory_check_question",
    "memory_check_correct_answer",
    "memory_check_response",
    "memory_check_correct",
    "free_response",
    "timed_out",
    "rt",
    "time_elapsed",
    "trial_index",
    "trial_type",
];

/// Every distinct field name in the batch, in first-seen order.
pub fn discover_field_names(batch: &Batch) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for record in batch {
        for name in record.field_names() {
            if seen.insert(name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Header order: preferred columns that occur in the batch, then the rest as first seen.
pub fn resolve_column_order(batch: &Batch) -> Vec<String> {
    let discovered = discover_field_names(batch);
    let present: HashSet<&str> = discovered.iter().map(String::as_str).collect();

    let mut ordered: Vec<String> = PREFERRED_COLUMN_ORDER
        .iter()
        .filter(|name| present.contains(*name))
        .map(|name| name.to_string())
        .collect();
    ordered.extend(
        discovered
            .into_iter()
            .filter(|name| !PREFERRED_COLUMN_ORDER.contains(&name.as_str())),
    );
    ordered
}
