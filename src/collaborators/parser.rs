use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// One parsed record, column name -> value
pub type Row = Map<String, Value>;

/// Uploaded payload for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "content", rename_all = "lowercase")]
pub enum RawInput {
    /// Comma separated values with a header row
    Csv(String),
    /// A JSON array of objects
    Json(String),
}

/// Problem with one input row; `row` is 1-based, 0 for the payload as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub field: Option<String>,
    pub message: String,
}

impl RowError {
    pub fn payload(message: impl Into<String>) -> Self {
        Self {
            row: 0,
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "row {} field {}: {}", self.row, field, self.message),
            None if self.row == 0 => f.write_str(&self.message),
            None => write!(f, "row {}: {}", self.row, self.message),
        }
    }
}

/// Parser/validator invoked before staging
pub trait ImportParser: Send + Sync {
    fn parse(&self, input: &RawInput) -> Result<Vec<Row>, Vec<RowError>>;

    fn validate_row(&self, row: &Row, entity_type: &str) -> Result<(), Vec<RowError>>;
}

/// CSV/JSON parser with per-entity required columns
#[derive(Debug, Clone, Default)]
pub struct DelimitedParser {
    required_fields: HashMap<String, Vec<String>>,
}

impl DelimitedParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_required_fields(mut self, entity_type: &str, fields: &[&str]) -> Self {
        self.required_fields.insert(
            entity_type.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    fn parse_csv(content: &str) -> Result<Vec<Row>, Vec<RowError>> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| vec![RowError::payload(format!("invalid CSV header: {e}"))])?
            .clone();

        let mut rows = Vec::new();
        let mut errors = Vec::new();
        for (index, record) in reader.records().enumerate() {
            match record {
                Ok(record) => {
                    let row: Row = headers
                        .iter()
                        .zip(record.iter())
                        .map(|(header, value)| (header.to_string(), Value::String(value.to_string())))
                        .collect();
                    rows.push(row);
                }
                Err(e) => errors.push(RowError {
                    row: index + 1,
                    field: None,
                    message: e.to_string(),
                }),
            }
        }

        if errors.is_empty() {
            Ok(rows)
        } else {
            Err(errors)
        }
    }

    fn parse_json(content: &str) -> Result<Vec<Row>, Vec<RowError>> {
        let value: Value = serde_json::from_str(content)
            .map_err(|e| vec![RowError::payload(format!("invalid JSON: {e}"))])?;
        let Value::Array(items) = value else {
            return Err(vec![RowError::payload("expected a JSON array of objects")]);
        };

        let mut rows = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(row) => rows.push(row),
                other => errors.push(RowError {
                    row: index + 1,
                    field: None,
                    message: format!("expected an object, found {other}"),
                }),
            }
        }

        if errors.is_empty() {
            Ok(rows)
        } else {
            Err(errors)
        }
    }
}

impl ImportParser for DelimitedParser {
    fn parse(&self, input: &RawInput) -> Result<Vec<Row>, Vec<RowError>> {
        match input {
            RawInput::Csv(content) => Self::parse_csv(content),
            RawInput::Json(content) => Self::parse_json(content),
        }
    }

    fn validate_row(&self, row: &Row, entity_type: &str) -> Result<(), Vec<RowError>> {
        let Some(required) = self.required_fields.get(entity_type) else {
            return Ok(());
        };

        let errors: Vec<RowError> = required
            .iter()
            .filter(|field| match row.get(field.as_str()) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|field| RowError {
                row: 0,
                field: Some(field.clone()),
                message: "required value missing".to_string(),
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
