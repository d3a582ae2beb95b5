//! Rating submission payloads and their validation.
//!
//! Raw JSON is read into [`SubmissionRequest`] with every field optional, so a
//! bad payload yields a full list of field errors instead of the first serde
//! failure. Only a [`Submission`] ever reaches the aggregator.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_TAGS: usize = 3;
pub const MAX_OVERRIDES: usize = 2;
pub const MAX_NOTES_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelMode {
    Walk,
    Bike,
}

impl FromStr for TravelMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "walk" => Ok(TravelMode::Walk),
            "bike" => Ok(TravelMode::Bike),
            other => Err(format!("must be \"walk\" or \"bike\", got {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("submission rejected: {}", .errors.iter().join("; "))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|error| error.field == field)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentOverrideRequest {
    #[serde(default)]
    pub segment_id: String,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmissionRequest {
    #[serde(default)]
    pub route_id: String,
    #[serde(default)]
    pub segment_ids: Vec<String>,
    pub overall_rating: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub segment_overrides: Vec<SegmentOverrideRequest>,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub user_hash: String,
    pub notes: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOverride {
    pub segment_id: String,
    pub rating: u8,
}

/// A schema-checked rating submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub route_id: String,
    pub segment_ids: Vec<String>,
    pub overall_rating: u8,
    pub tags: Vec<String>,
    pub overrides: Vec<SegmentOverride>,
    pub mode: TravelMode,
    pub user_hash: String,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Submission {
    /// Parses and validates a JSON payload.
    ///
    /// # Errors
    ///
    /// Malformed JSON or unknown fields are reported against `payload`;
    /// everything else is reported per field.
    pub fn from_json(text: &str) -> Result<Self, ValidationErrors> {
        let request: SubmissionRequest =
            serde_json::from_str(text).map_err(|error| ValidationErrors {
                errors: vec![FieldError::new("payload", error.to_string())],
            })?;
        request.validate()
    }

    /// The rating that applies to `segment_id`: its override, or the overall one.
    pub fn rating_for(&self, segment_id: &str) -> u8 {
        self.overrides
            .iter()
            .find(|entry| entry.segment_id == segment_id)
            .map_or(self.overall_rating, |entry| entry.rating)
    }
}

impl TryFrom<SubmissionRequest> for Submission {
    type Error = ValidationErrors;

    fn try_from(request: SubmissionRequest) -> Result<Self, Self::Error> {
        request.validate()
    }
}

impl SubmissionRequest {
    pub fn validate(self) -> Result<Submission, ValidationErrors> {
        let mut errors = Vec::new();

        if self.route_id.trim().is_empty() {
            errors.push(FieldError::new("route_id", "must not be empty"));
        }

        if self.segment_ids.is_empty() {
            errors.push(FieldError::new("segment_ids", "must name at least one segment"));
        }
        let mut seen = HashSet::new();
        for (position, segment_id) in self.segment_ids.iter().enumerate() {
            if segment_id.trim().is_empty() {
                errors.push(FieldError::new(
                    format!("segment_ids[{position}]"),
                    "must not be empty",
                ));
            } else if !seen.insert(segment_id.as_str()) {
                errors.push(FieldError::new(
                    format!("segment_ids[{position}]"),
                    format!("duplicate segment {segment_id:?}"),
                ));
            }
        }

        let overall_rating = match self.overall_rating {
            Some(value) => rating_value(value).map_err(|message| {
                errors.push(FieldError::new("overall_rating", message));
            }),
            None => {
                errors.push(FieldError::new("overall_rating", "is required"));
                Err(())
            }
        };

        if self.tags.is_empty() || self.tags.len() > MAX_TAGS {
            errors.push(FieldError::new(
                "tags",
                format!("must contain 1 to {MAX_TAGS} tags, got {}", self.tags.len()),
            ));
        }
        let mut seen_tags = HashSet::new();
        for (position, tag) in self.tags.iter().enumerate() {
            if tag.trim().is_empty() {
                errors.push(FieldError::new(format!("tags[{position}]"), "must not be empty"));
            } else if !seen_tags.insert(tag.trim()) {
                errors.push(FieldError::new(
                    format!("tags[{position}]"),
                    format!("duplicate tag {tag:?}"),
                ));
            }
        }

        if self.segment_overrides.len() > MAX_OVERRIDES {
            errors.push(FieldError::new(
                "segment_overrides",
                format!(
                    "at most {MAX_OVERRIDES} overrides allowed, got {}",
                    self.segment_overrides.len()
                ),
            ));
        }
        let mut overrides = Vec::with_capacity(self.segment_overrides.len());
        let mut overridden = HashSet::new();
        for (position, entry) in self.segment_overrides.iter().enumerate() {
            let field = format!("segment_overrides[{position}]");
            if !seen.contains(entry.segment_id.as_str()) {
                errors.push(FieldError::new(
                    format!("{field}.segment_id"),
                    format!("{:?} is not one of segment_ids", entry.segment_id),
                ));
            } else if !overridden.insert(entry.segment_id.as_str()) {
                errors.push(FieldError::new(
                    format!("{field}.segment_id"),
                    format!("{:?} is overridden twice", entry.segment_id),
                ));
            }
            match entry.rating.map(rating_value) {
                Some(Ok(rating)) => overrides.push(SegmentOverride {
                    segment_id: entry.segment_id.clone(),
                    rating,
                }),
                Some(Err(message)) => {
                    errors.push(FieldError::new(format!("{field}.rating"), message))
                }
                None => errors.push(FieldError::new(format!("{field}.rating"), "is required")),
            }
        }

        let mode = self
            .mode
            .parse::<TravelMode>()
            .map_err(|message| errors.push(FieldError::new("mode", message)));

        if self.user_hash.trim().is_empty() {
            errors.push(FieldError::new("user_hash", "must not be empty"));
        }

        if let Some(notes) = &self.notes {
            let length = notes.chars().count();
            if length > MAX_NOTES_CHARS {
                errors.push(FieldError::new(
                    "notes",
                    format!("must be at most {MAX_NOTES_CHARS} characters, got {length}"),
                ));
            }
        }

        let timestamp = match self.timestamp {
            Some(millis) => DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| {
                    errors.push(FieldError::new("timestamp", format!("{millis} is out of range")))
                }),
            None => {
                errors.push(FieldError::new("timestamp", "is required"));
                Err(())
            }
        };

        match (overall_rating, mode, timestamp) {
            (Ok(overall_rating), Ok(mode), Ok(timestamp)) if errors.is_empty() => Ok(Submission {
                route_id: self.route_id,
                segment_ids: self.segment_ids,
                overall_rating,
                tags: self.tags.iter().map(|tag| tag.trim().to_string()).collect(),
                overrides,
                mode,
                user_hash: self.user_hash,
                notes: self.notes,
                timestamp,
            }),
            _ => Err(ValidationErrors { errors }),
        }
    }
}

fn rating_value(value: f64) -> Result<u8, String> {
    if !value.is_finite() || value.fract() != 0.0 || !(1.0..=5.0).contains(&value) {
        return Err(format!("must be a whole number from 1 to 5, got {value}"));
    }
    Ok(value as u8)
}
