//! Typed decode of the model's JSON into a [`ScoringResult`].
//!
//! Missing categories (or a category without a score) are scored 0 with a
//! warning. Everything else that is missing or malformed is collected into an
//! [`AnalysisDecodeError`] listing every problem at once.

use deckforge_common::scoring::{Category, CategoryAssessment, Recommendation, ScoringResult};
use serde_json::{Map, Value};
use std::fmt;

/// One problem found while decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    Missing { field: String },
    Invalid { field: String, reason: String },
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldIssue::Missing { field } => write!(f, "{} is missing", field),
            FieldIssue::Invalid { field, reason } => write!(f, "{} is invalid ({})", field, reason),
        }
    }
}

/// Every fatal problem in a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisDecodeError {
    pub issues: Vec<FieldIssue>,
}

impl AnalysisDecodeError {
    pub fn is_missing(&self, field: &str) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, FieldIssue::Missing { field: f } if f == field))
    }
}

impl fmt::Display for AnalysisDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issues: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        f.write_str(&issues.join("; "))
    }
}

impl std::error::Error for AnalysisDecodeError {}

/// A decoded result plus the non-fatal problems found on the way
#[derive(Debug, Clone)]
pub struct DecodedAnalysis {
    pub result: ScoringResult,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Decoder {
    issues: Vec<FieldIssue>,
    warnings: Vec<String>,
}

impl Decoder {
    fn missing(&mut self, field: impl Into<String>) {
        self.issues.push(FieldIssue::Missing { field: field.into() });
    }

    fn invalid(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.issues.push(FieldIssue::Invalid {
            field: field.into(),
            reason: reason.into(),
        });
    }

    /// Present and non-null member
    fn required<'a>(&mut self, obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
        match obj.get(field) {
            Some(Value::Null) | None => {
                self.missing(field);
                None
            }
            Some(value) => Some(value),
        }
    }

    /// Number in `[min, max]`, rounded to an integer
    fn bounded_int(&mut self, field: &str, value: &Value, min: f64, max: f64) -> Option<u8> {
        let Some(n) = value.as_f64().filter(|n| n.is_finite()) else {
            self.invalid(field, format!("expected a number, got {}", kind(value)));
            return None;
        };
        if !(min..=max).contains(&n) {
            self.invalid(field, format!("{} is outside {}-{}", n, min, max));
            return None;
        }
        if n.fract() != 0.0 {
            self.warnings.push(format!("{} was {}; rounded to {}", field, n, n.round()));
        }
        Some(n.round() as u8)
    }

    fn string_list(&mut self, obj: &Map<String, Value>, field: &str) -> Vec<String> {
        let Some(value) = self.required(obj, field) else {
            return Vec::new();
        };
        let Some(items) = value.as_array() else {
            self.invalid(field, format!("expected a list, got {}", kind(value)));
            return Vec::new();
        };

        let mut list = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item.as_str() {
                Some(s) if !s.trim().is_empty() => list.push(s.trim().to_string()),
                Some(_) => {}
                None => self.invalid(format!("{}[{}]", field, i), "expected a string"),
            }
        }

        if !(3..=5).contains(&list.len()) {
            self.warnings
                .push(format!("{} has {} entries; expected 3 to 5", field, list.len()));
        }
        list
    }

    fn category(&mut self, categories: Option<&Map<String, Value>>, category: Category) -> CategoryAssessment {
        let key = category.key();
        let unassessed = |feedback: String| CategoryAssessment {
            category,
            score: 0,
            feedback,
            assessed: false,
        };

        let entry = match categories.and_then(|c| c.get(key)) {
            None | Some(Value::Null) => {
                self.warnings.push(format!("category {} missing; scored 0", key));
                return unassessed(String::new());
            }
            Some(Value::Object(entry)) => entry,
            Some(other) => {
                self.invalid(format!("categories.{}", key), format!("expected an object, got {}", kind(other)));
                return unassessed(String::new());
            }
        };

        let feedback = match entry.get("feedback") {
            Some(Value::String(s)) => s.trim().to_string(),
            None | Some(Value::Null) => {
                self.warnings.push(format!("category {} has no feedback", key));
                String::new()
            }
            Some(other) => {
                self.invalid(format!("categories.{}.feedback", key), format!("expected a string, got {}", kind(other)));
                String::new()
            }
        };

        match entry.get("score") {
            None | Some(Value::Null) => {
                self.warnings.push(format!("category {} has no score; scored 0", key));
                unassessed(feedback)
            }
            Some(value) => {
                let field = format!("categories.{}.score", key);
                match self.bounded_int(&field, value, 0.0, 10.0) {
                    Some(score) => CategoryAssessment {
                        category,
                        score,
                        feedback,
                        assessed: true,
                    },
                    None => unassessed(feedback),
                }
            }
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Decode a parsed response into a validated result with a recomputed overall score
pub fn decode(value: &Value) -> Result<DecodedAnalysis, AnalysisDecodeError> {
    let mut d = Decoder::default();

    let Some(root) = value.as_object() else {
        d.invalid("response", format!("expected an object, got {}", kind(value)));
        return Err(AnalysisDecodeError { issues: d.issues });
    };

    let categories = match root.get("categories") {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
            d.invalid("categories", format!("expected an object, got {}", kind(other)));
            None
        }
    };
    let assessments: Vec<CategoryAssessment> =
        Category::ALL.iter().map(|c| d.category(categories, *c)).collect();

    let strengths = d.string_list(root, "strengths");
    let weaknesses = d.string_list(root, "weaknesses");

    let recommendation = d.required(root, "recommendation").and_then(|v| match v.as_str() {
        Some(s) => Recommendation::parse(s).or_else(|| {
            d.invalid("recommendation", format!("'{}' is not Strong Buy, Hold or Pass", s));
            None
        }),
        None => {
            d.invalid("recommendation", format!("expected a string, got {}", kind(v)));
            None
        }
    });

    let confidence = d
        .required(root, "confidence")
        .and_then(|v| d.bounded_int("confidence", v, 0.0, 100.0));

    let due_diligence = d.required(root, "dueDiligence").and_then(|v| match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) if items.iter().all(Value::is_string) => {
            d.warnings.push("dueDiligence was a list; joined into text".to_string());
            Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }
        other => {
            d.invalid("dueDiligence", format!("expected a string, got {}", kind(other)));
            None
        }
    });

    let processed_at = d.required(root, "processedAt").and_then(|v| match v.as_str() {
        Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => {
            d.invalid("processedAt", "expected a non-empty timestamp string");
            None
        }
    });

    let (Some(recommendation), Some(confidence), Some(due_diligence), Some(processed_at), true) = (
        recommendation,
        confidence,
        due_diligence,
        processed_at,
        d.issues.is_empty(),
    ) else {
        return Err(AnalysisDecodeError { issues: d.issues });
    };

    let mut result = ScoringResult {
        categories: assessments,
        strengths,
        weaknesses,
        recommendation,
        confidence,
        due_diligence,
        processed_at,
        overall_score: 0,
    };
    result.recompute_overall();

    if let Some(claimed) = root.get("overallScore").and_then(Value::as_f64) {
        if claimed.round() as i64 != i64::from(result.overall_score) {
            d.warnings.push(format!(
                "model claimed overall score {}; recomputed {}",
                claimed, result.overall_score
            ));
        }
    }

    Ok(DecodedAnalysis {
        result,
        warnings: d.warnings,
    })
}
