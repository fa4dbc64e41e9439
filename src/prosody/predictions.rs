//! Emotion extraction from the predictions payload.
//!
//! The payload nests the scores several levels deep:
//!
//! ```text
//! [ { results: { predictions: [ { models: { prosody: {
//!       grouped_predictions: [ { predictions: [ { emotions: [ {name, score}, .. ] } ] } ]
//! } } } ] } } ]
//! ```
//!
//! Only the first entry at each level is read. A missing level means the
//! model found nothing to score and yields an empty list.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionScore {
    pub name: String,
    pub score: f64,
}

fn first<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key)?.as_array()?.first()
}

fn emotions_array(predictions: &Value) -> Option<&Vec<Value>> {
    let prediction = predictions.as_array()?.first()?;
    let result = first(prediction.get("results")?, "predictions")?;
    let prosody = result.get("models")?.get("prosody")?;
    let group = first(prosody, "grouped_predictions")?;
    let utterance = first(group, "predictions")?;
    utterance.get("emotions")?.as_array()
}

/// Emotion scores in source order.
pub fn extract_emotions(predictions: &Value) -> Vec<EmotionScore> {
    let Some(entries) = emotions_array(predictions) else {
        debug!("Predictions payload has no prosody emotions");
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name").and_then(Value::as_str);
            let score = entry.get("score").and_then(Value::as_f64);
            match (name, score) {
                (Some(name), Some(score)) => Some(EmotionScore {
                    name: name.to_string(),
                    score,
                }),
                _ => {
                    warn!(entry = %entry, "Skipping malformed emotion entry");
                    None
                }
            }
        })
        .collect()
}
