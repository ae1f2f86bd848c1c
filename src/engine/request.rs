//! Generation request and result types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// `/generate` body as sent by the client, before validation.
///
/// Every field is optional so that a missing or out-of-range value is
/// reported by the validator with the field named, rather than as an
/// opaque deserialization failure. Use [`RawGenerationRequest::from_json`]
/// to get the same for wrongly typed values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawGenerationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub max_new_tokens: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub do_sample: Option<bool>,
}

impl RawGenerationRequest {
    /// Decode a parsed JSON body one field at a time, so a wrongly typed
    /// value is reported against its own field. Unknown keys are ignored
    /// and `null` counts as absent.
    pub fn from_json(body: Value) -> Result<Self> {
        let Value::Object(mut fields) = body else {
            return Err(EngineError::invalid("body", "expected a JSON object"));
        };

        Ok(Self {
            prompt: take_field(&mut fields, "prompt")?,
            max_new_tokens: take_field(&mut fields, "max_new_tokens")?,
            temperature: take_field(&mut fields, "temperature")?,
            top_p: take_field(&mut fields, "top_p")?,
            do_sample: take_field(&mut fields, "do_sample")?,
        })
    }
}

fn take_field<T: DeserializeOwned>(
    fields: &mut Map<String, Value>,
    name: &str,
) -> Result<Option<T>> {
    match fields.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| EngineError::invalid(name, e.to_string())),
    }
}

/// Sampling parameters handed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    /// Softmax temperature (ignored when `do_sample` is false)
    pub temperature: f32,
    /// Nucleus threshold (ignored when `do_sample` is false)
    pub top_p: f32,
    /// Sample from the distribution; greedy argmax otherwise
    pub do_sample: bool,
    /// Penalty on tokens already present in the context (1.0 = off)
    pub repetition_penalty: f32,
}

impl SamplingParams {
    pub fn greedy() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            do_sample: false,
            repetition_penalty: 1.0,
        }
    }
}

/// A validated, engine-ready request. Only the validator builds these.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    id: Uuid,
    prompt: String,
    requested_max_new_tokens: usize,
    max_new_tokens: usize,
    sampling: SamplingParams,
}

impl GenerationRequest {
    pub(crate) fn new(
        prompt: String,
        requested_max_new_tokens: usize,
        max_new_tokens: usize,
        sampling: SamplingParams,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt,
            requested_max_new_tokens,
            max_new_tokens,
            sampling,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// What the client asked for
    pub fn requested_max_new_tokens(&self) -> usize {
        self.requested_max_new_tokens
    }

    /// What the engine will be asked for, after the server cap
    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    /// Whether the server cap reduced the client's request
    pub fn is_capped(&self) -> bool {
        self.max_new_tokens < self.requested_max_new_tokens
    }

    pub fn length_cap(&self) -> LengthCap {
        LengthCap {
            requested: self.requested_max_new_tokens,
            applied: self.max_new_tokens,
            capped: self.is_capped(),
        }
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }
}

/// Requested vs. applied output length, reported back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LengthCap {
    #[serde(rename = "max_new_tokens_requested")]
    pub requested: usize,
    #[serde(rename = "max_new_tokens_applied")]
    pub applied: usize,
    #[serde(rename = "max_new_tokens_capped")]
    pub capped: bool,
}

/// Output of one successful engine call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationResult {
    pub generated_text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub total_tokens: usize,
    /// Prompt was cut to the configured token limit before generation
    pub prompt_truncated: bool,
}

impl GenerationResult {
    pub fn new(
        generated_text: String,
        prompt_tokens: usize,
        generated_tokens: usize,
        prompt_truncated: bool,
    ) -> Self {
        Self {
            generated_text,
            prompt_tokens,
            generated_tokens,
            total_tokens: prompt_tokens + generated_tokens,
            prompt_truncated,
        }
    }
}
