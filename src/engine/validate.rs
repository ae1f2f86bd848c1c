//! Parameter validation
//!
//! Out-of-range values are client errors and are never clamped. The one
//! exception is `max_new_tokens`, which is reduced to the server cap after
//! it has passed the user-facing bound check.

use crate::config::GenerationLimits;
use crate::error::{EngineError, Result};

use super::request::{GenerationRequest, RawGenerationRequest, SamplingParams};

/// Turns raw client input into an engine-ready [`GenerationRequest`]
#[derive(Debug, Clone)]
pub struct Validator {
    limits: GenerationLimits,
}

impl Validator {
    pub fn new(limits: GenerationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &GenerationLimits {
        &self.limits
    }

    pub fn validate(&self, raw: RawGenerationRequest) -> Result<GenerationRequest> {
        let limits = &self.limits;

        let prompt = raw
            .prompt
            .ok_or_else(|| EngineError::invalid("prompt", "field required"))?;
        if prompt.is_empty() {
            return Err(EngineError::invalid("prompt", "must not be empty"));
        }

        let requested = match raw.max_new_tokens {
            None => limits.default_max_new_tokens,
            Some(n) if n >= 1 && n as u64 <= limits.max_new_tokens_bound as u64 => n as usize,
            Some(_) => {
                return Err(EngineError::invalid(
                    "max_new_tokens",
                    format!("must be within [1, {}]", limits.max_new_tokens_bound),
                ))
            }
        };

        let temperature = check_range(
            "temperature",
            raw.temperature.unwrap_or(limits.default_temperature),
            limits.temperature_min,
            limits.temperature_max,
        )?;
        let top_p = check_range(
            "top_p",
            raw.top_p.unwrap_or(limits.default_top_p),
            limits.top_p_min,
            limits.top_p_max,
        )?;
        let do_sample = raw.do_sample.unwrap_or(limits.default_do_sample);

        let max_new_tokens = limits.effective_max_new_tokens(requested);
        if max_new_tokens < requested {
            tracing::debug!(
                "max_new_tokens {} reduced to server cap {}",
                requested,
                max_new_tokens
            );
        }

        Ok(GenerationRequest::new(
            prompt,
            requested,
            max_new_tokens,
            SamplingParams {
                temperature,
                top_p,
                do_sample,
                repetition_penalty: limits.repetition_penalty,
            },
        ))
    }
}

fn check_range(field: &str, value: f32, min: f32, max: f32) -> Result<f32> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(EngineError::invalid(
            field,
            format!("must be within [{}, {}]", min, max),
        ))
    }
}
