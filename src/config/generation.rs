//! Generation bounds and defaults

use serde::{Deserialize, Serialize};

/// User-facing bounds, defaults, and server-side caps for generation.
///
/// `max_new_tokens_bound` is what clients may ask for; `max_new_tokens_cap`
/// is what the server will actually run. Requests between the two are
/// accepted and reduced, and the reduction is reported in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationLimits {
    /// Largest `max_new_tokens` a client may request
    #[serde(default = "default_max_new_tokens_bound")]
    pub max_new_tokens_bound: usize,

    /// Hard server-side ceiling on tokens generated per request
    #[serde(default = "default_max_new_tokens_cap")]
    pub max_new_tokens_cap: usize,

    /// `max_new_tokens` when the client omits it
    #[serde(default = "default_max_new_tokens")]
    pub default_max_new_tokens: usize,

    #[serde(default = "default_temperature_min")]
    pub temperature_min: f32,

    #[serde(default = "default_temperature_max")]
    pub temperature_max: f32,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_top_p_min")]
    pub top_p_min: f32,

    #[serde(default = "default_top_p_max")]
    pub top_p_max: f32,

    #[serde(default = "default_top_p")]
    pub default_top_p: f32,

    #[serde(default = "default_true")]
    pub default_do_sample: bool,

    /// Repetition penalty applied to every request (1.0 = no penalty)
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    /// Prompt tokens kept before generation; the rest are dropped
    #[serde(default = "default_max_prompt_tokens")]
    pub max_prompt_tokens: usize,
}

fn default_max_new_tokens_bound() -> usize {
    512
}

fn default_max_new_tokens_cap() -> usize {
    100
}

fn default_max_new_tokens() -> usize {
    50
}

fn default_temperature_min() -> f32 {
    0.1
}

fn default_temperature_max() -> f32 {
    2.0
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p_min() -> f32 {
    0.1
}

fn default_top_p_max() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    0.9
}

fn default_true() -> bool {
    true
}

fn default_repetition_penalty() -> f32 {
    1.1
}

fn default_max_prompt_tokens() -> usize {
    512
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_new_tokens_bound: default_max_new_tokens_bound(),
            max_new_tokens_cap: default_max_new_tokens_cap(),
            default_max_new_tokens: default_max_new_tokens(),
            temperature_min: default_temperature_min(),
            temperature_max: default_temperature_max(),
            default_temperature: default_temperature(),
            top_p_min: default_top_p_min(),
            top_p_max: default_top_p_max(),
            default_top_p: default_top_p(),
            default_do_sample: true,
            repetition_penalty: default_repetition_penalty(),
            max_prompt_tokens: default_max_prompt_tokens(),
        }
    }
}

impl GenerationLimits {
    /// Tokens the engine will actually be asked for.
    pub fn effective_max_new_tokens(&self, requested: usize) -> usize {
        requested.min(self.max_new_tokens_cap)
    }

    /// Limits without a server cap below the user bound.
    pub fn uncapped() -> Self {
        let defaults = Self::default();
        Self {
            max_new_tokens_cap: defaults.max_new_tokens_bound,
            ..defaults
        }
    }
}
