//! Next-token selection over a logits vector

use rand::Rng;

use super::request::SamplingParams;

/// Pick the next token from the last position's logits.
///
/// `context` is every token seen so far (prompt and generated) and feeds
/// the repetition penalty.
pub fn sample_next<G: Rng>(
    logits: &mut [f32],
    context: &[u32],
    params: &SamplingParams,
    rng: &mut G,
) -> u32 {
    if params.repetition_penalty != 1.0 {
        apply_repetition_penalty(logits, context, params.repetition_penalty);
    }

    if !params.do_sample {
        return argmax(logits);
    }

    let probs = softmax(logits, params.temperature);
    if params.top_p < 1.0 {
        top_p_sample(&probs, params.top_p, rng)
    } else {
        multinomial_sample(&probs, rng)
    }
}

/// Divide positive logits and multiply negative ones for every token
/// already present, so repeats become less likely either way.
fn apply_repetition_penalty(logits: &mut [f32], context: &[u32], penalty: f32) {
    let mut seen = vec![false; logits.len()];
    for &token in context {
        let idx = token as usize;
        if idx >= logits.len() || seen[idx] {
            continue;
        }
        seen[idx] = true;
        let logit = &mut logits[idx];
        *logit = if *logit > 0.0 {
            *logit / penalty
        } else {
            *logit * penalty
        };
    }
}

fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let inv_t = 1.0 / temperature;
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = logits.iter().map(|&l| ((l - max) * inv_t).exp()).collect();
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        probs.iter_mut().for_each(|p| *p /= sum);
    }
    probs
}

fn multinomial_sample<G: Rng>(probs: &[f32], rng: &mut G) -> u32 {
    let sample: f32 = rng.gen();

    let mut cumsum = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumsum += p;
        if cumsum > sample {
            return i as u32;
        }
    }

    probs.len().saturating_sub(1) as u32
}

/// Top-p (nucleus) sampling
fn top_p_sample<G: Rng>(probs: &[f32], p: f32, rng: &mut G) -> u32 {
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    // Smallest prefix whose mass exceeds p
    let mut cumsum = 0.0;
    let mut nucleus = Vec::new();
    for (i, prob) in indexed {
        cumsum += prob;
        nucleus.push((i, prob));
        if cumsum > p {
            break;
        }
    }

    let sum: f32 = nucleus.iter().map(|(_, prob)| prob).sum();
    let sample: f32 = rng.gen();

    let mut cumsum = 0.0;
    for (i, prob) in &nucleus {
        cumsum += prob / sum;
        if cumsum > sample {
            return *i as u32;
        }
    }

    nucleus.last().map(|(i, _)| *i as u32).unwrap_or(0)
}
