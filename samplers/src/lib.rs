//! Prompt generation for dispatched requests
//!
//! [`PolicySampler`] turns a [`PromptPolicy`] into a [`PromptSource`]. The
//! random generator is injectable so tests can seed it.

#![warn(missing_docs)]
#![warn(clippy::all)]

use genai_stress_core::{PromptPolicy, PromptSource, DEFAULT_PROMPT};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Templates used when a random policy has no candidates
pub const TEMPLATES: [&str; 3] = [
    "Please introduce {topic} in about {length} words.",
    "Could you explain the key ideas behind {topic} in detail?",
    "I would like to learn about {topic}. Please describe it in detail.",
];

/// Topics substituted into [`TEMPLATES`]
pub const TOPICS: [&str; 5] = [
    "AI",
    "machine learning",
    "deep learning",
    "natural language processing",
    "computer vision",
];

/// Word counts substituted into [`TEMPLATES`]
pub const LENGTHS: [u32; 3] = [50, 100, 200];

const VARIATIONS: usize = 6;

/// [`PromptSource`] for a [`PromptPolicy`]
pub struct PolicySampler {
    policy: PromptPolicy,
    rng: Mutex<StdRng>,
}

impl PolicySampler {
    /// Sampler seeded from OS entropy
    pub fn from_entropy(policy: PromptPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Sampler with a deterministic seed
    pub fn from_seed(policy: PromptPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    /// Sampler driven by the given generator
    pub fn with_rng(policy: PromptPolicy, rng: StdRng) -> Self {
        Self {
            policy,
            rng: Mutex::new(rng),
        }
    }

    /// Policy this sampler follows
    pub fn policy(&self) -> &PromptPolicy {
        &self.policy
    }

    /// Produce the next prompt
    pub fn sample(&self) -> String {
        match &self.policy {
            PromptPolicy::Fixed { text } if text.trim().is_empty() => DEFAULT_PROMPT.to_string(),
            PromptPolicy::Fixed { text } => text.clone(),
            PromptPolicy::Random { candidates } => {
                let mut rng = self.rng.lock();
                match candidates.choose(&mut *rng) {
                    Some(base) => vary(base, &mut *rng),
                    None => from_template(&mut *rng),
                }
            }
        }
    }
}

impl PromptSource for PolicySampler {
    fn next_prompt(&self) -> String {
        self.sample()
    }
}

impl std::fmt::Debug for PolicySampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySampler")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Apply one of the six variations to `base`, uniformly.
pub fn vary<R: Rng + ?Sized>(base: &str, rng: &mut R) -> String {
    match rng.gen_range(0..VARIATIONS) {
        0 => base.to_string(),
        1 => format!("{base} Please explain in detail."),
        2 => format!("{base} Could you elaborate?"),
        3 => format!("Question: {base}"),
        4 => format!("{base} Thanks!"),
        _ => format!("{base} ({})", chrono::Utc::now().timestamp_millis()),
    }
}

/// Fill a random template with a random topic and length.
pub fn from_template<R: Rng + ?Sized>(rng: &mut R) -> String {
    let template = TEMPLATES[rng.gen_range(0..TEMPLATES.len())];
    let topic = TOPICS[rng.gen_range(0..TOPICS.len())];
    let length = LENGTHS[rng.gen_range(0..LENGTHS.len())];
    template
        .replace("{topic}", topic)
        .replace("{length}", &length.to_string())
}
