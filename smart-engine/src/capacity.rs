//! Queue capacity calculation
//!
//! A queue must hold a full batch for every annotator after round-robin
//! distribution, plus enough overlap that other annotators can take a second
//! look at the same items for inter-annotator agreement.

use serde::{Deserialize, Serialize};

/// How many redundant per-annotator slots a queue carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RedundancyPolicy {
    /// One redundant slot for every other annotator (`annotator_count - 1`)
    #[default]
    OtherAnnotators,
    /// A fixed number of redundant slots regardless of team size
    Fixed(u32),
}

impl RedundancyPolicy {
    /// Build from the `redundancy_factor` config value
    pub fn from_factor(factor: Option<u32>) -> Self {
        match factor {
            Some(k) => RedundancyPolicy::Fixed(k),
            None => RedundancyPolicy::OtherAnnotators,
        }
    }

    fn multiplier(&self, annotator_count: u32) -> u32 {
        match self {
            RedundancyPolicy::OtherAnnotators => annotator_count - 1,
            RedundancyPolicy::Fixed(k) => *k,
        }
    }
}

/// Target queue length for `batch_size` items shared by `annotator_count`
/// annotators
///
/// `per_annotator = ceil(batch_size / annotator_count)` and the result is
/// `per_annotator * annotator_count + per_annotator * (annotator_count - 1)`.
/// The creator always counts, so an annotator count of 0 is treated as 1.
///
/// ```
/// use smart_engine::capacity::compute_queue_length;
///
/// assert_eq!(compute_queue_length(20, 3), 35);
/// assert_eq!(compute_queue_length(0, 1), 0);
/// ```
pub fn compute_queue_length(batch_size: u32, annotator_count: u32) -> u32 {
    compute_queue_length_with(batch_size, annotator_count, RedundancyPolicy::OtherAnnotators)
}

/// [`compute_queue_length`] with an explicit redundancy policy
pub fn compute_queue_length_with(
    batch_size: u32,
    annotator_count: u32,
    policy: RedundancyPolicy,
) -> u32 {
    let annotators = annotator_count.max(1);
    let per_annotator = batch_size.div_ceil(annotators);

    per_annotator
        .saturating_mul(annotators)
        .saturating_add(per_annotator.saturating_mul(policy.multiplier(annotators)))
}

/// Project batch size derived from its label count
pub fn batch_size_for_labels(label_count: usize, items_per_label: u32) -> u32 {
    u32::try_from(label_count)
        .unwrap_or(u32::MAX)
        .saturating_mul(items_per_label)
}
