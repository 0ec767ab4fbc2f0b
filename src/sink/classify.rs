// * Overflow remapping for identifiers outside the allow-list
// * Keeps metric label cardinality bounded no matter what clients send

use crate::config::constants::{CORE_NAMESPACE_PREFIX, OVERFLOW_BUCKET, OVERFLOW_BUCKET_CORE};
use crate::sink::allow_list::AllowList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Every unrecognized key lands in `_other`.
    Single,
    /// Host-core looking keys land in `_other_discourse`, the rest in `_other`.
    #[default]
    SplitByNamespace,
}

impl OverflowPolicy {
    pub fn bucket_for(self, key: &str) -> &'static str {
        match self {
            OverflowPolicy::Single => OVERFLOW_BUCKET,
            OverflowPolicy::SplitByNamespace if key.starts_with(CORE_NAMESPACE_PREFIX) => {
                OVERFLOW_BUCKET_CORE
            }
            OverflowPolicy::SplitByNamespace => OVERFLOW_BUCKET,
        }
    }

    pub fn buckets(self) -> &'static [&'static str] {
        match self {
            OverflowPolicy::Single => &[OVERFLOW_BUCKET],
            OverflowPolicy::SplitByNamespace => &[OVERFLOW_BUCKET, OVERFLOW_BUCKET_CORE],
        }
    }
}

/// Maps a reported key to the metric label it is counted under.
pub fn classify_key<'a>(key: &'a str, allow_list: &AllowList, policy: OverflowPolicy) -> &'a str {
    if allow_list.contains(key) {
        key
    } else {
        policy.bucket_for(key)
    }
}
