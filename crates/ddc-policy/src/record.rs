//! Per-record policies with per-value overrides.

use ddc_record::ValueId;

use crate::error::{PolicyError, PolicyResult};
use crate::CachePolicy;

/// Policy override for one value of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePolicy {
    pub id: ValueId,
    pub policy: CachePolicy,
}

/// A default policy plus overrides for individual values, sorted by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPolicy {
    /// Default OR'd with every override, minus `SkipData` from overrides.
    record_policy: CachePolicy,
    default_policy: CachePolicy,
    values: Vec<ValuePolicy>,
}

impl RecordPolicy {
    /// A policy with no per-value overrides.
    pub fn uniform(policy: CachePolicy) -> Self {
        Self {
            record_policy: policy,
            default_policy: policy,
            values: Vec::new(),
        }
    }

    /// Policy for permission checks on the record as a whole.
    ///
    /// Never grants less than any value policy grants.
    pub fn record_policy(&self) -> CachePolicy {
        self.record_policy
    }

    /// The default that applies to values without an override.
    pub fn default_policy(&self) -> CachePolicy {
        self.default_policy
    }

    /// Policy for one value: its override if present, else the default
    /// restricted to flags a value may carry.
    pub fn value_policy(&self, id: ValueId) -> CachePolicy {
        match self.values.binary_search_by(|entry| entry.id.cmp(&id)) {
            Ok(index) => self.values[index].policy,
            Err(_) => self.default_policy & CachePolicy::VALUE_MASK,
        }
    }

    pub fn value_policies(&self) -> &[ValuePolicy] {
        &self.values
    }

    /// True when every value follows the default.
    pub fn is_uniform(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for RecordPolicy {
    fn default() -> Self {
        Self::uniform(CachePolicy::DEFAULT)
    }
}

impl From<CachePolicy> for RecordPolicy {
    fn from(policy: CachePolicy) -> Self {
        Self::uniform(policy)
    }
}

/// Builder for [`RecordPolicy`].
#[derive(Debug, Clone)]
pub struct RecordPolicyBuilder {
    default_policy: CachePolicy,
    values: Vec<ValuePolicy>,
}

impl RecordPolicyBuilder {
    pub fn new(default_policy: CachePolicy) -> Self {
        Self {
            default_policy,
            values: Vec::new(),
        }
    }

    /// Override the policy of one value.
    ///
    /// Value policies may not carry record-only flags. An override equal to
    /// what the default already implies is not stored. A later override for
    /// the same id replaces the earlier one.
    pub fn add_value_policy(&mut self, id: ValueId, policy: CachePolicy) -> PolicyResult<&mut Self> {
        let record_only = policy & CachePolicy::RECORD_ONLY;
        if !record_only.is_empty() {
            return Err(PolicyError::RecordOnlyFlags {
                id,
                flags: record_only,
            });
        }

        self.values.retain(|entry| entry.id != id);
        if policy != self.default_policy & CachePolicy::VALUE_MASK {
            self.values.push(ValuePolicy { id, policy });
        }
        Ok(self)
    }

    pub fn build(mut self) -> RecordPolicy {
        self.values.sort_by_key(|entry| entry.id);
        let record_policy = self
            .values
            .iter()
            .fold(self.default_policy, |acc, entry| {
                acc | (entry.policy & !CachePolicy::SKIP_DATA)
            });
        RecordPolicy {
            record_policy,
            default_policy: self.default_policy,
            values: self.values,
        }
    }
}
