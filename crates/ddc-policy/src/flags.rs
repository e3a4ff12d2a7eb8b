//! The cache policy bitmask.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PolicyError;
use crate::text;

/// Flags controlling how a request interacts with a cache store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CachePolicy(u32);

impl CachePolicy {
    /// Neither query nor store.
    pub const NONE: CachePolicy = CachePolicy(0);

    /// Allow a query for existing records and values from local stores.
    pub const QUERY_LOCAL: CachePolicy = CachePolicy(1 << 0);
    /// Allow a query for existing records and values from remote stores.
    pub const QUERY_REMOTE: CachePolicy = CachePolicy(1 << 1);
    /// Allow a put of records and values to local stores.
    pub const STORE_LOCAL: CachePolicy = CachePolicy(1 << 2);
    /// Allow a put of records and values to remote stores.
    pub const STORE_REMOTE: CachePolicy = CachePolicy(1 << 3);

    /// Skip fetching the metadata of a record.
    pub const SKIP_META: CachePolicy = CachePolicy(1 << 4);
    /// Skip fetching the bytes of values. Existence is still checked.
    pub const SKIP_DATA: CachePolicy = CachePolicy(1 << 5);
    /// Return whatever part of a record is available when some values are missing.
    pub const PARTIAL_RECORD: CachePolicy = CachePolicy(1 << 6);
    /// Keep records alive in stores that expire unused entries.
    pub const KEEP_ALIVE: CachePolicy = CachePolicy(1 << 7);

    pub const QUERY: CachePolicy = CachePolicy(Self::QUERY_LOCAL.0 | Self::QUERY_REMOTE.0);
    pub const STORE: CachePolicy = CachePolicy(Self::STORE_LOCAL.0 | Self::STORE_REMOTE.0);
    pub const LOCAL: CachePolicy = CachePolicy(Self::QUERY_LOCAL.0 | Self::STORE_LOCAL.0);
    pub const REMOTE: CachePolicy = CachePolicy(Self::QUERY_REMOTE.0 | Self::STORE_REMOTE.0);
    pub const DEFAULT: CachePolicy = CachePolicy(Self::QUERY.0 | Self::STORE.0);

    /// Flags that are only meaningful on a whole record.
    pub const RECORD_ONLY: CachePolicy =
        CachePolicy(Self::SKIP_META.0 | Self::PARTIAL_RECORD.0 | Self::KEEP_ALIVE.0);

    /// Every flag a value policy may carry.
    pub const VALUE_MASK: CachePolicy = CachePolicy(Self::DEFAULT.0 | Self::SKIP_DATA.0);

    const ALL: u32 = 0xff;

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping bits that name no flag.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every flag in `other` is set.
    pub const fn contains(self, other: CachePolicy) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any flag in `other` is set.
    pub const fn intersects(self, other: CachePolicy) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: CachePolicy) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CachePolicy) {
        self.0 &= !other.0;
    }

    /// Number of flags set.
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Comma-delimited text form, e.g. `"Local,SkipData"`.
    pub fn to_text(self) -> String {
        text::to_text(self)
    }

    /// Parse the text form. Unknown tokens are ignored.
    pub fn parse_text(text: &str) -> Result<Self, PolicyError> {
        text::parse_text(text)
    }
}

impl BitOr for CachePolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CachePolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CachePolicy {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for CachePolicy {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for CachePolicy {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0 & Self::ALL)
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CachePolicy({})", self.to_text())
    }
}

impl FromStr for CachePolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_text(s)
    }
}

impl Serialize for CachePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_text())
    }
}

impl<'de> Deserialize<'de> for CachePolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse_text(&text).map_err(serde::de::Error::custom)
    }
}
