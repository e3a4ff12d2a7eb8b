//! Text form of [`CachePolicy`].

use crate::error::PolicyError;
use crate::CachePolicy;

/// Named flags in encoding order.
///
/// Multi-bit aggregates come first, ordered by bit count, so encoding uses
/// as few tokens as possible. `None` is last because it matches everything.
const POLICY_NAMES: &[(CachePolicy, &str)] = &[
    (CachePolicy::DEFAULT, "Default"),
    (CachePolicy::REMOTE, "Remote"),
    (CachePolicy::LOCAL, "Local"),
    (CachePolicy::STORE, "Store"),
    (CachePolicy::QUERY, "Query"),
    (CachePolicy::QUERY_LOCAL, "QueryLocal"),
    (CachePolicy::QUERY_REMOTE, "QueryRemote"),
    (CachePolicy::STORE_LOCAL, "StoreLocal"),
    (CachePolicy::STORE_REMOTE, "StoreRemote"),
    (CachePolicy::SKIP_META, "SkipMeta"),
    (CachePolicy::SKIP_DATA, "SkipData"),
    (CachePolicy::PARTIAL_RECORD, "PartialRecord"),
    (CachePolicy::KEEP_ALIVE, "KeepAlive"),
    (CachePolicy::NONE, "None"),
];

const DELIMITER: char = ',';

pub(crate) fn to_text(policy: CachePolicy) -> String {
    let mut remaining = policy;
    let mut tokens: Vec<&str> = Vec::new();
    for &(flags, name) in POLICY_NAMES {
        if remaining.is_empty() {
            break;
        }
        if !flags.is_empty() && remaining.contains(flags) {
            tokens.push(name);
            remaining.remove(flags);
        }
    }
    if tokens.is_empty() {
        return "None".to_string();
    }
    tokens.join(",")
}

pub(crate) fn parse_text(text: &str) -> Result<CachePolicy, PolicyError> {
    if text.is_empty() {
        return Err(PolicyError::EmptyText);
    }
    let mut policy = CachePolicy::NONE;
    for token in text.split(DELIMITER) {
        // Tokens from newer writers are skipped.
        if let Some(&(flags, _)) = POLICY_NAMES.iter().find(|(_, name)| *name == token) {
            policy |= flags;
        }
    }
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_with_fewest_tokens() {
        assert_eq!(to_text(CachePolicy::DEFAULT), "Default");
        assert_eq!(to_text(CachePolicy::NONE), "None");
        assert_eq!(
            to_text(CachePolicy::LOCAL | CachePolicy::QUERY_REMOTE),
            "Local,QueryRemote"
        );
        assert_eq!(
            to_text(CachePolicy::DEFAULT | CachePolicy::SKIP_DATA | CachePolicy::KEEP_ALIVE),
            "Default,SkipData,KeepAlive"
        );
        assert_eq!(to_text(CachePolicy::QUERY | CachePolicy::SKIP_META), "Query,SkipMeta");
    }

    #[test]
    fn test_round_trip_every_combination() {
        for bits in 1..=0xffu32 {
            let policy = CachePolicy::from_bits_truncate(bits);
            assert_eq!(parse_text(&to_text(policy)), Ok(policy), "bits {bits:#x}");
        }
    }

    #[test]
    fn test_parse_ignores_unknown_tokens() {
        assert_eq!(
            parse_text("QueryLocal,FutureFlag,SkipData"),
            Ok(CachePolicy::QUERY_LOCAL | CachePolicy::SKIP_DATA)
        );
        assert_eq!(parse_text("Unknown"), Ok(CachePolicy::NONE));
        assert_eq!(parse_text("None"), Ok(CachePolicy::NONE));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(parse_text("querylocal"), Ok(CachePolicy::NONE));
    }

    #[test]
    fn test_parse_rejects_empty_text() {
        assert_eq!(parse_text(""), Err(PolicyError::EmptyText));
    }
}
