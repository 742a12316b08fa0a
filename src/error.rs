//! Error type shared by the registry, the assembler and the access facade.

use crate::member::Kind;

/// Everything that can go wrong while defining, assembling or reading a store.
///
/// Fetch failures of async resources are not listed here: they are state,
/// captured as [`FetchError`](crate::FetchError) on the resource itself.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no registry is installed; call `Registry::install` or run inside `Registry::scope`")]
    NotInstalled,

    #[error("a store named `{0}` already exists")]
    DuplicateStore(String),

    #[error("store `{store}` has no member `{member}`")]
    MissingMember { store: String, member: String },

    #[error("`{0}` is not a valid member name")]
    InvalidMemberName(String),

    #[error("member `{0}` is defined more than once")]
    DuplicateMember(String),

    #[error("member `{member}` of store `{store}` is {found}, not {expected}")]
    KindMismatch {
        store: String,
        member: String,
        expected: Kind,
        found: Kind,
    },

    #[error("member `{member}` of store `{store}` does not hold a `{expected}`")]
    TypeMismatch {
        store: String,
        member: String,
        expected: &'static str,
    },

    #[error("action has the signature `fn({args}) -> {output}` and was called with other types")]
    ActionSignature {
        args: &'static str,
        output: &'static str,
    },

    #[error("action failed: {0:#}")]
    ActionFailed(anyhow::Error),

    #[error("watch source #{index} is {kind}; only state, derived and getter sources can be watched")]
    InvalidWatchSource { index: usize, kind: Kind },

    #[error("store `{store}` has no state key `{key}`")]
    UnknownStateKey { store: String, key: String },

    #[error("`{var}` has the unsupported value `{value}`")]
    InvalidConfig { var: &'static str, value: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Definition(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_member_names_store_and_member() {
        let err = StoreError::MissingMember {
            store: "main".to_string(),
            member: "count".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("main"));
        assert!(message.contains("count"));
    }
}
