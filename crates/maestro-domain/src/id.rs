//! Prefixed opaque identifiers.
//!
//! Every persisted entity carries an id of the form `<prefix>_<random>` where
//! the random part is at least six alphanumeric characters.  The prefix is
//! fixed per entity kind so an id is self-describing in logs and API payloads.

use rand::rngs::OsRng;
use rand::Rng;

/// Entity kinds with a stable id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    User,
    Agent,
    Chat,
    Message,
    Server,
    Tool,
    Resource,
    Upload,
    Validation,
    Automation,
    WorkflowStep,
    Trigger,
    Execution,
    ExecutionStepLog,
    ApiKey,
    Model,
    Service,
    UserProvider,
    Log,
}

impl IdKind {
    pub fn prefix(self) -> &'static str {
        match self {
            IdKind::User => "usr",
            IdKind::Agent => "agt",
            IdKind::Chat => "cht",
            IdKind::Message => "msg",
            IdKind::Server => "srv",
            IdKind::Tool => "tol",
            IdKind::Resource => "res",
            IdKind::Upload => "upl",
            IdKind::Validation => "val",
            IdKind::Automation => "auto",
            IdKind::WorkflowStep => "step",
            IdKind::Trigger => "trg",
            IdKind::Execution => "exec",
            IdKind::ExecutionStepLog => "esl",
            IdKind::ApiKey => "key",
            IdKind::Model => "mdl",
            IdKind::Service => "svc",
            IdKind::UserProvider => "upr",
            IdKind::Log => "log",
        }
    }

    fn all() -> &'static [IdKind] {
        &[
            IdKind::User,
            IdKind::Agent,
            IdKind::Chat,
            IdKind::Message,
            IdKind::Server,
            IdKind::Tool,
            IdKind::Resource,
            IdKind::Upload,
            IdKind::Validation,
            IdKind::Automation,
            IdKind::WorkflowStep,
            IdKind::Trigger,
            IdKind::Execution,
            IdKind::ExecutionStepLog,
            IdKind::ApiKey,
            IdKind::Model,
            IdKind::Service,
            IdKind::UserProvider,
            IdKind::Log,
        ]
    }
}

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const RANDOM_LEN: usize = 10;

/// Generate a fresh id for `kind` using the OS entropy source.
pub fn generate(kind: IdKind) -> String {
    let mut rng = OsRng;
    let random: String = (0..RANDOM_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{}_{}", kind.prefix(), random)
}

/// Check that `id` is a well-formed identifier of `kind`.
pub fn is_valid(id: &str, kind: IdKind) -> bool {
    match id.split_once('_') {
        Some((prefix, rest)) => {
            prefix == kind.prefix()
                && rest.len() >= 6
                && rest.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Recover the entity kind from an id's prefix.
pub fn kind_of(id: &str) -> Option<IdKind> {
    let prefix = id.split_once('_')?.0;
    IdKind::all().iter().copied().find(|k| k.prefix() == prefix)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_has_prefix_and_validates() {
        let id = generate(IdKind::Chat);
        assert!(id.starts_with("cht_"));
        assert!(is_valid(&id, IdKind::Chat));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate(IdKind::Validation);
        let b = generate(IdKind::Validation);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let id = generate(IdKind::Agent);
        assert!(!is_valid(&id, IdKind::Chat));
    }

    #[test]
    fn short_random_part_is_rejected() {
        assert!(!is_valid("cht_abc", IdKind::Chat));
        assert!(is_valid("cht_abc123", IdKind::Chat));
    }

    #[test]
    fn non_alphanumeric_random_part_is_rejected() {
        assert!(!is_valid("cht_abc-123", IdKind::Chat));
    }

    #[test]
    fn kind_of_round_trips_every_kind() {
        for kind in IdKind::all() {
            let id = generate(*kind);
            assert_eq!(kind_of(&id), Some(*kind), "kind {kind:?}");
        }
    }

    #[test]
    fn kind_of_unknown_prefix_is_none() {
        assert_eq!(kind_of("zzz_abc123"), None);
        assert_eq!(kind_of("noprefix"), None);
    }

    #[test]
    fn all_prefixes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for kind in IdKind::all() {
            assert!(seen.insert(kind.prefix()), "duplicate prefix {}", kind.prefix());
        }
    }
}
