//! Rollback policies.
//!
//! A policy decides, for an error returned by a transactional invocation,
//! whether the transaction is rolled back or committed. The error is
//! returned to the caller either way.

use std::fmt;
use std::sync::Arc;

/// A category of business error. Kinds form a forest: a policy naming a kind
/// also matches every kind below it.
pub trait ErrorKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn parent(self) -> Option<Self> {
        None
    }
}

/// Business errors that can be classified for [`RollbackPolicy::on`].
pub trait Classify {
    type Kind: ErrorKind;

    fn kind(&self) -> Self::Kind;
}

enum Rule<E> {
    Always,
    Never,
    When(Arc<dyn Fn(&E) -> bool + Send + Sync>),
}

/// Which errors of type `E` roll back. Defaults to all of them.
pub struct RollbackPolicy<E> {
    rule: Rule<E>,
    label: &'static str,
}

impl<E> RollbackPolicy<E> {
    /// Roll back on every error.
    pub fn always() -> Self {
        Self {
            rule: Rule::Always,
            label: "always",
        }
    }

    /// Commit whatever the error.
    pub fn never() -> Self {
        Self {
            rule: Rule::Never,
            label: "never",
        }
    }

    /// Roll back when `predicate` holds.
    pub fn when(predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            rule: Rule::When(Arc::new(predicate)),
            label: "when",
        }
    }

    pub fn should_rollback(&self, error: &E) -> bool {
        match &self.rule {
            Rule::Always => true,
            Rule::Never => false,
            Rule::When(predicate) => predicate(error),
        }
    }
}

impl<E: Classify> RollbackPolicy<E> {
    /// Roll back when the error's kind, or any of its ancestors, is listed.
    pub fn on(kinds: impl IntoIterator<Item = E::Kind>) -> Self {
        let kinds: Vec<E::Kind> = kinds.into_iter().collect();
        Self {
            rule: Rule::When(Arc::new(move |error: &E| matches_kind(&kinds, error.kind()))),
            label: "on",
        }
    }
}

/// Walk from `kind` up through its ancestors. A kind seen twice means the
/// parent chain loops; the walk stops there.
fn matches_kind<K: ErrorKind>(kinds: &[K], kind: K) -> bool {
    let mut seen = Vec::new();
    let mut current = Some(kind);
    while let Some(k) = current {
        if kinds.contains(&k) {
            return true;
        }
        if seen.contains(&k) {
            return false;
        }
        seen.push(k);
        current = k.parent();
    }
    false
}

impl<E> Default for RollbackPolicy<E> {
    fn default() -> Self {
        Self::always()
    }
}

impl<E> Clone for RollbackPolicy<E> {
    fn clone(&self) -> Self {
        let rule = match &self.rule {
            Rule::Always => Rule::Always,
            Rule::Never => Rule::Never,
            Rule::When(predicate) => Rule::When(predicate.clone()),
        };
        Self {
            rule,
            label: self.label,
        }
    }
}

impl<E> fmt::Debug for RollbackPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RollbackPolicy").field(&self.label).finish()
    }
}
