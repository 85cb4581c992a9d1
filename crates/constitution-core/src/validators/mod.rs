//! Validator catalog.
//!
//! One module per constitution category; each validator declares the rule
//! ids it implements and the source kinds it applies to, and is otherwise a
//! pure function of the [`FileContext`].

pub mod change;
pub mod credentials;
pub mod docs;
pub mod handlers;
pub mod invariants;
pub mod lifecycle;
pub mod observability;
pub mod schema;
pub mod strings;
pub mod structure;
pub mod testing;

use crate::finding::Finding;
use crate::source::{FileContext, SourceKind};

/// Extract the short (unqualified) type name from `std::any::type_name`.
fn short_type_name<T: ?Sized + 'static>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A per-rule analysis capability.
///
/// Implementations are pure with respect to the provided context: they may
/// not perform I/O, mutate shared state, or retain references after
/// returning. They return findings and never panic by contract; the
/// dispatcher still contains any panic that slips through.
pub trait RuleValidator: Send + Sync + 'static {
    /// The rule ids this validator can emit.
    fn rule_ids(&self) -> &'static [&'static str];

    /// Which source kinds this validator applies to.
    ///
    /// The default applies to every analyzable kind.
    fn applies_to(&self, kind: SourceKind) -> bool {
        kind.is_analyzable()
    }

    /// Analyze one file and return findings.
    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding>;

    /// Short human-readable name, derived from the struct name.
    fn name(&self) -> &'static str {
        short_type_name::<Self>()
    }
}
