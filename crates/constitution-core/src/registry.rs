//! Validator registry: the index from rule ids to analysis capabilities.
//!
//! Validators are registered explicitly at startup via factory functions;
//! there is no runtime discovery. The registry owns one instance of each
//! validator and exposes lookups by rule id and by source kind.

use crate::source::SourceKind;
use crate::validators::RuleValidator;
use crate::validators::{
    change, credentials, docs, handlers, invariants, lifecycle, observability, schema, strings,
    structure, testing,
};
use std::collections::{HashMap, HashSet};

/// Factory function type that creates validator instances.
pub type ValidatorFactory = fn() -> Box<dyn RuleValidator>;

/// Registry of all validator capabilities, indexed by rule id.
pub struct RuleRegistry {
    validators: Vec<Box<dyn RuleValidator>>,
    by_rule: HashMap<&'static str, usize>,
}

impl RuleRegistry {
    /// Create an empty registry with no registered validators.
    pub fn new() -> Self {
        RuleRegistry {
            validators: Vec::new(),
            by_rule: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in validator catalog.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for factory in DEFAULTS {
            registry.register(*factory);
        }
        registry
    }

    /// Register a validator. Later registrations win rule-id lookups, so
    /// embedders can override a built-in validator.
    pub fn register(&mut self, factory: ValidatorFactory) {
        let validator = factory();
        let index = self.validators.len();
        for rule_id in validator.rule_ids() {
            self.by_rule.insert(rule_id, index);
        }
        self.validators.push(validator);
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// All rule ids any registered validator implements.
    pub fn implemented_rule_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.by_rule.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The validator implementing `rule_id`, if any.
    pub fn validator_for(&self, rule_id: &str) -> Option<&dyn RuleValidator> {
        self.by_rule
            .get(rule_id)
            .map(|&index| self.validators[index].as_ref())
    }

    /// Validators applicable to `kind` with at least one rule in the
    /// enabled set. Order is registration order, which keeps per-file
    /// execution deterministic.
    pub fn validators_for(
        &self,
        kind: SourceKind,
        enabled: &HashSet<String>,
    ) -> Vec<&dyn RuleValidator> {
        self.validators
            .iter()
            .filter(|v| v.applies_to(kind))
            .filter(|v| v.rule_ids().iter().any(|id| enabled.contains(*id)))
            .map(|v| v.as_ref())
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

const DEFAULTS: &[ValidatorFactory] = &[
    hardcoded_credentials,
    weak_hash,
    dynamic_eval,
    duplicate_literal,
    long_line,
    sql_concat,
    select_star,
    unchecked_error,
    empty_handler,
    deprecated_api,
    commented_code,
    module_header,
    public_doc,
    debug_print,
    debugger_artifact,
    assertionless_test,
    skipped_test,
    mutable_global,
    deep_nesting,
    conflict_marker,
    oversized_file,
    wildcard_import,
    long_function,
    parameter_count,
];

fn hardcoded_credentials() -> Box<dyn RuleValidator> {
    Box::new(credentials::HardcodedCredentialsValidator)
}

fn weak_hash() -> Box<dyn RuleValidator> {
    Box::new(credentials::WeakHashValidator)
}

fn dynamic_eval() -> Box<dyn RuleValidator> {
    Box::new(credentials::DynamicEvalValidator)
}

fn duplicate_literal() -> Box<dyn RuleValidator> {
    Box::new(strings::DuplicateLiteralValidator)
}

fn long_line() -> Box<dyn RuleValidator> {
    Box::new(strings::LongLineValidator)
}

fn sql_concat() -> Box<dyn RuleValidator> {
    Box::new(schema::SqlConcatValidator)
}

fn select_star() -> Box<dyn RuleValidator> {
    Box::new(schema::SelectStarValidator)
}

fn unchecked_error() -> Box<dyn RuleValidator> {
    Box::new(handlers::UncheckedErrorValidator)
}

fn empty_handler() -> Box<dyn RuleValidator> {
    Box::new(handlers::EmptyHandlerValidator)
}

fn deprecated_api() -> Box<dyn RuleValidator> {
    Box::new(lifecycle::DeprecatedApiValidator)
}

fn commented_code() -> Box<dyn RuleValidator> {
    Box::new(lifecycle::CommentedCodeValidator)
}

fn module_header() -> Box<dyn RuleValidator> {
    Box::new(docs::ModuleHeaderValidator)
}

fn public_doc() -> Box<dyn RuleValidator> {
    Box::new(docs::PublicDocValidator)
}

fn debug_print() -> Box<dyn RuleValidator> {
    Box::new(observability::DebugPrintValidator)
}

fn debugger_artifact() -> Box<dyn RuleValidator> {
    Box::new(observability::DebuggerArtifactValidator)
}

fn assertionless_test() -> Box<dyn RuleValidator> {
    Box::new(testing::AssertionlessTestValidator)
}

fn skipped_test() -> Box<dyn RuleValidator> {
    Box::new(testing::SkippedTestValidator)
}

fn mutable_global() -> Box<dyn RuleValidator> {
    Box::new(invariants::MutableGlobalValidator)
}

fn deep_nesting() -> Box<dyn RuleValidator> {
    Box::new(invariants::DeepNestingValidator)
}

fn conflict_marker() -> Box<dyn RuleValidator> {
    Box::new(change::ConflictMarkerValidator)
}

fn oversized_file() -> Box<dyn RuleValidator> {
    Box::new(change::OversizedFileValidator)
}

fn wildcard_import() -> Box<dyn RuleValidator> {
    Box::new(structure::WildcardImportValidator)
}

fn long_function() -> Box<dyn RuleValidator> {
    Box::new(structure::LongFunctionValidator)
}

fn parameter_count() -> Box<dyn RuleValidator> {
    Box::new(structure::ParameterCountValidator)
}
