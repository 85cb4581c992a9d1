//! # constitution-core
//!
//! Rule validation engine for the ZeroUI constitution.
//!
//! Loads the governance rule catalog, keeps it seeded into the hybrid
//! store ([`constitution_store`]), and evaluates source trees against the
//! enabled rules: each file is parsed once into a lightweight AST (cached
//! by content hash), routed through the registered validators on a bounded
//! worker pool, and the findings are deduplicated and emitted in a
//! canonical order that is independent of worker count.
//!
//! Embedders interact exclusively through [`CoreHandle`]:
//!
//! ```no_run
//! use constitution_core::{CoreConfig, CoreHandle, ValidateOptions};
//! use constitution_store::StoreConfig;
//!
//! # fn main() -> Result<(), constitution_core::CoreError> {
//! let config = CoreConfig::new("rules/", StoreConfig::default());
//! let core = CoreHandle::open(config)?;
//! let run = core.validate(&["src/".into()], &ValidateOptions::default())?;
//! for finding in &run.findings {
//!     // hand off to a formatter
//!     let _ = (&finding.rule_id, finding.line, &finding.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Stability Tiers
//!
//! - **Stable** -- `finding`, `error`, `catalog` (the `Catalog` type and
//!   loader contract). Breaking changes require a major version bump.
//! - **Unstable** -- `source`, `cache`, `registry`, `validators`,
//!   `dispatch`. Interfaces may change on minor releases.

mod aggregate;
/// Content-addressed parse cache.
///
/// **Stability: unstable** -- interface may change on minor releases.
pub mod cache;
/// Rule catalog loading.
///
/// **Stability: stable** -- breaking changes require a major version bump.
pub mod catalog;
mod dispatch;
/// Error taxonomy.
///
/// **Stability: stable** -- breaking changes require a major version bump.
pub mod error;
/// Finding and run-result types.
///
/// **Stability: stable** -- breaking changes require a major version bump.
pub mod finding;
mod handle;
/// Validator registry.
///
/// **Stability: unstable** -- interface may change on minor releases.
pub mod registry;
/// Source detection and the lightweight AST.
///
/// **Stability: unstable** -- interface may change on minor releases.
pub mod source;
/// Built-in validator catalog.
///
/// **Stability: unstable** -- interface may change on minor releases.
pub mod validators;

pub use cache::{AstCache, DEFAULT_CACHE_BUDGET, ParseFailure};
pub use catalog::{Catalog, LoadWarning};
pub use dispatch::{
    PARSE_ERROR_RULE, READ_ERROR_RULE, VALIDATOR_ERROR_RULE, ValidateOptions,
};
pub use error::{CoreError, CoreResult, LoadError};
pub use finding::{Finding, MAX_EVIDENCE_LEN, ValidationRun};
pub use handle::{CoreConfig, CoreHandle};
pub use registry::{RuleRegistry, ValidatorFactory};
pub use source::{FileContext, SourceAst, SourceKind, detect_source_kind};
pub use validators::RuleValidator;
