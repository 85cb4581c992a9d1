//! Code-structure checks (R).

use crate::finding::Finding;
use crate::source::FileContext;
use crate::validators::RuleValidator;
use constitution_store::Severity;

/// R-001: wildcard imports hide the dependency surface.
pub struct WildcardImportValidator;

impl RuleValidator for WildcardImportValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["R-001"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for import in &ctx.ast.imports {
            if !import.wildcard {
                continue;
            }
            // `use super::*` in test modules is conventional.
            if import.module.ends_with("super::*") {
                continue;
            }
            findings.push(
                Finding::new(
                    ctx.path,
                    import.line,
                    1,
                    "R-001",
                    Severity::Minor,
                    format!("wildcard import of '{}'", import.module),
                )
                .with_evidence(ctx.line(import.line).unwrap_or_default()),
            );
        }
        findings
    }
}

/// Bodies longer than this are a finding.
const MAX_FUNCTION_LINES: usize = 60;

/// R-002: overlong function.
pub struct LongFunctionValidator;

impl RuleValidator for LongFunctionValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["R-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for function in &ctx.ast.functions {
            let body = function.body_lines();
            if body > MAX_FUNCTION_LINES {
                findings.push(Finding::new(
                    ctx.path,
                    function.line,
                    1,
                    "R-002",
                    Severity::Minor,
                    format!(
                        "function '{}' spans {body} lines (limit {MAX_FUNCTION_LINES})",
                        function.name
                    ),
                ));
            }
        }
        findings
    }
}

/// Parameter count beyond which a parameter object is warranted.
const MAX_PARAMS: usize = 6;

/// R-003: too many parameters.
pub struct ParameterCountValidator;

impl RuleValidator for ParameterCountValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["R-003"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for function in &ctx.ast.functions {
            if function.param_count > MAX_PARAMS {
                findings.push(Finding::new(
                    ctx.path,
                    function.line,
                    1,
                    "R-003",
                    Severity::Minor,
                    format!(
                        "function '{}' takes {} parameters (limit {MAX_PARAMS})",
                        function.name, function.param_count
                    ),
                ));
            }
        }
        findings
    }
}
