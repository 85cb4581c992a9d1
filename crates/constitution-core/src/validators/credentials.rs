//! Credential and dangerous-construct checks (CTC).

use crate::finding::Finding;
use crate::source::{FileContext, SourceKind};
use crate::validators::RuleValidator;
use constitution_store::Severity;
use regex::Regex;
use std::sync::LazyLock;

static CREDENTIAL_ASSIGN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(password|passwd|secret|api_?key|auth_?token|access_?token|private_?key)\b\s*[:=]"#,
    )
    .unwrap()
});

/// Placeholder values that are not real credentials.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\$\{.*\}|<.*>|xxx+|\*+|changeme|dummy|example|test|todo)$").unwrap()
});

/// CTC-001: a credential-looking name assigned a non-trivial string literal.
pub struct HardcodedCredentialsValidator;

impl RuleValidator for HardcodedCredentialsValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["CTC-001"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for literal in &ctx.ast.strings {
            if literal.value.len() < 4 || PLACEHOLDER.is_match(&literal.value) {
                continue;
            }
            let Some(line) = ctx.line(literal.line) else {
                continue;
            };
            let Some(m) = CREDENTIAL_ASSIGN.find(line) else {
                continue;
            };
            // The literal must be on the right-hand side of the assignment.
            if literal.column <= m.start() {
                continue;
            }
            findings.push(
                Finding::new(
                    ctx.path,
                    literal.line,
                    literal.column,
                    "CTC-001",
                    Severity::Critical,
                    format!(
                        "hardcoded credential assigned to '{}'",
                        m.as_str().trim_end_matches([':', '=']).trim()
                    ),
                )
                .with_evidence(line)
                .with_confidence(90),
            );
        }
        findings
    }
}

static WEAK_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(hashlib\.(md5|sha1)|Md5::new|Sha1::new|MessageDigest\.getInstance\(\s*.(MD5|SHA-?1).|crypto\.createHash\(\s*.(md5|sha1).|md5\.New\(\)|sha1\.New\(\))")
        .unwrap()
});

/// CTC-002: MD5/SHA-1 used where a collision-resistant hash is expected.
pub struct WeakHashValidator;

impl RuleValidator for WeakHashValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["CTC-002"]
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            if let Some(m) = WEAK_HASH.find(line) {
                findings.push(
                    Finding::new(
                        ctx.path,
                        line_no,
                        m.start() + 1,
                        "CTC-002",
                        Severity::Major,
                        "weak hash algorithm (MD5/SHA-1)",
                    )
                    .with_evidence(line)
                    .with_confidence(80),
                );
            }
        }
        findings
    }
}

static DYNAMIC_EVAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(eval|exec)\s*\(|new\s+Function\s*\(").unwrap());

/// CTC-003: dynamic code evaluation.
pub struct DynamicEvalValidator;

impl RuleValidator for DynamicEvalValidator {
    fn rule_ids(&self) -> &'static [&'static str] {
        &["CTC-003"]
    }

    fn applies_to(&self, kind: SourceKind) -> bool {
        matches!(
            kind,
            SourceKind::Python | SourceKind::JavaScript | SourceKind::TypeScript | SourceKind::Shell
        )
    }

    fn analyze(&self, ctx: &FileContext<'_>) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (line_no, line) in ctx.lines() {
            if let Some(m) = DYNAMIC_EVAL.find(line) {
                findings.push(
                    Finding::new(
                        ctx.path,
                        line_no,
                        m.start() + 1,
                        "CTC-003",
                        Severity::Major,
                        "dynamic code evaluation",
                    )
                    .with_evidence(line)
                    .with_confidence(70),
                );
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::testsupport::{rule_ids, run_validator};

    #[test]
    fn test_hardcoded_password_detected() {
        let findings = run_validator(
            &HardcodedCredentialsValidator,
            "src/auth.py",
            "password = \"secret123\"\n",
        );
        assert_eq!(rule_ids(&findings), vec!["CTC-001"]);
        assert_eq!(findings[0].line, Some(1));
        assert_eq!(findings[0].severity, Severity::Critical);
        assert!(findings[0].evidence.as_deref().unwrap().contains("password"));
    }

    #[test]
    fn test_placeholder_values_ignored() {
        let findings = run_validator(
            &HardcodedCredentialsValidator,
            "src/auth.py",
            "password = \"${DB_PASSWORD}\"\napi_key = \"changeme\"\n",
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_short_values_ignored() {
        let findings = run_validator(
            &HardcodedCredentialsValidator,
            "config.py",
            "password = \"ab\"\n",
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_credential_name_in_string_only_not_flagged() {
        // The word appears inside a literal, not as an assignment target.
        let findings = run_validator(
            &HardcodedCredentialsValidator,
            "src/help.py",
            "message = \"enter your password here\"\n",
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_weak_hash_python_and_js() {
        let findings = run_validator(
            &WeakHashValidator,
            "hash.py",
            "digest = hashlib.md5(data).hexdigest()\n",
        );
        assert_eq!(rule_ids(&findings), vec!["CTC-002"]);

        let findings = run_validator(
            &WeakHashValidator,
            "hash.js",
            "const h = crypto.createHash('sha1');\n",
        );
        assert_eq!(rule_ids(&findings), vec!["CTC-002"]);
    }

    #[test]
    fn test_eval_flagged_in_python_not_rust() {
        let findings = run_validator(&DynamicEvalValidator, "x.py", "eval(user_input)\n");
        assert_eq!(rule_ids(&findings), vec!["CTC-003"]);
        assert!(!DynamicEvalValidator.applies_to(crate::source::SourceKind::Rust));
    }
}
