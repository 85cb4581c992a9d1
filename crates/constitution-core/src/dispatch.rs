//! Validator dispatcher: expands the requested paths, runs every enabled
//! validator over each file on a bounded worker pool, and contains
//! validator panics.
//!
//! Validators for one file run sequentially on a single worker so they can
//! share the cached AST without locking; parallelism is across files only.

use crate::cache::AstCache;
use crate::catalog::Catalog;
use crate::error::{CoreError, CoreResult};
use crate::finding::Finding;
use crate::registry::RuleRegistry;
use crate::source::{FileContext, detect_source_kind};
use constitution_store::Severity;
use rayon::prelude::*;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Pseudo rule id for files that could not be read.
pub const READ_ERROR_RULE: &str = "core::read";
/// Pseudo rule id for files that could not be parsed.
pub const PARSE_ERROR_RULE: &str = "core::parse";
/// Pseudo rule id for contained validator panics.
pub const VALIDATOR_ERROR_RULE: &str = "core::validator";

/// Options for a validation run.
#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Findings below this severity are dropped after counting.
    pub severity_threshold: Option<Severity>,
    /// Worker pool size; `None` uses one worker per logical processor.
    pub worker_count: Option<usize>,
    /// Files larger than this are skipped with a read-error finding.
    pub max_file_bytes: u64,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        ValidateOptions {
            severity_threshold: None,
            worker_count: None,
            max_file_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Expand file and directory arguments into a sorted, deduplicated list of
/// analyzable files.
pub(crate) fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            for entry in ignore::WalkBuilder::new(path)
                .hidden(false)
                .git_ignore(true)
                .build()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
            {
                let file = entry.path();
                let mut kind = detect_source_kind(file, None);
                if !kind.is_analyzable() {
                    // Extensionless scripts are detected by shebang, same
                    // as a direct single-file argument.
                    if let Some(first_line) = read_first_line(file) {
                        kind = detect_source_kind(file, Some(&first_line));
                    }
                }
                if kind.is_analyzable() {
                    files.push(file.to_path_buf());
                }
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

/// First line of a file, read from a small prefix.
fn read_first_line(path: &Path) -> Option<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path).ok()?;
    let mut buf = [0u8; 160];
    let read = file.read(&mut buf).ok()?;
    let line = buf[..read].split(|b| *b == b'\n').next()?;
    Some(String::from_utf8_lossy(line).into_owned())
}

/// Run every applicable enabled validator over `files`.
///
/// Returns per-file findings (unfiltered) in file order, plus the count of
/// files analyzed.
pub(crate) fn run_validation(
    files: &[PathBuf],
    catalog: &Catalog,
    registry: &RuleRegistry,
    enabled: &HashSet<String>,
    cache: &AstCache,
    options: &ValidateOptions,
) -> CoreResult<Vec<(PathBuf, Vec<Finding>)>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.worker_count.unwrap_or(0))
        .build()
        .map_err(|e| CoreError::invalid_input(format!("worker pool: {e}")))?;

    // Indexed parallel map preserves input order, which keeps the output
    // independent of worker scheduling.
    let per_file: Vec<(PathBuf, Vec<Finding>)> = pool.install(|| {
        files
            .par_iter()
            .map(|file| {
                let findings =
                    analyze_file(file, catalog, registry, enabled, cache, options.max_file_bytes);
                (file.clone(), findings)
            })
            .collect()
    });

    Ok(per_file)
}

fn analyze_file(
    path: &Path,
    catalog: &Catalog,
    registry: &RuleRegistry,
    enabled: &HashSet<String>,
    cache: &AstCache,
    max_bytes: u64,
) -> Vec<Finding> {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size > max_bytes {
        return vec![Finding::file_level(
            path,
            READ_ERROR_RULE,
            Severity::Info,
            format!("file skipped: {size} bytes exceeds limit {max_bytes}"),
        )];
    }

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return vec![Finding::file_level(
                path,
                READ_ERROR_RULE,
                Severity::Info,
                format!("file read error: {e}"),
            )];
        }
    };

    let first_line = bytes
        .split(|b| *b == b'\n')
        .next()
        .map(String::from_utf8_lossy);
    let kind = detect_source_kind(path, first_line.as_deref());
    if !kind.is_analyzable() {
        return Vec::new();
    }

    let ast = match cache.get_or_parse(kind, &bytes) {
        Ok(ast) => ast,
        Err(failure) => {
            return vec![Finding::file_level(
                path,
                PARSE_ERROR_RULE,
                Severity::Info,
                format!("parse error: {}", failure.reason),
            )];
        }
    };
    // get_or_parse succeeded, so the bytes are valid UTF-8.
    let Ok(text) = std::str::from_utf8(&bytes) else {
        return Vec::new();
    };
    let ctx = FileContext::new(path, text, &ast);

    let mut findings = Vec::new();
    for validator in registry.validators_for(kind, enabled) {
        match catch_unwind(AssertUnwindSafe(|| validator.analyze(&ctx))) {
            Ok(produced) => {
                for mut finding in produced {
                    if !enabled.contains(&finding.rule_id) {
                        continue;
                    }
                    // The catalog, not the validator, owns severity.
                    if let Some(rule) = catalog.get(&finding.rule_id) {
                        finding.severity = rule.severity;
                    }
                    findings.push(finding);
                }
            }
            Err(_) => {
                warn!(
                    validator = validator.name(),
                    file = %path.display(),
                    "validator panicked; converted to an info finding"
                );
                findings.push(Finding::file_level(
                    path,
                    VALIDATOR_ERROR_RULE,
                    Severity::Info,
                    format!("validator error: {}", validator.name()),
                ));
            }
        }
    }

    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::RuleValidator;
    use std::fs;
    use tempfile::TempDir;

    fn catalog_with(ids: &[(&str, Severity)]) -> Catalog {
        let dir = TempDir::new().unwrap();
        let rules: String = ids
            .iter()
            .map(|(id, severity)| {
                format!(
                    "  - rule_id: {id}\n    title: \"{id}\"\n    category: test\n    severity: {severity}\n    description: d\n    requirements: [r]\n    version: \"1.0.0\"\n    effective_date: \"2025-01-01\"\n    last_updated: \"2025-01-01T00:00:00Z\"\n"
                )
            })
            .collect();
        let doc = format!("metadata:\n  total_rules: {}\nrules:\n{rules}", ids.len());
        fs::write(dir.path().join("rules.yaml"), doc).unwrap();
        crate::catalog::load(dir.path()).unwrap()
    }

    fn enabled_set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expand_paths_walks_directories_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("sub/a.py"), "y = 2\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored\n").unwrap();

        let files = expand_paths(&[dir.path().to_path_buf()]);
        let names: Vec<String> = files
            .iter()
            .map(|f| {
                f.strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names, vec!["b.py", "sub/a.py"]);
    }

    #[test]
    fn test_expand_paths_sniffs_extensionless_shebang_scripts() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("deploy"),
            "#!/usr/bin/env python3\nprint('deploying')\n",
        )
        .unwrap();
        fs::write(dir.path().join("run"), "#!/bin/bash\necho go\n").unwrap();
        fs::write(dir.path().join("notes"), "plain text, no shebang\n").unwrap();
        fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();

        let files = expand_paths(&[dir.path().to_path_buf()]);
        let names: Vec<&str> = files
            .iter()
            .filter_map(|f| f.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["app.py", "deploy", "run"]);
    }

    #[test]
    fn test_shebang_script_from_directory_walk_is_analyzed() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("deploy"),
            "#!/usr/bin/env python3\npassword = \"secret123\"\n",
        )
        .unwrap();

        let catalog = catalog_with(&[("CTC-001", Severity::Critical)]);
        let registry = RuleRegistry::with_defaults();
        let cache = AstCache::default();
        let files = expand_paths(&[dir.path().to_path_buf()]);
        let per_file = run_validation(
            &files,
            &catalog,
            &registry,
            &enabled_set(&["CTC-001"]),
            &cache,
            &ValidateOptions::default(),
        )
        .unwrap();

        assert_eq!(per_file.len(), 1);
        let findings = &per_file[0].1;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "CTC-001");
        assert_eq!(findings[0].line, Some(2));
    }

    #[test]
    fn test_severity_comes_from_catalog_not_validator() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("auth.py");
        fs::write(&file, "password = \"secret123\"\n").unwrap();

        // Validator defaults CTC-001 to Critical; catalog says Blocker.
        let catalog = catalog_with(&[("CTC-001", Severity::Blocker)]);
        let registry = RuleRegistry::with_defaults();
        let cache = AstCache::default();
        let per_file = run_validation(
            &[file],
            &catalog,
            &registry,
            &enabled_set(&["CTC-001"]),
            &cache,
            &ValidateOptions::default(),
        )
        .unwrap();

        let findings = &per_file[0].1;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Blocker);
    }

    #[test]
    fn test_disabled_rules_produce_no_findings() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("auth.py");
        fs::write(&file, "password = \"secret123\"\nprint(done)\n").unwrap();

        let catalog = catalog_with(&[
            ("CTC-001", Severity::Critical),
            ("OBS-001", Severity::Minor),
        ]);
        let registry = RuleRegistry::with_defaults();
        let cache = AstCache::default();
        let per_file = run_validation(
            &[file],
            &catalog,
            &registry,
            &enabled_set(&["OBS-001"]),
            &cache,
            &ValidateOptions::default(),
        )
        .unwrap();

        let ids: Vec<&str> = per_file[0].1.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["OBS-001"]);
    }

    #[test]
    fn test_panicking_validator_becomes_info_finding() {
        struct PanickingValidator;
        impl RuleValidator for PanickingValidator {
            fn rule_ids(&self) -> &'static [&'static str] {
                &["BOOM-1"]
            }
            fn analyze(&self, _: &FileContext<'_>) -> Vec<Finding> {
                panic!("intentional test panic");
            }
        }
        fn panicking() -> Box<dyn RuleValidator> {
            Box::new(PanickingValidator)
        }

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("x.py");
        fs::write(&file, "x = 1\n").unwrap();

        let catalog = catalog_with(&[("BOOM-1", Severity::Major)]);
        let mut registry = RuleRegistry::new();
        registry.register(panicking);
        let cache = AstCache::default();
        let per_file = run_validation(
            &[file],
            &catalog,
            &registry,
            &enabled_set(&["BOOM-1"]),
            &cache,
            &ValidateOptions::default(),
        )
        .unwrap();

        let findings = &per_file[0].1;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, VALIDATOR_ERROR_RULE);
        assert_eq!(findings[0].severity, Severity::Info);
        assert!(findings[0].message.contains("PanickingValidator"));
    }

    #[test]
    fn test_oversized_file_skipped_with_info() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("big.py");
        fs::write(&file, "x = 1\n".repeat(100)).unwrap();

        let catalog = catalog_with(&[("OBS-001", Severity::Minor)]);
        let registry = RuleRegistry::with_defaults();
        let cache = AstCache::default();
        let options = ValidateOptions {
            max_file_bytes: 10,
            ..ValidateOptions::default()
        };
        let per_file = run_validation(
            &[file],
            &catalog,
            &registry,
            &enabled_set(&["OBS-001"]),
            &cache,
            &options,
        )
        .unwrap();

        assert_eq!(per_file[0].1[0].rule_id, READ_ERROR_RULE);
    }

    #[test]
    fn test_worker_count_does_not_change_results() {
        let dir = TempDir::new().unwrap();
        for i in 0..20 {
            fs::write(
                dir.path().join(format!("f{i:02}.py")),
                "password = \"secret123\"\nprint(x)\n",
            )
            .unwrap();
        }
        let files = expand_paths(&[dir.path().to_path_buf()]);
        let catalog = catalog_with(&[
            ("CTC-001", Severity::Critical),
            ("OBS-001", Severity::Minor),
        ]);
        let registry = RuleRegistry::with_defaults();
        let enabled = enabled_set(&["CTC-001", "OBS-001"]);

        let mut outputs = Vec::new();
        for workers in [1usize, 4, 16] {
            let cache = AstCache::default();
            let options = ValidateOptions {
                worker_count: Some(workers),
                ..ValidateOptions::default()
            };
            let per_file =
                run_validation(&files, &catalog, &registry, &enabled, &cache, &options).unwrap();
            outputs.push(serde_json::to_string(&per_file).unwrap());
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
    }
}
