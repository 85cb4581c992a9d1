//! Rule catalog loader.
//!
//! Reads every rule document in a directory into a typed, indexed catalog.
//! Loading is deterministic: files are enumerated in sorted filename order
//! (solely so duplicate-identifier errors are reproducible) and rules keep
//! document order within each file.

use crate::error::{CoreResult, LoadError};
use constitution_store::{Rule, Severity};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// A non-fatal observation made during load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    pub file: PathBuf,
    pub rule_id: Option<String>,
    pub message: String,
}

/// The loaded rule corpus, indexed by id and by category.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
    categories: BTreeMap<String, BTreeSet<String>>,
    warnings: Vec<LoadWarning>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.index.get(rule_id).map(|&i| &self.rules[i])
    }

    pub fn contains(&self, rule_id: &str) -> bool {
        self.index.contains_key(rule_id)
    }

    /// Rules in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Category names with their member rule ids.
    pub fn categories(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.categories
    }

    /// Warnings gathered during load (empty fields, unknown hints).
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    metadata: RawMetadata,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    total_rules: usize,
    #[serde(default)]
    #[allow(dead_code)]
    category: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

/// A rule as it appears on disk: everything optional so missing fields can
/// be reported per field instead of as an opaque parse error.
#[derive(Debug, Deserialize)]
struct RawRule {
    rule_id: Option<String>,
    title: Option<String>,
    category: Option<String>,
    severity: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    requirements: Option<Vec<String>>,
    version: Option<String>,
    effective_date: Option<String>,
    last_updated: Option<String>,
    #[serde(default)]
    policy_linkage: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    enabled_default: Option<bool>,
    #[serde(default)]
    validator_hint: Option<String>,
    #[serde(flatten)]
    extras: BTreeMap<String, serde_json::Value>,
}

/// Load the catalog from every `.yaml`/`.yml` document under `directory`.
pub fn load(directory: &Path) -> CoreResult<Catalog> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(directory)
        .map_err(|e| LoadError::Directory {
            path: directory.to_path_buf(),
            source: e,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();

    let mut catalog = Catalog::default();
    // rule_id -> file it first appeared in, for duplicate reporting.
    let mut origins: HashMap<String, PathBuf> = HashMap::new();

    for file in &files {
        let text = std::fs::read_to_string(file)
            .map_err(|e| LoadError::Directory {
                path: file.clone(),
                source: e,
            })?;
        let document: RawDocument =
            serde_yaml::from_str(&text).map_err(|e| LoadError::Document {
                file: file.clone(),
                message: e.to_string(),
            })?;

        if document.metadata.total_rules != document.rules.len() {
            return Err(LoadError::MetadataMismatch {
                file: file.clone(),
                declared: document.metadata.total_rules,
                actual: document.rules.len(),
            }
            .into());
        }

        for raw in document.rules {
            let rule = build_rule(raw, file, &mut catalog.warnings)?;

            if let Some(first_file) = origins.get(&rule.rule_id) {
                return Err(LoadError::DuplicateIdentifier {
                    rule_id: rule.rule_id,
                    first_file: first_file.clone(),
                    second_file: file.clone(),
                }
                .into());
            }
            origins.insert(rule.rule_id.clone(), file.clone());

            catalog
                .categories
                .entry(rule.category.clone())
                .or_default()
                .insert(rule.rule_id.clone());
            catalog.index.insert(rule.rule_id.clone(), catalog.rules.len());
            catalog.rules.push(rule);
        }
    }

    Ok(catalog)
}

fn build_rule(
    raw: RawRule,
    file: &Path,
    warnings: &mut Vec<LoadWarning>,
) -> Result<Rule, LoadError> {
    let rule_id = raw
        .rule_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| invalid("<unknown>", "rule_id"))?;

    let missing = |field: &str| invalid(&rule_id, field);

    let title = raw.title.ok_or_else(|| missing("title"))?;
    let category = raw.category.ok_or_else(|| missing("category"))?;
    let severity = parse_severity(raw.severity.as_deref()).ok_or_else(|| missing("severity"))?;
    let version = raw.version.ok_or_else(|| missing("version"))?;
    let effective_date = raw
        .effective_date
        .as_deref()
        .and_then(parse_date)
        .ok_or_else(|| missing("effective_date"))?;
    let last_updated = raw
        .last_updated
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or_else(|| missing("last_updated"))?;

    let description = raw.description.unwrap_or_default();
    let requirements = raw.requirements.unwrap_or_default();
    if description.trim().is_empty() {
        warnings.push(LoadWarning {
            file: file.to_path_buf(),
            rule_id: Some(rule_id.clone()),
            message: "empty description".to_string(),
        });
    }
    if requirements.is_empty() {
        warnings.push(LoadWarning {
            file: file.to_path_buf(),
            rule_id: Some(rule_id.clone()),
            message: "empty requirements".to_string(),
        });
    }

    Ok(Rule {
        rule_id,
        title,
        category,
        severity,
        description,
        requirements,
        version,
        effective_date,
        last_updated,
        policy_linkage: raw.policy_linkage.unwrap_or_default(),
        enabled_default: raw.enabled_default.unwrap_or(true),
        validator_hint: raw.validator_hint,
        extras: raw.extras,
    })
}

fn invalid(rule_id: &str, field: &str) -> LoadError {
    LoadError::InvalidRule {
        rule_id: rule_id.to_string(),
        field: field.to_string(),
    }
}

fn parse_severity(text: Option<&str>) -> Option<Severity> {
    match text?.to_ascii_lowercase().as_str() {
        "blocker" => Some(Severity::Blocker),
        "critical" => Some(Severity::Critical),
        "major" => Some(Severity::Major),
        "minor" => Some(Severity::Minor),
        "info" => Some(Severity::Info),
        _ => None,
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    // Date-only timestamps are normalized to midnight UTC.
    parse_date(text).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::fs;
    use tempfile::TempDir;

    fn write_doc(dir: &TempDir, name: &str, body: &str) {
        fs::write(dir.path().join(name), body).unwrap();
    }

    fn rule_yaml(id: &str, title: &str) -> String {
        format!(
            "  - rule_id: {id}\n    title: \"{title}\"\n    category: strings\n    severity: major\n    description: \"checks {id}\"\n    requirements:\n      - \"must hold\"\n    version: \"1.0.0\"\n    effective_date: \"2025-01-01\"\n    last_updated: \"2025-01-01T00:00:00Z\"\n"
        )
    }

    fn doc_with(rules: &[(&str, &str)]) -> String {
        let body: String = rules.iter().map(|(id, t)| rule_yaml(id, t)).collect();
        format!(
            "metadata:\n  total_rules: {}\n  category: strings\n  description: test corpus\nrules:\n{body}",
            rules.len()
        )
    }

    #[test]
    fn test_load_single_document() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "strings.yaml", &doc_with(&[("STR-001", "a"), ("STR-002", "b")]));

        let catalog = load(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("STR-001"));
        assert_eq!(catalog.get("STR-002").unwrap().title, "b");
        assert_eq!(catalog.categories()["strings"].len(), 2);
        assert!(catalog.warnings().is_empty());
    }

    #[test]
    fn test_load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.yaml", &doc_with(&[("A-1", "x")]));
        write_doc(&dir, "b.yaml", &doc_with(&[("B-1", "y")]));

        let first = load(dir.path()).unwrap();
        let second = load(dir.path()).unwrap();
        let ids = |c: &Catalog| c.iter().map(|r| r.rule_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.warnings(), second.warnings());
    }

    #[test]
    fn test_duplicate_across_files_names_both() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.yaml", &doc_with(&[("STR-001", "foo")]));
        write_doc(&dir, "b.yaml", &doc_with(&[("STR-001", "bar")]));

        let err = load(dir.path()).unwrap_err();
        let CoreError::Load(LoadError::DuplicateIdentifier {
            rule_id,
            first_file,
            second_file,
        }) = err
        else {
            panic!("expected DuplicateIdentifier, got {err:?}");
        };
        assert_eq!(rule_id, "STR-001");
        assert!(first_file.ends_with("a.yaml"));
        assert!(second_file.ends_with("b.yaml"));
    }

    #[test]
    fn test_duplicate_within_one_file_detected() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.yaml", &doc_with(&[("X-1", "one"), ("X-1", "two")]));
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Load(LoadError::DuplicateIdentifier { .. })
        ));
    }

    #[test]
    fn test_numeric_collision_across_namespaces_permitted() {
        // R-7 and STR-7 share a number but not an identifier.
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.yaml", &doc_with(&[("R-7", "r"), ("STR-7", "s")]));
        let catalog = load(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_metadata_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "metadata:\n  total_rules: 5\n  category: strings\nrules:\n{}",
            rule_yaml("STR-001", "a")
        );
        write_doc(&dir, "a.yaml", &body);

        let err = load(dir.path()).unwrap_err();
        let CoreError::Load(LoadError::MetadataMismatch {
            declared, actual, ..
        }) = err
        else {
            panic!("expected MetadataMismatch, got {err:?}");
        };
        assert_eq!((declared, actual), (5, 1));
    }

    #[test]
    fn test_missing_required_field_names_rule_and_field() {
        let dir = TempDir::new().unwrap();
        let body = "metadata:\n  total_rules: 1\nrules:\n  - rule_id: BAD-1\n    title: \"no severity\"\n    category: strings\n    version: \"1.0.0\"\n    effective_date: \"2025-01-01\"\n    last_updated: \"2025-01-01T00:00:00Z\"\n";
        write_doc(&dir, "a.yaml", body);

        let err = load(dir.path()).unwrap_err();
        let CoreError::Load(LoadError::InvalidRule { rule_id, field }) = err else {
            panic!("expected InvalidRule, got {err:?}");
        };
        assert_eq!(rule_id, "BAD-1");
        assert_eq!(field, "severity");
    }

    #[test]
    fn test_empty_description_warns_but_loads() {
        let dir = TempDir::new().unwrap();
        let body = "metadata:\n  total_rules: 1\nrules:\n  - rule_id: W-1\n    title: \"t\"\n    category: c\n    severity: info\n    version: \"1.0.0\"\n    effective_date: \"2025-01-01\"\n    last_updated: \"2025-01-01\"\n";
        write_doc(&dir, "a.yaml", body);

        let catalog = load(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
        let messages: Vec<&str> = catalog
            .warnings()
            .iter()
            .map(|w| w.message.as_str())
            .collect();
        assert!(messages.contains(&"empty description"));
        assert!(messages.contains(&"empty requirements"));
    }

    #[test]
    fn test_unknown_keys_preserved_in_extras() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "{}    review_board: governance\n",
            doc_with(&[("E-1", "extras")])
        );
        write_doc(&dir, "a.yaml", &body);

        let catalog = load(dir.path()).unwrap();
        let rule = catalog.get("E-1").unwrap();
        assert_eq!(
            rule.extras.get("review_board"),
            Some(&serde_json::json!("governance"))
        );
    }

    #[test]
    fn test_non_yaml_files_ignored() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "a.yaml", &doc_with(&[("A-1", "x")]));
        write_doc(&dir, "README.md", "not rules");
        let catalog = load(dir.path()).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_unparseable_document_is_load_error() {
        let dir = TempDir::new().unwrap();
        write_doc(&dir, "bad.yaml", "metadata: [not, a, mapping\n");
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::Load(LoadError::Document { .. })));
    }

    #[test]
    fn test_missing_directory_is_load_error() {
        let err = load(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, CoreError::Load(LoadError::Directory { .. })));
    }
}
