//! Property test for sync convergence: from arbitrary divergent states, one
//! primary-wins reconciliation pass makes both backends identical.

use constitution_store::backend::document::DocumentBackend;
use constitution_store::config::DocumentConfig;
use constitution_store::{
    ConflictPolicy, Rule, RuleBackend, RuleQuery, SyncManager,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_backend(dir: &TempDir, name: &str) -> Arc<dyn RuleBackend> {
    let config = DocumentConfig {
        path: dir.path().join(name),
        atomic_writes: true,
        backup_retention: 2,
        unknown: BTreeMap::new(),
    };
    Arc::new(DocumentBackend::open(&config, 1_000).unwrap())
}

fn make_rule(id: &str) -> Rule {
    serde_yaml::from_str(&format!(
        "rule_id: {id}\ntitle: \"{id}\"\ncategory: generated\nseverity: major\nversion: \"1.0.0\"\neffective_date: \"2025-01-01\"\nlast_updated: \"2025-01-01T00:00:00Z\"\n"
    ))
    .unwrap()
}

#[test]
fn push_then_reconcile_is_a_no_op() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let primary = open_backend(&dir, "primary.json");
    let secondary = open_backend(&dir, "secondary.json");
    primary.upsert_rule(&make_rule("NP-1"))?;

    let sync = SyncManager::new(
        Arc::clone(&primary),
        Arc::clone(&secondary),
        ConflictPolicy::PrimaryWins,
        dir.path().join("history.jsonl"),
        Duration::from_secs(10),
    );
    let first = sync.reconcile()?;
    assert_eq!(first.copied, 1);

    let second = sync.reconcile()?;
    assert_eq!(second.copied, 0);
    assert_eq!(second.unchanged, 1);
    Ok(())
}

#[derive(Debug, Clone)]
enum Mutation {
    Disable(usize),
    Enable(usize),
}

fn arb_mutation(rule_count: usize) -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (0..rule_count).prop_map(Mutation::Disable),
        (0..rule_count).prop_map(Mutation::Enable),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn primary_wins_pass_converges(
        primary_only in proptest::collection::btree_set("P[0-9]{2}", 0..5),
        secondary_only in proptest::collection::btree_set("S[0-9]{2}", 0..5),
        shared_count in 1usize..6,
        mutations in proptest::collection::vec(arb_mutation(6), 0..10),
    ) {
        let dir = TempDir::new().unwrap();
        let primary = open_backend(&dir, "primary.json");
        let secondary = open_backend(&dir, "secondary.json");

        // Shared rules on both sides, extra rules on each side alone.
        let shared: Vec<String> = (0..shared_count).map(|i| format!("SH-{i:02}")).collect();
        for id in &shared {
            primary.upsert_rule(&make_rule(id)).unwrap();
            secondary
                .put_record(&primary.get_rule(id).unwrap())
                .unwrap();
        }
        for id in &primary_only {
            primary.upsert_rule(&make_rule(id)).unwrap();
        }
        for id in &secondary_only {
            secondary.upsert_rule(&make_rule(id)).unwrap();
        }

        // Arbitrary mutation sequence applied to the primary only.
        for mutation in &mutations {
            match mutation {
                Mutation::Disable(index) => {
                    let id = &shared[index % shared.len()];
                    let _ = primary.disable(id, "divergence");
                }
                Mutation::Enable(index) => {
                    let id = &shared[index % shared.len()];
                    let _ = primary.enable(id);
                }
            }
        }

        let sync = SyncManager::new(
            Arc::clone(&primary),
            Arc::clone(&secondary),
            ConflictPolicy::PrimaryWins,
            dir.path().join("history.jsonl"),
            Duration::from_secs(10),
        );
        let report = sync.reconcile().unwrap();
        prop_assert!(report.applied);

        // Both backends now return identical listings.
        let left = primary.list_rules(&RuleQuery::all()).unwrap();
        let right = secondary.list_rules(&RuleQuery::all()).unwrap();
        prop_assert_eq!(left.len(), right.len());
        for (a, b) in left.iter().zip(right.iter()) {
            prop_assert_eq!(a, b);
        }
    }
}
