use crate::harness::Suite;
use dbharness_core::{features, ScenarioStatus};

#[tokio::test]
async fn test_full_catalogue_passes() {
    let total: usize = features::catalogue()
        .iter()
        .map(|f| f.scenarios().len())
        .sum();

    let report = Suite::new("full_catalogue")
        .catalogue()
        .expect_total(total)
        .expect_all_passed()
        .expect_rows("users", 3)
        .expect_rows("products", 3)
        .expect_rows("orders", 3)
        .expect_table_absent("test_employees")
        .run()
        .await
        .unwrap();
    assert!(report.is_success());
}

#[tokio::test]
async fn test_smoke_subset() {
    let report = Suite::new("smoke_subset")
        .catalogue()
        .tags("@smoke and not @slow")
        .expect_all_passed()
        .run()
        .await
        .unwrap();
    assert!(!report.scenarios.is_empty());
    assert!(report
        .scenarios
        .iter()
        .all(|s| s.tags.iter().any(|t| t == "@smoke")));
}

#[tokio::test]
async fn test_dry_run_binds_without_executing() {
    let report = Suite::new("dry_run")
        .catalogue()
        .dry_run()
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
    assert!(report.dry_run);
    assert!(report
        .scenarios
        .iter()
        .all(|s| s.status == ScenarioStatus::Skipped));
    assert_eq!(report.summary().skipped, report.summary().total);
}

#[tokio::test]
async fn test_name_filter_selects_one_scenario() {
    Suite::new("name_filter")
        .catalogue()
        .only_feature("Transactions")
        .named("nested savepoints")
        .expect_total(1)
        .expect_passed("Nested savepoints")
        .run()
        .await
        .unwrap();
}
