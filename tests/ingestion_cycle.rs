mod common;

use std::sync::Arc;

use chrono::Duration;
use tokio_util::sync::CancellationToken;

use supply_tracker::config::ImportantSymbol;
use supply_tracker::db::models::{ChangeResult, Observation, Symbol};
use supply_tracker::db::{MemoryStore, SnapshotStore, SupplySeriesStore};
use supply_tracker::ingest::{CycleError, CycleState};

use common::{
    asset, missing_assets, noon, orchestrator, test_policy, valid_assets, ScriptedProvider,
};

fn two_full_pages() -> ScriptedProvider {
    ScriptedProvider::new()
        .with_page(1, valid_assets(0, 100))
        .with_page(2, valid_assets(100, 100))
}

#[tokio::test]
async fn test_two_pages_of_valid_assets_are_written_once() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider.clone(), store.clone(), test_policy());

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.success, "{}", summary.message);
    assert_eq!(summary.state, CycleState::Done);
    assert_eq!(summary.counts.pages_fetched, 2);
    assert_eq!(summary.counts.written, 200);
    assert_eq!(summary.counts.already_present, 0);
    assert_eq!(summary.counts.snapshot_coins, 200);
    assert_eq!(store.observation_count().await, 200);
    assert_eq!(store.all_series().await.unwrap().len(), 200);

    let batch = store.latest_batch().await.unwrap().unwrap();
    assert_eq!(batch.day, noon().date_naive());
    assert_eq!(batch.coins.first().map(|c| c.rank), Some(1));
    assert_eq!(batch.coins.last().map(|c| c.rank), Some(200));
    let first = &batch.coins[0];
    assert_eq!(first.symbol, Symbol::new("C0"));
    assert_eq!(first.total_supply, Some(first.circulating_supply));
}

#[tokio::test]
async fn test_second_run_on_same_day_is_a_no_op() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider.clone(), store.clone(), test_policy());
    let cancel = CancellationToken::new();

    orch.run_cycle_at(noon(), &cancel).await.unwrap();
    let again = orch
        .run_cycle_at(noon() + Duration::hours(1), &cancel)
        .await
        .unwrap();

    assert_eq!(again.state, CycleState::Skipped);
    assert!(again.success);
    assert_eq!(provider.page_calls(), 2);
    assert_eq!(store.observation_count().await, 200);
    assert_eq!(store.batch_count().await, 1);
}

#[tokio::test]
async fn test_next_day_appends_new_observations() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider, store.clone(), test_policy());
    let cancel = CancellationToken::new();

    orch.run_cycle_at(noon(), &cancel).await.unwrap();
    let next = orch
        .run_cycle_at(noon() + Duration::days(1), &cancel)
        .await
        .unwrap();

    assert!(next.success);
    assert_eq!(next.counts.written, 200);
    assert_eq!(store.observation_count().await, 400);
    assert_eq!(store.batch_count().await, 2);
}

#[tokio::test]
async fn test_cycle_resumes_after_partial_write() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    let earlier = noon() - Duration::hours(3);
    for n in 0..50 {
        store
            .append_observation(
                &Symbol::new(&format!("c{}", n)),
                Observation::new(1_000.0 + n as f64, earlier),
            )
            .await
            .unwrap();
    }

    let orch = orchestrator(provider, store.clone(), test_policy());
    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.counts.written, 150);
    assert_eq!(summary.counts.already_present, 50);
    assert_eq!(store.observation_count().await, 200);
}

#[tokio::test]
async fn test_concurrent_cycle_for_same_day_is_skipped() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider.clone(), store.clone(), test_policy());

    let _running = orch.guard().try_acquire(noon().date_naive()).unwrap();
    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.state, CycleState::Skipped);
    assert_eq!(summary.message, "cycle already running");
    assert_eq!(provider.page_calls(), 0);
    assert_eq!(store.observation_count().await, 0);
}

#[tokio::test]
async fn test_backfill_is_capped() {
    let mut detailed = ScriptedProvider::new()
        .with_page(1, valid_assets(0, 100))
        .with_page(2, missing_assets(0, 150));
    for n in 0..10 {
        detailed = detailed.with_detail(&format!("missing-{}", n), 500.0);
    }
    let provider = Arc::new(detailed);
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider.clone(), store.clone(), test_policy());

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.detail_calls().len(), 100);
    assert_eq!(summary.counts.missing_supply, 150);
    assert_eq!(summary.counts.backfill_attempts, 100);
    assert_eq!(summary.counts.backfill_recovered, 10);
    assert_eq!(summary.counts.written, 110);
    assert_eq!(summary.counts.snapshot_coins, 110);
    assert!(store
        .has_observation_on_day(&Symbol::new("M3"), noon().date_naive())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_important_symbol_gets_extra_lookup_by_listing_id() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_page(1, vec![asset("binancecoin", "wbnb", None)])
            .with_listing(vec![asset("binancecoin", "bnb", None)])
            .with_detail("binancecoin", 145_887_575.0),
    );
    let store = Arc::new(MemoryStore::new());
    let policy = supply_tracker::config::IngestionPolicy {
        backfill_cap: 0,
        important_symbols: vec![ImportantSymbol::new("BNB", "bnb-fallback")],
        ..test_policy()
    };
    let orch = orchestrator(provider.clone(), store.clone(), policy);

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.success, "{}", summary.message);
    assert_eq!(provider.detail_calls(), vec!["binancecoin".to_string()]);
    let bnb = store.series(&Symbol::new("BNB")).await.unwrap().unwrap();
    assert_eq!(bnb.observations[0].value, 145_887_575.0);

    let batch = store.latest_batch().await.unwrap().unwrap();
    let coin = batch.coin(&Symbol::new("BNB")).unwrap();
    assert_eq!(coin.provider_id, "binancecoin");
    assert_eq!(coin.rank, 1);
}

#[tokio::test]
async fn test_important_symbol_absent_from_pages_uses_fallback_id() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_page(1, valid_assets(0, 3))
            .with_detail("ripple", 57_000_000_000.0),
    );
    let store = Arc::new(MemoryStore::new());
    let policy = supply_tracker::config::IngestionPolicy {
        important_symbols: vec![
            ImportantSymbol::new("C1", "unused"),
            ImportantSymbol::new("XRP", "ripple"),
        ],
        ..test_policy()
    };
    let orch = orchestrator(provider.clone(), store.clone(), policy);

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.detail_calls(), vec!["ripple".to_string()]);
    assert_eq!(summary.counts.written, 4);
    assert!(store.series(&Symbol::new("XRP")).await.unwrap().is_some());
    // No listing entry for XRP, so it has no snapshot record
    assert_eq!(summary.counts.snapshot_coins, 3);
}

#[tokio::test]
async fn test_cancellation_keeps_store_untouched_and_rerun_completes() {
    let cancel = CancellationToken::new();
    let provider = Arc::new(two_full_pages().cancel_after_pages(1, cancel.clone()));
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider, store.clone(), test_policy());

    let result = orch.run_cycle_at(noon(), &cancel).await;
    assert!(matches!(result, Err(CycleError::Cancelled)));
    assert_eq!(store.observation_count().await, 0);
    assert_eq!(store.batch_count().await, 0);
    assert!(!orch.guard().is_running(noon().date_naive()));

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(summary.success);
    assert_eq!(summary.counts.written, 200);
}

#[tokio::test]
async fn test_partial_persistence_failure_defers_snapshot() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    store.fail_writes_for(Symbol::new("C5")).await;
    let orch = orchestrator(provider, store.clone(), test_policy());

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!summary.success);
    assert_eq!(summary.counts.written, 199);
    assert_eq!(summary.counts.failed_writes, 1);
    assert_eq!(summary.failures[0].symbol, Symbol::new("C5"));
    assert_eq!(store.batch_count().await, 0);

    store.clear_write_failures().await;
    let rerun = orch
        .run_cycle_at(noon() + Duration::hours(1), &CancellationToken::new())
        .await
        .unwrap();

    assert!(rerun.success);
    assert_eq!(rerun.counts.written, 1);
    assert_eq!(rerun.counts.already_present, 199);
    assert_eq!(store.observation_count().await, 200);
    assert_eq!(store.batch_count().await, 1);
}

#[tokio::test]
async fn test_failed_page_is_skipped() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_page(1, valid_assets(0, 100))
            .with_failing_page(2),
    );
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider, store.clone(), test_policy());

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.counts.pages_fetched, 1);
    assert_eq!(summary.counts.pages_failed, 1);
    assert_eq!(summary.counts.written, 100);
}

#[tokio::test]
async fn test_all_pages_failing_is_catastrophic() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_failing_page(1)
            .with_failing_page(2),
    );
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider, store.clone(), test_policy());

    let result = orch.run_cycle_at(noon(), &CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(CycleError::ProviderUnreachable { pages: 2, .. })
    ));
    assert_eq!(store.batch_count().await, 0);
}

#[tokio::test]
async fn test_empty_pages_fail_without_error() {
    let provider = Arc::new(ScriptedProvider::new());
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(provider, store.clone(), test_policy());

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!summary.success);
    assert_eq!(summary.message, CycleError::NoUsableAssets.to_string());
    assert_eq!(store.batch_count().await, 0);
}

#[tokio::test]
async fn test_snapshot_changes_use_stored_history() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    store
        .append_observation(
            &Symbol::new("C0"),
            Observation::new(900.0, noon() - Duration::days(1)),
        )
        .await
        .unwrap();
    let orch = orchestrator(provider, store.clone(), test_policy());

    orch.run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    let batch = store.latest_batch().await.unwrap().unwrap();
    let c0 = batch.coin(&Symbol::new("C0")).unwrap();
    assert_eq!(c0.supply_change_1d, ChangeResult::observed(100.0, 900.0));
    assert!(c0.supply_change_1w.is_none());
    // Projecting 100 per day over 30 days leaves no positive past value
    assert!(c0.supply_change_1m.is_none());

    let c1 = batch.coin(&Symbol::new("C1")).unwrap();
    assert!(c1.supply_change_1d.is_none());
}

#[tokio::test]
async fn test_month_change_extrapolates_from_prior_reading() {
    let provider = Arc::new(two_full_pages());
    let store = Arc::new(MemoryStore::new());
    store
        .append_observation(
            &Symbol::new("C0"),
            Observation::new(900.0, noon() - Duration::days(20)),
        )
        .await
        .unwrap();
    let orch = orchestrator(provider, store.clone(), test_policy());

    orch.run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();

    let batch = store.latest_batch().await.unwrap().unwrap();
    let c0 = batch.coin(&Symbol::new("C0")).unwrap();
    // (1000 - 900) / 20 days * 30 days
    assert_eq!(c0.supply_change_1m, ChangeResult::estimated(150.0, 850.0));
    assert!(c0.supply_change_1w.is_none());
}

#[tokio::test]
async fn test_resumed_cycle_ignores_reading_from_earlier_attempt() {
    let store = Arc::new(MemoryStore::new());
    store
        .append_observation(
            &Symbol::new("C0"),
            Observation::new(900.0, noon() - Duration::days(20)),
        )
        .await
        .unwrap();
    store
        .append_observation(
            &Symbol::new("C0"),
            Observation::new(1_000.0, noon() - Duration::hours(3)),
        )
        .await
        .unwrap();
    let orch = orchestrator(Arc::new(two_full_pages()), store.clone(), test_policy());

    let summary = orch
        .run_cycle_at(noon(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(summary.success);

    let batch = store.latest_batch().await.unwrap().unwrap();
    let c0 = batch.coin(&Symbol::new("C0")).unwrap();
    assert_eq!(c0.supply_change_1m, ChangeResult::estimated(150.0, 850.0));
}
