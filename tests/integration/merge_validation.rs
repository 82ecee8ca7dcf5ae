use rv_catalog::events::LoaderEvent;
use rv_catalog::models::{Availability, ConnectivityMode, MediaItem, Phase};
use rv_catalog::services::LoaderSettings;
use rv_catalog::services::consistency::MergeStrategy;
use std::time::Duration;

use crate::common::HarnessBuilder;
use crate::common::builders::{count_available, local_items, remote_items};

#[tokio::test]
async fn test_remote_first_replace_is_accepted() {
    let harness = HarnessBuilder::new(local_items(3), remote_items(3, 3))
        .loader(LoaderSettings {
            merge_strategy: MergeStrategy::Replace {
                prioritize_local: false,
            },
            local_timeout: Duration::from_millis(500),
            max_background_duration: Duration::from_secs(5),
            ..Default::default()
        })
        .build();

    harness.loader.load().await.unwrap();
    harness.settle().await;

    let items = harness.loader.unified_items().await;
    assert_eq!(items.len(), 3);
    for (i, item) in items.iter().enumerate() {
        assert_eq!(item.title, format!("Remote Title {i}"));
        assert_eq!(item.jellyfin_id.as_deref(), Some(format!("jf-m{i}").as_str()));
        assert_eq!(
            item.local_path.as_deref(),
            Some(format!("/media/movies/m{i}.mkv").as_str())
        );
    }
    assert_eq!(count_available(&items, Availability::Both), 3);

    let state = harness.loader.loading_state().await;
    assert_eq!(state.phase, Phase::UnifiedComplete);
    assert!(state.errors.is_empty());
    assert_eq!(state.rollbacks(), 0);
}

#[tokio::test]
async fn test_failed_validation_rolls_back_to_visible_items() {
    // a second cut of m0 shares its file, so the merge folds it away
    let mut local = local_items(3);
    local.push(MediaItem::local(
        "m0-dup",
        "Local Movie 0 (Extended)",
        "/media/movies/m0.mkv",
    ));
    let harness = HarnessBuilder::new(local, remote_items(5, 1)).build();
    let mut errors = harness.events.subscribe_to_kinds(vec!["loader.error"]);

    let visible = harness.loader.load().await.unwrap();
    assert_eq!(visible.len(), 4);
    harness.settle().await;

    let items = harness.loader.unified_items().await;
    assert_eq!(items.len(), 8);
    for original in &visible {
        assert!(items.contains(original), "{} was retracted", original.id);
    }
    assert!(items.iter().any(|i| i.id == "m0-dup"));
    assert_eq!(items.iter().filter(|i| i.id.starts_with('r')).count(), 4);

    let state = harness.loader.loading_state().await;
    assert_eq!(state.phase, Phase::UnifiedComplete);
    assert_eq!(state.mode, ConnectivityMode::Online);
    assert_eq!(state.errors.len(), 1);
    let error = &state.errors[0];
    assert!(error.rollback_performed);
    assert!(error.recoverable);
    assert_eq!(error.phase, Phase::Validating);
    assert_eq!(state.rollbacks(), 1);

    let event = errors.drain();
    assert_eq!(event.len(), 1);
    assert!(matches!(
        event[0].payload,
        LoaderEvent::Error {
            phase: Phase::Validating,
            persistent: false,
            ..
        }
    ));
}
