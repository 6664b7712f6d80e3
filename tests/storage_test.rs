//! Integration tests for the SQLite checkpoint store
//!
//! Exercises checkpoint sequencing, session listing, leases, and review
//! decisions against an in-memory SQLite database.

use ovn_triage::session::{Session, Stage};
use ovn_triage::storage::{CheckpointStore, ReviewChoice, ReviewDecision, SqliteStore};

/// Create an in-memory store instance for testing
async fn create_test_store() -> SqliteStore {
    SqliteStore::new_in_memory()
        .await
        .expect("Failed to create in-memory store")
}

fn test_session(id: &str) -> Session {
    Session::new(id, "pod web-1 cannot reach service api")
}

#[cfg(test)]
mod checkpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_save_assigns_sequential_seqs() {
        let store = create_test_store().await;
        let mut session = test_session("seq-session");

        assert_eq!(store.save(&session).await.unwrap(), 1);

        session.stage = Stage::Classify;
        assert_eq!(store.save(&session).await.unwrap(), 2);

        session.stage = Stage::Analyze;
        assert_eq!(store.save(&session).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_seqs_are_per_session() {
        let store = create_test_store().await;

        assert_eq!(store.save(&test_session("session-a")).await.unwrap(), 1);
        assert_eq!(store.save(&test_session("session-b")).await.unwrap(), 1);
        assert_eq!(store.save(&test_session("session-a")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_latest_returns_newest() {
        let store = create_test_store().await;
        let mut session = test_session("latest-session");

        store.save(&session).await.unwrap();
        session.stage = Stage::Classify;
        session.round = 2;
        store.save(&session).await.unwrap();

        let checkpoint = store
            .load_latest("latest-session")
            .await
            .unwrap()
            .expect("Checkpoint should exist");

        assert_eq!(checkpoint.seq, 2);
        assert_eq!(checkpoint.stage, Stage::Classify);
        assert_eq!(checkpoint.session.round, 2);
    }

    #[tokio::test]
    async fn test_load_latest_nonexistent_session() {
        let store = create_test_store().await;

        let result = store.load_latest("nonexistent-id").await.unwrap();

        assert!(result.is_none(), "Should return None for unknown session");
    }

    #[tokio::test]
    async fn test_load_checkpoint_by_seq() {
        let store = create_test_store().await;
        let mut session = test_session("by-seq-session");

        store.save(&session).await.unwrap();
        session.stage = Stage::Classify;
        store.save(&session).await.unwrap();

        let first = store
            .load_checkpoint("by-seq-session", 1)
            .await
            .unwrap()
            .expect("First checkpoint should exist");
        assert_eq!(first.stage, Stage::Collect);

        let missing = store.load_checkpoint("by-seq-session", 99).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_checkpoints_ordered_by_seq() {
        let store = create_test_store().await;
        let mut session = test_session("history-session");

        store.save(&session).await.unwrap();
        session.stage = Stage::Classify;
        store.save(&session).await.unwrap();
        session.stage = Stage::Analyze;
        store.save(&session).await.unwrap();

        let metas = store.list_checkpoints("history-session").await.unwrap();

        assert_eq!(metas.len(), 3);
        assert_eq!(metas[0].seq, 1);
        assert_eq!(metas[0].stage, Stage::Collect);
        assert_eq!(metas[2].seq, 3);
        assert_eq!(metas[2].stage, Stage::Analyze);
    }

    #[tokio::test]
    async fn test_snapshot_preserves_session_state() {
        let store = create_test_store().await;
        let mut session = test_session("snapshot-session");
        session.round = 4;
        session.context_notes.push("check the cni pods".to_string());
        session.conclusion = Some("tunnel interface missing".to_string());

        store.save(&session).await.unwrap();

        let restored = store
            .load_latest("snapshot-session")
            .await
            .unwrap()
            .unwrap()
            .session;

        assert_eq!(restored.id, session.id);
        assert_eq!(restored.round, 4);
        assert_eq!(restored.context_notes, session.context_notes);
        assert_eq!(restored.conclusion, session.conclusion);
    }

    #[tokio::test]
    async fn test_concurrent_saves_never_collide() {
        let store = create_test_store().await;

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.save(&test_session("contended")).await })
            })
            .collect();

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap().unwrap());
        }
        seqs.sort_unstable();

        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }
}

#[cfg(test)]
mod persistence_tests {
    use super::*;
    use ovn_triage::config::DatabaseConfig;

    #[tokio::test]
    async fn test_checkpoints_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("triage.db"),
            max_connections: 2,
        };

        {
            let store = SqliteStore::new(&config).await.unwrap();
            let mut session = test_session("durable-session");
            session.stage = Stage::Analyze;
            store.save(&session).await.unwrap();
        }

        let reopened = SqliteStore::new(&config).await.unwrap();
        let checkpoint = reopened
            .load_latest("durable-session")
            .await
            .unwrap()
            .expect("Checkpoint should survive reopening the database");

        assert_eq!(checkpoint.stage, Stage::Analyze);
    }

    #[tokio::test]
    async fn test_new_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("nested/data/triage.db"),
            max_connections: 1,
        };

        let store = SqliteStore::new(&config).await;

        assert!(store.is_ok(), "Missing parent directories should be created");
    }
}

#[cfg(test)]
mod session_listing_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_sessions_empty() {
        let store = create_test_store().await;

        let sessions = store.list_sessions().await.unwrap();

        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_reports_status() {
        let store = create_test_store().await;

        let running = test_session("running-session");
        store.save(&running).await.unwrap();

        let mut finished = test_session("finished-session");
        finished.stage = Stage::Done;
        store.save(&finished).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);

        let running_row = sessions.iter().find(|s| s.id == "running-session").unwrap();
        assert_eq!(running_row.status, "running");
        assert_eq!(running_row.stage, Stage::Collect);

        let finished_row = sessions.iter().find(|s| s.id == "finished-session").unwrap();
        assert_eq!(finished_row.status, "completed");
    }

    #[tokio::test]
    async fn test_list_sessions_tracks_latest_stage() {
        let store = create_test_store().await;
        let mut session = test_session("moving-session");

        store.save(&session).await.unwrap();
        session.stage = Stage::HumanReview;
        store.save(&session).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();

        assert_eq!(sessions.len(), 1, "Re-saves should update, not duplicate");
        assert_eq!(sessions[0].stage, Stage::HumanReview);
    }
}

#[cfg(test)]
mod lease_tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_free_lease() {
        let store = create_test_store().await;

        let acquired = store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap();

        assert!(acquired);
    }

    #[tokio::test]
    async fn test_acquire_held_lease_fails() {
        let store = create_test_store().await;

        assert!(store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap());

        let second = store.acquire_lease("lease-session", "holder-b", 60_000).await.unwrap();

        assert!(!second, "A live foreign lease must not be stolen");
    }

    #[tokio::test]
    async fn test_reacquire_own_lease() {
        let store = create_test_store().await;

        assert!(store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap());
        assert!(
            store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap(),
            "The current holder may re-acquire its own lease"
        );
    }

    #[tokio::test]
    async fn test_acquire_expired_lease() {
        let store = create_test_store().await;

        assert!(store.acquire_lease("lease-session", "holder-a", 1).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let taken = store.acquire_lease("lease-session", "holder-b", 60_000).await.unwrap();

        assert!(taken, "An expired lease is free for the taking");
    }

    #[tokio::test]
    async fn test_refresh_own_lease() {
        let store = create_test_store().await;

        store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap();

        let refreshed = store.refresh_lease("lease-session", "holder-a", 60_000).await.unwrap();

        assert!(refreshed);
    }

    #[tokio::test]
    async fn test_refresh_foreign_lease_fails() {
        let store = create_test_store().await;

        store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap();

        let refreshed = store.refresh_lease("lease-session", "holder-b", 60_000).await.unwrap();

        assert!(!refreshed, "Only the holder may refresh a lease");
    }

    #[tokio::test]
    async fn test_refresh_missing_lease_fails() {
        let store = create_test_store().await;

        let refreshed = store.refresh_lease("lease-session", "holder-a", 60_000).await.unwrap();

        assert!(!refreshed);
    }

    #[tokio::test]
    async fn test_release_then_reacquire() {
        let store = create_test_store().await;

        store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap();
        store.release_lease("lease-session", "holder-a").await.unwrap();

        let taken = store.acquire_lease("lease-session", "holder-b", 60_000).await.unwrap();

        assert!(taken, "A released lease is immediately available");
    }

    #[tokio::test]
    async fn test_release_foreign_lease_is_noop() {
        let store = create_test_store().await;

        store.acquire_lease("lease-session", "holder-a", 60_000).await.unwrap();
        store.release_lease("lease-session", "holder-b").await.unwrap();

        let stolen = store.acquire_lease("lease-session", "holder-b", 60_000).await.unwrap();

        assert!(!stolen, "Releasing someone else's lease must not free it");
    }

    #[tokio::test]
    async fn test_leases_are_per_session() {
        let store = create_test_store().await;

        assert!(store.acquire_lease("session-a", "holder-a", 60_000).await.unwrap());
        assert!(
            store.acquire_lease("session-b", "holder-b", 60_000).await.unwrap(),
            "Leases on different sessions are independent"
        );
    }
}

#[cfg(test)]
mod review_tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_load_review() {
        let store = create_test_store().await;

        let decision = ReviewDecision::new("review-session", ReviewChoice::Approved, None);
        store.record_review(&decision).await.unwrap();

        let loaded = store
            .load_review("review-session")
            .await
            .unwrap()
            .expect("Decision should be stored");

        assert_eq!(loaded.session_id, "review-session");
        assert_eq!(loaded.decision, ReviewChoice::Approved);
        assert!(loaded.note.is_none());
    }

    #[tokio::test]
    async fn test_load_review_missing() {
        let store = create_test_store().await;

        let result = store.load_review("review-session").await.unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_record_overwrites_previous_decision() {
        let store = create_test_store().await;

        let first = ReviewDecision::new("review-session", ReviewChoice::Approved, None);
        store.record_review(&first).await.unwrap();

        let second = ReviewDecision::new(
            "review-session",
            ReviewChoice::Rejected,
            Some("more-evidence: check the tunnel first".to_string()),
        );
        store.record_review(&second).await.unwrap();

        let loaded = store.load_review("review-session").await.unwrap().unwrap();

        assert_eq!(loaded.decision, ReviewChoice::Rejected);
        assert!(loaded.wants_more_evidence());
    }

    #[tokio::test]
    async fn test_clear_review() {
        let store = create_test_store().await;

        let decision = ReviewDecision::new("review-session", ReviewChoice::Rejected, None);
        store.record_review(&decision).await.unwrap();
        store.clear_review("review-session").await.unwrap();

        let result = store.load_review("review-session").await.unwrap();

        assert!(result.is_none(), "Cleared decision should not reappear");
    }
}
