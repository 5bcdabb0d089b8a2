#[cfg(test)]
mod tests {
    use crate::reconciler::{CellState, ClientReconciler, ClientView, ReconcilePolicy};
    use crate::state::{FinalizeOutcome, GridKernel, ReserveOutcome, UnlockOutcome};
    use crate::types::{CellId, GridDims, GridSnapshot, Lock, SalePayload};

    const ME: &str = "me";

    fn snapshot_with_locks(locks: &[(u32, &str, u64)]) -> GridSnapshot {
        let mut snap = GridSnapshot::new();
        for (cell, owner, expires_at) in locks {
            snap.locks.insert(CellId(*cell), Lock::new(*owner, *expires_at));
        }
        snap
    }

    #[test]
    fn test_foreign_lock_adopted_from_snapshot() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_snapshot(&snapshot_with_locks(&[(1, "other", 60_000)]), 1_000);

        assert_eq!(rec.cell_state(CellId(1), 1_000), CellState::ReservedOther);
        assert_eq!(rec.cell_state(CellId(2), 1_000), CellState::Free);
    }

    #[test]
    fn test_vanished_foreign_lock_held_for_grace_window() {
        let policy = ReconcilePolicy { grace_window_ms: 5_000 };
        let mut rec = ClientReconciler::new(ME, policy);
        rec.apply_snapshot(&snapshot_with_locks(&[(1, "other", 60_000)]), 1_000);

        let empty = GridSnapshot::new();
        rec.apply_snapshot(&empty, 3_000);
        assert_eq!(rec.cell_state(CellId(1), 3_000), CellState::ReservedOther);

        // Still inside the window measured from the last sighting at 1_000
        rec.apply_snapshot(&empty, 5_999);
        assert_eq!(rec.cell_state(CellId(1), 5_999), CellState::ReservedOther);

        rec.apply_snapshot(&empty, 6_000);
        assert_eq!(rec.cell_state(CellId(1), 6_000), CellState::Free);
    }

    #[test]
    fn test_expired_foreign_lock_dropped_inside_grace_window() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_snapshot(&snapshot_with_locks(&[(1, "other", 2_000)]), 1_000);

        rec.apply_snapshot(&GridSnapshot::new(), 2_000);
        assert_eq!(rec.cell_state(CellId(1), 2_000), CellState::Free);
        assert!(rec.view().others.is_empty());
    }

    #[test]
    fn test_own_local_lock_survives_stale_snapshot() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_reserve(&ReserveOutcome {
            granted: vec![CellId(4)],
            conflicted: vec![],
            expires_at: 60_000,
        });

        // A snapshot read before our write landed
        rec.apply_snapshot(&GridSnapshot::new(), 1_000);
        assert_eq!(rec.cell_state(CellId(4), 1_000), CellState::ReservedMine);

        rec.apply_snapshot(&GridSnapshot::new(), 60_000);
        assert_eq!(rec.cell_state(CellId(4), 60_000), CellState::Free);
    }

    #[test]
    fn test_own_remote_lock_adopted() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_snapshot(&snapshot_with_locks(&[(8, ME, 60_000)]), 1_000);

        assert_eq!(rec.cell_state(CellId(8), 1_000), CellState::ReservedMine);
        assert_eq!(rec.view().held(1_000), vec![CellId(8)]);
    }

    #[test]
    fn test_sold_is_terminal_and_evicts_locks() {
        let dims = GridDims::default();
        let mut remote = snapshot_with_locks(&[(3, "other", 60_000)]);
        GridKernel::finalize(
            &mut remote,
            "other",
            &[CellId(3)],
            &SalePayload::new("x", "https://x/"),
            "r1",
            dims,
            1_000,
        );

        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_snapshot(&remote, 1_000);
        assert_eq!(rec.cell_state(CellId(3), 1_000), CellState::Sold);

        // A later snapshot that lost the sale does not un-sell the cell
        rec.apply_snapshot(&snapshot_with_locks(&[(3, "late", 90_000)]), 2_000);
        assert_eq!(rec.cell_state(CellId(3), 2_000), CellState::Sold);
        assert!(!rec.view().others.contains_key(&CellId(3)));
    }

    #[test]
    fn test_reserve_outcome_updates_view() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_snapshot(&snapshot_with_locks(&[(1, "other", 60_000)]), 1_000);

        rec.apply_reserve(&ReserveOutcome {
            granted: vec![CellId(2)],
            conflicted: vec![CellId(1)],
            expires_at: 30_000,
        });

        assert_eq!(rec.cell_state(CellId(1), 1_000), CellState::ReservedOther);
        assert_eq!(rec.cell_state(CellId(2), 1_000), CellState::ReservedMine);
        assert_eq!(rec.view().mine[&CellId(2)], Lock::new(ME, 30_000));
    }

    #[test]
    fn test_unlock_outcome_clears_mine() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_reserve(&ReserveOutcome {
            granted: vec![CellId(1), CellId(2)],
            conflicted: vec![],
            expires_at: 30_000,
        });

        rec.apply_unlock(
            &[CellId(1)],
            &UnlockOutcome {
                ok: true,
                released: vec![CellId(1)],
            },
        );

        assert_eq!(rec.view().held(1_000), vec![CellId(2)]);
    }

    #[test]
    fn test_stale_snapshot_does_not_revive_unlocked_cell() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_reserve(&ReserveOutcome {
            granted: vec![CellId(4)],
            conflicted: vec![],
            expires_at: 60_000,
        });
        rec.apply_unlock(
            &[CellId(4)],
            &UnlockOutcome {
                ok: true,
                released: vec![CellId(4)],
            },
        );

        // Read before the unlock landed
        let stale = snapshot_with_locks(&[(4, ME, 60_000)]);
        rec.apply_snapshot(&stale, 1_500);
        assert_eq!(rec.cell_state(CellId(4), 1_500), CellState::Free);
        assert!(rec.view().held(1_500).is_empty());

        rec.apply_snapshot(&stale, 2_500);
        assert_eq!(rec.cell_state(CellId(4), 2_500), CellState::Free);

        // Store caught up: the release is forgotten
        rec.apply_snapshot(&GridSnapshot::new(), 3_000);
        assert!(rec.view().released.is_empty());
    }

    #[test]
    fn test_newer_own_lock_adopted_after_unlock() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_reserve(&ReserveOutcome {
            granted: vec![CellId(4)],
            conflicted: vec![],
            expires_at: 60_000,
        });
        rec.apply_unlock(
            &[CellId(4)],
            &UnlockOutcome {
                ok: true,
                released: vec![CellId(4)],
            },
        );

        // Another tab of the same owner re-reserved with a later expiry
        rec.apply_snapshot(&snapshot_with_locks(&[(4, ME, 90_000)]), 2_000);
        assert_eq!(rec.cell_state(CellId(4), 2_000), CellState::ReservedMine);
        assert!(rec.view().released.is_empty());
    }

    #[test]
    fn test_merged_lists_live_locks_of_everyone() {
        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_reserve(&ReserveOutcome {
            granted: vec![CellId(1)],
            conflicted: vec![],
            expires_at: 10_000,
        });
        rec.apply_snapshot(
            &snapshot_with_locks(&[(1, ME, 10_000), (2, "other", 20_000), (3, "other", 1_500)]),
            1_000,
        );

        let merged = rec.view().merged(2_000);
        assert_eq!(merged.keys().copied().collect::<Vec<_>>(), vec![CellId(1), CellId(2)]);
        assert_eq!(merged[&CellId(1)].owner_id, ME);
        assert_eq!(merged[&CellId(2)].owner_id, "other");
    }

    #[test]
    fn test_finalize_outcome_marks_sold() {
        let mut snap = GridSnapshot::new();
        let outcome: FinalizeOutcome = GridKernel::finalize(
            &mut snap,
            ME,
            &[CellId(5)],
            &SalePayload::new("me", "https://me/"),
            "r9",
            GridDims::default(),
            1_000,
        );

        let mut rec = ClientReconciler::new(ME, ReconcilePolicy::default());
        rec.apply_reserve(&ReserveOutcome {
            granted: vec![CellId(5), CellId(6)],
            conflicted: vec![],
            expires_at: 30_000,
        });
        rec.apply_finalize(&FinalizeOutcome {
            taken: vec![CellId(6)],
            ..outcome
        });

        assert_eq!(rec.cell_state(CellId(5), 1_000), CellState::Sold);
        assert_eq!(rec.cell_state(CellId(6), 1_000), CellState::Free);
        assert_eq!(rec.view().sold[&CellId(5)].region_id, "r9");
    }

    #[test]
    fn test_merge_returns_new_value() {
        let view = ClientView::default();
        let next = view.merge_snapshot(ME, &snapshot_with_locks(&[(1, "other", 60_000)]), 1_000, ReconcilePolicy::default());

        assert!(view.others.is_empty());
        assert_eq!(next.others.len(), 1);
        assert_eq!(next.others[&CellId(1)].last_seen, 1_000);
    }
}
