#[cfg(test)]
mod tests {
    use crate::error::GridError;
    use crate::state::{CellVerdict, ConflictReason, GridKernel};
    use crate::types::{CellId, GridDims, GridSnapshot, Lock, Rect, SalePayload};

    fn cells(ids: &[u32]) -> Vec<CellId> {
        ids.iter().copied().map(CellId).collect()
    }

    fn payload() -> SalePayload {
        SalePayload::new("Ada", "https://example.com/")
    }

    #[test]
    fn test_evaluate_free_cell_grants() {
        let snap = GridSnapshot::new();
        assert_eq!(GridKernel::evaluate_cell(&snap, "a", CellId(7), 1000), CellVerdict::Grant);
    }

    #[test]
    fn test_evaluate_foreign_live_lock_conflicts() {
        let mut snap = GridSnapshot::new();
        snap.locks.insert(CellId(7), Lock::new("b", 5000));

        assert_eq!(
            GridKernel::evaluate_cell(&snap, "a", CellId(7), 1000),
            CellVerdict::Conflict(ConflictReason::LockedBy {
                owner_id: "b".to_string(),
                expires_at: 5000,
            })
        );
        // Expiry is exclusive: a lock expiring exactly now is gone
        assert_eq!(GridKernel::evaluate_cell(&snap, "a", CellId(7), 5000), CellVerdict::Grant);
    }

    #[test]
    fn test_reserve_partitions_and_sets_expiry() {
        let mut snap = GridSnapshot::new();
        snap.locks.insert(CellId(2), Lock::new("b", 9000));

        let outcome = GridKernel::reserve(&mut snap, "a", &cells(&[1, 2, 3]), 3000, 1000);

        assert_eq!(outcome.granted, cells(&[1, 3]));
        assert_eq!(outcome.conflicted, cells(&[2]));
        assert_eq!(outcome.expires_at, 4000);
        assert_eq!(snap.locks[&CellId(1)], Lock::new("a", 4000));
        assert_eq!(snap.locks[&CellId(2)].owner_id, "b");
    }

    #[test]
    fn test_reserve_same_owner_renews() {
        let mut snap = GridSnapshot::new();
        GridKernel::reserve(&mut snap, "a", &cells(&[1, 2]), 3000, 1000);
        let outcome = GridKernel::reserve(&mut snap, "a", &cells(&[1, 2]), 3000, 2500);

        assert_eq!(outcome.granted, cells(&[1, 2]));
        assert!(outcome.conflicted.is_empty());
        assert_eq!(snap.locks.len(), 2);
        assert_eq!(snap.locks[&CellId(1)].expires_at, 5500);
    }

    #[test]
    fn test_reserve_never_grants_sold_cell() {
        let mut snap = GridSnapshot::new();
        GridKernel::finalize(&mut snap, "a", &cells(&[5]), &payload(), "r1", GridDims::default(), 1000);

        let outcome = GridKernel::reserve(&mut snap, "a", &cells(&[5]), 3000, 2000);
        assert!(outcome.granted.is_empty());
        assert_eq!(outcome.conflicted, cells(&[5]));
        assert!(!snap.locks.contains_key(&CellId(5)));
    }

    #[test]
    fn test_unlock_only_touches_own_locks() {
        let mut snap = GridSnapshot::new();
        snap.locks.insert(CellId(1), Lock::new("a", 9000));
        snap.locks.insert(CellId(2), Lock::new("b", 9000));

        let outcome = GridKernel::unlock(&mut snap, "a", &cells(&[1, 2, 3]));

        assert!(outcome.ok);
        assert_eq!(outcome.released, cells(&[1]));
        assert!(snap.locks.contains_key(&CellId(2)));

        let again = GridKernel::unlock(&mut snap, "a", &cells(&[1]));
        assert!(again.ok);
        assert!(again.released.is_empty());
    }

    #[test]
    fn test_finalize_writes_shared_region() {
        let dims = GridDims::default();
        let mut snap = GridSnapshot::new();
        GridKernel::reserve(&mut snap, "a", &cells(&[0, 1, 101]), 3000, 1000);

        let outcome = GridKernel::finalize(&mut snap, "a", &cells(&[0, 1, 101]), &payload(), "r1", dims, 1500);

        assert_eq!(outcome.committed, cells(&[0, 1, 101]));
        assert!(outcome.taken.is_empty());
        assert!(!outcome.is_partial());
        assert_eq!(outcome.region_id.as_deref(), Some("r1"));
        assert!(snap.locks.is_empty());

        let rect = Rect { x: 0, y: 0, w: 2, h: 2 };
        for cell in cells(&[0, 1, 101]) {
            let record = &snap.sold[&cell];
            assert_eq!(record.rect, rect);
            assert_eq!(record.region_id, "r1");
            assert_eq!(record.created_at, 1500);
        }
        assert_eq!(snap.regions["r1"].rect, rect);
        assert!(snap.check_invariants(1500).is_ok());
    }

    #[test]
    fn test_finalize_reports_taken_cells() {
        let dims = GridDims::default();
        let mut snap = GridSnapshot::new();
        GridKernel::finalize(&mut snap, "b", &cells(&[1]), &payload(), "rb", dims, 1000);
        snap.locks.insert(CellId(2), Lock::new("c", 9000));

        let outcome = GridKernel::finalize(&mut snap, "a", &cells(&[1, 2, 3]), &payload(), "ra", dims, 2000);

        assert_eq!(outcome.committed, cells(&[3]));
        assert_eq!(outcome.taken, cells(&[1, 2]));
        assert!(outcome.is_partial());
        assert_eq!(snap.sold[&CellId(1)].owner_id, "b");
        assert_eq!(snap.locks[&CellId(2)].owner_id, "c");
    }

    #[test]
    fn test_finalize_all_taken_writes_nothing() {
        let dims = GridDims::default();
        let mut snap = GridSnapshot::new();
        GridKernel::finalize(&mut snap, "b", &cells(&[1]), &payload(), "rb", dims, 1000);
        let before = snap.clone();

        let outcome = GridKernel::finalize(&mut snap, "a", &cells(&[1]), &payload(), "ra", dims, 2000);

        assert!(outcome.committed.is_empty());
        assert!(outcome.region_id.is_none());
        assert_eq!(snap, before);
    }

    #[test]
    fn test_set_asset_url() {
        let mut snap = GridSnapshot::new();
        GridKernel::finalize(&mut snap, "a", &cells(&[1]), &payload(), "r1", GridDims::default(), 1000);

        assert_eq!(GridKernel::set_asset_url(&mut snap, "r1", "https://cdn.example/1.png"), Ok(true));
        assert_eq!(GridKernel::set_asset_url(&mut snap, "r1", "https://cdn.example/1.png"), Ok(false));
        assert_eq!(
            GridKernel::set_asset_url(&mut snap, "nope", "https://cdn.example/1.png"),
            Err(GridError::UnknownRegion("nope".to_string()))
        );
    }

    #[test]
    fn test_stats_counts_only_live_locks() {
        let dims = GridDims::new(10, 10);
        let mut snap = GridSnapshot::new();
        snap.locks.insert(CellId(1), Lock::new("a", 2000));
        snap.locks.insert(CellId(2), Lock::new("a", 500));
        GridKernel::finalize(&mut snap, "b", &cells(&[3, 4]), &payload(), "r", dims, 1000);

        let stats = snap.stats(dims, 1000);
        assert_eq!(stats.sold, 2);
        assert_eq!(stats.locked, 1);
        assert_eq!(stats.free, 97);
        assert_eq!(stats.regions, 1);
    }
}
