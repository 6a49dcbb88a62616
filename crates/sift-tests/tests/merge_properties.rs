//! Merge-order and ledger properties.

use std::sync::Arc;

use proptest::prelude::*;

use sift_core::schema::{self, ScanBounds};
use sift_core::types::{Address, ClusterId, Hash256};
use sift_store::{
    ClusterAddressService, ClusterBalanceLedger, DeltaAppend, Store, WriteBatchService,
};
use sift_tests::helpers::*;

struct Services {
    store: Arc<Store>,
    addresses: ClusterAddressService,
    ledger: ClusterBalanceLedger,
    batch: WriteBatchService,
    _dir: tempfile::TempDir,
}

fn services() -> Services {
    let (store, dir) = temp_store();
    Services {
        addresses: ClusterAddressService::new(store.clone()),
        ledger: ClusterBalanceLedger::new(store.clone()),
        batch: WriteBatchService::new(store.clone(), 1024, 256).unwrap(),
        store,
        _dir: dir,
    }
}

fn cid(h: u64) -> ClusterId {
    ClusterId::new(h, 0, 0)
}

fn delta(height: u64, amount: i128) -> DeltaAppend {
    DeltaAppend {
        txid: Hash256::digest(&height.to_le_bytes()),
        height,
        tx_index: 0,
        delta: amount,
    }
}

/// Seed four singleton clusters with distinct histories.
fn seed(services: &mut Services) {
    for (i, seed) in (1u8..=4).enumerate() {
        let id = cid(i as u64);
        services
            .addresses
            .create_cluster(&mut services.batch, id, &[addr(seed)])
            .unwrap();
        services.batch.commit().unwrap();
        // One deposit per cluster at a unique height past the creations.
        services
            .ledger
            .append_block_deltas(
                &mut services.batch,
                id,
                &[delta(10 + i as u64, 100 * (i as i128 + 1))],
            )
            .unwrap();
        services.batch.commit().unwrap();
    }
}

fn membership(store: &Store, cluster: ClusterId) -> Vec<(u64, Address)> {
    store
        .scan(&ScanBounds::key_prefix(&schema::cluster_prefix(
            schema::P_MEMBERSHIP,
            cluster,
        )))
        .unwrap()
        .into_iter()
        .map(|(key, _)| {
            let (_, balance, address) = schema::parse_membership_key(&key).unwrap();
            (balance, address)
        })
        .collect()
}

/// Merging {A,B} into T then {C} equals merging {A,B,C} at once.
#[test]
fn merge_is_associative() {
    let target = cid(0);
    let (a, b, c) = (cid(1), cid(2), cid(3));

    let mut stepwise = services();
    seed(&mut stepwise);
    stepwise
        .addresses
        .merge_addresses(&mut stepwise.batch, target, &[a, b], &[])
        .unwrap();
    stepwise
        .ledger
        .merge_ledgers(&mut stepwise.batch, target, &[a, b])
        .unwrap();
    stepwise.batch.commit().unwrap();
    stepwise
        .addresses
        .merge_addresses(&mut stepwise.batch, target, &[c], &[])
        .unwrap();
    stepwise
        .ledger
        .merge_ledgers(&mut stepwise.batch, target, &[c])
        .unwrap();
    stepwise.batch.commit().unwrap();

    let mut oneshot = services();
    seed(&mut oneshot);
    oneshot
        .addresses
        .merge_addresses(&mut oneshot.batch, target, &[a, b, c], &[])
        .unwrap();
    oneshot
        .ledger
        .merge_ledgers(&mut oneshot.batch, target, &[a, b, c])
        .unwrap();
    oneshot.batch.commit().unwrap();

    assert_eq!(
        stepwise.ledger.read_ledger(target).unwrap(),
        oneshot.ledger.read_ledger(target).unwrap()
    );
    assert_eq!(
        membership(&stepwise.store, target),
        membership(&oneshot.store, target)
    );
    assert_eq!(
        stepwise.store.cluster_balance(target).unwrap(),
        oneshot.store.cluster_balance(target).unwrap()
    );
    assert_eq!(
        stepwise.store.member_count(target).unwrap(),
        oneshot.store.member_count(target).unwrap()
    );
    for source in [a, b, c] {
        assert!(stepwise.ledger.read_ledger(source).unwrap().is_empty());
        assert!(oneshot.ledger.read_ledger(source).unwrap().is_empty());
    }
}

/// For every cluster: dense sequences, (height, txIndex) strictly
/// ascending, and balance_after consistent with the running delta sum.
fn assert_ledger_invariant(store: &Store, ledger: &ClusterBalanceLedger, cluster: ClusterId) {
    let entries = ledger.read_ledger(cluster).unwrap();
    assert_eq!(entries.len() as u64, store.ledger_count(cluster).unwrap());
    for pair in entries.windows(2) {
        assert!((pair[0].height, pair[0].tx_index) < (pair[1].height, pair[1].tx_index));
    }
    if let Some(last) = entries.last() {
        assert_eq!(last.balance_after, store.cluster_balance(cluster).unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Random reward blocks followed by one joint spend: value is
    /// conserved, the spenders share a cluster, and every ledger holds
    /// its invariant.
    #[test]
    fn joint_spend_conserves_value(
        rewards in proptest::collection::vec(1u64..1_000, 2..6),
        spend_fraction in 1u64..100,
    ) {
        let (store, _dir) = temp_store();
        let mut imp = importer(store.clone());

        let mut chain = Vec::new();
        for (i, value) in rewards.iter().enumerate() {
            chain.push(block(i as u64, vec![reward(i as u8 + 1, *value)]));
        }
        // Each funded address spends part of its reward to one sink.
        let spends: Vec<_> = rewards
            .iter()
            .enumerate()
            .map(|(i, value)| coin(i as u8 + 1, value * spend_fraction / 100))
            .collect();
        let spent: u64 = spends.iter().map(|c| c.value).sum();
        let sink = coin(200, spent);
        chain.push(block(rewards.len() as u64, vec![tx(99, spends, vec![sink])]));
        import_chain(&mut imp, &chain);

        let total: u64 = rewards.iter().sum();
        let ledger = ClusterBalanceLedger::new(store.clone());
        let queries = sift_store::ClusterQueries::new(store.clone());

        // All spenders resolve to one cluster.
        let first = queries.address_cluster(&addr(1)).unwrap().unwrap();
        for i in 2..=rewards.len() {
            prop_assert_eq!(queries.address_cluster(&addr(i as u8)).unwrap(), Some(first));
        }

        // Value conservation across every live cluster.
        let held: u64 = queries
            .top_clusters(usize::MAX)
            .unwrap()
            .into_iter()
            .map(|(_, balance)| balance)
            .sum();
        prop_assert_eq!(held, total);

        for (id, _) in queries.top_clusters(usize::MAX).unwrap() {
            assert_ledger_invariant(&store, &ledger, id);
        }
    }
}
