//! End-to-end indexing scenarios against a scripted chain and the in-memory
//! store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolEvent;

use shareindex_core::error::IndexerError;
use shareindex_core::indexer::IndexerStatus;
use shareindex_core::types::{EventKind, TxKind};
use shareindex_core::{IndexStore, StoreTx};
use shareindex_evm::abi::{
    topic0, CorporateActionRecorded, Issued, SplitExecuted, TokenLinked, Transfer,
};
use shareindex_evm::pipeline::Pipeline;
use shareindex_evm::{RawLog, RawStore, ShareIndexer};
use shareindex_storage::InMemoryStorage;

use common::*;

type Indexer = ShareIndexer<MockChain, InMemoryStorage>;

fn indexer(chain: &MockChain) -> (Indexer, Arc<InMemoryStorage>) {
    let store = Arc::new(InMemoryStorage::new());
    let indexer = builder().build(chain.clone(), store.clone(), contracts()).unwrap();
    (indexer, store)
}

fn issued(to: Address, amount: u64, block: u64, index: u64) -> RawLog {
    log_of(TOKEN, &Issued { to, amount: U256::from(amount) }, block, index)
}

fn transfer(from: Address, to: Address, value: u64, block: u64, index: u64) -> RawLog {
    log_of(TOKEN, &Transfer { from, to, value: U256::from(value) }, block, index)
}

fn split(old: u64, new: u64, block: u64, index: u64) -> RawLog {
    log_of(
        TOKEN,
        &SplitExecuted {
            oldMultiplier: mult(old),
            newMultiplier: mult(new),
            blockNumber: U256::from(block),
        },
        block,
        index,
    )
}

// ─── Balances ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn mint_transfer_split() {
    let chain = MockChain::new(10);
    chain.push(log_of(REGISTRY, &TokenLinked { token: TOKEN }, 1, 0));
    chain.push(issued(ALICE, 100, 2, 0));
    // ERC-20 style mint mirror; booked by the Issued event above.
    chain.push(transfer(Address::ZERO, ALICE, 100, 2, 1));
    chain.push(transfer(ALICE, BOB, 30, 3, 0));
    chain.push(split(1, 2, 4, 0));
    chain.set_balance(ALICE, 70);
    chain.set_balance(BOB, 30);
    chain.set_multiplier(mult(2));

    let (indexer, store) = indexer(&chain);
    indexer.start().await.unwrap();
    assert_eq!(indexer.status(), IndexerStatus::Live);
    assert!(indexer.is_healthy());

    let alice = store.balance(&key(ALICE)).await.unwrap().unwrap();
    assert_eq!(alice.balance, U256::from(70));
    assert_eq!(alice.effective_balance, U256::from(140));
    assert_eq!(alice.last_updated_block, 4);

    let bob = store.balance(&key(BOB)).await.unwrap().unwrap();
    assert_eq!(bob.balance, U256::from(30));
    assert_eq!(bob.effective_balance, U256::from(60));

    let txs = store.transactions().await.unwrap();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].kind, TxKind::Issued);
    assert_eq!(txs[0].from, None);
    assert_eq!(txs[1].kind, TxKind::Transfer);
    assert_eq!(txs[1].from.as_deref(), Some(key(ALICE).as_str()));
    assert_eq!(txs[1].amount, U256::from(30));

    assert_eq!(store.raw_events().await.unwrap().len(), 5);
    assert_eq!(store.balances().await.unwrap().len(), 2);
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(10));

    indexer.stop().await.unwrap();
}

#[tokio::test]
async fn splits_are_not_cumulative() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 10, 1, 0));
    chain.push(split(1, 2, 2, 0));
    chain.push(split(2, 3, 3, 0));
    chain.set_balance(ALICE, 10);
    chain.set_multiplier(mult(3));

    let (indexer, store) = indexer(&chain);
    indexer.rescan(0, None).await.unwrap();

    let alice = store.balance(&key(ALICE)).await.unwrap().unwrap();
    assert_eq!(alice.effective_balance, U256::from(30));
    assert_eq!(alice.last_updated_block, 3);
}

#[tokio::test]
async fn burn_never_creates_a_zero_address_row() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 1, 0));
    chain.push(transfer(ALICE, Address::ZERO, 40, 2, 0));
    chain.set_balance(ALICE, 60);

    let (indexer, store) = indexer(&chain);
    indexer.rescan(0, None).await.unwrap();

    let rows = store.balances().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].address, key(ALICE));
    assert_eq!(rows[0].balance, U256::from(60));
    assert_eq!(store.transactions().await.unwrap().len(), 2);
}

// Whether an emptied holder keeps its row is unsettled; today the row stays
// with a zero balance.
#[tokio::test]
async fn holder_who_transfers_everything_keeps_a_zero_row() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 1, 0));
    chain.push(transfer(ALICE, BOB, 100, 2, 0));
    chain.set_balance(BOB, 100);

    let (indexer, store) = indexer(&chain);
    indexer.rescan(0, None).await.unwrap();

    let alice = store.balance(&key(ALICE)).await.unwrap().unwrap();
    assert_eq!(alice.balance, U256::ZERO);
    assert_eq!(alice.effective_balance, U256::ZERO);
}

// ─── Corporate actions ────────────────────────────────────────────────────────

#[tokio::test]
async fn corporate_action_is_read_from_registry() {
    let chain = MockChain::new(10);
    chain.state().actions.insert(
        U256::from(7),
        ("DIVIDEND".to_string(), vec![0xde, 0xad], U256::from(4)),
    );
    let recorded = CorporateActionRecorded {
        actionId: U256::from(7),
        actionType: "DIVIDEND".into(),
        blockNumber: U256::from(4),
    };
    chain.push(log_of(REGISTRY, &recorded, 4, 2));

    let (indexer, store) = indexer(&chain);
    indexer.rescan(0, None).await.unwrap();

    let actions = store.corporate_actions().await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action_id, "7");
    assert_eq!(actions[0].action_kind, "DIVIDEND");
    assert_eq!(actions[0].payload, "0xdead");
    assert_eq!(actions[0].key(), (4, 2));
}

#[tokio::test]
async fn failed_action_lookup_skips_only_that_event() {
    let chain = MockChain::new(10);
    let recorded = CorporateActionRecorded {
        actionId: U256::from(8),
        actionType: "BUYBACK".into(),
        blockNumber: U256::from(3),
    };
    chain.push(log_of(REGISTRY, &recorded, 3, 0));
    chain.push(issued(ALICE, 5, 3, 1));
    chain.set_balance(ALICE, 5);

    let (indexer, store) = indexer(&chain);
    let report = indexer.rescan(0, None).await.unwrap();

    assert_eq!(report.logs, 2);
    assert!(store.corporate_actions().await.unwrap().is_empty());
    assert_eq!(store.raw_events().await.unwrap().len(), 2);
    assert_eq!(store.transactions().await.unwrap().len(), 1);
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(10));
}

// ─── Dedup, replay and ordering ───────────────────────────────────────────────

#[tokio::test]
async fn duplicate_delivery_is_applied_once() {
    let chain = MockChain::new(5);
    let first = issued(ALICE, 100, 5, 0);
    chain.push(first.clone());
    chain.set_balance(ALICE, 100);

    let (indexer, store) = indexer(&chain);
    indexer.start().await.unwrap();

    // Catch-up already stored it; the subscription delivers it again.
    chain.redeliver(&first);
    chain.set_balance(BOB, 1);
    chain.emit(issued(BOB, 1, 6, 0));

    let s = &store;
    assert!(eventually(move || async move { s.balance(&key(BOB)).await.unwrap().is_some() }).await);

    assert_eq!(store.raw_events().await.unwrap().len(), 2);
    assert_eq!(store.transactions().await.unwrap().len(), 2);
    indexer.stop().await.unwrap();
}

#[tokio::test]
async fn rescan_is_idempotent() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 1, 0));
    chain.push(transfer(ALICE, BOB, 30, 2, 0));
    chain.push(split(1, 2, 3, 0));
    chain.set_balance(ALICE, 70);
    chain.set_balance(BOB, 30);
    chain.set_multiplier(mult(2));

    let (indexer, store) = indexer(&chain);
    indexer.start().await.unwrap();
    indexer.stop().await.unwrap();

    let raw = store.raw_events().await.unwrap();
    let txs = store.transactions().await.unwrap();
    let balances = store.balances().await.unwrap();

    let report = indexer.rescan(0, None).await.unwrap();
    assert_eq!(report.logs, 3);

    assert_eq!(store.raw_events().await.unwrap(), raw);
    assert_eq!(store.transactions().await.unwrap(), txs);
    assert_eq!(store.balances().await.unwrap(), balances);
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(10));
}

#[tokio::test]
async fn batch_is_applied_in_log_order() {
    let chain = MockChain::new(10);
    chain.set_balance(ALICE, 100);
    let store = Arc::new(InMemoryStorage::new());
    let config = builder().build_config().unwrap();
    let pipeline = Pipeline::new(config, chain.clone(), store.clone(), contracts());

    let logs = vec![
        transfer(ALICE, BOB, 1, 3, 1),
        issued(ALICE, 100, 2, 4),
        transfer(ALICE, BOB, 2, 3, 0),
        issued(ALICE, 100, 2, 1),
    ];
    let outcome = pipeline.committer.commit(&logs, RawStore::Persist).await.unwrap();

    assert_eq!(outcome.applied, vec![(2, 1), (2, 4), (3, 0), (3, 1)]);
    assert_eq!(outcome.highest_block, Some(3));
    let keys: Vec<_> = store.raw_events().await.unwrap().iter().map(|e| e.key()).collect();
    assert_eq!(keys, outcome.applied);
}

#[tokio::test]
async fn prestored_raw_events_only_run_handlers() {
    let chain = MockChain::new(10);
    chain.set_balance(ALICE, 100);
    let store = Arc::new(InMemoryStorage::new());
    let config = builder().build_config().unwrap();
    let pipeline = Pipeline::new(config, chain.clone(), store.clone(), contracts());

    let log = issued(ALICE, 100, 2, 0);
    let mut tx = store.begin().await.unwrap();
    tx.insert_raw_event(&log.to_raw_event(EventKind::Issued).unwrap())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let outcome = pipeline
        .committer
        .commit(&[log], RawStore::AlreadyStored)
        .await
        .unwrap();

    assert_eq!(outcome.inserted_raw, 0);
    assert_eq!(store.raw_events().await.unwrap().len(), 1);
    assert_eq!(store.transactions().await.unwrap().len(), 1);
    assert!(store.balance(&key(ALICE)).await.unwrap().is_some());
}

#[tokio::test]
async fn unknown_events_write_nothing() {
    let chain = MockChain::new(10);
    let store = Arc::new(InMemoryStorage::new());
    let config = builder().build_config().unwrap();
    let pipeline = Pipeline::new(config, chain.clone(), store.clone(), contracts());

    // A token event from an untracked contract, and a registry log with a
    // topic nobody emits.
    let stray_event = Issued { to: ALICE, amount: U256::from(1) };
    let stray = log_of(Address::repeat_byte(0x01), &stray_event, 2, 0);
    let mut unknown = log_of(REGISTRY, &TokenLinked { token: TOKEN }, 2, 1);
    unknown.topics[0] = format!("0x{}", "42".repeat(32));

    let outcome = pipeline
        .committer
        .commit(&[stray, unknown], RawStore::Persist)
        .await
        .unwrap();

    assert_eq!(outcome.decoded, 0);
    assert_eq!(outcome.dropped, 2);
    assert!(store.raw_events().await.unwrap().is_empty());
    assert!(store.transactions().await.unwrap().is_empty());
    assert!(store.balances().await.unwrap().is_empty());
}

// ─── Failure handling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_batch_leaves_no_trace() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 3, 0));
    chain.set_balance(ALICE, 100);
    chain.state().failing_balance_reads = u32::MAX;

    let (indexer, store) = indexer(&chain);
    let err = indexer.start().await.unwrap_err();

    assert!(matches!(err, IndexerError::Transport(_)));
    assert_eq!(indexer.status(), IndexerStatus::Failed);
    assert!(!indexer.is_healthy());
    assert_eq!(indexer.last_indexed_block().await.unwrap(), None);
    assert!(store.raw_events().await.unwrap().is_empty());
    assert!(store.transactions().await.unwrap().is_empty());
    assert!(store.balances().await.unwrap().is_empty());
    assert_eq!(chain.state().subscribe_calls, 0);
}

#[tokio::test]
async fn transient_read_failure_is_retried() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 3, 0));
    chain.set_balance(ALICE, 100);
    chain.state().failing_balance_reads = 1;

    let (indexer, store) = indexer(&chain);
    indexer.rescan(0, None).await.unwrap();

    let alice = store.balance(&key(ALICE)).await.unwrap().unwrap();
    assert_eq!(alice.balance, U256::from(100));
}

#[tokio::test]
async fn failed_pair_holds_the_checkpoint() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 3, 0));
    chain.push(split(1, 2, 4, 0));
    chain.set_balance(ALICE, 100);
    chain.state().failing_topics.insert(topic0(EventKind::SplitExecuted));

    let (indexer, store) = indexer(&chain);
    let report = indexer.rescan(0, None).await.unwrap();

    assert_eq!(report.failed_pairs, 1);
    assert_eq!(store.transactions().await.unwrap().len(), 1);
    assert_eq!(indexer.last_indexed_block().await.unwrap(), None);
}

#[tokio::test]
async fn skipped_split_leaves_every_holder_on_the_old_multiplier() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 10, 1, 0));
    chain.push(issued(BOB, 1, 2, 0));
    chain.set_balance(ALICE, 10);
    chain.state().balances.insert(BOB, U256::MAX);

    let (indexer, store) = indexer(&chain);
    indexer.rescan(0, Some(2)).await.unwrap();

    // At 2x bob's effective balance no longer fits in 256 bits.
    chain.set_multiplier(mult(2));
    chain.push(split(1, 2, 3, 0));
    indexer.rescan(3, None).await.unwrap();

    let alice = store.balance(&key(ALICE)).await.unwrap().unwrap();
    assert_eq!(alice.effective_balance, U256::from(10));
    assert_eq!(alice.last_updated_block, 1);
    let bob = store.balance(&key(BOB)).await.unwrap().unwrap();
    assert_eq!(bob.effective_balance, U256::MAX);
    assert_eq!(bob.last_updated_block, 2);
    assert_eq!(store.raw_events().await.unwrap().len(), 3);
}

#[tokio::test]
async fn skipped_issue_writes_no_transaction_row() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 5, 2, 0));
    chain.push(issued(BOB, 5, 3, 0));
    chain.state().balances.insert(ALICE, U256::MAX);
    chain.set_balance(BOB, 5);
    chain.set_multiplier(mult(2));

    let (indexer, store) = indexer(&chain);
    indexer.rescan(0, None).await.unwrap();

    let txs = store.transactions().await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].to, key(BOB));
    assert!(store.balance(&key(ALICE)).await.unwrap().is_none());
    assert_eq!(store.raw_events().await.unwrap().len(), 2);
}

// ─── Checkpointing ────────────────────────────────────────────────────────────

#[tokio::test]
async fn catch_up_stops_at_confirmation_depth() {
    let chain = MockChain::new(20);
    chain.push(issued(ALICE, 1, 17, 0));
    chain.push(issued(BOB, 1, 18, 0));
    chain.set_balance(ALICE, 1);
    chain.set_balance(BOB, 1);

    let store = Arc::new(InMemoryStorage::new());
    let indexer = builder()
        .confirmation_depth(3)
        .build(chain.clone(), store.clone(), contracts())
        .unwrap();
    indexer.start().await.unwrap();

    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(17));
    let blocks: Vec<_> = store.raw_events().await.unwrap().iter().map(|e| e.block_number).collect();
    assert_eq!(blocks, vec![17]);
    assert!(store.balance(&key(BOB)).await.unwrap().is_none());
    indexer.stop().await.unwrap();
}

#[tokio::test]
async fn resumes_after_checkpoint() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 4, 0));
    chain.set_balance(ALICE, 100);

    let store = Arc::new(InMemoryStorage::new());
    let first = builder().build(chain.clone(), store.clone(), contracts()).unwrap();
    first.start().await.unwrap();
    first.stop().await.unwrap();
    assert_eq!(first.last_indexed_block().await.unwrap(), Some(10));

    // Logs at or below the checkpoint are not fetched again.
    chain.push(issued(BOB, 5, 9, 0));
    chain.push(issued(BOB, 5, 12, 0));
    chain.set_balance(BOB, 5);
    chain.set_head(15);

    let second = builder().build(chain.clone(), store.clone(), contracts()).unwrap();
    second.start().await.unwrap();
    second.stop().await.unwrap();

    let blocks: Vec<_> = store.raw_events().await.unwrap().iter().map(|e| e.block_number).collect();
    assert_eq!(blocks, vec![4, 12]);
    assert_eq!(second.last_indexed_block().await.unwrap(), Some(15));
}

#[tokio::test]
async fn block_split_across_batches_is_not_checkpointed_early() {
    let chain = MockChain::new(3);
    chain.push(issued(ALICE, 1, 2, 0));
    chain.push(issued(ALICE, 1, 2, 1));
    chain.push(issued(ALICE, 1, 3, 0));
    chain.set_balance(ALICE, 3);

    let store = Arc::new(InMemoryStorage::new());
    let indexer = builder()
        .batch_size(1)
        .build(chain.clone(), store.clone(), contracts())
        .unwrap();
    let report = indexer.rescan(0, None).await.unwrap();

    assert_eq!(report.batches, 3);
    assert_eq!(store.raw_events().await.unwrap().len(), 3);
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(3));
}

#[tokio::test]
async fn live_mode_advances_checkpoint_on_tick() {
    let chain = MockChain::new(10);
    let store = Arc::new(InMemoryStorage::new());
    let indexer = builder()
        .checkpoint_interval(Duration::from_millis(20))
        .build(chain.clone(), store.clone(), contracts())
        .unwrap();
    indexer.start().await.unwrap();
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(10));

    chain.set_head(25);
    let ix = &indexer;
    assert!(eventually(move || async move {
        ix.last_indexed_block().await.unwrap() == Some(25)
    })
    .await);

    indexer.stop().await.unwrap();
}

#[tokio::test]
async fn unconfirmed_tail_is_indexed_once_live() {
    let chain = MockChain::new(20);
    chain.push(issued(ALICE, 7, 19, 0));
    chain.set_balance(ALICE, 7);

    let store = Arc::new(InMemoryStorage::new());
    let indexer = builder()
        .confirmation_depth(3)
        .checkpoint_interval(Duration::from_millis(20))
        .build(chain.clone(), store.clone(), contracts())
        .unwrap();
    indexer.start().await.unwrap();
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(17));
    assert!(store.raw_events().await.unwrap().is_empty());

    // Block 19 was mined before the subscriptions opened; only the tick can
    // pick it up once it is confirmed.
    chain.set_head(30);
    let ix = &indexer;
    assert!(eventually(move || async move {
        ix.last_indexed_block().await.unwrap() == Some(27)
    })
    .await);

    let blocks: Vec<_> = store.raw_events().await.unwrap().iter().map(|e| e.block_number).collect();
    assert_eq!(blocks, vec![19]);
    let alice = store.balance(&key(ALICE)).await.unwrap().unwrap();
    assert_eq!(alice.balance, U256::from(7));
    indexer.stop().await.unwrap();
}

#[tokio::test]
async fn live_tick_refetches_range_held_by_failed_pair() {
    let chain = MockChain::new(10);
    chain.push(issued(ALICE, 100, 3, 0));
    chain.push(split(1, 2, 4, 0));
    chain.set_balance(ALICE, 100);
    chain.set_multiplier(mult(2));
    chain.state().failing_topics.insert(topic0(EventKind::SplitExecuted));

    let store = Arc::new(InMemoryStorage::new());
    let indexer = builder()
        .checkpoint_interval(Duration::from_millis(20))
        .build(chain.clone(), store.clone(), contracts())
        .unwrap();
    indexer.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(indexer.last_indexed_block().await.unwrap(), None);
    assert_eq!(store.raw_events().await.unwrap().len(), 1);

    chain.state().failing_topics.clear();
    let ix = &indexer;
    assert!(eventually(move || async move {
        ix.last_indexed_block().await.unwrap() == Some(10)
    })
    .await);

    let kinds: Vec<_> = store
        .raw_events()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_kind)
        .collect();
    assert_eq!(kinds, vec!["Issued".to_string(), "SplitExecuted".to_string()]);
    indexer.stop().await.unwrap();
}

#[tokio::test]
async fn nothing_is_confirmed_while_chain_is_shorter_than_depth() {
    let chain = MockChain::new(2);
    chain.push(issued(ALICE, 1, 0, 0));
    chain.set_balance(ALICE, 1);

    let store = Arc::new(InMemoryStorage::new());
    let indexer = builder()
        .confirmation_depth(3)
        .checkpoint_interval(Duration::from_millis(20))
        .build(chain.clone(), store.clone(), contracts())
        .unwrap();
    indexer.start().await.unwrap();

    assert_eq!(indexer.last_indexed_block().await.unwrap(), None);
    assert!(store.raw_events().await.unwrap().is_empty());
    let err = indexer.rescan(0, None).await.unwrap_err();
    assert!(matches!(err, IndexerError::Config(_)));

    chain.set_head(3);
    let ix = &indexer;
    assert!(eventually(move || async move {
        ix.last_indexed_block().await.unwrap() == Some(0)
    })
    .await);
    assert_eq!(store.raw_events().await.unwrap().len(), 1);
    indexer.stop().await.unwrap();
}

// ─── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let chain = MockChain::new(10);
    let (indexer, _store) = indexer(&chain);
    assert_eq!(indexer.status(), IndexerStatus::Idle);

    indexer.start().await.unwrap();
    indexer.start().await.unwrap();
    assert_eq!(indexer.status(), IndexerStatus::Live);
    assert_eq!(chain.state().subscribe_calls, 5);

    indexer.stop().await.unwrap();
    indexer.stop().await.unwrap();
    assert_eq!(indexer.status(), IndexerStatus::Stopped);
    assert!(!indexer.is_healthy());
    assert_eq!(chain.state().unsubscribes, 5);
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(10));
}

#[tokio::test]
async fn stop_during_catch_up_keeps_committed_batches() {
    let chain = MockChain::new(10);
    for block in 1..=3 {
        chain.push(issued(ALICE, 1, block, 0));
    }
    chain.set_balance(ALICE, 3);
    chain.state().read_delay = Some(Duration::from_millis(40));

    let store = Arc::new(InMemoryStorage::new());
    let indexer = Arc::new(
        builder()
            .batch_size(1)
            .build(chain.clone(), store.clone(), contracts())
            .unwrap(),
    );
    let starter = {
        let indexer = indexer.clone();
        tokio::spawn(async move { indexer.start().await })
    };

    let st = &store;
    assert!(eventually(move || async move { !st.raw_events().await.unwrap().is_empty() }).await);
    indexer.stop().await.unwrap();
    starter.await.unwrap().unwrap();

    assert_eq!(indexer.status(), IndexerStatus::Stopped);
    assert_eq!(chain.state().subscribe_calls, 0);
    let committed = store.raw_events().await.unwrap().len();
    assert!(committed < 3);
    assert_eq!(indexer.last_indexed_block().await.unwrap(), Some(committed as u64));
}

#[tokio::test]
async fn live_events_are_not_applied_after_stop() {
    let chain = MockChain::new(10);
    let (indexer, store) = indexer(&chain);
    indexer.start().await.unwrap();
    indexer.stop().await.unwrap();

    chain.set_balance(ALICE, 1);
    chain.emit(issued(ALICE, 1, 11, 0));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(store.raw_events().await.unwrap().is_empty());
}

#[test]
fn event_topics_match_bindings() {
    assert_eq!(topic0(EventKind::Issued), Issued::SIGNATURE_HASH);
    assert_eq!(topic0(EventKind::Transfer), Transfer::SIGNATURE_HASH);
}
