use num_bigint::BigUint;
use rollup_common::{OffChainTx, OnChainTx, Transaction, TxRequest, TxSignature};
use rollup_core::{Admission, BatchConfig, RollupDb, SqliteStore, TmpState};

async fn open_rollup(path: &std::path::Path) -> RollupDb<SqliteStore> {
    let state = SqliteStore::open(path, "state")
        .await
        .expect("Failed to open database");
    let exits = state.namespace("exits");
    RollupDb::new(state, exits)
        .await
        .expect("Failed to open rollup")
}

fn deposit(owner: u8, load_amount: u64) -> Transaction {
    Transaction::OnChain(OnChainTx {
        coin: 0,
        from_ax: BigUint::from(owner),
        from_ay: BigUint::from(owner),
        from_eth_addr: [owner; 20],
        to_idx: 0,
        to_ax: BigUint::default(),
        to_ay: BigUint::default(),
        to_eth_addr: [0u8; 20],
        amount: BigUint::default(),
        load_amount: BigUint::from(load_amount),
    })
}

fn transfer(owner: u8, from_idx: u64, to_idx: u64, amount: u64, nonce: u64) -> Transaction {
    Transaction::OffChain(OffChainTx {
        from_idx,
        to_idx,
        coin: 0,
        amount: BigUint::from(amount),
        user_fee: BigUint::from(1u32),
        nonce,
        from_ax: BigUint::from(owner),
        from_ay: BigUint::from(owner),
        signature: TxSignature::default(),
    })
}

#[tokio::test]
async fn test_rollup_lifecycle_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rollup.db");
    let config = BatchConfig {
        max_n_tx: 8,
        n_levels: 16,
    };

    let (state_root, exit_root) = {
        let mut rollup = open_rollup(&path).await;
        assert_eq!(rollup.last_batch(), 0);
        assert_eq!(rollup.next_idx(), 1);

        let mut batch = rollup.build_batch(&config).unwrap();
        batch.add_tx(deposit(1, 1000)).unwrap();
        batch.add_tx(deposit(2, 0)).unwrap();
        batch.build().await.unwrap();
        rollup.consolidate(&batch).await.unwrap();

        // admission runs against the canonical state
        let mut pool = TmpState::new(&rollup);
        let candidates = vec![
            transfer(1, 1, 2, 300, 0),
            transfer(1, 1, 2, 300, 2),
            transfer(1, 1, 0, 500, 1),
        ];
        let mut accepted = Vec::new();
        for tx in &candidates {
            if pool.can_process(tx).await.unwrap() == Admission::Yes && pool.process(tx).await.unwrap() {
                accepted.push(tx.clone());
            }
        }
        assert_eq!(accepted.len(), 2);

        let mut batch = rollup.build_batch(&config).unwrap();
        batch.add_coin(0).unwrap();
        for tx in accepted {
            batch.add_tx(tx).unwrap();
        }
        batch.build().await.unwrap();
        assert_eq!(batch.data_available().unwrap().len(), 2 * 64 / 8);
        rollup.consolidate(&batch).await.unwrap();

        (rollup.state_root().clone(), rollup.exit_root().clone())
    };

    let rollup = open_rollup(&path).await;
    assert_eq!(rollup.last_batch(), 2);
    assert_eq!(rollup.next_idx(), 3);
    assert_eq!(rollup.state_root(), &state_root);
    assert_eq!(rollup.exit_root(), &exit_root);

    let sender = rollup.get_state_by_idx(1).await.unwrap().unwrap();
    assert_eq!(sender.amount, BigUint::from(198u32));
    assert_eq!(sender.nonce, 2);
    let receiver = rollup.get_state_by_idx(2).await.unwrap().unwrap();
    assert_eq!(receiver.amount, BigUint::from(300u32));

    let exit = rollup.get_exit_info(2, 1).await.unwrap();
    assert!(exit.proof.found);
    assert_eq!(exit.state.unwrap().amount, BigUint::from(500u32));
    assert_eq!(rollup.get_idx(0, &[2u8; 20]).await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_witness_serializes_with_circuit_names() {
    let dir = tempfile::tempdir().unwrap();
    let rollup = open_rollup(&dir.path().join("rollup.db")).await;

    let request: TxRequest = serde_json::from_str(
        r#"{
            "onChain": true,
            "coin": 0,
            "loadAmount": "25",
            "fromAx": "7",
            "fromAy": "8",
            "fromEthAddr": "0x0909090909090909090909090909090909090909"
        }"#,
    )
    .unwrap();

    let mut batch = rollup.build_batch(&BatchConfig::default()).unwrap();
    batch.add_tx(Transaction::try_from(request).unwrap()).unwrap();
    batch.build().await.unwrap();

    let json = serde_json::to_value(batch.input().unwrap()).unwrap();
    assert_eq!(json["loadAmount"][0], "25");
    assert_eq!(json["fromAx"][0], "7");
    assert_eq!(json["siblings1"][0].as_array().unwrap().len(), 25);
    assert_eq!(json["imStateRoot"].as_array().unwrap().len(), 3);
    assert_eq!(json["isOld0_1"][0], "1");
}
