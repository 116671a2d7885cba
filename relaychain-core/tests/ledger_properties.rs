//! Chain invariants over arbitrary message sequences

use proptest::prelude::*;
use relaychain_core::ledger::{
    digest, verify_blocks, LedgerStore, MessageRecord, Payload, GENESIS_PREVIOUS_HASH,
};
use tempfile::tempdir;

fn key() -> impl Strategy<Value = Vec<u8>> {
    // Small alphabet so receivers collide often
    let keys = vec![b"KA".to_vec(), b"KB".to_vec(), b"KC".to_vec(), vec![0u8; 32]];
    prop::sample::select(keys)
}

fn record() -> impl Strategy<Value = (Vec<u8>, Vec<u8>, Vec<u8>)> {
    (key(), key(), prop::collection::vec(any::<u8>(), 1..256))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chain_shape_holds_for_any_sequence(records in prop::collection::vec(record(), 0..24)) {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("ledger.jsonl")).unwrap();
        for (sender, receiver, ciphertext) in &records {
            store.append(MessageRecord::new(sender, receiver, ciphertext)).unwrap();
        }

        let blocks: Vec<_> = store.blocks().unwrap().collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(blocks.len(), records.len() + 1);
        prop_assert_eq!(blocks[0].index, 0);
        prop_assert_eq!(blocks[0].previous_hash.as_str(), GENESIS_PREVIOUS_HASH);
        prop_assert!(matches!(blocks[0].data, Payload::Genesis(_)));

        for (i, block) in blocks.iter().enumerate() {
            prop_assert_eq!(block.index, i as u64);
            let canonical = block.data.canonical_string().unwrap();
            let expected = digest(
                block.index,
                &block.previous_hash,
                block.timestamp,
                &canonical,
            );
            prop_assert_eq!(&expected, &block.hash);
            if i > 0 {
                prop_assert_eq!(&block.previous_hash, &blocks[i - 1].hash);
            }
        }

        let report = verify_blocks(blocks.into_iter().map(Ok)).unwrap();
        prop_assert_eq!(report.tail, store.tail().unwrap());
    }

    #[test]
    fn scan_matches_addressed_records(records in prop::collection::vec(record(), 0..24)) {
        let dir = tempdir().unwrap();
        let store = LedgerStore::open(dir.path().join("ledger.jsonl")).unwrap();
        for (sender, receiver, ciphertext) in &records {
            store.append(MessageRecord::new(sender, receiver, ciphertext)).unwrap();
        }

        let receivers = [
            b"KA".to_vec(),
            b"KB".to_vec(),
            b"KC".to_vec(),
            vec![0u8; 32],
            b"KZ".to_vec(),
        ];
        for receiver in receivers {
            let expected: Vec<MessageRecord> = records
                .iter()
                .filter(|(_, r, _)| *r == receiver)
                .map(|(s, r, c)| MessageRecord::new(s, r, c))
                .collect();
            prop_assert_eq!(store.messages_for(&receiver).unwrap(), expected);
        }
    }

    #[test]
    fn reopen_recovers_last_block(records in prop::collection::vec(record(), 0..12)) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let tail = {
            let store = LedgerStore::open(&path).unwrap();
            for (sender, receiver, ciphertext) in &records {
                store.append(MessageRecord::new(sender, receiver, ciphertext)).unwrap();
            }
            store.tail().unwrap()
        };

        let reopened = LedgerStore::open(&path).unwrap();
        prop_assert_eq!(reopened.tail().unwrap(), tail.clone());

        let next = reopened.append(MessageRecord::new(b"KA", b"KB", b"after restart")).unwrap();
        prop_assert_eq!(next.index, tail.index + 1);
        prop_assert!(reopened.verify_chain().is_ok());
    }
}
