use proptest::prelude::*;

use pharmachain_types::{Address, BlockRef, Commitment, ItemKey, SubmissionRef, Timestamp, TxStatus};

fn any_status() -> impl Strategy<Value = TxStatus> {
    prop_oneof![
        Just(TxStatus::Pending),
        Just(TxStatus::Confirmed),
        Just(TxStatus::Finalized),
        Just(TxStatus::Completed),
        Just(TxStatus::Failed),
        Just(TxStatus::Revoked),
    ]
}

proptest! {
    /// ItemKey display -> parse is lossless.
    #[test]
    fn item_key_text_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let key = ItemKey::new(bytes);
        let parsed: ItemKey = key.to_string().parse().unwrap();
        prop_assert_eq!(parsed, key);
    }

    /// Commitment JSON encoding is lossless.
    #[test]
    fn commitment_json_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let c = Commitment::new(bytes);
        let json = serde_json::to_string(&c).unwrap();
        let back: Commitment = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, c);
    }

    /// SubmissionRef::is_zero is true only for all-zero bytes.
    #[test]
    fn submission_ref_is_zero_correct(bytes in prop::array::uniform32(0u8..)) {
        prop_assert_eq!(SubmissionRef::new(bytes).is_zero(), bytes == [0u8; 32]);
    }

    /// Any 20 bytes make a valid address that parses back to itself in either case.
    #[test]
    fn address_case_insensitive(bytes in prop::array::uniform20(0u8..)) {
        let a = Address::from_bytes(&bytes);
        let upper = format!("0x{}", a.as_str()[2..].to_ascii_uppercase());
        prop_assert_eq!(Address::parse(&upper).unwrap(), a);
    }

    /// Timestamp ordering matches the underlying millis.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::from_millis(a);
        let tb = Timestamp::from_millis(b);
        prop_assert_eq!(ta <= tb, a <= b);
    }

    /// Confirmations never underflow.
    #[test]
    fn confirmations_saturate(number in 0u64..1_000_000, head in 0u64..1_000_000) {
        let block = BlockRef::new(number, [0u8; 32]);
        prop_assert_eq!(block.confirmations_at(head), head.saturating_sub(number));
    }

    /// No status can transition to itself, and nothing leaves FAILED.
    #[test]
    fn status_machine_has_no_self_loops(from in any_status(), to in any_status()) {
        if from == to {
            prop_assert!(!from.can_transition_to(to));
        }
        if from == TxStatus::Failed {
            prop_assert!(!from.can_transition_to(to));
        }
    }
}
