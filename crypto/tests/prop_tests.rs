use pharmachain_crypto::{
    commit, decrypt_payload, encrypt_payload, keypair_from_seed, unwrap_key, verify_commitment,
    wrap_key, CryptoError, SymmetricKey,
};
use pharmachain_types::{Address, Timestamp};
use proptest::prelude::*;

fn arb_address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(|b| Address::from_bytes(&b))
}

proptest! {
    #[test]
    fn decrypt_inverts_encrypt(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let (blob, key) = encrypt_payload(&payload);
        prop_assert_eq!(decrypt_payload(&blob, &key).unwrap(), payload);
    }

    #[test]
    fn any_other_key_fails_integrity(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        other in any::<[u8; 32]>(),
    ) {
        let (blob, key) = encrypt_payload(&payload);
        let other = SymmetricKey::from_bytes(other);
        prop_assume!(other != key);
        prop_assert_eq!(decrypt_payload(&blob, &other), Err(CryptoError::Integrity));
    }

    #[test]
    fn any_flipped_byte_fails_integrity(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        idx in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (mut blob, key) = encrypt_payload(&payload);
        let i = idx.index(blob.len());
        blob[i] ^= 1 << bit;
        prop_assert_eq!(decrypt_payload(&blob, &key), Err(CryptoError::Integrity));
    }

    #[test]
    fn unwrap_with_non_matching_key_is_denied(seed_a in any::<[u8; 32]>(), seed_b in any::<[u8; 32]>()) {
        prop_assume!(seed_a != seed_b);
        let a = keypair_from_seed(&seed_a);
        let b = keypair_from_seed(&seed_b);
        let key = SymmetricKey::generate();
        let wrapped = wrap_key(&key, &a.public).unwrap();
        prop_assert_eq!(unwrap_key(&wrapped, &b.private), Err(CryptoError::AccessDenied));
        prop_assert_eq!(unwrap_key(&wrapped, &a.private).unwrap(), key);
    }

    #[test]
    fn commitment_recomputes_and_binds_every_ciphertext_byte(
        ciphertext in proptest::collection::vec(any::<u8>(), 1..1024),
        shipper in arb_address(),
        receiver in arb_address(),
        millis in any::<u64>(),
        idx in any::<prop::sample::Index>(),
        delta in 1u8..=255,
    ) {
        let at = Timestamp::from_millis(millis);
        let c = commit(&ciphertext, &shipper, &receiver, at);
        prop_assert!(verify_commitment(&c, &ciphertext, &shipper, &receiver, at));

        let mut mutated = ciphertext.clone();
        let i = idx.index(mutated.len());
        mutated[i] = mutated[i].wrapping_add(delta);
        prop_assert_ne!(commit(&mutated, &shipper, &receiver, at), c);
    }
}
