//! Signed identity proofs.
//!
//! A caller proves control of an address by signing a challenge that names
//! the action, the item, the counterpart (if any) and the time of signing.
//! The engine never trusts a caller-asserted address without one.

use pharmachain_crypto::{sign_message, verify_signature};
use pharmachain_types::{Address, ItemKey, Party, PrivateKey, Signature, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::EngineError;

const CHALLENGE_TAG: &[u8] = b"pharmachain/proof/v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofAction {
    Register,
    /// Shipper authorises handing the item to the counterpart.
    Transfer,
    /// Receiver accepts the item from the counterpart.
    Accept,
    Recall,
}

impl ProofAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Transfer => "transfer",
            Self::Accept => "accept",
            Self::Recall => "recall",
        }
    }
}

impl fmt::Display for ProofAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProofAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "register" => Ok(Self::Register),
            "transfer" => Ok(Self::Transfer),
            "accept" => Ok(Self::Accept),
            "recall" => Ok(Self::Recall),
            other => Err(EngineError::Validation(format!("unknown proof action {other:?}"))),
        }
    }
}

/// The bytes a party signs for `action` on `item`.
///
/// Fields are length-prefixed so no two distinct challenges share an encoding.
pub fn challenge(
    action: ProofAction,
    item: &ItemKey,
    counterpart: Option<&Address>,
    issued_at: Timestamp,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(128);
    for field in [
        CHALLENGE_TAG,
        action.as_str().as_bytes(),
        item.as_bytes().as_slice(),
    ] {
        msg.extend_from_slice(&(field.len() as u32).to_be_bytes());
        msg.extend_from_slice(field);
    }
    match counterpart {
        Some(addr) => {
            msg.push(1);
            msg.extend_from_slice(&addr.to_bytes());
        }
        None => msg.push(0),
    }
    msg.extend_from_slice(&issued_at.as_millis().to_be_bytes());
    msg
}

/// A signature binding `address` to one action at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProof {
    pub address: Address,
    pub issued_at: Timestamp,
    pub signature: Signature,
}

impl IdentityProof {
    /// Sign a proof for `address` with its identity key.
    pub fn sign(
        address: Address,
        action: ProofAction,
        item: &ItemKey,
        counterpart: Option<&Address>,
        issued_at: Timestamp,
        private_key: &PrivateKey,
    ) -> Self {
        let signature = sign_message(&challenge(action, item, counterpart, issued_at), private_key);
        Self {
            address,
            issued_at,
            signature,
        }
    }

    /// Check this proof against the directory entry of its claimed signer.
    ///
    /// Fails with [`EngineError::Authorization`] if the party is inactive,
    /// the proof is outside `max_age` of `now`, or the signature does not verify.
    pub fn verify(
        &self,
        party: &Party,
        action: ProofAction,
        item: &ItemKey,
        counterpart: Option<&Address>,
        now: Timestamp,
        max_age: Duration,
    ) -> Result<(), EngineError> {
        if party.address != self.address {
            return Err(EngineError::Authorization(format!(
                "proof is for {}, not {}",
                self.address, party.address
            )));
        }
        if !party.active {
            return Err(EngineError::Authorization(format!(
                "party {} is not active",
                party.address
            )));
        }
        let skew = if self.issued_at > now {
            now.elapsed_since(self.issued_at)
        } else {
            self.issued_at.elapsed_since(now)
        };
        if skew > max_age {
            return Err(EngineError::Authorization(format!(
                "{action} proof issued at {} is outside the {}s window",
                self.issued_at,
                max_age.as_secs()
            )));
        }
        let msg = challenge(action, item, counterpart, self.issued_at);
        if !verify_signature(&msg, &self.signature, &party.public_key) {
            return Err(EngineError::Authorization(format!(
                "{action} proof signature for {} does not verify",
                self.address
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmachain_crypto::{derive_address, keypair_from_seed};
    use pharmachain_types::{KeyPair, Role};

    fn party(seed: u8) -> (Party, KeyPair) {
        let kp = keypair_from_seed(&[seed; 32]);
        let party = Party {
            address: derive_address(&kp.public),
            name: format!("party {seed}"),
            role: Role::Manufacturer,
            public_key: kp.public.clone(),
            active: true,
        };
        (party, kp)
    }

    const MAX_AGE: Duration = Duration::from_secs(300);

    fn now() -> Timestamp {
        Timestamp::from_secs(1_700_000_000)
    }

    #[test]
    fn valid_proof_verifies() {
        let (p, kp) = party(1);
        let item = ItemKey::new([5; 32]);
        let proof = IdentityProof::sign(
            p.address.clone(),
            ProofAction::Register,
            &item,
            None,
            now(),
            &kp.private,
        );
        proof
            .verify(&p, ProofAction::Register, &item, None, now(), MAX_AGE)
            .unwrap();
    }

    #[test]
    fn proof_is_bound_to_action_item_and_counterpart() {
        let (p, kp) = party(1);
        let (other, _) = party(2);
        let item = ItemKey::new([5; 32]);
        let proof = IdentityProof::sign(
            p.address.clone(),
            ProofAction::Transfer,
            &item,
            Some(&other.address),
            now(),
            &kp.private,
        );
        let ok = |action, item: &ItemKey, cp: Option<&Address>| {
            proof.verify(&p, action, item, cp, now(), MAX_AGE).is_ok()
        };
        assert!(ok(ProofAction::Transfer, &item, Some(&other.address)));
        assert!(!ok(ProofAction::Accept, &item, Some(&other.address)));
        assert!(!ok(ProofAction::Transfer, &ItemKey::new([6; 32]), Some(&other.address)));
        assert!(!ok(ProofAction::Transfer, &item, Some(&p.address)));
        assert!(!ok(ProofAction::Transfer, &item, None));
    }

    #[test]
    fn stale_and_future_proofs_are_rejected() {
        let (p, kp) = party(1);
        let item = ItemKey::new([5; 32]);
        for issued in [
            now().saturating_sub(Duration::from_secs(301)),
            now().saturating_add(Duration::from_secs(301)),
        ] {
            let proof = IdentityProof::sign(
                p.address.clone(),
                ProofAction::Recall,
                &item,
                None,
                issued,
                &kp.private,
            );
            assert!(matches!(
                proof.verify(&p, ProofAction::Recall, &item, None, now(), MAX_AGE),
                Err(EngineError::Authorization(_))
            ));
        }
    }

    #[test]
    fn wrong_signer_or_inactive_party_is_rejected() {
        let (p, _) = party(1);
        let (_, impostor) = party(9);
        let item = ItemKey::new([5; 32]);
        let forged = IdentityProof::sign(
            p.address.clone(),
            ProofAction::Register,
            &item,
            None,
            now(),
            &impostor.private,
        );
        assert!(forged
            .verify(&p, ProofAction::Register, &item, None, now(), MAX_AGE)
            .is_err());

        let (mut inactive, kp) = party(3);
        inactive.active = false;
        let proof = IdentityProof::sign(
            inactive.address.clone(),
            ProofAction::Register,
            &item,
            None,
            now(),
            &kp.private,
        );
        assert!(proof
            .verify(&inactive, ProofAction::Register, &item, None, now(), MAX_AGE)
            .is_err());
    }

    #[test]
    fn proof_round_trips_through_json() {
        let (p, kp) = party(1);
        let proof = IdentityProof::sign(
            p.address,
            ProofAction::Register,
            &ItemKey::new([1; 32]),
            None,
            now(),
            &kp.private,
        );
        let json = serde_json::to_string(&proof).unwrap();
        assert_eq!(serde_json::from_str::<IdentityProof>(&json).unwrap(), proof);
    }
}
