//! Shared fixture: an engine wired to nullable collaborators.

#![allow(dead_code)]

use pharmachain_crypto::{derive_address, keypair_from_seed, serial_hash};
use pharmachain_engine::{
    Collaborators, Engine, EngineConfig, IdentityProof, Outcome, ProofAction, RecallRequest,
    RegisterRequest, TransferRequest,
};
use pharmachain_ledger::WaitOptions;
use pharmachain_nullables::{
    MiningMode, NullClock, NullLedger, NullPartyDirectory, NullProductCatalog,
    NullProjectionStore,
};
use pharmachain_types::{
    Address, CustodyEntry, ItemKey, KeyPair, NetworkId, Party, Product, Role, Timestamp,
};
use std::sync::Arc;
use std::time::Duration;

pub const GTIN: &str = "GTIN123";

pub struct Actor {
    pub party: Party,
    pub keys: KeyPair,
}

impl Actor {
    pub fn new(seed: u8, name: &str, role: Role) -> Self {
        let keys = keypair_from_seed(&[seed; 32]);
        let party = Party {
            address: derive_address(&keys.public),
            name: name.to_string(),
            role,
            public_key: keys.public.clone(),
            active: true,
        };
        Self { party, keys }
    }

    pub fn address(&self) -> Address {
        self.party.address.clone()
    }
}

pub struct Fixture {
    pub ledger: Arc<NullLedger>,
    pub store: Arc<NullProjectionStore>,
    pub parties: Arc<NullPartyDirectory>,
    pub products: Arc<NullProductCatalog>,
    pub clock: Arc<NullClock>,
    pub config: EngineConfig,
    pub engine: Engine,
    pub manufacturer: Actor,
    pub distributor: Actor,
    pub pharmacy: Actor,
}

impl Fixture {
    /// Blocks appear whenever the engine asks, so every wait finishes at once.
    pub fn new() -> Self {
        Self::with(MiningMode::OnQuery, EngineConfig::default())
    }

    /// Blocks appear only when the test mines them.
    pub fn manual() -> Self {
        Self::with(MiningMode::Manual, EngineConfig::default())
    }

    pub fn with(mode: MiningMode, config: EngineConfig) -> Self {
        let ledger = Arc::new(NullLedger::with_policy(
            NetworkId::Localhost,
            config.policy(),
            mode,
        ));
        let store = Arc::new(NullProjectionStore::new());
        let parties = Arc::new(NullPartyDirectory::new());
        let products = Arc::new(NullProductCatalog::new());
        let clock = Arc::new(NullClock::new(Timestamp::from_secs(1_700_000_000)));

        let manufacturer = Actor::new(1, "Acme Pharma", Role::Manufacturer);
        let distributor = Actor::new(2, "North Distribution", Role::Distributor);
        let pharmacy = Actor::new(3, "Corner Pharmacy", Role::Pharmacy);
        for actor in [&manufacturer, &distributor, &pharmacy] {
            parties.insert(actor.party.clone());
        }
        products.insert(Product {
            product_id: GTIN.to_string(),
            name: "Amoxicillin 500mg".to_string(),
            manufacturer: manufacturer.address(),
            active: true,
        });

        let engine = Engine::new(
            &config,
            Collaborators {
                ledger: ledger.clone(),
                store: store.clone(),
                parties: parties.clone(),
                products: products.clone(),
                clock: clock.clone(),
            },
        );
        Self {
            ledger,
            store,
            parties,
            products,
            clock,
            config,
            engine,
            manufacturer,
            distributor,
            pharmacy,
        }
    }

    pub fn now(&self) -> Timestamp {
        use pharmachain_types::Clock;
        self.clock.now()
    }

    pub fn proof(
        &self,
        actor: &Actor,
        action: ProofAction,
        item: &ItemKey,
        counterpart: Option<&Address>,
    ) -> IdentityProof {
        IdentityProof::sign(
            actor.address(),
            action,
            item,
            counterpart,
            self.now(),
            &actor.keys.private,
        )
    }

    pub fn register_request(&self, serial: &str, by: &Actor) -> RegisterRequest {
        let item = serial_hash(GTIN, serial);
        RegisterRequest {
            product_id: GTIN.to_string(),
            serial_number: serial.to_string(),
            payload: format!("lot L-77, serial {serial}").into_bytes(),
            proof: self.proof(by, ProofAction::Register, &item, None),
            wait: WaitOptions::default(),
        }
    }

    pub fn transfer_request(&self, item: ItemKey, from: &Actor, to: &Actor) -> TransferRequest {
        TransferRequest {
            item,
            to: to.address(),
            payload: b"shipment 9, 40 cartons, 2-8C".to_vec(),
            sender_proof: self.proof(from, ProofAction::Transfer, &item, Some(&to.address())),
            acceptance: self.proof(to, ProofAction::Accept, &item, Some(&from.address())),
            wait: WaitOptions::default(),
        }
    }

    pub fn recall_request(&self, item: ItemKey, by: &Actor) -> RecallRequest {
        RecallRequest {
            item,
            proof: self.proof(by, ProofAction::Recall, &item, None),
            wait: WaitOptions::default(),
        }
    }

    /// Register `serial` by the fixture manufacturer and expect finality.
    pub async fn registered(&self, serial: &str) -> ItemKey {
        let outcome = self
            .engine
            .coordinator
            .register(self.register_request(serial, &self.manufacturer))
            .await
            .unwrap();
        assert!(outcome.is_finalized(), "registration of {serial} not final");
        outcome.record().item
    }

    pub async fn transferred(&self, item: ItemKey, from: &Actor, to: &Actor) -> Outcome {
        self.engine
            .coordinator
            .transfer(self.transfer_request(item, from, to))
            .await
            .unwrap()
    }

    pub async fn store_custody(&self, item: &ItemKey) -> CustodyEntry {
        self.store_custody_opt(item)
            .await
            .unwrap_or_else(|| panic!("no custody entry for {item}"))
    }

    pub async fn store_custody_opt(&self, item: &ItemKey) -> Option<CustodyEntry> {
        self.engine.coordinator.custody_of(item).await.unwrap()
    }

    /// Move the engine clock past the reconciler's grace period.
    pub fn pass_grace_period(&self) {
        self.clock
            .advance(Duration::from_secs(self.config.reconcile.grace_period_secs + 1));
    }

    /// Move the engine clock past grace period plus retry window.
    pub fn pass_retry_window(&self) {
        self.clock.advance(Duration::from_secs(
            self.config.reconcile.grace_period_secs + self.config.reconcile.retry_window_secs + 1,
        ));
    }
}
