//! In-memory ledger that enforces the protocol rules the engine depends on.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tally_core::{
    Address, ContractConfig, CreateObjects, CreateRelationships, CreatedTripleInfo, Curve,
    CurveIds, DepositBatch, Ledger, LedgerCall, LedgerError, LedgerErrorCode, ReceiptStatus,
    RedeemBatch, TermId, TxHash, TxReceipt,
};

/// Account connected by default
pub const DEFAULT_ACCOUNT: &str = "0x000000000000000000000000000000000000a11c";

/// Protocol constants used when none are given
pub const DEFAULT_CONTRACT: ContractConfig = ContractConfig {
    object_cost: 1_000,
    triple_cost: 4_000,
    min_deposit: 100,
};

type TripleParts = (TermId, TermId, TermId);

fn revert(reason: &str) -> String {
    format!("execution reverted: MultiVault_{}()", reason)
}

fn hashed_id(seed: &str) -> TermId {
    TermId::new(format!("0x{:x}", md5::compute(seed.as_bytes())))
}

/// Ledger state that a transaction mutates atomically
#[derive(Debug, Clone, Default)]
struct LedgerState {
    objects: HashMap<String, TermId>,
    object_ids: HashSet<TermId>,
    triples: HashMap<TripleParts, CreatedTripleInfo>,
    // triple id -> counter id
    counter_of: HashMap<TermId, TermId>,
    // counter id -> triple id
    triple_of: HashMap<TermId, TermId>,
    initialized: HashSet<(TermId, u64)>,
    positions: HashMap<(Address, TermId, u64), u128>,
    wallet_balance: Option<u128>,
}

impl LedgerState {
    fn term_exists(&self, term: &TermId) -> bool {
        self.object_ids.contains(term)
            || self.counter_of.contains_key(term)
            || self.triple_of.contains_key(term)
    }

    fn position(&self, account: &Address, term: &TermId, curve_id: u64) -> u128 {
        self.positions
            .get(&(account.clone(), term.clone(), curve_id))
            .copied()
            .unwrap_or(0)
    }

    fn credit(&mut self, account: &Address, term: &TermId, curve_id: u64, shares: u128) {
        let entry = self
            .positions
            .entry((account.clone(), term.clone(), curve_id))
            .or_insert(0);
        *entry = entry.saturating_add(shares);
    }

    fn initialize(&mut self, term: &TermId, curve_id: u64) {
        self.initialized.insert((term.clone(), curve_id));
        // initialising the for side of a relationship also opens its counter side
        if let Some(counter) = self.counter_of.get(term).cloned() {
            self.initialized.insert((counter, curve_id));
        }
    }

    fn insert_triple(&mut self, parts: TripleParts) -> CreatedTripleInfo {
        let seed = format!("triple:{}:{}:{}", parts.0, parts.1, parts.2);
        let triple_id = hashed_id(&seed);
        let counter_triple_id = hashed_id(&format!("counter:{}", triple_id));
        let info = CreatedTripleInfo {
            triple_id: triple_id.clone(),
            counter_triple_id: counter_triple_id.clone(),
        };
        self.counter_of
            .insert(triple_id.clone(), counter_triple_id.clone());
        self.triple_of.insert(counter_triple_id, triple_id);
        self.triples.insert(parts, info.clone());
        info
    }
}

/// Transaction bookkeeping kept outside the atomic state
#[derive(Debug, Default)]
struct Journal {
    nonce: u64,
    receipts: HashMap<TxHash, TxReceipt>,
    mined: Vec<LedgerCall>,
    reverted: Vec<LedgerCall>,
    simulations: usize,
    fail_next_submit: Option<String>,
    revert_next_receipt: Option<String>,
}

/// A [`Ledger`] that keeps objects, relationships, vaults and positions in
/// memory and enforces the rules a real deployment would:
///
/// - creation costs and the minimum deposit
/// - a counter vault on a curve only accepts deposits once the for side of
///   the relationship was initialised on that curve
/// - no deposit while holding shares on the opposite side of the same curve
/// - objects and relationships are unique
///
/// Shares are minted one-to-one with assets. A transaction applies to a copy
/// of the state and is committed only if every step succeeds.
#[derive(Clone)]
pub struct SimulatedLedger {
    contract: ContractConfig,
    curve_ids: CurveIds,
    account: Arc<Mutex<Option<Address>>>,
    ready: Arc<Mutex<bool>>,
    state: Arc<Mutex<LedgerState>>,
    journal: Arc<Mutex<Journal>>,
}

impl fmt::Debug for SimulatedLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transactions = self.journal.lock().mined.len();
        let state = self.state.lock();
        f.debug_struct("SimulatedLedger")
            .field("account", &*self.account.lock())
            .field("objects", &state.objects.len())
            .field("relationships", &state.triples.len())
            .field("positions", &state.positions.len())
            .field("transactions", &transactions)
            .finish()
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CONTRACT)
    }
}

impl SimulatedLedger {
    /// Create a ledger with the given protocol constants, a connected
    /// default account and a ready client
    pub fn new(contract: ContractConfig) -> Self {
        Self {
            contract,
            curve_ids: CurveIds::default(),
            account: Arc::new(Mutex::new(Some(Address::new(DEFAULT_ACCOUNT)))),
            ready: Arc::new(Mutex::new(true)),
            state: Arc::new(Mutex::new(LedgerState::default())),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    /// Use a different curve id table
    pub fn with_curve_ids(mut self, curve_ids: CurveIds) -> Self {
        self.curve_ids = curve_ids;
        self
    }

    /// Deterministic id an object receives when created under `label`
    pub fn object_id_for(label: &str) -> TermId {
        hashed_id(&format!("atom:{}", label))
    }

    /// Connected account
    pub fn default_account(&self) -> Address {
        self.account
            .lock()
            .clone()
            .unwrap_or_else(|| Address::new(DEFAULT_ACCOUNT))
    }

    /// Disconnect the wallet
    pub fn disconnect(&self) {
        *self.account.lock() = None;
    }

    /// Mark the signing client ready or not
    pub fn set_ready(&self, ready: bool) {
        *self.ready.lock() = ready;
    }

    /// Limit the value the wallet can send; `None` means unlimited
    pub fn set_wallet_balance(&self, balance: Option<u128>) {
        self.state.lock().wallet_balance = balance;
    }

    /// Remaining wallet balance, if limited
    pub fn wallet_balance(&self) -> Option<u128> {
        self.state.lock().wallet_balance
    }

    /// Make the next submission fail before broadcast with `message`
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        self.journal.lock().fail_next_submit = Some(message.into());
    }

    /// Make the next submission mine as reverted with `reason`
    pub fn revert_next_receipt(&self, reason: impl Into<String>) {
        self.journal.lock().revert_next_receipt = Some(reason.into());
    }

    /// Create an object outside of any transaction
    pub fn seed_object(&self, label: &str) -> TermId {
        let id = Self::object_id_for(label);
        let linear = self.curve_ids.linear;
        let mut state = self.state.lock();
        state.objects.insert(label.to_string(), id.clone());
        state.object_ids.insert(id.clone());
        state.initialize(&id, linear);
        id
    }

    /// Create a relationship outside of any transaction; both sides are
    /// initialised on the linear curve only
    pub fn seed_relationship(
        &self,
        subject: &TermId,
        predicate: &TermId,
        object: &TermId,
    ) -> CreatedTripleInfo {
        let linear = self.curve_ids.linear;
        let mut state = self.state.lock();
        let parts = (subject.clone(), predicate.clone(), object.clone());
        if let Some(existing) = state.triples.get(&parts) {
            return existing.clone();
        }
        let info = state.insert_triple(parts);
        state.initialize(&info.triple_id, linear);
        info
    }

    /// Give the connected account shares in a vault outside of any transaction
    pub fn seed_position(&self, term: &TermId, curve: Curve, shares: u128) {
        let account = self.default_account();
        let curve_id = self.curve_ids.id_for(curve);
        let mut state = self.state.lock();
        state.credit(&account, term, curve_id, shares);
        state.initialize(term, curve_id);
    }

    /// Shares the connected account holds in a vault
    pub fn position(&self, term: &TermId, curve: Curve) -> u128 {
        let account = self.default_account();
        self.state
            .lock()
            .position(&account, term, self.curve_ids.id_for(curve))
    }

    /// Whether a vault accepts deposits on a curve
    pub fn vault_initialized(&self, term: &TermId, curve: Curve) -> bool {
        self.state
            .lock()
            .initialized
            .contains(&(term.clone(), self.curve_ids.id_for(curve)))
    }

    /// Object created under `label`, if any
    pub fn lookup_object(&self, label: &str) -> Option<TermId> {
        self.state.lock().objects.get(label).cloned()
    }

    /// Relationship (subject, predicate, object), if it exists
    pub fn lookup_relationship(
        &self,
        subject: &TermId,
        predicate: &TermId,
        object: &TermId,
    ) -> Option<CreatedTripleInfo> {
        self.state
            .lock()
            .triples
            .get(&(subject.clone(), predicate.clone(), object.clone()))
            .cloned()
    }

    /// Number of relationships on the ledger
    pub fn relationship_count(&self) -> usize {
        self.state.lock().triples.len()
    }

    /// Successfully mined calls, in order
    pub fn transactions(&self) -> Vec<LedgerCall> {
        self.journal.lock().mined.clone()
    }

    /// Mined calls of one kind, see [`LedgerCall::kind`]
    pub fn calls_of_kind(&self, kind: &str) -> Vec<LedgerCall> {
        self.journal
            .lock()
            .mined
            .iter()
            .filter(|call| call.kind() == kind)
            .cloned()
            .collect()
    }

    /// Calls that were mined but reverted
    pub fn reverted(&self) -> Vec<LedgerCall> {
        self.journal.lock().reverted.clone()
    }

    /// Number of dry runs performed
    pub fn simulation_count(&self) -> usize {
        self.journal.lock().simulations
    }

    fn connected(&self) -> Result<Address, LedgerError> {
        self.account.lock().clone().ok_or_else(|| {
            LedgerError::new(LedgerErrorCode::Unknown, "no account connected")
        })
    }

    fn apply(
        &self,
        state: &mut LedgerState,
        account: &Address,
        call: &LedgerCall,
    ) -> Result<Vec<TermId>, String> {
        let value = call.value();
        if let Some(balance) = state.wallet_balance {
            if value > balance {
                return Err(format!(
                    "insufficient funds for transfer: have {} want {}",
                    balance, value
                ));
            }
            state.wallet_balance = Some(balance - value);
        }

        match call {
            LedgerCall::CreateObjects(call) => self.apply_create_objects(state, call),
            LedgerCall::CreateRelationships(call) => {
                self.apply_create_relationships(state, account, call)
            }
            LedgerCall::DepositBatch(call) => {
                self.apply_deposits(state, call)?;
                Ok(Vec::new())
            }
            LedgerCall::RedeemBatch(call) => {
                self.apply_redeems(state, call)?;
                Ok(Vec::new())
            }
        }
    }

    fn apply_create_objects(
        &self,
        state: &mut LedgerState,
        call: &CreateObjects,
    ) -> Result<Vec<TermId>, String> {
        if call.labels.len() != call.assets.len() {
            return Err(revert("ArraysNotSameLength"));
        }

        let mut created = Vec::with_capacity(call.labels.len());
        for (label, assets) in call.labels.iter().zip(&call.assets) {
            if state.objects.contains_key(label) {
                return Err(revert("AtomExists"));
            }
            if *assets < self.contract.object_cost {
                return Err(revert("InsufficientAssets"));
            }
            let id = Self::object_id_for(label);
            state.objects.insert(label.clone(), id.clone());
            state.object_ids.insert(id.clone());
            state.initialize(&id, self.curve_ids.linear);
            created.push(id);
        }
        Ok(created)
    }

    fn apply_create_relationships(
        &self,
        state: &mut LedgerState,
        account: &Address,
        call: &CreateRelationships,
    ) -> Result<Vec<TermId>, String> {
        let len = call.subjects.len();
        if call.predicates.len() != len || call.objects.len() != len || call.assets.len() != len {
            return Err(revert("ArraysNotSameLength"));
        }

        let linear = self.curve_ids.linear;
        let mut created = Vec::with_capacity(len);
        for i in 0..len {
            let parts = (
                call.subjects[i].clone(),
                call.predicates[i].clone(),
                call.objects[i].clone(),
            );
            if !state.term_exists(&parts.0)
                || !state.term_exists(&parts.1)
                || !state.term_exists(&parts.2)
            {
                return Err(revert("TermDoesNotExist"));
            }
            if state.triples.contains_key(&parts) {
                return Err(revert("TripleExists"));
            }
            let assets = call.assets[i];
            if assets < self.contract.triple_cost {
                return Err(revert("InsufficientAssets"));
            }

            let info = state.insert_triple(parts);
            state.initialize(&info.triple_id, linear);
            let deposit = assets - self.contract.triple_cost;
            if deposit > 0 {
                state.credit(account, &info.triple_id, linear, deposit);
            }
            created.push(info.triple_id);
        }
        Ok(created)
    }

    fn apply_deposits(&self, state: &mut LedgerState, call: &DepositBatch) -> Result<(), String> {
        let len = call.term_ids.len();
        if call.curve_ids.len() != len || call.assets.len() != len || call.min_shares.len() != len
        {
            return Err(revert("ArraysNotSameLength"));
        }

        for i in 0..len {
            let term = &call.term_ids[i];
            let curve_id = call.curve_ids[i];
            let assets = call.assets[i];

            if self.curve_ids.curve_for(curve_id).is_none() {
                return Err(revert("InvalidBondingCurveId"));
            }
            if !state.term_exists(term) {
                return Err(revert("TermDoesNotExist"));
            }
            if assets < self.contract.min_deposit {
                return Err(revert("DepositBelowMinimumDeposit"));
            }

            let opposite = if let Some(triple) = state.triple_of.get(term).cloned() {
                if !state.initialized.contains(&(term.clone(), curve_id)) {
                    return Err(revert("CannotDirectlyInitializeCounterTriple"));
                }
                Some(triple)
            } else {
                state.counter_of.get(term).cloned()
            };
            if let Some(opposite) = opposite {
                if state.position(&call.receiver, &opposite, curve_id) > 0 {
                    return Err(revert("HasCounterStake"));
                }
            }

            let shares = assets;
            if shares < call.min_shares[i] {
                return Err(revert("SlippageExceeded"));
            }
            state.credit(&call.receiver, term, curve_id, shares);
            state.initialize(term, curve_id);
        }
        Ok(())
    }

    fn apply_redeems(&self, state: &mut LedgerState, call: &RedeemBatch) -> Result<(), String> {
        let len = call.term_ids.len();
        if call.curve_ids.len() != len || call.shares.len() != len || call.min_assets.len() != len
        {
            return Err(revert("ArraysNotSameLength"));
        }

        for i in 0..len {
            let key = (call.receiver.clone(), call.term_ids[i].clone(), call.curve_ids[i]);
            let shares = call.shares[i];
            if shares == 0 {
                return Err(revert("DepositOrRedeemZeroShares"));
            }
            let held = state.positions.get(&key).copied().unwrap_or(0);
            if held < shares {
                return Err(revert("InsufficientSharesInVault"));
            }
            if held == shares {
                state.positions.remove(&key);
            } else {
                state.positions.insert(key, held - shares);
            }
            if let Some(balance) = state.wallet_balance {
                state.wallet_balance = Some(balance.saturating_add(shares));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for SimulatedLedger {
    fn account(&self) -> Option<Address> {
        self.account.lock().clone()
    }

    fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    async fn contract_config(&self) -> Result<ContractConfig, LedgerError> {
        Ok(self.contract)
    }

    async fn share_balance(
        &self,
        account: &Address,
        term_id: &TermId,
        curve_id: u64,
    ) -> Result<u128, LedgerError> {
        Ok(self.state.lock().position(account, term_id, curve_id))
    }

    async fn simulate(&self, call: &LedgerCall) -> Result<(), LedgerError> {
        let account = self.connected()?;
        self.journal.lock().simulations += 1;

        let mut scratch = self.state.lock().clone();
        self.apply(&mut scratch, &account, call)
            .map(|_| ())
            .map_err(LedgerError::from_raw)
    }

    async fn submit(&self, call: &LedgerCall) -> Result<TxHash, LedgerError> {
        let account = self.connected()?;
        let mut journal = self.journal.lock();
        if let Some(message) = journal.fail_next_submit.take() {
            return Err(LedgerError::from_raw(message));
        }

        journal.nonce += 1;
        let hash = TxHash::new(format!(
            "0x{:x}",
            md5::compute(format!("tx:{}", journal.nonce).as_bytes())
        ));

        let outcome = match journal.revert_next_receipt.take() {
            Some(reason) => Err(reason),
            None => {
                let mut state = self.state.lock();
                let mut next = state.clone();
                let applied = self.apply(&mut next, &account, call);
                if applied.is_ok() {
                    *state = next;
                }
                applied
            }
        };

        let receipt = match outcome {
            Ok(created_terms) => {
                journal.mined.push(call.clone());
                TxReceipt {
                    hash: hash.clone(),
                    status: ReceiptStatus::Success,
                    created_terms,
                }
            }
            Err(reason) => {
                journal.reverted.push(call.clone());
                TxReceipt {
                    hash: hash.clone(),
                    status: ReceiptStatus::Reverted(reason),
                    created_terms: Vec::new(),
                }
            }
        };
        journal.receipts.insert(hash.clone(), receipt);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: &TxHash) -> Result<TxReceipt, LedgerError> {
        self.journal.lock().receipts.get(hash).cloned().ok_or_else(|| {
            LedgerError::new(
                LedgerErrorCode::Unknown,
                format!("unknown transaction {}", hash),
            )
        })
    }
}
