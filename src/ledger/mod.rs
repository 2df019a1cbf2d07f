use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::address::Address;
use crate::error::ProgramError;
use crate::payment::RailKind;
use crate::state::{
    ChainError, Predictions, Record, RecordArena, RecordDraft, RecordId, UserAccount,
};
use crate::transaction::TransactionError;

pub type Amount = u64;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("insufficient funds in account {account}")]
    InsufficientAccountFunds { account: Address },
    #[error("unknown account {account}")]
    UnknownAccount { account: Address },
    #[error("account {account} already exists")]
    AccountExists { account: Address },
    #[error("mint mismatch on token account {account}")]
    TokenMintMismatch { account: Address },
    #[error("balance overflow on account {account}")]
    BalanceOverflow { account: Address },
    #[error("This transaction has already been processed")]
    DuplicateTransaction,
}

impl LedgerError {
    /// The program-level rejection, if this failure came from the program.
    pub fn program_error(&self) -> Option<&ProgramError> {
        match self {
            LedgerError::Program(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenAccount {
    pub owner: Address,
    pub mint: Address,
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub timestamp: i64,
    pub previous_transaction: Option<[u8; 32]>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub balances: BTreeMap<Address, Amount>,
    pub token_accounts: BTreeMap<Address, TokenAccount>,
    pub users: BTreeMap<Address, UserAccount>,
    pub records: RecordArena,
    pub events: Vec<LedgerEvent>,
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Funded {
        to: Address,
        mint: Option<Address>,
        amount: Amount,
    },
    UserInitialized {
        user_account: Address,
        owner: Address,
        round_id: i64,
    },
    FeePaid {
        rail: RailKind,
        from: Address,
        to: Address,
        mint: Option<Address>,
        amount: Amount,
    },
    RecordCreated {
        record: RecordId,
        owner: Address,
        round_id: i64,
        previous: Option<RecordId>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerMutation {
    NativeTransfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    TokenTransfer {
        from: Address,
        to: Address,
        mint: Address,
        amount: Amount,
    },
    CreateUser {
        user_account: Address,
        account: UserAccount,
    },
    AppendRecord {
        user_account: Address,
        draft: RecordDraft,
    },
}

/// Host ledger: balances, token accounts and the program's state. Every
/// committed transaction goes through [`LedgerState::apply_mutations`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerState {
    pub meta: SnapshotMetadata,
    pub balances: BTreeMap<Address, Amount>,
    pub token_accounts: BTreeMap<Address, TokenAccount>,
    pub users: BTreeMap<Address, UserAccount>,
    pub records: RecordArena,
    pub events: Vec<LedgerEvent>,
    #[serde(default)]
    applied_transactions: BTreeSet<[u8; 32]>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn token_account(&self, account: &Address) -> Option<&TokenAccount> {
        self.token_accounts.get(account)
    }

    pub fn user(&self, user_account: &Address) -> Option<&UserAccount> {
        self.users.get(user_account)
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn is_processed(&self, digest: &[u8; 32]) -> bool {
        self.applied_transactions.contains(digest)
    }

    /// Records of a registry entry, newest first, at most `limit` of them.
    pub fn history(&self, user_account: &Address, limit: usize) -> Vec<&Record> {
        match self.users.get(user_account) {
            Some(user) => self.records.chain(user.current_record, limit),
            None => Vec::new(),
        }
    }

    /// Faucet credit of native coin, outside any program.
    pub fn airdrop(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        self.credit_account(account, amount)?;
        self.events.push(LedgerEvent::Funded {
            to: *account,
            mint: None,
            amount,
        });
        Ok(())
    }

    pub fn create_token_account(
        &mut self,
        account: Address,
        owner: Address,
        mint: Address,
    ) -> Result<(), LedgerError> {
        if self.token_accounts.contains_key(&account) {
            return Err(LedgerError::AccountExists { account });
        }
        self.token_accounts.insert(
            account,
            TokenAccount {
                owner,
                mint,
                amount: 0,
            },
        );
        Ok(())
    }

    pub fn mint_to(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let token = self
            .token_accounts
            .get_mut(account)
            .ok_or(LedgerError::UnknownAccount { account: *account })?;
        token.amount = token
            .amount
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { account: *account })?;
        let mint = token.mint;
        self.events.push(LedgerEvent::Funded {
            to: *account,
            mint: Some(mint),
            amount,
        });
        Ok(())
    }

    fn credit_account(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { account: *account })?;
        Ok(())
    }

    fn debit_account(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self
            .balances
            .get_mut(account)
            .ok_or(LedgerError::UnknownAccount { account: *account })?;
        if *balance < amount {
            return Err(LedgerError::InsufficientAccountFunds { account: *account });
        }
        *balance -= amount;
        Ok(())
    }

    fn transfer_tokens(
        &mut self,
        from: &Address,
        to: &Address,
        mint: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let source = self
            .token_accounts
            .get_mut(from)
            .ok_or(LedgerError::UnknownAccount { account: *from })?;
        if &source.mint != mint {
            return Err(LedgerError::TokenMintMismatch { account: *from });
        }
        if source.amount < amount {
            return Err(LedgerError::InsufficientAccountFunds { account: *from });
        }
        source.amount -= amount;
        let destination = self
            .token_accounts
            .get_mut(to)
            .ok_or(LedgerError::UnknownAccount { account: *to })?;
        if &destination.mint != mint {
            return Err(LedgerError::TokenMintMismatch { account: *to });
        }
        destination.amount = destination
            .amount
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { account: *to })?;
        Ok(())
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            balances: self.balances.clone(),
            token_accounts: self.token_accounts.clone(),
            users: self.users.clone(),
            records: self.records.clone(),
            events: self.events.clone(),
            merkle_root: self.merkle_root(),
        }
    }

    pub fn merkle_root(&self) -> [u8; 32] {
        compute_merkle_root(self)
    }

    /// Apply a transaction's mutations all-or-nothing. On error the ledger is
    /// left exactly as it was and the digest stays unprocessed.
    pub fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
        transaction_id: [u8; 32],
        timestamp: i64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        if self.applied_transactions.contains(&transaction_id) {
            return Err(LedgerError::DuplicateTransaction);
        }

        let mut staged = self.clone();
        let first_event = staged.events.len();
        for mutation in mutations {
            staged.apply_one(mutation)?;
        }

        staged.meta.height += 1;
        staged.meta.timestamp = timestamp;
        staged.meta.previous_transaction = Some(transaction_id);
        staged.applied_transactions.insert(transaction_id);
        let events = staged.events[first_event..].to_vec();
        *self = staged;
        debug!(
            height = self.meta.height,
            transaction = %hex::encode(transaction_id),
            events = events.len(),
            "transaction committed"
        );
        Ok(events)
    }

    fn apply_one(&mut self, mutation: &LedgerMutation) -> Result<(), LedgerError> {
        match mutation {
            LedgerMutation::NativeTransfer { from, to, amount } => {
                self.debit_account(from, *amount)?;
                self.credit_account(to, *amount)?;
                self.events.push(LedgerEvent::FeePaid {
                    rail: RailKind::Native,
                    from: *from,
                    to: *to,
                    mint: None,
                    amount: *amount,
                });
            }
            LedgerMutation::TokenTransfer {
                from,
                to,
                mint,
                amount,
            } => {
                self.transfer_tokens(from, to, mint, *amount)?;
                self.events.push(LedgerEvent::FeePaid {
                    rail: RailKind::Token,
                    from: *from,
                    to: *to,
                    mint: Some(*mint),
                    amount: *amount,
                });
            }
            LedgerMutation::CreateUser {
                user_account,
                account,
            } => {
                if self.users.contains_key(user_account) {
                    return Err(ProgramError::AlreadyInitialized.into());
                }
                self.users.insert(*user_account, account.clone());
                self.events.push(LedgerEvent::UserInitialized {
                    user_account: *user_account,
                    owner: account.owner,
                    round_id: account.round_id,
                });
            }
            LedgerMutation::AppendRecord {
                user_account,
                draft,
            } => {
                let user = self
                    .users
                    .get_mut(user_account)
                    .ok_or(ProgramError::UserNotInitialized)?;
                if user.owner != draft.owner {
                    return Err(ProgramError::UnauthorizedRequester.into());
                }
                let previous = user.current_record;
                let id = self.records.append(draft.clone(), previous)?;
                user.submission_count += 1;
                user.current_record = Some(id);
                self.events.push(LedgerEvent::RecordCreated {
                    record: id,
                    owner: draft.owner,
                    round_id: draft.round_id,
                    previous,
                });
            }
        }
        Ok(())
    }
}

fn compute_merkle_root(ledger: &LedgerState) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (account, balance) in &ledger.balances {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, token) in &ledger.token_accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"token");
        hasher.update(account.as_bytes());
        hasher.update(token.owner.as_bytes());
        hasher.update(token.mint.as_bytes());
        hasher.update(token.amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, user) in &ledger.users {
        let mut hasher = Sha256::new();
        hasher.update(b"user");
        hasher.update(account.as_bytes());
        hasher.update(user.owner.as_bytes());
        hasher.update(user.round_id.to_le_bytes());
        hasher.update(user.submission_count.to_le_bytes());
        hasher.update(link_bytes(user.current_record));
        hasher.update(user.created_at.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for record in ledger.records.iter() {
        let mut hasher = Sha256::new();
        hasher.update(b"record");
        hasher.update(record.id().0.to_le_bytes());
        hasher.update(record.owner().as_bytes());
        hasher.update(record.round_id().to_le_bytes());
        hasher.update(link_bytes(record.previous()));
        hasher.update(record.submitted_at().to_le_bytes());
        hasher.update(predictions_digest(record.predictions()));
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn predictions_digest(predictions: &Predictions) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match predictions {
        Predictions::Structured(structured) => {
            hasher.update(b"structured");
            for (name, value) in structured.categories() {
                hasher.update((name.len() as u64).to_le_bytes());
                hasher.update(name.as_bytes());
                hasher.update((value.len() as u64).to_le_bytes());
                hasher.update(value.as_bytes());
            }
        }
        Predictions::Committed { digest } => {
            hasher.update(b"committed");
            hasher.update((digest.len() as u64).to_le_bytes());
            hasher.update(digest.as_bytes());
        }
    }
    hasher.finalize().into()
}

fn link_bytes(link: Option<RecordId>) -> [u8; 9] {
    let mut out = [0u8; 9];
    if let Some(id) = link {
        out[0] = 1;
        out[1..].copy_from_slice(&id.0.to_le_bytes());
    }
    out
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"sweepstake-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
