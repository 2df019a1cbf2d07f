//! Program-owned state: registry entries, prediction records and the
//! per-wallet record chain.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;

/// Stable identifier of a record inside the [`RecordArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry entry, one per wallet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    /// Account owner and payer
    pub owner: Address,
    /// Round the wallet registered for (reference id)
    pub round_id: i64,
    /// Number of records created
    pub submission_count: u32,
    /// Latest created record
    pub current_record: Option<RecordId>,
    pub created_at: i64,
}

impl UserAccount {
    pub fn new(owner: Address, round_id: i64, created_at: i64) -> Self {
        Self {
            owner,
            round_id,
            submission_count: 0,
            current_record: None,
            created_at,
        }
    }
}

/// Full tournament prediction. Each category is a `;`-joined list of
/// `XX-YY=n:n` entries.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPredictions {
    pub world_champion: String,
    pub final_game: String,
    pub third_place_game: String,
    pub semifinals: String,
    pub quarter_finals: String,
    pub round_of_16: String,
    pub group_stage_1: String,
    pub group_stage_2: String,
    pub group_stage_3: String,
}

impl StructuredPredictions {
    /// Game categories with their field names, in submission order.
    pub fn categories(&self) -> [(&'static str, &str); 8] {
        [
            ("finalGame", self.final_game.as_str()),
            ("thirdPlaceGame", self.third_place_game.as_str()),
            ("semifinals", self.semifinals.as_str()),
            ("quarterFinals", self.quarter_finals.as_str()),
            ("roundOf16", self.round_of_16.as_str()),
            ("groupStage1", self.group_stage_1.as_str()),
            ("groupStage2", self.group_stage_2.as_str()),
            ("groupStage3", self.group_stage_3.as_str()),
        ]
    }

    /// Lowercase hex SHA-256 of the canonical JSON encoding, suitable for
    /// [`Predictions::Committed`].
    pub fn commitment(&self) -> Result<String, serde_json::Error> {
        let encoded = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }
}

/// Prediction payload: either the full data or a digest committing to it
/// off-ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predictions {
    Structured(StructuredPredictions),
    Committed { digest: String },
}

/// One accepted submission. Immutable once appended to the arena.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    id: RecordId,
    round_id: i64,
    owner: Address,
    predictions: Predictions,
    submitted_at: i64,
    previous: Option<RecordId>,
}

impl Record {
    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn round_id(&self) -> i64 {
        self.round_id
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn predictions(&self) -> &Predictions {
        &self.predictions
    }

    pub fn submitted_at(&self) -> i64 {
        self.submitted_at
    }

    /// Back-link to the owner's prior record.
    pub fn previous(&self) -> Option<RecordId> {
        self.previous
    }
}

/// Record contents supplied by the submitter; the arena assigns id and
/// back-link.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordDraft {
    pub owner: Address,
    pub round_id: i64,
    pub predictions: Predictions,
    pub submitted_at: i64,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain head of {owner} is {actual:?}, caller expected {expected:?}")]
    StaleHead {
        owner: Address,
        expected: Option<RecordId>,
        actual: Option<RecordId>,
    },
}

/// Append-only store of records. Each owner's records form a singly linked
/// chain through `previous`; ids only grow, so links always point backwards.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordArena {
    records: Vec<Record>,
    heads: BTreeMap<Address, RecordId>,
}

impl RecordArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record at the head of its owner's chain. `expected_head`
    /// must match the owner's current head.
    pub fn append(
        &mut self,
        draft: RecordDraft,
        expected_head: Option<RecordId>,
    ) -> Result<RecordId, ChainError> {
        let actual = self.heads.get(&draft.owner).copied();
        if actual != expected_head {
            return Err(ChainError::StaleHead {
                owner: draft.owner,
                expected: expected_head,
                actual,
            });
        }
        let id = RecordId(self.records.len() as u64);
        self.records.push(Record {
            id,
            round_id: draft.round_id,
            owner: draft.owner,
            predictions: draft.predictions,
            submitted_at: draft.submitted_at,
            previous: actual,
        });
        self.heads.insert(draft.owner, id);
        Ok(id)
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.0 as usize)
    }

    pub fn head(&self, owner: &Address) -> Option<RecordId> {
        self.heads.get(owner).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Walk a chain newest-first starting at `head`, yielding at most `limit`
    /// records.
    pub fn chain(&self, head: Option<RecordId>, limit: usize) -> Vec<&Record> {
        let mut chain = Vec::new();
        let mut cursor = head;
        while let Some(id) = cursor {
            if chain.len() >= limit {
                break;
            }
            let Some(record) = self.get(id) else {
                break;
            };
            chain.push(record);
            cursor = record.previous;
        }
        chain
    }
}
