use std::collections::BTreeSet;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::payment::PaymentAccounts;
use crate::state::Predictions;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    /// Create the registry entry of `authority`.
    InitializeUser { authority: Address, round_id: i64 },
    /// Pay the fee and append a record to the chain of `user_account`.
    Submit {
        authority: Address,
        user_account: Address,
        round_id: i64,
        predictions: Predictions,
        payment: PaymentAccounts,
    },
}

impl Instruction {
    pub fn authority(&self) -> &Address {
        match self {
            Instruction::InitializeUser { authority, .. } => authority,
            Instruction::Submit { authority, .. } => authority,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Instruction::InitializeUser { .. } => "initialize_user",
            Instruction::Submit { .. } => "submit",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub instruction: Instruction,
    /// Distinguishes otherwise identical requests.
    pub nonce: u64,
}

impl Message {
    pub fn new(instruction: Instruction, nonce: u64) -> Self {
        Self { instruction, nonce }
    }

    pub fn digest(&self) -> Result<[u8; 32], TransactionError> {
        let encoded = serde_json::to_vec(self)?;
        Ok(Sha256::digest(&encoded).into())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionSignature {
    pub signer: Address,
    #[serde(with = "crate::transaction::serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub message: Message,
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    pub fn sign(message: Message, keys: &[&SigningKey]) -> Result<Self, TransactionError> {
        let digest = message.digest()?;
        let signatures = keys
            .iter()
            .map(|key| TransactionSignature {
                signer: Address::from(key.verifying_key()),
                signature: key.sign(&digest).to_bytes().to_vec(),
            })
            .collect();
        Ok(Self {
            message,
            signatures,
        })
    }

    pub fn digest(&self) -> Result<[u8; 32], TransactionError> {
        self.message.digest()
    }

    /// Verify every attached signature and return the set of signers.
    pub fn verify(&self) -> Result<BTreeSet<Address>, TransactionError> {
        let digest = self.digest()?;
        let mut verified = BTreeSet::new();
        for sig in &self.signatures {
            let key = VerifyingKey::from_bytes(sig.signer.as_bytes())
                .map_err(|_| TransactionError::MalformedKey(sig.signer))?;
            let signature = Signature::from_slice(&sig.signature)
                .map_err(|_| TransactionError::MalformedSignature(sig.signer))?;
            key.verify_strict(&digest, &signature)
                .map_err(|_| TransactionError::InvalidSignature(sig.signer))?;
            verified.insert(sig.signer);
        }
        Ok(verified)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("signer {0} is not a valid public key")]
    MalformedKey(Address),
    #[error("malformed signature from {0}")]
    MalformedSignature(Address),
    #[error("invalid signature from {0}")]
    InvalidSignature(Address),
    #[error("message encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub(crate) mod serde_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(D::Error::custom)
    }
}
