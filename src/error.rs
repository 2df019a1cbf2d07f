use thiserror::Error;

/// Terminal errors raised by the sweepstake program. A rejected request
/// never leaves a partial effect behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("user state is already initialized for this wallet")]
    AlreadyInitialized,

    #[error("user state is not initialized")]
    UserNotInitialized,

    #[error("{field} has invalid length: expected {expected}, got {actual}")]
    InvalidPayloadLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} holds a malformed entry")]
    InvalidPayloadData { field: &'static str },

    #[error("exceeded number of submissions per wallet (limit {limit})")]
    SubmissionLimitExceeded { limit: u32 },

    #[error("requester is not the authority of this request")]
    UnauthorizedRequester,

    #[error("payment destination is not the treasury")]
    WrongTreasuryDestination,

    #[error("not enough funds to pay the fee: need {required}, have {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("token account is not owned by the requester")]
    TokenOwnerMismatch,

    #[error("token account is not the requester's associated account for this mint")]
    NotAssociatedTokenAccount,

    #[error("token account mint does not match the payment mint")]
    MintMismatch,

    #[error("mint is not accepted for payment")]
    UnsupportedMint,

    #[error("token program reference is invalid")]
    InvalidTokenProgram,

    #[error("unknown token account")]
    UnknownTokenAccount,

    #[error("round id must be positive, got {0}")]
    InvalidRoundId(i64),

    #[error("submission period has ended")]
    SubmissionClosed,
}
