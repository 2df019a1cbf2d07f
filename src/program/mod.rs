//! Sweepstake program: turns a signed transaction into ledger mutations.
//!
//! Every check runs against the current ledger before any mutation is built,
//! and the resulting mutations are committed in one
//! [`LedgerState::apply_mutations`] call, so the fee transfer, the new record
//! and the registry update land together or not at all.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::address::Address;
use crate::config::ProgramConfig;
use crate::error::ProgramError;
use crate::ledger::{LedgerError, LedgerEvent, LedgerMutation, LedgerState};
use crate::payment::{verify_payment, PaymentAccounts};
use crate::state::{Predictions, Record, RecordDraft, UserAccount};
use crate::transaction::{Instruction, Transaction};
use crate::validator::{
    validate_deadline, validate_predictions, validate_round_id, validate_submissions_per_wallet,
};

#[derive(Clone, Debug)]
pub struct SweepstakeProgram {
    config: ProgramConfig,
}

impl SweepstakeProgram {
    pub fn new(config: ProgramConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    /// Verify, check and commit `tx` at ledger time `now`.
    pub fn process(
        &self,
        ledger: &mut LedgerState,
        tx: &Transaction,
        now: i64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let instruction = &tx.message.instruction;
        let result = self.execute(ledger, tx, now);
        match &result {
            Ok(events) => info!(
                instruction = instruction.name(),
                authority = %instruction.authority(),
                events = events.len(),
                "instruction committed"
            ),
            Err(err) => warn!(
                instruction = instruction.name(),
                authority = %instruction.authority(),
                error = %err,
                "instruction rejected"
            ),
        }
        result
    }

    fn execute(
        &self,
        ledger: &mut LedgerState,
        tx: &Transaction,
        now: i64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let signers = tx.verify()?;
        let digest = tx.digest()?;
        if ledger.is_processed(&digest) {
            return Err(LedgerError::DuplicateTransaction);
        }

        let mutations = match &tx.message.instruction {
            Instruction::InitializeUser {
                authority,
                round_id,
            } => self.initialize_user(ledger, &signers, authority, *round_id, now)?,
            Instruction::Submit {
                authority,
                user_account,
                round_id,
                predictions,
                payment,
            } => self.submit(
                ledger,
                &signers,
                SubmitRequest {
                    authority,
                    user_account,
                    round_id: *round_id,
                    predictions,
                    payment,
                    now,
                },
            )?,
        };
        ledger.apply_mutations(&mutations, digest, now)
    }

    fn initialize_user(
        &self,
        ledger: &LedgerState,
        signers: &BTreeSet<Address>,
        authority: &Address,
        round_id: i64,
        now: i64,
    ) -> Result<Vec<LedgerMutation>, ProgramError> {
        require_signer(signers, authority)?;
        validate_deadline(self.config.submission_deadline, now)?;
        let round_id = validate_round_id(round_id)?;

        let user_account = Address::user_account(authority);
        if ledger.user(&user_account).is_some() {
            return Err(ProgramError::AlreadyInitialized);
        }
        Ok(vec![LedgerMutation::CreateUser {
            user_account,
            account: UserAccount::new(*authority, round_id, now),
        }])
    }

    fn submit(
        &self,
        ledger: &LedgerState,
        signers: &BTreeSet<Address>,
        request: SubmitRequest<'_>,
    ) -> Result<Vec<LedgerMutation>, ProgramError> {
        let SubmitRequest {
            authority,
            user_account,
            round_id,
            predictions,
            payment,
            now,
        } = request;

        require_signer(signers, authority)?;
        validate_deadline(self.config.submission_deadline, now)?;
        let user = ledger
            .user(user_account)
            .ok_or(ProgramError::UserNotInitialized)?;
        if &user.owner != authority {
            return Err(ProgramError::UnauthorizedRequester);
        }
        let round_id = validate_round_id(round_id)?;
        validate_predictions(predictions)?;
        validate_submissions_per_wallet(
            user.submission_count,
            self.config.max_submissions_per_wallet,
        )?;

        let rail = payment.rail(&self.config)?;
        let transfer = verify_payment(rail.as_ref(), authority, signers, ledger)?;

        Ok(vec![
            transfer,
            LedgerMutation::AppendRecord {
                user_account: *user_account,
                draft: RecordDraft {
                    owner: *authority,
                    round_id,
                    predictions: predictions.clone(),
                    submitted_at: now,
                },
            },
        ])
    }

    /// A wallet's records, newest first, bounded by the per-wallet cap.
    pub fn history<'a>(&self, ledger: &'a LedgerState, wallet: &Address) -> Vec<&'a Record> {
        ledger.history(
            &Address::user_account(wallet),
            self.config.max_submissions_per_wallet as usize,
        )
    }
}

struct SubmitRequest<'a> {
    authority: &'a Address,
    user_account: &'a Address,
    round_id: i64,
    predictions: &'a Predictions,
    payment: &'a PaymentAccounts,
    now: i64,
}

fn require_signer(signers: &BTreeSet<Address>, authority: &Address) -> Result<(), ProgramError> {
    if !signers.contains(authority) {
        return Err(ProgramError::UnauthorizedRequester);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use crate::config::SupportedToken;
    use crate::state::RecordId;
    use crate::transaction::Message;
    use crate::validator::sample_predictions;

    const FEE: u64 = 1_000;
    const TOKEN_FEE: u64 = 50;

    struct Harness {
        program: SweepstakeProgram,
        ledger: LedgerState,
        nonce: u64,
        mint: Address,
    }

    impl Harness {
        fn new(max_submissions: u32) -> Self {
            let mint = Address::derive(&[b"dust"]);
            let treasury_tokens = Address::derive(&[b"treasury-dust"]);
            let config = ProgramConfig {
                native_fee: FEE,
                max_submissions_per_wallet: max_submissions,
                supported_tokens: vec![SupportedToken {
                    mint,
                    treasury_token_account: treasury_tokens,
                    fee: TOKEN_FEE,
                }],
                ..ProgramConfig::default()
            };
            let mut ledger = LedgerState::new();
            ledger
                .create_token_account(treasury_tokens, config.treasury, mint)
                .unwrap();
            Self {
                program: SweepstakeProgram::new(config),
                ledger,
                nonce: 0,
                mint,
            }
        }

        fn wallet(&mut self, funds: u64) -> (SigningKey, Address) {
            let key = SigningKey::generate(&mut OsRng);
            let addr = Address::from(key.verifying_key());
            self.ledger.airdrop(&addr, funds).unwrap();
            (key, addr)
        }

        fn send(
            &mut self,
            key: &SigningKey,
            instruction: Instruction,
        ) -> Result<Vec<LedgerEvent>, LedgerError> {
            self.nonce += 1;
            let tx = Transaction::sign(Message::new(instruction, self.nonce), &[key]).unwrap();
            self.program.process(&mut self.ledger, &tx, 1_000 + self.nonce as i64)
        }

        fn init(&mut self, key: &SigningKey) -> Result<Vec<LedgerEvent>, LedgerError> {
            let authority = Address::from(key.verifying_key());
            self.send(key, Instruction::InitializeUser { authority, round_id: 1 })
        }

        fn submit_native(
            &mut self,
            key: &SigningKey,
            predictions: Predictions,
        ) -> Result<Vec<LedgerEvent>, LedgerError> {
            let authority = Address::from(key.verifying_key());
            let treasury = self.program.config().treasury;
            self.send(
                key,
                Instruction::Submit {
                    authority,
                    user_account: Address::user_account(&authority),
                    round_id: 1,
                    predictions,
                    payment: PaymentAccounts::Native { treasury },
                },
            )
        }
    }

    fn structured() -> Predictions {
        Predictions::Structured(sample_predictions())
    }

    fn program_error(result: Result<Vec<LedgerEvent>, LedgerError>) -> ProgramError {
        match result {
            Err(LedgerError::Program(err)) => err,
            other => panic!("expected program error, got {other:?}"),
        }
    }

    #[test]
    fn initialize_user_once() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(0);
        let events = h.init(&key).unwrap();
        assert!(matches!(events[0], LedgerEvent::UserInitialized { owner, .. } if owner == addr));

        let user = h.ledger.user(&Address::user_account(&addr)).unwrap();
        assert_eq!(user.submission_count, 0);
        assert_eq!(user.current_record, None);

        assert_eq!(program_error(h.init(&key)), ProgramError::AlreadyInitialized);
        assert_eq!(h.ledger.users.len(), 1);
    }

    #[test]
    fn submit_requires_registry() {
        let mut h = Harness::new(1);
        let (key, _) = h.wallet(FEE);
        assert_eq!(
            program_error(h.submit_native(&key, structured())),
            ProgramError::UserNotInitialized
        );
    }

    #[test]
    fn accepted_submission_moves_fee_and_links_record() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(FEE * 3);
        h.init(&key).unwrap();
        let treasury = h.program.config().treasury;

        h.submit_native(&key, structured()).unwrap();

        assert_eq!(h.ledger.balance(&treasury), FEE);
        assert_eq!(h.ledger.balance(&addr), FEE * 2);
        let user = h.ledger.user(&Address::user_account(&addr)).unwrap();
        assert_eq!(user.submission_count, 1);
        let head = user.current_record.unwrap();
        let record = h.ledger.record(head).unwrap();
        assert_eq!(record.owner(), &addr);
        assert_eq!(record.previous(), None);
    }

    #[test]
    fn quota_blocks_further_submissions_without_charging() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(FEE * 3);
        h.init(&key).unwrap();
        h.submit_native(&key, structured()).unwrap();
        let treasury = h.program.config().treasury;

        let digest = sample_predictions().commitment().unwrap();
        assert_eq!(
            program_error(h.submit_native(&key, Predictions::Committed { digest })),
            ProgramError::SubmissionLimitExceeded { limit: 1 }
        );
        assert_eq!(h.ledger.balance(&treasury), FEE);
        assert_eq!(h.ledger.balance(&addr), FEE * 2);
        assert_eq!(h.ledger.records.len(), 1);
    }

    #[test]
    fn configurable_cap_builds_a_chain() {
        let mut h = Harness::new(3);
        let (key, addr) = h.wallet(FEE * 10);
        h.init(&key).unwrap();
        for _ in 0..3 {
            h.submit_native(&key, structured()).unwrap();
        }
        assert_eq!(
            program_error(h.submit_native(&key, structured())),
            ProgramError::SubmissionLimitExceeded { limit: 3 }
        );

        let history = h.program.history(&h.ledger, &addr);
        let ids: Vec<RecordId> = history.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![RecordId(2), RecordId(1), RecordId(0)]);
        assert_eq!(history[0].previous(), Some(RecordId(1)));
        assert_eq!(history[2].previous(), None);
        let user = h.ledger.user(&Address::user_account(&addr)).unwrap();
        assert_eq!(user.submission_count as usize, history.len());
    }

    #[test]
    fn invalid_payload_changes_nothing() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(FEE);
        h.init(&key).unwrap();
        let before = h.ledger.clone();

        let err = program_error(h.submit_native(
            &key,
            Predictions::Structured(Default::default()),
        ));
        assert!(matches!(err, ProgramError::InvalidPayloadLength { .. }));
        assert_eq!(h.ledger, before);
        assert_eq!(h.ledger.balance(&addr), FEE);
    }

    #[test]
    fn other_wallet_cannot_use_foreign_registry() {
        let mut h = Harness::new(1);
        let (alice, alice_addr) = h.wallet(FEE);
        let (bob, bob_addr) = h.wallet(FEE);
        h.init(&alice).unwrap();
        let treasury = h.program.config().treasury;
        let alice_registry = Address::user_account(&alice_addr);
        let before = h.ledger.user(&alice_registry).cloned();

        let result = h.send(
            &bob,
            Instruction::Submit {
                authority: bob_addr,
                user_account: alice_registry,
                round_id: 1,
                predictions: structured(),
                payment: PaymentAccounts::Native { treasury },
            },
        );
        assert_eq!(program_error(result), ProgramError::UnauthorizedRequester);
        assert_eq!(h.ledger.user(&alice_registry).cloned(), before);
        assert_eq!(h.ledger.balance(&bob_addr), FEE);
    }

    #[test]
    fn authority_must_sign() {
        let mut h = Harness::new(1);
        let (alice, alice_addr) = h.wallet(FEE);
        let (bob, _) = h.wallet(FEE);
        h.init(&alice).unwrap();

        // bob signs a request naming alice as authority
        let result = h.send(
            &bob,
            Instruction::InitializeUser {
                authority: alice_addr,
                round_id: 1,
            },
        );
        assert_eq!(program_error(result), ProgramError::UnauthorizedRequester);
    }

    #[test]
    fn wrong_treasury_is_rejected_with_valid_payload_and_funds() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(FEE * 5);
        h.init(&key).unwrap();
        let result = h.send(
            &key,
            Instruction::Submit {
                authority: addr,
                user_account: Address::user_account(&addr),
                round_id: 1,
                predictions: structured(),
                payment: PaymentAccounts::Native {
                    treasury: Address::derive(&[b"not-the-treasury"]),
                },
            },
        );
        assert_eq!(program_error(result), ProgramError::WrongTreasuryDestination);
        assert_eq!(h.ledger.balance(&addr), FEE * 5);
        assert!(h.ledger.records.is_empty());
    }

    #[test]
    fn token_rail_pays_in_tokens() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(0);
        h.init(&key).unwrap();
        let mint = h.mint;
        let ata = Address::associated_token_account(&addr, &mint);
        h.ledger.create_token_account(ata, addr, mint).unwrap();
        h.ledger.mint_to(&ata, TOKEN_FEE).unwrap();
        let treasury_token_account = h.program.config().supported_tokens[0].treasury_token_account;

        h.send(
            &key,
            Instruction::Submit {
                authority: addr,
                user_account: Address::user_account(&addr),
                round_id: 1,
                predictions: structured(),
                payment: PaymentAccounts::Token {
                    mint,
                    token_account: ata,
                    treasury_token_account,
                    token_program: Address::token_program(),
                },
            },
        )
        .unwrap();
        assert_eq!(h.ledger.token_account(&ata).unwrap().amount, 0);
        assert_eq!(
            h.ledger.token_account(&treasury_token_account).unwrap().amount,
            TOKEN_FEE
        );
        assert_eq!(
            h.ledger.user(&Address::user_account(&addr)).unwrap().submission_count,
            1
        );
    }

    #[test]
    fn replayed_transaction_is_rejected() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(0);
        let tx = Transaction::sign(
            Message::new(
                Instruction::InitializeUser {
                    authority: addr,
                    round_id: 1,
                },
                42,
            ),
            &[&key],
        )
        .unwrap();
        h.program.process(&mut h.ledger, &tx, 1).unwrap();
        let err = h.program.process(&mut h.ledger, &tx, 2).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransaction));
    }

    #[test]
    fn deadline_closes_registration_and_submission() {
        let mut h = Harness::new(1);
        h.program.config.submission_deadline = Some(1_001);
        let (key, _) = h.wallet(FEE);
        // first send happens at t=1001, the second at t=1002
        h.init(&key).unwrap();
        assert_eq!(
            program_error(h.submit_native(&key, structured())),
            ProgramError::SubmissionClosed
        );
    }

    #[test]
    fn non_positive_round_is_rejected() {
        let mut h = Harness::new(1);
        let (key, addr) = h.wallet(0);
        let result = h.send(
            &key,
            Instruction::InitializeUser {
                authority: addr,
                round_id: 0,
            },
        );
        assert_eq!(program_error(result), ProgramError::InvalidRoundId(0));
    }
}
