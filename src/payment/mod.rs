//! Fee verification for the two payment rails.
//!
//! Both rails share one contract, enforced by [`verify_payment`]: the payer
//! must have signed, the declared destination must equal the treasury the
//! program derives from its own configuration, and the debited account must
//! hold at least the fee. The rail only decides which account is debited and
//! which ledger mutation moves the funds.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::Address;
use crate::config::{ProgramConfig, SupportedToken};
use crate::error::ProgramError;
use crate::ledger::{Amount, LedgerMutation, LedgerState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RailKind {
    Native,
    Token,
}

impl fmt::Display for RailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RailKind::Native => f.write_str("native"),
            RailKind::Token => f.write_str("token"),
        }
    }
}

/// Accounts a submitter supplies to pay the fee.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rail", rename_all = "snake_case")]
pub enum PaymentAccounts {
    Native {
        treasury: Address,
    },
    Token {
        mint: Address,
        token_account: Address,
        treasury_token_account: Address,
        token_program: Address,
    },
}

impl PaymentAccounts {
    pub fn kind(&self) -> RailKind {
        match self {
            PaymentAccounts::Native { .. } => RailKind::Native,
            PaymentAccounts::Token { .. } => RailKind::Token,
        }
    }

    /// Resolve the rail against the program configuration.
    pub fn rail(&self, config: &ProgramConfig) -> Result<Box<dyn PaymentRail>, ProgramError> {
        match self {
            PaymentAccounts::Native { treasury } => Ok(Box::new(NativeRail {
                declared_treasury: *treasury,
                treasury: config.treasury,
                fee: config.native_fee,
            })),
            PaymentAccounts::Token {
                mint,
                token_account,
                treasury_token_account,
                token_program,
            } => {
                if *token_program != Address::token_program() {
                    return Err(ProgramError::InvalidTokenProgram);
                }
                let token = config
                    .supported_token(mint)
                    .ok_or(ProgramError::UnsupportedMint)?;
                Ok(Box::new(TokenRail {
                    token: token.clone(),
                    source: *token_account,
                    declared_treasury: *treasury_token_account,
                }))
            }
        }
    }
}

pub trait PaymentRail {
    fn kind(&self) -> RailKind;

    fn fee(&self) -> Amount;

    /// Destination as supplied by the caller.
    fn declared_destination(&self) -> Address;

    /// Destination as derived from program configuration.
    fn treasury(&self) -> Address;

    /// Check the debited account is usable by `payer` and return its balance.
    fn source_balance(&self, payer: &Address, ledger: &LedgerState)
        -> Result<Amount, ProgramError>;

    /// Mutation moving `amount` from the payer's source to the treasury.
    fn transfer(&self, payer: &Address, amount: Amount) -> LedgerMutation;
}

pub fn verify_payment(
    rail: &dyn PaymentRail,
    payer: &Address,
    signers: &BTreeSet<Address>,
    ledger: &LedgerState,
) -> Result<LedgerMutation, ProgramError> {
    if !signers.contains(payer) {
        return Err(ProgramError::UnauthorizedRequester);
    }
    if rail.declared_destination() != rail.treasury() {
        return Err(ProgramError::WrongTreasuryDestination);
    }
    let available = rail.source_balance(payer, ledger)?;
    let fee = rail.fee();
    if available < fee {
        return Err(ProgramError::InsufficientFunds {
            required: fee,
            available,
        });
    }
    debug!(rail = %rail.kind(), payer = %payer, fee, "payment verified");
    Ok(rail.transfer(payer, fee))
}

pub struct NativeRail {
    declared_treasury: Address,
    treasury: Address,
    fee: Amount,
}

impl PaymentRail for NativeRail {
    fn kind(&self) -> RailKind {
        RailKind::Native
    }

    fn fee(&self) -> Amount {
        self.fee
    }

    fn declared_destination(&self) -> Address {
        self.declared_treasury
    }

    fn treasury(&self) -> Address {
        self.treasury
    }

    fn source_balance(
        &self,
        payer: &Address,
        ledger: &LedgerState,
    ) -> Result<Amount, ProgramError> {
        Ok(ledger.balance(payer))
    }

    fn transfer(&self, payer: &Address, amount: Amount) -> LedgerMutation {
        LedgerMutation::NativeTransfer {
            from: *payer,
            to: self.treasury,
            amount,
        }
    }
}

pub struct TokenRail {
    token: SupportedToken,
    source: Address,
    declared_treasury: Address,
}

impl PaymentRail for TokenRail {
    fn kind(&self) -> RailKind {
        RailKind::Token
    }

    fn fee(&self) -> Amount {
        self.token.fee
    }

    fn declared_destination(&self) -> Address {
        self.declared_treasury
    }

    fn treasury(&self) -> Address {
        self.token.treasury_token_account
    }

    fn source_balance(
        &self,
        payer: &Address,
        ledger: &LedgerState,
    ) -> Result<Amount, ProgramError> {
        let source = ledger
            .token_account(&self.source)
            .ok_or(ProgramError::UnknownTokenAccount)?;
        if &source.owner != payer {
            return Err(ProgramError::TokenOwnerMismatch);
        }
        if source.mint != self.token.mint {
            return Err(ProgramError::MintMismatch);
        }
        if self.source != Address::associated_token_account(payer, &self.token.mint) {
            return Err(ProgramError::NotAssociatedTokenAccount);
        }
        let treasury = ledger
            .token_account(&self.token.treasury_token_account)
            .ok_or(ProgramError::UnknownTokenAccount)?;
        if treasury.mint != self.token.mint {
            return Err(ProgramError::MintMismatch);
        }
        Ok(source.amount)
    }

    fn transfer(&self, _payer: &Address, amount: Amount) -> LedgerMutation {
        LedgerMutation::TokenTransfer {
            from: self.source,
            to: self.token.treasury_token_account,
            mint: self.token.mint,
            amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        config: ProgramConfig,
        ledger: LedgerState,
        alice: Address,
        bob: Address,
        mint: Address,
    }

    fn fixture() -> Fixture {
        let alice = Address::derive(&[b"alice"]);
        let bob = Address::derive(&[b"bob"]);
        let mint = Address::derive(&[b"dust"]);
        let treasury_tokens = Address::derive(&[b"treasury-dust"]);
        let config = ProgramConfig {
            native_fee: 100,
            supported_tokens: vec![SupportedToken {
                mint,
                treasury_token_account: treasury_tokens,
                fee: 10,
            }],
            ..ProgramConfig::default()
        };
        let mut ledger = LedgerState::new();
        ledger.airdrop(&alice, 150).unwrap();
        ledger
            .create_token_account(treasury_tokens, config.treasury, mint)
            .unwrap();
        for owner in [alice, bob] {
            let ata = Address::associated_token_account(&owner, &mint);
            ledger.create_token_account(ata, owner, mint).unwrap();
            ledger.mint_to(&ata, 25).unwrap();
        }
        Fixture {
            config,
            ledger,
            alice,
            bob,
            mint,
        }
    }

    fn signers(addrs: &[Address]) -> BTreeSet<Address> {
        addrs.iter().copied().collect()
    }

    fn token_accounts(f: &Fixture, owner: &Address) -> PaymentAccounts {
        PaymentAccounts::Token {
            mint: f.mint,
            token_account: Address::associated_token_account(owner, &f.mint),
            treasury_token_account: f.config.supported_tokens[0].treasury_token_account,
            token_program: Address::token_program(),
        }
    }

    #[test]
    fn native_rail_pays_configured_treasury() {
        let f = fixture();
        let accounts = PaymentAccounts::Native {
            treasury: f.config.treasury,
        };
        let rail = accounts.rail(&f.config).unwrap();
        let mutation =
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.alice]), &f.ledger).unwrap();
        assert_eq!(
            mutation,
            LedgerMutation::NativeTransfer {
                from: f.alice,
                to: f.config.treasury,
                amount: 100,
            }
        );
    }

    #[test]
    fn wrong_destination_rejected_on_both_rails() {
        let f = fixture();
        let elsewhere = Address::derive(&[b"attacker"]);
        let native = PaymentAccounts::Native {
            treasury: elsewhere,
        };
        let rail = native.rail(&f.config).unwrap();
        assert_eq!(
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.alice]), &f.ledger).unwrap_err(),
            ProgramError::WrongTreasuryDestination
        );

        let mut token = token_accounts(&f, &f.alice);
        if let PaymentAccounts::Token {
            treasury_token_account,
            ..
        } = &mut token
        {
            *treasury_token_account = elsewhere;
        }
        let rail = token.rail(&f.config).unwrap();
        assert_eq!(
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.alice]), &f.ledger).unwrap_err(),
            ProgramError::WrongTreasuryDestination
        );
    }

    #[test]
    fn insufficient_funds_reports_amounts() {
        let f = fixture();
        let accounts = PaymentAccounts::Native {
            treasury: f.config.treasury,
        };
        let rail = accounts.rail(&f.config).unwrap();
        assert_eq!(
            verify_payment(rail.as_ref(), &f.bob, &signers(&[f.bob]), &f.ledger).unwrap_err(),
            ProgramError::InsufficientFunds {
                required: 100,
                available: 0,
            }
        );
    }

    #[test]
    fn unsigned_payer_is_unauthorized() {
        let f = fixture();
        let accounts = PaymentAccounts::Native {
            treasury: f.config.treasury,
        };
        let rail = accounts.rail(&f.config).unwrap();
        assert_eq!(
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.bob]), &f.ledger).unwrap_err(),
            ProgramError::UnauthorizedRequester
        );
    }

    #[test]
    fn token_rail_transfers_from_owned_account() {
        let f = fixture();
        let rail = token_accounts(&f, &f.alice).rail(&f.config).unwrap();
        assert_eq!(rail.kind(), RailKind::Token);
        let mutation =
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.alice]), &f.ledger).unwrap();
        assert_eq!(
            mutation,
            LedgerMutation::TokenTransfer {
                from: Address::associated_token_account(&f.alice, &f.mint),
                to: f.config.supported_tokens[0].treasury_token_account,
                mint: f.mint,
                amount: 10,
            }
        );
    }

    #[test]
    fn token_account_of_another_wallet_is_owner_mismatch() {
        let f = fixture();
        // bob's account holds enough tokens; the error must still be ownership
        let rail = token_accounts(&f, &f.bob).rail(&f.config).unwrap();
        assert_eq!(
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.alice]), &f.ledger).unwrap_err(),
            ProgramError::TokenOwnerMismatch
        );
    }

    #[test]
    fn token_rail_configuration_errors() {
        let f = fixture();
        let mut accounts = token_accounts(&f, &f.alice);
        if let PaymentAccounts::Token { token_program, .. } = &mut accounts {
            *token_program = Address::derive(&[b"fake-program"]);
        }
        assert_eq!(
            accounts.rail(&f.config).err(),
            Some(ProgramError::InvalidTokenProgram)
        );

        let mut accounts = token_accounts(&f, &f.alice);
        if let PaymentAccounts::Token { mint, .. } = &mut accounts {
            *mint = Address::derive(&[b"labs"]);
        }
        assert_eq!(accounts.rail(&f.config).err(), Some(ProgramError::UnsupportedMint));
    }

    #[test]
    fn token_account_of_other_mint_is_mint_mismatch() {
        let mut f = fixture();
        let labs = Address::derive(&[b"labs"]);
        let labs_account = Address::associated_token_account(&f.alice, &labs);
        f.ledger.create_token_account(labs_account, f.alice, labs).unwrap();
        f.ledger.mint_to(&labs_account, 1_000).unwrap();

        let mut accounts = token_accounts(&f, &f.alice);
        if let PaymentAccounts::Token { token_account, .. } = &mut accounts {
            *token_account = labs_account;
        }
        let rail = accounts.rail(&f.config).unwrap();
        assert_eq!(
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.alice]), &f.ledger).unwrap_err(),
            ProgramError::MintMismatch
        );
    }

    #[test]
    fn owned_side_account_is_not_associated() {
        let mut f = fixture();
        let side = Address::derive(&[b"alice-side-account"]);
        f.ledger.create_token_account(side, f.alice, f.mint).unwrap();
        f.ledger.mint_to(&side, 1_000).unwrap();

        let mut accounts = token_accounts(&f, &f.alice);
        if let PaymentAccounts::Token { token_account, .. } = &mut accounts {
            *token_account = side;
        }
        let rail = accounts.rail(&f.config).unwrap();
        assert_eq!(
            verify_payment(rail.as_ref(), &f.alice, &signers(&[f.alice]), &f.ledger).unwrap_err(),
            ProgramError::NotAssociatedTokenAccount
        );
    }
}
