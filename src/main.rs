use std::{
    fs,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use tracing_subscriber::EnvFilter;

use sweepstake_ledger::{
    config::{ProgramConfig, SupportedToken},
    payment::PaymentAccounts,
    state::{Predictions, StructuredPredictions},
    store::Workspace,
    transaction::{Instruction, Message, Transaction},
    validator::sample_predictions,
    Address, SweepstakeProgram,
};

#[derive(Parser)]
#[command(name = "sweepstake", about = "Payment-gated prediction ledger")]
struct Cli {
    /// Workspace directory holding config.json, ledger.json and keys/
    #[arg(long, global = true, default_value = "workspace")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum RailArg {
    Native,
    Token,
}

#[derive(Subcommand)]
enum Command {
    /// Create a workspace with a fresh config and empty ledger
    Init {
        /// Native-coin fee in base units
        #[arg(long)]
        fee: Option<u64>,
        #[arg(long)]
        max_submissions: Option<u32>,
        /// Unix timestamp after which registration and submission close
        #[arg(long)]
        deadline: Option<i64>,
        /// Treasury key name or address
        #[arg(long)]
        treasury: Option<String>,
    },
    /// Generate a wallet key under keys/<name>.hex
    Keygen { name: String },
    /// Credit native coin to a wallet
    Airdrop { to: String, amount: u64 },
    /// Open a token account (associated account of owner+mint by default)
    CreateTokenAccount {
        owner: String,
        mint: String,
        #[arg(long)]
        address: Option<String>,
    },
    MintTo { account: String, amount: u64 },
    /// Accept a token mint for fee payment
    AddToken {
        mint: String,
        treasury_account: String,
        fee: u64,
    },
    /// Write a well-formed prediction file to edit
    Template { out: PathBuf },
    InitUser {
        wallet: String,
        #[arg(long, default_value_t = 1)]
        round: i64,
    },
    Submit {
        wallet: String,
        #[arg(long, default_value_t = 1)]
        round: i64,
        /// JSON file with structured predictions
        #[arg(long, conflicts_with = "digest", required_unless_present = "digest")]
        predictions: Option<PathBuf>,
        /// Hex SHA-256 commitment instead of full predictions
        #[arg(long)]
        digest: Option<String>,
        #[arg(long, value_enum, default_value = "native")]
        rail: RailArg,
        /// Override the fee destination (native treasury or treasury token account)
        #[arg(long)]
        treasury: Option<String>,
        #[arg(long)]
        mint: Option<String>,
        #[arg(long)]
        token_account: Option<String>,
    },
    ShowUser { wallet: String },
    History { wallet: String },
    Balance { account: String },
    Snapshot,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let ws = Workspace::open(&cli.dir);
    match cli.command {
        Command::Init {
            fee,
            max_submissions,
            deadline,
            treasury,
        } => init_cmd(&ws, fee, max_submissions, deadline, treasury),
        Command::Keygen { name } => {
            let key = ws.generate_key(&name)?;
            println!("{name}: {}", Address::from(key.verifying_key()));
            Ok(())
        }
        Command::Airdrop { to, amount } => {
            let to = ws.resolve(&to)?;
            let mut ledger = ws.load_ledger()?;
            ledger.airdrop(&to, amount)?;
            ws.save_ledger(&ledger)?;
            println!("{to}: {}", ledger.balance(&to));
            Ok(())
        }
        Command::CreateTokenAccount {
            owner,
            mint,
            address,
        } => {
            let owner = ws.resolve(&owner)?;
            let mint = ws.resolve(&mint)?;
            let address = match address {
                Some(address) => ws.resolve(&address)?,
                None => Address::associated_token_account(&owner, &mint),
            };
            let mut ledger = ws.load_ledger()?;
            ledger.create_token_account(address, owner, mint)?;
            ws.save_ledger(&ledger)?;
            println!("token account {address}");
            Ok(())
        }
        Command::MintTo { account, amount } => {
            let account = ws.resolve(&account)?;
            let mut ledger = ws.load_ledger()?;
            ledger.mint_to(&account, amount)?;
            ws.save_ledger(&ledger)?;
            Ok(())
        }
        Command::AddToken {
            mint,
            treasury_account,
            fee,
        } => {
            let mut config = ws.load_config()?;
            config.supported_tokens.push(SupportedToken {
                mint: ws.resolve(&mint)?,
                treasury_token_account: ws.resolve(&treasury_account)?,
                fee,
            });
            ws.save_config(&config)?;
            Ok(())
        }
        Command::Template { out } => {
            fs::write(&out, serde_json::to_vec_pretty(&sample_predictions())?)
                .with_context(|| format!("write {}", out.display()))?;
            println!("template written → {}", out.display());
            Ok(())
        }
        Command::InitUser { wallet, round } => {
            let key = ws.load_key(&wallet)?;
            let authority = Address::from(key.verifying_key());
            send(&ws, &key, Instruction::InitializeUser { authority, round_id: round })?;
            println!("user account {}", Address::user_account(&authority));
            Ok(())
        }
        Command::Submit {
            wallet,
            round,
            predictions,
            digest,
            rail,
            treasury,
            mint,
            token_account,
        } => {
            let key = ws.load_key(&wallet)?;
            let authority = Address::from(key.verifying_key());
            let predictions = match (predictions, digest) {
                (Some(path), _) => {
                    let bytes = fs::read(&path)
                        .with_context(|| format!("read {}", path.display()))?;
                    let structured: StructuredPredictions = serde_json::from_slice(&bytes)
                        .with_context(|| format!("parse {}", path.display()))?;
                    Predictions::Structured(structured)
                }
                (None, Some(digest)) => Predictions::Committed { digest },
                (None, None) => bail!("either --predictions or --digest is required"),
            };
            let config = ws.load_config()?;
            let payment = match rail {
                RailArg::Native => PaymentAccounts::Native {
                    treasury: match treasury {
                        Some(t) => ws.resolve(&t)?,
                        None => config.treasury,
                    },
                },
                RailArg::Token => {
                    let mint = mint
                        .as_deref()
                        .ok_or_else(|| anyhow!("--mint is required for the token rail"))?;
                    let mint = ws.resolve(mint)?;
                    let token_account = match token_account {
                        Some(a) => ws.resolve(&a)?,
                        None => Address::associated_token_account(&authority, &mint),
                    };
                    let treasury_token_account = match treasury {
                        Some(t) => ws.resolve(&t)?,
                        None => config
                            .supported_token(&mint)
                            .map(|token| token.treasury_token_account)
                            .ok_or_else(|| {
                                anyhow!("mint {mint} is not accepted; pass --treasury")
                            })?,
                    };
                    PaymentAccounts::Token {
                        mint,
                        token_account,
                        treasury_token_account,
                        token_program: Address::token_program(),
                    }
                }
            };
            send(
                &ws,
                &key,
                Instruction::Submit {
                    authority,
                    user_account: Address::user_account(&authority),
                    round_id: round,
                    predictions,
                    payment,
                },
            )
        }
        Command::ShowUser { wallet } => {
            let wallet = ws.resolve(&wallet)?;
            let ledger = ws.load_ledger()?;
            let user = ledger
                .user(&Address::user_account(&wallet))
                .ok_or_else(|| anyhow!("{wallet} has no user account"))?;
            println!("{}", serde_json::to_string_pretty(user)?);
            Ok(())
        }
        Command::History { wallet } => {
            let wallet = ws.resolve(&wallet)?;
            let program = SweepstakeProgram::new(ws.load_config()?);
            let ledger = ws.load_ledger()?;
            let history = program.history(&ledger, &wallet);
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
        Command::Balance { account } => {
            let account = ws.resolve(&account)?;
            let ledger = ws.load_ledger()?;
            match ledger.token_account(&account) {
                Some(token) => println!("{} (mint {})", token.amount, token.mint),
                None => println!("{}", ledger.balance(&account)),
            }
            Ok(())
        }
        Command::Snapshot => {
            let ledger = ws.load_ledger()?;
            let snapshot = ledger.snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            println!("merkle root {}", hex::encode(snapshot.merkle_root));
            Ok(())
        }
    }
}

//==================== workspace setup ====================//

fn init_cmd(
    ws: &Workspace,
    fee: Option<u64>,
    max_submissions: Option<u32>,
    deadline: Option<i64>,
    treasury: Option<String>,
) -> Result<()> {
    let mut config = ProgramConfig::default();
    if let Some(fee) = fee {
        config.native_fee = fee;
    }
    if let Some(max) = max_submissions {
        config.max_submissions_per_wallet = max;
    }
    config.submission_deadline = deadline;
    if let Some(treasury) = treasury {
        config.treasury = ws.resolve(&treasury)?;
    }
    ws.init(&config)?;
    println!("workspace ready, treasury {}", config.treasury);
    Ok(())
}

//==================== transactions ====================//

fn unix_now() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?
        .as_secs();
    Ok(i64::try_from(secs)?)
}

fn send(ws: &Workspace, key: &SigningKey, instruction: Instruction) -> Result<()> {
    let program = SweepstakeProgram::new(ws.load_config()?);
    let mut ledger = ws.load_ledger()?;
    let tx = Transaction::sign(Message::new(instruction, OsRng.next_u64()), &[key])?;
    let events = program.process(&mut ledger, &tx, unix_now()?)?;
    ws.save_ledger(&ledger)?;
    for event in events {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}
