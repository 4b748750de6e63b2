#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use merkdrop_core::{
    claim_message, commitment_message, mint_message, public_key_of, send_message, sign_message,
    signing_key_from_hex, AdminSignature, Amount, Hash32, PublicKeyBytes,
};
use merkdrop_node::{DigestProver, LedgerDb, Receipt, Sequencer};
use merkdrop_state::{HashedRecord, MintRequest, SendRequest, TransitionRequest};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Operator CLI for a merkdrop ledger.
#[derive(Parser, Debug)]
#[command(name = "merkdrop-node", version)]
struct Cli {
    /// Path to the ledger database (sled)
    #[arg(long = "db", global = true)]
    db: Option<PathBuf>,
    /// Admin public key, hex SEC1 compressed
    #[arg(long = "admin-key", global = true)]
    admin_key: Option<String>,
    /// Account claims are paid from (defaults to the admin key)
    #[arg(long = "reserve", global = true)]
    reserve: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Commit an allowlist and write the genesis state.
    Deploy {
        /// JSON array of `{"index", "owner", "counter"}` entries
        #[arg(long)]
        accounts: PathBuf,
    },
    /// Print the finalized state.
    Status,
    /// Print the witnesses for a slot.
    Witness {
        #[arg(long)]
        index: u32,
    },
    /// Check a record against the current commitment.
    Check {
        #[arg(long)]
        index: u32,
        #[arg(long)]
        owner: PublicKeyBytes,
        #[arg(long, default_value_t = 0)]
        counter: u32,
    },
    /// Claim the airdrop for a slot.
    Claim {
        #[arg(long)]
        index: u32,
        /// Admin signature over the claim message
        #[arg(long)]
        signature: AdminSignature,
    },
    /// Mint new tokens.
    Mint {
        #[arg(long)]
        to: PublicKeyBytes,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        signature: AdminSignature,
    },
    /// Move tokens between accounts.
    Send {
        #[arg(long)]
        from: PublicKeyBytes,
        #[arg(long)]
        to: PublicKeyBytes,
        #[arg(long)]
        amount: u64,
        /// Sender's transfer nonce (defaults to the next one on record)
        #[arg(long)]
        nonce: Option<u64>,
        /// Sender signature over the send message
        #[arg(long)]
        signature: AdminSignature,
    },
    /// Award one point to a slot's record.
    Award {
        #[arg(long)]
        index: u32,
    },
    /// Re-anchor the commitment to the off-chain tree (or an explicit root).
    SetCommitment {
        #[arg(long)]
        root: Option<Hash32>,
        /// Admin signature over the commitment message for the root
        #[arg(long)]
        signature: AdminSignature,
    },
    /// Print an account balance.
    Balance {
        #[arg(long)]
        account: PublicKeyBytes,
    },
    /// Sign a mint with a hex secret key (development helper).
    SignMint {
        #[arg(long, env = "MERKDROP_ADMIN_SECRET")]
        secret_key: String,
        #[arg(long)]
        to: PublicKeyBytes,
        #[arg(long)]
        amount: u64,
    },
    /// Sign a claim with a hex secret key (development helper).
    SignClaim {
        #[arg(long, env = "MERKDROP_ADMIN_SECRET")]
        secret_key: String,
        #[arg(long)]
        owner: PublicKeyBytes,
    },
    /// Sign a re-anchor with a hex secret key (development helper).
    SignCommitment {
        #[arg(long, env = "MERKDROP_ADMIN_SECRET")]
        secret_key: String,
        #[arg(long)]
        root: Hash32,
    },
    /// Sign a send with the sender's hex secret key (development helper).
    SignSend {
        #[arg(long)]
        secret_key: String,
        #[arg(long)]
        to: PublicKeyBytes,
        #[arg(long)]
        amount: u64,
        #[arg(long)]
        nonce: u64,
    },
}

#[derive(Deserialize, Debug)]
struct AccountEntry {
    index: u32,
    owner: String,
    #[serde(default)]
    counter: u32,
}

struct ResolvedConfig {
    db_path: PathBuf,
    admin: Option<PublicKeyBytes>,
    reserve: Option<PublicKeyBytes>,
}

fn resolve_config(cli: &Cli) -> Result<ResolvedConfig> {
    let db_path = cli
        .db
        .clone()
        .or_else(|| env::var("MERKDROP_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("merkdrop.db"));

    let admin = cli
        .admin_key
        .clone()
        .or_else(|| env::var("MERKDROP_ADMIN_KEY").ok())
        .map(|s| s.parse::<PublicKeyBytes>())
        .transpose()
        .context("invalid admin key")?;

    let reserve = cli
        .reserve
        .clone()
        .or_else(|| env::var("MERKDROP_RESERVE").ok())
        .map(|s| s.parse::<PublicKeyBytes>())
        .transpose()
        .context("invalid reserve key")?
        .or(admin);

    Ok(ResolvedConfig {
        db_path,
        admin,
        reserve,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("merkdrop_node=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;

    match cli.command {
        Command::SignMint {
            secret_key,
            to,
            amount,
        } => {
            let sk = signing_key_from_hex(&secret_key)?;
            let sig = sign_message(&sk, &mint_message(Amount::from_units(amount), &to));
            println!("signer={} signature={}", public_key_of(&sk), sig);
            return Ok(());
        }
        Command::SignClaim { secret_key, owner } => {
            let sk = signing_key_from_hex(&secret_key)?;
            let sig = sign_message(&sk, &claim_message(&owner));
            println!("signer={} signature={}", public_key_of(&sk), sig);
            return Ok(());
        }
        Command::SignCommitment { secret_key, root } => {
            let sk = signing_key_from_hex(&secret_key)?;
            let sig = sign_message(&sk, &commitment_message(&root));
            println!("signer={} signature={}", public_key_of(&sk), sig);
            return Ok(());
        }
        Command::SignSend {
            secret_key,
            to,
            amount,
            nonce,
        } => {
            let sk = signing_key_from_hex(&secret_key)?;
            let sig = sign_message(&sk, &send_message(Amount::from_units(amount), &to, nonce));
            println!("signer={} nonce={} signature={}", public_key_of(&sk), nonce, sig);
            return Ok(());
        }
        Command::Deploy { accounts } => {
            let admin = cfg
                .admin
                .ok_or_else(|| anyhow!("deploy needs --admin-key or MERKDROP_ADMIN_KEY"))?;
            let reserve = cfg.reserve.unwrap_or(admin);
            let records = load_accounts(&accounts)?;
            let db = LedgerDb::open(&cfg.db_path)?;
            let seq = Sequencer::deploy(db, DigestProver::new(admin), admin, reserve, records)?;
            print_state(&seq)?;
            return Ok(());
        }
        _ => {}
    }

    let db = LedgerDb::open(&cfg.db_path)?;
    let admin = db
        .admin()?
        .ok_or_else(|| anyhow!("{} is not deployed", cfg.db_path.display()))?;
    if let Some(configured) = cfg.admin {
        if configured != admin {
            bail!("--admin-key does not match the deployed admin {admin}");
        }
    }
    let mut seq = Sequencer::open(db, DigestProver::new(admin))?;
    info!(db = %cfg.db_path.display(), "ledger opened");

    match cli.command {
        Command::Status => print_state(&seq)?,
        Command::Witness { index } => {
            let world = seq.world();
            let membership = world.membership_witness(index)?;
            let siblings: Vec<String> = membership.siblings().iter().map(|d| d.to_string()).collect();
            println!(
                "{}",
                json!({
                    "index": index,
                    "record": world.record(index).map(|r| json!({
                        "owner": r.owner.to_string(),
                        "counter": r.counter,
                    })),
                    "siblings": siblings,
                    "claimed": world.is_claimed(index),
                })
            );
        }
        Command::Check {
            index,
            owner,
            counter,
        } => {
            let world = seq.world();
            let witness = world.membership_witness(index)?;
            match world.check_inclusion(&HashedRecord::new(owner, counter), &witness) {
                Ok(()) => println!("included"),
                Err(err) => println!("not included: {err}"),
            }
        }
        Command::Claim { index, signature } => print_receipt(&seq.claim(index, signature)?),
        Command::Mint {
            to,
            amount,
            signature,
        } => {
            let request = TransitionRequest::Mint(MintRequest {
                recipient: to,
                amount: Amount::from_units(amount),
                signature,
            });
            print_receipt(&seq.submit(&request)?);
        }
        Command::Send {
            from,
            to,
            amount,
            nonce,
            signature,
        } => {
            seq.refresh()?;
            let nonce = nonce.unwrap_or_else(|| seq.world().ledger().nonce_of(&from));
            let request = TransitionRequest::Send(SendRequest {
                sender: from,
                recipient: to,
                amount: Amount::from_units(amount),
                nonce,
                signature,
            });
            print_receipt(&seq.submit(&request)?);
        }
        Command::Award { index } => print_receipt(&seq.award_point(index)?),
        Command::SetCommitment { root, signature } => {
            let root = root.unwrap_or_else(|| seq.offchain_root());
            print_receipt(&seq.set_commitment(root, signature)?);
        }
        Command::Balance { account } => {
            seq.refresh()?;
            let ledger = seq.world().ledger();
            println!(
                "balance={} nonce={}",
                ledger.balance_of(&account).units(),
                ledger.nonce_of(&account)
            );
        }
        Command::Deploy { .. }
        | Command::SignMint { .. }
        | Command::SignClaim { .. }
        | Command::SignCommitment { .. }
        | Command::SignSend { .. } => {}
    }
    Ok(())
}

fn load_accounts(path: &Path) -> Result<Vec<(u32, HashedRecord)>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let entries: Vec<AccountEntry> = serde_json::from_str(&raw).context("parsing accounts")?;
    entries
        .into_iter()
        .map(|e| {
            let owner = e
                .owner
                .parse::<PublicKeyBytes>()
                .with_context(|| format!("owner of slot {}", e.index))?;
            Ok((e.index, HashedRecord::new(owner, e.counter)))
        })
        .collect()
}

fn print_state(seq: &Sequencer<DigestProver>) -> Result<()> {
    let state = seq.state()?;
    println!(
        "{}",
        json!({
            "height": seq.db().height()?,
            "commitment_root": state.commitment_root.to_string(),
            "nullifier_root": state.nullifier_root.to_string(),
            "total_supply": state.total_supply.units(),
            "state_hash": state.state_hash().to_string(),
            "offchain_root": seq.offchain_root().to_string(),
        })
    );
    Ok(())
}

fn print_receipt(receipt: &Receipt) {
    println!(
        "height={} state={} supply={} proof={}",
        receipt.height,
        receipt.state.state_hash(),
        receipt.state.total_supply.units(),
        receipt.proof.0
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_claim() {
        let sig = "00".repeat(64);
        let cli = Cli::try_parse_from(["merkdrop-node", "--db", "x.db", "claim", "--index", "3", "--signature", sig.as_str()])
            .expect("parse");
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        assert!(matches!(cli.command, Command::Claim { index: 3, .. }));
    }

    #[test]
    fn set_commitment_requires_signature() {
        let root = "ab".repeat(32);
        let unsigned = Cli::try_parse_from(["merkdrop-node", "set-commitment", "--root", root.as_str()]);
        assert!(unsigned.is_err());

        let sig = "00".repeat(64);
        let cli = Cli::try_parse_from([
            "merkdrop-node",
            "set-commitment",
            "--root",
            root.as_str(),
            "--signature",
            sig.as_str(),
        ])
        .expect("parse");
        assert!(matches!(cli.command, Command::SetCommitment { root: Some(_), .. }));
    }

    #[test]
    fn reserve_defaults_to_admin() {
        let admin = format!("02{}", "11".repeat(32));
        let cli = Cli::try_parse_from(["merkdrop-node", "--admin-key", admin.as_str(), "--db", "y.db", "status"])
            .expect("parse");
        let cfg = resolve_config(&cli).expect("config");
        assert_eq!(cfg.db_path, PathBuf::from("y.db"));
        assert!(cfg.admin.is_some());
        assert_eq!(cfg.reserve, cfg.admin);
    }

    #[test]
    fn accounts_file_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("accounts.json");
        let owner = format!("03{}", "22".repeat(32));
        fs::write(&path, format!(r#"[{{"index": 4, "owner": "{owner}"}}]"#)).expect("write");
        let records = load_accounts(&path).expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, 4);
        assert_eq!(records[0].1.counter, 0);
    }
}
