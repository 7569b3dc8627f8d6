use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::SigningKey;
use ply_ledger::{Address, Invocation, Ledger, LedgerConfig, LedgerSnapshot};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ply", version, about = "Operator tooling for the PlayCoin ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an Ed25519 keypair and its ledger address.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Write a validated genesis file.
    Genesis(GenesisArgs),
    /// Print token constants, roles and optionally one or all accounts.
    Inspect {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        account: Option<Address>,
        /// List every account holding a balance or reserve.
        #[arg(long, conflicts_with = "account")]
        all: bool,
    },
    /// Run a JSON-lines script of invocations against a ledger.
    Replay {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        script: PathBuf,
        /// Apply the whole script as one all-or-nothing batch.
        #[arg(long)]
        atomic: bool,
        /// Batch timestamp; defaults to now.
        #[arg(long)]
        timestamp: Option<u64>,
        /// Where to write the resulting snapshot.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct GenesisArgs {
    #[arg(long)]
    owner: Address,
    #[arg(long)]
    admin: Address,
    #[arg(long)]
    vault: Address,
    #[arg(long, default_value = ply_ledger::config::DEFAULT_SYMBOL)]
    symbol: String,
    #[arg(long, default_value = ply_ledger::config::DEFAULT_NAME)]
    name: String,
    #[arg(long, default_value_t = ply_ledger::config::DEFAULT_DECIMALS)]
    decimals: u8,
    #[arg(long, default_value_t = ply_ledger::config::DEFAULT_MAX_TOKENS)]
    max_tokens: u64,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Source {
    /// Start from a genesis file.
    #[arg(long)]
    genesis: Option<PathBuf>,
    /// Resume from a snapshot written by `replay --out`.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

impl Source {
    fn load(&self) -> Result<Ledger> {
        if let Some(path) = &self.genesis {
            let config = LedgerConfig::load(path)?;
            return Ok(Ledger::new(config)?);
        }
        if let Some(path) = &self.snapshot {
            let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse snapshot {}", path.display()))?;
            return Ok(Ledger::from_snapshot(snapshot)?);
        }
        bail!("either --genesis or --snapshot is required")
    }
}

fn write_all(p: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).ok();
    }
    let mut f = fs::File::create(p).with_context(|| format!("create {}", p.display()))?;
    f.write_all(bytes)
        .with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

//==================== keygen / genesis ====================//

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("mkdir {}", out_dir.display()))?;

    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    let address = Address::from_public_key(pk.as_bytes());

    write_all(&out_dir.join("sk.hex"), hex::encode(sk_bytes).as_bytes())?;
    write_all(&out_dir.join("pk.hex"), hex::encode(pk.as_bytes()).as_bytes())?;
    write_all(&out_dir.join("address.txt"), address.to_string().as_bytes())?;
    println!("{address}");
    info!(%address, dir = %out_dir.display(), "keypair written");
    Ok(())
}

fn genesis_cmd(args: GenesisArgs) -> Result<()> {
    let config = LedgerConfig {
        symbol: args.symbol,
        name: args.name,
        decimals: args.decimals,
        max_tokens: args.max_tokens,
        owner: args.owner,
        admin: args.admin,
        vault: args.vault,
    };
    config.validate()?;
    let json = serde_json::to_vec_pretty(&config)?;
    write_all(&args.out, &json)?;
    println!(
        "genesis → {} (total supply {})",
        args.out.display(),
        config.total_supply()?
    );
    Ok(())
}

//==================== inspect ====================//

fn inspect_cmd(ledger: &Ledger, account: Option<Address>, all: bool) {
    let genesis = ledger.config();
    let roles = ledger.roles();
    println!("symbol        {}", ledger.symbol());
    println!("name          {}", ledger.name());
    println!("decimals      {}", ledger.decimals());
    println!("one token     {}", ledger.one_token_unit());
    println!("max tokens    {}", ledger.max_number_of_tokens());
    println!("total supply  {}", ledger.total_supply());
    for (label, holder, initial) in [
        ("owner", roles.owner, genesis.owner),
        ("admin", roles.admin, genesis.admin),
        ("vault", roles.vault, genesis.vault),
    ] {
        if holder == initial {
            println!("{label:<14}{holder}");
        } else {
            println!("{label:<14}{holder} (genesis {initial})");
        }
    }
    println!("height        {}", ledger.meta().height);
    println!("state root    {}", hex::encode(ledger.state_root()));
    if let Some(account) = account {
        println!("{account}");
        println!("  balance     {}", ledger.balance_of(&account));
        println!("  reserve     {}", ledger.reserve_of(&account));
    }
    if all {
        for (address, entry) in ledger
            .accounts()
            .filter(|(_, entry)| entry.balance > 0 || entry.reserve > 0)
        {
            println!("{address}  balance {}  reserve {}", entry.balance, entry.reserve);
        }
    }
}

//==================== replay ====================//

fn read_script(path: &Path) -> Result<(Vec<Invocation>, [u8; 32])> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let digest: [u8; 32] = Sha256::digest(&bytes).into();
    let text = String::from_utf8(bytes).context("script is not UTF-8")?;
    let mut invocations = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let invocation: Invocation = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: bad invocation", path.display(), lineno + 1))?;
        invocations.push(invocation);
    }
    Ok((invocations, digest))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn replay_cmd(
    mut ledger: Ledger,
    script: &Path,
    atomic: bool,
    timestamp: Option<u64>,
    out: Option<&Path>,
) -> Result<()> {
    let (invocations, script_digest) = read_script(script)?;
    let timestamp = timestamp.unwrap_or_else(now_secs);

    if atomic {
        ledger
            .apply_batch(&invocations, script_digest, timestamp)
            .context("atomic replay rejected")?;
    } else {
        let mut rejected = 0usize;
        for (index, invocation) in invocations.iter().enumerate() {
            if let Err(err) = ledger.execute(invocation) {
                rejected += 1;
                warn!(index, caller = %invocation.caller, %err, "invocation rejected");
                eprintln!("#{index}: rejected: {err}");
            }
        }
        println!("applied {}, rejected {rejected}", invocations.len() - rejected);
    }

    let mut stdout = std::io::stdout().lock();
    for event in ledger.drain_events() {
        writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
    }
    drop(stdout);

    ledger.check_conservation()?;
    println!("state root {}", hex::encode(ledger.state_root()));

    if let Some(out) = out {
        let json = serde_json::to_vec_pretty(&ledger.snapshot())?;
        write_all(out, &json)?;
        println!("snapshot → {}", out.display());
    }
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Genesis(args) => genesis_cmd(args),
        Command::Inspect {
            source,
            account,
            all,
        } => {
            let ledger = source.load()?;
            inspect_cmd(&ledger, account, all);
            Ok(())
        }
        Command::Replay {
            source,
            script,
            atomic,
            timestamp,
            out,
        } => replay_cmd(source.load()?, &script, atomic, timestamp, out.as_deref()),
    }
}
