use clap::{Parser, Subcommand};
use keeper::application::cache::SystemClock;
use keeper::application::engine::{Collaborators, KeeperEngine};
use keeper::config::KeeperConfig;
use keeper::domain::allocation::Allocation;
use keeper::domain::launch::LaunchRequest;
use keeper::domain::payment::{Authorization, ExactPayload, PaymentProof, PaymentRequirements};
use keeper::domain::pool::PoolKey;
use keeper::domain::ports::LedgerRef;
use keeper::domain::primitives::{Address, parse_address, parse_u256};
use keeper::infrastructure::in_memory::InMemoryStore;
use keeper::infrastructure::keys::HmacKeyDeriver;
use keeper::infrastructure::mock::{MockChain, MockFacilitator};
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Launch and payment keeper toolkit", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List payment ledger records as JSON lines.
    Ledger {
        /// Path to persistent database. Requires the `storage-rocksdb` feature.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Compute the id of a hash-addressed pool.
    PoolId {
        #[arg(long)]
        token_a: String,
        #[arg(long)]
        token_b: String,
        #[arg(long)]
        fee: u32,
        #[arg(long, allow_hyphen_values = true)]
        tick_spacing: i32,
        #[arg(long)]
        hooks: Option<String>,
    },
    /// Decode a base64 payment header and print its dedup key.
    ProofKey { header: String },
    /// Show how a launch value would be split.
    Allocate {
        /// Total value in wei.
        #[arg(long)]
        value: String,
        #[arg(long, default_value_t = 1)]
        wallets: u32,
    },
    /// Validate a configuration file.
    CheckConfig { path: PathBuf },
    /// Run a full launch against in-process mock collaborators.
    DryRun {
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        /// Paid value in wei.
        #[arg(long, default_value = "1000000000000000000")]
        value: String,
        #[arg(long, default_value_t = 1)]
        wallets: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => KeeperConfig::load(path).into_diagnostic()?,
        None => KeeperConfig::default(),
    };

    match cli.command {
        Command::Ledger { db_path } => {
            let ledger = open_ledger(db_path)?;
            let mut records = ledger.get_all().await.into_diagnostic()?;
            records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            for record in records {
                println!("{}", serde_json::to_string(&record).into_diagnostic()?);
            }
        }
        Command::PoolId {
            token_a,
            token_b,
            fee,
            tick_spacing,
            hooks,
        } => {
            let hooks = match hooks {
                Some(raw) => parse_address(&raw).into_diagnostic()?,
                None => Address::zero(),
            };
            let key = PoolKey::new(
                parse_address(&token_a).into_diagnostic()?,
                parse_address(&token_b).into_diagnostic()?,
                fee,
                tick_spacing,
                hooks,
            );
            println!("{:#x}", key.pool_id());
        }
        Command::ProofKey { header } => {
            let proof = PaymentProof::from_header(&header).into_diagnostic()?;
            println!("{}", proof.key().into_diagnostic()?);
            println!("payer {:#x}", proof.claimed_payer());
        }
        Command::Allocate { value, wallets } => {
            config.wallets.check(wallets).into_diagnostic()?;
            let total = parse_u256(&value).into_diagnostic()?;
            let allocation = Allocation::split(total, wallets, &config.fees).into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&allocation).into_diagnostic()?);
        }
        Command::CheckConfig { path } => {
            let loaded = KeeperConfig::load(&path).into_diagnostic()?;
            println!(
                "ok: {} chain(s), fee {} bps, wallets {}..={}",
                loaded.chains.len(),
                loaded.fees.protocol_fee_bps,
                loaded.wallets.min,
                loaded.wallets.max
            );
        }
        Command::DryRun {
            name,
            symbol,
            value,
            wallets,
        } => {
            let outcome = dry_run(config, name, symbol, value, wallets).await?;
            println!("{}", serde_json::to_string_pretty(&outcome).into_diagnostic()?);
        }
    }

    Ok(())
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<LedgerRef> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(path) = db_path {
        let store = keeper::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
        return Ok(Arc::new(store));
    }
    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}

async fn dry_run(
    config: KeeperConfig,
    name: String,
    symbol: String,
    value: String,
    wallet_count: u32,
) -> Result<keeper::domain::launch::LaunchOutcome> {
    let chain_id = config
        .chains
        .first()
        .map(|profile| profile.chain_id)
        .ok_or_else(|| miette::miette!("no chain configured"))?;

    let store = InMemoryStore::new();
    let mut secret = uuid::Uuid::new_v4().as_bytes().to_vec();
    secret.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    let collaborators = Collaborators {
        ledger: Arc::new(store.clone()),
        entities: Arc::new(store.clone()),
        pools: Arc::new(store),
        chain: Arc::new(MockChain::new()),
        facilitator: Arc::new(MockFacilitator::accepting()),
        indexer: None,
        log_sources: Vec::new(),
        keys: Arc::new(HmacKeyDeriver::new(&secret).into_diagnostic()?),
    };
    let engine = KeeperEngine::new(config, collaborators, Arc::new(SystemClock)).into_diagnostic()?;

    let pay_to = Address::repeat_byte(0x77);
    let requirements = PaymentRequirements {
        scheme: "exact".to_string(),
        network: "dry-run".to_string(),
        asset: Address::zero(),
        pay_to,
        max_amount_required: value.clone(),
        resource: "/launch".to_string(),
        description: "dry run".to_string(),
        max_timeout_seconds: 60,
    };
    let proof = PaymentProof {
        x402_version: 1,
        scheme: "exact".to_string(),
        network: "dry-run".to_string(),
        payload: ExactPayload {
            signature: "0x00".to_string(),
            authorization: Authorization {
                from: Address::repeat_byte(0x22),
                to: pay_to,
                value,
                valid_after: 0,
                valid_before: u64::MAX,
                nonce: format!("0x{}", uuid::Uuid::new_v4().simple()),
            },
        },
    };
    let request = LaunchRequest {
        payment_header: proof.to_header().into_diagnostic()?,
        requirements,
        chain_id,
        name,
        symbol,
        description: String::new(),
        wallet_count,
        owner_override: None,
    };

    let outcome = engine.execute_launch(&request).await.into_diagnostic()?;
    engine.shutdown().await;
    Ok(outcome)
}
