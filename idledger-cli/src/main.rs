use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use idledger_core::config::LedgerConfig;
use idledger_core::core_identity::{DalekCrypto, DeviceUid, Identity, PrivateIdentity};
use idledger_core::core_ledger::{
    backup, unix_millis_now, DetailsScope, LedgerStore, NullSink, OwnedIdentity, PreKey, PreKeyIssuer,
    RevocationRecord, VersionedDetails, VersionedDetailsBackup,
};
use idledger_core::logging::{init_logging_with_config, LogConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "idledger")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; `IDLEDGER_*` variables apply when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides the configuration
    #[arg(long)]
    db: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and apply migrations
    Init,

    /// Owned identity management
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Device pre-key management
    Prekey {
        #[command(subcommand)]
        action: PrekeyAction,
    },

    /// Identity details
    Details {
        #[command(subcommand)]
        action: DetailsAction,
    },

    /// Drop keycloak revocation records older than the configured retention
    PruneRevocations,
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Generate an identity and register it as owned
    New,
}

#[derive(Subcommand, Debug)]
enum PrekeyAction {
    /// Issue a pre-key for a device when the current one is due for renewal
    Issue {
        /// Hex encoded identity secret
        #[arg(long)]
        secret: String,

        /// Hex encoded device uid; a random one is used when absent
        #[arg(long)]
        device: Option<String>,

        /// Issue even if the latest key is still fresh
        #[arg(long)]
        force: bool,
    },

    /// Delete expired pre-keys of an owned identity
    Purge {
        /// Base58 encoded owned identity
        #[arg(long)]
        identity: String,
    },
}

#[derive(Subcommand, Debug)]
enum DetailsAction {
    /// Print every stored details version as JSON backup records
    Export {
        /// Base58 encoded owned identity
        #[arg(long)]
        identity: String,

        /// Export the details of this contact instead of the owned ones
        #[arg(long)]
        contact: Option<String>,
    },
}

fn load_config(args: &Args) -> Result<LedgerConfig> {
    let mut config = match &args.config {
        Some(path) => LedgerConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => LedgerConfig::from_env()?,
    };
    if let Some(db) = &args.db {
        config.store.database_path = Some(db.clone());
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &LedgerConfig) -> Result<LedgerStore> {
    if config.store.database_path.is_none() {
        warn!("No database path configured, changes will not persist");
    }
    Ok(LedgerStore::open(&config.store, Arc::new(NullSink))?)
}

fn run(command: Command, config: &LedgerConfig) -> Result<()> {
    let store = open_store(config)?;

    match command {
        Command::Init => {
            let version = store.schema_version()?;
            info!(schema_version = version, "Ledger initialized");
            println!("schema version {}", version);
        }
        Command::Identity { action: IdentityAction::New } => {
            let private = PrivateIdentity::generate(&mut rand::rng());
            store.run(|uow| OwnedIdentity::create(uow, private.identity()))?;
            info!(identity = %private.identity(), "Created owned identity");
            println!("identity {}", private.identity());
            println!("secret   {}", private.secret_hex());
        }
        Command::Prekey { action: PrekeyAction::Issue { secret, device, force } } => {
            let private = PrivateIdentity::from_hex(&secret).context("decoding identity secret")?;
            let mut rng = rand::rng();
            let device_uid = match device {
                Some(hex) => DeviceUid::from_hex(&hex).context("decoding device uid")?,
                None => DeviceUid::random(&mut rng),
            };
            let issuer = PreKeyIssuer::new(Arc::new(DalekCrypto), config.prekeys.clone());
            let now = unix_millis_now();

            let issued = store.run(|uow| {
                if force {
                    let expiration = now.saturating_add(config.prekeys.lifetime.as_millis() as i64);
                    issuer
                        .issue(uow, private.identity(), &private, &device_uid, expiration, &mut rng)
                        .map(Some)
                } else {
                    issuer.rotate_if_needed(uow, private.identity(), &private, &device_uid, now, &mut rng)
                }
            })?;

            match issued {
                Some(key) => println!("issued {} expiring at {}", key.key_id(), key.expiration_timestamp()),
                None => println!("latest pre-key is still fresh"),
            }
        }
        Command::Prekey { action: PrekeyAction::Purge { identity } } => {
            let owner = Identity::from_string(&identity).context("decoding identity")?;
            let now = unix_millis_now();
            let deleted = store.run(|uow| PreKey::delete_expired(uow, &owner, now))?;
            println!("deleted {} expired pre-keys", deleted);
        }
        Command::Details { action: DetailsAction::Export { identity, contact } } => {
            let owner = Identity::from_string(&identity).context("decoding identity")?;
            let scope = match contact {
                Some(contact) => {
                    DetailsScope::contact(owner, Identity::from_string(&contact).context("decoding contact")?)
                }
                None => DetailsScope::owned(owner),
            };
            let uow = store.begin()?;
            let records: Vec<VersionedDetailsBackup> = VersionedDetails::get_all(&uow, &scope)?
                .iter()
                .map(VersionedDetails::to_backup)
                .collect();
            uow.rollback()?;
            println!("{}", backup::to_json(&records)?);
        }
        Command::PruneRevocations => {
            let retention = config.revocations.retention.as_millis() as i64;
            let cutoff = unix_millis_now().saturating_sub(retention);
            let deleted = store.run(|uow| RevocationRecord::prune(uow, cutoff))?;
            println!("pruned {} revocation records", deleted);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let log_config = LogConfig::from_config(&config.logging)?;
    init_logging_with_config(log_config)?;
    idledger_core::metrics::describe_ledger_metrics();

    run(args.command, &config)
}
