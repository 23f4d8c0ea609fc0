//! Seedvault command line
//!
//! Manages password-protected seed phrases in a local JSON store. Every
//! invocation is its own process, so sessions opened here end when the
//! command exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedvault::mnemonic::DEFAULT_WORD_COUNT;
use seedvault::{generate_mnemonic, load_config, FileStorage, KeyVault, VaultError};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the account store (created on first write)
    #[arg(long, default_value = "seedvault.json")]
    data: PathBuf,

    /// Path to the JSON configuration file (defaults apply if missing)
    #[arg(long, default_value = "seedvault.config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the seed phrase for an account; generates one if no words are given
    SetSeed {
        account: String,
        password: String,
        /// Seed phrase words
        words: Vec<String>,
    },
    /// Print the seed phrase for an account
    GetSeed { account: String, password: String },
    /// Verify an account password
    Check { account: String, password: String },
    /// Generate and print a new seed phrase
    GenSeed {
        #[arg(long, default_value_t = DEFAULT_WORD_COUNT)]
        words: usize,
    },
    /// Show whether an account is set up
    Status { account: String },
    /// Forget an account and its stored seed
    Reset { account: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seedvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    let storage = FileStorage::open(&args.data, config.key_prefix.clone())
        .await
        .with_context(|| format!("Failed to open store {:?}", args.data))?;
    debug!("Using store {:?}", storage.path());

    let vault = KeyVault::new(Arc::new(storage), config)?;
    debug!(
        "Sessions lock after {:?} of inactivity",
        vault.config().lock_timeout()
    );

    let result = run(&vault, args.command).await;
    vault.lock_all().await;
    result
}

async fn run(vault: &KeyVault, command: Command) -> Result<()> {
    match command {
        Command::SetSeed {
            account,
            password,
            words,
        } => {
            let phrase = if words.is_empty() {
                let generated = generate_mnemonic(DEFAULT_WORD_COUNT)?;
                println!("New mnemonic: {}", generated.as_str());
                generated
            } else {
                zeroize::Zeroizing::new(words.join(" "))
            };

            vault
                .create_or_replace_seed(&account, &phrase, &password)
                .await
                .context("Failed to store seed")?;
            info!("Seed stored for '{}'", account);
        }
        Command::GetSeed { account, password } => {
            let phrase = vault.get_seed(&account, &password).await?;
            println!("Seed phrase: {}", phrase.as_str());
        }
        Command::Check { account, password } => match vault.check_password(&account, &password).await {
            Ok(()) => println!("Password is correct"),
            Err(VaultError::IncorrectPassword) => bail!("Incorrect password"),
            Err(e) => return Err(e.into()),
        },
        Command::Status { account } => {
            let status = vault.status(&account).await?;
            println!("{}: {}", account, status);
        }
        Command::Reset { account } => {
            vault.remove_account(&account).await?;
            println!("Account '{}' removed", account);
        }
        Command::GenSeed { words } => {
            let phrase = generate_mnemonic(words).context("Unsupported word count")?;
            println!("Generated mnemonic: {}", phrase.as_str());
        }
    }

    Ok(())
}
