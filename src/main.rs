//! sparebank1 - command-line client for the SpareBank 1 personal banking API

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sparebank1::api::{AccountFilter, DebitTransfer, TransactionQuery, TransactionSource};
use sparebank1::auth::{FileTokenStore, TokenStore};
use sparebank1::{Config, SpareBank1Api};

#[derive(Parser)]
#[command(name = "sparebank1")]
#[command(about = "Command-line client for the SpareBank 1 personal banking API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate with the bank
    Login {
        /// Run the browser flow even if a stored token exists
        #[arg(short, long)]
        force: bool,
    },

    /// Remove the stored token
    Logout,

    /// Show whether a token is stored and how long it is valid
    Status,

    /// List accounts
    Accounts {
        /// Leave out NOK accounts
        #[arg(long)]
        no_nok: bool,
        #[arg(long)]
        currency: bool,
        #[arg(long)]
        bsu: bool,
        #[arg(long)]
        credit_card: bool,
        #[arg(long)]
        ask: bool,
        #[arg(long)]
        pension: bool,
    },

    /// Look up account keys by account number
    Keys {
        #[arg(required = true)]
        account_numbers: Vec<String>,
    },

    /// Show the balance of an account
    Balance { account_number: String },

    /// Show the default account
    DefaultAccount,

    /// Show one account
    Account { key: String },

    /// Show the roles on an account
    Roles { key: String },

    /// Show account details
    Details { key: String },

    /// List transactions
    Transactions {
        #[arg(required = true)]
        account_keys: Vec<String>,

        /// First date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Maximum number of rows
        #[arg(short, long)]
        limit: Option<u32>,

        /// recent, historic or all (repeatable)
        #[arg(long)]
        source: Vec<TransactionSource>,

        /// Include payment details
        #[arg(long)]
        payment_details: bool,

        /// Use the classified listing
        #[arg(long)]
        classified: bool,

        /// Include merchant logos (classified listing only)
        #[arg(long, requires = "classified")]
        merchant_logo: bool,
    },

    /// Export booked transactions as CSV
    Export {
        account_key: String,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },

    /// Show details for one transaction
    Transaction {
        id: String,
        #[arg(long)]
        classified: bool,
        /// Include merchant data (classified details only)
        #[arg(long, requires = "classified")]
        merchant_data: bool,
    },

    /// Transfer between your own accounts
    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        amount: f64,
        #[arg(long, default_value = "NOK")]
        currency: String,
        /// Due date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        due: Option<NaiveDate>,
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Pay down a credit card
    PayCreditCard {
        #[arg(long)]
        from: String,
        /// Credit card account id
        #[arg(long)]
        card: String,
        amount: f64,
        #[arg(long)]
        due: Option<NaiveDate>,
    },

    /// Transfer to a pension policy
    Pension {
        #[arg(long)]
        from: String,
        #[arg(long)]
        policy: String,
        amount: f64,
        #[arg(long)]
        due: Option<NaiveDate>,
    },

    /// Show a child's accounts
    Child { id: String },
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn show_authorization_url(url: &str) {
    println!();
    println!("Go to the following URL to authorize:");
    println!("  {}", url);
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr, so JSON on stdout stays clean)
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Once installed the SIGINT handler stays for the whole process, so it
    // races the entire command.
    until_interrupted(run(cli), tokio::signal::ctrl_c()).await
}

/// Run `work` unless `interrupt` resolves first. Dropping `work` closes
/// anything it holds, including a pending callback listener.
async fn until_interrupted<W, I>(work: W, interrupt: I) -> Result<()>
where
    W: Future<Output = Result<()>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = work => result,
        _ = interrupt => anyhow::bail!("Interrupted"),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    match cli.command {
        Commands::Status => return status(&config),
        Commands::Logout => {
            FileTokenStore::new(config.token_path()?).clear()?;
            println!("Logged out.");
            return Ok(());
        }
        _ => {}
    }

    let api = SpareBank1Api::from_config(&config)?;
    let cancel = CancellationToken::new();

    if let Commands::Login { force } = cli.command {
        tracing::info!("Starting authentication flow...");
        if force {
            api.tokens().authorize(show_authorization_url, &cancel).await?;
        } else {
            api.authenticate(show_authorization_url, &cancel).await?;
        }
        println!("Login successful.");
        return Ok(());
    }

    api.authenticate(show_authorization_url, &cancel)
        .await
        .context("Authentication failed")?;

    match cli.command {
        Commands::Login { .. } | Commands::Logout | Commands::Status => {}
        Commands::Accounts {
            no_nok,
            currency,
            bsu,
            credit_card,
            ask,
            pension,
        } => {
            let filter = AccountFilter {
                include_nok_accounts: !no_nok,
                include_currency_accounts: currency,
                include_bsu_accounts: bsu,
                include_creditcard_accounts: credit_card,
                include_ask_accounts: ask,
                include_pension_accounts: pension,
            };
            let accounts = api.accounts().list(filter).await?;
            print_json(&serde_json::Value::Array(accounts))?;
        }
        Commands::Keys { account_numbers } => {
            print_json(&api.accounts().keys(&account_numbers).await?)?;
        }
        Commands::Balance { account_number } => {
            print_json(&api.accounts().balance(&account_number).await?)?;
        }
        Commands::DefaultAccount => {
            print_json(&api.accounts().default_account().await?)?;
        }
        Commands::Account { key } => {
            print_json(&api.accounts().get(&key).await?)?;
        }
        Commands::Roles { key } => {
            print_json(&api.accounts().roles(&key).await?)?;
        }
        Commands::Details { key } => {
            print_json(&api.accounts().details(&key).await?)?;
        }
        Commands::Transactions {
            account_keys,
            from,
            to,
            limit,
            source,
            payment_details,
            classified,
            merchant_logo,
        } => {
            let query = TransactionQuery {
                account_keys,
                from_date: from,
                to_date: to,
                row_limit: limit,
                transaction_source: source,
                enrich_with_payment_details: payment_details.then_some(true),
                enrich_with_merchant_logo: merchant_logo.then_some(true),
            };
            let body = if classified {
                api.transactions().list_classified(&query).await?
            } else {
                api.transactions().list(&query).await?
            };
            print_json(&body)?;
        }
        Commands::Export {
            account_key,
            from,
            to,
        } => {
            let csv = api
                .transactions()
                .export_csv(&account_key, from, to)
                .await?;
            print!("{}", csv);
        }
        Commands::Transaction {
            id,
            classified,
            merchant_data,
        } => {
            let body = if classified {
                api.transactions()
                    .classified_details(&id, merchant_data.then_some(true))
                    .await?
            } else {
                api.transactions().details(&id).await?
            };
            print_json(&body)?;
        }
        Commands::Transfer {
            from,
            to,
            amount,
            currency,
            due,
            message,
        } => {
            tracing::info!("Transferring {} {}...", amount, currency);
            let transfer = DebitTransfer {
                amount,
                from_account: from,
                to_account: to,
                currency_code: currency,
                due_date: due,
                message,
            };
            print_json(&api.transfers().between_accounts(&transfer).await?)?;
        }
        Commands::PayCreditCard {
            from,
            card,
            amount,
            due,
        } => {
            print_json(
                &api.transfers()
                    .to_credit_card(amount, &from, &card, due)
                    .await?,
            )?;
        }
        Commands::Pension {
            from,
            policy,
            amount,
            due,
        } => {
            print_json(&api.transfers().to_pension(amount, &from, &policy, due).await?)?;
        }
        Commands::Child { id } => {
            print_json(&api.child_accounts().get(&id).await?)?;
        }
    }

    Ok(())
}

/// Report the stored token without touching the network
fn status(config: &Config) -> Result<()> {
    let path = config.token_path()?;
    let store = FileTokenStore::new(&path);

    match store.load()? {
        Some(token) => {
            let now = chrono::Utc::now().timestamp();
            if token.expires_within(0, now) {
                println!("Token:      expired (refreshable on next call)");
            } else {
                println!("Token:      valid");
            }
            println!("  valid until: {}", token.valid_until());
            println!("  remaining:   {}s", token.remaining_secs(now));
            println!("  stored at:   {}", path.display());
        }
        None => {
            println!("Token:      none");
            println!("\nRun 'sparebank1 login' to authenticate.");
        }
    }

    Ok(())
}
