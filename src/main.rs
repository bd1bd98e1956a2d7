use carbonledger::application::engine::SettlementEngine;
use carbonledger::domain::company::CompanyId;
use carbonledger::domain::ports::{Identity, IdentityProvider, LedgerStore, LedgerStoreBox};
use carbonledger::domain::request::{
    NewRequest, Price, Quantity, RequestId, RequestPatch, SettleAction, TradeType,
};
use carbonledger::infrastructure::identity::StaticTokenIdentity;
use carbonledger::infrastructure::in_memory::InMemoryLedgerStore;
use carbonledger::interfaces::csv::report_writer::{BalanceRow, ReportWriter};
use carbonledger::interfaces::csv::seed_reader::{SeedCompany, SeedReader};
use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a persistent database. Defaults to a fresh in-memory store.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create companies with opening balances (CSV file or built-in demo set)
    Seed {
        /// CSV file with name,carbon,cash records
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List all companies and their balances
    Companies,
    /// Show the acting company's balance
    Balance {
        #[arg(long)]
        token: String,
    },
    /// Submit a trade request to a counterparty
    Submit {
        #[arg(long)]
        token: String,
        /// Recipient company id
        #[arg(long)]
        recipient: u64,
        #[arg(long, value_enum)]
        side: SideArg,
        /// Per-unit price
        #[arg(long)]
        price: Decimal,
        /// Number of carbon credits
        #[arg(long)]
        quantity: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Edit a pending request you made
    Edit {
        id: u64,
        #[arg(long)]
        token: String,
        #[arg(long)]
        recipient: Option<u64>,
        #[arg(long, value_enum)]
        side: Option<SideArg>,
        #[arg(long)]
        price: Option<Decimal>,
        #[arg(long)]
        quantity: Option<i64>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete a request you made
    Withdraw {
        id: u64,
        #[arg(long)]
        token: String,
    },
    /// List pending requests
    Requests {
        #[arg(value_enum)]
        direction: DirectionArg,
        #[arg(long)]
        token: String,
    },
    /// Accept or reject a request addressed to you
    Process {
        id: u64,
        #[arg(long)]
        token: String,
        #[arg(long, value_enum)]
        action: ActionArg,
    },
    /// Accept or reject a batch of requests, isolating per-item failures
    BulkProcess {
        #[arg(required = true)]
        ids: Vec<u64>,
        #[arg(long)]
        token: String,
        #[arg(long, value_enum)]
        action: ActionArg,
    },
    /// Run a self-contained in-memory trading scenario
    Demo,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

impl From<SideArg> for TradeType {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Buy => TradeType::Buy,
            SideArg::Sell => TradeType::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ActionArg {
    Accept,
    Reject,
}

impl From<ActionArg> for SettleAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Accept => SettleAction::Accept,
            ActionArg::Reject => SettleAction::Reject,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Made,
    Received,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Two handles to the same backend: one for the engine, one for direct
    // reads (balances, token resolution).
    let (engine_store, store) = build_stores(cli.db_path.as_deref())?;
    if cli.db_path.is_none() && !matches!(cli.command, Command::Demo) {
        tracing::warn!("no --db-path given: using an in-memory store, changes will not persist");
    }
    let engine = SettlementEngine::new(engine_store);

    match cli.command {
        Command::Seed { file } => seed(&engine, store.as_ref(), file.as_deref())
            .await
            .into_diagnostic()?,
        Command::Companies => {
            let rows = balance_rows(store.as_ref()).await.into_diagnostic()?;
            ReportWriter::new(io::stdout().lock())
                .write_rows(rows)
                .into_diagnostic()?;
        }
        Command::Balance { token } => {
            let identity = resolve(store.as_ref(), &token).await.into_diagnostic()?;
            let rows: Vec<BalanceRow> = balance_rows(store.as_ref())
                .await
                .into_diagnostic()?
                .into_iter()
                .filter(|row| row.id == identity.company_id)
                .collect();
            ReportWriter::new(io::stdout().lock())
                .write_rows(rows)
                .into_diagnostic()?;
        }
        Command::Submit {
            token,
            recipient,
            side,
            price,
            quantity,
            reason,
        } => {
            let identity = resolve(store.as_ref(), &token).await.into_diagnostic()?;
            let new = NewRequest::new(
                identity.company_id,
                CompanyId(recipient),
                side.into(),
                price,
                quantity,
                reason,
            )
            .into_diagnostic()?;
            let request = engine.create_request(new).await.into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&request).into_diagnostic()?);
        }
        Command::Edit {
            id,
            token,
            recipient,
            side,
            price,
            quantity,
            reason,
        } => {
            let identity = resolve(store.as_ref(), &token).await.into_diagnostic()?;
            let patch = RequestPatch {
                recipient: recipient.map(CompanyId),
                r#type: side.map(Into::into),
                price: price.map(Price::new).transpose().into_diagnostic()?,
                quantity: quantity.map(Quantity::new).transpose().into_diagnostic()?,
                reason,
            };
            let request = engine
                .update_request(RequestId(id), identity.company_id, patch)
                .await
                .into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&request).into_diagnostic()?);
        }
        Command::Withdraw { id, token } => {
            let identity = resolve(store.as_ref(), &token).await.into_diagnostic()?;
            engine
                .delete_request(RequestId(id), identity.company_id)
                .await
                .into_diagnostic()?;
            println!("Request {id} deleted");
        }
        Command::Requests { direction, token } => {
            let identity = resolve(store.as_ref(), &token).await.into_diagnostic()?;
            let views = match direction {
                DirectionArg::Made => engine.list_made(identity.company_id).await,
                DirectionArg::Received => engine.list_received(identity.company_id).await,
            }
            .into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&views).into_diagnostic()?);
        }
        Command::Process { id, token, action } => {
            let identity = resolve(store.as_ref(), &token).await.into_diagnostic()?;
            let request = engine
                .settle(RequestId(id), identity.company_id, action.into())
                .await
                .into_diagnostic()?;
            println!("Request {} is now {:?}", request.id, request.status);
        }
        Command::BulkProcess { ids, token, action } => {
            let identity = resolve(store.as_ref(), &token).await.into_diagnostic()?;
            let ids: Vec<RequestId> = ids.into_iter().map(RequestId).collect();
            let outcome = engine
                .bulk_settle(&ids, identity.company_id, action.into())
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome).into_diagnostic()?);
        }
        Command::Demo => demo().await.into_diagnostic()?,
    }

    Ok(())
}

fn build_stores(db_path: Option<&Path>) -> Result<(LedgerStoreBox, LedgerStoreBox)> {
    match db_path {
        Some(path) => open_persistent(path),
        None => {
            let store = InMemoryLedgerStore::new();
            Ok((Box::new(store.clone()), Box::new(store)))
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_persistent(path: &Path) -> Result<(LedgerStoreBox, LedgerStoreBox)> {
    let store =
        carbonledger::infrastructure::rocksdb::RocksDbLedgerStore::open(path).into_diagnostic()?;
    Ok((Box::new(store.clone()), Box::new(store)))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_persistent(_path: &Path) -> Result<(LedgerStoreBox, LedgerStoreBox)> {
    miette::bail!("carbonledger was built without the storage-rocksdb feature; omit --db-path")
}

/// Resolves a CLI token to an identity. Every known company has one token,
/// derived from its name.
async fn resolve(store: &dyn LedgerStore, token: &str) -> carbonledger::error::Result<Identity> {
    let companies = store.companies().await?;
    let provider = StaticTokenIdentity::for_companies(&companies);
    provider.authenticate(token).await
}

async fn balance_rows(store: &dyn LedgerStore) -> carbonledger::error::Result<Vec<BalanceRow>> {
    let mut rows = Vec::new();
    for company in store.companies().await? {
        if let Some(balance) = store.balance(company.id).await? {
            rows.push(BalanceRow {
                id: company.id,
                name: company.name,
                carbon: balance.carbon,
                cash: balance.cash,
            });
        }
    }
    Ok(rows)
}

fn demo_seeds() -> Vec<SeedCompany> {
    vec![
        SeedCompany {
            name: "Green Energy Corp".to_string(),
            carbon: 1500,
            cash: dec!(50000),
        },
        SeedCompany {
            name: "Eco Solutions Ltd".to_string(),
            carbon: 2000,
            cash: dec!(75000),
        },
        SeedCompany {
            name: "Carbon Neutral Inc".to_string(),
            carbon: 1000,
            cash: dec!(60000),
        },
    ]
}

async fn seed(
    engine: &SettlementEngine,
    store: &dyn LedgerStore,
    file: Option<&Path>,
) -> carbonledger::error::Result<()> {
    let seeds: Vec<SeedCompany> = match file {
        Some(path) => {
            let source = File::open(path)?;
            SeedReader::new(source)
                .records()
                .collect::<carbonledger::error::Result<_>>()?
        }
        None => demo_seeds(),
    };

    let mut companies = Vec::new();
    for seed in &seeds {
        match store.company_by_name(&seed.name).await? {
            Some(existing) => {
                println!("Company {} already exists (id {})", existing.name, existing.id);
                companies.push(existing);
            }
            None => {
                let company = store
                    .create_company(&seed.name, seed.carbon, seed.cash)
                    .await?;
                println!(
                    "Seeded {} (id {}, token {})",
                    company.name,
                    company.id,
                    StaticTokenIdentity::token_for(&company.name)
                );
                companies.push(company);
            }
        }
    }

    // The built-in demo set also gets two sample pending requests, unless a
    // similar one is already outstanding.
    if file.is_none() && companies.len() >= 3 {
        let samples = [
            (
                companies[0].id,
                companies[1].id,
                TradeType::Buy,
                dec!(50),
                100,
                "Need carbon credits for Q4 compliance",
            ),
            (
                companies[1].id,
                companies[2].id,
                TradeType::Sell,
                dec!(48),
                150,
                "Excess credits available",
            ),
        ];
        for (requestor, recipient, r#type, price, quantity, reason) in samples {
            let outstanding = engine.list_made(requestor).await?;
            if outstanding
                .iter()
                .any(|v| v.request.recipient == recipient && v.request.r#type == r#type)
            {
                println!("Similar request from company {requestor} already exists");
                continue;
            }
            let new = NewRequest::new(
                requestor,
                recipient,
                r#type,
                price,
                quantity,
                Some(reason.to_string()),
            )?;
            let request = engine.create_request(new).await?;
            println!(
                "Created request {} from company {} to {}",
                request.id, request.requestor, request.recipient
            );
        }
    }

    Ok(())
}

/// End-to-end scenario on a fresh in-memory store: seed the demo companies,
/// submit two requests, accept one and reject the other, print the final
/// balances.
async fn demo() -> carbonledger::error::Result<()> {
    let store = InMemoryLedgerStore::new();
    let engine = SettlementEngine::new(Box::new(store.clone()));
    seed(&engine, &store, None).await?;

    let eco = resolve(&store, "eco-solutions-ltd").await?;
    let neutral = resolve(&store, "carbon-neutral-inc").await?;

    let received = engine.list_received(eco.company_id).await?;
    let buy_id = received[0].request.id;
    let settled = engine
        .settle(buy_id, eco.company_id, SettleAction::Accept)
        .await?;
    println!(
        "Accepted request {}: {} credits at {} each",
        settled.id,
        settled.quantity.value(),
        settled.price.value()
    );

    let received = engine.list_received(neutral.company_id).await?;
    let sell_id = received[0].request.id;
    let settled = engine
        .settle(sell_id, neutral.company_id, SettleAction::Reject)
        .await?;
    println!("Rejected request {}", settled.id);

    println!("Final balances:");
    ReportWriter::new(io::stdout().lock()).write_rows(balance_rows(&store).await?)?;
    Ok(())
}
