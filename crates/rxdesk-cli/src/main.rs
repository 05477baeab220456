//! rxdesk CLI - command-line dashboard for the pharmacy support desk.
//!
//! This is the entry point for the `rxdesk` binary.

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rxdesk_core::{AgentId, ConversationId, ProductId};
use rxdesk_store::{
    Conversation, ConversationStatus, LocalFeed, PersistentStore, Product, ProductFilter,
    RestConfig, RestStore, RocksStore, StoreError,
};
use rxdesk_sync::{
    DragController, DropAction, EngineHandle, SyncConfig, SyncEngine, SyncError,
    TransitionOutcome,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// rxdesk - pharmacy support desk dashboard.
#[derive(Parser, Debug)]
#[command(name = "rxdesk")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of the local `RocksDB` backend.
    #[arg(long, env = "RXDESK_DATA_DIR", default_value = "rxdesk-data")]
    data_dir: PathBuf,

    /// Base URL of a hosted REST backend (uses the local backend if unset).
    #[arg(long, env = "RXDESK_BACKEND_URL")]
    backend_url: Option<String>,

    /// API key for the REST backend.
    #[arg(long, env = "RXDESK_API_KEY")]
    api_key: Option<String>,

    /// Agent acting on the board.
    #[arg(long, env = "RXDESK_AGENT")]
    agent: Option<String>,

    /// Seconds before an unanswered write is reverted.
    #[arg(long, env = "RXDESK_WRITE_TIMEOUT", default_value = "15")]
    write_timeout: u64,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the board.
    Board {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Move a conversation to another column, as if dragged there.
    Move {
        /// Conversation id.
        id: String,
        /// Target column: ongoing, waiting or completed.
        status: ConversationStatus,
    },
    /// Assign a conversation to an agent, or clear the assignment.
    Assign {
        /// Conversation id.
        id: String,
        /// Agent id; omit to clear.
        agent: Option<String>,
    },
    /// Follow the board live until interrupted.
    Watch,
    /// Load conversations from a JSON array into the local backend.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },
    /// Inventory commands (local backend only).
    #[command(subcommand)]
    Stock(StockCommand),
}

#[derive(Subcommand, Debug)]
enum StockCommand {
    /// List products.
    List {
        /// Match name or description.
        #[arg(long)]
        search: Option<String>,
        /// Exact category.
        #[arg(long)]
        category: Option<String>,
        /// Only products at or below their threshold.
        #[arg(long)]
        low: bool,
    },
    /// Add (or, with a negative delta, remove) units of a product.
    Adjust {
        /// Product id.
        id: String,
        /// Units to add.
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Load products from a JSON array.
    Import {
        /// Path to the JSON file.
        file: PathBuf,
    },
}

/// Where conversations come from.
struct Backend {
    store: Arc<dyn PersistentStore>,
    feed: LocalFeed,
    local: Option<Arc<RocksStore>>,
}

impl Backend {
    fn open(args: &Args) -> anyhow::Result<Self> {
        if let Some(url) = &args.backend_url {
            let key = args
                .api_key
                .clone()
                .context("--api-key is required with --backend-url")?;
            let store = RestStore::new(RestConfig::new(url.clone(), key))?;
            tracing::info!(backend_url = %url, "Using REST backend");
            // The REST backend has no push channel; the feed stays idle.
            return Ok(Self {
                store: Arc::new(store),
                feed: LocalFeed::new(),
                local: None,
            });
        }

        let store = Arc::new(
            RocksStore::open(&args.data_dir)
                .with_context(|| format!("opening {}", args.data_dir.display()))?,
        );
        tracing::info!(data_dir = %args.data_dir.display(), "Using local backend");
        Ok(Self {
            feed: store.feed().clone(),
            store: Arc::clone(&store) as Arc<dyn PersistentStore>,
            local: Some(store),
        })
    }

    fn local(&self) -> anyhow::Result<&RocksStore> {
        match &self.local {
            Some(store) => Ok(store),
            None => bail!("this command needs the local backend"),
        }
    }

    /// Mount a dashboard view and wait for the initial load.
    async fn mount(&self, config: SyncConfig) -> anyhow::Result<EngineHandle> {
        let engine = SyncEngine::mount(Arc::clone(&self.store), &self.feed, config);
        let view = engine.wait_until(|view| !view.loading).await?;
        if let Some(error) = &view.fetch_error {
            return Err(SyncError::FetchFailure(error.clone()).into());
        }
        Ok(engine)
    }
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "info,rxdesk_cli=debug,rxdesk_sync=debug,rxdesk_store=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(file: &Path) -> anyhow::Result<Vec<T>> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))
}

/// True if any cause in the chain is a failure the user can simply retry.
fn is_retriable(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause
            .downcast_ref::<SyncError>()
            .is_some_and(SyncError::is_retriable)
            || cause
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_retriable)
    })
}

/// Drop `id` on the `status` column the way the board does.
async fn move_conversation(
    engine: &EngineHandle,
    agent: Option<AgentId>,
    id: &ConversationId,
    status: ConversationStatus,
) -> anyhow::Result<String> {
    let source = engine
        .view()
        .get(id)
        .map(|c| c.status)
        .with_context(|| format!("conversation {id} is not on the board"))?;

    let controller = DragController::new(agent);
    let drop = DropAction {
        conversation_id: id.clone(),
        source,
        destination: Some(status),
    };
    Ok(match controller.handle_drop(engine, &drop).await? {
        Some(TransitionOutcome::Applied) => format!("{id}: {source} -> {status}"),
        Some(TransitionOutcome::Unchanged) | None => format!("{id}: already {status}"),
    })
}

async fn assign_conversation(
    engine: &EngineHandle,
    id: &ConversationId,
    assignee: Option<AgentId>,
) -> anyhow::Result<String> {
    engine.assign(id, assignee.clone()).await?;
    Ok(match assignee {
        Some(agent) => format!("{id}: assigned to {agent}"),
        None => format!("{id}: unassigned"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let result = run(args).await;
    if let Err(error) = &result {
        if is_retriable(error) {
            eprintln!("hint: the backend may be unavailable; run the command again");
        }
    }
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    let backend = Backend::open(&args)?;
    let config = SyncConfig {
        write_timeout_seconds: args.write_timeout,
        ..SyncConfig::default()
    };
    let agent = args.agent.as_deref().map(AgentId::new).transpose()?;

    match args.command {
        Command::Board { json } => {
            let engine = backend.mount(config).await?;
            let board = engine.board();
            if json {
                println!("{}", serde_json::to_string_pretty(&board)?);
            } else {
                print!("{}", render::board(&board));
            }
            engine.unmount().await;
        }
        Command::Move { id, status } => {
            let id = ConversationId::new(id)?;
            let engine = backend.mount(config).await?;
            let outcome = move_conversation(&engine, agent, &id, status).await;
            engine.unmount().await;
            println!("{}", outcome?);
        }
        Command::Assign { id, agent } => {
            let id = ConversationId::new(id)?;
            let assignee = agent.map(AgentId::new).transpose()?;
            let engine = backend.mount(config).await?;
            let outcome = assign_conversation(&engine, &id, assignee).await;
            engine.unmount().await;
            println!("{}", outcome?);
        }
        Command::Watch => watch(&backend, config).await?,
        Command::Import { file } => {
            let store = backend.local()?;
            let conversations: Vec<Conversation> = read_json(&file)?;
            for conversation in &conversations {
                store.put_conversation(conversation)?;
            }
            println!("imported {} conversation(s)", conversations.len());
        }
        Command::Stock(command) => stock(backend.local()?, command)?,
    }

    Ok(())
}

/// Print the board on every change until Ctrl-C.
async fn watch(backend: &Backend, config: SyncConfig) -> anyhow::Result<()> {
    let mut engine = backend.mount(config).await?;
    print!("{}", render::board(&engine.board()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            view = engine.changed() => {
                let view = view?;
                println!();
                print!("{}", render::board(&view.board()));
                if let Some(error) = &view.fetch_error {
                    eprintln!("load failed: {error}");
                }
            }
        }
    }

    engine.unmount().await;
    Ok(())
}

fn stock(store: &RocksStore, command: StockCommand) -> anyhow::Result<()> {
    match command {
        StockCommand::List {
            search,
            category,
            low,
        } => {
            let products = store.list_products()?;
            let filter = ProductFilter {
                search,
                category,
                low_stock_only: low,
            };
            print!("{}", render::products(&filter.apply(&products)));
        }
        StockCommand::Adjust { id, delta } => {
            let product = store.adjust_stock(&ProductId::new(id)?, delta)?;
            println!("{}: {} in stock", product.id, product.stock_quantity);
        }
        StockCommand::Import { file } => {
            let products: Vec<Product> = read_json(&file)?;
            for product in &products {
                store.put_product(product)?;
            }
            println!("imported {} product(s)", products.len());
        }
    }
    Ok(())
}
