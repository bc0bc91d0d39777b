use std::{cell::RefCell, path::PathBuf, time::Instant};

use access::{PublicCooldown, SessionContext, remaining_minutes};
use anyhow::Context;
use cache::LocalCache;
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use core_model::{Principal, Role};
use discord::DiscordFeed;
use ingest::{CaseCollection, ImportOutcome, WalkError, WalkPhase};
use stats::{WindowBounds, WindowKey};
use store_sqlite::SqliteStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod ui;

use config::Config;

#[derive(Parser)]
#[command(name = "casebook")]
#[command(about = "Case ingestion and officer statistics for the department dashboard")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Config file (default: <config dir>/casebook/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Signed-in account id.
    #[arg(long, global = true)]
    uid: Option<String>,
    #[arg(long, global = true)]
    email: Option<String>,
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    Init,
    /// Pull new cases from the feed.
    Sync(SyncArgs),
    Stats(StatsArgs),
    Cases {
        #[arg(long, default_value = "all")]
        window: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Forget every cached case. The store keeps its copy.
    Clear,
    Users {
        #[command(subcommand)]
        command: UsersCommand,
    },
    Whoami,
    Doctor,
}

#[derive(Args)]
struct SyncArgs {
    /// Run as a rate-limited public update instead of an admin sync.
    #[arg(long, default_value_t = false)]
    public: bool,
}

#[derive(Args)]
struct StatsArgs {
    /// all, today, yesterday, this-week, last-week, this-month, last-month.
    #[arg(long, default_value = "all")]
    window: String,
    #[arg(long)]
    search: Option<String>,
    #[arg(long, value_enum, default_value_t = StatsFormat::Table)]
    format: StatsFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatsFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum UsersCommand {
    List,
    Register {
        #[arg(long)]
        name: String,
    },
    SetRole { id: String, role: Role },
    Delete { id: String },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.log_level, cli.log_json);
    let t = Instant::now();

    info!("opening database");
    let mut store = match &config.db_path {
        Some(path) => SqliteStore::open_at(path)?,
        None => SqliteStore::open_default()?,
    };
    store.init_schema()?;
    let cache = match &config.cache_dir {
        Some(dir) => LocalCache::open(dir)?,
        None => LocalCache::open_default()?,
    };
    let principal = principal(&cli);

    match cli.command {
        Commands::Init => {
            info!(elapsed = ?t.elapsed(), "initialized");
            println!("cache={}", cache.dir().display());
        }
        Commands::Sync(args) => {
            let mut collection = load_collection(&store, &cache, &config).await?;
            let outcome = if args.public {
                public_sync(&config, &mut collection, &mut store, &cache).await?
            } else {
                let ctx = sign_in(principal, &store, &config)?;
                require_admin(&ctx)?;
                run_sync(&config, &mut collection, &mut store, &cache).await?
            };
            info!(
                accepted = outcome.accepted,
                persisted = outcome.persisted,
                total = collection.len(),
                elapsed = ?t.elapsed(),
                "synced"
            );
            println!("new_cases={}", outcome.accepted);
            println!("total_cases={}", collection.len());
        }
        Commands::Stats(args) => {
            let collection = load_collection(&store, &cache, &config).await?;
            let window = WindowKey::parse(&args.window);
            let bounds = WindowBounds::at(&Local::now());
            let rollup = stats::aggregate(collection.records(), &bounds);
            let search = args.search.as_deref().unwrap_or("");
            let rows = stats::sorted_view(&rollup.officers, window, search);
            info!(officers = rows.len(), window = %window, elapsed = ?t.elapsed(), "stats computed");
            match args.format {
                StatsFormat::Json => {
                    let output = ui::stats_json(window, args.search.as_deref(), rollup.quick, &rows);
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                StatsFormat::Table => {
                    ui::print_quick_stats(&rollup.quick);
                    println!();
                    ui::print_officer_table(&rows, window);
                }
            }
        }
        Commands::Cases { window, limit } => {
            let collection = load_collection(&store, &cache, &config).await?;
            let window = WindowKey::parse(&window);
            let bounds = WindowBounds::at(&Local::now());
            let cases = stats::cases_in_window(collection.records(), window, &bounds);
            info!(cases = cases.len(), window = %window, "cases listed");
            let shown = &cases[..cases.len().min(limit)];
            ui::print_cases(shown);
            if cases.len() > shown.len() {
                println!("... {} more", cases.len() - shown.len());
            }
        }
        Commands::Clear => {
            let ctx = sign_in(principal, &store, &config)?;
            require_admin(&ctx)?;
            let mut collection = load_collection(&store, &cache, &config).await?;
            let cleared = ingest::clear_all(&mut collection, &cache);
            println!("cleared={cleared}");
        }
        Commands::Users { command } => match command {
            UsersCommand::Register { name } => {
                let principal = principal.context("--uid is required to register")?;
                let user = access::register_user(
                    &store,
                    &principal,
                    &name,
                    config.superadmin_email.as_deref(),
                    Utc::now(),
                )?;
                println!("registered {} as {}", user.id, user.role);
            }
            UsersCommand::List => {
                let ctx = sign_in(principal, &store, &config)?;
                let users = access::list_users(&ctx, &store)?;
                info!(users = users.len(), "users listed");
                ui::print_users(&users);
            }
            UsersCommand::SetRole { id, role } => {
                let ctx = sign_in(principal, &store, &config)?;
                access::change_role(&ctx, &store, &id, role)?;
                println!("{id} is now {role}");
            }
            UsersCommand::Delete { id } => {
                let ctx = sign_in(principal, &store, &config)?;
                access::delete_user(&ctx, &store, &id)?;
                println!("deleted {id}");
            }
        },
        Commands::Whoami => {
            let ctx = sign_in(principal, &store, &config)?;
            println!("uid={}", ctx.uid());
            println!("email={}", ctx.principal().email.as_deref().unwrap_or("-"));
            println!("role={}", ctx.role());
            ctx.sign_out();
        }
        Commands::Doctor => {
            info!("running integrity check");
            let check = store.integrity_check()?;
            let cases = store.count_cases()?;
            let cached = match cache.load_cases() {
                Ok(c) => c.len().to_string(),
                Err(err) => format!("unreadable ({err:#})"),
            };
            info!(elapsed = ?t.elapsed(), "integrity check done");
            println!("integrity_check={check}");
            println!("stored_cases={cases}");
            println!("cached_cases={cached}");
            println!("sync_lock_held={}", cache.sync_lock_held());
            println!("feed_configured={}", config.feed_configured());
            println!(
                "snapshot={}",
                config
                    .snapshot_source()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    Ok(())
}

fn principal(cli: &Cli) -> Option<Principal> {
    let uid = cli.uid.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
    Some(Principal {
        uid: uid.to_string(),
        email: cli.email.clone(),
    })
}

fn sign_in(
    principal: Option<Principal>,
    store: &SqliteStore,
    config: &Config,
) -> anyhow::Result<SessionContext> {
    let principal = principal.context("sign in with --uid (and --email) first")?;
    Ok(SessionContext::sign_in(
        store,
        principal,
        config.superadmin_email.as_deref(),
    ))
}

fn require_admin(ctx: &SessionContext) -> anyhow::Result<()> {
    if !ctx.is_admin() {
        return Err(access::AccessError::AdminRequired.into());
    }
    Ok(())
}

async fn load_collection(
    store: &SqliteStore,
    cache: &LocalCache,
    config: &Config,
) -> anyhow::Result<CaseCollection> {
    let snapshot = config.snapshot_source();
    ingest::load_initial(store, snapshot.as_ref(), cache)
        .await
        .context("loading cases")
}

async fn public_sync(
    config: &Config,
    collection: &mut CaseCollection,
    store: &mut SqliteStore,
    cache: &LocalCache,
) -> anyhow::Result<ImportOutcome> {
    let gate = PublicCooldown::new(config.public_cooldown);
    let now_ms = Utc::now().timestamp_millis();
    let last = cache.last_public_update().unwrap_or_else(|err| {
        warn!(error = %format!("{err:#}"), "could not read last public update");
        None
    });
    if let Some(wait) = gate.remaining(last, now_ms) {
        anyhow::bail!(
            "public update is cooling down; try again in {} minute(s)",
            remaining_minutes(wait)
        );
    }
    let result = run_sync(config, collection, store, cache).await;
    if let Err(err) = cache.set_last_public_update(now_ms) {
        warn!(error = %format!("{err:#}"), "could not record public update time");
    }
    result
}

async fn run_sync(
    config: &Config,
    collection: &mut CaseCollection,
    store: &mut SqliteStore,
    cache: &LocalCache,
) -> anyhow::Result<ImportOutcome> {
    let feed = DiscordFeed::new(config.feed_settings())?;
    let started = Instant::now();
    let last = RefCell::new(started);
    let step = || {
        let now = Instant::now();
        let since_last = now.duration_since(*last.borrow());
        *last.borrow_mut() = now;
        since_last
    };
    let result = ingest::sync_feed(
        &feed,
        collection,
        store,
        cache,
        &config.walk_config(),
        |phase| match phase {
            WalkPhase::Connecting { resuming } => {
                info!(resuming, delta = ?step(), "connecting to feed");
            }
            WalkPhase::PageFetched { page, fetched } => {
                info!(page, fetched, elapsed = ?started.elapsed(), delta = ?step(), "page fetched");
            }
            WalkPhase::RateLimited { retry_after } => {
                warn!(retry_after = ?retry_after, "rate limited; waiting");
            }
            WalkPhase::Parsing { message_count } => {
                info!(message_count, delta = ?step(), "parsing messages");
            }
            WalkPhase::Done { new_cases } => {
                info!(new_cases, elapsed = ?started.elapsed(), delta = ?step(), "walk done");
            }
        },
    )
    .await;

    result.map_err(|err| {
        let unauthorized = matches!(
            err.downcast_ref::<WalkError>(),
            Some(WalkError::Unauthorized { .. })
        );
        if unauthorized {
            err.context(
                "the feed rejected the configured token; refresh it in the config or CASEBOOK_FEED_TOKEN",
            )
        } else {
            err
        }
    })
}
