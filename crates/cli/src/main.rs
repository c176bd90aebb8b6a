use std::env;

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tabrag_core::Domain;
use tabrag_rag::settings::parse_bool;
use tabrag_rag::{App, ChatRequest, IndexKind, QueryMeta, Settings};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "tabrag", version = VERSION, about = "Tabular admissions data question answering")]
struct Cli {
    /// Debug logging (also TABRAG_VERBOSE=1).
    #[arg(long, short = 'v', global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize a tenant directory without indexing it.
    Preview {
        #[arg(long)]
        bot: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long, default_value_t = 10)]
        sample: usize,
    },
    Ingest {
        #[arg(long)]
        bot: Option<String>,
    },
    /// Drop the collection, and the tenant's catalog when --bot is given.
    Reset {
        #[arg(long)]
        bot: Option<String>,
    },
    /// Rank catalog programs against free text.
    Resolve {
        #[arg(long)]
        bot: Option<String>,
        text: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    Chat {
        #[arg(long)]
        bot: Option<String>,
        #[arg(long, default_value = "anon")]
        session: String,
        message: String,
        #[arg(long)]
        periodo: Option<String>,
        #[arg(long)]
        facultad: Option<String>,
        #[arg(long)]
        carrera: Option<String>,
        #[arg(long)]
        modalidad: Option<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        debug: bool,
    },
    Health,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let settings = Settings::from_env()?;
    let app = App::from_settings(settings)?;
    let default_bot = app.profiles().default_bot_id().to_string();

    match cli.command {
        Commands::Preview { bot, domain, sample } => {
            let bot = bot.unwrap_or(default_bot);
            let only_domain = match domain {
                Some(raw) => Some(Domain::parse(&raw).ok_or_else(|| anyhow!("unknown domain {raw}"))?),
                None => None,
            };
            print_json(&app.pipeline().preview(&bot, only_domain, sample)?)
        }
        Commands::Ingest { bot } => {
            let bot = bot.unwrap_or(default_bot);
            print_json(&app.pipeline().ingest(&bot)?)
        }
        Commands::Reset { bot } => print_json(&app.pipeline().reset(bot.as_deref())?),
        Commands::Resolve { bot, text, limit } => {
            let bot = bot.unwrap_or(default_bot);
            let candidates = app.catalog.search_candidates(&bot, &text, limit)?;
            let best = candidates
                .first()
                .filter(|m| m.score >= app.settings.resolve_threshold)
                .cloned();
            print_json(&json!({
                "bot_id": bot,
                "threshold": app.settings.resolve_threshold,
                "match": best,
                "candidates": candidates,
            }))
        }
        Commands::Chat {
            bot,
            session,
            message,
            periodo,
            facultad,
            carrera,
            modalidad,
            debug,
        } => {
            let bot = bot.unwrap_or(default_bot);
            if app.settings.vector_index == IndexKind::Memory {
                // The in-process index starts empty on every run.
                let report = app.pipeline().ingest(&bot)?;
                info!(bot_id = %bot, rows = report.found_rows, "loaded in-memory index");
            }
            let request = ChatRequest {
                message,
                bot_id: Some(bot),
                session_id: session,
                meta: QueryMeta {
                    program_id: None,
                    program: carrera,
                    faculty: facultad,
                    modality: modalidad,
                    period: periodo,
                },
                debug,
            };
            print_json(&app.orchestrator().handle(&request)?)
        }
        Commands::Health => print_json(&app.pipeline().health()?),
    }
}

fn init_tracing(verbose: bool) {
    let verbose = verbose || env::var("TABRAG_VERBOSE").map(|v| parse_bool(&v)).unwrap_or(false);
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
