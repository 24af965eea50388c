//! D&D Dungeon Master driven by a local language model.
//!
//! A line-oriented interface: the model generates the party, narrates the
//! scene and offers options; you pick one or type your own action.
//!
//! ```bash
//! cargo run -p dnd -- --lore ./campaign-notes
//! ```

mod headless;

use dnd_rag_core::{GameConfig, TurnEngine};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never mix with the story on stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let options = parse_args(&args);

    let config = GameConfig::from_env()?;
    tracing::info!(host = %config.llm_host, model = %config.llm_model, "connecting to model host");
    let engine = TurnEngine::with_ollama(config)?;

    headless::run(engine, options).await?;
    Ok(())
}

/// Command line options.
#[derive(Debug, Default)]
pub struct CliOptions {
    /// Folder of `.txt`/`.md` lore loaded before play.
    pub lore: Option<PathBuf>,
    /// Snapshot to resume from.
    pub load: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> CliOptions {
    let mut options = CliOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--lore" => {
                if let Some(dir) = args.get(i + 1) {
                    options.lore = Some(PathBuf::from(dir));
                    i += 1;
                }
            }
            "--load" => {
                if let Some(path) = args.get(i + 1) {
                    options.load = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    options
}

fn print_help() {
    println!("D&D Dungeon Master - a local-model narrated adventure");
    println!();
    println!("USAGE:");
    println!("  dnd [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help       Show this help message");
    println!("  --lore <DIR>     Load .txt/.md lore files from DIR before play");
    println!("  --load <PATH>    Resume a saved session");
    println!();
    println!("ENVIRONMENT:");
    println!("  LLM_HOST             Model host (default: http://127.0.0.1:11434)");
    println!("  LLM_MODEL            Generation model (default: gemma3)");
    println!("  LLM_EMBEDDING_MODEL  Embedding model (default: embeddinggemma:latest)");
    println!("  PLAYER_COUNT         Party size (default: 4)");
    println!("  TURN_LIMIT           Turns before the adventure should wrap up (default: 10)");
    println!("  ENABLE_RAG           Supplement prompts with retrieved lore (default: true)");
    println!("  LORE_POLICY          retain|clear lore on a new party (default: retain)");
    println!("  RUST_LOG             Log filter (default: info)");
    println!();
    println!("EXAMPLES:");
    println!("  dnd");
    println!("  dnd --lore ./notes --load session.json");
}
