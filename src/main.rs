use std::path::PathBuf;

use caskdb::{Engine, EngineError, IndexType, Options};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "caskctl", version = "0.1.0", about = "caskdb embedded key/value store CLI")]
struct Cli {
    /// Data directory to operate on
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert or overwrite a key
    Put { key: String, value: String },
    /// Look up a key
    Get { key: String },
    /// Remove a key
    Delete { key: String },
    /// Print engine diagnostics
    Stat,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dir = cli.dir.unwrap_or_else(std::env::temp_dir);

    let options = Options {
        dir_path: dir,
        index_type: IndexType::BTree,
        ..Options::default()
    };
    let engine = Engine::open(options)?;

    match cli.command {
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Get { key } => match engine.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(EngineError::KeyNotFound) => {
                eprintln!("key not found");
                std::process::exit(1);
            }
            Err(err) => return Err(err.into()),
        },
        Commands::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Stat => {
            let stat = engine.stat();
            println!("active segment    {}", stat.active_file_id);
            println!("segment count      {}", stat.segment_count);
            println!("keys               {}", stat.key_count);
            println!("sync writes        {}", stat.sync_writes);
            println!("index backend      {:?}", stat.index_type);
        }
    }

    engine.close()?;
    Ok(())
}
