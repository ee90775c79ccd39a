//! StrataDB CLI
//!
//! Command-line interface operating directly on a local StrataDB directory.

use std::process;

use clap::{Parser, Subcommand};
use stratadb::{Config, Engine, ScanOptions};
use tracing_subscriber::{fmt, EnvFilter};

/// StrataDB CLI
#[derive(Parser, Debug)]
#[command(name = "stratadb-cli")]
#[command(about = "Inspect and modify a StrataDB database")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./strata_data")]
    data_dir: String,

    /// Create the database if it does not exist
    #[arg(long)]
    create_if_missing: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Set a key only if it does not exist yet
    Insert {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Add to a counter (missing keys start at 0)
    Incr {
        /// The counter key
        key: String,

        /// Amount to add (may be negative)
        #[arg(default_value_t = 1, allow_hyphen_values = true)]
        delta: i64,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// List live key-value pairs in key order
    Scan {
        /// Only keys with this prefix
        #[arg(short, long)]
        prefix: Option<String>,

        /// Only keys after this one
        #[arg(long)]
        start_after: Option<String>,

        /// Maximum number of pairs to print
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Flush and compact until no level needs compaction
    Compact,

    /// Print engine statistics
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stratadb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .create_if_missing(args.create_if_missing)
        .build();

    let engine = match Engine::open(config) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", args.data_dir, e);
            process::exit(1);
        }
    };

    let result = execute(&engine, args.command);
    let closed = engine.close();

    if let Err(e) = result.and(closed) {
        eprintln!("error ({}): {}", e.kind(), e);
        process::exit(1);
    }
}

fn execute(engine: &Engine, command: Commands) -> stratadb::Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => {
                println!("(not found)");
            }
        },
        Commands::Put { key, value } => {
            engine.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Insert { key, value } => {
            engine.insert(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Incr { key, delta } => {
            let (_, new) = engine.increment(key.as_bytes(), delta)?;
            println!("{}", new);
        }
        Commands::Delete { key } => {
            engine.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan {
            prefix,
            start_after,
            limit,
        } => {
            let options = ScanOptions {
                prefix: prefix.map(String::into_bytes),
                start_after: start_after.map(String::into_bytes),
                limit,
            };
            for (key, value) in engine.scan(&options)? {
                println!("{}\t{}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
            }
        }
        Commands::Compact => {
            let count = engine.compact()?;
            println!("{} compactions", count);
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("last_sequence:       {}", stats.last_sequence);
            println!("memtable:            {} entries, {} bytes", stats.memtable_entries, stats.memtable_bytes);
            println!("immutable memtables: {}", stats.immutable_memtables);
            for (level, l) in stats.levels.iter().enumerate() {
                if l.tables > 0 {
                    println!("L{}:                  {} tables, {} bytes", level, l.tables, l.bytes);
                }
            }
            println!("flushes:             {}", stats.flushes);
            println!("compactions:         {}", stats.compactions);
            if let Some(err) = stats.background_error {
                println!("background error:    {}", err);
            }
        }
    }
    Ok(())
}
