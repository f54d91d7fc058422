//! Elevator CLI Client
//!
//! Command-line interface for interacting with an Elevator server.

use clap::{Parser, Subcommand};
use elevator::Client;

/// Elevator CLI
#[derive(Parser, Debug)]
#[command(name = "elevator-cli")]
#[command(about = "CLI for the Elevator key-value server")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "tcp://127.0.0.1:4141")]
    server: String,

    /// Database to run data commands against
    #[arg(short, long, default_value = "default")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get { key: String },

    /// Set a key-value pair
    Put { key: String, value: String },

    /// Delete a key
    Del { key: String },

    /// Pairs with start <= key < end (omit end for no upper bound)
    Range { start: String, end: Option<String> },

    /// Up to LIMIT pairs starting at START
    Slice { start: String, limit: u32 },

    /// Get several keys at once
    Mget { keys: Vec<String> },

    /// Ping the database
    Ping,

    /// Create a database
    Create { name: String },

    /// Drop an unmounted database
    Drop { name: String },

    /// Mount a database
    Mount { name: String },

    /// Unmount a database
    Unmount { name: String },

    /// List databases and their mount status
    List,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("(error) {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> elevator::Result<()> {
    let mut client = Client::connect(&args.server)?;
    let db = args.db.as_str();

    match args.command {
        Commands::Get { key } => match client.get(db, key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            client.put(db, key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            client.delete(db, key.as_bytes())?;
            println!("OK");
        }
        Commands::Range { start, end } => {
            let end = end.unwrap_or_default();
            print_pairs(&client.range(db, start.as_bytes(), end.as_bytes())?);
        }
        Commands::Slice { start, limit } => {
            print_pairs(&client.slice(db, start.as_bytes(), limit)?);
        }
        Commands::Mget { keys } => {
            let keys: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
            for (key, value) in keys.iter().zip(client.mget(db, &keys)?) {
                let value = value
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_else(|| "(nil)".to_string());
                println!("{} = {}", String::from_utf8_lossy(key), value);
            }
        }
        Commands::Ping => {
            println!("{}", String::from_utf8_lossy(&client.ping(db)?));
        }
        Commands::Create { name } => {
            client.create_database(&name)?;
            println!("OK");
        }
        Commands::Drop { name } => {
            client.drop_database(&name)?;
            println!("OK");
        }
        Commands::Mount { name } => {
            client.mount(&name)?;
            println!("OK");
        }
        Commands::Unmount { name } => {
            client.unmount(&name)?;
            println!("OK");
        }
        Commands::List => {
            for (name, status) in client.list_databases()? {
                println!("{}\t{}", name, status);
            }
        }
    }
    Ok(())
}

fn print_pairs(pairs: &[(Vec<u8>, Vec<u8>)]) {
    if pairs.is_empty() {
        println!("(empty)");
    }
    for (key, value) in pairs {
        println!(
            "{} = {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    }
}
