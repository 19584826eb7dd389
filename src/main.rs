//! gitwork - command-line access to a Git-backed document store.
//!
//! Every write runs through the transaction interceptor, so each command is
//! one commit on `main` (or none, if it fails).

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use gitwork::engine::git::{GitEngine, PATH};
use gitwork::storage::{CollectionName, Document, DocumentKey};
use gitwork::transaction::TransactionInterceptor;
use gitwork::work::{SessionProvider, UnitConfig, WorkContext, WorkResult};
use serde_json::Value;

type CliResult<T> = Result<T, Box<dyn Error>>;

enum Command {
    Put {
        collection: String,
        key: Option<String>,
        body: String,
    },
    Get {
        collection: String,
        key: String,
    },
    Delete {
        collection: String,
        key: String,
    },
    List {
        collection: Option<String>,
    },
    Log {
        limit: usize,
    },
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        let arg = |i: usize| args.get(i).cloned();
        let required = |i: usize, what: &str| {
            arg(i).ok_or_else(|| format!("missing {} for '{}'", what, args[0]))
        };

        let command = match args[0].as_str() {
            // put COLLECTION [KEY] JSON
            "put" => match args.len() {
                3 => Command::Put {
                    collection: required(1, "collection")?,
                    key: None,
                    body: required(2, "document")?,
                },
                _ => Command::Put {
                    collection: required(1, "collection")?,
                    key: Some(required(2, "key")?),
                    body: required(3, "document")?,
                },
            },
            "get" => Command::Get {
                collection: required(1, "collection")?,
                key: required(2, "key")?,
            },
            "delete" | "rm" => Command::Delete {
                collection: required(1, "collection")?,
                key: required(2, "key")?,
            },
            "list" | "ls" => Command::List {
                collection: arg(1),
            },
            "log" => Command::Log {
                limit: match arg(1) {
                    Some(n) => n.parse().map_err(|_| format!("invalid log limit: {}", n))?,
                    None => 10,
                },
            },
            other => return Err(format!("unknown command: {}", other)),
        };
        Ok(command)
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut path: Option<PathBuf> = None;
    let mut unit: Option<String> = None;
    let mut config_file: Option<PathBuf> = None;
    let mut verbose = false;
    let mut rest = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--database" => {
                i += 1;
                if i < args.len() {
                    path = Some(PathBuf::from(&args[i]));
                }
            }
            "-u" | "--unit" => {
                i += 1;
                if i < args.len() {
                    unit = Some(args[i].clone());
                }
            }
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    config_file = Some(PathBuf::from(&args[i]));
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("gitwork v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if arg.starts_with('-') && rest.is_empty() => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
            arg => rest.push(arg.to_string()),
        }
        i += 1;
    }

    if rest.is_empty() {
        print_help();
        return ExitCode::FAILURE;
    }

    if let Err(e) = init_logging(verbose) {
        eprintln!("Error initialising logging: {}", e);
        return ExitCode::FAILURE;
    }

    let command = match Command::parse(&rest) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = match unit_config(path, unit, config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!("gitwork - transactional documents in a Git repository");
    println!();
    println!("Usage: gitwork [OPTIONS] COMMAND [ARGS]");
    println!();
    println!("Commands:");
    println!("  put COLLECTION [KEY] JSON   Insert or replace a document (key generated if omitted)");
    println!("  get COLLECTION KEY          Print a document");
    println!("  delete COLLECTION KEY       Remove a document");
    println!("  list [COLLECTION]           List collections, or the keys of one collection");
    println!("  log [N]                     Show the last N commits (default: 10)");
    println!();
    println!("Options:");
    println!("  -d, --database PATH    Path to repository directory (default: .gitwork)");
    println!("  -u, --unit NAME        Persistence unit name (default: gitwork)");
    println!("  -c, --config FILE      Read the unit configuration from a JSON file");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Examples:");
    println!("  gitwork put users alice '{{\"name\": \"Alice\"}}'");
    println!("  gitwork -d ./data list users");
}

fn init_logging(verbose: bool) -> CliResult<()> {
    let level = if verbose { "gitwork=debug" } else { "gitwork=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn unit_config(
    path: Option<PathBuf>,
    unit: Option<String>,
    config_file: Option<PathBuf>,
) -> CliResult<UnitConfig> {
    let mut config = match config_file {
        Some(file) => UnitConfig::load(file)?,
        None => UnitConfig::new("gitwork"),
    };
    if let Some(unit) = unit {
        config.unit_name = unit;
    }
    if let Some(path) = path {
        config = config.property(PATH, path.display().to_string());
    } else if !config.properties.contains_key(PATH) {
        config = config.property(PATH, ".gitwork");
    }
    Ok(config)
}

fn run(config: UnitConfig, command: Command) -> CliResult<()> {
    let provider = SessionProvider::new(GitEngine, config);
    provider.start()?;

    let interceptor = TransactionInterceptor::new(provider.clone());
    let mut cx = provider.context();
    let result = execute(&interceptor, &mut cx, command);

    drop(cx);
    provider.stop()?;
    result
}

fn execute(
    interceptor: &TransactionInterceptor<GitEngine>,
    cx: &mut WorkContext<GitEngine>,
    command: Command,
) -> CliResult<()> {
    let provider = interceptor.provider();

    match command {
        Command::Put {
            collection,
            key,
            body,
        } => {
            let collection = CollectionName::new(collection)?;
            let key = match key {
                Some(key) => DocumentKey::new(key)?,
                None => DocumentKey::generate(),
            };
            let body: Value = serde_json::from_str(&body)?;

            let doc = interceptor.run(cx, |cx| -> WorkResult<Document> {
                Ok(cx.session()?.put(&collection, key, body)?)
            })?;
            println!("{}/{} v{}", collection, doc.key, doc.version);
        }
        Command::Get { collection, key } => {
            let collection = CollectionName::new(collection)?;
            let key = DocumentKey::new(key)?;

            let doc = provider.unit_of_work(cx, |cx| -> WorkResult<Option<Document>> {
                Ok(cx.session()?.get(&collection, &key)?)
            })?;
            match doc {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc.body)?),
                None => return Err(format!("{}/{} not found", collection, key).into()),
            }
        }
        Command::Delete { collection, key } => {
            let collection = CollectionName::new(collection)?;
            let key = DocumentKey::new(key)?;

            interceptor.run(cx, |cx| -> WorkResult<()> {
                Ok(cx.session()?.delete(&collection, &key)?)
            })?;
            println!("deleted {}/{}", collection, key);
        }
        Command::List { collection } => {
            let names: Vec<String> = match collection {
                Some(collection) => {
                    let collection = CollectionName::new(collection)?;
                    provider.unit_of_work(cx, |cx| -> WorkResult<Vec<String>> {
                        let keys = cx.session()?.list(&collection)?;
                        Ok(keys.iter().map(ToString::to_string).collect())
                    })?
                }
                None => provider.unit_of_work(cx, |cx| -> WorkResult<Vec<String>> {
                    let names = cx.session()?.collections()?;
                    Ok(names.iter().map(ToString::to_string).collect())
                })?,
            };
            for name in names {
                println!("{}", name);
            }
        }
        Command::Log { limit } => {
            let log = provider.unit_of_work(cx, |cx| -> WorkResult<_> {
                Ok(cx.session()?.history(limit)?)
            })?;
            for entry in log {
                println!(
                    "{}  {}  {}",
                    entry.id.short(),
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.message
                );
            }
        }
    }
    Ok(())
}
