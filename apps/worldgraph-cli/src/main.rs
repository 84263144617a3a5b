use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use worldgraph_api::{Api, Method, Request};
use worldgraph_common::{ChronologyMode, EventId, EventType, UserId, WorldId};
use worldgraph_graph::{GraphConfig, GraphStore, NewEvent};
use worldgraph_kernel::{EventFields, WorldFields};
use worldgraph_persist::DatabaseStore;

#[derive(Parser)]
#[command(name = "worldgraph-cli", about = "CLI tool for world event graphs")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Database image directory
    #[arg(long, global = true, default_value = "worldgraph-data")]
    data: PathBuf,

    /// YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Acting user
    #[arg(long, global = true)]
    user: Option<UserId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty World
    InitWorld {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        tone: String,
        #[arg(long, default_value = "linear")]
        chronology: ChronologyMode,
        /// A world law; repeat for more
        #[arg(long = "law")]
        laws: Vec<String>,
    },
    /// Add a timeline event
    AddEvent {
        world: WorldId,
        summary: String,
        /// Timeline position
        #[arg(short, long, default_value = "0")]
        t: f64,
        #[arg(long, default_value = "")]
        label_time: String,
        #[arg(long = "type", default_value = "other")]
        event_type: EventType,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// An existing event this one is caused by; repeat for more
        #[arg(long = "caused-by")]
        caused_by: Vec<EventId>,
    },
    /// Record that EVENT is caused by CAUSE
    Depend {
        world: WorldId,
        event: EventId,
        cause: EventId,
    },
    /// Remove the edge EVENT -> CAUSE
    Undepend {
        world: WorldId,
        event: EventId,
        cause: EventId,
    },
    /// Print the dependency graph as JSON
    Graph { world: WorldId },
    /// Write a World snapshot to a file, or stdout
    Export {
        world: WorldId,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Rebuild a World from a snapshot file under fresh ids
    Import { file: PathBuf },
    /// Copy a World under fresh ids
    Duplicate { world: WorldId },
    /// Delete a World and everything in it
    DeleteWorld { world: WorldId },
    /// Check the image manifest and every stored World
    Verify,
    /// Send one request through the HTTP contract and print the response
    Call {
        method: Method,
        path: String,
        /// Request body file
        #[arg(long)]
        body: Option<PathBuf>,
    },
}

impl Commands {
    /// Whether a successful run should be saved as a new image.
    fn mutates(&self) -> bool {
        match self {
            Commands::Graph { .. } | Commands::Export { .. } | Commands::Verify => false,
            Commands::Call { method, .. } => *method != Method::Get,
            _ => true,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => GraphConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GraphConfig::default(),
    };
    let mut disk = DatabaseStore::open(&cli.data)
        .with_context(|| format!("opening database at {}", cli.data.display()))?;

    let session = Session {
        store: GraphStore::new(Arc::new(disk.load_latest()?), config),
        user: cli.user,
    };
    let mutates = cli.command.mutates();

    session.run(&disk, cli.command)?;

    if mutates {
        disk.save(session.store.database())?;
    }
    Ok(())
}

struct Session {
    store: GraphStore,
    user: Option<UserId>,
}

impl Session {
    fn caller(&self) -> anyhow::Result<UserId> {
        self.user.context("--user is required for this command")
    }

    fn run(&self, disk: &DatabaseStore, command: Commands) -> anyhow::Result<()> {
        let store = &self.store;
        match command {
            Commands::InitWorld {
                name,
                description,
                tone,
                chronology,
                laws,
            } => {
                let world = store.create_world(
                    self.caller()?,
                    WorldFields {
                        name,
                        description,
                        tone,
                        laws,
                        chronology_mode: chronology,
                        ..WorldFields::default()
                    },
                )?;
                println!("{world}");
            }
            Commands::AddEvent {
                world,
                summary,
                t,
                label_time,
                event_type,
                tags,
                caused_by,
            } => {
                let event = store.create_event(
                    self.caller()?,
                    world,
                    NewEvent {
                        fields: EventFields {
                            t,
                            label_time,
                            event_type,
                            summary,
                            tags: tags.into_iter().collect(),
                            ..EventFields::default()
                        },
                        caused_by_ids: caused_by,
                    },
                )?;
                println!("{event}");
            }
            Commands::Depend {
                world,
                event,
                cause,
            } => {
                let added = store.add_dependency(self.caller()?, world, event, cause)?;
                println!("{}", if added { "added" } else { "already present" });
            }
            Commands::Undepend {
                world,
                event,
                cause,
            } => {
                let removed = store.remove_dependency(self.caller()?, world, event, cause)?;
                println!("{}", if removed { "removed" } else { "not present" });
            }
            Commands::Graph { world } => {
                let graph = store.get_dependency_graph(self.caller()?, world)?;
                println!("{}", serde_json::to_string_pretty(&graph)?);
            }
            Commands::Export { world, out } => {
                let json = store.export_json(self.caller()?, world)?;
                match out {
                    Some(path) => {
                        std::fs::write(&path, json)?;
                        println!("exported to {}", path.display());
                    }
                    None => println!("{json}"),
                }
            }
            Commands::Import { file } => {
                let bytes =
                    std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
                let report = store.import_json(self.caller()?, &bytes)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Commands::Duplicate { world } => {
                let report = store.duplicate(self.caller()?, world)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Commands::DeleteWorld { world } => {
                store.delete_world(self.caller()?, world)?;
                println!("deleted {world}");
            }
            Commands::Call { method, path, body } => {
                let body = match body {
                    Some(file) => std::fs::read(&file)
                        .with_context(|| format!("reading {}", file.display()))?,
                    None => Vec::new(),
                };
                let api = Api::new(store.clone());
                let response = api.handle(Request {
                    method,
                    path: &path,
                    caller: self.caller()?,
                    body: &body,
                });
                println!("{}", response.status);
                println!("{}", serde_json::to_string_pretty(&response.body)?);
                if response.status >= 400 {
                    bail!("request failed with status {}", response.status);
                }
            }
            Commands::Verify => {
                disk.verify_integrity()?;
                println!(
                    "OK: {} image(s), {} world(s)",
                    disk.meta().image_count,
                    store.database().world_count()
                );
            }
        }
        Ok(())
    }
}
