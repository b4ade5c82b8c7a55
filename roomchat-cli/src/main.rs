use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use roomchat_core::config::{Config, StoreBackend};
use roomchat_core::core_room::{MembershipChange, RoomContext, RoomDirectory, RoomKind};
use roomchat_core::core_store::open_document_store;
use roomchat_core::core_user::UserDirectory;
use roomchat_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use roomchat_core::metrics::init_metrics;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "roomchat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; defaults plus ROOMCHAT_* variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Override the store backend (memory, sqlite)
    #[arg(long)]
    backend: Option<StoreBackend>,

    /// Override the SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Print a Prometheus snapshot of the metrics after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a user alias
    Register { alias: String },

    /// Soft-remove a user alias
    Deregister { alias: String },

    /// List registered aliases
    Users,

    /// Create a room
    CreateRoom {
        name: String,
        owner: String,
        #[arg(long)]
        private: bool,
    },

    /// Soft-remove a room
    RemoveRoom { name: String },

    /// Add a member to a room
    Join { room: String, alias: String },

    /// Remove a member from a room
    Leave { room: String, alias: String },

    /// Post a message to a room
    Send {
        room: String,
        from: String,
        text: String,
    },

    /// Show the most recent messages visible to an alias
    Messages {
        room: String,
        alias: String,
        /// Number of messages; the configured page size when omitted
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Hide (or, with --remove, unhide) one alias's messages from another
    Blacklist {
        owner: String,
        alias: String,
        #[arg(long)]
        remove: bool,
    },

    /// List rooms, optionally only those an alias belongs to
    Rooms {
        #[arg(long)]
        member: Option<String>,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(backend) = args.backend {
        config.store.backend = backend;
    }
    if let Some(db) = &args.db {
        config.store.database_path = db.clone();
    }
    config.validate()?;
    Ok(config)
}

fn install_metrics(config: &Config, requested: bool) -> Result<Option<PrometheusHandle>> {
    if !config.metrics.enabled {
        return Ok(None);
    }
    let handle = if requested || config.metrics.enable_prometheus {
        Some(
            PrometheusBuilder::new()
                .install_recorder()
                .context("installing prometheus recorder")?,
        )
    } else {
        None
    };
    init_metrics();
    Ok(handle)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let log_config = LogConfig::from_settings(&config.logging).unwrap_or_else(|e| {
        eprintln!("{}, using 'info'", e);
        LogConfig::new(LogLevel::Info)
    });
    init_logging_with_config(log_config)?;
    let prometheus = install_metrics(&config, args.metrics)?;

    if let Some(parent) = config.store.database_path.parent() {
        if config.store.backend == StoreBackend::Sqlite && !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let gateway = open_document_store(&config.store)?;
    let users = Arc::new(RwLock::new(UserDirectory::open(gateway.clone(), &config.chat)?));
    let mut rooms = RoomDirectory::open(RoomContext::new(gateway, users.clone()), &config.chat)?;
    info!(backend = ?config.store.backend, rooms = rooms.len(), "roomchat ready");

    run(args.command, &config, &users, &mut rooms)?;

    if let Some(handle) = prometheus {
        println!("{}", handle.render());
    }
    Ok(())
}

fn lock_users(users: &RwLock<UserDirectory>) -> Result<std::sync::RwLockWriteGuard<'_, UserDirectory>> {
    users
        .write()
        .map_err(|_| anyhow::anyhow!("user directory lock poisoned"))
}

fn run(
    command: Command,
    config: &Config,
    users: &RwLock<UserDirectory>,
    rooms: &mut RoomDirectory,
) -> Result<()> {
    match command {
        Command::Register { alias } => {
            let user = lock_users(users)?.register(&alias)?;
            println!("registered {}", user.alias);
        }
        Command::Deregister { alias } => {
            if lock_users(users)?.deregister(&alias)? {
                println!("deregistered {}", alias);
            } else {
                bail!("user '{}' is not registered", alias);
            }
        }
        Command::Users => {
            for alias in lock_users(users)?.get_all_user_aliases() {
                println!("{}", alias);
            }
        }
        Command::CreateRoom {
            name,
            owner,
            private,
        } => {
            let kind = if private {
                RoomKind::Private
            } else {
                RoomKind::Public
            };
            match rooms.create(&name, &owner, kind)? {
                Some(_) => println!("created {} room {}", kind, name),
                None => bail!("room '{}' already exists", name),
            }
        }
        Command::RemoveRoom { name } => {
            if !rooms.remove(&name)? {
                bail!("room '{}' not found", name);
            }
            println!("removed {}", name);
        }
        Command::Join { room, alias } => {
            let shared = find_room(rooms, &room)?;
            let change = shared
                .lock()
                .map_err(|_| anyhow::anyhow!("room lock poisoned"))?
                .add_member(&alias)?;
            match change {
                MembershipChange::AlreadyMember => println!("{} is already in {}", alias, room),
                _ => println!("{} joined {}", alias, room),
            }
        }
        Command::Leave { room, alias } => {
            let shared = find_room(rooms, &room)?;
            let change = shared
                .lock()
                .map_err(|_| anyhow::anyhow!("room lock poisoned"))?
                .remove_member(&alias)?;
            match change {
                MembershipChange::NotMember => println!("{} was not in {}", alias, room),
                _ => println!("{} left {}", alias, room),
            }
        }
        Command::Send { room, from, text } => {
            if lock_users(users)?.get(&from).is_none() {
                bail!("alias '{}' is not registered", from);
            }
            let shared = find_room(rooms, &room)?;
            let mut room_store = shared
                .lock()
                .map_err(|_| anyhow::anyhow!("room lock poisoned"))?;
            if !room_store.is_member(&from) {
                bail!("alias '{}' is not a member of '{}'", from, room);
            }
            if !room_store.send(&text, &from)? {
                bail!("message was not accepted");
            }
            println!("sent to {}", room);
        }
        Command::Messages {
            room,
            alias,
            count,
            json,
        } => {
            let shared = find_room(rooms, &room)?;
            let room_store = shared
                .lock()
                .map_err(|_| anyhow::anyhow!("room lock poisoned"))?;
            let count = count.unwrap_or(config.chat.default_page_size);
            let page = room_store.get_messages(&alias, count, true)?;
            if json {
                let messages: Vec<_> = page
                    .objects
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "sequence_num": m.sequence_num,
                            "from": m.sender(),
                            "sent_time": m.props.sent_time.as_millis(),
                            "message": m.text,
                        })
                    })
                    .collect();
                let out = serde_json::json!({
                    "room": room,
                    "total": page.total,
                    "messages": messages,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for m in &page.objects {
                    let seq = m.sequence_num.map_or_else(|| "-".to_string(), |s| s.to_string());
                    println!("[{}] {}: {}", seq, m.sender(), m.text);
                }
            }
        }
        Command::Blacklist {
            owner,
            alias,
            remove,
        } => {
            let mut directory = lock_users(users)?;
            let changed = if remove {
                directory.remove_alias_from_blacklist(&owner, &alias)?
            } else {
                directory.add_alias_to_blacklist(&owner, &alias)?
            };
            if !changed {
                warn!(owner = %owner, alias = %alias, "blacklist unchanged");
            }
            println!("{} {} {}'s blacklist", alias, if remove { "removed from" } else { "on" }, owner);
        }
        Command::Rooms { member } => match member {
            Some(alias) => {
                for shared in rooms.find_by_member(&alias)? {
                    let room = shared
                        .lock()
                        .map_err(|_| anyhow::anyhow!("room lock poisoned"))?;
                    println!("{} ({}, owner {})", room.name(), room.kind(), room.owner());
                }
            }
            None => {
                for name in rooms.room_names()? {
                    println!("{}", name);
                }
            }
        },
    }
    Ok(())
}

fn find_room(rooms: &RoomDirectory, name: &str) -> Result<roomchat_core::core_room::SharedRoom> {
    rooms
        .find(name)?
        .with_context(|| format!("room '{}' not found", name))
}
