mod config;
mod error;

use std::path::{Path, PathBuf};

use chrono::Local;
use clap::{Parser, Subcommand};
use permissions::{Family, Hierarchy, NodeId, Patent, PermissionNode, User, UserId};
use service::PermissionService;
use storage::SqliteStore;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "permctl.toml";

#[derive(Parser)]
#[command(name = "permctl")]
#[command(about = "Manage permission families, patents, and user grants", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./permctl.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database
    Init,
    /// List all patents and families
    List,
    /// Create a patent
    AddPatent {
        id: String,
        name: String,
        /// View or action identifier the patent gates
        #[arg(long)]
        view: Option<String>,
    },
    /// Create a family
    AddFamily { id: String, name: String },
    /// Create a user
    AddUser { id: String, name: String },
    /// Delete a patent or family that nothing references
    Delete { id: String },
    /// Put a patent or family inside a family
    Attach { parent: String, child: String },
    /// Remove a child from a family
    Detach { parent: String, child: String },
    /// Grant a family to a user
    AssignFamily { user: String, family: String },
    /// Grant a patent to a user
    AssignPatent { user: String, patent: String },
    /// Revoke a family from a user
    UnassignFamily { user: String, family: String },
    /// Revoke a patent from a user
    UnassignPatent { user: String, patent: String },
    /// Show a user's effective permissions
    Resolve { user: String },
    /// Check whether a user holds a patent
    Check { user: String, patent: String },
    /// Print a family's contents as a tree
    Tree { family: String },
    /// Verify the stored hierarchy has no cycles or dangling children
    Validate,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.log.level);

    let db_path = config.database_path()?;
    if let Commands::Init = cli.command {
        return cmd_init(&db_path);
    }

    let store = open_store(&db_path)?;
    let service = PermissionService::new(store).with_conflict_retries(config.service.conflict_retries);

    match cli.command {
        Commands::Init => Ok(()),
        Commands::List => cmd_list(service.store()),
        Commands::AddPatent { id, name, view } => {
            let mut patent = Patent::new(id, name)?;
            patent.view_ref = view;
            service.store().create_patent(&patent)?;
            println!("Created patent {}", patent.id);
            Ok(())
        }
        Commands::AddFamily { id, name } => {
            let family = Family::new(id, name)?;
            service.store().create_family(&family)?;
            println!("Created family {}", family.id);
            Ok(())
        }
        Commands::AddUser { id, name } => {
            let user = User::new(id, name)?;
            service.store().create_user(&user)?;
            println!("Created user {}", user.id);
            Ok(())
        }
        Commands::Delete { id } => {
            service.store().delete_node(&NodeId::from(id.as_str()))?;
            println!("Deleted {id}");
            Ok(())
        }
        Commands::Attach { parent, child } => {
            service.attach_family_child(&NodeId::from(parent.as_str()), &NodeId::from(child.as_str()))?;
            println!("{child} is in {parent}");
            Ok(())
        }
        Commands::Detach { parent, child } => {
            service.detach_family_child(&NodeId::from(parent.as_str()), &NodeId::from(child.as_str()))?;
            println!("{child} is not in {parent}");
            Ok(())
        }
        Commands::AssignFamily { user, family } => {
            service.assign_family_to_user(&UserId::from(user.as_str()), &NodeId::from(family.as_str()))?;
            println!("{user} holds family {family}");
            Ok(())
        }
        Commands::AssignPatent { user, patent } => {
            service.assign_patent_to_user(&UserId::from(user.as_str()), &NodeId::from(patent.as_str()))?;
            println!("{user} holds patent {patent}");
            Ok(())
        }
        Commands::UnassignFamily { user, family } => {
            service.unassign_family_from_user(&UserId::from(user.as_str()), &NodeId::from(family.as_str()))?;
            println!("{user} no longer holds family {family}");
            Ok(())
        }
        Commands::UnassignPatent { user, patent } => {
            service.unassign_patent_from_user(&UserId::from(user.as_str()), &NodeId::from(patent.as_str()))?;
            println!("{user} no longer holds patent {patent}");
            Ok(())
        }
        Commands::Resolve { user } => cmd_resolve(&service, &UserId::from(user.as_str())),
        Commands::Check { user, patent } => {
            let granted = service
                .user_has_permission(&UserId::from(user.as_str()), &NodeId::from(patent.as_str()))?;
            println!("{}", if granted { "granted" } else { "denied" });
            if !granted {
                std::process::exit(2);
            }
            Ok(())
        }
        Commands::Tree { family } => {
            let hierarchy = service.store().snapshot()?;
            let root = NodeId::from(family.as_str());
            hierarchy.require_family(&root)?;
            print_tree(&hierarchy, &root, &mut Vec::new());
            Ok(())
        }
        Commands::Validate => {
            service.check_integrity()?;
            println!("Hierarchy is valid.");
            Ok(())
        }
    }
}

fn cmd_init(db_path: &Path) -> Result<()> {
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    SqliteStore::open(db_path)?;
    println!("Database ready at {}", db_path.display());
    Ok(())
}

fn cmd_list(store: &SqliteStore) -> Result<()> {
    let nodes = store.list_nodes()?;

    if nodes.is_empty() {
        println!("No permissions defined.");
        return Ok(());
    }

    println!("{:<24}  {:<7}  {:<28}  UPDATED", "ID", "KIND", "NAME");
    println!("{}", "-".repeat(80));

    for node in nodes {
        let updated = node.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        println!("{:<24}  {:<7}  {:<28}  {updated}", node.id, node.kind, node.name);
    }

    Ok(())
}

fn cmd_resolve(service: &PermissionService<SqliteStore>, user: &UserId) -> Result<()> {
    let effective = service.resolve_effective_permissions(user)?;
    let direct = service.direct_permissions(user)?;

    if effective.is_empty() {
        println!("{user} holds no permissions.");
        return Ok(());
    }

    println!("{user}: {} permission(s)", effective.len());
    for patent in &effective {
        let source = if direct.contains(patent) { "direct" } else { "inherited" };
        println!("  {patent:<32}  {source}");
    }

    Ok(())
}

fn print_tree<'h>(hierarchy: &'h Hierarchy, id: &'h NodeId, path: &mut Vec<&'h NodeId>) {
    let indent = "  ".repeat(path.len());
    match hierarchy.get(id) {
        None => println!("{indent}{id} (missing)"),
        Some(PermissionNode::Patent(patent)) => match &patent.view_ref {
            Some(view) => println!("{indent}{} [{view}]", patent.name()),
            None => println!("{indent}{}", patent.name()),
        },
        Some(PermissionNode::Family(family)) => {
            if path.contains(&id) {
                println!("{indent}{}/ (cycle)", family.name());
                return;
            }
            println!("{indent}{}/", family.name());
            path.push(id);
            for child in family.children() {
                print_tree(hierarchy, child, path);
            }
            path.pop();
        }
    }
}

fn open_store(db_path: &Path) -> Result<SqliteStore> {
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound {
            path: db_path.to_path_buf(),
        });
    }

    debug!(path = %db_path.display(), "opening permission store");
    Ok(SqliteStore::open(db_path)?)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => Ok(Config::default()),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
