use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ostore", about = "Embedded object store with indexed, cached queries", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the store's containers
    #[arg(long, global = true, default_value = ".ostore")]
    pub data_dir: PathBuf,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create, remove or list namespaces
    Ns(NsArgs),
    /// Provision, remove or list object types
    Type(TypeArgs),
    /// Store an object
    Put(PutArgs),
    /// Show an object by ID or unique key
    Get(ObjectRefArgs),
    /// Query objects by index constraints
    Find(FindArgs),
    /// Remove an object by ID or unique key
    Rm(ObjectRefArgs),
    /// Count the objects of a type
    Count(TypeRefArgs),
    /// List every object of a type
    List(TypeRefArgs),
    /// Show the current version of a type
    Version(TypeRefArgs),
    /// Remove every object of a type
    Truncate(TypeRefArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct NsArgs {
    #[command(subcommand)]
    pub action: NsAction,
}

#[derive(Subcommand)]
pub enum NsAction {
    Create { name: String },
    Remove { name: String },
    List,
}

#[derive(Args)]
pub struct TypeArgs {
    #[command(subcommand)]
    pub action: TypeAction,
}

#[derive(Subcommand)]
pub enum TypeAction {
    /// Register a new object type in a namespace
    Provision {
        namespace: String,
        name: String,
        /// Index definition, `name:kind` (kind: integer, float, text, boolean)
        #[arg(short, long = "index")]
        indexes: Vec<String>,
        /// Object type in the same namespace this type depends on
        #[arg(short, long = "depends-on")]
        dependencies: Vec<String>,
        /// Generate a unique key for objects stored without one
        #[arg(long)]
        unique_key: bool,
    },
    /// Remove an object type and all its objects
    Remove { object_type: String },
    List { namespace: String },
}

#[derive(Args)]
pub struct TypeRefArgs {
    /// Object type as `Namespace.Name`
    pub object_type: String,
}

#[derive(Args)]
pub struct ObjectRefArgs {
    pub object_type: String,
    #[arg(required_unless_present = "key", conflicts_with = "key")]
    pub id: Option<u32>,
    /// Unique key, hex encoded
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(Args)]
pub struct PutArgs {
    pub object_type: String,
    /// Object value, stored as UTF-8 bytes
    pub value: String,
    /// Update an existing object instead of creating one
    #[arg(long)]
    pub id: Option<u32>,
    /// Unique key, hex encoded
    #[arg(long)]
    pub key: Option<String>,
    /// Index value, `name=literal`
    #[arg(short, long = "index")]
    pub indexes: Vec<String>,
}

#[derive(Args)]
pub struct FindArgs {
    pub object_type: String,
    /// Constraints such as `qty>=3` or `sku^=ap`
    pub terms: Vec<String>,
    #[arg(long)]
    pub top: Option<usize>,
    /// Print only the matching IDs
    #[arg(long)]
    pub ids_only: bool,
}
