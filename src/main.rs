use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use sqlrepair::live::Backend;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about = "Repair templated analytical SQL corpora", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import queries from a JSON file into the corpus
    Import {
        /// JSON array of {database_id, query_number, title, sql_text}
        file: std::path::PathBuf,

        /// Overwrite queries that already exist
        #[arg(long)]
        replace: bool,
    },

    /// Export the corpus to a JSON file
    Export {
        file: std::path::PathBuf,

        /// Only this database
        #[arg(long)]
        database: Option<String>,
    },

    /// Apply the static and database-specific rules to stored queries
    Fix {
        /// Only this database (default: every database)
        #[arg(long, conflicts_with = "all")]
        database: Option<String>,

        /// Process every database in the corpus
        #[arg(long)]
        all: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Repair queries against a live database
    Repair(RepairArgs),

    /// Show the repair attempt log
    Log {
        /// Only this database
        #[arg(long)]
        database: Option<String>,

        /// Number of most recent attempts
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the rule tables
    Rules {
        /// Show database-specific rules for this database only
        #[arg(long)]
        database: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Database to process
    #[arg(long)]
    pub database: Option<String>,

    /// Process every database in the corpus
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RepairArgs {
    #[command(flatten)]
    pub target: Target,

    /// Comma-separated query numbers
    #[arg(long, value_delimiter = ',')]
    pub queries: Vec<u32>,

    /// Retry ceiling in executions (default from config)
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Treat unfixable queries as failures
    #[arg(long)]
    pub strict: bool,

    /// Live database backend (default from config)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Connection string; `{database}` is replaced by the database id
    #[arg(long)]
    pub dsn: Option<String>,

    /// Stop starting new executions after this many seconds
    #[arg(long)]
    pub time_budget: Option<u64>,

    /// Skip the static rules before the loop
    #[arg(long)]
    pub skip_static: bool,

    /// Repair databases concurrently
    #[arg(long)]
    pub parallel: bool,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "sqlrepair=info",
        1 => "sqlrepair=debug",
        _ => "sqlrepair=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Import { file, replace } => {
            commands::import::execute(&file, replace)?;
        }
        Commands::Export { file, database } => {
            commands::export::execute(&file, database.as_deref())?;
        }
        Commands::Fix {
            database,
            all: _,
            dry_run,
        } => {
            commands::fix::execute(database.as_deref(), dry_run)?;
        }
        Commands::Repair(args) => {
            let code = commands::repair::execute(args)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Log {
            database,
            limit,
            json,
        } => {
            commands::log::execute(database.as_deref(), limit, json)?;
        }
        Commands::Rules { database } => {
            commands::rules::execute(database.as_deref())?;
        }
    }

    Ok(())
}
