use drift::{MigrationDir, MigrationRunner, Operation, SchemaSnapshot};
use facet::Facet;
use facet_args as args;
use owo_colors::OwoColorize;

mod config;

use config::Settings;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Declarative Postgres schema migrations.
#[derive(Facet, Debug)]
struct Cli {
    /// Show version information
    #[facet(args::named, args::short = 'V')]
    version: bool,

    /// Command to run
    #[facet(default, args::subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Facet, Debug)]
#[repr(u8)]
enum Commands {
    /// Show the plan that turns one snapshot into another
    Plan {
        /// Snapshot of the schema as it is (JSON)
        #[facet(args::named)]
        current: String,
        /// Snapshot of the schema as it should be (JSON)
        #[facet(args::named)]
        ideal: String,
    },
    /// Write a migration record for the plan between two snapshots
    Generate {
        /// Migration name (e.g., "add-users-table")
        #[facet(args::positional)]
        name: String,
        /// Snapshot of the schema as it is (JSON)
        #[facet(args::named)]
        current: String,
        /// Snapshot of the schema as it should be (JSON)
        #[facet(args::named)]
        ideal: String,
    },
    /// Run pending migrations
    Migrate {
        /// Database connection URL
        #[facet(default, args::named)]
        database_url: Option<String>,
    },
    /// Show migration status
    Status {
        /// Database connection URL
        #[facet(default, args::named)]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    let result: Result<Cli, _> = args::from_slice(&args_ref);

    match result {
        Ok(cli) => {
            init_tracing();
            if let Err(e) = run(cli).await {
                eprintln!("{} {}", "error:".red().bold(), e);
                std::process::exit(1);
            }
        }
        Err(err) if err.is_help_request() => {
            print!("{}", err.help_text().unwrap_or(""));
        }
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
}

async fn run(cli: Cli) -> CliResult<()> {
    if cli.version {
        println!("drift {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    match cli.command {
        Some(Commands::Plan { current, ideal }) => {
            let plan = plan_from_files(&current, &ideal)?;
            if plan.is_empty() {
                println!("No changes detected.");
            } else {
                print_plan(&plan);
            }
        }
        Some(Commands::Generate {
            name,
            current,
            ideal,
        }) => {
            let plan = plan_from_files(&current, &ideal)?;
            if plan.is_empty() {
                return Err("no changes detected, refusing to write an empty migration".into());
            }
            let settings = settings(None)?;
            print_plan(&plan);
            let path = MigrationDir::new(settings.migrations_dir).write(&name, plan)?;
            println!();
            println!("{} {}", "Created".green(), path);
        }
        Some(Commands::Migrate { database_url }) => {
            let settings = settings(database_url)?;
            let records = MigrationDir::new(&settings.migrations_dir).load_all()?;
            let client = connect(&settings).await?;

            let runner = MigrationRunner::new(&client).history_table(&settings.history_table);
            let applied = runner.migrate(&records).await?;
            if applied.is_empty() {
                println!("Database is up to date.");
            } else {
                for id in &applied {
                    println!("{} {}", "Applied".green(), id);
                }
                println!("Done. Applied {} migration(s).", applied.len());
            }
        }
        Some(Commands::Status { database_url }) => {
            let settings = settings(database_url)?;
            let records = MigrationDir::new(&settings.migrations_dir).load_all()?;
            let client = connect(&settings).await?;

            let runner = MigrationRunner::new(&client).history_table(&settings.history_table);
            let status = runner.status(&records).await?;
            if status.is_empty() {
                println!("No migrations in {}.", settings.migrations_dir);
            }
            for entry in status {
                if entry.applied {
                    println!("  {} {}", "applied".green(), entry.id);
                } else {
                    println!("  {} {}", "pending".yellow(), entry.id);
                }
            }
        }
        None => {
            let config = args::HelpConfig {
                program_name: Some("drift".to_string()),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                ..Default::default()
            };
            print!("{}", args::generate_help::<Cli>(&config));
        }
    }

    Ok(())
}

/// Combine `.config/drift.styx`, `DATABASE_URL` and the `--database-url` flag.
fn settings(flag_url: Option<String>) -> CliResult<Settings> {
    let _ = dotenvy::dotenv();

    let config = match config::load()? {
        Some((config, path)) => {
            tracing::debug!(%path, "loaded config");
            config
        }
        None => config::Config::default(),
    };
    let env_url = std::env::var("DATABASE_URL").ok();

    Ok(Settings::resolve(config, env_url, flag_url))
}

async fn connect(settings: &Settings) -> CliResult<tokio_postgres::Client> {
    let Some(url) = settings.database_url.as_deref() else {
        return Err(
            "no database URL (use --database-url, DATABASE_URL or .config/drift.styx)".into(),
        );
    };
    eprintln!("{} {}", "database:".dimmed(), mask_password(url));

    let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Database connection error: {}", e);
        }
    });
    Ok(client)
}

fn load_snapshot(path: &str) -> CliResult<SchemaSnapshot> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path, e))?;
    let snapshot: SchemaSnapshot =
        facet_json::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path, e))?;
    snapshot
        .validate()
        .map_err(|e| format!("invalid snapshot {}: {}", path, e))?;
    Ok(snapshot.normalize())
}

fn plan_from_files(current: &str, ideal: &str) -> CliResult<Vec<Operation>> {
    let current = load_snapshot(current)?;
    let ideal = load_snapshot(ideal)?;
    Ok(drift::plan(&current, &ideal)?)
}

fn print_plan(plan: &[Operation]) {
    println!("{}", drift::summarize(plan).bold());
    for op in plan {
        let line = op.to_string();
        match line.chars().next() {
            Some('+') => println!("  {}", line.green()),
            Some('-') => println!("  {}", line.red()),
            _ => println!("  {}", line.yellow()),
        }
    }
}

/// Mask password in database URL for display
fn mask_password(url: &str) -> String {
    // Simple masking: replace password between :// and @
    if let Some(start) = url.find("://")
        && let Some(at) = url.rfind('@')
        && at > start
        && let Some(colon) = url[start + 3..at].find(':')
    {
        let prefix = &url[..start + 3];
        let user = &url[start + 3..start + 3 + colon];
        let suffix = &url[at..];
        return format!("{}{}:***{}", prefix, user, suffix);
    }
    url.to_string()
}
