use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, File};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use grantsmith::config::context::build_context;
use grantsmith::config::schema::{load_config, GrantsmithConfig, LogFormat};
use grantsmith::data_types::ObjectKind;
use grantsmith::reconciler::{
    DatabaseReconciler, GroupReconciler, PrivilegeBindingReconciler, ReconcileContext,
    ReconcileError, Reconciler, SchemaReconciler, UserReconciler,
};

const DEFAULT_LOG_FILTER: &str = "grantsmith=info";

#[derive(Debug, Parser)]
#[clap(name = "grantsmith", version, about = "Converge cluster users, groups, databases, schemas and schema privileges", long_about = None)]
struct Args {
    #[clap(short, long, value_parser, default_value = "grantsmith.toml")]
    config_path: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an object from a declaration file
    Create {
        #[clap(value_parser)]
        kind: ObjectKind,
        #[clap(value_parser)]
        declaration: PathBuf,
    },
    /// Print the live state of an object
    Read {
        #[clap(value_parser)]
        kind: ObjectKind,
        #[clap(value_parser)]
        id: String,
        /// Last declaration, for attributes the cluster does not report
        #[clap(long, value_parser)]
        prior: Option<PathBuf>,
    },
    /// Converge an object from its previous declaration to a new one
    Update {
        #[clap(value_parser)]
        kind: ObjectKind,
        #[clap(value_parser)]
        id: String,
        #[clap(value_parser)]
        previous: PathBuf,
        #[clap(value_parser)]
        declared: PathBuf,
    },
    /// Delete an object
    Delete {
        #[clap(value_parser)]
        kind: ObjectKind,
        #[clap(value_parser)]
        id: String,
        #[clap(value_parser)]
        current: PathBuf,
    },
    /// Check whether an object still exists
    Exists {
        #[clap(value_parser)]
        kind: ObjectKind,
        #[clap(value_parser)]
        id: String,
    },
    /// Look up a schema's id and owner by name
    LookupSchema {
        #[clap(value_parser)]
        name: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not read declaration {}: {source}", .path.display())]
    Declaration { path: PathBuf, source: ConfigError },

    #[error("Invalid {kind} id {id:?}: {reason}")]
    InvalidId {
        kind: ObjectKind,
        id: String,
        reason: String,
    },

    #[error("Could not connect to the cluster: {0}")]
    Connect(#[from] sqlx::Error),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Could not render output: {0}")]
    Output(#[from] serde_json::Error),
}

/// An operation with its id and declarations already parsed
enum Operation<I, A> {
    Create(A),
    Read(I, Option<A>),
    Update(I, A, A),
    Delete(I, A),
    Exists(I),
}

#[derive(Serialize)]
struct Output<A> {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<A>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
}

fn load_declaration<A: DeserializeOwned>(path: &Path) -> Result<A, CliError> {
    Config::builder()
        .add_source(File::from(path))
        .build()
        .and_then(|declaration| declaration.try_deserialize())
        .map_err(|source| CliError::Declaration {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_id<I>(kind: ObjectKind, id: &str) -> Result<I, CliError>
where
    I: FromStr,
    I::Err: Display,
{
    id.parse().map_err(|e: I::Err| CliError::InvalidId {
        kind,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn prepare<I, A>(kind: ObjectKind, command: &Command) -> Result<Operation<I, A>, CliError>
where
    I: FromStr,
    I::Err: Display,
    A: DeserializeOwned,
{
    Ok(match command {
        Command::Create { declaration, .. } => Operation::Create(load_declaration(declaration)?),
        Command::Read { id, prior, .. } => Operation::Read(
            parse_id(kind, id)?,
            prior.as_deref().map(load_declaration).transpose()?,
        ),
        Command::Update {
            id,
            previous,
            declared,
            ..
        } => Operation::Update(
            parse_id(kind, id)?,
            load_declaration(previous)?,
            load_declaration(declared)?,
        ),
        Command::Delete { id, current, .. } => {
            Operation::Delete(parse_id(kind, id)?, load_declaration(current)?)
        }
        Command::Exists { id, .. } => Operation::Exists(parse_id(kind, id)?),
        Command::LookupSchema { .. } => unreachable!("schema lookups carry no object kind"),
    })
}

async fn perform<R>(
    reconciler: &R,
    operation: Operation<R::Id, R::Attributes>,
) -> Result<Output<R::Attributes>, CliError>
where
    R: Reconciler,
{
    let observed = match operation {
        Operation::Create(declared) => reconciler.create(&declared).await?,
        Operation::Read(id, prior) => reconciler.read(id, prior.as_ref()).await?,
        Operation::Update(id, previous, declared) => {
            reconciler.update(id, &previous, &declared).await?
        }
        Operation::Delete(id, current) => {
            reconciler.delete(id, &current).await?;
            return Ok(Output {
                id: id.to_string(),
                attributes: None,
                exists: Some(false),
            });
        }
        Operation::Exists(id) => {
            return Ok(Output {
                id: id.to_string(),
                attributes: None,
                exists: Some(reconciler.exists(id).await?),
            });
        }
    };

    Ok(Output {
        id: observed.key(),
        attributes: Some(observed.attributes),
        exists: None,
    })
}

async fn dispatch<R, F>(
    kind: ObjectKind,
    command: &Command,
    config: &GrantsmithConfig,
    build: F,
) -> Result<String, CliError>
where
    R: Reconciler,
    R::Id: FromStr,
    <R::Id as FromStr>::Err: Display,
    R::Attributes: DeserializeOwned + Serialize,
    F: FnOnce(ReconcileContext) -> R,
{
    // Parse everything before touching the cluster
    let operation = prepare::<R::Id, R::Attributes>(kind, command)?;
    let reconciler = build(build_context(config).await?);

    let output = perform(&reconciler, operation).await?;
    Ok(serde_json::to_string_pretty(&output)?)
}

async fn run(args: &Args, config: &GrantsmithConfig) -> Result<String, CliError> {
    let command = &args.command;
    let kind = match command {
        Command::Create { kind, .. }
        | Command::Read { kind, .. }
        | Command::Update { kind, .. }
        | Command::Delete { kind, .. }
        | Command::Exists { kind, .. } => *kind,
        Command::LookupSchema { name } => {
            let schemas = SchemaReconciler::new(build_context(config).await?);
            let observed = schemas.lookup(name).await?;
            return Ok(serde_json::to_string_pretty(&Output {
                id: observed.key(),
                attributes: Some(observed.attributes),
                exists: None,
            })?);
        }
    };
    debug!(%kind, ?command, "Running");

    match kind {
        ObjectKind::User => dispatch(kind, command, config, UserReconciler::new).await,
        ObjectKind::Group => dispatch(kind, command, config, GroupReconciler::new).await,
        ObjectKind::Database => dispatch(kind, command, config, DatabaseReconciler::new).await,
        ObjectKind::Schema => dispatch(kind, command, config, SchemaReconciler::new).await,
        ObjectKind::PrivilegeBinding => {
            dispatch(kind, command, config, PrivilegeBindingReconciler::new).await
        }
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{}", CliError::from(error));
            exit(2);
        }
    };
    init_logging(config.logging.format);

    match run(&args, &config).await {
        Ok(output) => println!("{output}"),
        Err(error) => {
            eprintln!("{error}");
            exit(1);
        }
    }
}
