use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use relgrid_core::{
    ProductKind, RelgridConfig, ReleaseType, RolloutStatus, ServerBounds, Timestamp, VersionState,
};
use relgrid_release::VersionEdit;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{Context, print_json};

#[derive(Parser)]
#[command(
    name = "relgrid",
    about = "relgrid — release lifecycle and endpoint rollout orchestration",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to relgrid.toml
    #[arg(short, long, global = true, default_value = "relgrid.toml")]
    config: PathBuf,
    /// Who performs the action (default: $USER)
    #[arg(long, global = true)]
    actor: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a relgrid.toml scaffold and create the state store
    Init {
        /// Where the state store lives
        #[arg(long, default_value = "relgrid.redb")]
        store: PathBuf,
    },
    /// Manage products
    Product {
        #[command(subcommand)]
        action: ProductAction,
    },
    /// Manage versions and their lifecycle
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },
    /// Validate version compatibility
    Compat {
        #[command(subcommand)]
        action: CompatAction,
    },
    /// Manage upgrade paths
    Path {
        #[command(subcommand)]
        action: PathAction,
    },
    /// Check an endpoint for an available update
    Detect {
        endpoint: String,
        product: String,
        /// Version currently installed on the endpoint
        current: String,
    },
    /// Manage endpoint rollouts
    Rollout {
        #[command(subcommand)]
        action: RolloutAction,
    },
}

#[derive(Subcommand)]
enum ProductAction {
    /// Register a product
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "client")]
        kind: ProductKind,
    },
    List,
    /// Soft-delete a product; it keeps its versions but takes no new ones
    Deactivate { id: String },
}

#[derive(Args)]
struct VersionRef {
    product: String,
    #[arg(value_name = "VERSION")]
    number: String,
}

#[derive(Args)]
struct BoundsArgs {
    /// Minimum compatible server version
    #[arg(long)]
    min_server: Option<String>,
    /// Maximum compatible server version
    #[arg(long)]
    max_server: Option<String>,
    /// Recommended server version
    #[arg(long)]
    recommended_server: Option<String>,
}

impl BoundsArgs {
    fn into_bounds(self) -> Option<ServerBounds> {
        let bounds = ServerBounds {
            min: self.min_server,
            max: self.max_server,
            recommended: self.recommended_server,
        };
        (!bounds.is_empty()).then_some(bounds)
    }
}

#[derive(Subcommand)]
enum VersionAction {
    /// Register a new draft version
    Add {
        #[command(flatten)]
        target: VersionRef,
        #[arg(long, default_value = "feature")]
        release_type: ReleaseType,
        /// RFC 3339 release date (default: now)
        #[arg(long, value_parser = parse_timestamp)]
        release_date: Option<Timestamp>,
        #[command(flatten)]
        bounds: BoundsArgs,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Change fields of a draft version
    Edit {
        #[command(flatten)]
        target: VersionRef,
        #[arg(long)]
        release_type: Option<ReleaseType>,
        #[arg(long, value_parser = parse_timestamp)]
        release_date: Option<Timestamp>,
        #[arg(long, value_parser = parse_timestamp)]
        eol_date: Option<Timestamp>,
        #[command(flatten)]
        bounds: BoundsArgs,
        #[arg(long)]
        notes: Option<String>,
    },
    /// draft → pending_review
    Submit(VersionRef),
    /// pending_review → approved; the actor is recorded as approver
    Approve(VersionRef),
    /// approved → released
    Release {
        #[command(flatten)]
        target: VersionRef,
        /// Accept a release date in the future
        #[arg(long)]
        scheduled: bool,
    },
    /// released → deprecated
    Deprecate(VersionRef),
    /// deprecated → eol
    Retire(VersionRef),
    Show(VersionRef),
    List { product: String },
}

#[derive(Subcommand)]
enum CompatAction {
    /// Check server bounds and record the verdict
    Validate {
        #[command(flatten)]
        target: VersionRef,
        /// Server versions known not to work (repeatable)
        #[arg(long = "incompatible")]
        incompatible: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PathAction {
    /// Register (or unblock) an upgrade path
    Register {
        product: String,
        from: String,
        to: String,
        /// Intermediate versions, in order (makes the path multi-step)
        #[arg(long, value_delimiter = ',')]
        via: Vec<String>,
    },
    /// Block an upgrade path
    Block {
        product: String,
        from: String,
        to: String,
        #[arg(long)]
        reason: String,
    },
    /// Show whether an upgrade is permitted
    Resolve {
        product: String,
        from: String,
        to: String,
    },
    List { product: String },
}

#[derive(Subcommand)]
enum RolloutAction {
    /// Initiate a rollout for an endpoint
    Start {
        endpoint: String,
        product: String,
        from: String,
        to: String,
    },
    /// pending → in_progress
    Begin { id: String },
    /// Report progress (0–100)
    Progress { id: String, percent: u32 },
    Complete { id: String },
    Fail {
        id: String,
        #[arg(long)]
        message: String,
    },
    Cancel { id: String },
    Show { id: String },
    List {
        #[arg(long)]
        endpoint: Option<String>,
    },
}

fn parse_timestamp(input: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(input)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn load_config(path: &Path) -> anyhow::Result<RelgridConfig> {
    if path.exists() {
        RelgridConfig::from_file(path)
    } else {
        Ok(RelgridConfig::scaffold(Path::new("relgrid.redb")))
    }
}

fn init_tracing(config: &RelgridConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter())?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json() {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config)?;

    let actor = cli
        .actor
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "relgrid".to_string());

    if let Commands::Init { store } = &cli.command {
        let config = commands::init::init(&cli.config, store, &actor)?;
        return print_json(&config);
    }

    let ctx = Context::open(&config, actor)?;
    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Product { action } => match action {
            ProductAction::Add { id, name, kind } => {
                print_json(&commands::product::add(&ctx, &id, &name, kind)?)
            }
            ProductAction::List => print_json(&commands::product::list(&ctx)?),
            ProductAction::Deactivate { id } => {
                print_json(&commands::product::deactivate(&ctx, &id)?)
            }
        },
        Commands::Version { action } => run_version(&ctx, action),
        Commands::Compat { action } => match action {
            CompatAction::Validate {
                target,
                incompatible,
            } => print_json(&commands::version::validate(
                &ctx,
                &target.product,
                &target.number,
                incompatible,
            )?),
        },
        Commands::Path { action } => match action {
            PathAction::Register {
                product,
                from,
                to,
                via,
            } => print_json(&commands::path::register(&ctx, &product, &from, &to, &via)?),
            PathAction::Block {
                product,
                from,
                to,
                reason,
            } => print_json(&commands::path::block(&ctx, &product, &from, &to, &reason)?),
            PathAction::Resolve { product, from, to } => {
                print_json(&commands::path::resolve(&ctx, &product, &from, &to)?)
            }
            PathAction::List { product } => print_json(&commands::path::list(&ctx, &product)?),
        },
        Commands::Detect {
            endpoint,
            product,
            current,
        } => print_json(&commands::detect::run(&ctx, &endpoint, &product, &current)?),
        Commands::Rollout { action } => run_rollout(&ctx, action),
    }
}

fn run_version(ctx: &Context, action: VersionAction) -> anyhow::Result<()> {
    use commands::version;

    let step = |target: VersionRef, to: VersionState, scheduled: bool| {
        version::transition(ctx, &target.product, &target.number, to, scheduled)
    };

    match action {
        VersionAction::Add {
            target,
            release_type,
            release_date,
            bounds,
            notes,
        } => print_json(&version::add(
            ctx,
            &target.product,
            &target.number,
            release_type,
            release_date,
            bounds.into_bounds().unwrap_or_default(),
            notes,
        )?),
        VersionAction::Edit {
            target,
            release_type,
            release_date,
            eol_date,
            bounds,
            notes,
        } => {
            let changes = VersionEdit {
                release_type,
                release_date,
                eol_date,
                server_bounds: bounds.into_bounds(),
                notes,
            };
            print_json(&version::edit(ctx, &target.product, &target.number, changes)?)
        }
        VersionAction::Submit(target) => {
            print_json(&step(target, VersionState::PendingReview, false)?)
        }
        VersionAction::Approve(target) => print_json(&step(target, VersionState::Approved, false)?),
        VersionAction::Release { target, scheduled } => {
            print_json(&step(target, VersionState::Released, scheduled)?)
        }
        VersionAction::Deprecate(target) => {
            print_json(&step(target, VersionState::Deprecated, false)?)
        }
        VersionAction::Retire(target) => print_json(&step(target, VersionState::Eol, false)?),
        VersionAction::Show(target) => {
            print_json(&version::show(ctx, &target.product, &target.number)?)
        }
        VersionAction::List { product } => print_json(&version::list(ctx, &product)?),
    }
}

fn run_rollout(ctx: &Context, action: RolloutAction) -> anyhow::Result<()> {
    use commands::rollout;

    match action {
        RolloutAction::Start {
            endpoint,
            product,
            from,
            to,
        } => print_json(&rollout::initiate(ctx, &endpoint, &product, &from, &to)?),
        RolloutAction::Begin { id } => print_json(&rollout::set_status(
            ctx,
            &id,
            RolloutStatus::InProgress,
            None,
        )?),
        RolloutAction::Progress { id, percent } => {
            print_json(&rollout::progress(ctx, &id, percent)?)
        }
        RolloutAction::Complete { id } => print_json(&rollout::set_status(
            ctx,
            &id,
            RolloutStatus::Completed,
            None,
        )?),
        RolloutAction::Fail { id, message } => print_json(&rollout::set_status(
            ctx,
            &id,
            RolloutStatus::Failed,
            Some(&message),
        )?),
        RolloutAction::Cancel { id } => print_json(&rollout::set_status(
            ctx,
            &id,
            RolloutStatus::Cancelled,
            None,
        )?),
        RolloutAction::Show { id } => print_json(&rollout::show(ctx, &id)?),
        RolloutAction::List { endpoint } => {
            print_json(&rollout::list(ctx, endpoint.as_deref())?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_release_with_global_actor() {
        let cli = Cli::try_parse_from([
            "relgrid", "version", "release", "p1", "1.2.0", "--scheduled", "--actor", "rm",
        ])
        .unwrap();
        assert_eq!(cli.actor.as_deref(), Some("rm"));
        assert!(matches!(
            cli.command,
            Commands::Version {
                action: VersionAction::Release { scheduled: true, .. }
            }
        ));
    }

    #[test]
    fn rejects_unknown_release_type() {
        let result = Cli::try_parse_from([
            "relgrid", "version", "add", "p1", "1.0.0", "--release-type", "hotfix",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn timestamps_are_rfc3339() {
        assert!(parse_timestamp("2026-03-01T12:00:00Z").is_ok());
        assert!(parse_timestamp("2026-03-01T12:00:00+02:00").is_ok());
        assert!(parse_timestamp("March 1st").is_err());
    }

    #[test]
    fn bounds_args_collapse_when_empty() {
        let empty = BoundsArgs {
            min_server: None,
            max_server: None,
            recommended_server: None,
        };
        assert!(empty.into_bounds().is_none());
        let some = BoundsArgs {
            min_server: Some("2.0.0".into()),
            max_server: None,
            recommended_server: None,
        };
        assert_eq!(some.into_bounds().unwrap().min.as_deref(), Some("2.0.0"));
    }
}
