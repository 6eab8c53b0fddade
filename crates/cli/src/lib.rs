pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use bastion_core::config::{EngineConfig, LoadOptions, LogFormat};
use bastion_core::domain::approval::ApprovalStatus;
use clap::{Parser, Subcommand};
use tracing::Level;

use commands::approvals::ApprovalAction;

#[derive(Debug, Parser)]
#[command(
    name = "bastion",
    about = "Bastion remediation engine operator CLI",
    long_about = "Inspect configuration, check readiness, browse the built-in remediation catalog, dry-check operations against the safety pipeline and decide pending approvals.",
    after_help = "Examples:\n  bastion doctor --json\n  bastion catalog block_ip\n  bastion validate --file op.json\n  bastion approvals approve apr-123 --approver oncall@example.com"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a bastion.toml; defaults to ./bastion.toml or ./config/bastion.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Print the effective configuration with source attribution")]
    Config,
    #[command(about = "Validate config, catalog references and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "List built-in operation definitions with their rollback recipes")]
    Catalog {
        #[arg(help = "Show a single action type")]
        action_type: Option<String>,
    },
    #[command(about = "Run the safety pipeline over an operation described in a JSON file")]
    Validate {
        #[arg(long, help = "Operation JSON: incident_id, action_type, target_resource, params")]
        file: PathBuf,
    },
    #[command(subcommand, about = "List and decide approval requests")]
    Approvals(ApprovalsCommand),
}

#[derive(Debug, Subcommand)]
enum ApprovalsCommand {
    #[command(about = "Pending requests that have not lapsed, oldest first")]
    List,
    #[command(about = "Approve a pending request")]
    Approve {
        approval_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Reject a pending request")]
    Reject {
        approval_id: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
}

impl ApprovalsCommand {
    fn into_action(self) -> ApprovalAction {
        match self {
            Self::List => ApprovalAction::List,
            Self::Approve { approval_id, approver, comment } => ApprovalAction::Decide {
                approval_id,
                status: ApprovalStatus::Approved,
                approver,
                comment,
            },
            Self::Reject { approval_id, approver, comment } => ApprovalAction::Decide {
                approval_id,
                status: ApprovalStatus::Rejected,
                approver,
                comment,
            },
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
pub fn init_logging(config: &EngineConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = || LoadOptions { config_path: cli.config.clone(), ..LoadOptions::default() };

    if let Ok(config) = EngineConfig::load(options()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Config => commands::config::run(options()),
        Command::Doctor { json } => commands::doctor::run(options(), json),
        Command::Migrate => commands::migrate::run(options()),
        Command::Catalog { ref action_type } => commands::catalog::run(action_type.as_deref()),
        Command::Validate { ref file } => commands::validate::run(options(), file),
        Command::Approvals(command) => {
            commands::approvals::run(options(), command.into_action())
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
