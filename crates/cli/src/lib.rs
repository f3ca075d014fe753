pub mod commands;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::commands::request::{CreateArgs, ListArgs};

#[derive(Debug, Parser)]
#[command(
    name = "approvo",
    about = "Approvo operator CLI",
    long_about = "Operate the Approvo approval engine: migrations, demo data, config inspection, readiness checks and approval requests.",
    after_help = "Examples:\n  approvo doctor --json\n  approvo request create --entity-type PURCHASE --entity-id po-17 --amount 1200000 --requester u-employee --title \"Laptops\"\n  approvo decide <REQUEST_ID> --user u-finance --decision APPROVE\n  approvo dispatch --drain"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo directory and approval workflows (idempotent)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution"
    )]
    Config,
    #[command(about = "Validate config, DB connectivity, approval schema and outbox backlog")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Create and inspect approval requests")]
    Request(RequestCommand),
    #[command(about = "Approve or reject the active step of a request")]
    Decide {
        request_id: String,
        #[arg(long)]
        user: String,
        #[arg(long, help = "APPROVE or REJECT")]
        decision: String,
        #[arg(long, default_value = "")]
        comments: String,
    },
    #[command(about = "Route a pending request to a director")]
    Escalate {
        request_id: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    #[command(about = "Deliver pending outbox events (notifications and post-approval callbacks)")]
    Dispatch {
        #[arg(long, help = "Keep dispatching until the outbox is empty")]
        drain: bool,
        #[arg(long)]
        batch_size: Option<u32>,
    },
}

#[derive(Debug, Subcommand)]
enum RequestCommand {
    #[command(about = "Submit an entity for approval")]
    Create {
        #[arg(long, help = "SALE or PURCHASE")]
        entity_type: String,
        #[arg(long)]
        entity_id: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        requester: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        message: String,
        #[arg(long, help = "LOW, NORMAL, HIGH or URGENT")]
        priority: Option<String>,
    },
    #[command(about = "Show a request with its step actions")]
    Show { request_id: String },
    #[command(about = "Show the audit trail of a request, oldest first")]
    History { request_id: String },
    #[command(about = "List requests the user can act on right now")]
    Pending {
        #[arg(long)]
        user: String,
    },
    #[command(about = "List requests, newest first")]
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        requester: Option<String>,
        /// Show only what this user raised or can act on; admins and directors see all
        #[arg(long)]
        visible_to: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
    },
}

/// Logs go to stderr so stdout stays one JSON outcome per command.
fn init_logging() {
    let filter = EnvFilter::try_from_env("APPROVO_CLI_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .compact()
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Request(request) => run_request(request),
        Command::Decide { request_id, user, decision, comments } => {
            commands::decide::run(&request_id, &user, &decision, &comments)
        }
        Command::Escalate { request_id, user, reason } => {
            commands::escalate::run(&request_id, &user, &reason)
        }
        Command::Dispatch { drain, batch_size } => commands::dispatch::run(drain, batch_size),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn run_request(command: RequestCommand) -> commands::CommandResult {
    match command {
        RequestCommand::Create {
            entity_type,
            entity_id,
            amount,
            requester,
            title,
            message,
            priority,
        } => commands::request::create(CreateArgs {
            entity_type,
            entity_id,
            amount,
            requester,
            title,
            message,
            priority,
        }),
        RequestCommand::Show { request_id } => commands::request::show(&request_id),
        RequestCommand::History { request_id } => commands::request::history(&request_id),
        RequestCommand::Pending { user } => commands::request::pending(&user),
        RequestCommand::List { status, module, requester, visible_to, limit, offset } => {
            commands::request::list(ListArgs { status, module, requester, visible_to, limit, offset })
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use rust_decimal::Decimal;

    use super::{Cli, Command, RequestCommand};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn request_create_parses_decimal_amounts() {
        let cli = Cli::try_parse_from([
            "approvo",
            "request",
            "create",
            "--entity-type",
            "PURCHASE",
            "--entity-id",
            "po-17",
            "--amount",
            "1200000.50",
            "--requester",
            "u-employee",
            "--title",
            "Laptops",
        ])
        .expect("parse");

        match cli.command {
            Command::Request(RequestCommand::Create { amount, message, priority, .. }) => {
                assert_eq!(amount, Decimal::new(120_000_050, 2));
                assert_eq!(message, "");
                assert_eq!(priority, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn request_list_accepts_a_visibility_user() {
        let cli = Cli::try_parse_from([
            "approvo",
            "request",
            "list",
            "--visible-to",
            "u-finance",
            "--status",
            "PENDING",
        ])
        .expect("parse");

        match cli.command {
            Command::Request(RequestCommand::List { visible_to, status, .. }) => {
                assert_eq!(visible_to.as_deref(), Some("u-finance"));
                assert_eq!(status.as_deref(), Some("PENDING"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
