pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "outlay",
    about = "Outlay expense approval CLI",
    long_about = "Operate the outlay expense approval workflow: submit, review, and pay requests, \
                  plus migrations, config inspection, and readiness checks.",
    after_help = "Examples:\n  outlay doctor --json\n  outlay migrate\n  outlay request list --actor 42\n  outlay request approve 7 --actor 42"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load deterministic demo data into an empty database")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, permission mappings, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Submit, review, and inspect expense requests")]
    Request(RequestCommand),
}

#[derive(Debug, Subcommand)]
pub enum RequestCommand {
    #[command(about = "Submit a new expense request")]
    Create {
        #[arg(long, help = "Acting user id")]
        actor: i64,
        #[arg(long, help = "Acting user handle")]
        handle: String,
        #[arg(long)]
        project: String,
        #[arg(long, help = "Amount, comma or dot decimal separator")]
        amount: String,
        #[arg(long)]
        currency: String,
        #[arg(long, help = "Funding source code")]
        source: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        partner_account: Option<String>,
        #[arg(long)]
        document: Option<String>,
        #[arg(long, help = "one_time, monthly, weekly, DD.MM.YYYY, or DD.MM.YYYY-DD.MM.YYYY")]
        period: Option<String>,
        #[arg(long, help = "Expense date, YYYY-MM-DD or DD.MM.YYYY")]
        date: String,
    },
    #[command(about = "Approve a request (first approval waits for payment, second marks paid)")]
    Approve {
        id: i64,
        #[arg(long, help = "Acting user id")]
        actor: i64,
    },
    #[command(about = "Reject a pending request with a reason")]
    Reject {
        id: i64,
        #[arg(long, help = "Acting user id")]
        actor: i64,
        #[arg(long)]
        reason: String,
    },
    #[command(about = "Edit one field of a non-terminal request")]
    Edit {
        id: i64,
        #[arg(long, help = "Acting user id")]
        actor: i64,
        #[arg(long, help = "Field name, e.g. amount, source, note")]
        field: String,
        #[arg(long)]
        value: String,
    },
    #[command(about = "Add a comment to a visible request")]
    Comment {
        id: i64,
        #[arg(long, help = "Acting user id")]
        actor: i64,
        #[arg(long)]
        body: String,
    },
    #[command(about = "Show one request with its status history and comments")]
    Show {
        id: i64,
        #[arg(long, help = "Acting user id")]
        actor: i64,
    },
    #[command(about = "List visible requests, newest first")]
    List {
        #[arg(long, help = "Acting user id")]
        actor: i64,
        #[arg(long, help = "Filter by status: pending, waiting, paid, rejected")]
        status: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Request(command) => commands::request::run(command),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
