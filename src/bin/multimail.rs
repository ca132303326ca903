use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use multimail::auth::token_store;
use multimail::config::load_config;
use multimail::daemon::run_daemon;
use multimail::domain::mail::Destination;
use multimail::ipc::{self, Request, Response};

#[derive(Parser)]
#[command(name = "multimail")]
#[command(about = "Multi-account webmail session manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: one session per account, feed polling, notifications
    Daemon,

    /// Show accounts, unread counts and poll state of a running daemon
    Status,

    /// Bring an account's view to the front
    Select { account: String },

    /// Send an account's view to a mailbox section (inbox, starred, sent, ...)
    GoTo {
        account: String,
        destination: Destination,
    },

    /// Open the compose form in an account's view
    Compose {
        account: String,
        /// Prefill the recipient
        #[arg(long)]
        to: Option<String>,
    },

    /// Start a session for a new account
    Add {
        account: String,
        #[arg(long)]
        label: String,
        /// Bring the new account to the front
        #[arg(long)]
        select: bool,
    },

    /// Rename an account
    Edit {
        account: String,
        #[arg(long)]
        label: String,
    },

    /// Close an account's session, purge its storage and forget its cookie
    Remove { account: String },

    /// Store the session cookie of an account in the keyring
    SetSessionCookie {
        #[arg(long)]
        account: String,
    },

    /// Forget the stored session cookie of an account
    ClearSessionCookie {
        #[arg(long)]
        account: String,
    },
}

fn print_response(resp: Response) -> Result<()> {
    if !resp.ok {
        return Err(anyhow!(
            "{}",
            resp.message.unwrap_or_else(|| "request failed".into())
        ));
    }
    if let Some(msg) = resp.message {
        print!("{msg}");
        if !msg.ends_with('\n') {
            println!();
        }
    }
    if let Some(unread) = resp.unread {
        println!("Total unread: {unread}");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::SetSessionCookie { account } => {
            eprintln!("Paste session cookie (end with Ctrl-D):");
            let mut cookie = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut cookie)?;
            token_store::save_session_cookie(&account, cookie.trim())?;
            println!("Saved session cookie for {}", account);
            Ok(())
        }

        Command::ClearSessionCookie { account } => {
            token_store::delete_session_cookie(&account)?;
            println!("Removed session cookie for {}", account);
            Ok(())
        }

        Command::Daemon => {
            let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_daemon(cfg))
        }

        Command::Status => print_response(ipc::send(&Request::Status)?),
        Command::Select { account } => print_response(ipc::send(&Request::Select { account })?),
        Command::GoTo {
            account,
            destination,
        } => print_response(ipc::send(&Request::GoTo {
            account,
            destination,
        })?),
        Command::Compose { account, to } => {
            print_response(ipc::send(&Request::Compose { account, to })?)
        }
        Command::Add {
            account,
            label,
            select,
        } => print_response(ipc::send(&Request::Add {
            account,
            label,
            select,
        })?),
        Command::Edit { account, label } => {
            print_response(ipc::send(&Request::Edit { account, label })?)
        }
        Command::Remove { account } => print_response(ipc::send(&Request::Remove { account })?),
    }
}
