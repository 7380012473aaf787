use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use vida_core::commands::{Commands, ExportFormat, ensure_initialized_at};
use vida_core::services::audit::AuditFilter;
use vida_core::services::session::ChatSession;
use vida_core::services::turn::{TurnError, TurnOutcome};
use vida_rules::RiskLevel;

#[derive(Parser)]
#[command(
    name = "vida-admin",
    about = "Operator console for the Vida supportive-chat pipeline"
)]
struct Cli {
    /// Data root (defaults to $VIDA_ROOT or ./.vida)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create the data root layout, config and default rule book
    Init,
    /// Run one turn and print the delivered reply
    Ask {
        #[arg(long)]
        user: String,
        #[arg(long)]
        chat: Option<String>,
        text: String,
    },
    /// Interactive conversation (`/retry` re-sends the last failed message, `/quit` exits)
    Chat {
        #[arg(long)]
        user: String,
        #[arg(long)]
        chat: Option<String>,
    },
    /// Lexical retrieval over the loaded corpus
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Audit trail inspection
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
    /// Chat management
    Chats {
        #[command(subcommand)]
        cmd: ChatsCmd,
    },
    /// Activity summary for one user, or dashboard figures across all users
    Stats {
        #[arg(long, conflicts_with_all = ["global", "by_day", "active"])]
        user: Option<String>,
        /// Totals across all users
        #[arg(long, conflicts_with_all = ["by_day", "active"])]
        global: bool,
        /// Messages per day over the last DAYS days
        #[arg(long, value_name = "DAYS", conflicts_with = "active")]
        by_day: Option<u32>,
        /// Users active within the last DAYS days
        #[arg(long, value_name = "DAYS")]
        active: Option<u32>,
    },
}

#[derive(clap::Args, Clone)]
struct FilterArgs {
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    chat: Option<String>,
    #[arg(long, value_parser = parse_level)]
    level: Option<RiskLevel>,
    #[arg(long)]
    limit: Option<usize>,
}

impl From<FilterArgs> for AuditFilter {
    fn from(a: FilterArgs) -> Self {
        AuditFilter { user_id: a.user, chat_id: a.chat, level: a.level, limit: a.limit }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Records, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Counts by level, blocked total and average score
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Export records as JSON or CSV
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value = "json")]
        format: Format,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Replay records buffered while the durable store was unavailable
    Flush,
}

#[derive(Subcommand)]
enum ChatsCmd {
    List {
        #[arg(long)]
        user: String,
    },
    Show {
        chat_id: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    Rename {
        chat_id: String,
        name: String,
    },
    Duplicate {
        chat_id: String,
        #[arg(long)]
        name: Option<String>,
    },
    Delete {
        chat_id: String,
    },
}

fn parse_level(s: &str) -> Result<RiskLevel, String> {
    RiskLevel::parse(s).ok_or_else(|| format!("unknown risk level {s:?} (low|medium|high)"))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vida_core=info,vida_admin=info,warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    if let Cmd::Init = cli.cmd {
        return init(cli.root);
    }

    let cmds = match &cli.root {
        Some(root) => Commands::open(root)?,
        None => Commands::new()?,
    };

    match cli.cmd {
        Cmd::Init => Ok(()),
        Cmd::Ask { user, chat, text } => {
            let mut session = cmds.session(&user, chat.as_deref());
            let outcome = cmds.ask(&mut session, &text);
            print_outcome(outcome);
            if let Some(c) = session.chat_id() {
                eprintln!("chat: {c}");
            }
            Ok(())
        }
        Cmd::Chat { user, chat } => repl(&cmds, cmds.session(&user, chat.as_deref())),
        Cmd::Search { query, k } => {
            for hit in cmds.search(&query, k) {
                println!("{:>4}  {:.4}  {}", hit.source_index, hit.similarity_score, hit.text);
            }
            let stats = cmds.rag_stats();
            tracing::info!(documents = stats.documents, status = %stats.status, "corpus");
            Ok(())
        }
        Cmd::Audit { cmd } => audit(&cmds, cmd),
        Cmd::Chats { cmd } => chats(&cmds, cmd),
        Cmd::Stats { user, global, by_day, active } => {
            let json = match (user, global, by_day, active) {
                (Some(user), ..) => serde_json::to_string_pretty(&cmds.user_stats(&user)?)?,
                (None, true, ..) => serde_json::to_string_pretty(&cmds.global_stats()?)?,
                (None, false, Some(days), _) => {
                    serde_json::to_string_pretty(&cmds.messages_by_day(days)?)?
                }
                (None, false, None, Some(days)) => {
                    serde_json::to_string_pretty(&cmds.active_users(days)?)?
                }
                (None, false, None, None) => bail!("pass --user, --global, --by-day or --active"),
            };
            println!("{json}");
            Ok(())
        }
    }
}

fn init(root: Option<PathBuf>) -> Result<()> {
    let root = root.unwrap_or_else(vida_core::commands::init::vida_root);
    let report = ensure_initialized_at(&root)?;
    for c in &report.created {
        println!("created  {c}");
    }
    for e in &report.existed {
        println!("exists   {e}");
    }
    println!("data root ready at {}", report.root.display());
    Ok(())
}

fn print_outcome(outcome: Result<TurnOutcome, TurnError>) {
    match outcome {
        Ok(out) => {
            println!("{}", out.final_text);
            match (&out.assessment, &out.error) {
                (Some(a), _) => eprintln!(
                    "[risk {} score {}{}]",
                    a.risk_level,
                    a.risk_score,
                    if out.was_blocked() { ", blocked" } else { "" }
                ),
                (None, Some(e)) => {
                    tracing::debug!(cause = %e, "generation failed");
                    eprintln!("[/retry para reenviar]");
                }
                (None, None) => {}
            }
        }
        Err(e) => eprintln!("{}", e.user_message()),
    }
}

fn repl(cmds: &Commands, mut session: ChatSession) -> Result<()> {
    let stdin = io::stdin();
    let mut out = io::stdout();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => return Ok(()),
            "/retry" => match session.latest_failed() {
                Some(id) => print_outcome(cmds.retry(&mut session, id)),
                None => eprintln!("nothing to retry"),
            },
            text => print_outcome(cmds.ask(&mut session, text)),
        }
    }
}

fn audit(cmds: &Commands, cmd: AuditCmd) -> Result<()> {
    match cmd {
        AuditCmd::List { filter } => {
            for r in cmds.audit_records(&filter.into())? {
                println!(
                    "{}  {:<6} {:>3}  {}  {}  {}",
                    r.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                    r.risk_level.as_str(),
                    r.risk_score,
                    if r.was_blocked { "BLOCKED" } else { "       " },
                    r.user_id,
                    if r.verify() { "ok" } else { "CHECKSUM MISMATCH" },
                );
            }
            Ok(())
        }
        AuditCmd::Stats { filter } => {
            let stats = cmds.audit_stats(&filter.into())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        AuditCmd::Export { filter, format, out } => {
            let format = match format {
                Format::Json => ExportFormat::Json,
                Format::Csv => ExportFormat::Csv,
            };
            let text = cmds.export_audit(&filter.into(), format)?;
            match out {
                Some(path) => {
                    fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
                    println!("exported to {}", path.display());
                }
                None => println!("{text}"),
            }
            Ok(())
        }
        AuditCmd::Flush => {
            let report = cmds.flush_audit()?;
            println!("replayed {} record(s), {} still pending", report.replayed, report.remaining);
            Ok(())
        }
    }
}

fn chats(cmds: &Commands, cmd: ChatsCmd) -> Result<()> {
    match cmd {
        ChatsCmd::List { user } => {
            for c in cmds.list_chats(&user)? {
                println!(
                    "{}  {:>4} msgs  {}  {}",
                    c.id,
                    c.message_count,
                    c.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    c.name
                );
            }
        }
        ChatsCmd::Show { chat_id, limit } => {
            for m in cmds.chat_messages(&chat_id, limit)? {
                println!("{} {}", if m.is_user { "user:" } else { "vida:" }, m.text);
            }
        }
        ChatsCmd::Rename { chat_id, name } => {
            cmds.rename_chat(&chat_id, &name)?;
            println!("renamed {chat_id}");
        }
        ChatsCmd::Duplicate { chat_id, name } => {
            let copy = cmds.duplicate_chat(&chat_id, name.as_deref())?;
            println!("{}  {}", copy.id, copy.name);
        }
        ChatsCmd::Delete { chat_id } => {
            cmds.delete_chat(&chat_id)?;
            println!("deleted {chat_id}");
        }
    }
    Ok(())
}
