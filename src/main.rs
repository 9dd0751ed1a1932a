use anyhow::{Context, Result};
use clap::Parser;
use jar_viewer::archive::{load_archive, split_entry_path};
use jar_viewer::cache::SourceCache;
use jar_viewer::cfr::Cfr;
use jar_viewer::cli::{Cli, Commands, OutputFormat};
use jar_viewer::config::{
    clear_db, resolve_cfr_path, resolve_db_path, resolve_limits, resolve_settings,
};
use jar_viewer::session::{Notice, OpenRequest, Session, Status};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::Level;

fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(&cli);

    match cli.command.clone() {
        Commands::Tree { archive, format } => {
            let loaded = load_archive(&archive, &resolve_limits(&cli))?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&loaded.tree().to_view())?)
                }
                OutputFormat::Text | OutputFormat::Code => print!("{}", loaded.tree().render()),
            }
        }
        Commands::Entries { archive } => {
            let loaded = load_archive(&archive, &resolve_limits(&cli))?;
            println!("{}", serde_json::to_string_pretty(loaded.entries())?);
        }
        Commands::Open {
            archive,
            entries,
            format,
            output,
        } => {
            let mut session = build_session(&cli)?;
            let result = open_entries(&mut session, &archive, &entries)?;
            write_open_output(&result, format, output.as_deref())?;
        }
        Commands::Browse { archive } => {
            let mut session = build_session(&cli)?;
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            browse(&mut session, &archive, stdin.lock(), stdout.lock())?;
        }
        Commands::Stats => {
            let db_path = resolve_db_path(&cli)?.context("source cache is disabled (--no-cache)")?;
            let cache = SourceCache::open(db_path)?;
            println!("{}", serde_json::to_string_pretty(&cache.stats()?)?);
        }
        Commands::Clear => {
            if let Some(db_path) = resolve_db_path(&cli)? {
                clear_db(&db_path)?;
            }
        }
    }

    Ok(())
}

fn parse_cli() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    Cli::parse_from(rewrite_args_for_implicit_browse(args))
}

/// `jar-viewer demo.jar` means `jar-viewer browse demo.jar`.
fn rewrite_args_for_implicit_browse(mut args: Vec<String>) -> Vec<String> {
    if args.len() <= 1 {
        return args;
    }

    let subcommands = ["tree", "entries", "open", "browse", "stats", "clear", "help"];
    let valued = [
        "--cfr",
        "--db",
        "--max-archive-size",
        "--max-entry-size",
        "--cfr-option",
    ];

    let mut idx = 1usize;
    while idx < args.len() {
        let a = args[idx].as_str();
        if a == "--" {
            idx += 1;
            break;
        }

        if valued.contains(&a) {
            idx += 2;
            continue;
        }

        if a.starts_with('-') {
            idx += 1;
            continue;
        }

        break;
    }

    if idx < args.len() {
        let token = args[idx].as_str();
        if !subcommands.contains(&token) {
            args.insert(idx, "browse".to_string());
        }
    }

    args
}

fn init_tracing(cli: &Cli) {
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn build_session(cli: &Cli) -> Result<Session> {
    let cfr = Cfr::new(resolve_cfr_path(cli)?);
    let cache = match resolve_db_path(cli)? {
        Some(db_path) => match SourceCache::open(db_path) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                tracing::warn!("source cache unavailable, continuing without it: {e:#}");
                None
            }
        },
        None => None,
    };
    Ok(Session::new(
        Arc::new(cfr),
        resolve_settings(cli)?,
        cache,
        resolve_limits(cli),
    ))
}

fn load_and_wait(session: &mut Session, archive: &Path) -> Result<()> {
    session.load(archive)?;
    session.wait_idle();
    if session.archive().is_none() {
        anyhow::bail!("{}", session.status());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct OpenedEntry {
    request: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tab: Option<TabOutput>,
}

#[derive(Debug, Serialize)]
struct TabOutput {
    name: String,
    path: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenResult {
    archive: String,
    entries: usize,
    opened: Vec<OpenedEntry>,
    tabs: Vec<String>,
    current: Option<String>,
}

fn open_entries(session: &mut Session, archive: &Path, requests: &[String]) -> Result<OpenResult> {
    load_and_wait(session, archive)?;
    let entries = session.archive().map(|a| a.entries().len()).unwrap_or(0);

    let requests: Vec<String> = if requests.is_empty() {
        vec![String::new()]
    } else {
        requests.to_vec()
    };

    let mut opened = Vec::with_capacity(requests.len());
    for request in requests {
        let outcome = session.open_path(&request);
        if outcome == OpenRequest::Started {
            session.wait_idle();
        }
        for notice in session.take_notices() {
            let Notice::Error { title, message } = notice;
            tracing::error!("{title} {message}");
        }

        let complete = session.status() == &Status::Complete;
        let status = session.status().to_string();
        let tab = if outcome == OpenRequest::Rejected || !complete {
            None
        } else {
            session.tabs().selected().map(|t| TabOutput {
                name: t.name().to_string(),
                path: t.path().to_string(),
                content: t.content().to_string(),
            })
        };
        opened.push(OpenedEntry {
            request,
            status,
            tab,
        });
    }

    Ok(OpenResult {
        archive: archive.to_string_lossy().to_string(),
        entries,
        opened,
        tabs: session.tabs().titles().into_iter().map(str::to_string).collect(),
        current: session.tabs().selected().map(|t| t.name().to_string()),
    })
}

fn write_open_output(result: &OpenResult, format: OutputFormat, output: Option<&Path>) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(result)?,
        OutputFormat::Text => {
            let mut out = String::new();
            for entry in result.opened.iter() {
                match &entry.tab {
                    Some(tab) => {
                        out.push_str(&format!("== {} ({}) ==\n", tab.name, tab.path));
                        out.push_str(&tab.content);
                    }
                    None => out.push_str(&format!("!! {}: {}\n", entry.request, entry.status)),
                }
            }
            out
        }
        OutputFormat::Code => {
            let last = result
                .opened
                .last()
                .context("nothing was opened")?;
            match &last.tab {
                Some(tab) => tab.content.clone(),
                None => anyhow::bail!("{}", last.status),
            }
        }
    };

    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
    } else {
        print!("{content}");
        if !content.ends_with('\n') {
            println!();
        }
    }

    Ok(())
}

const BROWSE_HELP: &str = "\
commands:
  ls [PATH]          show the tree, or the subtree at PATH
  open [PATH]        open an entry (no PATH: the file itself)
  close NAME         close a tab
  tabs               list open tabs (* = focused)
  show [NAME]        print the focused tab, or focus and print NAME
  set KEY VALUE      change a decompiler option (comments, showversion, ...)
  reload             load the file again
  status             print the status line
  quit               leave
";

fn browse(session: &mut Session, archive: &Path, input: impl BufRead, mut out: impl Write) -> Result<()> {
    load_and_wait(session, archive)?;
    writeln!(out, "{}", session.status())?;

    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };

        match cmd {
            "quit" | "exit" | "q" => break,
            "help" | "?" => write!(out, "{BROWSE_HELP}")?,
            "ls" => match session.tree() {
                Some(tree) if arg.is_empty() => write!(out, "{}", tree.render())?,
                Some(tree) => {
                    let segments = split_entry_path(arg);
                    match tree.find(&segments) {
                        Some(id) => {
                            for child in tree.node(id).children() {
                                let node = tree.node(*child);
                                let marker = if node.is_leaf() { "" } else { "/" };
                                writeln!(out, "{}{marker}", node.name())?;
                            }
                        }
                        None => writeln!(out, "File not found: {arg}")?,
                    }
                }
                None => writeln!(out, "No open file")?,
            },
            "open" | "o" => {
                if session.open_path(arg) == OpenRequest::Started {
                    session.wait_idle();
                }
                writeln!(out, "{}", session.status())?;
                for Notice::Error { title, message } in session.take_notices() {
                    writeln!(out, "{title} {message}")?;
                }
            }
            "close" => {
                if !session.close_tab(arg) {
                    writeln!(out, "No open tab: {arg}")?;
                }
            }
            "tabs" => {
                let current = session.tabs().selected().map(|t| t.name().to_string());
                for tab in session.tabs().iter() {
                    let mark = if current.as_deref() == Some(tab.name()) { "*" } else { " " };
                    writeln!(out, "{mark} {} ({})", tab.name(), tab.path())?;
                }
            }
            "show" => {
                if !arg.is_empty() && !session.focus_tab(arg) {
                    writeln!(out, "No open tab: {arg}")?;
                    continue;
                }
                match session.current_tab() {
                    Some(tab) => write!(out, "{}", tab.content())?,
                    None => writeln!(out, "{}", session.status())?,
                }
            }
            "set" => {
                let (key, value) = arg.split_once(char::is_whitespace).unwrap_or((arg, "true"));
                match session.update_settings(|s| s.set(key, value.trim())) {
                    Ok(()) => writeln!(out, "ok")?,
                    Err(e) => writeln!(out, "{e:#}")?,
                }
            }
            "reload" => {
                if session.reload().is_ok() {
                    session.wait_idle();
                }
                writeln!(out, "{}", session.status())?;
            }
            "status" => writeln!(out, "{}", session.status())?,
            other => writeln!(out, "unknown command: {other} (try `help`)")?,
        }
        out.flush()?;
    }

    session.close();
    Ok(())
}
