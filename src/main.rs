//! Binary entrypoint for the charsheet CLI.
//!
//! Commands:
//! - `init [--pages-url <url>]` - write a starter `charsheet.toml`
//! - `init-index` - create the empty character index in the repository
//! - `list` - print the character picker
//! - `show [ID]` - print a character (defaults to the last opened one)
//! - `new --name <name> [--set k=v]...` - create and save a character
//! - `edit [ID] ...` - change fields, cells and rows, then save
//! - `import <file>` - save a character document from disk
//! - `delete <ID>` - delete a character
//! - `remember-token <token>` / `forget-token` - manage the stored GitHub token
//! - `status` - print configuration and local state
//!
//! See the library crate docs for module-level details: `charsheet::`.
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;

use charsheet::auth::{Prompter, ScriptedPrompter, TerminalPrompter};
use charsheet::character::{FieldValue, ListKind};
use charsheet::config::{Config, RepoConfig};
use charsheet::logutil::{escape_log, redact_token};
use charsheet::session::{start_controller, Controller, ControllerHandle, Edit, LocalStateFile};
use charsheet::store::GitHubStore;
use charsheet::sync::{IndexSynchronizer, SyncOptions};

const TOKEN_ENV: &str = "CHARSHEET_TOKEN";

#[derive(Parser)]
#[command(name = "charsheet")]
#[command(about = "Character sheets stored as JSON in a GitHub repository")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "charsheet.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// GitHub token for writes (overrides CHARSHEET_TOKEN and the remembered token)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Answer the save/delete password prompt non-interactively
    #[arg(long, global = true)]
    password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// GitHub Pages URL of the site hosting the sheets (fills owner and repo)
        #[arg(long)]
        pages_url: Option<String>,
    },
    /// Create an empty character index in the repository
    InitIndex,
    /// List stored characters
    List,
    /// Print a character as JSON
    Show {
        /// Character id (defaults to the last opened character)
        id: Option<String>,
    },
    /// Create and save a new character
    New {
        /// Character name
        #[arg(short, long)]
        name: String,
        /// Set a field, FIELD=VALUE
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
    },
    /// Edit and save a character
    Edit {
        /// Character id (defaults to the last opened character)
        id: Option<String>,
        /// Set a text field, FIELD=VALUE
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
        /// Tick a checkbox field
        #[arg(long, value_name = "FIELD")]
        check: Vec<String>,
        /// Untick a checkbox field
        #[arg(long, value_name = "FIELD")]
        uncheck: Vec<String>,
        /// Remove a field entirely
        #[arg(long, value_name = "FIELD")]
        clear: Vec<String>,
        /// Set a list cell, LIST:ROW:COLUMN=VALUE
        #[arg(long, value_name = "LIST:ROW:COLUMN=VALUE")]
        cell: Vec<String>,
        /// Append an empty row to a list
        #[arg(long, value_name = "LIST")]
        add_row: Vec<ListKind>,
        /// Remove a row, LIST:ROW, or the last row with just LIST
        #[arg(long, value_name = "LIST[:ROW]")]
        remove_row: Vec<String>,
    },
    /// Save a character document read from a JSON file
    Import {
        /// Path to the JSON document
        file: String,
    },
    /// Delete a character
    Delete {
        /// Character id
        id: String,
    },
    /// Store a GitHub token in the local state file
    RememberToken {
        token: String,
    },
    /// Remove the stored GitHub token
    ForgetToken,
    /// Show configuration and local state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init { .. } => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    if let Err(e) = run(cli, pre_config).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli, pre_config: Option<Config>) -> Result<()> {
    if let Commands::Init { pages_url } = &cli.command {
        match pages_url {
            Some(url) => {
                let config = Config {
                    repo: RepoConfig::from_pages_url(url)
                        .ok_or_else(|| anyhow!("{url} is not a <owner>.github.io address"))?,
                    ..Config::default()
                };
                config.save(&cli.config).await?;
            }
            None => Config::create_default(&cli.config).await?,
        }
        info!("Configuration file created at {}", cli.config);
        println!("Configuration file created at {}", cli.config);
        if pages_url.is_none() {
            println!("Edit [repo] owner and repo before use.");
        }
        return Ok(());
    }

    let config = match pre_config {
        Some(c) => c,
        None => Config::load(&cli.config).await?,
    };
    if config.repo.is_placeholder() {
        warn!("repository is not configured ([repo] owner/repo still {})", charsheet::config::PLACEHOLDER);
        println!(
            "Repository not configured: edit [repo] in {} (or run `charsheet init --pages-url ...`).",
            cli.config
        );
    }
    let local = LocalStateFile::new(&config.session.state_file);

    match cli.command {
        Commands::RememberToken { token } => {
            let token = token.trim().to_string();
            if token.is_empty() {
                bail!("token is empty");
            }
            let shown = redact_token(&token);
            local.update(|s| s.token = Some(token))?;
            println!("Token remembered ({shown}).");
            return Ok(());
        }
        Commands::ForgetToken => {
            local.update(|s| s.token = None)?;
            println!("Token forgotten.");
            return Ok(());
        }
        Commands::Status => {
            let state = local.load()?;
            println!("Repository:   {}/{} ({})", config.repo.owner, config.repo.repo, config.repo.branch);
            println!("Index:        {}", config.repo.index_path);
            println!("Characters:   {}", config.repo.characters_dir);
            println!("State file:   {}", local.path().display());
            println!(
                "Last opened:  {}",
                state.last_character_id.as_deref().unwrap_or("(none)")
            );
            println!(
                "Token:        {}",
                match (&cli.token, std::env::var(TOKEN_ENV).ok(), &state.token) {
                    (Some(_), _, _) => "from --token".to_string(),
                    (None, Some(_), _) => format!("from {TOKEN_ENV}"),
                    (None, None, Some(t)) => format!("remembered ({})", redact_token(t)),
                    (None, None, None) => "none (read-only)".to_string(),
                }
            );
            return Ok(());
        }
        _ => {}
    }

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .or_else(|| local.load().ok().and_then(|s| s.token));
    let store = GitHubStore::new(config.repo.clone(), token)?;
    if !store.has_token() {
        info!("no GitHub token configured; saves and deletes will be refused");
    }
    let sync = IndexSynchronizer::new(Arc::new(store), SyncOptions::from_config(&config));

    if let Commands::InitIndex = cli.command {
        sync.init_index().await?;
        println!("Created {}", config.repo.index_path);
        return Ok(());
    }

    let prompter: Arc<dyn Prompter> = match &cli.password {
        Some(p) => Arc::new(ScriptedPrompter::always(p)),
        None => Arc::new(TerminalPrompter),
    };
    let name_field = config.sync.name_field.clone();
    let (session, task) = start_controller(Controller::new(sync, prompter, local));

    let result = execute(cli.command, &session, &name_field).await;
    let _ = session.shutdown().await;
    let _ = task.await;
    result
}

async fn execute(command: Commands, session: &ControllerHandle, name_field: &str) -> Result<()> {
    match command {
        Commands::List => {
            let index = session.refresh_choices().await?;
            if index.characters.is_empty() {
                println!("No characters yet.");
            }
            for entry in &index.characters {
                println!("{:<32} {}", entry.display_name(), entry.id);
            }
        }
        Commands::Show { id } => {
            open(session, id).await?;
            let snapshot = session.snapshot().await?;
            println!("{}", snapshot.record.to_json_pretty()?);
        }
        Commands::New { name, set } => {
            session.new_character().await?;
            session
                .edit(Edit::SetField {
                    name: name_field.to_string(),
                    value: FieldValue::from(name),
                })
                .await?;
            for assignment in &set {
                let (field, value) = parse_assignment(assignment)?;
                session
                    .edit(Edit::SetField {
                        name: field,
                        value: value.into(),
                    })
                    .await?;
            }
            println!("{}", session.save().await?);
        }
        Commands::Edit {
            id,
            set,
            check,
            uncheck,
            clear,
            cell,
            add_row,
            remove_row,
        } => {
            open(session, id).await?;
            let mut edits = Vec::new();
            for assignment in &set {
                let (name, value) = parse_assignment(assignment)?;
                edits.push(Edit::SetField {
                    name,
                    value: value.into(),
                });
            }
            edits.extend(check.into_iter().map(|name| Edit::SetField {
                name,
                value: FieldValue::Flag(true),
            }));
            edits.extend(uncheck.into_iter().map(|name| Edit::SetField {
                name,
                value: FieldValue::Flag(false),
            }));
            edits.extend(clear.into_iter().map(|name| Edit::ClearField { name }));
            for target in &cell {
                edits.push(parse_cell(target)?);
            }
            edits.extend(add_row.into_iter().map(|list| Edit::AddRow { list }));
            for target in &remove_row {
                edits.push(parse_remove_row(target)?);
            }
            if edits.is_empty() {
                bail!("nothing to change");
            }
            for edit in edits {
                let label = format!("{edit:?}");
                if !session.edit(edit).await? {
                    println!("Unchanged: {}", escape_log(&label));
                }
            }
            println!("{}", session.save().await?);
        }
        Commands::Import { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {file}"))?;
            let raw: serde_json::Value =
                serde_json::from_str(&text).with_context(|| format!("parsing {file}"))?;
            println!("{}", session.import(raw).await?);
            println!("{}", session.save().await?);
        }
        Commands::Delete { id } => {
            session.refresh_choices().await?;
            // Nothing is loaded, so the gate asks for the picker entry's name.
            session.select(Some(id)).await?;
            println!("{}", session.delete().await?);
        }
        Commands::Init { .. }
        | Commands::InitIndex
        | Commands::RememberToken { .. }
        | Commands::ForgetToken
        | Commands::Status => bail!("command does not run in a session"),
    }
    Ok(())
}

/// Open `id`, or restore the last opened character when `id` is absent.
async fn open(session: &ControllerHandle, id: Option<String>) -> Result<()> {
    match id {
        Some(id) => {
            session.refresh_choices().await?;
            session.select(Some(id)).await?;
            let notice = session.load().await?;
            info!("{}", notice);
        }
        None => {
            let notice = session.startup().await?;
            if session.snapshot().await?.selected.is_none() {
                bail!("{notice}; no character to open (pass an ID)");
            }
            info!("{}", notice);
        }
    }
    Ok(())
}

fn parse_assignment(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected FIELD=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("empty field name in '{s}'");
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_list_row(s: &str) -> Result<(ListKind, Option<usize>)> {
    let (list, row) = match s.split_once(':') {
        Some((list, row)) => (list, Some(row)),
        None => (s, None),
    };
    let list: ListKind = list.trim().parse()?;
    let row = row
        .map(|r| r.trim().parse::<usize>().with_context(|| format!("bad row number in '{s}'")))
        .transpose()?;
    Ok((list, row))
}

/// `LIST:ROW:COLUMN=VALUE`
fn parse_cell(s: &str) -> Result<Edit> {
    let (target, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected LIST:ROW:COLUMN=VALUE, got '{s}'"))?;
    let (list_row, column) = target
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected LIST:ROW:COLUMN=VALUE, got '{s}'"))?;
    let (list, row) = parse_list_row(list_row)?;
    let row = row.ok_or_else(|| anyhow!("missing row number in '{s}'"))?;
    Ok(Edit::SetCell {
        list,
        row,
        column: column.trim().to_string(),
        value: value.into(),
    })
}

fn parse_remove_row(s: &str) -> Result<Edit> {
    Ok(match parse_list_row(s)? {
        (list, Some(row)) => Edit::RemoveRow { list, row },
        (list, None) => Edit::RemoveLastRow { list },
    })
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity raises the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .map(|c| c.logging.level_filter())
            .unwrap_or(log::LevelFilter::Warn),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Only echo to the console when someone is watching it
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_keep_equals_in_value() {
        assert_eq!(
            parse_assignment("Textbox7=a=b").unwrap(),
            ("Textbox7".to_string(), "a=b".to_string())
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn cell_specs() {
        assert_eq!(
            parse_cell("weapons:0:name=Sawed-off").unwrap(),
            Edit::SetCell {
                list: ListKind::Weapons,
                row: 0,
                column: "name".into(),
                value: "Sawed-off".into(),
            }
        );
        assert!(parse_cell("weapons:name=x").is_err());
        assert!(parse_cell("spells:0:name=x").is_err());
    }

    #[test]
    fn remove_row_specs() {
        assert_eq!(
            parse_remove_row("perks:3").unwrap(),
            Edit::RemoveRow {
                list: ListKind::Perks,
                row: 3
            }
        );
        assert_eq!(
            parse_remove_row("ammo").unwrap(),
            Edit::RemoveLastRow {
                list: ListKind::Ammo
            }
        );
    }
}
