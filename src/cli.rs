//! Command-line interface.
//!
//! `loam` operates on a database rooted at `--root` (default `.`). Exit
//! codes: `0` success, `1` user error, `2` merge conflict, `3` critical
//! data-safety failure — `main` maps [`LoamError::exit_code`] onto the
//! process status.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use loam_core::backend::LocalBackend;
use loam_core::model::{BranchName, Event};

use crate::error::LoamError;
use crate::merge::{merge_event_streams, MergeOptions, ResolutionStrategy};
use crate::vcs::{BranchManager, CheckoutOptions};

// ---------------------------------------------------------------------------
// Argument types
// ---------------------------------------------------------------------------

/// An embedded, columnar, version-controlled document database.
#[derive(Debug, Parser)]
#[command(name = "loam", version, about, max_term_width = 100)]
pub struct Cli {
    /// Database root directory.
    #[arg(long, global = true, default_value = ".", env = "LOAM_ROOT")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage branches.
    Branch {
        #[command(subcommand)]
        command: BranchCommand,
    },

    /// Check out a branch or commit, rebuilding the working tree.
    Checkout {
        /// Branch name or commit hash.
        target: String,
        /// Create the branch first (from HEAD).
        #[arg(long)]
        create: bool,
        /// Discard uncommitted changes.
        #[arg(long)]
        force: bool,
    },

    /// Show working-tree changes against HEAD.
    Status,

    /// Commit the working tree.
    Commit {
        /// Commit message.
        #[arg(short, long)]
        message: String,
        /// Author identity.
        #[arg(long, default_value = "loam", env = "LOAM_AUTHOR")]
        author: String,
    },

    /// Show commit history from HEAD.
    Log {
        /// Maximum commits to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Three-way merge of event streams (JSONL files of events).
    Merge {
        /// The common ancestor's events.
        #[arg(long)]
        base: PathBuf,
        /// Our side's events since the ancestor.
        #[arg(long)]
        ours: PathBuf,
        /// Their side's events since the ancestor.
        #[arg(long)]
        theirs: PathBuf,
        /// Resolve remaining conflicts with this strategy.
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Write the merged stream here (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum BranchCommand {
    /// List branches.
    List,
    /// Create a branch.
    Create {
        name: String,
        /// Base (branch, hash, or HEAD). Defaults to HEAD.
        #[arg(long)]
        from: Option<String>,
    },
    /// Delete a branch.
    Delete {
        name: String,
        /// Delete even the current branch.
        #[arg(long)]
        force: bool,
    },
    /// Rename a branch.
    Rename { old: String, new: String },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StrategyArg {
    Ours,
    Theirs,
    Latest,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Ours => Self::Ours,
            StrategyArg::Theirs => Self::Theirs,
            StrategyArg::Latest => Self::Latest,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run one parsed invocation.
///
/// # Errors
/// [`LoamError`] (wrapped in `anyhow`) for subsystem failures — `main`
/// downcasts it for the exit code.
pub fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Branch { command } => branch(&manager(&cli.root)?, command),
        Command::Checkout {
            target,
            create,
            force,
        } => {
            let commit = manager(&cli.root)?
                .checkout(
                    target,
                    &CheckoutOptions {
                        create: *create,
                        force: *force,
                        skip_state_reconstruction: false,
                    },
                )
                .map_err(LoamError::Vcs)?;
            println!("checked out {} at {}", target, commit.hash);
            Ok(())
        }
        Command::Status => {
            let mgr = manager(&cli.root)?;
            let current = mgr.current().map_err(LoamError::Vcs)?;
            match current {
                Some(branch) => println!("on branch {branch}"),
                None => println!("detached HEAD"),
            }
            let report = mgr.status().map_err(LoamError::Vcs)?;
            if report.has_changes {
                println!("uncommitted changes:");
                for collection in &report.changed_collections {
                    println!("  modified: {collection}");
                }
            } else {
                println!("working tree clean");
            }
            Ok(())
        }
        Command::Commit { message, author } => {
            let commit = manager(&cli.root)?
                .commit(author, message)
                .map_err(LoamError::Vcs)?;
            println!("[{}] {}", commit.hash, commit.message);
            Ok(())
        }
        Command::Log { limit } => {
            let commits = manager(&cli.root)?.log(*limit).map_err(LoamError::Vcs)?;
            for commit in commits {
                println!("commit {}", commit.hash);
                println!("Author: {}", commit.author);
                println!("Date:   {}", commit.timestamp);
                println!("\n    {}\n", commit.message);
            }
            Ok(())
        }
        Command::Merge {
            base,
            ours,
            theirs,
            strategy,
            output,
        } => merge(base, ours, theirs, *strategy, output.as_deref()),
    }
}

fn manager(root: &Path) -> anyhow::Result<BranchManager> {
    let backend = LocalBackend::new(root).map_err(LoamError::Storage)?;
    let mgr = BranchManager::new(Arc::new(backend));
    mgr.init().map_err(LoamError::Vcs)?;
    Ok(mgr)
}

fn branch(mgr: &BranchManager, command: &BranchCommand) -> anyhow::Result<()> {
    match command {
        BranchCommand::List => {
            let current = mgr.current().map_err(LoamError::Vcs)?;
            for (name, hash) in mgr.list().map_err(LoamError::Vcs)? {
                let marker = if current.as_ref() == Some(&name) { "*" } else { " " };
                println!("{marker} {name} {hash}");
            }
            Ok(())
        }
        BranchCommand::Create { name, from } => {
            let name = parse_branch(name)?;
            mgr.create(&name, from.as_deref()).map_err(LoamError::Vcs)?;
            println!("created branch {name}");
            Ok(())
        }
        BranchCommand::Delete { name, force } => {
            let name = parse_branch(name)?;
            mgr.delete(&name, *force).map_err(LoamError::Vcs)?;
            println!("deleted branch {name}");
            Ok(())
        }
        BranchCommand::Rename { old, new } => {
            mgr.rename(&parse_branch(old)?, &parse_branch(new)?)
                .map_err(LoamError::Vcs)?;
            println!("renamed {old} to {new}");
            Ok(())
        }
    }
}

fn parse_branch(name: &str) -> anyhow::Result<BranchName> {
    BranchName::new(name)
        .map_err(crate::vcs::VcsError::Validation)
        .map_err(LoamError::Vcs)
        .map_err(Into::into)
}

fn merge(
    base: &Path,
    ours: &Path,
    theirs: &Path,
    strategy: Option<StrategyArg>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let base = read_events(base)?;
    let our_events = read_events(ours)?;
    let their_events = read_events(theirs)?;

    let outcome = merge_event_streams(
        &base,
        &our_events,
        &their_events,
        &MergeOptions {
            resolution_strategy: strategy.map(Into::into),
        },
    );

    for auto in &outcome.auto_merged {
        println!("auto-merged {} {}: {}", auto.target, auto.field, auto.detail);
    }
    for resolution in &outcome.resolved {
        println!(
            "resolved {} on {} in favor of {:?}",
            conflict_label(&resolution.conflict),
            resolution.conflict.target,
            resolution.winner
        );
    }
    if !outcome.success {
        for conflict in &outcome.conflicts {
            eprintln!(
                "CONFLICT ({}) on {}{}",
                conflict_label(conflict),
                conflict.target,
                conflict
                    .field
                    .as_deref()
                    .map(|f| format!(" field '{f}'"))
                    .unwrap_or_default()
            );
        }
        return Err(LoamError::MergeConflicts {
            count: outcome.conflicts.len(),
        }
        .into());
    }

    let mut rendered = String::new();
    for event in &outcome.merged_events {
        rendered.push_str(&serde_json::to_string(event)?);
        rendered.push('\n');
    }
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("writing merged events to {}", path.display()))?,
        None => print!("{rendered}"),
    }
    println!("merged {} event(s)", outcome.merged_events.len());
    Ok(())
}

fn conflict_label(conflict: &crate::merge::Conflict) -> &'static str {
    match conflict.conflict_type {
        crate::merge::ConflictType::DeleteUpdate => "delete_update",
        crate::merge::ConflictType::CreateCreate => "create_create",
        crate::merge::ConflictType::ConcurrentUpdate => "concurrent_update",
    }
}

fn read_events(path: &Path) -> anyhow::Result<Vec<Event>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading events from {}", path.display()))?;
    let mut events = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: not an event line", path.display(), idx + 1))?;
        events.push(event);
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_branch_create() {
        let cli = Cli::parse_from(["loam", "branch", "create", "feature", "--from", "main"]);
        match cli.command {
            Command::Branch {
                command: BranchCommand::Create { name, from },
            } => {
                assert_eq!(name, "feature");
                assert_eq!(from.as_deref(), Some("main"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_checkout_flags() {
        let cli = Cli::parse_from(["loam", "checkout", "work", "--create", "--force"]);
        match cli.command {
            Command::Checkout {
                target,
                create,
                force,
            } => {
                assert_eq!(target, "work");
                assert!(create);
                assert!(force);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_merge_strategy() {
        let cli = Cli::parse_from([
            "loam", "merge", "--base", "b.jsonl", "--ours", "o.jsonl", "--theirs", "t.jsonl",
            "--strategy", "latest",
        ]);
        match cli.command {
            Command::Merge { strategy, .. } => {
                assert!(matches!(strategy, Some(StrategyArg::Latest)));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn root_defaults_to_cwd() {
        let cli = Cli::parse_from(["loam", "status"]);
        assert_eq!(cli.root, PathBuf::from("."));
    }
}
