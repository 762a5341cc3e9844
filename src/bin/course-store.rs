//! Course store administration tool.
//!
//! ## Usage
//!
//! ```bash
//! # Show what would be restored, then restore it
//! course-store --database courses.db fix-draft-constraint course-v1:edX+101+2030
//! course-store --database courses.db fix-draft-constraint course-v1:edX+101+2030 --commit
//!
//! # Publish one chapter
//! course-store --database courses.db publish edX+101+2030 --subtree ch1 --commit
//!
//! # Create a course from a JSON outline
//! course-store --database courses.db generate outline.json
//! ```
//!
//! Repair and publish commands are dry runs unless `--commit` is given.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use course_store::{
    config::StoreConfig,
    engine::{Engine, report::Report},
    error::StoreError,
    generate::CourseSpec,
    types::{Branch, CourseKey, VersionId},
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "course-store")]
#[command(about = "Inspect, publish and repair versioned courses")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "COURSE_STORE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database, overriding the config file
    #[arg(long, env = "COURSE_STORE_DATABASE")]
    database: Option<PathBuf>,

    /// User stamped on edits, overriding the config's default user
    #[arg(long, env = "COURSE_STORE_USER")]
    user: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy blocks published but missing from draft back into draft
    FixDraftConstraint {
        course_key: String,
        /// Apply the change instead of reporting it
        #[arg(long)]
        commit: bool,
    },
    /// Point the published branch at the draft head
    ForcePublish {
        course_key: String,
        #[arg(long)]
        commit: bool,
    },
    /// Publish the draft tree, or one subtree of it
    Publish {
        course_key: String,
        /// Subtree root; defaults to the course root
        #[arg(long)]
        subtree: Option<String>,
        #[arg(long)]
        commit: bool,
    },
    /// Create a course from a JSON outline
    Generate { spec: PathBuf },
    /// Classify a course as clean, dirty or inconsistent
    Status { course_key: String },
    /// List a branch's structure chain, newest first
    History {
        course_key: String,
        #[arg(long, default_value = "draft")]
        branch: Branch,
        /// Maximum number of ancestors, overriding the config
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("course_store=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            StoreConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => StoreConfig::default(),
    };
    if let Some(db) = args.database {
        config.database = Some(db);
    }
    if config.database.is_none() {
        warn!("no database configured; using a throwaway in-memory store");
    }
    let user = args.user.unwrap_or_else(|| config.default_user.clone());
    let engine = Engine::new(config.open_backend()?, Arc::new(config.user_directory()));

    match args.command {
        Command::FixDraftConstraint { course_key, commit } => {
            let key = resolve_course(&engine, &course_key)?;
            emit_report(&engine.fix_draft_constraint(&key, commit, &user)?, args.json)
        }
        Command::ForcePublish { course_key, commit } => {
            let key = resolve_course(&engine, &course_key)?;
            emit_report(&engine.force_publish(&key, commit, &user)?, args.json)
        }
        Command::Publish { course_key, subtree, commit } => {
            let key = resolve_course(&engine, &course_key)?;
            emit_report(&engine.publish_report(&key, subtree.as_deref(), commit, &user)?, args.json)
        }
        Command::Generate { spec } => {
            let raw = std::fs::read_to_string(&spec)
                .with_context(|| format!("reading {}", spec.display()))?;
            let mut outline: CourseSpec =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", spec.display()))?;
            if outline.user.trim().is_empty() {
                outline.user = user;
            }
            let generated = engine.generate(&outline)?;
            if args.json {
                return print_json(&generated);
            }
            println!("created {} at {}", generated.course_key, generated.version);
            for w in &generated.warnings {
                println!("  skipped {}.{}: {}", w.block_id, w.field, w.reason);
            }
            Ok(())
        }
        Command::Status { course_key } => {
            let key = resolve_course(&engine, &course_key)?;
            let status = engine.status(&key)?;
            if args.json {
                return print_json(&status);
            }
            println!("{key}: {status}");
            Ok(())
        }
        Command::History { course_key, branch, limit } => {
            let key = resolve_course(&engine, &course_key)?;
            let versions = engine.history(&key, branch, limit.unwrap_or(config.history_limit))?;
            let mut rows = Vec::with_capacity(versions.len());
            for version in versions {
                let s = engine.structures().get(&version)?;
                rows.push(HistoryRow {
                    version: s.version_id.clone(),
                    created_by: s.created_by.clone(),
                    created_on: s.created_on.to_rfc3339(),
                    blocks: s.len(),
                });
            }
            if args.json {
                return print_json(&rows);
            }
            for row in rows {
                println!(
                    "{}  {}  {:<12} {} block(s)",
                    row.version.short(),
                    row.created_on,
                    row.created_by,
                    row.blocks
                );
            }
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct HistoryRow {
    version: VersionId,
    created_by: String,
    created_on: String,
    blocks: usize,
}

/// Parses `raw` and checks that it names a course with both branches.
fn resolve_course(engine: &Engine, raw: &str) -> Result<CourseKey> {
    let Ok(key) = CourseKey::parse(raw) else {
        bail!("course key {raw:?} does not resolve");
    };
    let index = match engine.index().get_index(&key) {
        Ok(index) => index,
        Err(StoreError::CourseNotFound(_)) => bail!("course {key} not found"),
        Err(e) => return Err(e.into()),
    };
    if !index.is_versioned() {
        bail!("{key} is not a draft-versioned course");
    }
    Ok(key)
}

fn emit_report(report: &Report, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    print!("{report}");
    if !report.committed && !report.is_empty() {
        info!("dry run; re-run with --commit to apply");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
