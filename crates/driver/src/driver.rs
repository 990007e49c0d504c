//! Build driver entry point
//!
//! Assembles the shared state, spawns one state machine per package,
//! waits for quiescence, and aggregates the outcome. The driver never
//! aborts mid-run: every task runs to its own conclusion and failures
//! surface together at the end.

use crate::config::BuildConfig;
use crate::gate::DependencyGate;
use crate::haddock::HaddockStore;
use crate::latch::Latch;
use crate::state::BuildContext;
use crate::task::PackageTask;
use dashmap::DashMap;
use kiln_errors::{BuildError, Error, Result};
use kiln_events::Event;
use kiln_ledger::Ledger;
use kiln_pkgdb::PackageDb;
use kiln_toolchain::{child_environment, EnvSpec, InstallLayout, ProcessRunner};
use kiln_types::BuildPlan;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;

/// Outcome of a run with no failed packages
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Non-fatal observations, in emission order
    pub warnings: Vec<String>,
}

/// Build every package in the plan
///
/// # Errors
///
/// Returns [`BuildError::BuildsFailed`] carrying the per-package error
/// map and collected warnings when any task failed, or an I/O error if
/// the destination trees cannot be prepared.
pub async fn perform_build(plan: BuildPlan, config: BuildConfig) -> Result<BuildReport> {
    let mut config = config;

    create_dir(&config.install_dest).await?;
    config.install_dest = canonicalize(&config.install_dest).await?;
    // Logs never survive into a new run.
    remove_tree(&config.log_dir).await?;
    create_dir(&config.log_dir).await?;
    config.log_dir = canonicalize(&config.log_dir).await?;
    create_dir(&config.work_dir).await?;
    config.work_dir = canonicalize(&config.work_dir).await?;

    let layout = InstallLayout::new(config.install_dest.clone());
    for dir in [layout.bin_dir(), layout.doc_dir()] {
        create_dir(&dir).await?;
    }

    let db = if config.global_db {
        PackageDb::global()
    } else {
        PackageDb::local(layout.package_db())
    };

    let env = child_environment(
        std::env::vars(),
        &EnvSpec {
            deny: config.env_deny.clone(),
            bin_dir: Some(layout.bin_dir()),
            package_db: db.path().map(Path::to_path_buf),
        },
    );
    let setup_runner = ProcessRunner::new("driver", env.clone(), config.sink.clone());

    db.ensure(&setup_runner).await?;
    let registered = db.registered_packages(&setup_runner).await?;

    if let Some(compiler_docs) = config.compiler_doc_dir.clone() {
        copy_tree(&compiler_docs, &layout.doc_dir()).await?;
    }

    let plan = Arc::new(plan);
    let latches: Arc<HashMap<String, Arc<Latch>>> = Arc::new(
        plan.packages
            .keys()
            .map(|name| (name.clone(), Arc::new(Latch::new())))
            .collect(),
    );
    let gate = DependencyGate::new(Arc::clone(&plan), Arc::clone(&latches), config.tool_missing);

    let sink = config.sink.clone();
    let jobs = config.jobs;
    let ctx = BuildContext {
        ledger: Ledger::new(layout.root()),
        layout,
        db,
        jobs: Arc::new(Semaphore::new(jobs)),
        register_lock: Arc::new(tokio::sync::Mutex::new(())),
        active: Arc::new(AtomicUsize::new(0)),
        errors: Arc::new(DashMap::new()),
        warnings: Arc::new(Mutex::new(Vec::new())),
        haddock: Arc::new(HaddockStore::new()),
        latches,
        gate,
        registered: Arc::new(registered),
        hyperlink_flag: Arc::new(OnceCell::new()),
        child_env: Arc::new(env),
        sink: sink.clone(),
        config: Arc::new(config),
        plan: Arc::clone(&plan),
    };

    sink.emit(Event::BuildStarting {
        packages: plan.packages.len(),
        jobs,
    });

    let mut tasks = JoinSet::new();
    let mut task_names: HashMap<tokio::task::Id, String> = HashMap::new();
    for (name, entry) in &plan.packages {
        let task = PackageTask::new(ctx.clone(), name.clone(), entry.clone());
        let handle = tasks.spawn(task.run());
        task_names.insert(handle.id(), name.clone());
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        if let Err(join_error) = joined {
            // A panicking task still released its latch and counter
            // through guards; record the panic against its package.
            let name = task_names
                .get(&join_error.id())
                .cloned()
                .unwrap_or_else(|| "unknown-package".to_string());
            ctx.errors
                .insert(name, format!("build task panicked: {join_error}"));
        }
    }
    debug_assert_eq!(ctx.active.load(Ordering::SeqCst), 0);

    let warnings = ctx.warnings_snapshot();
    let errors: BTreeMap<String, String> = ctx
        .errors
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    sink.emit(Event::BuildCompleted {
        succeeded: plan.packages.len().saturating_sub(errors.len()),
        failed: errors.len(),
        warnings: warnings.len(),
    });

    if errors.is_empty() {
        Ok(BuildReport { warnings })
    } else {
        Err(BuildError::BuildsFailed { errors, warnings }.into())
    }
}

async fn create_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

async fn canonicalize(path: &Path) -> Result<PathBuf> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

async fn remove_tree(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

/// Copy a directory tree, file by file; symlinks are skipped
async fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    let mut queue = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = queue.pop() {
        create_dir(&to).await?;
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| Error::io_with_path(&e, &from))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_with_path(&e, &from))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| Error::io_with_path(&e, entry.path()))?;
            let target = to.join(entry.file_name());
            if file_type.is_dir() {
                queue.push((entry.path(), target));
            } else if file_type.is_file() {
                tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(|e| Error::io_with_path(&e, entry.path()))?;
            }
        }
    }
    Ok(())
}
