//! Per-package build state machine
//!
//! One task drives a single package through
//! unpack → configure → build/register → haddock → tests → benchmarks.
//! The unpacked source directory and the configure invocation are lazy:
//! a package whose ledger says everything already succeeded spawns no
//! external process at all. Stage failures after the build stage are
//! weighed against the plan's expectations instead of failing the task
//! outright.

use crate::cabal;
use crate::state::{ActiveGuard, BuildContext, ERROR_DISPLAY_LIMIT};
use crate::CABAL_PACKAGE;
use kiln_errors::{BuildError, Error, Result};
use kiln_events::Event;
use kiln_ledger::{should_rerun, StageResult};
use kiln_toolchain::{configure_args, runghc_args, ProcessRunner, StageLog};
use kiln_types::{Component, PackageId, PackagePlan, Stage, TestState};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Publishes `libReady = false` on every abnormal exit path, including
/// panics; a normal publication beforehand makes this a no-op.
struct LatchGuard {
    latch: Option<Arc<crate::latch::Latch>>,
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        if let Some(latch) = &self.latch {
            latch.set(false);
        }
    }
}

/// State machine for one package
pub struct PackageTask {
    ctx: BuildContext,
    name: String,
    id: PackageId,
    plan: PackagePlan,
    runner: ProcessRunner,
    build_log: StageLog,
    test_log: StageLog,
    bench_log: StageLog,
    /// Unpacked source directory, populated on first demand
    unpacked: Option<PathBuf>,
    /// Whether the base `Setup configure` has run
    configured: bool,
}

impl PackageTask {
    /// A task for one plan entry
    #[must_use]
    pub fn new(ctx: BuildContext, name: String, plan: PackagePlan) -> Self {
        let id = plan.package_id(&name);
        let log_root = ctx.config.log_dir.join(id.to_string());
        let runner = ProcessRunner::new(
            name.clone(),
            ctx.child_env.as_ref().clone(),
            ctx.sink.clone(),
        );
        Self {
            ctx,
            name,
            runner,
            build_log: StageLog::new(log_root.join("build.out")),
            test_log: StageLog::new(log_root.join("test.out")),
            bench_log: StageLog::new(log_root.join("bench.out")),
            unpacked: None,
            configured: false,
            id,
            plan,
        }
    }

    /// Run the state machine to completion
    ///
    /// Never returns an error: failures are recorded in the shared
    /// error map and reflected through the package's latch.
    pub async fn run(mut self) {
        let _active = ActiveGuard::new(Arc::clone(&self.ctx.active));
        let _latch_guard = LatchGuard {
            latch: self.ctx.latch(&self.name).cloned(),
        };
        self.ctx.sink.emit(Event::package_starting(&self.id));

        if let Err(error) = self.execute().await {
            let message = error.display_truncated(ERROR_DISPLAY_LIMIT);
            tracing::debug!(package = %self.id, error = %message, "task failed");
            self.ctx.errors.insert(self.name.clone(), message.clone());
            self.ctx.sink.emit(Event::PackageFailed {
                name: self.name.clone(),
                version: self.id.version.clone(),
                error: message,
            });
        }
    }

    async fn execute(&mut self) -> Result<()> {
        if self.name == CABAL_PACKAGE && self.ctx.config.no_rebuild_cabal {
            self.publish_library();
            return Ok(());
        }
        self.build().await?;
        self.haddock().await?;
        self.tests().await?;
        self.benches().await?;
        Ok(())
    }

    fn publish_library(&self) {
        if let Some(latch) = self.ctx.latch(&self.name) {
            if latch.set(true) {
                self.ctx.sink.emit(Event::LibraryRegistered {
                    name: self.name.clone(),
                    version: self.id.version.clone(),
                });
            }
        }
    }

    // ---- unpack ----------------------------------------------------

    async fn unpack(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.unpacked {
            return Ok(dir.clone());
        }

        let work = self.ctx.config.work_dir.join(self.id.to_string());
        match tokio::fs::remove_dir_all(&work).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_with_path(&e, &work)),
        }
        tokio::fs::create_dir_all(&work)
            .await
            .map_err(|e| Error::io_with_path(&e, &work))?;

        if self.name == CABAL_PACKAGE && self.ctx.config.cabal_from_head {
            let url = self.ctx.config.cabal_git_url.clone();
            let args = vec!["clone".to_string(), "--depth=1".to_string(), url];
            self.run_external("git", &args, &work).await?;
        } else if let Some(url) = self.plan.source_url.clone() {
            let Some(fetcher) = self.ctx.config.fetcher.clone() else {
                return Err(Error::internal(format!(
                    "{} pins a source url but no fetcher is configured",
                    self.id
                )));
            };
            let tarball = work.join(format!("{}.tar.gz", self.id));
            fetcher.download(&url, &tarball).await?;
            let args = vec!["xf".to_string(), tarball.display().to_string()];
            self.run_external("tar", &args, &work).await?;
        } else {
            let args = vec!["unpack".to_string(), self.id.to_string()];
            self.run_external("cabal", &args, &work).await?;
        }

        let dir = first_subdirectory(&work)
            .await?
            .ok_or_else(|| BuildError::UnpackFailed {
                package: self.id.to_string(),
            })?;

        let cabal_file = cabal::find_cabal_file(&dir).await?;
        let cabal_text = tokio::fs::read_to_string(&cabal_file)
            .await
            .map_err(|e| Error::io_with_path(&e, &cabal_file))?;

        if cabal::declares_simple_build(&cabal_text) {
            let setup = dir.join("Setup.hs");
            tokio::fs::write(&setup, cabal::DEFAULT_SETUP_HS)
                .await
                .map_err(|e| Error::io_with_path(&e, setup))?;
            let lhs = dir.join("Setup.lhs");
            match tokio::fs::remove_file(&lhs).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io_with_path(&e, lhs)),
            }
        }

        if self.ctx.config.allow_newer {
            let relaxed = cabal::relax_version_bounds(&cabal_text);
            tokio::fs::write(&cabal_file, relaxed)
                .await
                .map_err(|e| Error::io_with_path(&e, &cabal_file))?;
        }

        self.unpacked = Some(dir.clone());
        Ok(dir)
    }

    // ---- configure -------------------------------------------------

    async fn ensure_configured(&mut self) -> Result<()> {
        if self.configured {
            return Ok(());
        }
        self.ctx
            .gate
            .wait(&self.name, &Component::library_set())
            .await?;
        let dir = self.unpack().await?;
        self.run_configure(&dir, Stage::Build, &[]).await?;
        self.configured = true;
        Ok(())
    }

    async fn run_configure(&mut self, dir: &Path, stage: Stage, extra: &[&str]) -> Result<()> {
        let mut verb = vec!["configure".to_string()];
        verb.extend(configure_args(
            &self.ctx.layout,
            &self.id,
            &self.plan.constraints,
            self.ctx.db.path(),
            self.ctx.config.executable_dynamic,
        ));
        if self.ctx.config.verbose {
            verb.push("--verbose".to_string());
        }
        verb.extend(extra.iter().map(|s| (*s).to_string()));
        self.run_setup(dir, stage, &verb).await
    }

    /// Invoke `runghc Setup <verb...>` under a job permit
    async fn run_setup(&mut self, dir: &Path, stage: Stage, verb: &[String]) -> Result<()> {
        let mut args = runghc_args(self.ctx.db.path());
        args.push("Setup".to_string());
        args.extend(verb.iter().cloned());
        self.run_external_staged("runghc", &args, dir, stage).await
    }

    /// Run an external command with output to the build log
    async fn run_external(&mut self, program: &str, args: &[String], dir: &Path) -> Result<()> {
        self.run_external_staged(program, args, dir, Stage::Build)
            .await
    }

    async fn run_external_staged(
        &mut self,
        program: &str,
        args: &[String],
        dir: &Path,
        stage: Stage,
    ) -> Result<()> {
        let permit = self
            .ctx
            .jobs
            .acquire()
            .await
            .map_err(|_| Error::internal("job semaphore closed"))?;
        let log = match stage {
            Stage::Build | Stage::Haddock => &mut self.build_log,
            Stage::Test => &mut self.test_log,
            Stage::Bench => &mut self.bench_log,
        };
        let result = self.runner.run(program, args, dir, log).await;
        drop(permit);
        result
    }

    // ---- build -----------------------------------------------------

    async fn build(&mut self) -> Result<()> {
        if self.plan.constraints.skip_build {
            self.ctx.sink.emit(Event::StageSkipped {
                package: self.id.to_string(),
                stage: Stage::Build,
                reason: "skip-build constraint".to_string(),
            });
            return Ok(());
        }

        let prev = self.ctx.ledger.get(Stage::Build, &self.id).await;
        let lost_registration = prev == StageResult::Success
            && self.plan.description.has_library()
            && !self.ctx.registered.contains(&self.name);
        let need_build = prev != StageResult::Success || lost_registration;

        if need_build {
            if lost_registration {
                self.ctx.warn(format!(
                    "{}: build succeeded previously but its registration is gone; rebuilding",
                    self.id
                ));
            }
            self.ctx.sink.emit(Event::StageStarted {
                package: self.id.to_string(),
                stage: Stage::Build,
            });
            let outcome = self.build_steps().await;
            let success = outcome.is_ok();
            self.ctx.sink.emit(Event::StageCompleted {
                package: self.id.to_string(),
                stage: Stage::Build,
                success,
            });
            match outcome {
                Ok(()) => self.ctx.ledger.put(Stage::Build, &self.id, true).await?,
                Err(e) => {
                    // Best effort: the failure itself is what we report.
                    let _ = self.ctx.ledger.put(Stage::Build, &self.id, false).await;
                    return Err(e);
                }
            }
        }

        // Downstream library consumers proceed from here, in parallel
        // with this package's haddock/test/bench stages.
        self.publish_library();
        Ok(())
    }

    async fn build_steps(&mut self) -> Result<()> {
        self.ctx.ledger.clear_all(&self.id).await?;
        self.ensure_configured().await?;
        let dir = self.unpack().await?;
        self.run_setup(&dir, Stage::Build, &["build".to_string()]).await?;
        self.run_setup(&dir, Stage::Build, &["copy".to_string()]).await?;
        {
            let lock = Arc::clone(&self.ctx.register_lock);
            let _registering = lock.lock().await;
            self.run_setup(&dir, Stage::Build, &["register".to_string()])
                .await?;
        }
        Ok(())
    }

    // ---- haddock ---------------------------------------------------

    async fn haddock(&mut self) -> Result<()> {
        let expected = self.plan.constraints.haddocks;
        let prev = self.ctx.ledger.get(Stage::Haddock, &self.id).await;
        let wanted = self.ctx.config.enable_haddock
            && should_rerun(prev, expected)
            && self.plan.description.has_modules()
            && !self.plan.constraints.skip_build;
        if !wanted {
            return Ok(());
        }

        self.ctx
            .gate
            .wait(&self.name, &Component::library_set())
            .await?;
        self.ensure_configured().await?;
        let dir = self.unpack().await?;

        self.ctx.sink.emit(Event::StageStarted {
            package: self.id.to_string(),
            stage: Stage::Haddock,
        });
        let outcome = self.haddock_steps(&dir).await;
        self.finish_stage(Stage::Haddock, expected, outcome).await
    }

    async fn hyperlink_flag(&self) -> &'static str {
        let runner = &self.runner;
        let jobs = &self.ctx.jobs;
        *self
            .ctx
            .hyperlink_flag
            .get_or_init(|| async {
                let _permit = jobs.acquire().await.ok();
                let probe = runner
                    .run_capture(
                        "haddock",
                        &["--hyperlinked-source".to_string(), "--version".to_string()],
                        None,
                    )
                    .await;
                match probe {
                    Ok(result) if result.success => "--hyperlinked-source",
                    _ => "--hyperlink-source",
                }
            })
            .await
    }

    async fn haddock_steps(&mut self, dir: &Path) -> Result<()> {
        let hyperlink = self.hyperlink_flag().await;
        let mut verb = vec![
            "haddock".to_string(),
            "--html".to_string(),
            format!("--html-location=../{}/", self.id),
            hyperlink.to_string(),
        ];
        if self.ctx.config.build_hoogle {
            verb.push("--hoogle".to_string());
        }
        verb.extend(self.ctx.haddock.interface_args(&self.ctx.plan, &self.id));
        self.run_setup(dir, Stage::Haddock, &verb).await?;

        let html = dir.join("dist").join("doc").join("html").join(&self.name);
        let dest = self.ctx.layout.package_doc_dir(&self.id);
        match tokio::fs::remove_dir_all(&dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_with_path(&e, &dest)),
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(&e, parent))?;
        }
        tokio::fs::rename(&html, &dest)
            .await
            .map_err(|e| Error::io_with_path(&e, &html))?;

        let interface = dest.join(format!("{}.haddock", self.name));
        if let Ok(canonical) = tokio::fs::canonicalize(&interface).await {
            self.ctx.haddock.record_interface(&self.id, canonical);
        }
        Ok(())
    }

    // ---- tests -----------------------------------------------------

    async fn tests(&mut self) -> Result<()> {
        let expected = self.plan.constraints.tests;
        let prev = self.ctx.ledger.get(Stage::Test, &self.id).await;
        let wanted = self.ctx.config.enable_tests
            && should_rerun(prev, expected)
            && !self.plan.constraints.skip_build;
        if !wanted {
            return Ok(());
        }

        // Test suites may pull in packages the library never needed.
        let mut required = Component::library_set();
        required.insert(Component::TestSuite);
        self.ctx.gate.wait(&self.name, &required).await?;
        let dir = self.unpack().await?;

        self.ctx.sink.emit(Event::StageStarted {
            package: self.id.to_string(),
            stage: Stage::Test,
        });
        let outcome = self.test_steps(&dir).await;
        self.finish_stage(Stage::Test, expected, outcome).await
    }

    async fn test_steps(&mut self, dir: &Path) -> Result<()> {
        // The base configure ran without tests enabled.
        self.run_configure(dir, Stage::Test, &["--enable-tests"]).await?;
        self.run_setup(dir, Stage::Test, &["build".to_string()]).await?;

        let suites = self.plan.description.test_suites().to_vec();
        let budget = self.ctx.config.test_timeout;
        for suite in suites {
            let binary = dir.join("dist").join("build").join(&suite).join(&suite);
            if tokio::fs::try_exists(&binary).await.unwrap_or(false) {
                let permit = self
                    .ctx
                    .jobs
                    .acquire()
                    .await
                    .map_err(|_| Error::internal("job semaphore closed"))?;
                let program = binary.display().to_string();
                let result = self
                    .runner
                    .run_with_timeout(&program, &[], dir, &mut self.test_log, budget)
                    .await;
                drop(permit);
                result?;
            } else {
                self.test_log
                    .write_line(&format!("test suite {suite} was not built; skipping"))
                    .await?;
            }
        }
        Ok(())
    }

    // ---- benchmarks ------------------------------------------------

    async fn benches(&mut self) -> Result<()> {
        let expected = self.plan.constraints.benches;
        let prev = self.ctx.ledger.get(Stage::Bench, &self.id).await;
        let wanted = self.ctx.config.enable_benches
            && should_rerun(prev, expected)
            && !self.plan.constraints.skip_build;
        if !wanted {
            return Ok(());
        }

        let mut required = Component::library_set();
        required.insert(Component::Benchmark);
        self.ctx.gate.wait(&self.name, &required).await?;
        let dir = self.unpack().await?;

        self.ctx.sink.emit(Event::StageStarted {
            package: self.id.to_string(),
            stage: Stage::Bench,
        });
        // Benchmarks are built, never executed.
        let outcome = self.bench_steps(&dir).await;
        self.finish_stage(Stage::Bench, expected, outcome).await
    }

    async fn bench_steps(&mut self, dir: &Path) -> Result<()> {
        self.run_configure(dir, Stage::Bench, &["--enable-benchmarks"])
            .await?;
        self.run_setup(dir, Stage::Bench, &["build".to_string()]).await
    }

    // ---- shared stage policy ---------------------------------------

    /// Record the ledger entry and weigh the outcome against the plan's
    /// expectation
    async fn finish_stage(
        &mut self,
        stage: Stage,
        expected: TestState,
        outcome: Result<()>,
    ) -> Result<()> {
        let success = outcome.is_ok();
        self.ctx.sink.emit(Event::StageCompleted {
            package: self.id.to_string(),
            stage,
            success,
        });
        match outcome {
            Ok(()) => {
                self.ctx.ledger.put(stage, &self.id, true).await?;
                if expected == TestState::ExpectFailure {
                    self.ctx.warn(format!(
                        "{}: unexpected {} success",
                        self.id,
                        stage.as_str().to_lowercase()
                    ));
                }
                Ok(())
            }
            Err(error) => {
                let _ = self.ctx.ledger.put(stage, &self.id, false).await;
                if expected == TestState::ExpectSuccess {
                    Err(error)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// First directory entry under `root`, if any
async fn first_subdirectory(root: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| Error::io_with_path(&e, root))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_with_path(&e, root))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| Error::io_with_path(&e, entry.path()))?;
        if file_type.is_dir() {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}
