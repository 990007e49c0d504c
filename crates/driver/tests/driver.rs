//! End-to-end driver scenarios against stub external tools
//!
//! The fake `runghc`, `cabal`, and `ghc-pkg` scripts live in the
//! install tree's `bin/`, which the driver prepends to every child's
//! `PATH`. That keeps the real state machine, gate, semaphore, ledger,
//! and environment plumbing in the loop while no Haskell toolchain is
//! required.

#![cfg(unix)]

use kiln_driver::{perform_build, BuildConfig};
use kiln_errors::{BuildError, Error};
use kiln_events::{channel, Event, EventReceiver, EventSink};
use kiln_types::{
    BuildPlan, Component, DepInfo, PackageConstraints, PackageDescription, PackagePlan, TestState,
};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

const FAKE_GHC_PKG: &str = "#!/bin/sh
if [ \"$1\" = init ]; then
  mkdir -p \"$2\"
  : > \"$2/package.cache\"
fi
exit 0
";

const FAKE_CABAL: &str = "#!/bin/sh
if [ \"$1\" = unpack ]; then
  pkg=\"$2\"
  name=\"${pkg%-*}\"
  mkdir -p \"$pkg\"
  printf 'name: %s\\nbuild-type: Simple\\n' \"$name\" > \"$pkg/$name.cabal\"
fi
exit 0
";

// Builds fail for packages named broken-*; `Setup build` also drops a
// trivially passing test binary so the test stage has something to run.
const FAKE_RUNGHC: &str = "#!/bin/sh
while [ $# -gt 0 ] && [ \"$1\" != Setup ]; do shift; done
shift
verb=\"$1\"
if [ \"$verb\" = build ]; then
  case \"$(basename \"$PWD\")\" in
    broken-*) exit 1 ;;
  esac
  mkdir -p dist/build/spec
  printf '#!/bin/sh\\nexit 0\\n' > dist/build/spec/spec
  chmod +x dist/build/spec/spec
fi
exit 0
";

const SLOW_TEST_RUNGHC: &str = "#!/bin/sh
while [ $# -gt 0 ] && [ \"$1\" != Setup ]; do shift; done
shift
if [ \"$1\" = build ]; then
  mkdir -p dist/build/spec
  printf '#!/bin/sh\\nsleep 30\\n' > dist/build/spec/spec
  chmod +x dist/build/spec/spec
fi
exit 0
";

struct Sandbox {
    root: tempfile::TempDir,
}

impl Sandbox {
    fn new(runghc: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("install/bin");
        std::fs::create_dir_all(&bin).unwrap();
        write_tool(&bin, "ghc-pkg", FAKE_GHC_PKG);
        write_tool(&bin, "cabal", FAKE_CABAL);
        write_tool(&bin, "runghc", runghc);
        Self { root }
    }

    fn config(&self, sink: EventSink) -> BuildConfig {
        BuildConfig::new(
            self.root.path().join("install"),
            self.root.path().join("logs"),
        )
        .with_jobs(4)
        .with_haddock(false)
        .with_tests(false)
        .with_benches(false)
        .with_sink(sink)
    }

    fn ledger_entry(&self, stage: &str, id: &str) -> Option<String> {
        std::fs::read_to_string(
            self.root
                .path()
                .join("install/prevres")
                .join(stage)
                .join(id),
        )
        .ok()
    }
}

fn write_tool(bin: &Path, name: &str, body: &str) {
    let path = bin.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn package(version: &str) -> PackagePlan {
    PackagePlan {
        version: version.parse().unwrap(),
        constraints: PackageConstraints::default(),
        description: PackageDescription::default(),
        source_url: None,
    }
}

fn depends_on(plan: &mut PackagePlan, dep: &str) {
    plan.description.dependencies.insert(
        dep.to_string(),
        DepInfo::for_components([Component::Library]),
    );
}

fn drain(rx: &mut EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn commands(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::CommandStarted { command, .. } => Some(command.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn dependent_packages_build_in_order() {
    let sandbox = Sandbox::new(FAKE_RUNGHC);
    let (tx, mut rx) = channel();

    let mut plan = BuildPlan::default();
    plan.packages.insert("apple".to_string(), package("1.0"));
    let mut banana = package("2.0");
    depends_on(&mut banana, "apple");
    plan.packages.insert("banana".to_string(), banana);

    let report = perform_build(plan, sandbox.config(EventSink::new(tx)))
        .await
        .unwrap();
    assert!(report.warnings.is_empty());

    assert_eq!(sandbox.ledger_entry("Build", "apple-1.0").as_deref(), Some("success"));
    assert_eq!(sandbox.ledger_entry("Build", "banana-2.0").as_deref(), Some("success"));

    // banana blocks on apple's library, so apple's register precedes
    // every banana command.
    let commands = commands(&drain(&mut rx));
    let apple_register = commands
        .iter()
        .position(|c| c.ends_with("Setup register"))
        .expect("no register command ran");
    let first_banana = commands
        .iter()
        .position(|c| c.contains("banana"))
        .expect("banana never started");
    assert!(
        apple_register < first_banana,
        "register at {apple_register}, banana at {first_banana}: {commands:?}"
    );
}

#[tokio::test]
async fn failed_dependency_cascades() {
    let sandbox = Sandbox::new(FAKE_RUNGHC);
    let (tx, _rx) = channel();

    let mut plan = BuildPlan::default();
    plan.packages.insert("broken".to_string(), package("1.0"));
    let mut leaf = package("2.0");
    depends_on(&mut leaf, "broken");
    plan.packages.insert("leaf".to_string(), leaf);

    let err = perform_build(plan, sandbox.config(EventSink::new(tx)))
        .await
        .unwrap_err();
    let Error::Build(BuildError::BuildsFailed { errors, .. }) = err else {
        panic!("unexpected error: {err}");
    };

    assert!(errors["broken"].contains("exited with"), "{errors:?}");
    assert!(
        errors["leaf"].contains("dependency broken failed"),
        "{errors:?}"
    );
    assert_eq!(sandbox.ledger_entry("Build", "broken-1.0").as_deref(), Some("failure"));
}

#[tokio::test]
async fn unexpected_test_success_is_a_warning() {
    let sandbox = Sandbox::new(FAKE_RUNGHC);
    let (tx, _rx) = channel();

    let mut plan = BuildPlan::default();
    let mut pkg = package("1.0");
    pkg.constraints.tests = TestState::ExpectFailure;
    pkg.description.test_suite_names.push("spec".to_string());
    plan.packages.insert("flaky".to_string(), pkg);

    let config = sandbox.config(EventSink::new(tx)).with_tests(true);
    let report = perform_build(plan, config).await.unwrap();

    assert_eq!(
        report.warnings,
        vec!["flaky-1.0: unexpected test success".to_string()]
    );
    assert_eq!(sandbox.ledger_entry("Test", "flaky-1.0").as_deref(), Some("success"));
}

#[tokio::test]
async fn skip_build_never_publishes_a_library() {
    let sandbox = Sandbox::new(FAKE_RUNGHC);
    let (tx, _rx) = channel();

    let mut plan = BuildPlan::default();
    let mut skipped = package("1.0");
    skipped.constraints.skip_build = true;
    plan.packages.insert("skipped".to_string(), skipped);
    let mut consumer = package("1.0");
    depends_on(&mut consumer, "skipped");
    plan.packages.insert("consumer".to_string(), consumer);

    let err = perform_build(plan, sandbox.config(EventSink::new(tx)))
        .await
        .unwrap_err();
    let Error::Build(BuildError::BuildsFailed { errors, .. }) = err else {
        panic!("unexpected error: {err}");
    };

    assert!(!errors.contains_key("skipped"), "{errors:?}");
    assert!(
        errors["consumer"].contains("dependency skipped failed"),
        "{errors:?}"
    );
    // No stage ever ran for the skipped package.
    assert_eq!(sandbox.ledger_entry("Build", "skipped-1.0"), None);
}

#[tokio::test]
async fn completed_installs_are_idempotent() {
    let sandbox = Sandbox::new(FAKE_RUNGHC);

    let make_plan = || {
        let mut plan = BuildPlan::default();
        plan.packages.insert("apple".to_string(), package("1.0"));
        let mut banana = package("2.0");
        depends_on(&mut banana, "apple");
        plan.packages.insert("banana".to_string(), banana);
        plan
    };

    let (tx, _rx) = channel();
    perform_build(make_plan(), sandbox.config(EventSink::new(tx)))
        .await
        .unwrap();

    let (tx, mut rx) = channel();
    let report = perform_build(make_plan(), sandbox.config(EventSink::new(tx)))
        .await
        .unwrap();
    assert!(report.warnings.is_empty());

    let second_run_commands = commands(&drain(&mut rx));
    assert!(
        second_run_commands.is_empty(),
        "second run spawned stage commands: {second_run_commands:?}"
    );
}

#[tokio::test]
async fn test_suites_are_killed_at_the_deadline() {
    let sandbox = Sandbox::new(SLOW_TEST_RUNGHC);
    let (tx, _rx) = channel();

    let mut plan = BuildPlan::default();
    let mut pkg = package("1.0");
    pkg.description.test_suite_names.push("spec".to_string());
    plan.packages.insert("sleepy".to_string(), pkg);

    let config = sandbox
        .config(EventSink::new(tx))
        .with_tests(true)
        .with_test_timeout(Duration::from_millis(300));
    let err = perform_build(plan, config).await.unwrap_err();

    let Error::Build(BuildError::BuildsFailed { errors, .. }) = err else {
        panic!("unexpected error: {err}");
    };
    assert!(errors["sleepy"].contains("timed out"), "{errors:?}");
    assert_eq!(sandbox.ledger_entry("Test", "sleepy-1.0").as_deref(), Some("failure"));
}

#[tokio::test]
async fn missing_test_binaries_are_tolerated() {
    let sandbox = Sandbox::new(FAKE_RUNGHC);
    let (tx, _rx) = channel();

    let mut plan = BuildPlan::default();
    let mut pkg = package("1.0");
    pkg.description
        .test_suite_names
        .push("never-built".to_string());
    plan.packages.insert("quiet".to_string(), pkg);

    let config = sandbox.config(EventSink::new(tx)).with_tests(true);
    let report = perform_build(plan, config).await.unwrap();
    assert!(report.warnings.is_empty());
    assert_eq!(sandbox.ledger_entry("Test", "quiet-1.0").as_deref(), Some("success"));

    let log = std::fs::read_to_string(
        sandbox
            .root
            .path()
            .join("logs/quiet-1.0/test.out"),
    )
    .unwrap();
    assert!(log.contains("never-built"), "{log}");
}
