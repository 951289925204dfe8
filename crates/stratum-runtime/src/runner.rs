//! Migration runner.
//!
//! Reads the recorded version of a namespace, selects the units in range and
//! runs them one at a time, persisting the version after every unit. A failed
//! unit stops the run and leaves the store at the last completed version.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use stratum_core::error::{Result, StratumError};
use stratum_core::migration::{
    AppliedOutcome, AppliedUnit, Direction, MigrationContext, MigrationResult, MigrationStatus,
    Outcome, Target,
};
use stratum_core::version::VersionStore;

use crate::registry::{MigrationRegistry, UnitEntry};

/// Where a run should stop.
#[derive(Debug, Clone, Copy)]
enum Goal {
    Target(Target),
    /// Undo this many applied units, counted once the lock is held.
    Steps(usize),
}

/// Held namespace lock.
///
/// Dropping it without [`LockGuard::release`], as happens when a run is
/// cancelled, releases the lock from a background task.
struct LockGuard {
    store: Arc<dyn VersionStore>,
    namespace: Option<String>,
}

impl LockGuard {
    fn new(store: Arc<dyn VersionStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: Some(namespace.to_string()),
        }
    }

    async fn release(mut self) {
        if let Some(namespace) = &self.namespace {
            if let Err(e) = self.store.unlock(namespace).await {
                warn!(%namespace, error = %e, "Failed to release migration lock");
            }
        }
        self.namespace = None;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(namespace) = self.namespace.take() else {
            return;
        };

        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(%namespace, "Migration run dropped, releasing lock");
                handle.spawn(async move {
                    if let Err(e) = store.unlock(&namespace).await {
                        warn!(%namespace, error = %e, "Failed to release migration lock");
                    }
                });
            }
            Err(_) => {
                error!(%namespace, "Migration run dropped outside a runtime, lock not released");
            }
        }
    }
}

/// Runs registered units against a version store.
#[derive(Clone)]
pub struct MigrationRunner {
    registry: Arc<MigrationRegistry>,
    store: Arc<dyn VersionStore>,
}

impl MigrationRunner {
    pub fn new(registry: Arc<MigrationRegistry>, store: Arc<dyn VersionStore>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn VersionStore {
        self.store.as_ref()
    }

    /// Move a namespace to `target` in the given direction.
    ///
    /// `Err` means nothing ran: the version could not be read, the lock could
    /// not be taken, or the target is invalid. Failures after that point are
    /// reported in [`MigrationResult::error`].
    pub async fn migrate(
        &self,
        namespace: &str,
        ctx: &MigrationContext,
        direction: Direction,
        target: Target,
    ) -> Result<MigrationResult> {
        if direction == Direction::Down && target == Target::Latest {
            return Err(StratumError::InvalidArgument(
                "rolling back requires an explicit target version".to_string(),
            ));
        }

        self.run(namespace, ctx, direction, Goal::Target(target))
            .await
    }

    /// Bring a namespace to its latest registered version.
    pub async fn migrate_latest(
        &self,
        namespace: &str,
        ctx: &MigrationContext,
    ) -> Result<MigrationResult> {
        self.migrate(namespace, ctx, Direction::Up, Target::Latest)
            .await
    }

    /// Undo the last `steps` applied units of a namespace.
    pub async fn rollback(
        &self,
        namespace: &str,
        ctx: &MigrationContext,
        steps: usize,
    ) -> Result<MigrationResult> {
        self.run(namespace, ctx, Direction::Down, Goal::Steps(steps))
            .await
    }

    /// Recorded and registered state of a namespace.
    pub async fn status(&self, namespace: &str) -> Result<MigrationStatus> {
        let current = self.store.get_version(namespace).await?;

        Ok(MigrationStatus {
            namespace: namespace.to_string(),
            current,
            latest: self.registry.latest(namespace),
            applied: self
                .registry
                .applied(namespace, current)
                .iter()
                .map(|u| u.summary())
                .collect(),
            pending: self
                .registry
                .pending(namespace, current, u32::MAX)
                .iter()
                .map(|u| u.summary())
                .collect(),
        })
    }

    async fn run(
        &self,
        namespace: &str,
        ctx: &MigrationContext,
        direction: Direction,
        goal: Goal,
    ) -> Result<MigrationResult> {
        self.store.lock(namespace).await?;
        let guard = LockGuard::new(self.store.clone(), namespace);

        let result = self.run_locked(namespace, ctx, direction, goal).await;

        // Always release the lock, even on error
        guard.release().await;

        result
    }

    async fn run_locked(
        &self,
        namespace: &str,
        ctx: &MigrationContext,
        direction: Direction,
        goal: Goal,
    ) -> Result<MigrationResult> {
        // Read under the lock so a step count always counts from the latest state
        let current = self.store.get_version(namespace).await?;
        let mut result = MigrationResult::new(namespace, direction, current);

        let target = match goal {
            Goal::Target(target) => target,
            Goal::Steps(steps) => Target::Version(self.steps_back(namespace, current, steps)),
        };

        let plan = match (direction, target) {
            (Direction::Up, Target::Latest) => {
                let latest = self.registry.latest(namespace).unwrap_or(0);
                self.registry.pending(namespace, current, latest)
            }
            (Direction::Up, Target::Version(v)) => self.registry.pending(namespace, current, v),
            (Direction::Down, Target::Version(v)) => {
                self.registry.rollback_plan(namespace, current, v)
            }
            (Direction::Down, Target::Latest) => {
                return Err(StratumError::InvalidArgument(
                    "rolling back requires an explicit target version".to_string(),
                ))
            }
        };

        if plan.is_empty() {
            debug!(namespace, version = current, %direction, "Nothing to migrate");
            return Ok(result);
        }

        if direction == Direction::Down {
            if let Some(blocking) = plan.iter().find(|u| !u.info.reversible) {
                warn!(
                    namespace,
                    version = blocking.version(),
                    description = %blocking.info.description,
                    "Rollback blocked by irreversible migration"
                );
                result.error = Some(blocking.info.irreversible_error());
                return Ok(result);
            }
        }

        info!(
            namespace,
            %direction,
            from = current,
            units = plan.len(),
            "Starting migration run"
        );

        for entry in plan {
            if let Err(e) = self.run_unit(namespace, ctx, direction, &entry, &mut result).await {
                result.error = Some(e);
                break;
            }
        }

        if result.is_success() {
            info!(
                namespace,
                %direction,
                from = result.initial_version,
                to = result.final_version,
                "Migration run completed"
            );
        }

        Ok(result)
    }

    /// Version reached after undoing `steps` applied units.
    fn steps_back(&self, namespace: &str, current: u32, steps: usize) -> u32 {
        let applied = self.registry.applied(namespace, current);
        let target = if steps >= applied.len() {
            0
        } else {
            applied[applied.len() - steps - 1].version()
        };
        target.min(current)
    }

    async fn run_unit(
        &self,
        namespace: &str,
        ctx: &MigrationContext,
        direction: Direction,
        entry: &UnitEntry,
        result: &mut MigrationResult,
    ) -> Result<()> {
        let version = entry.version();
        let description = &entry.info.description;
        info!(namespace, version, %description, %direction, "Running migration");

        let started = Instant::now();
        let outcome = match direction {
            Direction::Up => entry.unit.apply(ctx).await,
            Direction::Down => entry.unit.unapply(ctx).await,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, warnings) = match outcome {
            Outcome::Success(warnings) => (AppliedOutcome::Success, warnings),
            Outcome::Skipped(reason) => {
                info!(namespace, version, %reason, "Migration skipped");
                (AppliedOutcome::Skipped { reason }, Vec::new())
            }
            Outcome::Failed(refusal @ StratumError::Irreversible { .. }) => {
                warn!(namespace, version, %description, "Migration refused to revert");
                return Err(refusal);
            }
            Outcome::Failed(cause) => {
                error!(namespace, version, %description, error = %cause, "Migration failed");
                return Err(StratumError::UnitExecution {
                    namespace: namespace.to_string(),
                    version,
                    description: description.clone(),
                    cause: Box::new(cause),
                });
            }
        };

        for warning in &warnings {
            warn!(
                namespace,
                version,
                record = %warning.record,
                "Record skipped: {}",
                warning.message
            );
        }

        let new_version = match direction {
            Direction::Up => version,
            Direction::Down => self.registry.previous_version(namespace, version),
        };

        if let Err(e) = self.store.set_version(namespace, new_version).await {
            error!(namespace, version = new_version, error = %e, "Failed to record version");
            return Err(StratumError::VersionStore(format!(
                "{} v{} ({}) completed but version {} could not be recorded: {}",
                namespace, version, description, new_version, e
            )));
        }

        result.final_version = new_version;
        result.applied.push(AppliedUnit {
            version,
            description: description.clone(),
            outcome,
            warnings,
            duration_ms,
        });

        debug!(namespace, version = new_version, duration_ms, "Recorded version");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use futures::future::BoxFuture;
    use stratum_core::migration::{MigrationUnit, RecordWarning, UnitInfo};
    use stratum_core::version::VersionRecord;

    use super::*;
    use crate::version_store::MemoryVersionStore;

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Skip,
        Fail,
    }

    struct ScriptedUnit {
        info: UnitInfo,
        behavior: Behavior,
        log: Log,
    }

    impl MigrationUnit for ScriptedUnit {
        fn info(&self) -> UnitInfo {
            self.info.clone()
        }

        fn apply<'a>(&'a self, _ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                self.log
                    .lock()
                    .unwrap()
                    .push(format!("apply {}", self.info.version));
                match self.behavior {
                    Behavior::Succeed => Outcome::success(),
                    Behavior::Skip => Outcome::skipped("already in place"),
                    Behavior::Fail => {
                        Outcome::failed(StratumError::Database("relation already exists".into()))
                    }
                }
            })
        }

        fn unapply<'a>(&'a self, _ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                self.log
                    .lock()
                    .unwrap()
                    .push(format!("unapply {}", self.info.version));
                Outcome::success()
            })
        }
    }

    /// Processes ten records; record 4 always fails.
    struct BulkUnit {
        processed: Arc<AtomicUsize>,
    }

    impl MigrationUnit for BulkUnit {
        fn info(&self) -> UnitInfo {
            UnitInfo::new("bulk", 1, "touch ten records")
        }

        fn apply<'a>(&'a self, _ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                let mut warnings = Vec::new();
                for record in 1..=10 {
                    if record == 4 {
                        warnings.push(RecordWarning::new(
                            format!("record-{}", record),
                            "constraint violation",
                        ));
                        continue;
                    }
                    self.processed.fetch_add(1, Ordering::SeqCst);
                }
                Outcome::with_warnings(warnings)
            })
        }
    }

    struct Fixture {
        registry: MigrationRegistry,
        log: Log,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: MigrationRegistry::new(),
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn unit(mut self, namespace: &str, version: u32, behavior: Behavior) -> Self {
            self.add(UnitInfo::new(namespace, version, format!("unit {}", version)), behavior);
            self
        }

        fn irreversible(mut self, namespace: &str, version: u32) -> Self {
            self.add(
                UnitInfo::new(namespace, version, format!("unit {}", version)).irreversible(),
                Behavior::Succeed,
            );
            self
        }

        fn add(&mut self, info: UnitInfo, behavior: Behavior) {
            self.registry
                .register(Arc::new(ScriptedUnit {
                    info,
                    behavior,
                    log: self.log.clone(),
                }))
                .unwrap();
        }

        fn runner(self, store: MemoryVersionStore) -> (MigrationRunner, Log) {
            (
                MigrationRunner::new(Arc::new(self.registry), Arc::new(store)),
                self.log,
            )
        }
    }

    fn logged(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn ctx() -> MigrationContext {
        MigrationContext::bare()
    }

    #[tokio::test]
    async fn test_up_applies_in_ascending_order() {
        let (runner, log) = Fixture::new()
            .unit("directory", 3, Behavior::Succeed)
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Succeed)
            .runner(MemoryVersionStore::new());

        let result = runner.migrate_latest("directory", &ctx()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.initial_version, 0);
        assert_eq!(result.final_version, 3);
        assert_eq!(
            result.applied.iter().map(|u| u.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(logged(&log), vec!["apply 1", "apply 2", "apply 3"]);
        assert_eq!(runner.store().get_version("directory").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_second_run_is_a_noop() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Succeed)
            .runner(MemoryVersionStore::new());

        let first = runner.migrate_latest("directory", &ctx()).await.unwrap();
        let second = runner.migrate_latest("directory", &ctx()).await.unwrap();

        assert_eq!(first.final_version, 2);
        assert!(second.is_success());
        assert!(second.applied.is_empty());
        assert!(!second.changed());
        assert_eq!(second.final_version, 2);
        assert_eq!(logged(&log).len(), 2);
    }

    #[tokio::test]
    async fn test_halts_on_failure() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Fail)
            .unit("directory", 3, Behavior::Succeed)
            .runner(MemoryVersionStore::new());

        let result = runner.migrate_latest("directory", &ctx()).await.unwrap();

        assert_eq!(result.final_version, 1);
        assert_eq!(result.applied.len(), 1);
        assert_eq!(logged(&log), vec!["apply 1", "apply 2"]);
        assert_eq!(runner.store().get_version("directory").await.unwrap(), 1);

        let err = result.into_result().unwrap_err();
        match err {
            StratumError::UnitExecution {
                namespace,
                version,
                description,
                cause,
            } => {
                assert_eq!(namespace, "directory");
                assert_eq!(version, 2);
                assert_eq!(description, "unit 2");
                assert!(cause.to_string().contains("relation already exists"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_retry_reruns_failed_unit() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Fail)
            .runner(MemoryVersionStore::new());

        let _ = runner.migrate_latest("directory", &ctx()).await.unwrap();
        let retry = runner.migrate_latest("directory", &ctx()).await.unwrap();

        assert_eq!(retry.initial_version, 1);
        assert_eq!(retry.final_version, 1);
        assert_eq!(retry.error.and_then(|e| e.blocking_version()), Some(2));
        assert_eq!(logged(&log), vec!["apply 1", "apply 2", "apply 2"]);
    }

    #[tokio::test]
    async fn test_skipped_unit_still_advances() {
        let (runner, _) = Fixture::new()
            .unit("indexing", 1, Behavior::Skip)
            .unit("indexing", 2, Behavior::Succeed)
            .runner(MemoryVersionStore::new());

        let result = runner.migrate_latest("indexing", &ctx()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.final_version, 2);
        assert_eq!(
            result.applied[0].outcome,
            AppliedOutcome::Skipped {
                reason: "already in place".into()
            }
        );
        assert_eq!(result.applied[1].outcome, AppliedOutcome::Success);
    }

    #[tokio::test]
    async fn test_up_to_explicit_target_with_gaps() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 4, Behavior::Succeed)
            .unit("directory", 9, Behavior::Succeed)
            .runner(MemoryVersionStore::new());

        let result = runner
            .migrate("directory", &ctx(), Direction::Up, Target::Version(5))
            .await
            .unwrap();

        assert_eq!(result.final_version, 4);
        assert_eq!(logged(&log), vec!["apply 1", "apply 4"]);
    }

    #[tokio::test]
    async fn test_up_below_current_is_noop() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Succeed)
            .runner(MemoryVersionStore::with_versions([("directory", 2)]));

        let result = runner
            .migrate("directory", &ctx(), Direction::Up, Target::Version(1))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.final_version, 2);
        assert!(logged(&log).is_empty());
    }

    #[tokio::test]
    async fn test_down_steps_through_registered_versions() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 3, Behavior::Succeed)
            .unit("directory", 7, Behavior::Succeed)
            .runner(MemoryVersionStore::with_versions([("directory", 7)]));

        let result = runner
            .migrate("directory", &ctx(), Direction::Down, Target::Version(1))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.final_version, 1);
        assert_eq!(logged(&log), vec!["unapply 7", "unapply 3"]);
        assert_eq!(runner.store().get_version("directory").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_steps() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Succeed)
            .unit("directory", 3, Behavior::Succeed)
            .runner(MemoryVersionStore::with_versions([("directory", 3)]));

        let one = runner.rollback("directory", &ctx(), 1).await.unwrap();
        assert_eq!(one.final_version, 2);

        let all = runner.rollback("directory", &ctx(), 10).await.unwrap();
        assert_eq!(all.final_version, 0);
        assert_eq!(logged(&log), vec!["unapply 3", "unapply 2", "unapply 1"]);

        let none = runner.rollback("directory", &ctx(), 1).await.unwrap();
        assert!(none.applied.is_empty());
    }

    #[tokio::test]
    async fn test_irreversible_unit_blocks_rollback() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .irreversible("directory", 2)
            .unit("directory", 3, Behavior::Succeed)
            .runner(MemoryVersionStore::with_versions([("directory", 3)]));

        let result = runner
            .migrate("directory", &ctx(), Direction::Down, Target::Version(0))
            .await
            .unwrap();

        assert_eq!(result.final_version, 3);
        assert!(result.applied.is_empty());
        assert!(logged(&log).is_empty());
        assert_eq!(runner.store().get_version("directory").await.unwrap(), 3);
        assert!(matches!(
            result.error,
            Some(StratumError::Irreversible { version: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_rollback_above_irreversible_unit_is_allowed() {
        let (runner, log) = Fixture::new()
            .irreversible("directory", 1)
            .unit("directory", 2, Behavior::Succeed)
            .runner(MemoryVersionStore::with_versions([("directory", 2)]));

        let result = runner.rollback("directory", &ctx(), 1).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.final_version, 1);
        assert_eq!(logged(&log), vec!["unapply 2"]);
    }

    /// Implements `apply` only.
    struct ForwardOnly;

    impl MigrationUnit for ForwardOnly {
        fn info(&self) -> UnitInfo {
            UnitInfo::new("directory", 1, "forward only")
        }

        fn apply<'a>(&'a self, _ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
            Box::pin(async { Outcome::success() })
        }
    }

    #[tokio::test]
    async fn test_unit_without_unapply_is_not_rolled_back() {
        let mut registry = MigrationRegistry::new();
        registry.register(Arc::new(ForwardOnly)).unwrap();
        let runner = MigrationRunner::new(
            Arc::new(registry),
            Arc::new(MemoryVersionStore::with_versions([("directory", 1)])),
        );

        let result = runner
            .migrate("directory", &ctx(), Direction::Down, Target::Version(0))
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.final_version, 1);
        assert!(result.applied.is_empty());
        assert!(matches!(
            result.error,
            Some(StratumError::Irreversible { version: 1, .. })
        ));
        assert_eq!(runner.store().get_version("directory").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_down_to_latest_is_rejected() {
        let (runner, _) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .runner(MemoryVersionStore::new());

        let err = runner
            .migrate("directory", &ctx(), Direction::Down, Target::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, StratumError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_empty_namespace() {
        let (runner, _) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .runner(MemoryVersionStore::with_versions([("openchange", 4)]));

        let result = runner.migrate_latest("openchange", &ctx()).await.unwrap();

        assert!(result.is_success());
        assert!(result.applied.is_empty());
        assert_eq!(result.initial_version, 4);
        assert_eq!(result.final_version, 4);
    }

    #[tokio::test]
    async fn test_namespaces_do_not_share_versions() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("indexing", 1, Behavior::Succeed)
            .unit("indexing", 2, Behavior::Succeed)
            .runner(MemoryVersionStore::new());

        let _ = runner.migrate_latest("indexing", &ctx()).await.unwrap();

        assert_eq!(runner.store().get_version("indexing").await.unwrap(), 2);
        assert_eq!(runner.store().get_version("directory").await.unwrap(), 0);
        assert_eq!(logged(&log), vec!["apply 1", "apply 2"]);
    }

    #[tokio::test]
    async fn test_record_failures_do_not_fail_the_unit() {
        let processed = Arc::new(AtomicUsize::new(0));
        let mut registry = MigrationRegistry::new();
        registry
            .register(Arc::new(BulkUnit {
                processed: processed.clone(),
            }))
            .unwrap();
        let runner = MigrationRunner::new(Arc::new(registry), Arc::new(MemoryVersionStore::new()));

        let result = runner.migrate_latest("bulk", &ctx()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.final_version, 1);
        assert_eq!(processed.load(Ordering::SeqCst), 9);
        let warnings: Vec<_> = result.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].record, "record-4");
    }

    #[tokio::test]
    async fn test_status() {
        let (runner, _) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .irreversible("directory", 2)
            .unit("directory", 5, Behavior::Succeed)
            .runner(MemoryVersionStore::with_versions([("directory", 2)]));

        let status = runner.status("directory").await.unwrap();

        assert_eq!(status.current, 2);
        assert_eq!(status.latest, Some(5));
        assert_eq!(status.applied.len(), 2);
        assert!(!status.applied[1].reversible);
        assert_eq!(status.pending.len(), 1);
        assert_eq!(status.pending[0].version, 5);
        assert!(!status.is_up_to_date());
    }

    /// Counts lock calls and fails writes above a version.
    struct FlakyStore {
        inner: MemoryVersionStore,
        fail_above: u32,
        locks: AtomicUsize,
        unlocks: AtomicUsize,
    }

    impl VersionStore for FlakyStore {
        fn get_version<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<u32>> {
            self.inner.get_version(namespace)
        }

        fn set_version<'a>(&'a self, namespace: &'a str, version: u32) -> BoxFuture<'a, Result<()>> {
            if version > self.fail_above {
                return Box::pin(async { Err(StratumError::VersionStore("disk full".into())) });
            }
            self.inner.set_version(namespace, version)
        }

        fn records(&self) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
            self.inner.records()
        }

        fn lock<'a>(&'a self, _namespace: &'a str) -> BoxFuture<'a, Result<()>> {
            self.locks.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }

        fn unlock<'a>(&'a self, _namespace: &'a str) -> BoxFuture<'a, Result<()>> {
            self.unlocks.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn test_version_write_failure_stops_run_and_releases_lock() {
        let fixture = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Succeed)
            .unit("directory", 3, Behavior::Succeed);
        let log = fixture.log.clone();
        let store = Arc::new(FlakyStore {
            inner: MemoryVersionStore::new(),
            fail_above: 1,
            locks: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
        });
        let runner = MigrationRunner::new(Arc::new(fixture.registry), store.clone());

        let result = runner.migrate_latest("directory", &ctx()).await.unwrap();

        assert_eq!(result.final_version, 1);
        assert_eq!(result.applied.len(), 1);
        assert!(matches!(result.error, Some(StratumError::VersionStore(_))));
        assert_eq!(logged(&log), vec!["apply 1", "apply 2"]);
        assert_eq!(store.inner.get_version("directory").await.unwrap(), 1);
        assert_eq!(store.locks.load(Ordering::SeqCst), 1);
        assert_eq!(store.unlocks.load(Ordering::SeqCst), 1);
    }

    /// Another process finishes a run while this one waits for the lock.
    struct RacingStore {
        inner: MemoryVersionStore,
        version_at_lock: u32,
    }

    impl VersionStore for RacingStore {
        fn get_version<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<u32>> {
            self.inner.get_version(namespace)
        }

        fn set_version<'a>(&'a self, namespace: &'a str, version: u32) -> BoxFuture<'a, Result<()>> {
            self.inner.set_version(namespace, version)
        }

        fn records(&self) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
            self.inner.records()
        }

        fn lock<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, Result<()>> {
            self.inner.set_version(namespace, self.version_at_lock)
        }
    }

    #[tokio::test]
    async fn test_rollback_counts_steps_from_state_under_lock() {
        let (runner, log) = Fixture::new()
            .unit("directory", 1, Behavior::Succeed)
            .unit("directory", 2, Behavior::Succeed)
            .unit("directory", 3, Behavior::Succeed)
            .runner(MemoryVersionStore::new());
        let store = Arc::new(RacingStore {
            inner: MemoryVersionStore::with_versions([("directory", 1)]),
            version_at_lock: 3,
        });
        let runner = MigrationRunner::new(runner.registry.clone(), store.clone());

        let result = runner.rollback("directory", &ctx(), 1).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.initial_version, 3);
        assert_eq!(result.final_version, 2);
        assert_eq!(logged(&log), vec!["unapply 3"]);
        assert_eq!(store.inner.get_version("directory").await.unwrap(), 2);
    }

    /// Never completes.
    struct Hanging;

    impl MigrationUnit for Hanging {
        fn info(&self) -> UnitInfo {
            UnitInfo::new("directory", 1, "hangs")
        }

        fn apply<'a>(&'a self, _ctx: &'a MigrationContext) -> BoxFuture<'a, Outcome> {
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_releases_lock() {
        let mut registry = MigrationRegistry::new();
        registry.register(Arc::new(Hanging)).unwrap();
        let store = Arc::new(FlakyStore {
            inner: MemoryVersionStore::new(),
            fail_above: u32::MAX,
            locks: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
        });
        let runner = MigrationRunner::new(Arc::new(registry), store.clone());

        let context = ctx();
        let run = runner.migrate_latest("directory", &context);
        let timed_out = tokio::time::timeout(Duration::from_millis(20), run).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.locks.load(Ordering::SeqCst), 1);
        assert_eq!(store.unlocks.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.get_version("directory").await.unwrap(), 0);
    }
}
