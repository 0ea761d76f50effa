//! Process group supervisor.
//!
//! The supervisor owns an arena of nodes indexed by [`HandleId`]. A node is
//! either a process (backed by a worker task) or a group (an ordered list of
//! child handles in start order). Callers only ever hold handles.
//!
//! Starting follows the group mode: ordered groups start members one after
//! another, parallel groups start them all at once and fail on the first
//! failure. Either way a failed start unwinds every started member before the
//! error reaches the caller.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::SupervisorConfig;
use crate::descriptor::ProcessDescriptor;
use crate::error::{ExitErrors, Result, SupervisorError};
use crate::group::{GroupMode, Member};
use crate::types::{HandleId, ProcessSnapshot, Signal};
use crate::worker::{self, WorkerHandle};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// =============================================================================
// Arena
// =============================================================================

#[derive(Debug, Clone)]
struct GroupNode {
    name: String,
    mode: GroupMode,
    children: Vec<HandleId>,
    unwind_signal: Signal,
}

#[derive(Debug, Clone)]
enum Node {
    Process(WorkerHandle),
    Group(GroupNode),
}

#[derive(Debug, Default)]
struct Arena {
    nodes: HashMap<HandleId, Node>,
    /// Every process ever launched, in launch order.
    launched: Vec<HandleId>,
    /// Successfully invoked top-level handles, in invocation order.
    roots: Vec<HandleId>,
}

/// How one member's start ended.
enum Outcome {
    Ready(HandleId),
    Cancelled(HandleId),
    Failed(HandleId, SupervisorError),
}

impl Outcome {
    const fn id(&self) -> HandleId {
        match self {
            Self::Ready(id) | Self::Cancelled(id) | Self::Failed(id, _) => *id,
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Process group supervisor.
///
/// Cheap to clone; clones share the same arena.
#[derive(Debug, Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: SupervisorConfig,
    arena: Mutex<Arena>,
}

impl Supervisor {
    /// Creates a supervisor with the given configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                arena: Mutex::new(Arena::default()),
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Launches a descriptor or group and waits until it is ready.
    ///
    /// On failure every process launched for `member` has exited before the
    /// error is returned, and the first failure is the one reported.
    ///
    /// # Errors
    /// Returns `InvalidDescriptor` if validation fails, otherwise the first
    /// member failure (`Spawn`, `ReadinessTimeout` or `UnexpectedExit`).
    pub async fn invoke(&self, member: impl Into<Member>) -> Result<HandleId> {
        let member = member.into();
        member.validate()?;

        let name = member.name().to_string();
        tracing::info!(member = %name, processes = member.process_count(), "invoking");

        // Held for the duration of the start; top-level invokes are never cancelled.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let unwind = self.inner.config.unwind_signal;
        match self.start_member(member, unwind, cancel_rx).await {
            Outcome::Ready(id) => {
                self.inner.arena.lock().roots.push(id);
                tracing::info!(member = %name, handle = %id, "ready");
                Ok(id)
            }
            Outcome::Failed(_, err) => {
                tracing::warn!(member = %name, error = %err, "invoke failed");
                Err(err)
            }
            Outcome::Cancelled(id) => Err(SupervisorError::invalid(format!(
                "{name}: start of {id} was cancelled"
            ))),
        }
    }

    /// Delivers `signal` to every live process under `handle`, depth-first in
    /// reverse start order. Processes that already exited are skipped.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown handles, or the first delivery failure
    /// after attempting every process.
    pub async fn signal(&self, handle: HandleId, signal: Signal) -> Result<()> {
        let targets = self.processes_reversed(handle)?;
        let mut first_err = None;
        for worker in targets {
            if worker.snapshot().state.is_terminal() {
                continue;
            }
            if let Err(e) = worker.signal(signal).await {
                tracing::warn!(
                    process = %worker.name(),
                    signal = ?signal,
                    error = %e,
                    "signal failed"
                );
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Waits until every process under `handle` is terminal.
    ///
    /// # Errors
    /// Returns every individual exit error: unexpected exits, readiness and
    /// spawn failures, bad shutdowns and processes never reaped.
    pub async fn wait(&self, handle: HandleId) -> std::result::Result<(), ExitErrors> {
        let targets = self.processes_reversed(handle)?;
        let mut errors = ExitErrors::new();
        for worker in targets.iter().rev() {
            let snap = worker.wait_exit().await;
            if let Some(err) = worker::failure_error(&snap) {
                errors.push(err);
            }
        }
        errors.into_result()
    }

    /// Stops everything under `handle` with `signal`.
    ///
    /// Ordered groups stop one member at a time in reverse start order;
    /// parallel groups stop all members concurrently. A process still alive
    /// after the stop timeout is killed.
    ///
    /// # Errors
    /// Returns every exit error collected on the way; one failing member
    /// never prevents the others from being stopped.
    pub async fn stop(
        &self,
        handle: HandleId,
        signal: Signal,
    ) -> std::result::Result<(), ExitErrors> {
        if !self.inner.arena.lock().nodes.contains_key(&handle) {
            return Err(SupervisorError::NotFound(handle).into());
        }
        self.stop_node(handle, signal).await.into_result()
    }

    /// Stops every top-level handle in reverse invocation order, each with its
    /// own unwind signal.
    ///
    /// # Errors
    /// Returns every exit error from every handle.
    pub async fn shutdown_all(&self) -> std::result::Result<(), ExitErrors> {
        let roots = std::mem::take(&mut self.inner.arena.lock().roots);
        tracing::info!(count = roots.len(), "shutting down all handles");
        let mut errors = ExitErrors::new();
        for id in roots.into_iter().rev() {
            let signal = self.unwind_signal_of(id);
            errors.extend(self.stop_node(id, signal).await);
        }
        if !errors.is_empty() {
            tracing::warn!(errors = errors.len(), "shutdown completed with errors");
        }
        errors.into_result()
    }

    /// Returns the snapshot of a single process.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown handles and `NotAProcess` for groups.
    pub fn snapshot(&self, handle: HandleId) -> Result<ProcessSnapshot> {
        self.worker(handle).map(|w| w.snapshot())
    }

    /// Returns snapshots of every process under `handle`, in start order.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown handles.
    pub fn snapshots(&self, handle: HandleId) -> Result<Vec<ProcessSnapshot>> {
        let mut workers = self.processes_reversed(handle)?;
        workers.reverse();
        Ok(workers.iter().map(WorkerHandle::snapshot).collect())
    }

    /// Returns the exit code of a process, if it exited with one.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown handles and `NotAProcess` for groups.
    pub fn exit_code(&self, handle: HandleId) -> Result<Option<i32>> {
        Ok(self.snapshot(handle)?.exit.and_then(|e| e.code()))
    }

    /// Returns the current output tail of a process.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown handles and `NotAProcess` for groups.
    pub async fn output(&self, handle: HandleId) -> Result<Vec<String>> {
        let worker = self.worker(handle)?;
        Ok(worker.output().await)
    }

    /// Returns the successfully invoked top-level handles, in invocation order.
    #[must_use]
    pub fn handles(&self) -> Vec<HandleId> {
        self.inner.arena.lock().roots.clone()
    }

    /// Returns snapshots of every process ever launched, in launch order,
    /// including those launched by failed invokes.
    #[must_use]
    pub fn processes(&self) -> Vec<ProcessSnapshot> {
        let arena = self.inner.arena.lock();
        arena
            .launched
            .iter()
            .filter_map(|id| match arena.nodes.get(id) {
                Some(Node::Process(w)) => Some(w.snapshot()),
                _ => None,
            })
            .collect()
    }

    /// Finds the first launched process with the given name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<HandleId> {
        let arena = self.inner.arena.lock();
        arena.launched.iter().copied().find(|id| {
            matches!(arena.nodes.get(id), Some(Node::Process(w)) if w.name() == name)
        })
    }

    // =========================================================================
    // Start
    // =========================================================================

    fn start_member(
        &self,
        member: Member,
        unwind: Signal,
        cancel: watch::Receiver<bool>,
    ) -> BoxFuture<'_, Outcome> {
        Box::pin(async move {
            match member {
                Member::Process(desc) => self.start_process(desc, cancel).await,
                Member::Group(group) => {
                    let (name, mode, members, own_unwind) = group.into_parts();
                    let unwind = own_unwind.unwrap_or(unwind);
                    let id = HandleId::new();
                    self.insert(
                        id,
                        Node::Group(GroupNode {
                            name: name.clone(),
                            mode,
                            children: Vec::with_capacity(members.len()),
                            unwind_signal: unwind,
                        }),
                    );
                    tracing::debug!(group = %name, mode = %mode, handle = %id, "starting group");
                    match mode {
                        GroupMode::Ordered => {
                            self.start_ordered(id, &name, members, unwind, cancel).await
                        }
                        GroupMode::Parallel => {
                            self.start_parallel(id, &name, members, unwind, cancel).await
                        }
                    }
                }
            }
        })
    }

    async fn start_process(
        &self,
        desc: ProcessDescriptor,
        mut cancel: watch::Receiver<bool>,
    ) -> Outcome {
        let id = HandleId::new();
        let handle = worker::spawn(id, desc, &self.inner.config);
        {
            let mut arena = self.inner.arena.lock();
            arena.nodes.insert(id, Node::Process(handle.clone()));
            arena.launched.push(id);
        }

        let result = tokio::select! {
            r = handle.wait_ready() => r,
            () = cancelled(&mut cancel) => return Outcome::Cancelled(id),
        };
        match result {
            Ok(()) => Outcome::Ready(id),
            Err(err) => {
                // The worker kills on readiness timeout; wait for the reap.
                handle.wait_exit().await;
                Outcome::Failed(id, err)
            }
        }
    }

    async fn start_ordered(
        &self,
        id: HandleId,
        name: &str,
        members: Vec<Member>,
        unwind: Signal,
        cancel: watch::Receiver<bool>,
    ) -> Outcome {
        let mut failure = None;
        let mut was_cancelled = false;
        for member in members {
            if *cancel.borrow() {
                was_cancelled = true;
                break;
            }
            let outcome = self.start_member(member, unwind, cancel.clone()).await;
            self.push_child(id, outcome.id());
            match outcome {
                Outcome::Ready(_) => {}
                Outcome::Cancelled(_) => {
                    was_cancelled = true;
                    break;
                }
                Outcome::Failed(_, err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        match failure {
            Some(err) => {
                tracing::warn!(
                    group = %name,
                    error = %err,
                    signal = ?unwind,
                    "start failed, unwinding"
                );
                self.unwind(id, unwind).await;
                Outcome::Failed(id, err)
            }
            None if was_cancelled => Outcome::Cancelled(id),
            None => Outcome::Ready(id),
        }
    }

    async fn start_parallel(
        &self,
        id: HandleId,
        name: &str,
        members: Vec<Member>,
        unwind: Signal,
        mut cancel: watch::Receiver<bool>,
    ) -> Outcome {
        let (child_cancel, child_cancel_rx) = watch::channel(false);
        let mut set = JoinSet::new();
        for member in members {
            let sup = self.clone();
            let rx = child_cancel_rx.clone();
            set.spawn(async move { sup.start_member(member, unwind, rx).await });
        }

        let mut failure: Option<SupervisorError> = None;
        let mut was_cancelled = false;
        loop {
            let joined = tokio::select! {
                joined = set.join_next() => joined,
                () = cancelled(&mut cancel), if !was_cancelled && failure.is_none() => {
                    was_cancelled = true;
                    child_cancel.send_replace(true);
                    continue;
                }
            };
            let Some(joined) = joined else { break };
            match joined {
                Ok(outcome) => {
                    self.push_child(id, outcome.id());
                    if let Outcome::Failed(_, err) = outcome {
                        if failure.is_none() {
                            child_cancel.send_replace(true);
                            failure = Some(err);
                        }
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        child_cancel.send_replace(true);
                        failure = Some(SupervisorError::spawn(
                            name,
                            format!("start task failed: {e}"),
                        ));
                    }
                }
            }
        }

        match failure {
            Some(err) => {
                tracing::warn!(
                    group = %name,
                    error = %err,
                    signal = ?unwind,
                    "start failed, unwinding"
                );
                self.unwind(id, unwind).await;
                Outcome::Failed(id, err)
            }
            None if was_cancelled => Outcome::Cancelled(id),
            None => Outcome::Ready(id),
        }
    }

    /// Stops a partially started group; errors are logged, the start failure
    /// is what the caller sees.
    async fn unwind(&self, id: HandleId, signal: Signal) {
        let errors = self.stop_node(id, signal).await;
        for err in errors.errors() {
            tracing::debug!(handle = %id, error = %err, "unwind");
        }
    }

    // =========================================================================
    // Stop
    // =========================================================================

    fn stop_node(&self, id: HandleId, signal: Signal) -> BoxFuture<'_, ExitErrors> {
        Box::pin(async move {
            let node = self.inner.arena.lock().nodes.get(&id).cloned();
            match node {
                None => SupervisorError::NotFound(id).into(),
                Some(Node::Process(worker)) => self.stop_process(&worker, signal).await,
                Some(Node::Group(group)) => match group.mode {
                    GroupMode::Ordered => {
                        let mut errors = ExitErrors::new();
                        for child in group.children.iter().rev() {
                            errors.extend(self.stop_node(*child, signal).await);
                        }
                        errors
                    }
                    GroupMode::Parallel => {
                        let mut set = JoinSet::new();
                        for child in group.children {
                            let sup = self.clone();
                            set.spawn(async move { sup.stop_node(child, signal).await });
                        }
                        let mut errors = ExitErrors::new();
                        while let Some(joined) = set.join_next().await {
                            match joined {
                                Ok(errs) => errors.extend(errs),
                                Err(e) => errors.push(SupervisorError::signal(
                                    &group.name,
                                    format!("stop task failed: {e}"),
                                )),
                            }
                        }
                        errors
                    }
                },
            }
        })
    }

    async fn stop_process(&self, worker: &WorkerHandle, signal: Signal) -> ExitErrors {
        let mut errors = ExitErrors::new();
        if !worker.snapshot().state.is_terminal() {
            if let Err(e) = worker.signal(signal).await {
                errors.push(e);
            }
        }

        let stop_timeout = self.inner.config.stop_timeout;
        let snap = match tokio::time::timeout(stop_timeout, worker.wait_exit()).await {
            Ok(snap) => snap,
            Err(_) => {
                tracing::warn!(
                    process = %worker.name(),
                    signal = ?signal,
                    timeout = ?stop_timeout,
                    "still running after stop timeout, escalating to SIGKILL"
                );
                if let Err(e) = worker.signal(Signal::Kill).await {
                    errors.push(e);
                }
                worker.wait_exit().await
            }
        };
        if let Some(err) = worker::failure_error(&snap) {
            errors.push(err);
        }
        errors
    }

    // =========================================================================
    // Arena helpers
    // =========================================================================

    fn insert(&self, id: HandleId, node: Node) {
        self.inner.arena.lock().nodes.insert(id, node);
    }

    fn push_child(&self, group: HandleId, child: HandleId) {
        if let Some(Node::Group(node)) = self.inner.arena.lock().nodes.get_mut(&group) {
            node.children.push(child);
        }
    }

    fn worker(&self, handle: HandleId) -> Result<WorkerHandle> {
        match self.inner.arena.lock().nodes.get(&handle) {
            Some(Node::Process(w)) => Ok(w.clone()),
            Some(Node::Group(_)) => Err(SupervisorError::NotAProcess(handle)),
            None => Err(SupervisorError::NotFound(handle)),
        }
    }

    fn unwind_signal_of(&self, id: HandleId) -> Signal {
        match self.inner.arena.lock().nodes.get(&id) {
            Some(Node::Group(group)) => group.unwind_signal,
            _ => self.inner.config.unwind_signal,
        }
    }

    /// Processes under `handle`, depth-first in reverse start order.
    fn processes_reversed(&self, handle: HandleId) -> Result<Vec<WorkerHandle>> {
        let arena = self.inner.arena.lock();
        if !arena.nodes.contains_key(&handle) {
            return Err(SupervisorError::NotFound(handle));
        }
        let mut out = Vec::new();
        collect_reversed(&arena.nodes, handle, &mut out);
        Ok(out)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                config: SupervisorConfig::default(),
                arena: Mutex::new(Arena::default()),
            }),
        }
    }
}

fn collect_reversed(nodes: &HashMap<HandleId, Node>, id: HandleId, out: &mut Vec<WorkerHandle>) {
    match nodes.get(&id) {
        Some(Node::Process(w)) => out.push(w.clone()),
        Some(Node::Group(group)) => {
            for child in group.children.iter().rev() {
                collect_reversed(nodes, *child, out);
            }
        }
        None => {}
    }
}

/// Resolves once cancellation is requested; pends forever if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::OutputMode;
    use crate::group::Group;
    use crate::types::ProcessState;

    fn supervisor() -> Supervisor {
        Supervisor::new(
            SupervisorConfig::default()
                .with_output(OutputMode::Silent)
                .with_stop_timeout(Duration::from_secs(2)),
        )
        .unwrap()
    }

    fn server(name: &str) -> ProcessDescriptor {
        ProcessDescriptor::new(name, "/bin/sh")
            .args(["-c", format!("echo {name}.started; exec sleep 30").as_str()])
            .ready_within(format!("{name}.started"), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_invoke_single_process() {
        let sup = supervisor();
        let id = sup.invoke(server("nats")).await.unwrap();
        assert_eq!(sup.snapshot(id).unwrap().state, ProcessState::Ready);
        assert_eq!(sup.handles(), vec![id]);
        assert_eq!(sup.lookup("nats"), Some(id));

        sup.stop(id, Signal::Term).await.unwrap();
        let snap = sup.snapshot(id).unwrap();
        assert_eq!(snap.state, ProcessState::Exited);
        assert_eq!(sup.exit_code(id).unwrap(), None);
    }

    #[tokio::test]
    async fn test_ordered_group_starts_in_order() {
        let sup = supervisor();
        let group = Group::ordered("g").members([server("a"), server("b"), server("c")]);
        let id = sup.invoke(group).await.unwrap();

        let names: Vec<_> = sup.snapshots(id).unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(matches!(sup.snapshot(id), Err(SupervisorError::NotAProcess(_))));

        sup.shutdown_all().await.unwrap();
        assert!(sup.handles().is_empty());
        assert!(sup.processes().iter().all(|s| s.state == ProcessState::Exited));
    }

    #[tokio::test]
    async fn test_invalid_group_rejected_before_launch() {
        let sup = supervisor();
        let group = Group::parallel("g").members([server("a"), server("a")]);
        let err = sup.invoke(group).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidDescriptor(_)));
        assert!(sup.processes().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let sup = supervisor();
        let id = HandleId::new();
        assert!(matches!(sup.snapshot(id), Err(SupervisorError::NotFound(_))));
        assert!(sup.signal(id, Signal::Term).await.is_err());
        assert!(sup.wait(id).await.is_err());
        assert!(sup.stop(id, Signal::Term).await.is_err());
    }

    #[tokio::test]
    async fn test_signal_skips_exited_processes() {
        let sup = supervisor();
        let quick = ProcessDescriptor::new("quick", "/bin/sh").args(["-c", "exit 0"]);
        let group = Group::parallel("g").member(server("slow")).member(quick);
        let id = sup.invoke(group).await.unwrap();

        let quick_id = sup.lookup("quick").unwrap();
        let mut exited = false;
        for _ in 0..100 {
            if sup.snapshot(quick_id).unwrap().state.is_terminal() {
                exited = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(exited);

        sup.signal(id, Signal::Term).await.unwrap();
        sup.wait(id).await.unwrap();
        assert!(sup.snapshot(quick_id).unwrap().signals.is_empty());
        let slow = sup.snapshot(sup.lookup("slow").unwrap()).unwrap();
        assert_eq!(slow.signals, vec![Signal::Term]);
    }

    #[tokio::test]
    async fn test_default_supervisor_uses_default_config() {
        let sup = Supervisor::default();
        assert_eq!(sup.config().unwind_signal, Signal::Term);
    }
}
