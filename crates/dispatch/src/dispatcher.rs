use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use strata_lock::LockOptions;
use strata_primitives::{NodeId, ServiceName, ServiceState};
use strata_resolver::ConfigResolver;
use strata_state::StateTracker;
use strata_topology::{Topology, node_lock_key};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::command::{
    CommandKind, CommandResponse, DispatchOutcome, DispatchRequest, NodeCommand, ServiceCommand,
};
use crate::error::{DispatchError, FrameworkError, TransportError};
use crate::metrics::{DispatchMetrics, IncCounterOnDrop};
use crate::scope::expand_scope;
use crate::transport::NodeTransport;

/// Per-node timing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Bound of a single attempt.
    pub timeout: Duration,
    /// Total attempts of retryable commands.
    pub attempts: u32,
    /// Added to the node lock's holding budget on top of the attempts.
    pub lock_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            attempts: 3,
            lock_grace: Duration::from_secs(5),
        }
    }
}

impl DispatchConfig {
    /// Longest time a per-node task may hold its node lock.
    pub fn holding_budget(&self) -> Duration {
        self.timeout * self.attempts.max(1) + self.lock_grace
    }
}

/// Outcomes of one dispatch call, in completion order.
///
/// Yields exactly [`Self::len`] outcomes, then ends. Dropping the handle does
/// not cancel the per-node tasks; call [`Self::cancel`] for that.
#[derive(Debug)]
pub struct DispatchHandle {
    outcomes: mpsc::UnboundedReceiver<DispatchOutcome>,
    cancel: CancellationToken,
    expected: usize,
}

impl DispatchHandle {
    /// Number of nodes the command was addressed to.
    pub fn len(&self) -> usize {
        self.expected
    }

    pub fn is_empty(&self) -> bool {
        self.expected == 0
    }

    /// Cancel every per-node task still running.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next outcome, `None` once every node has reported.
    pub async fn next_outcome(&mut self) -> Option<DispatchOutcome> {
        self.outcomes.recv().await
    }

    /// Wait for every outcome.
    pub async fn collect_all(mut self) -> Vec<DispatchOutcome> {
        let mut all = Vec::with_capacity(self.expected);
        while let Some(outcome) = self.outcomes.recv().await {
            all.push(outcome);
        }
        all
    }
}

impl Stream for DispatchHandle {
    type Item = DispatchOutcome;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.outcomes.poll_recv(cx)
    }
}

/// Fans a service command out to the nodes of a scope.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Debug)]
struct DispatcherInner {
    topology: Arc<Topology>,
    state: Arc<StateTracker>,
    resolver: Arc<ConfigResolver>,
    transport: Arc<dyn NodeTransport>,
    config: DispatchConfig,
    metrics: DispatchMetrics,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        topology: Arc<Topology>,
        state: Arc<StateTracker>,
        resolver: Arc<ConfigResolver>,
        transport: Arc<dyn NodeTransport>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                topology,
                state,
                resolver,
                transport,
                config,
                metrics: DispatchMetrics::default(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> DispatchConfig {
        self.inner.config
    }

    /// Send `request` to every node it addresses.
    ///
    /// Fails only if a target does not exist, before anything is sent.
    /// Nodes that cannot take the command are reported at once; the others
    /// get one task each. Must be called within a tokio runtime.
    pub fn dispatch(&self, request: DispatchRequest) -> Result<DispatchHandle, DispatchError> {
        let DispatchRequest {
            scope,
            targets,
            service,
            command,
        } = request;
        let nodes = expand_scope(&self.inner.topology, scope, &targets, service.as_str())?;

        let kind = command.kind();
        let cancel = self.inner.shutdown.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.metrics.requests_total.increment(1);
        info!(%service, command = %kind, %scope, nodes = nodes.len(), "dispatching");

        let expected = nodes.len();
        for node in nodes {
            let started = Instant::now();
            if let Err(err) = self.inner.precheck(&node, &service, &command) {
                debug!(%node, %service, %err, "node rejected before sending");
                self.inner.metrics.outcome(kind, Err(&err));
                let _ = tx.send(DispatchOutcome {
                    node_id: node,
                    service: service.clone(),
                    command: kind,
                    attempts: 0,
                    elapsed: started.elapsed(),
                    result: Err(err),
                });
                continue;
            }

            let inner = self.inner.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let service = service.clone();
            let command = command.clone();
            inner.metrics.node_tasks_total.increment(1);
            tokio::spawn(async move {
                let _finished = IncCounterOnDrop::new(inner.metrics.finished_node_tasks_total.clone());
                let outcome = inner.run_node(node, service, command, cancel, started).await;
                let _ = tx.send(outcome);
            });
        }

        Ok(DispatchHandle {
            outcomes: rx,
            cancel,
            expected,
        })
    }

    /// Cancel the tasks of every dispatch made so far and from now on.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl DispatcherInner {
    fn precheck(
        &self,
        node: &NodeId,
        service: &ServiceName,
        command: &ServiceCommand,
    ) -> Result<(), FrameworkError> {
        if !self
            .state
            .node_state(node.as_str())
            .is_some_and(|state| state.accepts_commands())
        {
            return Err(FrameworkError::NodeDisconnected);
        }

        let state = self.state.service_state(node.as_str(), service.as_str());
        if !state.is_available() {
            return Err(FrameworkError::ServiceUnavailable);
        }
        let allowed = match command {
            ServiceCommand::ApplyOps { .. } => state.accepts_ops(),
            // nothing to stop before the first init
            ServiceCommand::Stop => state != ServiceState::Uninitialized,
            _ => true,
        };
        if !allowed {
            return Err(FrameworkError::ServiceStateNotAllowed(state));
        }
        Ok(())
    }

    async fn run_node(
        &self,
        node: NodeId,
        service: ServiceName,
        command: ServiceCommand,
        cancel: CancellationToken,
        started: Instant,
    ) -> DispatchOutcome {
        let kind = command.kind();
        let (attempts, result) = self.execute(&node, &service, command, &cancel).await;

        self.metrics.outcome(kind, result.as_ref().map(|_| ()));
        match &result {
            Ok(_) => debug!(%node, %service, command = %kind, attempts, "command acknowledged"),
            Err(err) => warn!(%node, %service, command = %kind, attempts, %err, "command failed"),
        }

        DispatchOutcome {
            node_id: node,
            service,
            command: kind,
            attempts,
            elapsed: started.elapsed(),
            result,
        }
    }

    /// Returns the attempts sent and the result.
    async fn execute(
        &self,
        node: &NodeId,
        service: &ServiceName,
        command: ServiceCommand,
        cancel: &CancellationToken,
    ) -> (u32, Result<CommandResponse, FrameworkError>) {
        let budget = self.config.holding_budget();
        let key = node_lock_key(node.as_str());
        let options = LockOptions::default()
            .with_waiting(budget)
            .with_holding(budget);

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (0, Err(FrameworkError::Cancelled)),
            guard = self.topology.locks().acquire(&key, options) => match guard {
                Ok(guard) => guard,
                Err(err) => {
                    debug!(%node, %err, "node lock not acquired");
                    return (0, Err(FrameworkError::NodeBusy));
                }
            },
        };

        // the node may have changed while this task waited for the lock
        if let Err(err) = self.precheck(node, service, &command) {
            return (0, Err(err));
        }
        let payload = match self.payload(node, service, command) {
            Ok(payload) => payload,
            Err(err) => return (0, Err(err)),
        };

        let kind = payload.kind();
        let prior = self.state.service_state(node.as_str(), service.as_str());
        match kind {
            CommandKind::Start if prior != ServiceState::Running => {
                self.set_state(node, service, ServiceState::Configuring)
            }
            CommandKind::Reset => self.set_state(node, service, ServiceState::Uninitialized),
            _ => {}
        }

        let max = kind.max_attempts(self.config.attempts);
        let mut attempts = 0;
        let mut last = FrameworkError::ServiceTimeout { attempts: 0 };
        while attempts < max {
            attempts += 1;
            self.metrics.attempts_total.increment(1);
            trace!(%node, %service, command = %kind, attempt = attempts, "sending");

            let send = self
                .transport
                .send_command(node, service.as_str(), payload.clone());
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.restore(node, service, prior);
                    return (attempts, Err(FrameworkError::Cancelled));
                }
                sent = tokio::time::timeout(self.config.timeout, send) => sent,
            };

            match sent {
                Ok(Ok(response)) => {
                    self.acknowledged(node, service, &payload).await;
                    return (attempts, Ok(response));
                }
                Ok(Err(TransportError::Service(err))) if err.fatal => {
                    self.malfunctioning(node, service, kind);
                    return (attempts, Err(FrameworkError::Service(err)));
                }
                Ok(Err(TransportError::Service(err))) => last = FrameworkError::Service(err),
                Ok(Err(TransportError::Disconnected(reason))) => {
                    debug!(%node, %reason, "node disconnected during command");
                    self.restore(node, service, prior);
                    return (attempts, Err(FrameworkError::NodeDisconnected));
                }
                Ok(Err(TransportError::Timeout)) | Err(_) => {
                    last = FrameworkError::ServiceTimeout { attempts }
                }
            }

            if attempts < max {
                debug!(%node, %service, command = %kind, attempt = attempts, err = %last, "attempt failed, retrying");
            }
        }

        self.malfunctioning(node, service, kind);
        (attempts, Err(last))
    }

    fn payload(
        &self,
        node: &NodeId,
        service: &ServiceName,
        command: ServiceCommand,
    ) -> Result<NodeCommand, FrameworkError> {
        Ok(match command {
            ServiceCommand::Start { config: Some(config) } => NodeCommand::Start { config },
            ServiceCommand::Start { config: None } => {
                // resolution only fails once the node record is gone
                let effective = self
                    .resolver
                    .resolve(node.as_str(), service.as_str())
                    .map_err(|err| {
                        warn!(%node, %service, %err, "config resolution failed");
                        FrameworkError::NodeDisconnected
                    })?;
                trace!(%node, %service, origin = %effective.origin, "config resolved");
                NodeCommand::Start {
                    config: effective.bytes,
                }
            }
            ServiceCommand::Stop => NodeCommand::Stop,
            ServiceCommand::Reset => NodeCommand::Reset,
            ServiceCommand::ApplyOps { op_cmd, op_params } => NodeCommand::ApplyOps { op_cmd, op_params },
        })
    }

    async fn acknowledged(&self, node: &NodeId, service: &ServiceName, payload: &NodeCommand) {
        match payload {
            NodeCommand::Start { config } => {
                self.set_state(node, service, ServiceState::Running);
                if let Err(err) = self
                    .resolver
                    .record_used_config(node.as_str(), service.as_str(), config.clone())
                    .await
                {
                    warn!(%node, %service, %err, "failed to record used config");
                }
            }
            NodeCommand::Stop | NodeCommand::Reset => {
                self.set_state(node, service, ServiceState::Initialized)
            }
            NodeCommand::ApplyOps { .. } => {}
        }
    }

    /// A failed stop leaves the prior state.
    fn malfunctioning(&self, node: &NodeId, service: &ServiceName, kind: CommandKind) {
        if kind != CommandKind::Stop {
            self.set_state(node, service, ServiceState::Malfunctioning);
        }
    }

    /// Undo the transition committed when the command was sent.
    fn restore(&self, node: &NodeId, service: &ServiceName, prior: ServiceState) {
        if prior != self.state.service_state(node.as_str(), service.as_str()) {
            self.set_state(node, service, prior);
        }
    }

    fn set_state(&self, node: &NodeId, service: &ServiceName, state: ServiceState) {
        if let Err(err) = self
            .state
            .apply_service_state(node.as_str(), service.as_str(), state)
        {
            warn!(%node, %service, %state, %err, "failed to apply service state");
        }
    }
}
