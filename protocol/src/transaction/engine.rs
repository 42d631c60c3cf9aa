//! # Transaction Engine
//!
//! Runs many transactions at once while keeping each one strictly serial.
//!
//! ## Design
//!
//! Every live transaction is owned by one tokio task (its actor) that
//! drains a bounded command queue and replies through a oneshot channel.
//! Two submissions for the same transaction are therefore applied one
//! after the other in arrival order; submissions for different
//! transactions run in parallel and meet only in the shared replay set.
//!
//! ```text
//! caller ──Command──▶ mpsc ──▶ actor(record) ──▶ validator
//!    ▲                              │
//!    └────────── oneshot ◀──────────┴──▶ LedgerStore (spawn_blocking)
//! ```
//!
//! Persistence is optional. With a [`LedgerStore`] attached, the actor writes
//! the record after every command that touched it and the replay entry of
//! every accepted mandate, off the async runtime.
//!
//! ## Retirement
//!
//! Once its record is terminal (or halted) and written, an actor removes
//! itself from the engine, answers whatever is still queued, and exits.
//! Reads of a retired transaction are served from the store; commands get
//! the same refusal the record itself would give. Without a store a retired
//! transaction is forgotten.
//!
//! ## Failed writes
//!
//! A command whose effect was applied in memory but could not be written
//! returns [`EngineError::Unpersisted`], which still carries the verdict and
//! the state reached. The actor keeps the record dirty and retries the write
//! (record plus any unwritten nonces) on every later command, timeout check
//! and at shutdown. A dirty record is never retired.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::record::{SettlementReport, TransactionError, TransactionId, TransactionRecord};
use super::state::TransactionState;
use crate::config::{DEFAULT_MAX_REJECTIONS, TRANSACTION_QUEUE_CAPACITY};
use crate::mandate::{MandateKind, SignedMandate};
use crate::registry::Role;
use crate::storage::{DbError, DbResult, LedgerStore};
use crate::validation::{MandateChainValidator, ReplayKey, ValidationResult};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("transaction {0} actor has stopped")]
    ActorGone(TransactionId),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("storage error: {0}")]
    Db(#[from] DbError),

    #[error("blocking task failed: {0}")]
    Join(String),

    /// Applied in memory, not yet written. `verdict` is set for submissions.
    #[error("transaction {id} reached {state} but was not persisted: {source}")]
    Unpersisted {
        id: TransactionId,
        state: TransactionState,
        verdict: Option<ValidationResult>,
        #[source]
        source: Box<EngineError>,
    },
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

type PendingNonce = (ReplayKey, DateTime<Utc>);

enum Command {
    Submit {
        kind: MandateKind,
        mandate: SignedMandate,
        reply: Reply<ValidationResult>,
    },
    Settle {
        report: SettlementReport,
        reply: Reply<TransactionState>,
    },
    CheckTimeout {
        reply: Reply<bool>,
    },
    Abort {
        reason: String,
        reply: Reply<()>,
    },
    Snapshot {
        reply: oneshot::Sender<TransactionRecord>,
    },
}

struct ActorHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

type ActorMap = Arc<DashMap<TransactionId, ActorHandle>>;

/// Outcome of one [`TransactionEngine::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub expired: Vec<TransactionId>,
    pub purged_nonces: usize,
}

/// Outcome of [`TransactionEngine::recover`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub live: usize,
    pub terminal: usize,
    pub halted: Vec<TransactionId>,
    pub nonces: usize,
}

pub struct TransactionEngine {
    validator: MandateChainValidator,
    store: Option<Arc<dyn LedgerStore>>,
    max_rejections: u32,
    actors: ActorMap,
}

impl TransactionEngine {
    pub fn new(validator: MandateChainValidator) -> Self {
        Self {
            validator,
            store: None,
            max_rejections: DEFAULT_MAX_REJECTIONS,
            actors: Arc::new(DashMap::new()),
        }
    }

    pub fn with_db<S: LedgerStore>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_max_rejections(mut self, max_rejections: u32) -> Self {
        self.max_rejections = max_rejections;
        self
    }

    pub fn validator(&self) -> &MandateChainValidator {
        &self.validator
    }

    /// Number of transactions with a running actor.
    pub fn live_count(&self) -> usize {
        self.actors.len()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn create_transaction(&self) -> Result<TransactionId, EngineError> {
        let record = TransactionRecord::with_max_rejections(self.validator.now(), self.max_rejections);
        let id = record.id();
        if let Some(store) = &self.store {
            persist(Arc::clone(store), record.clone(), Vec::new()).await?;
        }
        self.spawn(record);
        tracing::info!(tx = %id, "transaction created");
        Ok(id)
    }

    /// Reload persisted state: the replay set first, then every record.
    /// Records whose audit log no longer verifies stay halted and get no
    /// actor; terminal records are left in storage only.
    pub async fn recover<S: LedgerStore>(
        validator: MandateChainValidator,
        store: S,
        max_rejections: u32,
    ) -> Result<(Self, RecoveryReport), EngineError> {
        let store: Arc<dyn LedgerStore> = Arc::new(store);
        let loader = Arc::clone(&store);
        let (nonces, records) = tokio::task::spawn_blocking(move || {
            Ok::<_, DbError>((loader.all_nonces()?, loader.all_records()?))
        })
        .await
        .map_err(|e| EngineError::Join(e.to_string()))??;

        let mut report = RecoveryReport {
            nonces: nonces.len(),
            ..RecoveryReport::default()
        };
        for entry in nonces {
            validator.replay_guard().restore(entry.key, entry.retain_until);
        }

        let mut engine = Self::new(validator).with_max_rejections(max_rejections);
        engine.store = Some(Arc::clone(&store));
        for mut record in records {
            if let Err(e) = record.verify_integrity() {
                tracing::error!(tx = %record.id(), error = %e, "record halted during recovery");
                report.halted.push(record.id());
                persist(Arc::clone(&store), record, Vec::new()).await?;
                continue;
            }
            if record.is_terminal() {
                report.terminal += 1;
                continue;
            }
            report.live += 1;
            engine.spawn(record);
        }

        tracing::info!(
            live = report.live,
            terminal = report.terminal,
            halted = report.halted.len(),
            nonces = report.nonces,
            "engine recovered"
        );
        Ok((engine, report))
    }

    /// Stop every actor after it has drained its queue.
    pub async fn shutdown(self) {
        let ids: Vec<TransactionId> = self.actors.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.actors.remove(&id) {
                drop(handle.commands);
                if let Err(e) = handle.task.await {
                    tracing::warn!(tx = %id, error = %e, "actor ended abnormally");
                }
            }
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.flush() {
                tracing::warn!(error = %e, "final flush failed");
            }
        }
        tracing::info!("engine stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    pub async fn submit_intent(
        &self,
        id: TransactionId,
        intent: SignedMandate,
    ) -> Result<ValidationResult, EngineError> {
        self.submit(id, MandateKind::Intent, intent).await
    }

    pub async fn submit_cart(
        &self,
        id: TransactionId,
        cart: SignedMandate,
    ) -> Result<ValidationResult, EngineError> {
        self.submit(id, MandateKind::Cart, cart).await
    }

    pub async fn submit_payment(
        &self,
        id: TransactionId,
        payment: SignedMandate,
    ) -> Result<ValidationResult, EngineError> {
        self.submit(id, MandateKind::Payment, payment).await
    }

    async fn submit(
        &self,
        id: TransactionId,
        kind: MandateKind,
        mandate: SignedMandate,
    ) -> Result<ValidationResult, EngineError> {
        self.request(id, |reply| Command::Submit {
            kind,
            mandate,
            reply,
        })
        .await
    }

    pub async fn confirm_settlement(
        &self,
        id: TransactionId,
        report: SettlementReport,
    ) -> Result<TransactionState, EngineError> {
        self.request(id, |reply| Command::Settle { report, reply }).await
    }

    pub async fn abort(&self, id: TransactionId, reason: impl Into<String>) -> Result<(), EngineError> {
        let reason = reason.into();
        self.request(id, |reply| Command::Abort { reason, reply }).await
    }

    /// Current record: from its actor while live, from the store once
    /// retired.
    pub async fn snapshot(&self, id: TransactionId) -> Result<TransactionRecord, EngineError> {
        if let Some(sender) = self.sender(id) {
            let (tx, rx) = oneshot::channel();
            if sender.send(Command::Snapshot { reply: tx }).await.is_ok() {
                return rx.await.map_err(|_| EngineError::ActorGone(id));
            }
        }
        self.load(id).await?.ok_or(EngineError::UnknownTransaction(id))
    }

    /// The frozen chain, for a role allowed to consume payment mandates.
    pub async fn frozen_chain(
        &self,
        id: TransactionId,
        role: Role,
    ) -> Result<Vec<SignedMandate>, EngineError> {
        let record = self.snapshot(id).await?;
        Ok(record.frozen_chain_for(role, self.validator.registry())?)
    }

    /// Send a timeout check to every live transaction, then purge replay
    /// entries whose retention has passed.
    pub async fn tick(&self) -> TickReport {
        let targets: Vec<(TransactionId, mpsc::Sender<Command>)> = self
            .actors
            .iter()
            .map(|e| (*e.key(), e.value().commands.clone()))
            .collect();

        // Enqueue everywhere first so the actors check in parallel.
        let mut pending = Vec::with_capacity(targets.len());
        for (id, sender) in targets {
            let (tx, rx) = oneshot::channel();
            if sender.send(Command::CheckTimeout { reply: tx }).await.is_ok() {
                pending.push((id, rx));
            }
        }

        let mut report = TickReport::default();
        for (id, rx) in pending {
            match rx.await {
                Ok(Ok(true)) => report.expired.push(id),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => tracing::warn!(tx = %id, error = %e, "timeout check failed"),
                Err(_) => tracing::warn!(tx = %id, "actor dropped timeout check"),
            }
        }

        let purged = self.validator.replay_guard().purge_expired(self.validator.now());
        report.purged_nonces = purged.len();
        if let (Some(store), false) = (&self.store, purged.is_empty()) {
            let store = Arc::clone(store);
            let outcome = tokio::task::spawn_blocking(move || -> DbResult<()> {
                for key in &purged {
                    store.remove_nonce(key)?;
                }
                Ok(())
            })
            .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "failed to purge persisted nonces"),
                Err(e) => tracing::warn!(error = %e, "nonce purge task failed"),
            }
        }

        if !report.expired.is_empty() {
            tracing::info!(expired = report.expired.len(), "tick expired transactions");
        }
        report
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn spawn(&self, record: TransactionRecord) {
        let id = record.id();
        let (commands, inbox) = mpsc::channel(TRANSACTION_QUEUE_CAPACITY);
        let actor = Actor {
            record,
            validator: self.validator.clone(),
            store: self.store.clone(),
            unsaved_nonces: Vec::new(),
            dirty: false,
            retired: false,
        };
        let task = tokio::spawn(run_actor(actor, Arc::clone(&self.actors), inbox));
        self.actors.insert(id, ActorHandle { commands, task });
    }

    fn sender(&self, id: TransactionId) -> Option<mpsc::Sender<Command>> {
        self.actors.get(&id).map(|h| h.commands.clone())
    }

    async fn request<T>(
        &self,
        id: TransactionId,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let Some(sender) = self.sender(id) else {
            return Err(self.refusal(id, false).await);
        };
        let (tx, rx) = oneshot::channel();
        if sender.send(make(tx)).await.is_err() {
            return Err(self.refusal(id, true).await);
        }
        rx.await.map_err(|_| EngineError::ActorGone(id))?
    }

    /// Why a transaction with no running actor does not take commands.
    async fn refusal(&self, id: TransactionId, had_actor: bool) -> EngineError {
        match self.load(id).await {
            Ok(Some(record)) if record.is_halted() => TransactionError::Halted.into(),
            Ok(Some(record)) if record.is_terminal() => {
                TransactionError::Terminal(record.state()).into()
            }
            Ok(_) if had_actor => EngineError::ActorGone(id),
            Ok(_) => EngineError::UnknownTransaction(id),
            Err(e) => e,
        }
    }

    async fn load(&self, id: TransactionId) -> Result<Option<TransactionRecord>, EngineError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let store = Arc::clone(store);
        let record = tokio::task::spawn_blocking(move || store.get_record(&id))
            .await
            .map_err(|e| EngineError::Join(e.to_string()))??;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Actor {
    record: TransactionRecord,
    validator: MandateChainValidator,
    store: Option<Arc<dyn LedgerStore>>,
    /// Accepted nonces whose write has not succeeded yet.
    unsaved_nonces: Vec<PendingNonce>,
    dirty: bool,
    retired: bool,
}

impl Actor {
    fn submit(&mut self, kind: MandateKind, mandate: SignedMandate) -> Result<ValidationResult, TransactionError> {
        match kind {
            MandateKind::Intent => self.record.submit_intent(&self.validator, mandate),
            MandateKind::Cart => self.record.submit_cart(&self.validator, mandate),
            MandateKind::Payment => self.record.submit_payment(&self.validator, mandate),
        }
    }

    /// Write the record plus every unwritten nonce. A failure leaves the
    /// actor dirty; the next call retries.
    async fn save(&mut self, nonce: Option<PendingNonce>) -> Result<(), EngineError> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        self.unsaved_nonces.extend(nonce);
        let outcome = persist(store, self.record.clone(), self.unsaved_nonces.clone()).await;
        match outcome {
            Ok(()) => {
                if self.dirty {
                    tracing::info!(tx = %self.record.id(), "deferred write succeeded");
                }
                self.unsaved_nonces.clear();
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                tracing::error!(tx = %self.record.id(), error = %e, "failed to persist transaction");
                self.dirty = true;
                Err(e)
            }
        }
    }

    async fn retry_if_dirty(&mut self) {
        if self.dirty {
            let _ = self.save(None).await;
        }
    }

    fn unpersisted(&self, verdict: Option<ValidationResult>, source: EngineError) -> EngineError {
        EngineError::Unpersisted {
            id: self.record.id(),
            state: self.record.state(),
            verdict,
            source: Box::new(source),
        }
    }

    /// Persist after a transition attempt. Refusals keep their own error
    /// even when the write fails.
    async fn commit<T>(&mut self, outcome: Result<T, TransactionError>) -> Result<T, EngineError> {
        match outcome {
            Ok(value) => match self.save(None).await {
                Ok(()) => Ok(value),
                Err(e) => Err(self.unpersisted(None, e)),
            },
            Err(refused) => {
                let _ = self.save(None).await;
                Err(refused.into())
            }
        }
    }

    /// Leave the engine once the record can no longer change and is safely
    /// written. Commands already queued are still answered.
    fn retire_when_done(&mut self, actors: &DashMap<TransactionId, ActorHandle>, inbox: &mut mpsc::Receiver<Command>) {
        let done = self.record.is_terminal() || self.record.is_halted();
        if self.retired || self.dirty || !done {
            return;
        }
        actors.remove(&self.record.id());
        inbox.close();
        self.store = None;
        self.retired = true;
        tracing::debug!(tx = %self.record.id(), state = %self.record.state(), "actor retired");
    }
}

async fn run_actor(mut actor: Actor, actors: ActorMap, mut inbox: mpsc::Receiver<Command>) {
    let id = actor.record.id();
    tracing::debug!(tx = %id, state = %actor.record.state(), "actor started");

    while let Some(command) = inbox.recv().await {
        match command {
            Command::Submit {
                kind,
                mandate,
                reply,
            } => {
                let key = ReplayKey::new(mandate.mandate.issuer_role, mandate.mandate.nonce.clone());
                let result = match actor.submit(kind, mandate) {
                    Ok(verdict) => {
                        let nonce = if verdict.is_accepted() {
                            actor
                                .validator
                                .replay_guard()
                                .retain_until(&key)
                                .map(|until| (key, until))
                        } else {
                            None
                        };
                        match actor.save(nonce).await {
                            Ok(()) => Ok(verdict),
                            Err(e) => Err(actor.unpersisted(Some(verdict), e)),
                        }
                    }
                    Err(refused) => {
                        let _ = actor.save(None).await;
                        Err(refused.into())
                    }
                };
                actor.retire_when_done(&actors, &mut inbox);
                let _ = reply.send(result);
            }
            Command::Settle { report, reply } => {
                let outcome = actor.record.confirm_settlement(report, actor.validator.now());
                let result = actor.commit(outcome).await;
                actor.retire_when_done(&actors, &mut inbox);
                let _ = reply.send(result);
            }
            Command::CheckTimeout { reply } => {
                let result = match actor.record.check_timeout(&actor.validator) {
                    Ok(false) => {
                        actor.retry_if_dirty().await;
                        Ok(false)
                    }
                    other => actor.commit(other).await,
                };
                actor.retire_when_done(&actors, &mut inbox);
                let _ = reply.send(result);
            }
            Command::Abort { reason, reply } => {
                let outcome = actor.record.abort(&reason, actor.validator.now());
                let result = actor.commit(outcome).await;
                actor.retire_when_done(&actors, &mut inbox);
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                actor.retry_if_dirty().await;
                actor.retire_when_done(&actors, &mut inbox);
                let _ = reply.send(actor.record.clone());
            }
        }
    }

    actor.retry_if_dirty().await;
    if actor.dirty {
        tracing::error!(tx = %id, state = %actor.record.state(), "actor stopped with unwritten state");
    }
    tracing::debug!(tx = %id, state = %actor.record.state(), "actor stopped");
}

async fn persist(
    store: Arc<dyn LedgerStore>,
    record: TransactionRecord,
    nonces: Vec<PendingNonce>,
) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || -> DbResult<()> {
        for (key, until) in &nonces {
            store.put_nonce(key, *until)?;
        }
        store.put_record(&record)
    })
    .await
    .map_err(|e| EngineError::Join(e.to_string()))??;
    Ok(())
}
