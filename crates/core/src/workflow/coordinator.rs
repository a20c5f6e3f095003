//! Workflow coordinator.
//!
//! The only mutation entry point once a record leaves `DRAFT`. Every
//! operation runs the same shape: resolve the actor, load the record with
//! its revision token, run the pure engine, plan postings when final
//! approval fires, and commit everything through the store adapter in one
//! atomic unit. A revision conflict restarts the sequence from the load, up
//! to a bounded attempt count.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::domain::job_card::JobCard;
use crate::domain::request::{
    ActorProfile, ApprovalAction, ApprovalLetter, ApprovalStage, RequestStatus, Requestable,
    UserRole,
};
use crate::domain::treasury::MovementLine;
use crate::errors::WorkflowError;
use crate::events::{EventOutcome, EventSink, WorkflowEvent};
use crate::ledger::{ApprovalLedger, ChainVerification, LedgerAction, LedgerEntry};
use crate::posting::{self, ApprovalPosting, PostingSnapshots};
use crate::store::{IdentityProvider, PostingInputs, RequestStore, StagedCommit, StoreError};
use crate::workflow::engine;

#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    /// Load-transition-commit attempts before giving up with `Contention`.
    pub max_commit_attempts: u32,
    pub ledger_signing_key: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self { max_commit_attempts: 3, ledger_signing_key: "tradeflow-dev-key".to_string() }
    }
}

/// Generic over the record kind; instantiated once per entity. All
/// collaborators are injected — there is no ambient client or current user.
pub struct WorkflowCoordinator<R, S, P, I, E> {
    store: S,
    inputs: P,
    identity: I,
    events: E,
    settings: CoordinatorSettings,
    ledger: Arc<Mutex<ApprovalLedger>>,
    _record: PhantomData<R>,
}

impl<R, S, P, I, E> WorkflowCoordinator<R, S, P, I, E>
where
    R: Requestable,
    S: RequestStore<R>,
    P: PostingInputs,
    I: IdentityProvider,
    E: EventSink,
{
    pub fn new(store: S, inputs: P, identity: I, events: E, settings: CoordinatorSettings) -> Self {
        let ledger = Arc::new(Mutex::new(ApprovalLedger::new(&settings.ledger_signing_key)));
        Self { store, inputs, identity, events, settings, ledger, _record: PhantomData }
    }

    /// Read accessor: the record with its current status and trail.
    pub async fn fetch(&self, id: &str) -> Result<R, WorkflowError> {
        let (record, _token) = self.store.load(id).await?;
        Ok(record)
    }

    /// `DRAFT -> SUBMITTED`; stamps the submitter once.
    pub async fn submit(&self, id: &str, actor_uid: &str) -> Result<R, WorkflowError> {
        let actor = self.resolve_actor(actor_uid).await?;
        if !actor.active {
            return Err(WorkflowError::ValidationFailed(format!(
                "user {} is suspended and may not submit",
                actor.uid
            )));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let (mut record, token) = self.store.load(id).await?;
            let next = engine::submit(record.status())?;
            record.validate_for_submit().map_err(WorkflowError::ValidationFailed)?;

            let now = Utc::now();
            record.set_status(next);
            record.set_submitted_by(actor.submitter_ref());
            record.touch(now);

            match self.store.commit(id, token, StagedCommit { record: record.clone(), plan: None }).await {
                Ok(()) => {
                    self.append_ledger(&record, LedgerAction::Submit, &actor.uid);
                    self.events.emit(
                        WorkflowEvent::new(
                            record.record_ref(),
                            "workflow.submitted",
                            &actor.uid,
                            EventOutcome::Success,
                        )
                        .with_metadata("from", RequestStatus::Draft.as_str())
                        .with_metadata("to", next.as_str()),
                    );
                    return Ok(record);
                }
                Err(StoreError::Conflict(_)) if attempts < self.settings.max_commit_attempts => {}
                Err(StoreError::Conflict(_)) => {
                    return Err(WorkflowError::Contention { attempts })
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    pub async fn approve_as_accountant(
        &self,
        id: &str,
        actor_uid: &str,
        note: Option<&str>,
    ) -> Result<R, WorkflowError> {
        self.act(id, actor_uid, ApprovalAction::Approve, ApprovalStage::Accountant, note).await
    }

    pub async fn reject_as_accountant(
        &self,
        id: &str,
        actor_uid: &str,
        note: &str,
    ) -> Result<R, WorkflowError> {
        self.act(id, actor_uid, ApprovalAction::Reject, ApprovalStage::Accountant, Some(note)).await
    }

    pub async fn approve_as_manager(
        &self,
        id: &str,
        actor_uid: &str,
        note: Option<&str>,
    ) -> Result<R, WorkflowError> {
        self.act(id, actor_uid, ApprovalAction::Approve, ApprovalStage::Manager, note).await
    }

    pub async fn reject_as_manager(
        &self,
        id: &str,
        actor_uid: &str,
        note: &str,
    ) -> Result<R, WorkflowError> {
        self.act(id, actor_uid, ApprovalAction::Reject, ApprovalStage::Manager, Some(note)).await
    }

    /// Attaches an issued letter reference to an `APPROVED_FINAL` record.
    /// Idempotent: a second call returns the record with the stored letter
    /// untouched.
    pub async fn record_approval_letter(
        &self,
        id: &str,
        letter: ApprovalLetter,
    ) -> Result<R, WorkflowError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (mut record, token) = self.store.load(id).await?;
            if record.status() != RequestStatus::ApprovedFinal {
                return Err(WorkflowError::InvalidState { status: record.status() });
            }
            if record.postings().and_then(|p| p.approval_letter.as_ref()).is_some() {
                return Ok(record);
            }

            let now = Utc::now();
            record.attach_approval_letter(letter.clone());
            record.touch(now);

            match self.store.commit(id, token, StagedCommit { record: record.clone(), plan: None }).await {
                Ok(()) => {
                    self.append_ledger(&record, LedgerAction::Letter, "letter-issuer");
                    self.events.emit(
                        WorkflowEvent::new(
                            record.record_ref(),
                            "workflow.letter_recorded",
                            "letter-issuer",
                            EventOutcome::Success,
                        )
                        .with_metadata("ref_no", letter.ref_no.clone()),
                    );
                    return Ok(record);
                }
                Err(StoreError::Conflict(_)) if attempts < self.settings.max_commit_attempts => {}
                Err(StoreError::Conflict(_)) => {
                    return Err(WorkflowError::Contention { attempts })
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    /// Verification handle over the in-process audit chain.
    pub fn verify_audit_chain(&self, record: &R) -> ChainVerification {
        self.with_ledger(|ledger| ledger.verify_chain(&record.record_ref()))
    }

    pub fn audit_entries(&self, record: &R) -> Vec<LedgerEntry> {
        self.with_ledger(|ledger| ledger.entries_for(&record.record_ref()))
    }

    async fn act(
        &self,
        id: &str,
        actor_uid: &str,
        action: ApprovalAction,
        stage: ApprovalStage,
        note: Option<&str>,
    ) -> Result<R, WorkflowError> {
        let actor = self.resolve_actor(actor_uid).await?;
        // Cheap refusals before any load: wrong role or missing note never
        // cost a round trip.
        engine::authorize(&actor, stage)?;
        engine::validate_note(action, note)?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let (mut record, token) = self.store.load(id).await?;
            let now = Utc::now();

            let outcome =
                match engine::transition(record.status(), action, stage, &actor, note, now) {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        self.events.emit(
                            WorkflowEvent::new(
                                record.record_ref(),
                                "workflow.transition_rejected",
                                &actor.uid,
                                EventOutcome::Rejected,
                            )
                            .with_metadata("error", error.to_string()),
                        );
                        return Err(error);
                    }
                };

            record.set_status(outcome.to);
            record.push_trail(outcome.entry.clone());
            record.touch(now);

            let plan = if outcome.triggers_postings {
                let ApprovalPosting { plan, refs } = self.plan_postings(&record, &actor).await?;
                record.set_postings(refs);
                Some(plan)
            } else {
                None
            };

            let had_plan = plan.is_some();
            match self.store.commit(id, token, StagedCommit { record: record.clone(), plan }).await
            {
                Ok(()) => {
                    let ledger_action = match action {
                        ApprovalAction::Approve => LedgerAction::Approve,
                        ApprovalAction::Reject => LedgerAction::Reject,
                    };
                    self.append_ledger(&record, ledger_action, &actor.uid);

                    let mut event = WorkflowEvent::new(
                        record.record_ref(),
                        "workflow.transition_applied",
                        &actor.uid,
                        EventOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("stage", stage.as_str())
                    .with_metadata("action", action.as_str());
                    if had_plan {
                        event = event.with_metadata("postings", "applied");
                    }
                    self.events.emit(event);
                    return Ok(record);
                }
                Err(StoreError::Conflict(_)) if attempts < self.settings.max_commit_attempts => {}
                Err(StoreError::Conflict(_)) => {
                    return Err(WorkflowError::Contention { attempts })
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn plan_postings(
        &self,
        record: &R,
        actor: &ActorProfile,
    ) -> Result<ApprovalPosting, WorkflowError> {
        let source = record.posting_source();
        let mut snapshots = PostingSnapshots::default();
        for account_id in source.account_ids() {
            if let Some(account) = self.inputs.account(&account_id).await? {
                snapshots.accounts.insert(account_id, account);
            }
        }
        for item_id in source.item_ids() {
            if let Some(item) = self.inputs.item(&item_id).await? {
                snapshots.items.insert(item_id, item);
            }
        }
        posting::build_plan(&source, &snapshots, actor, Utc::now())
    }

    async fn resolve_actor(&self, uid: &str) -> Result<ActorProfile, WorkflowError> {
        self.identity
            .fetch_profile(uid)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("user profile {uid}")))
    }

    fn append_ledger(&self, record: &R, action: LedgerAction, actor_id: &str) {
        let content = serde_json::to_string(record)
            .unwrap_or_else(|_| record.record_id().to_string());
        self.with_ledger(|ledger| {
            ledger.append_entry(&record.record_ref(), &content, action, actor_id);
        });
    }

    fn with_ledger<T>(&self, f: impl FnOnce(&mut ApprovalLedger) -> T) -> T {
        match self.ledger.lock() {
            Ok(mut ledger) => f(&mut ledger),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl<S, P, I, E> WorkflowCoordinator<JobCard, S, P, I, E>
where
    S: RequestStore<JobCard>,
    P: PostingInputs,
    I: IdentityProvider,
    E: EventSink,
{
    /// Returns unused materials of an approved job card to stock. Manager or
    /// admin only; records a `RETURN` movement and links it on the card.
    pub async fn return_materials(
        &self,
        id: &str,
        actor_uid: &str,
        lines: Vec<MovementLine>,
        note: Option<String>,
    ) -> Result<JobCard, WorkflowError> {
        let actor = self.resolve_actor(actor_uid).await?;
        if !actor.active || !matches!(actor.role, UserRole::Manager | UserRole::Admin) {
            return Err(WorkflowError::Forbidden {
                role: actor.role,
                stage: ApprovalStage::Manager,
            });
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let (mut card, token) = self.store.load(id).await?;
            if card.status != RequestStatus::ApprovedFinal {
                return Err(WorkflowError::InvalidState { status: card.status });
            }

            let mut snapshots = PostingSnapshots::default();
            for line in &lines {
                if let Some(item) = self.inputs.item(&line.item_id).await? {
                    snapshots.items.insert(line.item_id.clone(), item);
                }
            }

            let now = Utc::now();
            let (plan, movement_id) = posting::plan_return(
                &card.record_ref(),
                &card.id,
                &card.project_name,
                &lines,
                &snapshots,
                &actor,
                note.clone(),
                now,
            )?;

            card.returned_movement_ids.push(movement_id.clone());
            card.touch(now);

            match self
                .store
                .commit(id, token, StagedCommit { record: card.clone(), plan: Some(plan) })
                .await
            {
                Ok(()) => {
                    self.append_ledger(&card, LedgerAction::Return, &actor.uid);
                    self.events.emit(
                        WorkflowEvent::new(
                            card.record_ref(),
                            "inventory.materials_returned",
                            &actor.uid,
                            EventOutcome::Success,
                        )
                        .with_metadata("movement_id", movement_id.clone()),
                    );
                    return Ok(card);
                }
                Err(StoreError::Conflict(_)) if attempts < self.settings.max_commit_attempts => {}
                Err(StoreError::Conflict(_)) => {
                    return Err(WorkflowError::Contention { attempts })
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}
