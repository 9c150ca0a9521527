use crate::application::context::SubmissionContext;
use crate::application::deposit_executor::DepositExecutor;
use crate::application::object_creator::ObjectCreator;
use crate::application::poller::IndexingPoller;
use crate::application::progress::ProgressReporter;
use crate::application::redeem_executor::{positions_from_items, RedeemExecutor};
use crate::application::relationship_creator::RelationshipCreator;
use crate::application::transaction::TransactionSender;
use crate::config::EngineConfig;
use crate::domain::cart::CartItem;
use crate::domain::classifier::{classify, Classification};
use crate::domain::events::{EngineEvent, ExecutionStatus, Phase, SubmissionId};
use crate::domain::indexer::Indexer;
use crate::domain::ledger::{ContractConfig, Ledger};
use crate::domain::report::{ExecutionReport, SkipReason};
use crate::domain::validator::validate_amounts;
use crate::error::{EngineError, ExecutionFailure};
use crate::types::{Address, Direction, TermId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, info_span, warn, Instrument};

/// A cart submitted for execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Subject of every relationship voted on
    pub subject_id: TermId,
    /// Vote intents, in cart order
    pub items: Vec<CartItem>,
}

/// Items that passed preflight, and the plan derived from them
struct Preflight {
    account: Address,
    contract: ContractConfig,
    classification: Classification,
}

/// Turns a cart into an ordered sequence of ledger transactions.
///
/// One submission runs at a time; progress is published on a broadcast
/// event stream and a watch channel holding the latest [`ExecutionStatus`].
pub struct VoteEngine {
    ledger: Arc<dyn Ledger>,
    config: EngineConfig,
    objects: ObjectCreator,
    relationships: RelationshipCreator,
    redeemer: RedeemExecutor,
    depositor: DepositExecutor,
    events: broadcast::Sender<EngineEvent>,
    status: Arc<watch::Sender<ExecutionStatus>>,
    in_flight: Mutex<()>,
}

impl VoteEngine {
    /// Create an engine over a ledger and an indexer
    pub fn new(ledger: Arc<dyn Ledger>, indexer: Arc<dyn Indexer>, config: EngineConfig) -> Self {
        let sender = TransactionSender::new(ledger.clone());
        let poller = IndexingPoller::from_config(indexer, &config);
        let redeemer = RedeemExecutor::new(ledger.clone(), sender.clone());
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (status, _) = watch::channel(ExecutionStatus::default());

        Self {
            objects: ObjectCreator::new(sender.clone(), poller.clone()),
            relationships: RelationshipCreator::new(sender.clone(), poller.clone()),
            depositor: DepositExecutor::new(sender, redeemer.clone(), poller),
            redeemer,
            ledger,
            config,
            events,
            status: Arc::new(status),
            in_flight: Mutex::new(()),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Watch the execution status
    pub fn status(&self) -> watch::Receiver<ExecutionStatus> {
        self.status.subscribe()
    }

    /// Latest execution status
    pub fn current_status(&self) -> ExecutionStatus {
        self.status.borrow().clone()
    }

    /// Return to `Idle`. Has no effect while a submission is running.
    pub fn reset(&self) {
        if self.in_flight.try_lock().is_ok() {
            self.status.send_replace(ExecutionStatus::default());
        }
    }

    /// Execute a cart.
    ///
    /// Fatal failures stop the submission at the phase they happen in;
    /// transactions already mined stay mined. Items that could not be
    /// executed without failing the whole cart are listed in the report.
    pub async fn submit(&self, submission: Submission) -> Result<ExecutionReport, ExecutionFailure> {
        let submission_id = SubmissionId::new();
        let progress = ProgressReporter::new(
            submission_id.clone(),
            self.events.clone(),
            self.status.clone(),
        );

        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!(submission_id = %submission_id, "Submission rejected, another one is running");
            return Err(ExecutionFailure::from_engine_error(
                EngineError::AlreadyInProgress,
                Some(Phase::Preflight),
            ));
        };

        let span = info_span!(
            "submission",
            submission_id = %submission_id,
            subject = %submission.subject_id,
            items = submission.items.len()
        );

        let mut phase = Phase::Preflight;
        let result = self
            .execute(submission, &progress, &mut phase)
            .instrument(span)
            .await;

        match result {
            Ok(report) => {
                progress.succeed(report.transaction_count());
                info!(
                    submission_id = %submission_id,
                    transactions = report.transaction_count(),
                    skipped = report.skipped.len(),
                    "Submission succeeded"
                );
                Ok(report)
            }
            Err(e) => {
                let failure = ExecutionFailure::from_engine_error(e, Some(phase));
                error!(
                    submission_id = %submission_id,
                    phase = %phase,
                    code = ?failure.code,
                    error = %failure.message,
                    "Submission failed"
                );
                progress.fail(&failure);
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        submission: Submission,
        progress: &ProgressReporter,
        phase: &mut Phase,
    ) -> Result<ExecutionReport, EngineError> {
        let mut report = ExecutionReport::new(progress.submission_id().clone());

        let preflight = self.preflight(&submission).await?;
        let Preflight {
            account,
            contract,
            classification,
        } = preflight;

        let mut ctx = SubmissionContext::new(
            account,
            submission.subject_id,
            contract,
            self.config.curve_ids,
            progress.clone(),
        );

        let plans_relationships = classification.creates_relationships();
        let plans_deposit = classification.deposits_existing();
        let total_steps = [
            !classification.needs_object.is_empty(),
            plans_relationships,
            !classification.needs_redeem.is_empty(),
            plans_deposit,
        ]
        .iter()
        .filter(|planned| **planned)
        .count();
        progress.begin(total_steps);
        info!(
            total_steps,
            relationships = classification.groups.len(),
            needs_object = classification.needs_object.len(),
            needs_relationship = classification.needs_relationship.len(),
            needs_redeem = classification.needs_redeem.len(),
            direct_deposit = classification.direct_deposit.len(),
            "Execution planned"
        );

        let Classification {
            needs_object,
            mut needs_relationship,
            needs_redeem,
            direct_deposit,
            ..
        } = classification;

        if !needs_object.is_empty() {
            *phase = Phase::CreatingObjects;
            progress.phase_started(*phase);
            let created = self.objects.create_objects(&ctx, needs_object).await?;
            report.objects_created += created.created;
            report.hashes.object_creation.extend(created.hashes);
            report.skipped.extend(created.skipped);
            needs_relationship.extend(created.items);
            progress.phase_completed(*phase);
        }

        let mut to_deposit = Vec::new();
        if needs_relationship.is_empty() && plans_relationships {
            // every item behind a new object was dropped
            progress.drop_planned();
        }
        if !needs_relationship.is_empty() {
            *phase = Phase::CreatingRelationships;
            progress.phase_started(*phase);
            let created = self
                .relationships
                .create_relationships(&ctx, needs_relationship)
                .await?;
            report.relationships_created += created.created;
            report.total_deposited = report.total_deposited.saturating_add(created.deposited);
            report.hashes.relationship_creation.extend(created.hashes);
            report.skipped.extend(created.skipped);
            to_deposit.extend(created.rerouted);
            progress.phase_completed(*phase);
        }

        if !needs_redeem.is_empty() {
            *phase = Phase::Redeeming;
            progress.phase_started(*phase);
            let positions = positions_from_items(&needs_redeem);
            let redeemed = self
                .redeemer
                .redeem_positions(&ctx, &positions, Phase::Redeeming)
                .await?;
            report.total_withdrawn = report.total_withdrawn.saturating_add(redeemed.total_shares);
            report.hashes.redeem.extend(redeemed.hash);
            progress.phase_completed(*phase);
        }

        // rerouted items were already in the plan as relationship creations
        let rerouted_only = !plans_deposit && !to_deposit.is_empty();
        to_deposit.extend(needs_redeem);
        to_deposit.extend(direct_deposit);

        if !to_deposit.is_empty() {
            if rerouted_only {
                progress.extend_total(1);
            }
            *phase = Phase::Depositing;
            progress.phase_started(*phase);
            let deposited = self.depositor.deposit(&mut ctx, to_deposit).await?;
            report.total_withdrawn = report
                .total_withdrawn
                .saturating_add(deposited.blocking_redeem.total_shares);
            report.hashes.redeem.extend(deposited.blocking_redeem.hash);
            report.total_deposited = report.total_deposited.saturating_add(deposited.deposited);
            report.hashes.deposit.extend(deposited.hashes);
            report.skipped.extend(deposited.skipped);
            progress.phase_completed(*phase);
        }

        Ok(report)
    }

    async fn preflight(&self, submission: &Submission) -> Result<Preflight, EngineError> {
        if submission.items.is_empty() {
            return Err(EngineError::EmptyCart);
        }
        let account = self.ledger.account().ok_or(EngineError::WalletNotConnected)?;
        if !self.ledger.is_ready() {
            return Err(EngineError::ClientNotReady);
        }

        for item in &submission.items {
            item.validate_shape().map_err(|reason| EngineError::InvalidItem {
                item_id: item.id.clone(),
                reason,
            })?;
        }

        // dropped later by the creators, so they are not held to a minimum
        let (against_on_new, executable): (Vec<CartItem>, Vec<CartItem>) = submission
            .items
            .iter()
            .cloned()
            .partition(|item| item.direction == Direction::Against && !item.relationship_exists());

        if !against_on_new.is_empty() {
            let ids: Vec<String> = against_on_new.iter().map(|i| i.id.clone()).collect();
            if self.config.reject_against_on_new_relationship {
                return Err(EngineError::AgainstOnNewRelationship(ids));
            }
            warn!(
                items = ?ids,
                reason = %SkipReason::AgainstOnNewRelationship,
                "Against votes on new relationships will be dropped"
            );
        }

        let contract = self.ledger.contract_config().await?;
        let mut items = validate_amounts(&executable, &contract, self.config.dust_tolerance)?;
        items.extend(against_on_new);

        Ok(Preflight {
            account,
            contract,
            classification: classify(&submission.subject_id, &items),
        })
    }
}
