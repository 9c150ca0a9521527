use crate::application::progress::ProgressReporter;
use crate::domain::events::SubmissionId;
use crate::domain::ledger::ContractConfig;
use crate::types::{Address, CurveIds, TermId};

/// State shared by the phases of one submission
pub struct SubmissionContext {
    /// Submission id
    pub submission_id: SubmissionId,

    /// Signer account receiving shares and assets
    pub account: Address,

    /// Subject of every relationship in the cart
    pub subject: TermId,

    /// Protocol constants read at the start of the submission
    pub contract: ContractConfig,

    /// Ledger curve ids
    pub curve_ids: CurveIds,

    /// Progress publisher
    pub progress: ProgressReporter,

    /// Set once the counter-vault recovery cascade ran; it runs at most once
    pub recovery_attempted: bool,
}

impl SubmissionContext {
    /// Create a context
    pub fn new(
        account: Address,
        subject: TermId,
        contract: ContractConfig,
        curve_ids: CurveIds,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            submission_id: progress.submission_id().clone(),
            account,
            subject,
            contract,
            curve_ids,
            progress,
            recovery_attempted: false,
        }
    }
}
