//! Repository ports the engine talks to, and an in-memory implementation
//! of all of them.
//!
//! The ports return `anyhow::Result` because failures of the persistence
//! layer are not part of the engine's domain; they surface as
//! [`crate::Error::Repository`].

pub mod memory;

use {
    crate::domain::{
        BidId,
        ReviewAllocationId,
        RoundId,
        SubmissionId,
        UserId,
        auction::{AllocationResult, CatalogEntry},
        bid::{Bid, NewBid},
        ledger::Ledger,
        review::{Assignment, ReviewAllocation},
        round::{self, Round},
        score::{NewReview, ReviewRecord},
        submission::Submission,
    },
    anyhow::Result,
    std::sync::Arc,
};

pub use memory::InMemory;

#[async_trait::async_trait]
pub trait RoundStore: Send + Sync {
    async fn create(&self, name: String, kind: round::Kind) -> Result<Round>;
    async fn get(&self, id: RoundId) -> Result<Option<Round>>;
    async fn save(&self, round: &Round) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BidSource: Send + Sync {
    /// Bids of the round that have not been dropped.
    async fn active_bids(&self, round: RoundId) -> Result<Vec<Bid>>;
    /// All bids of a user in the round, dropped ones included.
    async fn bids_of(&self, round: RoundId, bidder: UserId) -> Result<Vec<Bid>>;
    async fn get(&self, id: BidId) -> Result<Option<Bid>>;
    async fn insert(&self, bid: NewBid) -> Result<Bid>;
    async fn remove(&self, id: BidId) -> Result<()>;
    async fn mark_dropped(&self, ids: &[BidId]) -> Result<()>;
    /// Reactivates every dropped bid of the round.
    async fn restore_dropped(&self, round: RoundId) -> Result<()>;
}

#[async_trait::async_trait]
pub trait TargetCatalog: Send + Sync {
    /// Every target that can be allocated in the round.
    async fn all_targets(&self, round: RoundId) -> Result<Vec<CatalogEntry>>;
}

#[async_trait::async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Submissions of the round that take part in peer review, with their
    /// conflict sets resolved.
    async fn by_submission_criteria(&self, round: RoundId) -> Result<Vec<Submission>>;
    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>>;
    async fn save(&self, submission: &Submission) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ResultSink: Send + Sync {
    /// Atomically replaces all results of the round.
    async fn replace_results(&self, round: RoundId, results: &[AllocationResult]) -> Result<()>;
    async fn results(&self, round: RoundId) -> Result<Vec<AllocationResult>>;
    async fn mark_charged(&self, round: RoundId, winners: &[UserId]) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ReviewSink: Send + Sync {
    /// Atomically replaces all review allocations of the round.
    async fn replace_allocations(
        &self,
        round: RoundId,
        assignments: &[Assignment],
    ) -> Result<Vec<ReviewAllocation>>;
    async fn allocation(&self, id: ReviewAllocationId) -> Result<Option<ReviewAllocation>>;
    async fn allocations(&self, round: RoundId) -> Result<Vec<ReviewAllocation>>;
    async fn complete_allocation(&self, id: ReviewAllocationId) -> Result<()>;
    async fn insert_review(&self, review: NewReview) -> Result<ReviewRecord>;
    /// The extra review (one without allocation) with exactly this key.
    async fn find_extra_review(
        &self,
        reviewer: UserId,
        submission: SubmissionId,
        comment: &str,
        favorite: bool,
    ) -> Result<Option<ReviewRecord>>;
    async fn update_review(&self, review: &ReviewRecord) -> Result<()>;
    async fn reviews_of(&self, submission: SubmissionId) -> Result<Vec<ReviewRecord>>;
}

/// Every port the coordinator needs.
#[derive(Clone)]
pub struct Repositories {
    pub rounds: Arc<dyn RoundStore>,
    pub bids: Arc<dyn BidSource>,
    pub catalog: Arc<dyn TargetCatalog>,
    pub submissions: Arc<dyn SubmissionSource>,
    pub results: Arc<dyn ResultSink>,
    pub reviews: Arc<dyn ReviewSink>,
    pub ledger: Arc<dyn Ledger>,
}

impl Repositories {
    /// Backs every port with the same in-memory store.
    pub fn in_memory(store: Arc<InMemory>) -> Self {
        Self {
            rounds: store.clone(),
            bids: store.clone(),
            catalog: store.clone(),
            submissions: store.clone(),
            results: store.clone(),
            reviews: store.clone(),
            ledger: store,
        }
    }
}
