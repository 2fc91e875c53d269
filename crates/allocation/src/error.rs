use crate::domain::{
    BidId,
    ReviewAllocationId,
    RoundId,
    SubmissionId,
    Tokens,
    UserId,
    bid::Target,
    ledger::LedgerError,
    round,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("round {0} not found")]
    RoundNotFound(RoundId),
    #[error("round {0} is not active")]
    RoundNotActive(RoundId),
    #[error("round {0} has not been allocated yet")]
    RoundNotCompleted(RoundId),
    #[error("round {round} cannot move from {from} to {to}")]
    InvalidTransition {
        round: RoundId,
        from: round::Status,
        to: round::Status,
    },
    #[error("user {bidder} already has an active bid on {target}")]
    DuplicateBid { bidder: UserId, target: Target },
    #[error("user {bidder} already has {limit} active bids in this round")]
    BidLimitExceeded { bidder: UserId, limit: u32 },
    #[error("bid amount must be positive")]
    InvalidBidAmount,
    #[error("user {user} has {balance} tokens but {requested} are required")]
    InsufficientBalance {
        user: UserId,
        balance: Tokens,
        requested: Tokens,
    },
    #[error("user {0} has no account")]
    UnknownAccount(UserId),
    #[error("bid {0} not found")]
    BidNotFound(BidId),
    #[error("{0} is not part of the round")]
    TargetNotFound(Target),
    #[error("{target} can't be auctioned in a {kind} round")]
    TargetKindMismatch { target: Target, kind: round::Kind },
    #[error("{submissions} submissions but {reviewers} reviewers")]
    ImbalancedReviewLoad {
        submissions: usize,
        reviewers: usize,
    },
    #[error("no eligible reviewer left for submission {0}")]
    NoEligibleReviewer(SubmissionId),
    #[error("tasks per reviewer must be positive")]
    InvalidTasksPerReviewer,
    #[error("user {reviewer} can't review submission {submission} they worked on")]
    SelfReviewAttempt {
        reviewer: UserId,
        submission: SubmissionId,
    },
    #[error("score {score} is outside of 0..={max}")]
    ScoreOutOfRange { score: u32, max: u32 },
    #[error("review allocation {0} not found")]
    AllocationNotFound(ReviewAllocationId),
    #[error("review allocation {0} is already completed")]
    AllocationAlreadyCompleted(ReviewAllocationId),
    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),
    #[error(transparent)]
    Repository(#[from] anyhow::Error),
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                user,
                balance,
                requested,
            } => Self::InsufficientBalance {
                user,
                balance,
                requested,
            },
            LedgerError::UnknownAccount(user) => Self::UnknownAccount(user),
            LedgerError::Other(err) => Self::Repository(err),
        }
    }
}
