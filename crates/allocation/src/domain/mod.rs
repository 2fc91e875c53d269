pub mod auction;
pub mod bid;
pub mod ledger;
pub mod review;
pub mod round;
pub mod score;
pub mod submission;

pub use {
    auction::{AllocationResult, AuctionAllocator, CatalogEntry, Method},
    bid::{Bid, Target},
    ledger::Ledger,
    review::{ReviewAllocation, ReviewAllocator},
    round::Round,
    score::{ReviewRecord, ScoreAggregator},
    submission::Submission,
};

/// Token amounts: bids, prices and balances. Never negative.
pub type Tokens = u64;

macro_rules! id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            derive_more::Display,
            derive_more::From,
            derive_more::Into,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);
    };
}

id!(
    /// Identifies a bidding round.
    RoundId
);
id!(
    /// Identifies a participant (bidder, owner or reviewer).
    UserId
);
id!(
    /// Identifies an auctionable resource (a song).
    ResourceId
);
id!(
    /// Identifies a submitted work.
    SubmissionId
);
id!(BidId);
id!(ReviewAllocationId);
id!(ReviewId);
