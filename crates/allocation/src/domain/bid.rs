use {
    super::{BidId, ResourceId, RoundId, SubmissionId, Tokens, UserId, round},
    crate::Error,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// A sealed bid of one bidder on one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub round: RoundId,
    pub bidder: UserId,
    pub target: Target,
    pub amount: Tokens,
    /// Set by the allocator once the bid can no longer win.
    #[serde(default)]
    pub dropped: bool,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    pub fn is_active(&self) -> bool {
        !self.dropped
    }
}

/// What a bid competes for. Must match the kind of the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Resource(ResourceId),
    Submission(SubmissionId),
}

impl Target {
    /// The kind of round this target can be auctioned in.
    pub fn round_kind(&self) -> round::Kind {
        match self {
            Target::Resource(_) => round::Kind::ResourceAuction,
            Target::Submission(_) => round::Kind::SubmissionAuction,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Resource(id) => write!(f, "resource {id}"),
            Target::Submission(id) => write!(f, "submission {id}"),
        }
    }
}

/// A bid that passed validation but has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBid {
    pub round: RoundId,
    pub bidder: UserId,
    pub target: Target,
    pub amount: Tokens,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to decide whether a new bid may be placed.
#[derive(Debug)]
pub struct Placement<'a> {
    pub round: &'a round::Round,
    pub bidder: UserId,
    pub target: Target,
    pub amount: Tokens,
    /// Whether the target is part of the round's catalog.
    pub listed: bool,
    pub balance: Tokens,
    /// All bids of the bidder in this round, dropped ones included.
    pub existing: &'a [Bid],
    pub max_bids_per_user: u32,
}

impl Placement<'_> {
    /// Checks every rule a new bid has to satisfy. Nothing is stored before
    /// all of them passed.
    pub fn validate(&self) -> Result<(), Error> {
        self.round.ensure_active()?;
        if self.amount == 0 {
            return Err(Error::InvalidBidAmount);
        }
        if self.target.round_kind() != self.round.kind {
            return Err(Error::TargetKindMismatch {
                target: self.target,
                kind: self.round.kind,
            });
        }
        if !self.listed {
            return Err(Error::TargetNotFound(self.target));
        }
        // The balance is only compared against this bid; nothing gets reserved.
        if self.balance < self.amount {
            return Err(Error::InsufficientBalance {
                user: self.bidder,
                balance: self.balance,
                requested: self.amount,
            });
        }

        let active = || self.existing.iter().filter(|bid| bid.is_active());
        if active().count() >= usize::try_from(self.max_bids_per_user).unwrap_or(usize::MAX) {
            return Err(Error::BidLimitExceeded {
                bidder: self.bidder,
                limit: self.max_bids_per_user,
            });
        }
        if active().any(|bid| bid.target == self.target) {
            return Err(Error::DuplicateBid {
                bidder: self.bidder,
                target: self.target,
            });
        }
        Ok(())
    }

    pub fn into_new_bid(self, now: DateTime<Utc>) -> NewBid {
        NewBid {
            round: self.round.id,
            bidder: self.bidder,
            target: self.target,
            amount: self.amount,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::domain::round::Round};

    fn active_round() -> Round {
        let mut round = Round::new(
            RoundId(1),
            "songs".into(),
            round::Kind::ResourceAuction,
            Utc::now(),
        );
        round.start(Utc::now()).unwrap();
        round
    }

    fn bid(id: i64, resource: i64, dropped: bool) -> Bid {
        Bid {
            id: BidId(id),
            round: RoundId(1),
            bidder: UserId(7),
            target: Target::Resource(ResourceId(resource)),
            amount: 10,
            dropped,
            created_at: Utc::now(),
        }
    }

    fn placement<'a>(round: &'a Round, existing: &'a [Bid]) -> Placement<'a> {
        Placement {
            round,
            bidder: UserId(7),
            target: Target::Resource(ResourceId(1)),
            amount: 20,
            listed: true,
            balance: 100,
            existing,
            max_bids_per_user: 2,
        }
    }

    #[test]
    fn accepts_valid_bid() {
        let round = active_round();
        placement(&round, &[]).validate().unwrap();
    }

    #[test]
    fn rejects_inactive_round() {
        let round = Round::new(
            RoundId(1),
            "songs".into(),
            round::Kind::ResourceAuction,
            Utc::now(),
        );
        assert!(matches!(
            placement(&round, &[]).validate(),
            Err(Error::RoundNotActive(RoundId(1)))
        ));
    }

    #[test]
    fn rejects_bad_amount_and_target() {
        let round = active_round();

        let zero = Placement {
            amount: 0,
            ..placement(&round, &[])
        };
        assert!(matches!(zero.validate(), Err(Error::InvalidBidAmount)));

        let wrong_kind = Placement {
            target: Target::Submission(SubmissionId(1)),
            ..placement(&round, &[])
        };
        assert!(matches!(
            wrong_kind.validate(),
            Err(Error::TargetKindMismatch { .. })
        ));

        let unlisted = Placement {
            listed: false,
            ..placement(&round, &[])
        };
        assert!(matches!(unlisted.validate(), Err(Error::TargetNotFound(_))));
    }

    #[test]
    fn rejects_unaffordable_bid() {
        let round = active_round();
        let poor = Placement {
            balance: 19,
            ..placement(&round, &[])
        };
        assert!(matches!(
            poor.validate(),
            Err(Error::InsufficientBalance {
                balance: 19,
                requested: 20,
                ..
            })
        ));
    }

    #[test]
    fn enforces_limit_and_uniqueness_on_active_bids_only() {
        let round = active_round();

        let full = [bid(1, 2, false), bid(2, 3, false)];
        assert!(matches!(
            placement(&round, &full).validate(),
            Err(Error::BidLimitExceeded { limit: 2, .. })
        ));

        let duplicate = [bid(1, 1, false)];
        assert!(matches!(
            placement(&round, &duplicate).validate(),
            Err(Error::DuplicateBid { .. })
        ));

        // dropped bids neither count towards the limit nor block the target
        let dropped = [bid(1, 1, true), bid(2, 2, true), bid(3, 3, false)];
        placement(&round, &dropped).validate().unwrap();
    }
}
