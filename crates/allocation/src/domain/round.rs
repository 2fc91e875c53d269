use {
    super::RoundId,
    crate::Error,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// One bidding round. Operators create it, start it and the allocation
/// completes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub name: String,
    pub kind: Kind,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// What the bids of a round compete for.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Kind {
    /// Bids on resources (songs).
    ResourceAuction,
    /// Bids on half-finished submissions that the winner completes.
    SubmissionAuction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Pending,
    Active,
    Completed,
}

impl Round {
    pub fn new(id: RoundId, name: String, kind: Kind, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            kind,
            status: Status::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == Status::Active
    }

    pub fn ensure_active(&self) -> Result<(), Error> {
        match self.status {
            Status::Active => Ok(()),
            _ => Err(Error::RoundNotActive(self.id)),
        }
    }

    /// Opens the round for bidding.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        self.transition(Status::Active)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Closes the round. Completion is terminal.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        self.transition(Status::Completed)?;
        self.completed_at = Some(now);
        Ok(())
    }

    // Status only ever moves one step forward.
    fn transition(&mut self, to: Status) -> Result<(), Error> {
        let allowed = matches!(
            (self.status, to),
            (Status::Pending, Status::Active) | (Status::Active, Status::Completed)
        );
        if !allowed {
            return Err(Error::InvalidTransition {
                round: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round() -> Round {
        Round::new(RoundId(1), "first".into(), Kind::ResourceAuction, Utc::now())
    }

    #[test]
    fn moves_forward_through_lifecycle() {
        let mut round = round();
        assert!(round.ensure_active().is_err());

        round.start(Utc::now()).unwrap();
        assert!(round.is_active());
        assert!(round.started_at.is_some());

        round.complete(Utc::now()).unwrap();
        assert_eq!(round.status, Status::Completed);
        assert!(round.completed_at.is_some());
    }

    #[test]
    fn rejects_skipping_and_going_back() {
        let mut round = round();
        assert!(matches!(
            round.complete(Utc::now()),
            Err(Error::InvalidTransition {
                from: Status::Pending,
                to: Status::Completed,
                ..
            })
        ));

        round.start(Utc::now()).unwrap();
        round.complete(Utc::now()).unwrap();
        assert!(round.start(Utc::now()).is_err());
        assert!(round.complete(Utc::now()).is_err());
        assert_eq!(round.status, Status::Completed);
    }

    #[test]
    fn kind_names() {
        assert_eq!(Kind::SubmissionAuction.to_string(), "submission_auction");
        assert_eq!(
            "resource_auction".parse::<Kind>().unwrap(),
            Kind::ResourceAuction
        );
    }
}
