use {
    super::{RoundId, SubmissionId, UserId, score::Tally},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// A submitted work that gets auctioned and peer reviewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub round: RoundId,
    pub owner: UserId,
    /// The party who completed a half-finished work.
    #[serde(default)]
    pub co_owner: Option<UserId>,
    /// Non-owning back reference from a part two to the part one it
    /// continues. Resolved through the submission store.
    #[serde(default)]
    pub part_one: Option<SubmissionId>,
    /// Owner of the part one, filled in when the submission is loaded.
    #[serde(skip)]
    pub part_one_owner: Option<UserId>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub tally: Tally,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    #[default]
    Submitted,
    UnderReview,
    FullyReviewed,
}

impl Submission {
    /// Everyone who must not review this submission.
    pub fn conflict_set(&self) -> impl Iterator<Item = UserId> + '_ {
        let co_owner = self.co_owner.filter(|co| *co != self.owner);
        let part_one_owner = self
            .part_one_owner
            .filter(|user| *user != self.owner && Some(*user) != co_owner);
        std::iter::once(self.owner)
            .chain(co_owner)
            .chain(part_one_owner)
    }

    pub fn is_conflicted(&self, user: UserId) -> bool {
        self.owner == user || self.co_owner == Some(user) || self.part_one_owner == Some(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_set_contains_owner_and_co_owner_once() {
        let mut submission = Submission {
            id: SubmissionId(1),
            round: RoundId(1),
            owner: UserId(1),
            co_owner: None,
            part_one: None,
            part_one_owner: None,
            status: Status::Submitted,
            tally: Tally::default(),
            created_at: Utc::now(),
        };
        assert_eq!(submission.conflict_set().collect::<Vec<_>>(), [UserId(1)]);

        submission.co_owner = Some(UserId(1));
        assert_eq!(submission.conflict_set().collect::<Vec<_>>(), [UserId(1)]);

        submission.co_owner = Some(UserId(2));
        assert_eq!(
            submission.conflict_set().collect::<Vec<_>>(),
            [UserId(1), UserId(2)]
        );
        assert!(submission.is_conflicted(UserId(2)));
        assert!(!submission.is_conflicted(UserId(3)));
    }

    #[test]
    fn part_one_owner_joins_recorded_co_owner() {
        let mut submission = Submission {
            id: SubmissionId(2),
            round: RoundId(2),
            owner: UserId(2),
            co_owner: Some(UserId(3)),
            part_one: Some(SubmissionId(1)),
            part_one_owner: Some(UserId(1)),
            status: Status::Submitted,
            tally: Tally::default(),
            created_at: Utc::now(),
        };
        assert_eq!(
            submission.conflict_set().collect::<Vec<_>>(),
            [UserId(2), UserId(3), UserId(1)]
        );
        assert!(submission.is_conflicted(UserId(1)));

        submission.part_one_owner = Some(UserId(3));
        assert_eq!(
            submission.conflict_set().collect::<Vec<_>>(),
            [UserId(2), UserId(3)]
        );
    }
}
