//! Review scores and their running aggregation per submission.

use {
    super::{ReviewAllocationId, ReviewId, SubmissionId, UserId, submission},
    crate::Error,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// A score given by a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: ReviewId,
    /// Absent for extra reviews outside of the balanced plan.
    pub allocation: Option<ReviewAllocationId>,
    pub reviewer: UserId,
    pub submission: SubmissionId,
    pub score: u32,
    pub comment: String,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
}

/// A review that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub allocation: Option<ReviewAllocationId>,
    pub reviewer: UserId,
    pub submission: SubmissionId,
    pub score: u32,
    pub comment: String,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
}

/// Running score state of a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tally {
    pub review_count: u32,
    pub total_score: u64,
    /// `total_score / review_count` rounded to 2 decimals.
    pub average_score: f64,
    /// Number of reviews after which the submission counts as fully
    /// reviewed. Set when reviews get allocated.
    pub review_quota: Option<u32>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Tally {
    fn refresh_average(&mut self) {
        self.average_score = match self.review_count {
            0 => 0.0,
            count => round_to_cents(self.total_score as f64 / f64::from(count)),
        };
    }
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Validates scores and folds them into the submission's [`Tally`].
#[derive(Debug, Clone, Copy)]
pub struct ScoreAggregator {
    pub max_score: u32,
}

impl ScoreAggregator {
    pub fn new(max_score: u32) -> Self {
        Self { max_score }
    }

    pub fn check(&self, score: u32) -> Result<(), Error> {
        if score > self.max_score {
            return Err(Error::ScoreOutOfRange {
                score,
                max: self.max_score,
            });
        }
        Ok(())
    }

    /// Adds a new review to the tally. Returns `true` if this review made the
    /// submission reach its review quota.
    pub fn record(
        &self,
        submission: &mut submission::Submission,
        score: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let tally = &mut submission.tally;
        tally.review_count += 1;
        tally.total_score += u64::from(score);
        tally.refresh_average();

        let quota_reached = tally
            .review_quota
            .is_some_and(|quota| tally.review_count >= quota);
        if quota_reached && submission.status != submission::Status::FullyReviewed {
            submission.status = submission::Status::FullyReviewed;
            tally.completed_at = Some(now);
            return true;
        }
        false
    }

    /// Replaces the score of an already counted review.
    pub fn revise(&self, submission: &mut submission::Submission, previous: u32, score: u32) {
        let tally = &mut submission.tally;
        tally.total_score = tally
            .total_score
            .saturating_sub(u64::from(previous))
            .saturating_add(u64::from(score));
        tally.refresh_average();
    }
}
