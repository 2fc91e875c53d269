//! Balanced reviewer assignment.
//!
//! Everybody who owns or co-owns a submission of the round reviews other
//! submissions. With `n` submissions, `n` reviewers and a load of `k`, every
//! submission receives exactly `k` reviews and every reviewer performs
//! exactly `k` reviews.
//!
//! The assignment is a round-robin greedy without backtracking: repeatedly
//! take the submission with the fewest reviews and hand it to the next
//! eligible reviewer after a rotating cursor. Some conflict structures admit
//! a balanced assignment that this order misses (for example when one
//! reviewer co-owns most submissions); those runs fail with
//! [`Error::NoEligibleReviewer`] instead of returning a partial plan.

use {
    super::{ReviewAllocationId, RoundId, SubmissionId, UserId, submission::Submission},
    crate::Error,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::HashSet,
};

/// A review task of one reviewer for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAllocation {
    pub id: ReviewAllocationId,
    pub round: RoundId,
    pub reviewer: UserId,
    pub submission: SubmissionId,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Pending,
    Completed,
}

/// A planned allocation that has not been stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub reviewer: UserId,
    pub submission: SubmissionId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub allocations: usize,
    pub submissions: usize,
    pub reviewers: usize,
    pub reviews_per_submission: u32,
    pub tasks_per_reviewer: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub assignments: Vec<Assignment>,
    pub stats: Stats,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewAllocator;

impl ReviewAllocator {
    /// The distinct owners and co-owners of `submissions` in order of first
    /// appearance.
    pub fn reviewers(submissions: &[Submission]) -> Vec<UserId> {
        let mut seen = HashSet::new();
        submissions
            .iter()
            .flat_map(Submission::conflict_set)
            .filter(|user| seen.insert(*user))
            .collect()
    }

    /// Plans `tasks_per_reviewer` reviews for every reviewer and as many
    /// reviews for every submission. Either the whole plan succeeds or
    /// nothing is returned.
    pub fn allocate(
        &self,
        submissions: &[Submission],
        tasks_per_reviewer: u32,
    ) -> Result<Plan, Error> {
        if tasks_per_reviewer == 0 {
            return Err(Error::InvalidTasksPerReviewer);
        }
        let reviewers = Self::reviewers(submissions);
        if reviewers.len() != submissions.len() {
            return Err(Error::ImbalancedReviewLoad {
                submissions: submissions.len(),
                reviewers: reviewers.len(),
            });
        }

        let load = usize::try_from(tasks_per_reviewer).map_err(|_| Error::InvalidTasksPerReviewer)?;
        let mut review_count = vec![0usize; submissions.len()];
        let mut task_count = vec![0usize; reviewers.len()];
        let mut existing: HashSet<Assignment> = HashSet::new();
        let mut assignments = Vec::with_capacity(submissions.len() * load);
        let mut cursor = 0;

        for _ in 0..submissions.len() * load {
            // `min_by_key` keeps the first of equal elements, so ties go to
            // the earlier submission.
            let (index, submission) = submissions
                .iter()
                .enumerate()
                .min_by_key(|(index, _)| review_count[*index])
                .expect("loop only runs with submissions");

            let chosen = (0..reviewers.len())
                .map(|offset| (cursor + offset) % reviewers.len())
                .find(|candidate| {
                    let reviewer = reviewers[*candidate];
                    task_count[*candidate] < load
                        && !submission.is_conflicted(reviewer)
                        && !existing.contains(&Assignment {
                            reviewer,
                            submission: submission.id,
                        })
                })
                .ok_or(Error::NoEligibleReviewer(submission.id))?;
            cursor = (chosen + 1) % reviewers.len();

            let assignment = Assignment {
                reviewer: reviewers[chosen],
                submission: submission.id,
            };
            existing.insert(assignment);
            assignments.push(assignment);
            task_count[chosen] += 1;
            review_count[index] += 1;
        }

        Ok(Plan {
            stats: Stats {
                allocations: assignments.len(),
                submissions: submissions.len(),
                reviewers: reviewers.len(),
                reviews_per_submission: tasks_per_reviewer,
                tasks_per_reviewer,
            },
            assignments,
        })
    }
}
