//! Entry points of the allocation engine.
//!
//! Every operation that changes the state of a round runs under that
//! round's lock, so two allocations of the same round never interleave
//! while different rounds proceed in parallel.

use {
    crate::{
        Configuration,
        Error,
        domain::{
            BidId,
            ReviewAllocationId,
            RoundId,
            SubmissionId,
            Tokens,
            UserId,
            auction::{self, AllocationResult, AuctionAllocator, Outcome},
            bid::{Bid, Placement, Target},
            ledger::{self, FailedDebit},
            review::{self, ReviewAllocation, ReviewAllocator},
            round::{self, Round},
            score::{NewReview, ReviewRecord, ScoreAggregator},
            submission::{self, Submission},
        },
        infra::Repositories,
    },
    chrono::Utc,
    dashmap::DashMap,
    observe::metrics,
    rand::{SeedableRng, rngs::StdRng},
    serde::Serialize,
    std::{
        sync::{Arc, Mutex},
        time::Instant,
    },
};

/// What an auction run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub round: RoundId,
    pub stats: auction::Stats,
    pub results: Vec<AllocationResult>,
    pub unallocated_bidders: Vec<UserId>,
    /// Winners that keep their target although their price couldn't be
    /// taken from their balance.
    pub failed_debits: Vec<FailedDebit>,
}

pub struct RoundCoordinator {
    repositories: Repositories,
    config: Configuration,
    auction: AuctionAllocator,
    scores: ScoreAggregator,
    locks: DashMap<RoundId, Arc<tokio::sync::Mutex<()>>>,
    rng: Mutex<StdRng>,
}

impl RoundCoordinator {
    pub fn new(repositories: Repositories, config: Configuration) -> Self {
        Self {
            repositories,
            auction: AuctionAllocator::new(config.fallback_submission_cost),
            scores: ScoreAggregator::new(config.max_score),
            config,
            locks: Default::default(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the source of randomness used for tie-breaks and fallback
    /// picks.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub async fn create_round(&self, name: String, kind: round::Kind) -> Result<Round, Error> {
        let round = self.repositories.rounds.create(name, kind).await?;
        tracing::info!(round = %round.id, %kind, "created round");
        Ok(round)
    }

    #[tracing::instrument(skip_all, fields(round = %id))]
    pub async fn start_round(&self, id: RoundId) -> Result<Round, Error> {
        let lock = self.lock(id);
        let _guard = lock.lock().await;

        let mut round = self.load_round(id).await?;
        round.start(Utc::now())?;
        self.repositories.rounds.save(&round).await?;
        tracing::info!("opened round for bidding");
        Ok(round)
    }

    pub async fn round(&self, id: RoundId) -> Result<Round, Error> {
        self.load_round(id).await
    }

    #[tracing::instrument(skip_all, fields(round = %round_id, %bidder, %target))]
    pub async fn place_bid(
        &self,
        round_id: RoundId,
        bidder: UserId,
        target: Target,
        amount: Tokens,
    ) -> Result<Bid, Error> {
        let lock = self.lock(round_id);
        let _guard = lock.lock().await;

        let round = self.load_round(round_id).await?;
        round.ensure_active()?;
        let listed = self
            .repositories
            .catalog
            .all_targets(round_id)
            .await?
            .iter()
            .any(|entry| entry.target == target);
        let balance = self.repositories.ledger.balance(bidder).await?;
        let existing = self.repositories.bids.bids_of(round_id, bidder).await?;

        let placement = Placement {
            round: &round,
            bidder,
            target,
            amount,
            listed,
            balance,
            existing: &existing,
            max_bids_per_user: self.config.max_bids_per_user,
        };
        placement.validate()?;
        let bid = self
            .repositories
            .bids
            .insert(placement.into_new_bid(Utc::now()))
            .await?;
        tracing::debug!(bid = %bid.id, amount, "placed bid");
        Ok(bid)
    }

    /// Removes an active bid of an active round.
    pub async fn withdraw_bid(&self, id: BidId, bidder: UserId) -> Result<(), Error> {
        let bid = self.load_bid(id, bidder).await?;
        let lock = self.lock(bid.round);
        let _guard = lock.lock().await;

        // The bid may have been dropped while waiting for the lock.
        let bid = self.load_bid(id, bidder).await?;
        self.load_round(bid.round).await?.ensure_active()?;
        self.repositories.bids.remove(id).await?;
        tracing::debug!(bid = %id, round = %bid.round, "withdrew bid");
        Ok(())
    }

    /// All bids of `user` in the round, highest amount first.
    pub async fn user_bids(&self, round: RoundId, user: UserId) -> Result<Vec<Bid>, Error> {
        let mut bids = self.repositories.bids.bids_of(round, user).await?;
        bids.sort_by_key(|bid| std::cmp::Reverse(bid.amount));
        Ok(bids)
    }

    pub async fn user_results(
        &self,
        round: RoundId,
        user: UserId,
    ) -> Result<Vec<AllocationResult>, Error> {
        let mut results = self.repositories.results.results(round).await?;
        results.retain(|result| result.winner == user);
        Ok(results)
    }

    /// Clears the bids of an active round, completes it and charges the
    /// winners.
    #[tracing::instrument(skip_all, fields(round = %id))]
    pub async fn allocate_round(
        &self,
        id: RoundId,
        options: auction::Options,
    ) -> Result<RoundReport, Error> {
        let result: Result<RoundReport, Error> = async {
            let lock = self.lock(id);
            let _guard = lock.lock().await;

            let mut round = self.load_round(id).await?;
            round.ensure_active()?;
            let outcome = self.clear(&round, options, &[]).await?;
            round.complete(Utc::now())?;
            self.repositories.rounds.save(&round).await?;
            self.settle(&round, outcome).await
        }
        .await;
        Metrics::auction_run("allocate", &result);
        result
    }

    /// Runs the auction of a completed round again.
    ///
    /// Bids the previous run dropped take part again. The charged prices of
    /// the previous results are given back once the new results replaced
    /// them, before the new winners get charged.
    #[tracing::instrument(skip_all, fields(round = %id))]
    pub async fn reallocate_round(
        &self,
        id: RoundId,
        options: auction::Options,
    ) -> Result<RoundReport, Error> {
        let result: Result<RoundReport, Error> = async {
            let lock = self.lock(id);
            let _guard = lock.lock().await;

            let round = self.load_round(id).await?;
            if round.status != round::Status::Completed {
                return Err(Error::RoundNotCompleted(id));
            }
            let previous = self.repositories.results.results(id).await?;
            self.repositories.bids.restore_dropped(id).await?;
            let outcome = self.clear(&round, options, &previous).await?;
            self.settle(&round, outcome).await
        }
        .await;
        Metrics::auction_run("reallocate", &result);
        result
    }

    /// Uses the configured preference for own submissions.
    pub fn default_options(&self) -> auction::Options {
        auction::Options {
            prefer_own_submission: self.config.prefer_own_submission,
        }
    }

    /// Plans and stores a balanced set of review tasks for the submissions
    /// of the round, replacing any earlier plan. Nothing gets stored if no
    /// balanced plan is found.
    #[tracing::instrument(skip_all, fields(round = %id))]
    pub async fn allocate_reviews(
        &self,
        id: RoundId,
        tasks_per_reviewer: Option<u32>,
    ) -> Result<review::Stats, Error> {
        let result: Result<review::Stats, Error> = async {
            let lock = self.lock(id);
            let _guard = lock.lock().await;

            self.load_round(id).await?;
            let tasks = tasks_per_reviewer.unwrap_or(self.config.tasks_per_reviewer);
            let submissions = self.repositories.submissions.by_submission_criteria(id).await?;

            let start = Instant::now();
            let plan = ReviewAllocator.allocate(&submissions, tasks)?;
            metrics::metrics().measure_phase(start, "reviews", "plan");

            self.repositories
                .reviews
                .replace_allocations(id, &plan.assignments)
                .await?;
            for mut submission in submissions {
                if submission.status == submission::Status::FullyReviewed {
                    continue;
                }
                submission.status = submission::Status::UnderReview;
                submission.tally.review_quota = Some(tasks);
                self.repositories.submissions.save(&submission).await?;
            }
            tracing::info!(stats = ?plan.stats, "allocated reviews");
            Ok(plan.stats)
        }
        .await;
        Metrics::review_allocation_run(&result);
        result
    }

    pub async fn review_allocations(&self, round: RoundId) -> Result<Vec<ReviewAllocation>, Error> {
        Ok(self.repositories.reviews.allocations(round).await?)
    }

    /// Scores the submission of a pending review task and completes the
    /// task.
    #[tracing::instrument(skip_all, fields(allocation = %id))]
    pub async fn submit_review(
        &self,
        id: ReviewAllocationId,
        score: u32,
        comment: String,
        favorite: bool,
    ) -> Result<ReviewRecord, Error> {
        let round = self.load_allocation(id).await?.round;
        let lock = self.lock(round);
        let _guard = lock.lock().await;

        let allocation = self.load_allocation(id).await?;
        if allocation.status == review::Status::Completed {
            return Err(Error::AllocationAlreadyCompleted(id));
        }
        self.scores.check(score)?;
        let mut submission = self.load_submission(allocation.submission).await?;
        if submission.is_conflicted(allocation.reviewer) {
            return Err(Error::SelfReviewAttempt {
                reviewer: allocation.reviewer,
                submission: submission.id,
            });
        }

        let now = Utc::now();
        let record = self
            .repositories
            .reviews
            .insert_review(NewReview {
                allocation: Some(id),
                reviewer: allocation.reviewer,
                submission: submission.id,
                score,
                comment,
                favorite,
                created_at: now,
            })
            .await?;
        self.repositories.reviews.complete_allocation(id).await?;
        if self.scores.record(&mut submission, score, now) {
            tracing::info!(submission = %submission.id, "submission fully reviewed");
        }
        self.repositories.submissions.save(&submission).await?;

        Metrics::review_submitted("allocated");
        Ok(record)
    }

    /// Scores a submission outside of the balanced plan. Submitting again
    /// with the same comment and favorite flag replaces the earlier score.
    #[tracing::instrument(skip_all, fields(%reviewer, submission = %submission_id))]
    pub async fn submit_extra_review(
        &self,
        reviewer: UserId,
        submission_id: SubmissionId,
        score: u32,
        comment: String,
        favorite: bool,
    ) -> Result<ReviewRecord, Error> {
        let round = self.load_submission(submission_id).await?.round;
        let lock = self.lock(round);
        let _guard = lock.lock().await;

        let mut submission = self.load_submission(submission_id).await?;
        self.scores.check(score)?;
        if submission.is_conflicted(reviewer) {
            return Err(Error::SelfReviewAttempt {
                reviewer,
                submission: submission_id,
            });
        }

        let existing = self
            .repositories
            .reviews
            .find_extra_review(reviewer, submission_id, &comment, favorite)
            .await?;
        let record = match existing {
            Some(mut record) => {
                let previous = record.score;
                record.score = score;
                self.repositories.reviews.update_review(&record).await?;
                self.scores.revise(&mut submission, previous, score);
                Metrics::review_submitted("extra_update");
                record
            }
            None => {
                let now = Utc::now();
                let record = self
                    .repositories
                    .reviews
                    .insert_review(NewReview {
                        allocation: None,
                        reviewer,
                        submission: submission_id,
                        score,
                        comment,
                        favorite,
                        created_at: now,
                    })
                    .await?;
                if self.scores.record(&mut submission, score, now) {
                    tracing::info!(submission = %submission_id, "submission fully reviewed");
                }
                Metrics::review_submitted("extra");
                record
            }
        };
        self.repositories.submissions.save(&submission).await?;
        Ok(record)
    }

    pub async fn submission(&self, id: SubmissionId) -> Result<Submission, Error> {
        self.load_submission(id).await
    }

    /// Runs the auction and stores its results and dropped bids. The
    /// `previous` results get refunded as soon as the new ones are stored,
    /// so a failed store leaves them charged for the next attempt.
    async fn clear(
        &self,
        round: &Round,
        options: auction::Options,
        previous: &[AllocationResult],
    ) -> Result<Outcome, Error> {
        let bids = self.repositories.bids.active_bids(round.id).await?;
        let catalog = self.repositories.catalog.all_targets(round.id).await?;

        let start = Instant::now();
        let outcome = {
            let mut rng = self.rng.lock().unwrap();
            self.auction
                .allocate(round, bids, &catalog, options, &mut *rng)
        };
        metrics::metrics().measure_phase(start, "auction", "clear");

        self.repositories
            .results
            .replace_results(round.id, &outcome.results)
            .await?;
        if !previous.is_empty() {
            ledger::refund(self.repositories.ledger.as_ref(), previous).await;
            tracing::debug!(previous = previous.len(), "refunded previous results");
        }
        self.repositories.bids.mark_dropped(&outcome.dropped).await?;
        Ok(outcome)
    }

    /// Charges the winners. Failed debits are reported, never rolled back.
    async fn settle(&self, round: &Round, outcome: Outcome) -> Result<RoundReport, Error> {
        let debits = ledger::settle(self.repositories.ledger.as_ref(), &outcome.results).await;
        self.repositories
            .results
            .mark_charged(round.id, &debits.charged)
            .await?;

        let mut results = outcome.results;
        for result in &mut results {
            result.charged = debits.charged.contains(&result.winner);
        }
        let report = RoundReport {
            round: round.id,
            stats: outcome.stats,
            results,
            unallocated_bidders: outcome.unallocated_bidders,
            failed_debits: debits.failed,
        };
        Metrics::round_settled(round.kind, &report);
        tracing::info!(
            stats = ?report.stats,
            failed_debits = report.failed_debits.len(),
            "allocated round"
        );
        Ok(report)
    }

    fn lock(&self, round: RoundId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(round).or_default().clone()
    }

    async fn load_round(&self, id: RoundId) -> Result<Round, Error> {
        self.repositories
            .rounds
            .get(id)
            .await?
            .ok_or(Error::RoundNotFound(id))
    }

    async fn load_bid(&self, id: BidId, bidder: UserId) -> Result<Bid, Error> {
        self.repositories
            .bids
            .get(id)
            .await?
            .filter(|bid| bid.bidder == bidder && bid.is_active())
            .ok_or(Error::BidNotFound(id))
    }

    async fn load_submission(&self, id: SubmissionId) -> Result<Submission, Error> {
        self.repositories
            .submissions
            .get(id)
            .await?
            .ok_or(Error::SubmissionNotFound(id))
    }

    async fn load_allocation(&self, id: ReviewAllocationId) -> Result<ReviewAllocation, Error> {
        self.repositories
            .reviews
            .allocation(id)
            .await?
            .ok_or(Error::AllocationNotFound(id))
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "allocation")]
struct Metrics {
    /// Auction runs by operation and result.
    #[metric(labels("operation", "result"))]
    auction_runs: prometheus::IntCounterVec,

    /// Allocation results by round kind and method.
    #[metric(labels("kind", "method"))]
    results: prometheus::IntCounterVec,

    /// Bidders that ended an auction without a target.
    unallocated_bidders: prometheus::IntCounter,

    /// Winners whose price could not be debited.
    failed_debits: prometheus::IntCounter,

    /// Review allocation runs by result.
    #[metric(labels("result"))]
    review_allocation_runs: prometheus::IntCounterVec,

    /// Submitted reviews by kind.
    #[metric(labels("kind"))]
    reviews_submitted: prometheus::IntCounterVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(metrics::get_storage_registry()).unwrap()
    }

    fn auction_run<T>(operation: &str, result: &Result<T, Error>) {
        Self::get()
            .auction_runs
            .with_label_values(&[operation, result_label(result)])
            .inc();
    }

    fn round_settled(kind: round::Kind, report: &RoundReport) {
        let metrics = Self::get();
        let kind = kind.to_string();
        for result in &report.results {
            metrics
                .results
                .with_label_values(&[kind.as_str(), result.method.to_string().as_str()])
                .inc();
        }
        metrics
            .unallocated_bidders
            .inc_by(report.unallocated_bidders.len() as u64);
        metrics
            .failed_debits
            .inc_by(report.failed_debits.len() as u64);
    }

    fn review_allocation_run<T>(result: &Result<T, Error>) {
        Self::get()
            .review_allocation_runs
            .with_label_values(&[result_label(result)])
            .inc();
    }

    fn review_submitted(kind: &str) {
        Self::get().reviews_submitted.with_label_values(&[kind]).inc();
    }
}

fn result_label<T>(result: &Result<T, Error>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(Error::NoEligibleReviewer(_)) => "no_eligible_reviewer",
        Err(Error::ImbalancedReviewLoad { .. }) => "imbalanced",
        Err(Error::RoundNotFound(_)) => "round_not_found",
        Err(Error::RoundNotActive(_)) | Err(Error::RoundNotCompleted(_)) => "invalid_state",
        Err(_) => "error",
    }
}
