//! In-memory repositories.
//!
//! Rows live in flat maps keyed by id. References between rows (a bid's
//! round, a part two's part one) are ids, never pointers, and get resolved
//! on read.

use {
    super::{BidSource, ResultSink, ReviewSink, RoundStore, SubmissionSource, TargetCatalog},
    crate::domain::{
        BidId,
        ResourceId,
        ReviewAllocationId,
        ReviewId,
        RoundId,
        SubmissionId,
        Tokens,
        UserId,
        auction::{AllocationResult, CatalogEntry},
        bid::{Bid, NewBid, Target},
        ledger::{Ledger, LedgerError},
        review::{self, Assignment, ReviewAllocation},
        round::{self, Round},
        score::{NewReview, ReviewRecord},
        submission::Submission,
    },
    anyhow::{Context, Result, anyhow},
    chrono::Utc,
    dashmap::DashMap,
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, HashMap},
        sync::Mutex,
    },
};

/// A resource (song) offered in a resource auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub round: RoundId,
    pub owner: UserId,
}

/// A submission offered in a submission auction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub round: RoundId,
    pub submission: SubmissionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user: UserId,
    pub balance: Tokens,
}

/// Serializable copy of everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub rounds: Vec<Round>,
    pub accounts: Vec<Account>,
    pub resources: Vec<Resource>,
    pub offers: Vec<Offer>,
    pub submissions: Vec<Submission>,
    pub bids: Vec<Bid>,
    pub results: Vec<AllocationResult>,
    pub allocations: Vec<ReviewAllocation>,
    pub reviews: Vec<ReviewRecord>,
}

#[derive(Default)]
struct State {
    last_id: i64,
    rounds: BTreeMap<RoundId, Round>,
    resources: BTreeMap<ResourceId, Resource>,
    offers: Vec<Offer>,
    submissions: BTreeMap<SubmissionId, Submission>,
    bids: BTreeMap<BidId, Bid>,
    results: HashMap<RoundId, Vec<AllocationResult>>,
    allocations: BTreeMap<ReviewAllocationId, ReviewAllocation>,
    reviews: BTreeMap<ReviewId, ReviewRecord>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    /// The part-one owner joins the conflict set of a part two.
    fn resolve(&self, submission: &Submission) -> Submission {
        let mut resolved = submission.clone();
        resolved.part_one_owner = submission
            .part_one
            .and_then(|id| self.submissions.get(&id))
            .map(|part_one| part_one.owner)
            .filter(|owner| *owner != submission.owner);
        resolved
    }
}

/// Backs every repository port with process memory. Accounts live in their
/// own map so debits don't contend with the other tables.
#[derive(Default)]
pub struct InMemory {
    state: Mutex<State>,
    accounts: DashMap<UserId, Tokens>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            for account in snapshot.accounts {
                anyhow::ensure!(
                    store.accounts.insert(account.user, account.balance).is_none(),
                    "duplicate account {}",
                    account.user
                );
            }
            state.rounds = snapshot.rounds.into_iter().map(|r| (r.id, r)).collect();
            state.resources = snapshot.resources.into_iter().map(|r| (r.id, r)).collect();
            state.submissions = snapshot
                .submissions
                .into_iter()
                .map(|s| (s.id, s))
                .collect();
            state.bids = snapshot.bids.into_iter().map(|b| (b.id, b)).collect();
            for result in snapshot.results {
                state.results.entry(result.round).or_default().push(result);
            }
            state.allocations = snapshot
                .allocations
                .into_iter()
                .map(|a| (a.id, a))
                .collect();
            state.reviews = snapshot.reviews.into_iter().map(|r| (r.id, r)).collect();

            for offer in &snapshot.offers {
                anyhow::ensure!(
                    state.submissions.contains_key(&offer.submission),
                    "offered submission {} does not exist",
                    offer.submission
                );
            }
            state.offers = snapshot.offers;

            // Fresh ids must not collide with any loaded id.
            let last_id = state
                .rounds
                .keys()
                .map(|id| id.0)
                .chain(state.resources.keys().map(|id| id.0))
                .chain(state.submissions.keys().map(|id| id.0))
                .chain(state.bids.keys().map(|id| id.0))
                .chain(state.allocations.keys().map(|id| id.0))
                .chain(state.reviews.keys().map(|id| id.0))
                .max()
                .unwrap_or_default();
            state.last_id = last_id;
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock().unwrap();
        let mut accounts: Vec<_> = self
            .accounts
            .iter()
            .map(|entry| Account {
                user: *entry.key(),
                balance: *entry.value(),
            })
            .collect();
        accounts.sort_by_key(|account| account.user);
        let mut results: Vec<_> = state.results.values().flatten().copied().collect();
        results.sort_by_key(|result| result.round);

        Snapshot {
            rounds: state.rounds.values().cloned().collect(),
            accounts,
            resources: state.resources.values().cloned().collect(),
            offers: state.offers.clone(),
            submissions: state.submissions.values().cloned().collect(),
            bids: state.bids.values().cloned().collect(),
            results,
            allocations: state.allocations.values().cloned().collect(),
            reviews: state.reviews.values().cloned().collect(),
        }
    }

    pub fn open_account(&self, user: UserId, balance: Tokens) {
        self.accounts.insert(user, balance);
    }

    pub fn add_resource(&self, round: RoundId, owner: UserId) -> ResourceId {
        let mut state = self.state.lock().unwrap();
        let id = ResourceId(state.next_id());
        state.resources.insert(id, Resource { id, round, owner });
        id
    }

    pub fn add_submission(
        &self,
        round: RoundId,
        owner: UserId,
        co_owner: Option<UserId>,
        part_one: Option<SubmissionId>,
    ) -> SubmissionId {
        let mut state = self.state.lock().unwrap();
        let id = SubmissionId(state.next_id());
        state.submissions.insert(
            id,
            Submission {
                id,
                round,
                owner,
                co_owner,
                part_one,
                part_one_owner: None,
                status: Default::default(),
                tally: Default::default(),
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Puts an existing submission up for auction in `round`.
    pub fn offer(&self, round: RoundId, submission: SubmissionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        anyhow::ensure!(
            state.submissions.contains_key(&submission),
            "submission {submission} does not exist"
        );
        state.offers.push(Offer { round, submission });
        Ok(())
    }
}

#[async_trait::async_trait]
impl RoundStore for InMemory {
    async fn create(&self, name: String, kind: round::Kind) -> Result<Round> {
        let mut state = self.state.lock().unwrap();
        let round = Round::new(RoundId(state.next_id()), name, kind, Utc::now());
        state.rounds.insert(round.id, round.clone());
        Ok(round)
    }

    async fn get(&self, id: RoundId) -> Result<Option<Round>> {
        Ok(self.state.lock().unwrap().rounds.get(&id).cloned())
    }

    async fn save(&self, round: &Round) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .rounds
            .get_mut(&round.id)
            .with_context(|| format!("round {} does not exist", round.id))?;
        *stored = round.clone();
        Ok(())
    }
}

#[async_trait::async_trait]
impl BidSource for InMemory {
    async fn active_bids(&self, round: RoundId) -> Result<Vec<Bid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bids
            .values()
            .filter(|bid| bid.round == round && bid.is_active())
            .cloned()
            .collect())
    }

    async fn bids_of(&self, round: RoundId, bidder: UserId) -> Result<Vec<Bid>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bids
            .values()
            .filter(|bid| bid.round == round && bid.bidder == bidder)
            .cloned()
            .collect())
    }

    async fn get(&self, id: BidId) -> Result<Option<Bid>> {
        Ok(self.state.lock().unwrap().bids.get(&id).cloned())
    }

    async fn insert(&self, bid: NewBid) -> Result<Bid> {
        let mut state = self.state.lock().unwrap();
        let bid = Bid {
            id: BidId(state.next_id()),
            round: bid.round,
            bidder: bid.bidder,
            target: bid.target,
            amount: bid.amount,
            dropped: false,
            created_at: bid.created_at,
        };
        state.bids.insert(bid.id, bid.clone());
        Ok(bid)
    }

    async fn remove(&self, id: BidId) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .bids
            .remove(&id)
            .with_context(|| format!("bid {id} does not exist"))?;
        Ok(())
    }

    async fn mark_dropped(&self, ids: &[BidId]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            let bid = state
                .bids
                .get_mut(id)
                .with_context(|| format!("bid {id} does not exist"))?;
            bid.dropped = true;
        }
        Ok(())
    }

    async fn restore_dropped(&self, round: RoundId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .bids
            .values_mut()
            .filter(|bid| bid.round == round)
            .for_each(|bid| bid.dropped = false);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TargetCatalog for InMemory {
    async fn all_targets(&self, round: RoundId) -> Result<Vec<CatalogEntry>> {
        let state = self.state.lock().unwrap();
        let resources = state
            .resources
            .values()
            .filter(|resource| resource.round == round)
            .map(|resource| CatalogEntry {
                target: Target::Resource(resource.id),
                owner: resource.owner,
            });
        let submissions = state
            .offers
            .iter()
            .filter(|offer| offer.round == round)
            .filter_map(|offer| state.submissions.get(&offer.submission))
            .map(|submission| CatalogEntry {
                target: Target::Submission(submission.id),
                owner: submission.owner,
            });
        Ok(resources.chain(submissions).collect())
    }
}

#[async_trait::async_trait]
impl SubmissionSource for InMemory {
    async fn by_submission_criteria(&self, round: RoundId) -> Result<Vec<Submission>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .submissions
            .values()
            .filter(|submission| submission.round == round)
            .map(|submission| state.resolve(submission))
            .collect())
    }

    async fn get(&self, id: SubmissionId) -> Result<Option<Submission>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .submissions
            .get(&id)
            .map(|submission| state.resolve(submission)))
    }

    async fn save(&self, submission: &Submission) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .submissions
            .get_mut(&submission.id)
            .with_context(|| format!("submission {} does not exist", submission.id))?;
        *stored = Submission {
            part_one_owner: None,
            ..submission.clone()
        };
        Ok(())
    }
}

#[async_trait::async_trait]
impl ResultSink for InMemory {
    async fn replace_results(&self, round: RoundId, results: &[AllocationResult]) -> Result<()> {
        anyhow::ensure!(
            results.iter().all(|result| result.round == round),
            "results of another round"
        );
        self.state
            .lock()
            .unwrap()
            .results
            .insert(round, results.to_vec());
        Ok(())
    }

    async fn results(&self, round: RoundId) -> Result<Vec<AllocationResult>> {
        let state = self.state.lock().unwrap();
        Ok(state.results.get(&round).cloned().unwrap_or_default())
    }

    async fn mark_charged(&self, round: RoundId, winners: &[UserId]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(results) = state.results.get_mut(&round) {
            results
                .iter_mut()
                .filter(|result| winners.contains(&result.winner))
                .for_each(|result| result.charged = true);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReviewSink for InMemory {
    async fn replace_allocations(
        &self,
        round: RoundId,
        assignments: &[Assignment],
    ) -> Result<Vec<ReviewAllocation>> {
        let mut state = self.state.lock().unwrap();
        state
            .allocations
            .retain(|_, allocation| allocation.round != round);
        let now = Utc::now();
        let mut created = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let allocation = ReviewAllocation {
                id: ReviewAllocationId(state.next_id()),
                round,
                reviewer: assignment.reviewer,
                submission: assignment.submission,
                status: review::Status::Pending,
                created_at: now,
            };
            state.allocations.insert(allocation.id, allocation.clone());
            created.push(allocation);
        }
        Ok(created)
    }

    async fn allocation(&self, id: ReviewAllocationId) -> Result<Option<ReviewAllocation>> {
        Ok(self.state.lock().unwrap().allocations.get(&id).cloned())
    }

    async fn allocations(&self, round: RoundId) -> Result<Vec<ReviewAllocation>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .allocations
            .values()
            .filter(|allocation| allocation.round == round)
            .cloned()
            .collect())
    }

    async fn complete_allocation(&self, id: ReviewAllocationId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let allocation = state
            .allocations
            .get_mut(&id)
            .with_context(|| format!("review allocation {id} does not exist"))?;
        allocation.status = review::Status::Completed;
        Ok(())
    }

    async fn insert_review(&self, review: NewReview) -> Result<ReviewRecord> {
        let mut state = self.state.lock().unwrap();
        let record = ReviewRecord {
            id: ReviewId(state.next_id()),
            allocation: review.allocation,
            reviewer: review.reviewer,
            submission: review.submission,
            score: review.score,
            comment: review.comment,
            favorite: review.favorite,
            created_at: review.created_at,
        };
        state.reviews.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_extra_review(
        &self,
        reviewer: UserId,
        submission: SubmissionId,
        comment: &str,
        favorite: bool,
    ) -> Result<Option<ReviewRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .reviews
            .values()
            .find(|review| {
                review.allocation.is_none()
                    && review.reviewer == reviewer
                    && review.submission == submission
                    && review.comment == comment
                    && review.favorite == favorite
            })
            .cloned())
    }

    async fn update_review(&self, review: &ReviewRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .reviews
            .get_mut(&review.id)
            .with_context(|| format!("review {} does not exist", review.id))?;
        *stored = review.clone();
        Ok(())
    }

    async fn reviews_of(&self, submission: SubmissionId) -> Result<Vec<ReviewRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .reviews
            .values()
            .filter(|review| review.submission == submission)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl Ledger for InMemory {
    async fn balance(&self, user: UserId) -> Result<Tokens, LedgerError> {
        self.accounts
            .get(&user)
            .map(|balance| *balance)
            .ok_or(LedgerError::UnknownAccount(user))
    }

    async fn debit(&self, user: UserId, amount: Tokens) -> Result<Tokens, LedgerError> {
        // The entry guard keeps check and update atomic per account.
        let mut balance = self
            .accounts
            .get_mut(&user)
            .ok_or(LedgerError::UnknownAccount(user))?;
        if *balance < amount {
            return Err(LedgerError::InsufficientBalance {
                user,
                balance: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        Ok(*balance)
    }

    async fn credit(&self, user: UserId, amount: Tokens) -> Result<Tokens, LedgerError> {
        let mut balance = self
            .accounts
            .get_mut(&user)
            .ok_or(LedgerError::UnknownAccount(user))?;
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| anyhow!("balance of user {user} overflows"))?;
        Ok(*balance)
    }
}
