//! Sealed-bid auction clearing.
//!
//! A round's bids are cleared in a single greedy pass:
//! 1. bids are ordered by amount, highest first; bids with the same amount
//!    are put in a random order instead of submission order
//! 2. walking that order, a bid wins its target if neither the target has
//!    been claimed nor the bidder has won something else. A winner stops
//!    competing: all of its other bids get dropped right away
//! 3. every bidder who ended up without a target gets one of the unclaimed
//!    targets at a fixed price (fallback allocation), as long as unclaimed
//!    targets remain
//!
//! The pass is an explicit state machine over `{Unclaimed, Claimed}` per
//! target and `{NoWin, Won}` per bidder.

use {
    super::{
        BidId,
        RoundId,
        Tokens,
        UserId,
        bid::{Bid, Target},
        round::{self, Round},
    },
    indexmap::IndexMap,
    itertools::Itertools,
    rand::{Rng, seq::SliceRandom},
    serde::{Deserialize, Serialize},
    std::collections::{BTreeMap, HashSet},
};

/// A target of the round together with its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub target: Target,
    pub owner: UserId,
}

/// How a result came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Method {
    /// The bid was the highest remaining one on its target.
    Won,
    /// The bidder didn't win anything and got an unclaimed target.
    Fallback,
}

/// The target a bidder ends up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub round: RoundId,
    pub winner: UserId,
    pub target: Target,
    pub price: Tokens,
    pub method: Method,
    /// Whether `price` was taken from the winner's balance.
    #[serde(default)]
    pub charged: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// In submission auctions, a bidder without a win first gets one of its
    /// own unclaimed submissions back.
    pub prefer_own_submission: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_targets: usize,
    /// Targets that ended up with a result.
    pub allocated: usize,
    /// Targets that ended up without a result.
    pub unallocated: usize,
    /// Bidders who won through their bid.
    pub winners: usize,
    pub fallbacks: usize,
    pub bidders: usize,
    /// Bidders left without any target.
    pub unallocated_bidders: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub results: Vec<AllocationResult>,
    /// Bids that can no longer win, in the order they were dropped.
    pub dropped: Vec<BidId>,
    pub unallocated_bidders: Vec<UserId>,
    pub stats: Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetState {
    Unclaimed,
    Claimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BidderState {
    NoWin,
    Won,
}

struct Slot {
    owner: UserId,
    state: TargetState,
}

#[derive(Debug, Clone, Copy)]
pub struct AuctionAllocator {
    /// Price of a fallback allocation in submission auctions. Fallbacks in
    /// resource auctions are free.
    pub fallback_submission_cost: Tokens,
}

impl AuctionAllocator {
    pub fn new(fallback_submission_cost: Tokens) -> Self {
        Self {
            fallback_submission_cost,
        }
    }

    /// Clears the bids of `round` over the targets of `catalog`.
    ///
    /// Expects the caller to have checked the round's status. Dropped bids
    /// are ignored, and so are bids whose target isn't part of the catalog;
    /// the latter get dropped.
    pub fn allocate<R: Rng + ?Sized>(
        &self,
        round: &Round,
        bids: Vec<Bid>,
        catalog: &[CatalogEntry],
        options: Options,
        rng: &mut R,
    ) -> Outcome {
        let mut targets: IndexMap<Target, Slot> = catalog
            .iter()
            .map(|entry| {
                (
                    entry.target,
                    Slot {
                        owner: entry.owner,
                        state: TargetState::Unclaimed,
                    },
                )
            })
            .collect();

        let mut dropped = Vec::new();
        let (bids, unlisted): (Vec<_>, Vec<_>) = bids
            .into_iter()
            .filter(Bid::is_active)
            .partition(|bid| targets.contains_key(&bid.target));
        for bid in unlisted {
            tracing::warn!(
                bid = %bid.id,
                target = %bid.target,
                "dropping bid on target outside of the round"
            );
            dropped.push(bid.id);
        }

        // Sorted by id so the fallback order doesn't depend on the bid order.
        let mut bidders: BTreeMap<UserId, BidderState> = bids
            .iter()
            .map(|bid| (bid.bidder, BidderState::NoWin))
            .collect();

        let mut results = Vec::new();
        let mut settled: HashSet<BidId> = HashSet::new();
        let ordered = order_bids(bids, rng);
        for (position, bid) in ordered.iter().enumerate() {
            if settled.contains(&bid.id) {
                continue;
            }
            let slot = targets
                .get_mut(&bid.target)
                .expect("bids on unlisted targets were filtered out");
            let bidder = bidders
                .get_mut(&bid.bidder)
                .expect("every bidder has a state");

            match (*bidder, slot.state) {
                (BidderState::NoWin, TargetState::Unclaimed) => {
                    slot.state = TargetState::Claimed;
                    *bidder = BidderState::Won;
                    settled.insert(bid.id);
                    results.push(AllocationResult {
                        round: round.id,
                        winner: bid.bidder,
                        target: bid.target,
                        price: bid.amount,
                        method: Method::Won,
                        charged: false,
                    });
                    // A winner stops competing.
                    for other in &ordered[position + 1..] {
                        if other.bidder == bid.bidder && settled.insert(other.id) {
                            dropped.push(other.id);
                        }
                    }
                }
                (BidderState::Won, _) | (BidderState::NoWin, TargetState::Claimed) => {
                    settled.insert(bid.id);
                    dropped.push(bid.id);
                }
            }
        }
        let winners = results.len();

        let mut unclaimed: Vec<Target> = targets
            .iter()
            .filter(|(_, slot)| slot.state == TargetState::Unclaimed)
            .map(|(target, _)| *target)
            .collect();
        let fallback_price = match round.kind {
            round::Kind::ResourceAuction => 0,
            round::Kind::SubmissionAuction => self.fallback_submission_cost,
        };
        let prefer_own =
            options.prefer_own_submission && round.kind == round::Kind::SubmissionAuction;

        let mut unallocated_bidders = Vec::new();
        for (bidder, state) in &bidders {
            if *state == BidderState::Won {
                continue;
            }
            if unclaimed.is_empty() {
                unallocated_bidders.push(*bidder);
                continue;
            }

            let own: Vec<usize> = if prefer_own {
                unclaimed
                    .iter()
                    .positions(|target| targets[target].owner == *bidder)
                    .collect()
            } else {
                Vec::new()
            };
            let index = match own.choose(rng) {
                Some(index) => *index,
                None => rng.gen_range(0..unclaimed.len()),
            };
            let target = unclaimed.remove(index);
            targets[&target].state = TargetState::Claimed;
            results.push(AllocationResult {
                round: round.id,
                winner: *bidder,
                target,
                price: fallback_price,
                method: Method::Fallback,
                charged: false,
            });
        }

        let allocated = targets
            .values()
            .filter(|slot| slot.state == TargetState::Claimed)
            .count();
        let stats = Stats {
            total_targets: targets.len(),
            allocated,
            unallocated: targets.len() - allocated,
            winners,
            fallbacks: results.len() - winners,
            bidders: bidders.len(),
            unallocated_bidders: unallocated_bidders.len(),
        };
        tracing::debug!(round = %round.id, ?stats, "cleared auction");

        Outcome {
            results,
            dropped,
            unallocated_bidders,
            stats,
        }
    }
}

/// Highest amount first. Bids with equal amounts are shuffled so that ties
/// never favour whoever bid first.
fn order_bids<R: Rng + ?Sized>(mut bids: Vec<Bid>, rng: &mut R) -> Vec<Bid> {
    bids.sort_by_key(|bid| std::cmp::Reverse(bid.amount));
    let mut ordered = Vec::with_capacity(bids.len());
    for (_, group) in &bids.into_iter().chunk_by(|bid| bid.amount) {
        let mut group: Vec<Bid> = group.collect();
        group.shuffle(rng);
        ordered.extend(group);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::{ResourceId, SubmissionId},
        chrono::Utc,
        maplit::hashset,
        rand::{SeedableRng, rngs::StdRng},
    };

    fn round(kind: round::Kind) -> Round {
        let mut round = Round::new(RoundId(1), "test".into(), kind, Utc::now());
        round.start(Utc::now()).unwrap();
        round
    }

    fn resources(count: i64) -> Vec<CatalogEntry> {
        (1..=count)
            .map(|id| CatalogEntry {
                target: Target::Resource(ResourceId(id)),
                // owners that never bid
                owner: UserId(1000 + id),
            })
            .collect()
    }

    struct Bids(Vec<Bid>);

    impl Bids {
        fn new() -> Self {
            Self(Vec::new())
        }

        fn add(mut self, bidder: i64, target: Target, amount: Tokens) -> Self {
            let id = i64::try_from(self.0.len()).unwrap() + 1;
            self.0.push(Bid {
                id: BidId(id),
                round: RoundId(1),
                bidder: UserId(bidder),
                target,
                amount,
                dropped: false,
                created_at: Utc::now(),
            });
            self
        }

        fn resource(self, bidder: i64, resource: i64, amount: Tokens) -> Self {
            self.add(bidder, Target::Resource(ResourceId(resource)), amount)
        }
    }

    fn allocator() -> AuctionAllocator {
        AuctionAllocator::new(50)
    }

    fn result_of(outcome: &Outcome, user: i64) -> Option<&AllocationResult> {
        outcome
            .results
            .iter()
            .find(|result| result.winner == UserId(user))
    }

    fn assert_invariants(outcome: &Outcome) {
        let targets: HashSet<_> = outcome.results.iter().map(|r| r.target).collect();
        let winners: HashSet<_> = outcome.results.iter().map(|r| r.winner).collect();
        assert_eq!(targets.len(), outcome.results.len(), "target claimed twice");
        assert_eq!(winners.len(), outcome.results.len(), "bidder won twice");
        assert_eq!(
            outcome.stats.allocated + outcome.stats.unallocated,
            outcome.stats.total_targets
        );
    }

    #[test]
    fn highest_bid_wins_and_others_fall_back() {
        // T1: A=100, B=80, C=80
        let bids = Bids::new()
            .resource(1, 1, 100)
            .resource(2, 1, 80)
            .resource(3, 1, 80);
        let outcome = allocator().allocate(
            &round(round::Kind::ResourceAuction),
            bids.0,
            &resources(3),
            Options::default(),
            &mut StdRng::seed_from_u64(1),
        );

        assert_invariants(&outcome);
        let a = result_of(&outcome, 1).unwrap();
        assert_eq!(a.target, Target::Resource(ResourceId(1)));
        assert_eq!(a.price, 100);
        assert_eq!(a.method, Method::Won);
        for user in [2, 3] {
            let result = result_of(&outcome, user).unwrap();
            assert_eq!(result.method, Method::Fallback);
            assert_eq!(result.price, 0);
            assert_ne!(result.target, Target::Resource(ResourceId(1)));
        }
        assert_eq!(
            outcome.dropped.iter().copied().collect::<HashSet<_>>(),
            hashset! {BidId(2), BidId(3)}
        );
        assert_eq!(
            outcome.stats,
            Stats {
                total_targets: 3,
                allocated: 3,
                unallocated: 0,
                winners: 1,
                fallbacks: 2,
                bidders: 3,
                unallocated_bidders: 0,
            }
        );
    }

    #[test]
    fn equal_bids_resolve_to_exactly_one_winner() {
        let bids = (1..=5).fold(Bids::new(), |bids, user| bids.resource(user, 1, 50));
        let mut winners = HashSet::new();
        for seed in 0..64 {
            let outcome = allocator().allocate(
                &round(round::Kind::ResourceAuction),
                bids.0.clone(),
                &resources(1),
                Options::default(),
                &mut StdRng::seed_from_u64(seed),
            );
            assert_invariants(&outcome);
            assert_eq!(outcome.results.len(), 1);
            let result = outcome.results[0];
            assert_eq!(result.price, 50);
            assert_eq!(result.method, Method::Won);
            assert_eq!(outcome.unallocated_bidders.len(), 4);
            assert_eq!(outcome.stats.unallocated_bidders, 4);
            winners.insert(result.winner);
        }
        // ties are not decided by bid order
        assert!(winners.len() > 1);
    }

    #[test]
    fn same_seed_gives_same_outcome() {
        let bids = (1..=6).fold(Bids::new(), |bids, user| {
            bids.resource(user, 1, 10).resource(user, 2, 10)
        });
        let run = |seed| {
            allocator().allocate(
                &round(round::Kind::ResourceAuction),
                bids.0.clone(),
                &resources(4),
                Options::default(),
                &mut StdRng::seed_from_u64(seed),
            )
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn winner_stops_competing() {
        // user 1 bids highest on both targets; it must only get one of them
        let bids = Bids::new()
            .resource(1, 1, 100)
            .resource(1, 2, 90)
            .resource(2, 2, 10);
        let outcome = allocator().allocate(
            &round(round::Kind::ResourceAuction),
            bids.0,
            &resources(2),
            Options::default(),
            &mut StdRng::seed_from_u64(3),
        );

        assert_invariants(&outcome);
        assert_eq!(
            result_of(&outcome, 1).unwrap().target,
            Target::Resource(ResourceId(1))
        );
        let second = result_of(&outcome, 2).unwrap();
        assert_eq!(second.target, Target::Resource(ResourceId(2)));
        assert_eq!(second.method, Method::Won);
        assert_eq!(second.price, 10);
        assert_eq!(outcome.dropped, [BidId(2)]);
    }

    #[test]
    fn higher_bid_elsewhere_keeps_lower_bids_alive() {
        // user 2 loses target 1 but still wins target 2 with its second bid
        let bids = Bids::new()
            .resource(1, 1, 100)
            .resource(2, 1, 90)
            .resource(2, 2, 5);
        let outcome = allocator().allocate(
            &round(round::Kind::ResourceAuction),
            bids.0,
            &resources(2),
            Options::default(),
            &mut StdRng::seed_from_u64(3),
        );
        let second = result_of(&outcome, 2).unwrap();
        assert_eq!(second.method, Method::Won);
        assert_eq!(second.target, Target::Resource(ResourceId(2)));
        assert_eq!(second.price, 5);
        assert_eq!(outcome.dropped, [BidId(2)]);
    }

    #[test]
    fn fallback_runs_out_of_targets() {
        let bids = (1..=4).fold(Bids::new(), |bids, user| {
            bids.resource(user, 1, 10 * user as Tokens)
        });
        let outcome = allocator().allocate(
            &round(round::Kind::ResourceAuction),
            bids.0,
            &resources(2),
            Options::default(),
            &mut StdRng::seed_from_u64(11),
        );

        assert_invariants(&outcome);
        assert_eq!(result_of(&outcome, 4).unwrap().method, Method::Won);
        // bidders get fallbacks in id order until targets run out
        assert_eq!(result_of(&outcome, 1).unwrap().method, Method::Fallback);
        assert_eq!(outcome.unallocated_bidders, [UserId(2), UserId(3)]);
        assert_eq!(outcome.stats.allocated, 2);
        assert_eq!(outcome.stats.unallocated, 0);
    }

    #[test]
    fn unclaimed_targets_without_bidders_stay_unallocated() {
        let bids = Bids::new().resource(1, 1, 10);
        let outcome = allocator().allocate(
            &round(round::Kind::ResourceAuction),
            bids.0,
            &resources(5),
            Options::default(),
            &mut StdRng::seed_from_u64(0),
        );
        assert_eq!(outcome.stats.total_targets, 5);
        assert_eq!(outcome.stats.allocated, 1);
        assert_eq!(outcome.stats.unallocated, 4);
    }

    #[test]
    fn submission_fallback_costs_fixed_price_and_prefers_own_work() {
        let catalog: Vec<_> = (1..=4)
            .map(|id| CatalogEntry {
                target: Target::Submission(SubmissionId(id)),
                owner: UserId(id),
            })
            .collect();
        // users 1 and 2 fight over submission 3 and 4; user 1 loses
        let bids = Bids::new()
            .add(1, Target::Submission(SubmissionId(3)), 20)
            .add(2, Target::Submission(SubmissionId(3)), 30)
            .add(3, Target::Submission(SubmissionId(4)), 40);

        for seed in 0..16 {
            let outcome = allocator().allocate(
                &round(round::Kind::SubmissionAuction),
                bids.0.clone(),
                &catalog,
                Options {
                    prefer_own_submission: true,
                },
                &mut StdRng::seed_from_u64(seed),
            );
            assert_invariants(&outcome);
            let fallback = result_of(&outcome, 1).unwrap();
            assert_eq!(fallback.method, Method::Fallback);
            assert_eq!(fallback.price, 50);
            assert_eq!(fallback.target, Target::Submission(SubmissionId(1)));
        }

        // without the preference the pick is random among unclaimed targets
        let picks: HashSet<_> = (0..64)
            .map(|seed| {
                let outcome = allocator().allocate(
                    &round(round::Kind::SubmissionAuction),
                    bids.0.clone(),
                    &catalog,
                    Options::default(),
                    &mut StdRng::seed_from_u64(seed),
                );
                result_of(&outcome, 1).unwrap().target
            })
            .collect();
        assert_eq!(
            picks,
            hashset! {
                Target::Submission(SubmissionId(1)),
                Target::Submission(SubmissionId(2)),
            }
        );
    }

    #[test]
    fn ignores_dropped_bids_and_drops_unlisted_ones() {
        let mut bids = Bids::new()
            .resource(1, 1, 100)
            .resource(2, 1, 50)
            .resource(3, 9, 70)
            .0;
        bids[0].dropped = true;

        let outcome = allocator().allocate(
            &round(round::Kind::ResourceAuction),
            bids,
            &resources(1),
            Options::default(),
            &mut StdRng::seed_from_u64(0),
        );
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(result_of(&outcome, 2).unwrap().method, Method::Won);
        assert_eq!(outcome.dropped, [BidId(3)]);
        assert_eq!(outcome.stats.bidders, 1);
    }

    #[test]
    fn invariants_hold_on_busy_rounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let mut bids = Bids::new();
            for user in 1..=12 {
                for _ in 0..3 {
                    let resource = rng.gen_range(1..=8);
                    let amount = rng.gen_range(1..=5) * 10;
                    bids = bids.resource(user, resource, amount);
                }
            }
            let outcome = allocator().allocate(
                &round(round::Kind::ResourceAuction),
                bids.0.clone(),
                &resources(8),
                Options::default(),
                &mut rng,
            );
            assert_invariants(&outcome);

            // a unique maximum always wins
            let top = bids.0.iter().map(|bid| bid.amount).max().unwrap();
            let top_bids: Vec<_> = bids.0.iter().filter(|bid| bid.amount == top).collect();
            if let [only] = top_bids.as_slice() {
                let result = result_of(&outcome, only.bidder.0).unwrap();
                assert_eq!(result.target, only.target);
                assert_eq!(result.method, Method::Won);
            }
            assert_eq!(
                outcome.results.len() + outcome.unallocated_bidders.len(),
                outcome.stats.bidders
            );
        }
    }
}
