use {
    crate::arguments::{Arguments, Command},
    allocation::{
        Configuration,
        RoundCoordinator,
        coordinator::RoundReport,
        domain::{RoundId, ReviewAllocation, auction, review},
        infra::{InMemory, Repositories, memory::Snapshot},
    },
    anyhow::{Context, Result},
    rand::{SeedableRng, rngs::StdRng},
    serde::Serialize,
    std::{path::Path, sync::Arc},
};

/// What a command printed.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Report {
    Round(RoundReport),
    Reviews {
        stats: review::Stats,
        allocations: Vec<ReviewAllocation>,
    },
}

/// Loads the snapshot, runs the command through the coordinator and
/// optionally writes the resulting state back.
pub async fn run(args: &Arguments) -> Result<Report> {
    let config = match &args.config {
        Some(path) => Configuration::from_path(path)
            .await
            .with_context(|| format!("loading configuration from {}", path.display()))?
            .validate()?,
        None => Configuration::default(),
    };
    let store = Arc::new(InMemory::from_snapshot(load(&args.snapshot).await?)?);
    let mut coordinator = RoundCoordinator::new(Repositories::in_memory(store.clone()), config);
    if let Some(seed) = args.seed {
        coordinator = coordinator.with_rng(StdRng::seed_from_u64(seed));
    }

    let report = match args.command {
        Command::AllocateRound {
            round,
            prefer_own_submission,
        } => {
            let options = options(&coordinator, prefer_own_submission);
            Report::Round(coordinator.allocate_round(RoundId(round), options).await?)
        }
        Command::ReallocateRound {
            round,
            prefer_own_submission,
        } => {
            let options = options(&coordinator, prefer_own_submission);
            Report::Round(coordinator.reallocate_round(RoundId(round), options).await?)
        }
        Command::AllocateReviews {
            round,
            tasks_per_reviewer,
        } => {
            let stats = coordinator
                .allocate_reviews(RoundId(round), tasks_per_reviewer)
                .await?;
            Report::Reviews {
                stats,
                allocations: coordinator.review_allocations(RoundId(round)).await?,
            }
        }
    };

    if let Some(output) = &args.output {
        store_snapshot(output, &store.snapshot()).await?;
        tracing::debug!(output = %output.display(), "wrote state");
    }
    Ok(report)
}

fn options(coordinator: &RoundCoordinator, prefer_own_submission: bool) -> auction::Options {
    let mut options = coordinator.default_options();
    options.prefer_own_submission |= prefer_own_submission;
    options
}

async fn load(path: &Path) -> Result<Snapshot> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing snapshot {}", path.display()))
}

async fn store_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let content = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("writing snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use {super::*, allocation::domain::{UserId, auction::Method}};

    const SNAPSHOT: &str = r#"{
        "rounds": [{
            "id": 1,
            "name": "songs",
            "kind": "resource_auction",
            "status": "active",
            "created_at": "2026-01-01T00:00:00Z"
        }],
        "accounts": [
            {"user": 1, "balance": 100},
            {"user": 2, "balance": 100}
        ],
        "resources": [
            {"id": 10, "round": 1, "owner": 50},
            {"id": 11, "round": 1, "owner": 50}
        ],
        "bids": [
            {
                "id": 20,
                "round": 1,
                "bidder": 1,
                "target": {"resource": 10},
                "amount": 60,
                "created_at": "2026-01-02T00:00:00Z"
            },
            {
                "id": 21,
                "round": 1,
                "bidder": 2,
                "target": {"resource": 10},
                "amount": 40,
                "created_at": "2026-01-02T00:00:00Z"
            }
        ]
    }"#;

    fn arguments(dir: &Path, command: Command) -> Arguments {
        Arguments {
            log_filter: "debug".into(),
            log_stderr_threshold: None,
            use_json_logs: false,
            config: None,
            snapshot: dir.join("state.json"),
            output: Some(dir.join("after.json")),
            seed: Some(1),
            command,
        }
    }

    #[tokio::test]
    async fn allocates_round_from_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), SNAPSHOT).unwrap();

        let args = arguments(
            dir.path(),
            Command::AllocateRound {
                round: 1,
                prefer_own_submission: false,
            },
        );
        let Report::Round(report) = run(&args).await.unwrap() else {
            panic!("expected a round report");
        };

        assert_eq!(report.results.len(), 2);
        let winner = report
            .results
            .iter()
            .find(|result| result.method == Method::Won)
            .unwrap();
        assert_eq!(winner.winner, UserId(1));
        assert_eq!(winner.price, 60);
        assert!(report.failed_debits.is_empty());

        let after = load(&dir.path().join("after.json")).await.unwrap();
        assert_eq!(after.rounds[0].status, allocation::domain::round::Status::Completed);
        let balance = |user| {
            after
                .accounts
                .iter()
                .find(|account| account.user == UserId(user))
                .unwrap()
                .balance
        };
        assert_eq!(balance(1), 40);
        assert_eq!(balance(2), 100);
        assert!(after.bids.iter().any(|bid| bid.id.0 == 21 && bid.dropped));

        let json = serde_json::to_value(Report::Round(report)).unwrap();
        assert_eq!(json["stats"]["total_targets"], 2);
    }

    #[tokio::test]
    async fn review_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state.json"), SNAPSHOT).unwrap();

        // unknown round
        let args = arguments(
            dir.path(),
            Command::AllocateReviews {
                round: 7,
                tasks_per_reviewer: Some(2),
            },
        );
        let err = run(&args).await.unwrap_err();
        assert!(err.to_string().contains("round 7 not found"));
        assert!(!dir.path().join("after.json").exists());
    }
}
