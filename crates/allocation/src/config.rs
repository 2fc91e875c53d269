use {
    crate::domain::Tokens,
    anyhow::{anyhow, ensure},
    serde::{Deserialize, Serialize},
    std::path::Path,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Configuration {
    /// How many active bids a user may have in one round.
    pub max_bids_per_user: u32,

    /// Price of a fallback allocation in submission auctions.
    pub fallback_submission_cost: Tokens,

    /// Highest score a review may give.
    pub max_score: u32,

    /// Whether losing bidders of a submission auction get their own
    /// unclaimed work back before a random one.
    pub prefer_own_submission: bool,

    /// Review load used when a caller doesn't specify one.
    pub tasks_per_reviewer: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_bids_per_user: 5,
            fallback_submission_cost: 50,
            max_score: 50,
            prefer_own_submission: false,
            tasks_per_reviewer: 8,
        }
    }
}

impl Configuration {
    pub async fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(&path).await?;
        toml::from_str(&content).map_err(|err| {
            anyhow!(
                "failed to parse TOML config at {}: {err}",
                path.as_ref().display()
            )
        })
    }

    pub async fn to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        Ok(tokio::fs::write(path, toml::to_string_pretty(self)?).await?)
    }

    pub fn validate(self) -> anyhow::Result<Self> {
        ensure!(self.max_bids_per_user > 0, "max-bids-per-user must be positive");
        ensure!(self.max_score > 0, "max-score must be positive");
        ensure!(
            self.tasks_per_reviewer > 0,
            "tasks-per-reviewer must be positive"
        );
        Ok(self)
    }
}
