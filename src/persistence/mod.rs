use crate::models::{OrderSize, TradeSide};
use crate::risk::Position;
use crate::strategy::CycleState;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Everything written to a pair's state file
///
/// The ladder fields sit at the top level (`lastBuyRsi`, `rungsBought`,
/// `rungsSold`); `position` is only present when a stop-loss is tracking one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(flatten)]
    pub cycle: CycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// JSON state file for one trading pair
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/ladder_state_<pair>.json`
    pub fn for_pair(dir: impl AsRef<Path>, pair: &str) -> Self {
        Self::new(dir.as_ref().join(format!("ladder_state_{}.json", pair.to_lowercase())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved state; `None` when no file exists yet
    pub async fn load(&self) -> anyhow::Result<Option<PersistedState>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        let state = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt state file {}", self.path.display()))?;
        Ok(Some(state))
    }

    /// Write via a temp file and rename so a crash never leaves half a file
    pub async fn save(&self, state: &PersistedState) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        let tmp = self.path.with_extension("json.tmp");

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        tracing::debug!("State saved to {}", self.path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TradeOutcome {
    Filled {
        order_id: Option<String>,
        filled_price: Option<f64>,
    },
    Failed {
        error: String,
    },
}

/// One line of the trade journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: uuid::Uuid,
    pub timestamp: DateTime<Utc>,
    pub pair: String,
    pub side: TradeSide,
    pub size: OrderSize,
    pub reference_price: f64,
    pub reason: String,
    pub rsi: Option<f64>,
    pub dry_run: bool,
    pub outcome: TradeOutcome,
}

/// Append-only JSON-lines log of every submitted order
#[derive(Debug, Clone)]
pub struct TradeJournal {
    path: PathBuf,
}

impl TradeJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &JournalEntry) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let mut line = serde_json::to_string(entry).context("Failed to serialize journal entry")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        file.flush().await?;

        Ok(())
    }

    /// Read every entry back, oldest first
    pub async fn entries(&self) -> anyhow::Result<Vec<JournalEntry>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Bad journal line {} in {}", i + 1, self.path.display()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ladderbot-test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_missing_state_file_loads_none() {
        let store = StateStore::for_pair(temp_dir(), "XBTUSD");
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = temp_dir();
        let store = StateStore::for_pair(&dir, "XBTUSD");

        let state = PersistedState {
            cycle: CycleState {
                last_buy_rsi: 41.5,
                rungs_bought: vec![47.0, 42.0],
                rungs_sold: vec![],
            },
            position: Some(Position {
                quantity: 0.5,
                cost_basis: 30000.0,
            }),
        };
        store.save(&state).await.unwrap();

        let reopened = StateStore::for_pair(&dir, "XBTUSD");
        assert_eq!(reopened.load().await.unwrap(), Some(state));

        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[test]
    fn test_state_file_format() {
        let state = PersistedState {
            cycle: CycleState {
                last_buy_rsi: 100.0,
                rungs_bought: vec![],
                rungs_sold: vec![73.0],
            },
            position: None,
        };

        let json: serde_json::Value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"lastBuyRsi": 100.0, "rungsBought": [], "rungsSold": [73.0]})
        );
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let dir = temp_dir();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let store = StateStore::for_pair(&dir, "XBTUSD");
        tokio::fs::write(store.path(), "{not json").await.unwrap();

        assert!(store.load().await.is_err());

        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[tokio::test]
    async fn test_journal_appends_lines() {
        let dir = temp_dir();
        let journal = TradeJournal::new(dir.join("trades.jsonl"));

        for outcome in [
            TradeOutcome::Filled {
                order_id: Some("O1".to_string()),
                filled_price: Some(100.0),
            },
            TradeOutcome::Failed {
                error: "order rejected: EOrder:Insufficient funds".to_string(),
            },
        ] {
            journal
                .append(&JournalEntry {
                    id: uuid::Uuid::new_v4(),
                    timestamp: Utc::now(),
                    pair: "XBTUSD".to_string(),
                    side: TradeSide::Buy,
                    size: OrderSize::Quote(100.0),
                    reference_price: 100.0,
                    reason: "rsi <= 47".to_string(),
                    rsi: Some(45.0),
                    dry_run: true,
                    outcome,
                })
                .await
                .unwrap();
        }

        let entries = journal.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[1].outcome, TradeOutcome::Failed { .. }));

        tokio::fs::remove_dir_all(dir).await.ok();
    }
}
