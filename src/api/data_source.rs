//! Primary/secondary data source with per-call failover.
//!
//! Every query goes to the primary provider first (the local node when
//! configured). Any failure gets one immediate retry on the primary;
//! if that also fails and a secondary is configured, the same query
//! goes to the secondary. Only when every provider is exhausted does
//! the call surface `DataUnavailable`. Failover is per call, never
//! sticky: the next call starts at the primary again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::info_client::{InfoClient, InfoProvider};
use crate::api::types::{InfoRequest, Meta, RawFill, RawOpenOrder, UserState};
use crate::config::Config;
use crate::error::{CopyError, Result};
use crate::models::LeaderSnapshot;

/// Rolling health counters, logged on the ranking cadence.
#[derive(Debug, Default)]
pub struct SourceHealth {
    pub primary_failures: AtomicU64,
    pub secondary_failures: AtomicU64,
    pub failovers: AtomicU64,
    pub requests: AtomicU64,
}

#[derive(Debug)]
pub struct DataSource<P = InfoClient> {
    primary: P,
    secondary: Option<P>,
    health: SourceHealth,
}

impl DataSource {
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = Duration::from_secs(config.poll_timeout_secs);
        let (primary, secondary) = match &config.node_api_url {
            Some(node_url) => {
                let node = InfoClient::new(node_url, "node", timeout)?;
                let public = if config.fallback_to_public_api {
                    Some(InfoClient::new(&config.public_api_url(), "public", timeout)?)
                } else {
                    None
                };
                (node, public)
            }
            None => (
                InfoClient::new(&config.public_api_url(), "public", timeout)?,
                None,
            ),
        };
        Ok(Self {
            primary,
            secondary,
            health: SourceHealth::default(),
        })
    }
}

impl<P: InfoProvider> DataSource<P> {
    pub fn health(&self) -> &SourceHealth {
        &self.health
    }

    async fn query(&self, request: &InfoRequest) -> Result<Value> {
        self.health.requests.fetch_add(1, Ordering::Relaxed);

        let mut last_err = match self.primary.info(request).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        self.health.primary_failures.fetch_add(1, Ordering::Relaxed);

        debug!(kind = request.kind(), error = %last_err, "retrying primary");
        match self.primary.info(request).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                self.health.primary_failures.fetch_add(1, Ordering::Relaxed);
                last_err = e;
            }
        }

        if let Some(secondary) = &self.secondary {
            warn!(kind = request.kind(), error = %last_err, "failing over to secondary");
            self.health.failovers.fetch_add(1, Ordering::Relaxed);
            match secondary.info(request).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.health
                        .secondary_failures
                        .fetch_add(1, Ordering::Relaxed);
                    last_err = e;
                }
            }
        }

        Err(CopyError::DataUnavailable(format!(
            "{} query failed on all providers: {last_err}",
            request.kind()
        )))
    }

    pub async fn user_state(&self, user: &str) -> Result<UserState> {
        let value = self
            .query(&InfoRequest::ClearinghouseState {
                user: user.to_string(),
            })
            .await?;
        serde_json::from_value(value)
            .map_err(|e| CopyError::Fatal(format!("malformed user state: {e}")))
    }

    pub async fn open_orders(&self, user: &str) -> Result<Vec<RawOpenOrder>> {
        let value = self
            .query(&InfoRequest::OpenOrders {
                user: user.to_string(),
            })
            .await?;
        serde_json::from_value(value)
            .map_err(|e| CopyError::Fatal(format!("malformed open orders: {e}")))
    }

    pub async fn user_fills(
        &self,
        user: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<RawFill>> {
        let value = self
            .query(&InfoRequest::UserFills {
                user: user.to_string(),
                start_time,
                end_time,
            })
            .await?;
        serde_json::from_value(value)
            .map_err(|e| CopyError::Fatal(format!("malformed user fills: {e}")))
    }

    pub async fn all_mids(&self) -> Result<HashMap<String, Decimal>> {
        let value = self.query(&InfoRequest::AllMids).await?;
        let raw: HashMap<String, String> = serde_json::from_value(value)
            .map_err(|e| CopyError::Fatal(format!("malformed mids: {e}")))?;
        let mut mids = HashMap::with_capacity(raw.len());
        for (asset, px) in raw {
            if let Ok(px) = px.parse::<Decimal>() {
                mids.insert(asset, px);
            }
        }
        Ok(mids)
    }

    pub async fn meta(&self) -> Result<Meta> {
        let value = self.query(&InfoRequest::Meta).await?;
        serde_json::from_value(value)
            .map_err(|e| CopyError::Fatal(format!("malformed meta: {e}")))
    }

    pub async fn l2_book(&self, coin: &str) -> Result<Value> {
        self.query(&InfoRequest::L2Book {
            coin: coin.to_string(),
        })
        .await
    }

    /// Mid price derived from the top of the book. Fallback for when
    /// the allMids query is unavailable.
    pub async fn mid_from_book(&self, coin: &str) -> Result<Decimal> {
        let book = self.l2_book(coin).await?;
        let top = |side: usize| -> Option<Decimal> {
            book.get("levels")?
                .get(side)?
                .get(0)?
                .get("px")?
                .as_str()?
                .parse()
                .ok()
        };
        match (top(0), top(1)) {
            (Some(bid), Some(ask)) => Ok((bid + ask) / Decimal::TWO),
            _ => Err(CopyError::DataUnavailable(format!(
                "empty l2 book for {coin}"
            ))),
        }
    }

    /// Full point-in-time view of one account: positions, resting orders,
    /// equity. Positions and orders come from separate queries; the user
    /// state timestamp is taken as the snapshot sequence.
    pub async fn leader_snapshot(&self, user: &str) -> Result<LeaderSnapshot> {
        let state = self.user_state(user).await?;
        let orders = self.open_orders(user).await?;

        let polled_at = Utc::now();
        let positions: Vec<_> = state
            .asset_positions
            .into_iter()
            .map(|p| p.position.into_snapshot(polled_at))
            .filter(|p| !p.size.is_zero())
            .collect();
        let orders: Vec<_> = orders
            .into_iter()
            .filter_map(|o| o.into_snapshot())
            .collect();

        Ok(LeaderSnapshot::new(
            positions,
            orders,
            state.margin_summary.account_value,
            state.time as u64,
        ))
    }

    /// Liveness probe against the primary provider. Failures are logged
    /// and counted but never gate the trading loop.
    pub async fn probe(&self) -> bool {
        match self.primary.info(&InfoRequest::Meta).await {
            Ok(_) => true,
            Err(e) => {
                warn!(provider = self.primary.name(), error = %e, "health probe failed");
                false
            }
        }
    }

    pub fn primary_name(&self) -> &'static str {
        self.primary.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        name: &'static str,
        responses: Mutex<VecDeque<Result<Value>>>,
    }

    impl ScriptedProvider {
        fn new(name: &'static str, responses: Vec<Result<Value>>) -> Self {
            Self {
                name,
                responses: Mutex::new(responses.into()),
            }
        }

        fn calls_remaining(&self) -> usize {
            self.responses.lock().unwrap().len()
        }
    }

    impl InfoProvider for ScriptedProvider {
        async fn info(&self, _request: &InfoRequest) -> Result<Value> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(CopyError::Fatal("script exhausted".to_string())))
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn source(
        primary: Vec<Result<Value>>,
        secondary: Option<Vec<Result<Value>>>,
    ) -> DataSource<ScriptedProvider> {
        DataSource {
            primary: ScriptedProvider::new("primary", primary),
            secondary: secondary.map(|s| ScriptedProvider::new("secondary", s)),
            health: SourceHealth::default(),
        }
    }

    fn mids() -> Value {
        json!({"ETH": "3000.5"})
    }

    #[tokio::test]
    async fn fatal_primary_error_still_gets_second_try() {
        let src = source(
            vec![
                Err(CopyError::Fatal("400: bad request".to_string())),
                Ok(mids()),
            ],
            None,
        );
        let mids = src.all_mids().await.unwrap();
        assert_eq!(mids["ETH"].to_string(), "3000.5");
        assert_eq!(src.health.primary_failures.load(Ordering::Relaxed), 1);
        assert_eq!(src.health.failovers.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn exhausted_primary_fails_over_to_secondary() {
        let src = source(
            vec![
                Err(CopyError::Retryable("timeout".to_string())),
                Err(CopyError::Retryable("timeout".to_string())),
            ],
            Some(vec![Ok(mids())]),
        );
        assert!(src.all_mids().await.is_ok());
        assert_eq!(src.health.primary_failures.load(Ordering::Relaxed), 2);
        assert_eq!(src.health.failovers.load(Ordering::Relaxed), 1);
        assert_eq!(src.secondary.as_ref().unwrap().calls_remaining(), 0);
    }

    #[tokio::test]
    async fn all_providers_down_surfaces_data_unavailable() {
        let src = source(
            vec![
                Err(CopyError::Retryable("timeout".to_string())),
                Err(CopyError::Retryable("timeout".to_string())),
            ],
            Some(vec![Err(CopyError::Retryable("timeout".to_string()))]),
        );
        let err = src.all_mids().await.unwrap_err();
        assert!(matches!(err, CopyError::DataUnavailable(_)));
        assert_eq!(src.health.secondary_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failover_is_not_sticky_across_calls() {
        let src = source(
            vec![
                Err(CopyError::Retryable("timeout".to_string())),
                Err(CopyError::Retryable("timeout".to_string())),
                Ok(mids()),
            ],
            Some(vec![Ok(mids())]),
        );
        assert!(src.all_mids().await.is_ok());
        // The next call starts back at the primary.
        assert!(src.all_mids().await.is_ok());
        assert_eq!(src.primary.calls_remaining(), 0);
        assert_eq!(src.health.failovers.load(Ordering::Relaxed), 1);
    }
}
