use async_trait::async_trait;
use chrono::NaiveDate;
use rand::seq::IndexedRandom;
use reqwest::{Client, Error as ReqwestError, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StockError {
    #[error("http error: {0}")]
    Http(#[from] ReqwestError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("no data returned")]
    NoData,
}

/// Daily quote history as returned by the stock-data service.
///
/// Each `hq` row is positional: date, open, close, change, change%, low, high, ...
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockResult {
    pub status: i32,
    #[serde(default)]
    pub hq: Vec<Vec<String>>,
}

impl StockResult {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

#[async_trait]
pub trait QuoteSource: Send {
    async fn history(
        &mut self,
        stock: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<StockResult, StockError>;
}

#[derive(Debug, Clone)]
pub struct StockClientConfig {
    pub base_url: String,
    pub code_prefix: String,
    pub rate_limit_per_minute: u32,
    pub timeout: Duration,
    pub random_agent: bool,
}

impl Default for StockClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://q.stock.sohu.com/hisHq".to_string(),
            code_prefix: "cn_".to_string(),
            rate_limit_per_minute: 30,
            timeout: Duration::from_secs(30),
            random_agent: true,
        }
    }
}

pub struct StockClient {
    client: Client,
    config: StockClientConfig,
    request_timestamps: Vec<SystemTime>,
    user_agents: Vec<String>,
}

impl StockClient {
    pub fn new(config: StockClientConfig) -> Result<Self, StockError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let user_agents = vec![
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0".to_string(),
        ];

        Ok(StockClient {
            client,
            config,
            request_timestamps: Vec::new(),
            user_agents,
        })
    }

    fn get_user_agent(&self) -> String {
        if self.config.random_agent {
            self.user_agents
                .choose(&mut rand::rng())
                .unwrap_or(&self.user_agents[0])
                .clone()
        } else {
            self.user_agents[0].clone()
        }
    }

    async fn enforce_rate_limit(&mut self) {
        let current_time = SystemTime::now();

        // Remove timestamps older than 1 minute
        self.request_timestamps.retain(|&timestamp| {
            current_time.duration_since(timestamp).unwrap_or(Duration::ZERO) < Duration::from_secs(60)
        });

        if self.request_timestamps.len() >= self.config.rate_limit_per_minute as usize {
            if let Some(&oldest_request) = self.request_timestamps.first() {
                let elapsed = current_time.duration_since(oldest_request).unwrap_or(Duration::ZERO);
                let wait_time = Duration::from_secs(60).saturating_sub(elapsed);
                if !wait_time.is_zero() {
                    debug!(wait_ms = wait_time.as_millis() as u64, "Rate limit reached, waiting");
                    sleep(wait_time + Duration::from_millis(100)).await;
                }
            }
        }

        self.request_timestamps.push(current_time);
    }

    pub fn query(&self, stock: &str, begin: NaiveDate, end: NaiveDate) -> Vec<(&'static str, String)> {
        vec![
            ("code", format!("{}{}", self.config.code_prefix, stock)),
            ("start", begin.format("%Y%m%d").to_string()),
            ("end", end.format("%Y%m%d").to_string()),
        ]
    }

    async fn make_request(&mut self, query: &[(&'static str, String)]) -> Result<String, StockError> {
        const MAX_RETRIES: u32 = 5;
        let mut last_error = StockError::InvalidResponse("Max retries exceeded".to_string());

        for attempt in 0..MAX_RETRIES {
            self.enforce_rate_limit().await;

            if attempt > 0 {
                let delay = Duration::from_secs_f64(2.0_f64.powi(attempt as i32 - 1) + rand::random::<f64>());
                sleep(delay.min(Duration::from_secs(60))).await;
            }

            let response = self
                .client
                .get(&self.config.base_url)
                .header("Accept", "application/json, text/plain, */*")
                .header("User-Agent", self.get_user_agent())
                .query(query)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        match resp.text().await {
                            Ok(body) => return Ok(body),
                            Err(e) => {
                                warn!(attempt, error = %e, "Failed to read stock service body");
                                last_error = e.into();
                            }
                        }
                    } else if status == StatusCode::FORBIDDEN
                        || status == StatusCode::TOO_MANY_REQUESTS
                        || status.is_server_error()
                    {
                        warn!(attempt, %status, "Stock service refused request, retrying");
                        last_error = StockError::InvalidResponse(format!("status {}", status));
                    } else {
                        return Err(StockError::InvalidResponse(format!("status {}", status)));
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Stock service request failed");
                    last_error = e.into();
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl QuoteSource for StockClient {
    async fn history(
        &mut self,
        stock: &str,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> Result<StockResult, StockError> {
        let query = self.query(stock, begin, end);
        debug!(stock, %begin, %end, "Fetching stock history");
        let body = self.make_request(&query).await?;
        parse_response(&body)
    }
}

/// Decodes the service payload: an array holding one result, or a bare object.
/// A result without `status` is treated as "no data for this window".
pub fn parse_response(body: &str) -> Result<StockResult, StockError> {
    let value: Value = serde_json::from_str(body)?;

    let item = match value {
        Value::Array(items) => items.into_iter().next().ok_or(StockError::NoData)?,
        Value::Object(_) => value,
        other => {
            return Err(StockError::InvalidResponse(format!(
                "unexpected payload type: {}",
                other
            )))
        }
    };

    if item.get("status").is_none() {
        return Ok(StockResult { status: -1, hq: Vec::new() });
    }

    Ok(serde_json::from_value(item)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Query, State},
        routing::get,
        Router,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    const HISHQ_BODY: &str = r#"[{"status":0,"hq":[["2017-07-03","10.00","10.10","0.10","1.00%","9.90","10.20"]]}]"#;

    /// Serves `/hisHq` on a local port. The first `fail_first` hits answer `failure`.
    async fn serve_hishq(failure: StatusCode, fail_first: usize) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/hisHq",
                get(
                    move |State(hits): State<Arc<AtomicUsize>>, Query(params): Query<HashMap<String, String>>| async move {
                        let seen = hits.fetch_add(1, Ordering::SeqCst);
                        if params.get("code").map(String::as_str) != Some("cn_600000") {
                            (StatusCode::BAD_REQUEST, String::new())
                        } else if seen < fail_first {
                            (failure, String::new())
                        } else {
                            (StatusCode::OK, HISHQ_BODY.to_string())
                        }
                    },
                ),
            )
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hisHq", addr), hits)
    }

    fn local_client(base_url: String) -> StockClient {
        StockClient::new(StockClientConfig {
            base_url,
            random_agent: false,
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    fn window() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2017, 7, 3).unwrap(),
            NaiveDate::from_ymd_opt(2017, 8, 3).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_history_retries_unavailable_service() {
        let (url, hits) = serve_hishq(StatusCode::SERVICE_UNAVAILABLE, 1).await;
        let mut client = local_client(url);
        let (begin, end) = window();

        let result = client.history("600000", begin, end).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(result.hq.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(client.request_timestamps.len(), 2);
    }

    #[tokio::test]
    async fn test_history_fails_fast_on_client_error() {
        let (url, hits) = serve_hishq(StatusCode::NOT_FOUND, usize::MAX).await;
        let mut client = local_client(url);
        let (begin, end) = window();

        match client.history("600000", begin, end).await {
            Err(StockError::InvalidResponse(msg)) => assert!(msg.contains("404")),
            other => panic!("expected invalid response, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_forgets_requests_older_than_a_minute() {
        let mut client = StockClient::new(StockClientConfig {
            rate_limit_per_minute: 2,
            ..Default::default()
        })
        .unwrap();
        client.request_timestamps = vec![SystemTime::now() - Duration::from_secs(120); 5];

        let started = Instant::now();
        client.enforce_rate_limit().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.request_timestamps.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_waits_for_the_oldest_request_to_expire() {
        let mut client = StockClient::new(StockClientConfig {
            rate_limit_per_minute: 1,
            ..Default::default()
        })
        .unwrap();
        client.request_timestamps = vec![SystemTime::now() - Duration::from_millis(59_600)];

        let started = Instant::now();
        client.enforce_rate_limit().await;
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(client.request_timestamps.len(), 2);
    }

    #[tokio::test]
    async fn test_stock_client_creation() {
        let client = StockClient::new(StockClientConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_query_uses_prefix_and_compact_dates() {
        let client = StockClient::new(StockClientConfig::default()).unwrap();
        let begin = NaiveDate::from_ymd_opt(2017, 6, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2017, 7, 31).unwrap();
        let query = client.query("600000", begin, end);
        assert_eq!(
            query,
            vec![
                ("code", "cn_600000".to_string()),
                ("start", "20170630".to_string()),
                ("end", "20170731".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_array_payload() {
        let body = r#"[{"status":0,"hq":[["2017-07-03","10.00","10.10","0.10","1.00%","9.90","10.20","1000","100.5","0.5%"]],"code":"cn_600000"}]"#;
        let result = parse_response(body).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.hq.len(), 1);
        assert_eq!(result.hq[0][4], "1.00%");
    }

    #[test]
    fn test_parse_error_status() {
        let result = parse_response(r#"[{"status":2,"msg":"no data"}]"#).unwrap();
        assert!(!result.is_ok());
        assert!(result.hq.is_empty());
    }

    #[test]
    fn test_parse_empty_payloads() {
        assert!(!parse_response("{}").unwrap().is_ok());
        assert!(matches!(parse_response("[]"), Err(StockError::NoData)));
        assert!(matches!(parse_response("42"), Err(StockError::InvalidResponse(_))));
        assert!(matches!(parse_response("<html>"), Err(StockError::Serialization(_))));
    }
}
