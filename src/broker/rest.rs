//! Broker REST API client
//!
//! Market feed quotes and market-order placement over plain HTTPS. The
//! access token for order placement is read from the environment so a
//! fresh login can be picked up without restarting.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

use super::{BrokerError, MarketFeed, OrderGateway};
use crate::config::BrokerConfig;
use crate::types::{Exchange, OrderSide};

/// Order body sent to the broker
#[derive(Debug, Clone, Serialize)]
pub struct OrderPayload {
    pub exchange: String,
    pub order_type: String,
    pub instrument_token: u32,
    pub quantity: u32,
    pub disclosed_quantity: u32,
    pub price: f64,
    pub order_side: String,
    pub trigger_price: f64,
    pub validity: String,
    pub product: String,
    pub client_id: String,
    pub device: String,
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    body: Option<FeedBody>,
}

#[derive(Debug, Deserialize)]
struct FeedBody {
    #[serde(rename = "Data")]
    data: Option<Vec<FeedRow>>,
}

#[derive(Debug, Deserialize)]
struct FeedRow {
    #[serde(rename = "LastRate")]
    last_rate: Option<f64>,
}

pub struct BrokerRestClient {
    client: Client,
    feed_url: String,
    orders_url: String,
    feed_key: String,
    client_id: String,
    dry_run: bool,
}

impl BrokerRestClient {
    pub fn new(cfg: &BrokerConfig, dry_run: bool) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            feed_url: cfg.feed_url.trim_end_matches('/').to_string(),
            orders_url: cfg.orders_url.trim_end_matches('/').to_string(),
            feed_key: cfg.feed_key.clone(),
            client_id: cfg.client_id.clone(),
            dry_run,
        })
    }

    fn access_token() -> Result<String, BrokerError> {
        match std::env::var("BROKER_ACCESS_TOKEN") {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(BrokerError::MissingToken),
        }
    }
}

#[async_trait]
impl MarketFeed for BrokerRestClient {
    async fn last_traded_price(
        &self,
        instrument_code: u32,
        exchange: Exchange,
    ) -> Result<Option<f64>, BrokerError> {
        let payload = json!({
            "head": { "key": self.feed_key },
            "body": {
                "MarketFeedData": [{
                    "Exch": exchange.feed_code(),
                    "ExchType": "D",
                    "ScripCode": instrument_code,
                    "ScripData": instrument_code,
                }],
                "LastRequestTime": "/Date(0)/",
                "RefreshRate": "H",
            }
        });

        let response = self.client.post(&self.feed_url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(BrokerError::Status(response.status().as_u16()));
        }

        let feed: FeedResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Malformed(e.to_string()))?;

        let ltp = feed
            .body
            .and_then(|b| b.data)
            .and_then(|rows| rows.into_iter().next())
            .and_then(|row| row.last_rate);
        Ok(ltp)
    }
}

#[async_trait]
impl OrderGateway for BrokerRestClient {
    async fn place_order(
        &self,
        order_side: OrderSide,
        instrument_code: u32,
        quantity: u32,
        exchange: Exchange,
    ) -> Result<bool, BrokerError> {
        if self.dry_run {
            info!(
                %order_side,
                instrument_code,
                quantity,
                "Dry run: order accepted without broker call"
            );
            return Ok(true);
        }

        let token = Self::access_token()?;
        let payload = OrderPayload {
            exchange: exchange.order_segment().to_string(),
            order_type: "MARKET".to_string(),
            instrument_token: instrument_code,
            quantity,
            disclosed_quantity: 0,
            price: 0.0,
            order_side: order_side.to_string(),
            trigger_price: 0.0,
            validity: "DAY".to_string(),
            product: "MIS".to_string(),
            client_id: self.client_id.clone(),
            device: "API".to_string(),
        };

        let response = self
            .client
            .post(&self.orders_url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            info!(%order_side, instrument_code, quantity, "Order placed");
            Ok(true)
        } else {
            error!(
                %order_side,
                instrument_code,
                status = response.status().as_u16(),
                "Order placement rejected"
            );
            Ok(false)
        }
    }
}
