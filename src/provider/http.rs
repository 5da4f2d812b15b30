use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::extract::{as_price, direct_price};
use crate::provider::{LivePriceLookup, LiveQuote, MarketplaceProvider, SearchHit};
use crate::types::Territory;

const USER_AGENT: &str = "shelf-pricer/0.1.0";
const API_KEY_HEADER: &str = "x-api-key";

/// JSON pricing API client.
///
/// - `GET {base}/products/{id}?territory=..` → raw product payload
/// - `GET {base}/search?title=..&author=..&territory=..` → candidate identifiers
/// - `GET {base}/offers?title=..&author=..&territory=..` → live offer summary
#[derive(Clone)]
pub struct HttpMarketplaceProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpMarketplaceProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            name: name.into(),
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut req = self.client.get(&url).query(query);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(ProviderError::Upstream(format!(
                "{} returned {status}: {snippet}",
                self.name
            )));
        }

        let body: Value = resp.json().await?;
        debug!(provider = %self.name, path, "provider response received");
        Ok(body)
    }
}

#[async_trait]
impl MarketplaceProvider for HttpMarketplaceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup_by_identifier(
        &self,
        identifier: &str,
        territory: Territory,
    ) -> Result<Value, ProviderError> {
        let territory = territory.to_string();
        let path = format!("products/{}", identifier.trim());
        self.get_json(&path, &[("territory", territory.as_str())]).await
    }

    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
        territory: Territory,
    ) -> Result<Option<SearchHit>, ProviderError> {
        let territory = territory.to_string();
        match self
            .get_json(
                "search",
                &[
                    ("title", title.trim()),
                    ("author", author.trim()),
                    ("territory", territory.as_str()),
                ],
            )
            .await
        {
            Ok(body) => Ok(parse_search_hit(&body)),
            Err(ProviderError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LivePriceLookup for HttpMarketplaceProvider {
    async fn live_quote(
        &self,
        title: &str,
        author: &str,
        territory: Territory,
    ) -> Result<LiveQuote, ProviderError> {
        let territory = territory.to_string();
        let body = self
            .get_json(
                "offers",
                &[
                    ("title", title.trim()),
                    ("author", author.trim()),
                    ("territory", territory.as_str()),
                ],
            )
            .await?;
        Ok(parse_live_quote(&body))
    }
}

/// First result carrying a non-empty identifier. Accepts a bare array or
/// `{"results": [...]}`; identifiers may be under `identifier`, `asin` or `id`.
pub fn parse_search_hit(v: &Value) -> Option<SearchHit> {
    let results = match v {
        Value::Array(items) => items.as_slice(),
        _ => v.get("results")?.as_array()?.as_slice(),
    };

    results.iter().find_map(|r| {
        let identifier = ["identifier", "asin", "id"]
            .iter()
            .find_map(|k| r.get(*k).and_then(|s| s.as_str()))
            .map(str::trim)
            .filter(|s| !s.is_empty())?
            .to_string();
        Some(SearchHit {
            identifier,
            price: direct_price(r),
        })
    })
}

/// Offer summary, either flat or nested under `offers`.
pub fn parse_live_quote(v: &Value) -> LiveQuote {
    let offers = v.get("offers").filter(|o| o.is_object()).unwrap_or(v);
    LiveQuote {
        buy_box: offers.get("buy_box_price").and_then(as_price),
        lowest_new: offers.get("lowest_new_price").and_then(as_price),
    }
}
