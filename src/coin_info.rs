//! coin_info.rs
//! Coin metadata and pricing.
//! - coin lookups from the pump.fun frontend API, optionally via a proxy
//! - SOL/USD spot price from the same API
//! - bonding curve price read directly out of the on-chain account data

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte offsets of the virtual reserves inside the bonding curve account,
/// right after the 8-byte account discriminator.
const VIRTUAL_TOKEN_RESERVES_OFFSET: usize = 0x08;
const VIRTUAL_SOL_RESERVES_OFFSET: usize = 0x10;

#[derive(Debug, Error)]
pub enum CoinInfoError {
    #[error("coin api request failed: {0}")]
    Api(String),
    #[error("unexpected status code: {0}")]
    Status(u16),
    #[error("no data in account response")]
    NoCurveData,
    #[error("buffer too small to read reserves")]
    CurveDataTooShort,
    #[error("invalid reserves in curve state")]
    ZeroReserves,
}

/// Coin record as served by the frontend API. Unknown fields are ignored;
/// absent fields default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoinData {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub image_uri: String,
    pub bonding_curve: String,
    pub associated_bonding_curve: String,
    pub creator: String,
    pub created_timestamp: i64,
    pub raydium_pool: Option<String>,
    pub complete: bool,
    pub virtual_sol_reserves: i64,
    pub virtual_token_reserves: i64,
    pub total_supply: i64,
    pub king_of_the_hill_timestamp: i64,
    pub market_cap: f64,
    pub reply_count: i64,
    pub nsfw: bool,
    pub usd_market_cap: f64,
}

#[derive(Debug, Deserialize)]
struct SolPriceResponse {
    #[serde(rename = "solPrice", default)]
    sol_price: f64,
}

#[async_trait]
pub trait CoinInfoProvider: Send + Sync {
    async fn coin_data_for(
        &self,
        mint: &str,
        cache_bust: bool,
        use_proxy: bool,
    ) -> Result<CoinData, CoinInfoError>;

    async fn price_in_sol_from_bonding_curve(
        &self,
        bonding_curve: &str,
    ) -> Result<f64, CoinInfoError>;

    async fn sol_price_usd(&self) -> Result<f64, CoinInfoError>;
}

pub struct CoinInfoClient {
    http: reqwest::Client,
    proxied_http: reqwest::Client,
    coin_api_base: String,
    rpc_endpoint: String,
    request_id: AtomicU64,
}

impl CoinInfoClient {
    /// `coin_api_base` is the frontend API root, `rpc_endpoint` the JSON-RPC
    /// endpoint used for curve account reads. Without a proxy url the
    /// proxied requests quietly fall back to the direct client.
    pub fn new(
        coin_api_base: String,
        rpc_endpoint: String,
        proxy_url: Option<&str>,
    ) -> Result<Self, CoinInfoError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(browser_headers())
            .build()
            .map_err(|e| CoinInfoError::Api(e.to_string()))?;

        let proxied_http = match proxy_url {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url)
                    .map_err(|e| CoinInfoError::Api(format!("invalid proxy url: {e}")))?;
                reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .default_headers(browser_headers())
                    .proxy(proxy)
                    .build()
                    .map_err(|e| CoinInfoError::Api(e.to_string()))?
            }
            None => http.clone(),
        };

        Ok(Self {
            http,
            proxied_http,
            coin_api_base,
            rpc_endpoint,
            request_id: AtomicU64::new(1),
        })
    }
}

fn browser_headers() -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json,text/plain,*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, HeaderValue::from_static("https://pump.fun/"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://pump.fun"));
    headers
}

fn nanos_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

fn coin_url(base: &str, mint: &str, cache_bust: bool) -> String {
    if cache_bust {
        format!("{base}/coins/{mint}?_={}", nanos_now())
    } else {
        format!("{base}/coins/{mint}")
    }
}

fn nocache_url(endpoint: &str) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{sep}nocache={}", nanos_now())
}

fn read_u64_le(data: &[u8], offset: usize) -> Result<u64, CoinInfoError> {
    match data.get(offset..offset + 8) {
        Some(bytes) => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Ok(u64::from_le_bytes(buf))
        }
        None => Err(CoinInfoError::CurveDataTooShort),
    }
}

/// Price in SOL per whole token, straight from the curve reserves.
pub fn price_from_curve_data(data: &[u8]) -> Result<f64, CoinInfoError> {
    let virtual_token_reserves = read_u64_le(data, VIRTUAL_TOKEN_RESERVES_OFFSET)?;
    let virtual_sol_reserves = read_u64_le(data, VIRTUAL_SOL_RESERVES_OFFSET)?;
    debug!(virtual_sol_reserves, virtual_token_reserves, "Read curve reserves");

    if virtual_token_reserves == 0 || virtual_sol_reserves == 0 {
        return Err(CoinInfoError::ZeroReserves);
    }
    Ok(virtual_sol_reserves as f64 / virtual_token_reserves as f64)
}

#[derive(Debug, Default, Deserialize)]
struct AccountInfoResponse {
    #[serde(default)]
    result: AccountInfoResult,
}

#[derive(Debug, Default, Deserialize)]
struct AccountInfoResult {
    #[serde(default)]
    value: Option<AccountValue>,
}

#[derive(Debug, Default, Deserialize)]
struct AccountValue {
    #[serde(default)]
    data: Vec<String>,
}

#[async_trait]
impl CoinInfoProvider for CoinInfoClient {
    async fn coin_data_for(
        &self,
        mint: &str,
        cache_bust: bool,
        use_proxy: bool,
    ) -> Result<CoinData, CoinInfoError> {
        let client = if use_proxy { &self.proxied_http } else { &self.http };
        let url = coin_url(&self.coin_api_base, mint, cache_bust);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoinInfoError::Api(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoinInfoError::Status(status.as_u16()));
        }

        response
            .json::<CoinData>()
            .await
            .map_err(|e| CoinInfoError::Api(e.to_string()))
    }

    async fn price_in_sol_from_bonding_curve(
        &self,
        bonding_curve: &str,
    ) -> Result<f64, CoinInfoError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": "getAccountInfo",
            "params": [bonding_curve, { "encoding": "base64", "commitment": "confirmed" }],
        });

        let response = self
            .http
            .post(nocache_url(&self.rpc_endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoinInfoError::Api(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoinInfoError::Status(status.as_u16()));
        }

        let parsed: AccountInfoResponse = response
            .json()
            .await
            .map_err(|e| CoinInfoError::Api(e.to_string()))?;
        let value = parsed.result.value.ok_or(CoinInfoError::NoCurveData)?;
        let encoded = value.data.first().ok_or(CoinInfoError::NoCurveData)?;
        let data = BASE64
            .decode(encoded)
            .map_err(|e| CoinInfoError::Api(format!("failed to decode base64: {e}")))?;

        price_from_curve_data(&data)
    }

    async fn sol_price_usd(&self) -> Result<f64, CoinInfoError> {
        let url = format!("{}/sol-price", self.coin_api_base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CoinInfoError::Api(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoinInfoError::Status(status.as_u16()));
        }

        let parsed: SolPriceResponse = response
            .json()
            .await
            .map_err(|e| CoinInfoError::Api(e.to_string()))?;
        Ok(parsed.sol_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve_account(token_reserves: u64, sol_reserves: u64) -> Vec<u8> {
        let mut data = vec![0u8; 24];
        data[VIRTUAL_TOKEN_RESERVES_OFFSET..VIRTUAL_TOKEN_RESERVES_OFFSET + 8]
            .copy_from_slice(&token_reserves.to_le_bytes());
        data[VIRTUAL_SOL_RESERVES_OFFSET..VIRTUAL_SOL_RESERVES_OFFSET + 8]
            .copy_from_slice(&sol_reserves.to_le_bytes());
        data
    }

    #[test]
    fn curve_price_is_sol_over_token_reserves() {
        let data = curve_account(1_073_000_000_000_000, 30_000_000_000);
        let price = price_from_curve_data(&data).unwrap();
        assert_eq!(price, 30_000_000_000f64 / 1_073_000_000_000_000f64);
    }

    #[test]
    fn zero_reserves_are_rejected() {
        let no_tokens = curve_account(0, 30_000_000_000);
        assert!(matches!(
            price_from_curve_data(&no_tokens),
            Err(CoinInfoError::ZeroReserves)
        ));

        let no_sol = curve_account(1_000_000, 0);
        assert!(matches!(
            price_from_curve_data(&no_sol),
            Err(CoinInfoError::ZeroReserves)
        ));
    }

    #[test]
    fn short_curve_data_is_rejected() {
        assert!(matches!(
            price_from_curve_data(&[0u8; 16]),
            Err(CoinInfoError::CurveDataTooShort)
        ));
        assert!(matches!(
            price_from_curve_data(&[]),
            Err(CoinInfoError::CurveDataTooShort)
        ));
    }

    #[test]
    fn coin_data_parses_and_ignores_unknown_fields() {
        let json = serde_json::json!({
            "mint": "Mint111",
            "name": "Test Coin",
            "symbol": "TST",
            "bonding_curve": "Curve111",
            "associated_bonding_curve": "AssocCurve111",
            "creator": "Creator111",
            "created_timestamp": 1736400000i64,
            "raydium_pool": null,
            "complete": false,
            "virtual_sol_reserves": 30000000000i64,
            "virtual_token_reserves": 1073000000000000i64,
            "total_supply": 1000000000000000i64,
            "king_of_the_hill_timestamp": 0,
            "market_cap": 27.95,
            "usd_market_cap": 4100.5,
            "twitter": "ignored",
            "profile_image": "ignored",
            "inverted": true
        });

        let coin: CoinData = serde_json::from_value(json).unwrap();
        assert_eq!(coin.mint, "Mint111");
        assert_eq!(coin.symbol, "TST");
        assert_eq!(coin.bonding_curve, "Curve111");
        assert_eq!(coin.associated_bonding_curve, "AssocCurve111");
        assert_eq!(coin.king_of_the_hill_timestamp, 0);
        assert!(coin.raydium_pool.is_none());
        assert!(!coin.complete);
    }

    #[test]
    fn sol_price_response_uses_camel_case_key() {
        let parsed: SolPriceResponse =
            serde_json::from_value(serde_json::json!({ "solPrice": 144.72 })).unwrap();
        assert_eq!(parsed.sol_price, 144.72);
    }

    #[test]
    fn coin_url_appends_cache_buster_only_on_request() {
        let plain = coin_url("https://frontend-api.pump.fun", "Mint111", false);
        assert_eq!(plain, "https://frontend-api.pump.fun/coins/Mint111");

        let busted = coin_url("https://frontend-api.pump.fun", "Mint111", true);
        assert!(busted.starts_with("https://frontend-api.pump.fun/coins/Mint111?_="));
    }

    #[test]
    fn nocache_url_respects_existing_query_strings() {
        let with_query = nocache_url("https://mainnet.helius-rpc.com/?api-key=abc");
        assert!(with_query.contains("api-key=abc&nocache="));

        let without_query = nocache_url("https://rpc.example.com");
        assert!(without_query.starts_with("https://rpc.example.com?nocache="));
    }

    #[test]
    fn account_info_response_handles_missing_value() {
        let missing: AccountInfoResponse =
            serde_json::from_value(serde_json::json!({ "result": { "value": null } })).unwrap();
        assert!(missing.result.value.is_none());

        let present: AccountInfoResponse = serde_json::from_value(serde_json::json!({
            "result": { "value": { "data": ["AAAA", "base64"] } }
        }))
        .unwrap();
        let value = present.result.value.unwrap();
        assert_eq!(value.data[0], "AAAA");
    }
}
