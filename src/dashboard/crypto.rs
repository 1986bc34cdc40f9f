use log::error;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Cryptocurrency pair not supported")]
    UnsupportedPair(String),

    #[error("Failed to fetch cryptocurrency data for {pair}. {reason}")]
    Upstream { pair: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CryptoQuote {
    pub pair: String,
    pub price: String,
    pub change_percent: String,
}

/// CoinGecko coin id for a supported `XXXUSD` pair.
pub fn coin_id(pair: &str) -> Option<&'static str> {
    match pair {
        "BTCUSD" => Some("bitcoin"),
        "ETHUSD" => Some("ethereum"),
        _ => None,
    }
}

fn parse_quote(pair: &str, coin: &str, data: &Value) -> Option<CryptoQuote> {
    let entry = data.get(coin)?;
    let price = entry.get("usd")?.as_f64()?;
    let change = entry.get("usd_24h_change")?.as_f64()?;
    Some(CryptoQuote {
        pair: pair.to_string(),
        price: format!("{:.2}", price),
        change_percent: format!("{:.2}", change),
    })
}

pub async fn fetch_quote(
    http: &reqwest::Client,
    base_url: &str,
    pair: &str
) -> Result<CryptoQuote, CryptoError> {
    let pair = pair.to_uppercase();
    let coin = coin_id(&pair).ok_or_else(|| CryptoError::UnsupportedPair(pair.clone()))?;
    let upstream = |reason: String| CryptoError::Upstream { pair: pair.clone(), reason };

    let url = format!("{}/simple/price", base_url.trim_end_matches('/'));
    let resp = http
        .get(&url)
        .query(&[("ids", coin), ("vs_currencies", "usd"), ("include_24hr_change", "true")])
        .send().await
        .map_err(|e| upstream(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        error!("CoinGecko API error for {}: {} {}", pair, status, body);
        return Err(upstream(format!("Failed to fetch data from CoinGecko. Status: {}", status.as_u16())));
    }

    let data: Value = resp.json().await.map_err(|e| upstream(e.to_string()))?;
    parse_quote(&pair, coin, &data).ok_or_else(|| {
        error!("CoinGecko response format error for {}: {}", pair, data);
        upstream("Unexpected data format from CoinGecko API.".to_string())
    })
}

/// Prompt asking the model for a short plain-language take on a quote.
pub fn explanation_prompt(pair_symbol: &str, price: &str, change_percent: &str) -> String {
    format!(
        "Explain the current price and recent change for {}. Current price: ${}, 24h change: {}%. \
         Keep it concise (1-2 sentences), friendly, and easy to understand for a general audience.",
        pair_symbol,
        price,
        change_percent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_btc_and_eth_are_supported() {
        assert_eq!(coin_id("BTCUSD"), Some("bitcoin"));
        assert_eq!(coin_id("ETHUSD"), Some("ethereum"));
        assert_eq!(coin_id("DOGEUSD"), None);
    }

    #[test]
    fn quote_is_formatted_with_two_decimals() {
        let data = json!({ "bitcoin": { "usd": 64123.456, "usd_24h_change": -1.23456 } });
        let quote = parse_quote("BTCUSD", "bitcoin", &data).unwrap();
        assert_eq!(quote.price, "64123.46");
        assert_eq!(quote.change_percent, "-1.23");
    }

    #[test]
    fn incomplete_payload_is_rejected() {
        let data = json!({ "bitcoin": { "usd": 1.0 } });
        assert!(parse_quote("BTCUSD", "bitcoin", &data).is_none());
    }

    #[tokio::test]
    async fn unsupported_pair_fails_without_request() {
        let http = reqwest::Client::new();
        let err = fetch_quote(&http, "http://127.0.0.1:9", "dogeusd").await.unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedPair(p) if p == "DOGEUSD"));
    }
}
