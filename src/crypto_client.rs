// src/crypto_client.rs
// Assets, networks, price lookup and on-chain confirmation for crypto gifts.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Asset {
    Btc,
    Eth,
    Usdt,
    Usdc,
    Sol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Bitcoin,
    Ethereum,
    Polygon,
    Bsc,
    Tron,
    Solana,
}

pub const SUPPORTED_PAIRS: &[(Asset, Network)] = &[
    (Asset::Btc, Network::Bitcoin),
    (Asset::Eth, Network::Ethereum),
    (Asset::Usdt, Network::Ethereum),
    (Asset::Usdt, Network::Tron),
    (Asset::Usdt, Network::Bsc),
    (Asset::Usdc, Network::Ethereum),
    (Asset::Usdc, Network::Polygon),
    (Asset::Sol, Network::Solana),
];

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Unknown asset or network: {0}")]
    Unknown(String),

    #[error("Price lookup failed: {0}")]
    Price(String),

    #[error("Chain lookup failed: {0}")]
    Chain(String),

    #[error("Crypto request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<CryptoError> for crate::error::AppError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Unknown(_) => crate::error::AppError::Validation(err.to_string()),
            _ => crate::error::AppError::Provider(err.to_string()),
        }
    }
}

impl Asset {
    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Usdt => "USDT",
            Asset::Usdc => "USDC",
            Asset::Sol => "SOL",
        }
    }

    /// CoinGecko id used for price lookups.
    pub fn coingecko_id(&self) -> &'static str {
        match self {
            Asset::Btc => "bitcoin",
            Asset::Eth => "ethereum",
            Asset::Usdt => "tether",
            Asset::Usdc => "usd-coin",
            Asset::Sol => "solana",
        }
    }

    pub fn decimals(&self) -> i32 {
        match self {
            Asset::Btc => 8,
            Asset::Eth => 6,
            Asset::Sol => 4,
            Asset::Usdt | Asset::Usdc => 2,
        }
    }

    pub fn is_stablecoin(&self) -> bool {
        matches!(self, Asset::Usdt | Asset::Usdc)
    }

    pub fn supports(&self, network: Network) -> bool {
        SUPPORTED_PAIRS.contains(&(*self, network))
    }
}

impl FromStr for Asset {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" | "BITCOIN" => Ok(Asset::Btc),
            "ETH" | "ETHEREUM" => Ok(Asset::Eth),
            "USDT" | "TETHER" => Ok(Asset::Usdt),
            "USDC" => Ok(Asset::Usdc),
            "SOL" | "SOLANA" => Ok(Asset::Sol),
            other => Err(CryptoError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Ethereum => "ethereum",
            Network::Polygon => "polygon",
            Network::Bsc => "bsc",
            Network::Tron => "tron",
            Network::Solana => "solana",
        }
    }

    pub fn is_evm(&self) -> bool {
        matches!(self, Network::Ethereum | Network::Polygon | Network::Bsc)
    }

    /// URI scheme for wallet deep links / QR payloads.
    pub fn uri_scheme(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Ethereum | Network::Polygon | Network::Bsc => "ethereum",
            Network::Tron => "tron",
            Network::Solana => "solana",
        }
    }

    /// Cheap shape check before anything is stored or sent to an explorer.
    pub fn is_valid_tx_hash(&self, hash: &str) -> bool {
        let hash = hash.trim();
        match self {
            Network::Ethereum | Network::Polygon | Network::Bsc => hash
                .strip_prefix("0x")
                .map(|hex_part| hex_part.len() == 64 && hex::decode(hex_part).is_ok())
                .unwrap_or(false),
            Network::Bitcoin | Network::Tron => hash.len() == 64 && hex::decode(hash).is_ok(),
            Network::Solana => {
                (43..=88).contains(&hash.len())
                    && hash
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() && !"0OIl".contains(c))
            }
        }
    }
}

impl FromStr for Network {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Network::Bitcoin),
            "ethereum" | "eth" | "erc20" => Ok(Network::Ethereum),
            "polygon" | "matic" => Ok(Network::Polygon),
            "bsc" | "bep20" | "binance" => Ok(Network::Bsc),
            "tron" | "trc20" => Ok(Network::Tron),
            "solana" | "sol" => Ok(Network::Solana),
            other => Err(CryptoError::Unknown(other.to_string())),
        }
    }
}

/// Rounds to the asset's display precision.
pub fn round_amount(asset: Asset, amount: f64) -> f64 {
    let factor = 10f64.powi(asset.decimals());
    (amount * factor).round() / factor
}

/// Picks one of the configured receiving addresses.
pub fn pick_wallet(
    wallets: &HashMap<(Asset, Network), Vec<String>>,
    asset: Asset,
    network: Network,
) -> Option<String> {
    wallets
        .get(&(asset, network))
        .and_then(|list| list.choose(&mut rand::thread_rng()))
        .cloned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICES
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait RateSource: Send + Sync {
    /// Price of one unit of `asset` in `fiat` (lowercase ISO code).
    async fn price(&self, asset: Asset, fiat: &str) -> Result<f64, CryptoError>;
}

pub struct CoinGeckoRates {
    http_client: Client,
    base_url: String,
}

impl CoinGeckoRates {
    pub fn new(http_client: Client, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RateSource for CoinGeckoRates {
    async fn price(&self, asset: Asset, fiat: &str) -> Result<f64, CryptoError> {
        let fiat = fiat.to_lowercase();
        if asset.is_stablecoin() && fiat == "usd" {
            return Ok(1.0);
        }

        let url = format!("{}/simple/price", self.base_url);
        let resp = self
            .http_client
            .get(&url)
            .query(&[("ids", asset.coingecko_id()), ("vs_currencies", fiat.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CryptoError::Price(format!("CoinGecko returned {}", resp.status())));
        }

        let body: Value = resp.json().await?;
        body[asset.coingecko_id()][fiat.as_str()]
            .as_f64()
            .filter(|price| *price > 0.0)
            .ok_or_else(|| CryptoError::Price(format!("No {} price for {}", fiat, asset)))
    }
}

/// Fixed prices; used when no price API is reachable and in tests.
#[derive(Default)]
pub struct StaticRates {
    pub prices: HashMap<Asset, f64>,
}

#[async_trait]
impl RateSource for StaticRates {
    async fn price(&self, asset: Asset, fiat: &str) -> Result<f64, CryptoError> {
        if asset.is_stablecoin() && fiat.eq_ignore_ascii_case("usd") {
            return Ok(1.0);
        }
        self.prices
            .get(&asset)
            .copied()
            .ok_or_else(|| CryptoError::Price(format!("No {} price for {}", fiat, asset)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIRMATIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed,
    Failed,
    Pending,
    /// No explorer for this network; left for manual review.
    Unverifiable,
    /// Mined, but not a payment of the expected amount to the expected wallet.
    Mismatch,
}

/// What a submitted transaction has to pay for the donation to count.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedTransfer {
    pub asset: Asset,
    pub to: String,
    pub amount: f64,
}

#[async_trait]
pub trait ChainVerifier: Send + Sync {
    async fn check(
        &self,
        network: Network,
        tx_hash: &str,
        expected: &ExpectedTransfer,
    ) -> Result<TxStatus, CryptoError>;
}

/// ERC-20 `transfer(address,uint256)` selector.
const ERC20_TRANSFER: &str = "a9059cbb";

impl Asset {
    /// Token contract and decimals on Ethereum mainnet; `None` for ether itself.
    fn erc20_contract(&self) -> Option<(&'static str, i32)> {
        match self {
            Asset::Usdt => Some(("0xdac17f958d2ee523a2206206994597c13d831ec7", 6)),
            Asset::Usdc => Some(("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", 6)),
            _ => None,
        }
    }
}

fn parse_hex_u128(hex: &str) -> Option<u128> {
    let hex = hex.trim_start_matches("0x");
    let hex = hex.trim_start_matches('0');
    if hex.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(hex, 16).ok()
}

/// Recipient and raw amount of an ERC-20 `transfer` call.
fn decode_erc20_transfer(input: &str) -> Option<(String, u128)> {
    let data = input.strip_prefix("0x")?.to_lowercase();
    let args = data.strip_prefix(ERC20_TRANSFER)?;
    if args.len() < 128 {
        return None;
    }
    let recipient = format!("0x{}", &args[24..64]);
    let amount = parse_hex_u128(&args[64..128])?;
    Some((recipient, amount))
}

/// Compares an `eth_getTransactionByHash` result with the expected payment.
/// Amounts may fall short by half a unit of the asset's display precision.
pub fn transfer_matches(tx: &Value, expected: &ExpectedTransfer) -> bool {
    let to = tx["to"].as_str().unwrap_or_default().to_lowercase();
    let (recipient, paid) = match expected.asset.erc20_contract() {
        None => {
            let Some(wei) = tx["value"].as_str().and_then(parse_hex_u128) else {
                return false;
            };
            (to, wei as f64 / 1e18)
        }
        Some((contract, decimals)) => {
            if to != contract {
                return false;
            }
            let Some((recipient, raw)) = tx["input"].as_str().and_then(decode_erc20_transfer)
            else {
                return false;
            };
            (recipient, raw as f64 / 10f64.powi(decimals))
        }
    };
    let tolerance = 0.5 / 10f64.powi(expected.asset.decimals());
    recipient == expected.to.trim().to_lowercase() && paid + tolerance >= expected.amount
}

/// Etherscan lookup: receipt status, then the transaction itself to check
/// recipient and value. Covers Ethereum mainnet only.
pub struct EtherscanVerifier {
    http_client: Client,
    api_key: Option<String>,
}

impl EtherscanVerifier {
    pub fn new(http_client: Client, api_key: Option<String>) -> Self {
        Self {
            http_client,
            api_key,
        }
    }

    async fn call(&self, params: &[(&str, &str)], api_key: &str) -> Result<Value, CryptoError> {
        let resp = self
            .http_client
            .get("https://api.etherscan.io/api")
            .query(params)
            .query(&[("apikey", api_key)])
            .send()
            .await?;
        let body: Value = resp.json().await?;
        if body["status"] == "0" && body["message"] != "OK" {
            return Err(CryptoError::Chain(
                body["result"].as_str().unwrap_or("Etherscan error").to_string(),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl ChainVerifier for EtherscanVerifier {
    async fn check(
        &self,
        network: Network,
        tx_hash: &str,
        expected: &ExpectedTransfer,
    ) -> Result<TxStatus, CryptoError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(TxStatus::Unverifiable);
        };
        if network != Network::Ethereum {
            return Ok(TxStatus::Unverifiable);
        }

        let receipt = self
            .call(
                &[
                    ("module", "transaction"),
                    ("action", "gettxreceiptstatus"),
                    ("txhash", tx_hash),
                ],
                api_key,
            )
            .await?;
        // "1" success, "0" reverted, "" not yet mined
        match receipt["result"]["status"].as_str() {
            Some("1") => {}
            Some("0") => return Ok(TxStatus::Failed),
            _ => return Ok(TxStatus::Pending),
        }

        let tx = self
            .call(
                &[
                    ("module", "proxy"),
                    ("action", "eth_getTransactionByHash"),
                    ("txhash", tx_hash),
                ],
                api_key,
            )
            .await?;
        if tx["result"].is_null() {
            return Ok(TxStatus::Pending);
        }
        if transfer_matches(&tx["result"], expected) {
            Ok(TxStatus::Confirmed)
        } else {
            tracing::warn!(
                "[CRYPTO] {} does not pay {} {} to {}",
                tx_hash,
                expected.amount,
                expected.asset.symbol(),
                expected.to
            );
            Ok(TxStatus::Mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_aliases() {
        assert_eq!("btc".parse::<Asset>().unwrap(), Asset::Btc);
        assert_eq!("TRC20".parse::<Network>().unwrap(), Network::Tron);
        assert!("doge".parse::<Asset>().is_err());
    }

    #[test]
    fn pairs_are_restricted() {
        assert!(Asset::Usdt.supports(Network::Tron));
        assert!(!Asset::Btc.supports(Network::Ethereum));
        assert!(!Asset::Sol.supports(Network::Polygon));
    }

    #[test]
    fn rounds_to_asset_precision() {
        assert_eq!(round_amount(Asset::Btc, 0.123456789), 0.12345679);
        assert_eq!(round_amount(Asset::Usdt, 10.005001), 10.01);
        assert_eq!(round_amount(Asset::Sol, 1.23456), 1.2346);
    }

    #[test]
    fn tx_hash_shapes() {
        let evm = format!("0x{}", "a".repeat(64));
        assert!(Network::Ethereum.is_valid_tx_hash(&evm));
        assert!(!Network::Ethereum.is_valid_tx_hash(&"a".repeat(64)));
        assert!(!Network::Polygon.is_valid_tx_hash("0x1234"));
        assert!(Network::Bitcoin.is_valid_tx_hash(&"f".repeat(64)));
        assert!(!Network::Bitcoin.is_valid_tx_hash(&"z".repeat(64)));
        assert!(Network::Solana.is_valid_tx_hash(&"5".repeat(88)));
        assert!(!Network::Solana.is_valid_tx_hash(&"0".repeat(88)));
    }

    #[test]
    fn wallet_pick_uses_configured_list() {
        let mut wallets = HashMap::new();
        wallets.insert(
            (Asset::Btc, Network::Bitcoin),
            vec!["bc1a".to_string(), "bc1b".to_string()],
        );
        let picked = pick_wallet(&wallets, Asset::Btc, Network::Bitcoin).unwrap();
        assert!(picked == "bc1a" || picked == "bc1b");
        assert!(pick_wallet(&wallets, Asset::Eth, Network::Ethereum).is_none());
    }

    #[tokio::test]
    async fn stablecoins_price_at_par_in_usd() {
        let rates = StaticRates::default();
        assert_eq!(rates.price(Asset::Usdc, "usd").await.unwrap(), 1.0);
        assert!(rates.price(Asset::Btc, "usd").await.is_err());
    }

    #[tokio::test]
    async fn etherscan_without_key_is_unverifiable() {
        let verifier = EtherscanVerifier::new(Client::new(), None);
        let expected = ExpectedTransfer {
            asset: Asset::Eth,
            to: WALLET.into(),
            amount: 0.05,
        };
        let status = verifier
            .check(Network::Ethereum, &format!("0x{}", "a".repeat(64)), &expected)
            .await
            .unwrap();
        assert_eq!(status, TxStatus::Unverifiable);
    }

    const WALLET: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    fn expect(asset: Asset, amount: f64) -> ExpectedTransfer {
        ExpectedTransfer {
            asset,
            to: WALLET.into(),
            amount,
        }
    }

    #[test]
    fn ether_transfer_must_reach_wallet_with_full_amount() {
        // 0.05 ETH
        let tx = json!({ "to": WALLET.to_lowercase(), "value": "0xb1a2bc2ec50000", "input": "0x" });
        assert!(transfer_matches(&tx, &expect(Asset::Eth, 0.05)));
        assert!(!transfer_matches(&tx, &expect(Asset::Eth, 0.06)));

        let elsewhere = json!({ "to": "0x000000000000000000000000000000000000dead", "value": "0xb1a2bc2ec50000" });
        assert!(!transfer_matches(&elsewhere, &expect(Asset::Eth, 0.05)));
    }

    #[test]
    fn token_transfer_is_decoded_from_call_data() {
        // transfer(WALLET, 25_000_000) on the USDC contract: 25 USDC
        let input = format!(
            "0xa9059cbb{:0>64}{:0>64}",
            WALLET.trim_start_matches("0x").to_lowercase(),
            format!("{:x}", 25_000_000u64)
        );
        let tx = json!({
            "to": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "value": "0x0",
            "input": input,
        });
        assert!(transfer_matches(&tx, &expect(Asset::Usdc, 25.0)));
        assert!(!transfer_matches(&tx, &expect(Asset::Usdc, 30.0)));
        // Same call data against the USDT contract is a different token.
        assert!(!transfer_matches(&tx, &expect(Asset::Usdt, 25.0)));

        let plain_ether = json!({ "to": WALLET, "value": "0x0", "input": "0x" });
        assert!(!transfer_matches(&plain_ether, &expect(Asset::Usdc, 25.0)));
    }
}
