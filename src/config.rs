// src/config.rs
// Environment-driven configuration. Problems are reported, never fatal.

use std::collections::HashMap;
use std::time::Duration;

use crate::crypto_client::{Asset, Network};
use crate::paypal_client::PayPalConfig;

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Clone, Debug, Default)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub service_role_key: Option<String>,
    pub jwt_secret: Option<String>,
}

impl SupabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_any(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL"]),
            anon_key: env_any(&["SUPABASE_ANON_KEY", "NEXT_PUBLIC_SUPABASE_ANON_KEY"]),
            service_role_key: env_any(&["SUPABASE_SERVICE_ROLE_KEY"]),
            jwt_secret: env_any(&["SUPABASE_JWT_SECRET"]),
        }
    }
}

/// Who counts as an administrator besides users carrying the `admin` role.
#[derive(Clone, Debug, Default)]
pub struct AdminPolicy {
    /// Email suffix such as `@hopefoundation.org`.
    pub email_domain: Option<String>,
    pub allowlist: Vec<String>,
}

impl AdminPolicy {
    pub fn from_env() -> Self {
        let email_domain = env_any(&["ADMIN_EMAIL_DOMAIN"]).map(|d| {
            let d = d.to_lowercase();
            if d.starts_with('@') {
                d
            } else {
                format!("@{}", d)
            }
        });
        let allowlist = env_any(&["ADMIN_EMAILS"])
            .map(|list| {
                list.split(',')
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            email_domain,
            allowlist,
        }
    }

    pub fn matches_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return false;
        }
        let domain_match = self
            .email_domain
            .as_deref()
            .map(|domain| email.ends_with(domain))
            .unwrap_or(false);
        domain_match || self.allowlist.iter().any(|allowed| *allowed == email)
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub redis_url: Option<String>,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            max_requests: env_parse("RATE_LIMIT_MAX", 10),
            window: Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 60)),
            redis_url: env_any(&["REDIS_URL"]),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CryptoConfig {
    /// Receiving addresses per asset/network pair, rotated per payment.
    pub wallets: HashMap<(Asset, Network), Vec<String>>,
    pub etherscan_api_key: Option<String>,
    pub price_api_url: String,
}

impl CryptoConfig {
    pub fn from_env() -> Self {
        let mut wallets = HashMap::new();
        for (asset, network) in crate::crypto_client::SUPPORTED_PAIRS {
            let name = format!(
                "WALLET_{}_{}",
                asset.symbol(),
                network.as_str().to_uppercase()
            );
            let legacy = format!(
                "NEXT_PUBLIC_{}_{}_WALLET_ADDRESS",
                asset.symbol(),
                network.as_str().to_uppercase()
            );
            if let Some(list) = env_any(&[name.as_str(), legacy.as_str()]) {
                let addresses: Vec<String> = list
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
                if !addresses.is_empty() {
                    wallets.insert((*asset, *network), addresses);
                }
            }
        }

        Self {
            wallets,
            etherscan_api_key: env_any(&["ETHERSCAN_API_KEY", "NEXT_PUBLIC_ETHERSCAN_API_KEY"]),
            price_api_url: env_any(&["COINGECKO_API_URL"])
                .unwrap_or_else(|| "https://api.coingecko.com/api/v3".to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub site_url: String,
    pub organization_name: String,
    pub http_timeout: Duration,
    pub supabase: SupabaseConfig,
    pub paypal: PayPalConfig,
    pub crypto: CryptoConfig,
    pub admin: AdminPolicy,
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", 3000),
            site_url: env_any(&["SITE_URL", "NEXT_PUBLIC_SITE_URL"])
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            organization_name: env_any(&["ORGANIZATION_NAME"])
                .unwrap_or_else(|| "Hope Foundation".to_string()),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 20)),
            supabase: SupabaseConfig::from_env(),
            paypal: PayPalConfig::from_env(),
            crypto: CryptoConfig::from_env(),
            admin: AdminPolicy::from_env(),
            rate_limit: RateLimitConfig::from_env(),
        }
    }

    /// Configuration problems worth a startup warning.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        match &self.supabase.url {
            None => warnings.push(
                "SUPABASE_URL is not set; using the in-memory database".to_string(),
            ),
            Some(url) if !url.starts_with("http") => {
                warnings.push(format!("SUPABASE_URL does not look like a URL: {}", url))
            }
            Some(_) => {
                if self.supabase.anon_key.is_none() {
                    warnings.push("SUPABASE_ANON_KEY is not set".to_string());
                }
                if self.supabase.service_role_key.is_none() {
                    warnings.push(
                        "SUPABASE_SERVICE_ROLE_KEY is not set; admin writes use the anon key"
                            .to_string(),
                    );
                }
            }
        }
        if self.supabase.jwt_secret.is_none() {
            warnings.push(
                "SUPABASE_JWT_SECRET is not set; every protected route will reject requests"
                    .to_string(),
            );
        }
        if !self.paypal.is_configured() {
            warnings.push("PAYPAL_CLIENT_ID / PAYPAL_CLIENT_SECRET are not set".to_string());
        }
        if self.paypal.mode != "live" && self.paypal.mode != "sandbox" {
            warnings.push(format!(
                "PAYPAL_MODE '{}' is unknown; falling back to sandbox",
                self.paypal.mode
            ));
        }
        if self.crypto.wallets.is_empty() {
            warnings.push("No WALLET_<ASSET>_<NETWORK> addresses configured".to_string());
        }
        if self.admin.email_domain.is_none() && self.admin.allowlist.is_empty() {
            warnings.push(
                "No ADMIN_EMAIL_DOMAIN or ADMIN_EMAILS; only role=admin users are admins"
                    .to_string(),
            );
        }
        if self.rate_limit.max_requests == 0 {
            warnings.push("RATE_LIMIT_MAX is 0; every limited request will be rejected".to_string());
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_policy_matches_domain_and_allowlist_case_insensitively() {
        let policy = AdminPolicy {
            email_domain: Some("@hopefoundation.org".to_string()),
            allowlist: vec!["director@gmail.com".to_string()],
        };
        assert!(policy.matches_email("Jane@HopeFoundation.org"));
        assert!(policy.matches_email("director@gmail.com"));
        assert!(!policy.matches_email("someone@gmail.com"));
        assert!(!policy.matches_email("hopefoundation.org@evil.com"));
        assert!(!policy.matches_email(""));
    }

    #[test]
    fn empty_policy_matches_nobody() {
        assert!(!AdminPolicy::default().matches_email("admin@example.org"));
    }
}
