use serde::Deserialize;
use serde::de::Deserializer;

pub mod loader;
pub mod types;
pub mod wallet;

pub use loader::*;
pub use types::*;

pub(crate) fn default_logging_level() -> String {
    "info".to_string()
}

pub(crate) fn default_fee_rate_bps() -> u32 {
    100
}

pub(crate) fn default_min_fee_atoms() -> u64 {
    1
}

pub(crate) fn default_max_fee_atoms() -> u64 {
    u64::MAX
}

pub(crate) fn default_max_retries() -> usize {
    3
}

pub(crate) fn default_confirm_timeout_ms() -> u64 {
    15_000
}

pub(crate) fn default_backoff_base_ms() -> u64 {
    250
}

pub(crate) fn default_blockhash_retries() -> usize {
    2
}

pub(crate) fn default_blockhash_retry_delay_ms() -> u64 {
    100
}

pub(crate) fn default_verify_delay_ms() -> u64 {
    2_000
}

pub(crate) fn default_verify_epsilon_atoms() -> u64 {
    10
}

pub(crate) fn default_min_transfer_atoms() -> u64 {
    1
}

pub(crate) fn default_medium_micro_lamports() -> u64 {
    5_000
}

pub(crate) fn default_high_micro_lamports() -> u64 {
    50_000
}

/// rpc_urls 允许写成单个字符串或字符串数组，重复项按首次出现去重。
pub(crate) fn deserialize_rpc_urls<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let raw = Option::<OneOrMany>::deserialize(deserializer)?;
    let items = match raw {
        None => Vec::new(),
        Some(OneOrMany::One(url)) => vec![url],
        Some(OneOrMany::Many(urls)) => urls,
    };

    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::with_capacity(items.len());
    for url in items {
        let trimmed = url.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.clone()) {
            result.push(trimmed);
        }
    }
    Ok(result)
}
