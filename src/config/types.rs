use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::TransferCategory;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct KeplerConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub fee: FeeConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
    #[serde(default, deserialize_with = "super::deserialize_rpc_urls")]
    pub rpc_urls: Vec<String>,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GlobalConfig {
    pub fn rpc_urls(&self) -> &[String] {
        &self.rpc_urls
    }
}

/// 私钥编码为显式的版本化契约，解析前即可知道格式。
/// `allow_legacy_key_guess` 仅作为历史配置的迁移垫片保留。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    #[default]
    Base58,
    JsonArray,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WalletConfig {
    #[serde(default)]
    pub key_encoding: KeyEncoding,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub sponsor_private_key: Option<String>,
    #[serde(default)]
    pub allow_legacy_key_guess: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "super::default_fee_rate_bps")]
    pub rate_bps: u32,
    /// 按转账类别覆盖默认费率，未配置的类别沿用 `rate_bps`。
    #[serde(default)]
    pub category_rate_bps: BTreeMap<TransferCategory, u32>,
    #[serde(default = "super::default_min_fee_atoms")]
    pub min_fee_atoms: u64,
    #[serde(default = "super::default_max_fee_atoms")]
    pub max_fee_atoms: u64,
    /// 公司手续费归集账户地址。
    #[serde(default)]
    pub collection_account: String,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            rate_bps: super::default_fee_rate_bps(),
            category_rate_bps: BTreeMap::new(),
            min_fee_atoms: super::default_min_fee_atoms(),
            max_fee_atoms: super::default_max_fee_atoms(),
            collection_account: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "super::default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "super::default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    #[serde(default = "super::default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "super::default_blockhash_retries")]
    pub blockhash_retries: usize,
    #[serde(default = "super::default_blockhash_retry_delay_ms")]
    pub blockhash_retry_delay_ms: u64,
    #[serde(default = "super::default_verify_delay_ms")]
    pub verify_delay_ms: u64,
    #[serde(default = "super::default_verify_epsilon_atoms")]
    pub verify_epsilon_atoms: u64,
    /// 低于该值的转账视为尘埃，直接拒绝而不是四舍五入成 0 后上链。
    #[serde(default = "super::default_min_transfer_atoms")]
    pub min_transfer_atoms: u64,
    #[serde(default)]
    pub priority: PriorityFeeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: super::default_max_retries(),
            confirm_timeout_ms: super::default_confirm_timeout_ms(),
            backoff_base_ms: super::default_backoff_base_ms(),
            blockhash_retries: super::default_blockhash_retries(),
            blockhash_retry_delay_ms: super::default_blockhash_retry_delay_ms(),
            verify_delay_ms: super::default_verify_delay_ms(),
            verify_epsilon_atoms: super::default_verify_epsilon_atoms(),
            min_transfer_atoms: super::default_min_transfer_atoms(),
            priority: PriorityFeeConfig::default(),
        }
    }
}

/// 各优先级档位对应的 compute unit price（micro lamports）。
/// 档位为 0 时不插入优先费指令。
#[derive(Debug, Clone, Deserialize)]
pub struct PriorityFeeConfig {
    #[serde(default)]
    pub low_micro_lamports: u64,
    #[serde(default = "super::default_medium_micro_lamports")]
    pub medium_micro_lamports: u64,
    #[serde(default = "super::default_high_micro_lamports")]
    pub high_micro_lamports: u64,
}

impl Default for PriorityFeeConfig {
    fn default() -> Self {
        Self {
            low_micro_lamports: 0,
            medium_micro_lamports: super::default_medium_micro_lamports(),
            high_micro_lamports: super::default_high_micro_lamports(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "super::default_logging_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: super::default_logging_level(),
            json: false,
        }
    }
}
