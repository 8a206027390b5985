use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::KeplerConfig;

pub const DEFAULT_CONFIG_PATHS: &[&str] = &["kepler.toml", "config/kepler.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path} 失败: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("解析配置文件 {path} 失败: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("配置文件 {path} 不存在")]
    NotFound { path: PathBuf },
}

pub fn load_config(path: Option<PathBuf>) -> Result<KeplerConfig, ConfigError> {
    // 显式指定的路径必须存在，静默回退默认值会掩盖写错的路径
    if let Some(explicit) = path {
        return try_load_file(&explicit)?.ok_or(ConfigError::NotFound { path: explicit });
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        if let Some(config) = try_load_file(Path::new(candidate))? {
            return Ok(config);
        }
    }

    Ok(KeplerConfig::default())
}

fn try_load_file(path: &Path) -> Result<Option<KeplerConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: KeplerConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Some(config))
}

/// `kepler init` 写出的配置模版。
pub const CONFIG_TEMPLATE: &str = r#"[global]
# 可以写单个地址，也可以写数组；多个地址在网络故障时轮换使用。
rpc_urls = ["https://api.mainnet-beta.solana.com"]

[global.wallet]
# 私钥编码：base58 或 json_array，解析前即按该格式校验。
key_encoding = "base58"
private_key = ""
# 代付网络费的赞助账户私钥，留空表示由付款账户自付。
# sponsor_private_key = ""

[global.logging]
level = "info"
json = false

[fee]
# 公司手续费费率（基点），按最小单位取整，四舍五入。
rate_bps = 100
min_fee_atoms = 1
# collection_account = ""

# 按类别覆盖费率（可选）
# [fee.category_rate_bps]
# expense = 80
# refund = 0

[engine]
max_retries = 3
confirm_timeout_ms = 15000
backoff_base_ms = 250
verify_delay_ms = 2000
verify_epsilon_atoms = 10

[engine.priority]
low_micro_lamports = 0
medium_micro_lamports = 5000
high_micro_lamports = 50000
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_as_valid_config() {
        let config: KeplerConfig = toml::from_str(CONFIG_TEMPLATE).expect("template parses");
        assert_eq!(config.global.rpc_urls().len(), 1);
        assert_eq!(config.fee.rate_bps, 100);
        assert_eq!(config.engine.max_retries, 3);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = load_config(Some(PathBuf::from("/nonexistent/kepler.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert!(err.to_string().contains("/nonexistent/kepler.toml"));
    }

    #[test]
    fn no_path_and_no_default_file_falls_back_to_defaults() {
        // 默认候选路径都不存在时用内置默认配置
        let config = load_config(None).expect("defaults");
        assert_eq!(config.engine.max_retries, KeplerConfig::default().engine.max_retries);
    }
}
