use solana_sdk::signature::Keypair;
use tracing::warn;

use super::KeyEncoding;

/// 按配置声明的编码解析私钥，格式不符直接报错，不做猜测。
pub fn parse_keypair(raw: &str, encoding: KeyEncoding) -> Result<Keypair, anyhow::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("keypair string empty");
    }

    match encoding {
        KeyEncoding::Base58 => {
            if trimmed.starts_with('[') {
                anyhow::bail!("key_encoding=base58，但内容看起来是 JSON 数组");
            }
            let data = bs58::decode(trimmed).into_vec()?;
            Ok(Keypair::try_from(data.as_slice())?)
        }
        KeyEncoding::JsonArray => {
            let bytes: Vec<u8> = serde_json::from_str(trimmed)?;
            Ok(Keypair::try_from(bytes.as_slice())?)
        }
    }
}

/// 迁移垫片：按 JSON 数组、逗号分隔、Base58 的顺序逐个尝试。
/// 仅在 `allow_legacy_key_guess = true` 时使用，升级配置后应删除。
pub fn parse_keypair_compat(raw: &str) -> Result<Keypair, anyhow::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("keypair string empty");
    }

    warn!(
        target: "config::wallet",
        "正在使用 legacy 私钥格式猜测，请在配置中声明 key_encoding 并关闭 allow_legacy_key_guess"
    );

    if trimmed.starts_with('[') {
        let bytes: Vec<u8> = serde_json::from_str(trimmed)?;
        Ok(Keypair::try_from(bytes.as_slice())?)
    } else if trimmed.contains(',') {
        let bytes = trimmed
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<u8>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Keypair::try_from(bytes.as_slice())?)
    } else {
        let data = bs58::decode(trimmed).into_vec()?;
        Ok(Keypair::try_from(data.as_slice())?)
    }
}
