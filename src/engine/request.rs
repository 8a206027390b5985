use rust_decimal::Decimal;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use super::error::{TransferError, TransferResult};
use super::fee::{FeeBreakdown, decimal_to_atoms};
use super::retry::SubmissionAttempt;

/// 账本资产类型。原生 SOL 以 lamports 计，SPL 代币以 mint 声明的
/// decimals 对应的最小单位计。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Native,
    Token { mint: Pubkey, decimals: u8 },
}

impl AssetKind {
    pub fn decimals(&self) -> u32 {
        match self {
            AssetKind::Native => 9,
            AssetKind::Token { decimals, .. } => u32::from(*decimals),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Low,
    #[default]
    Medium,
    High,
}

/// 转账类别，影响费率配置的选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferCategory {
    Settlement,
    Expense,
    Refund,
}

impl TransferCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferCategory::Settlement => "settlement",
            TransferCategory::Expense => "expense",
            TransferCategory::Refund => "refund",
        }
    }
}

/// 一次逻辑转账请求。地址在进入引擎前已通过 `Pubkey` 解析完成
/// 格式校验，金额校验发生在任何网络调用之前。
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: Pubkey,
    pub destination: Pubkey,
    pub amount: Decimal,
    pub asset: AssetKind,
    pub memo: Option<String>,
    pub priority: PriorityTier,
    pub category: TransferCategory,
    pub sponsored: bool,
}

impl TransferRequest {
    /// 校验请求并换算成最小单位金额。低于尘埃线的金额直接拒绝，
    /// 绝不四舍五入成 0 后提交。
    pub fn validated_atoms(&self, min_transfer_atoms: u64) -> TransferResult<u64> {
        if self.source == self.destination {
            return Err(TransferError::InvalidRequest(
                "收付款账户不能相同".to_string(),
            ));
        }
        let atoms = decimal_to_atoms(&self.amount, self.asset.decimals())
            .map_err(|err| TransferError::InvalidRequest(err.to_string()))?;
        if atoms < min_transfer_atoms.max(1) {
            return Err(TransferError::InvalidRequest(format!(
                "金额 {} 低于最小可转账单位（{} atoms）",
                self.amount,
                min_transfer_atoms.max(1)
            )));
        }
        Ok(atoms)
    }
}

/// `execute` 成功后返回的最终结果，生成后不再修改。
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub signature: Signature,
    pub fee: FeeBreakdown,
    /// 本次转账是否把源账户余额全部转出。
    pub drained: bool,
    /// 余额校验是否确认了预期的变动。
    pub verified: bool,
    /// 各次提交尝试的审计轨迹。
    pub attempts: Vec<SubmissionAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn request(amount: &str) -> TransferRequest {
        TransferRequest {
            source: Pubkey::new_unique(),
            destination: Pubkey::new_unique(),
            amount: Decimal::from_str(amount).unwrap(),
            asset: AssetKind::Native,
            memo: None,
            priority: PriorityTier::Medium,
            category: TransferCategory::Settlement,
            sponsored: false,
        }
    }

    #[test]
    fn positive_amount_converts_to_lamports() {
        let atoms = request("1.5").validated_atoms(1).expect("valid");
        assert_eq!(atoms, 1_500_000_000);
    }

    #[test]
    fn zero_amount_rejected() {
        assert!(matches!(
            request("0").validated_atoms(1),
            Err(TransferError::InvalidRequest(_))
        ));
    }

    #[test]
    fn negative_amount_rejected() {
        assert!(matches!(
            request("-3").validated_atoms(1),
            Err(TransferError::InvalidRequest(_))
        ));
    }

    #[test]
    fn dust_below_minimum_rejected() {
        // 0.000000001 SOL = 1 lamport，尘埃线 100 时应拒绝而不是取整提交
        assert!(matches!(
            request("0.000000001").validated_atoms(100),
            Err(TransferError::InvalidRequest(_))
        ));
    }

    #[test]
    fn self_transfer_rejected() {
        let mut req = request("1");
        req.destination = req.source;
        assert!(matches!(
            req.validated_atoms(1),
            Err(TransferError::InvalidRequest(_))
        ));
    }

    #[test]
    fn token_amount_uses_mint_decimals() {
        let mut req = request("2.5");
        req.asset = AssetKind::Token {
            mint: Pubkey::new_unique(),
            decimals: 6,
        };
        assert_eq!(req.validated_atoms(1).expect("valid"), 2_500_000);
    }

    #[test]
    fn fractional_below_decimals_rejected() {
        let mut req = request("0.0000001");
        req.asset = AssetKind::Token {
            mint: Pubkey::new_unique(),
            decimals: 6,
        };
        assert!(req.validated_atoms(1).is_err());
    }
}
