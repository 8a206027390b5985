use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use solana_sdk::pubkey::Pubkey;

use crate::config::FeeConfig;

use super::error::{TransferError, TransferResult};
use super::request::TransferCategory;

const BPS_DENOMINATOR: u128 = 10_000;

/// 一笔转账的费用拆分，三个字段均为最小单位整数，
/// 恒有 `company_fee + net_recipient == gross`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub gross: u64,
    pub company_fee: u64,
    pub net_recipient: u64,
}

/// 纯函数费用策略：定点运算、确定性、无 I/O。
#[derive(Debug, Clone)]
pub struct FeePolicy {
    rate_bps: u32,
    category_rate_bps: BTreeMap<TransferCategory, u32>,
    min_fee_atoms: u64,
    max_fee_atoms: u64,
    collection_account: Option<Pubkey>,
    sponsor: Option<Pubkey>,
}

impl FeePolicy {
    pub fn from_config(config: &FeeConfig, sponsor: Option<Pubkey>) -> TransferResult<Self> {
        let collection_account = match config.collection_account.trim() {
            "" => None,
            raw => Some(Pubkey::from_str(raw).map_err(|err| {
                TransferError::ConfigurationError(format!(
                    "fee.collection_account 非法: {err}"
                ))
            })?),
        };
        if config.min_fee_atoms > config.max_fee_atoms {
            return Err(TransferError::ConfigurationError(format!(
                "fee.min_fee_atoms ({}) 大于 fee.max_fee_atoms ({})",
                config.min_fee_atoms, config.max_fee_atoms
            )));
        }
        Ok(Self {
            rate_bps: config.rate_bps,
            category_rate_bps: config.category_rate_bps.clone(),
            min_fee_atoms: config.min_fee_atoms,
            max_fee_atoms: config.max_fee_atoms,
            collection_account,
            sponsor,
        })
    }

    pub fn rate_bps_for(&self, category: TransferCategory) -> u32 {
        self.category_rate_bps
            .get(&category)
            .copied()
            .unwrap_or(self.rate_bps)
    }

    pub fn collection_account(&self) -> Option<Pubkey> {
        self.collection_account
    }

    /// 计算费用拆分。费率按基点取整（四舍五入），再夹到
    /// `[min_fee, max_fee]`，最后不超过总额本身。
    pub fn compute(&self, gross: u64, category: TransferCategory) -> FeeBreakdown {
        let rate = u128::from(self.rate_bps_for(category));
        if rate == 0 || gross == 0 {
            return FeeBreakdown {
                gross,
                company_fee: 0,
                net_recipient: gross,
            };
        }

        let scaled = u128::from(gross) * rate;
        // round half up
        let raw_fee = ((scaled + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR) as u64;
        let clamped = raw_fee
            .max(self.min_fee_atoms)
            .min(self.max_fee_atoms)
            .min(gross);

        FeeBreakdown {
            gross,
            company_fee: clamped,
            net_recipient: gross - clamped,
        }
    }

    /// 网络费承担方：请求声明需要代付时返回配置的赞助账户，
    /// 未配置赞助账户则视为配置错误，在任何网络调用前失败。
    pub fn resolve_fee_payer(&self, sender: Pubkey, sponsored: bool) -> TransferResult<Pubkey> {
        if !sponsored {
            return Ok(sender);
        }
        self.sponsor.ok_or_else(|| {
            TransferError::ConfigurationError(
                "请求要求代付网络费，但未配置 sponsor_private_key".to_string(),
            )
        })
    }
}

/// 将用户侧十进制金额换算为链上最小单位。
/// 与账本精度不符的小数位（会损失资金的取整）一律拒绝。
pub fn decimal_to_atoms(amount: &Decimal, decimals: u32) -> Result<u64> {
    if amount <= &Decimal::ZERO {
        bail!("金额必须大于 0");
    }
    let unit = Decimal::from(
        10u64
            .checked_pow(decimals)
            .ok_or_else(|| anyhow!("资产精度 {decimals} 超出支持范围"))?,
    );
    let scaled = amount
        .checked_mul(unit)
        .ok_or_else(|| anyhow!("金额超出可表示范围"))?;
    if !scaled.fract().is_zero() {
        bail!("金额最多支持 {decimals} 位小数");
    }
    scaled
        .to_u64()
        .ok_or_else(|| anyhow!("金额超过 u64 最大值"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(rate_bps: u32, min_fee: u64, max_fee: u64) -> FeePolicy {
        FeePolicy {
            rate_bps,
            category_rate_bps: BTreeMap::new(),
            min_fee_atoms: min_fee,
            max_fee_atoms: max_fee,
            collection_account: Some(Pubkey::new_unique()),
            sponsor: None,
        }
    }

    #[test]
    fn one_percent_of_ten_units() {
        // 10.00（6 位精度）按 1% 收费：fee 0.10，net 9.90
        let breakdown = policy(100, 0, u64::MAX).compute(10_000_000, TransferCategory::Settlement);
        assert_eq!(breakdown.company_fee, 100_000);
        assert_eq!(breakdown.net_recipient, 9_900_000);
    }

    #[test]
    fn fee_plus_net_always_equals_gross() {
        let policy = policy(137, 3, 500_000);
        for gross in [1u64, 7, 99, 10_000, 123_457, u64::from(u32::MAX)] {
            let b = policy.compute(gross, TransferCategory::Settlement);
            assert_eq!(b.company_fee + b.net_recipient, b.gross);
            assert_eq!(b.gross, gross);
            assert!(b.net_recipient <= gross);
        }
    }

    #[test]
    fn rounding_is_half_up() {
        // 50 bps：145 * 0.005 = 0.725 → 1
        let b = policy(50, 0, u64::MAX).compute(145, TransferCategory::Settlement);
        assert_eq!(b.company_fee, 1);
        // 100 * 0.005 = 0.5 → 1（half up）
        let b = policy(50, 0, u64::MAX).compute(100, TransferCategory::Settlement);
        assert_eq!(b.company_fee, 1);
        // 99 * 0.005 = 0.495 → 0
        let b = policy(50, 0, u64::MAX).compute(99, TransferCategory::Settlement);
        assert_eq!(b.company_fee, 0);
    }

    #[test]
    fn min_and_max_clamp_apply() {
        let policy = policy(100, 50, 200);
        assert_eq!(
            policy.compute(100, TransferCategory::Settlement).company_fee,
            50
        );
        assert_eq!(
            policy
                .compute(1_000_000, TransferCategory::Settlement)
                .company_fee,
            200
        );
    }

    #[test]
    fn fee_never_exceeds_gross() {
        // 最低手续费大于总额时，费用夹到总额，净额为 0
        let b = policy(100, 50, 200).compute(30, TransferCategory::Settlement);
        assert_eq!(b.company_fee, 30);
        assert_eq!(b.net_recipient, 0);
    }

    #[test]
    fn zero_rate_means_no_fee() {
        let b = policy(0, 10, 100).compute(5_000, TransferCategory::Refund);
        assert_eq!(b.company_fee, 0);
        assert_eq!(b.net_recipient, 5_000);
    }

    #[test]
    fn category_override_takes_precedence() {
        let mut policy = policy(100, 0, u64::MAX);
        policy.category_rate_bps.insert(TransferCategory::Refund, 0);
        let b = policy.compute(10_000, TransferCategory::Refund);
        assert_eq!(b.company_fee, 0);
        let b = policy.compute(10_000, TransferCategory::Settlement);
        assert_eq!(b.company_fee, 100);
    }

    #[test]
    fn compute_is_deterministic() {
        let policy = policy(250, 1, 1_000_000);
        let a = policy.compute(987_654, TransferCategory::Expense);
        let b = policy.compute(987_654, TransferCategory::Expense);
        assert_eq!(a, b);
    }

    #[test]
    fn sponsored_without_sponsor_is_configuration_error() {
        let sender = Pubkey::new_unique();
        let err = policy(100, 0, u64::MAX)
            .resolve_fee_payer(sender, true)
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn unsponsored_fee_payer_is_sender() {
        let sender = Pubkey::new_unique();
        let payer = policy(100, 0, u64::MAX)
            .resolve_fee_payer(sender, false)
            .expect("payer");
        assert_eq!(payer, sender);
    }

    #[test]
    fn decimal_conversion_rejects_losing_precision() {
        use std::str::FromStr;
        let amount = Decimal::from_str("0.1234567").unwrap();
        assert!(decimal_to_atoms(&amount, 6).is_err());
        let amount = Decimal::from_str("0.123456").unwrap();
        assert_eq!(decimal_to_atoms(&amount, 6).unwrap(), 123_456);
    }
}
