pub mod builder;
pub mod error;
pub mod fee;
pub mod record;
pub mod request;
pub mod retry;
pub mod signers;
pub mod submit;
pub mod verify;

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::rpc::EndpointPool;

pub use builder::TransactionBuilder;
pub use error::{TransferError, TransferResult};
pub use fee::FeePolicy;
pub use record::{FailureRecord, TransferRecord};
pub use request::{AssetKind, PriorityTier, TransferCategory, TransferOutcome, TransferRequest};
pub use signers::SignerCoordinator;
pub use submit::SubmissionLoop;
pub use verify::{BalanceVerifier, ExpectedDelta};

/// 源账户自付网络费的原生转账预留的基础网络费（lamports），覆盖签名费。
const BASE_NETWORK_FEE_RESERVE: u64 = 10_000;
/// 未显式设置 CU 上限时，一笔交易最多可消耗的计算单元数，
/// 用于把优先费折算成 lamports 上限。
const MAX_COMPUTE_UNITS_PER_TX: u64 = 1_400_000;

/// 转账执行引擎：把一次逻辑转账请求编排为
/// 校验 → 费用拆分 → 组装 → 签名 → 提交确认 → 余额核对 的完整流程。
/// 每次 `execute` 独立运行，互不串行；共享的只有端点池游标。
pub struct TransferEngine {
    pool: Arc<EndpointPool>,
    fee_policy: FeePolicy,
    builder: TransactionBuilder,
    signers: SignerCoordinator,
    submission: SubmissionLoop,
    verifier: BalanceVerifier,
    min_transfer_atoms: u64,
}

impl TransferEngine {
    pub fn new(
        pool: Arc<EndpointPool>,
        fee_policy: FeePolicy,
        signers: SignerCoordinator,
        config: &EngineConfig,
    ) -> Self {
        let builder = TransactionBuilder::new(
            config.priority.clone(),
            fee_policy.collection_account(),
        );
        let submission = SubmissionLoop::new(Arc::clone(&pool), config);
        let verifier = BalanceVerifier::new(
            Duration::from_millis(config.verify_delay_ms),
            config.verify_epsilon_atoms,
        );
        Self {
            pool,
            fee_policy,
            builder,
            signers,
            submission,
            verifier,
            min_transfer_atoms: config.min_transfer_atoms,
        }
    }

    /// 唯一入口。失败时的错误分类见 `TransferError`；
    /// `TimedOutUnconfirmed` 表示链上状态未知，调用方不得按失败重发。
    pub async fn execute(&self, request: &TransferRequest) -> TransferResult<TransferOutcome> {
        // 网络调用前的快速失败：金额、地址、签名人配置
        let requested_atoms = request.validated_atoms(self.min_transfer_atoms)?;
        let fee_payer = self
            .fee_policy
            .resolve_fee_payer(request.source, request.sponsored)?;
        if request.source != self.signers.sender_pubkey() {
            return Err(TransferError::ConfigurationError(format!(
                "付款账户 {} 与已加载的私钥 {} 不一致",
                request.source,
                self.signers.sender_pubkey()
            )));
        }
        let signer_set = self.signers.resolve(fee_payer)?;

        let rpc = self.pool.current();
        let token = match &request.asset {
            AssetKind::Native => None,
            AssetKind::Token { mint, .. } => Some(
                self.builder
                    .probe_token_destination(&rpc, &request.destination, mint)
                    .await?,
            ),
        };
        let token_program = token.map(|t| t.token_program);

        // 金额在定稿前按实时余额重算，避免请求时的数字早已过期。
        // 原生且自付网络费时先扣出费用预留，清空后的账户才付得起上链费
        let fee_reserve = native_fee_allowance(
            request,
            fee_payer,
            self.builder.priority_price(request.priority),
        );
        let before = self.verifier.snapshot(&rpc, request, token_program).await?;
        let (gross, drained) = clamp_to_available(requested_atoms, before.source, fee_reserve)?;
        if gross < requested_atoms {
            warn!(
                target: "engine",
                requested = requested_atoms,
                available = before.source,
                "可用余额低于请求金额，按余额全额转出"
            );
        }
        let breakdown = self.fee_policy.compute(gross, request.category);

        info!(
            target: "engine",
            source = %request.source,
            destination = %request.destination,
            gross = breakdown.gross,
            company_fee = breakdown.company_fee,
            net = breakdown.net_recipient,
            fee_payer = %fee_payer,
            drained,
            "转账请求校验完成，开始构建交易"
        );

        let plan = self.builder.assemble(request, &breakdown, fee_payer, token)?;
        let receipt = self.submission.run(&plan, &signer_set).await?;

        let expected = ExpectedDelta {
            source_delta: gross,
            destination_delta: breakdown.net_recipient,
            drained,
            fee_allowance: fee_reserve,
        };
        // 交易已落地，此后的失败一律归为校验问题而不是提交失败
        self.verifier
            .verify(&self.pool.current(), request, token_program, before, expected)
            .await
            .map_err(|err| match err {
                TransferError::VerificationFailed(_) => err,
                other => TransferError::VerificationFailed(format!(
                    "交易 {} 已确认，但复读余额失败: {other}",
                    receipt.signature
                )),
            })?;

        let outcome = TransferOutcome {
            signature: receipt.signature,
            fee: breakdown,
            drained,
            verified: true,
            attempts: receipt.attempts,
        };
        info!(
            target: "engine",
            signature = %outcome.signature,
            attempts = outcome.attempts.len(),
            "转账完成并通过余额校验"
        );
        Ok(outcome)
    }
}

/// 可用余额不足以覆盖请求金额时，夹到可支配余额全额转出（清空源
/// 账户，不留尘埃）。`fee_reserve` 先从余额中扣出，清空之后账户仍
/// 付得起网络费；扣完预留一无所剩则直接拒绝。
fn clamp_to_available(
    requested: u64,
    available: u64,
    fee_reserve: u64,
) -> TransferResult<(u64, bool)> {
    let spendable = available.saturating_sub(fee_reserve);
    if spendable == 0 {
        return Err(TransferError::InsufficientBalance {
            available,
            required: requested.saturating_add(fee_reserve),
        });
    }
    if spendable < requested {
        return Ok((spendable, true));
    }
    Ok((requested, spendable == requested))
}

/// 源账户自付网络费的原生转账需要预留的 lamports 上限：
/// 基础签名费加上按满额 CU 预算折算的优先费。
fn native_fee_allowance(
    request: &TransferRequest,
    fee_payer: Pubkey,
    priority_price_micro_lamports: u64,
) -> u64 {
    if matches!(request.asset, AssetKind::Native) && fee_payer == request.source {
        let priority = priority_price_micro_lamports
            .saturating_mul(MAX_COMPUTE_UNITS_PER_TX)
            / 1_000_000;
        BASE_NETWORK_FEE_RESERVE.saturating_add(priority)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_requested_when_balance_sufficient() {
        let (gross, drained) = clamp_to_available(1_000, 5_000, 0).expect("ok");
        assert_eq!(gross, 1_000);
        assert!(!drained);
    }

    #[test]
    fn clamp_to_exact_balance_is_a_drain() {
        let (gross, drained) = clamp_to_available(1_000, 1_000, 0).expect("ok");
        assert_eq!(gross, 1_000);
        assert!(drained);
    }

    #[test]
    fn short_balance_clamps_and_drains() {
        // 请求 10.00，可用 9.95：按 9.95 全额转出
        let (gross, drained) = clamp_to_available(10_000_000, 9_950_000, 0).expect("ok");
        assert_eq!(gross, 9_950_000);
        assert!(drained);
    }

    #[test]
    fn zero_balance_is_insufficient() {
        let err = clamp_to_available(1_000, 0, 0).unwrap_err();
        assert_eq!(err.kind(), "insufficient_balance");
    }

    #[test]
    fn native_drain_reserves_network_fee() {
        // 自付网络费的清空转账要把费用预留留在账户里，否则上链必败
        let (gross, drained) =
            clamp_to_available(10_000_000_000, 9_950_000_000, BASE_NETWORK_FEE_RESERVE)
                .expect("ok");
        assert_eq!(gross, 9_950_000_000 - BASE_NETWORK_FEE_RESERVE);
        assert!(drained);
    }

    #[test]
    fn balance_below_fee_reserve_is_insufficient() {
        let err = clamp_to_available(1_000_000, 9_000, BASE_NETWORK_FEE_RESERVE).unwrap_err();
        assert_eq!(err.kind(), "insufficient_balance");
    }

    #[test]
    fn clamped_gross_still_conserves_fee_split() {
        use std::collections::BTreeMap;
        // 场景：请求 10.00（净 9.90 + 费 0.10），余额只有 9.95
        let (gross, drained) = clamp_to_available(10_000_000, 9_950_000, 0).expect("ok");
        assert!(drained);
        let policy = FeePolicy::from_config(
            &crate::config::FeeConfig {
                rate_bps: 100,
                category_rate_bps: BTreeMap::new(),
                min_fee_atoms: 0,
                max_fee_atoms: u64::MAX,
                collection_account: Pubkey::new_unique().to_string(),
            },
            None,
        )
        .expect("policy");
        let breakdown = policy.compute(gross, TransferCategory::Settlement);
        // 校验对象是夹取后的金额，而不是原始请求金额
        assert_eq!(breakdown.gross, 9_950_000);
        assert_eq!(breakdown.company_fee + breakdown.net_recipient, 9_950_000);
        assert_eq!(breakdown.company_fee, 99_500);
    }

    #[test]
    fn native_self_paid_transfer_gets_fee_allowance() {
        use rust_decimal::Decimal;
        use std::str::FromStr;
        let request = TransferRequest {
            source: Pubkey::new_unique(),
            destination: Pubkey::new_unique(),
            amount: Decimal::from_str("1").unwrap(),
            asset: AssetKind::Native,
            memo: None,
            priority: PriorityTier::Low,
            category: TransferCategory::Settlement,
            sponsored: false,
        };
        assert_eq!(
            native_fee_allowance(&request, request.source, 0),
            BASE_NETWORK_FEE_RESERVE
        );
        assert_eq!(native_fee_allowance(&request, Pubkey::new_unique(), 0), 0);
    }

    #[test]
    fn fee_allowance_scales_with_priority_price() {
        use rust_decimal::Decimal;
        use std::str::FromStr;
        let request = TransferRequest {
            source: Pubkey::new_unique(),
            destination: Pubkey::new_unique(),
            amount: Decimal::from_str("1").unwrap(),
            asset: AssetKind::Native,
            memo: None,
            priority: PriorityTier::High,
            category: TransferCategory::Settlement,
            sponsored: false,
        };
        // 50_000 µlam/CU 在 1_400_000 CU 预算下折合 70_000 lamports 优先费
        assert_eq!(
            native_fee_allowance(&request, request.source, 50_000),
            BASE_NETWORK_FEE_RESERVE + 70_000
        );
    }
}
