use std::sync::Arc;
use std::time::Duration;

use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::RpcError;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info};

use super::builder::derive_associated_token_address;
use super::error::{TransferError, TransferResult};
use super::request::{AssetKind, TransferRequest};

/// 转账前后源账户与目标账户的余额快照（最小单位）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub source: u64,
    pub destination: u64,
}

/// 确认后的预期余额变动。`fee_allowance` 仅在源账户自付网络费的
/// 原生转账中非零，用来容纳链上手续费造成的额外扣减。
#[derive(Debug, Clone, Copy)]
pub struct ExpectedDelta {
    pub source_delta: u64,
    pub destination_delta: u64,
    pub drained: bool,
    pub fee_allowance: u64,
}

/// 确认成功后的余额核对。校验失败意味着交易确实落地、但结果与
/// 预期不符，这是记账层面的缺陷信号，必须显式上抛而不是吞掉。
pub struct BalanceVerifier {
    delay: Duration,
    epsilon: u64,
}

impl BalanceVerifier {
    pub fn new(delay: Duration, epsilon: u64) -> Self {
        Self { delay, epsilon }
    }

    pub async fn snapshot(
        &self,
        rpc: &Arc<RpcClient>,
        request: &TransferRequest,
        token_program: Option<Pubkey>,
    ) -> TransferResult<BalanceSnapshot> {
        let source = read_balance(rpc, &request.source, &request.asset, token_program).await?;
        let destination =
            read_balance(rpc, &request.destination, &request.asset, token_program).await?;
        Ok(BalanceSnapshot {
            source,
            destination,
        })
    }

    pub async fn verify(
        &self,
        rpc: &Arc<RpcClient>,
        request: &TransferRequest,
        token_program: Option<Pubkey>,
        before: BalanceSnapshot,
        expected: ExpectedDelta,
    ) -> TransferResult<()> {
        // 等待传播，避免读到确认前的旧状态
        tokio::time::sleep(self.delay).await;
        let after = self.snapshot(rpc, request, token_program).await?;

        debug!(
            target: "engine::verify",
            source_before = before.source,
            source_after = after.source,
            dest_before = before.destination,
            dest_after = after.destination,
            "余额复读完成"
        );

        check_deltas(before, after, expected, self.epsilon)
            .map_err(TransferError::VerificationFailed)?;

        info!(
            target: "engine::verify",
            drained = expected.drained,
            expected_delta = expected.source_delta,
            "余额校验通过"
        );
        Ok(())
    }
}

/// 纯校验逻辑，便于离线测试。
fn check_deltas(
    before: BalanceSnapshot,
    after: BalanceSnapshot,
    expected: ExpectedDelta,
    epsilon: u64,
) -> Result<(), String> {
    if expected.drained {
        // 自付网络费的清空转账会按预留上限留出费用，实际收取往往更少，
        // 残余最多为预留与实际费用之差
        let allowed = epsilon.saturating_add(expected.fee_allowance);
        if after.source > allowed {
            return Err(format!(
                "预期清空源账户，但余额仍有 {} atoms（容差 {epsilon}，网络费余量 {}）",
                after.source, expected.fee_allowance
            ));
        }
    } else {
        let decrease = before.source.saturating_sub(after.source);
        let upper = expected
            .source_delta
            .saturating_add(expected.fee_allowance)
            .saturating_add(epsilon);
        let lower = expected.source_delta.saturating_sub(epsilon);
        if decrease < lower || decrease > upper {
            return Err(format!(
                "源账户减少 {decrease} atoms，预期 {}（容差 {epsilon}，网络费余量 {}）",
                expected.source_delta, expected.fee_allowance
            ));
        }
    }

    let increase = after.destination.saturating_sub(before.destination);
    if increase.abs_diff(expected.destination_delta) > epsilon {
        return Err(format!(
            "目标账户增加 {increase} atoms，预期 {}（容差 {epsilon}）",
            expected.destination_delta
        ));
    }

    Ok(())
}

/// 读取账户在给定资产下的余额。不存在的代币账户按 0 处理。
pub async fn read_balance(
    rpc: &Arc<RpcClient>,
    owner: &Pubkey,
    asset: &AssetKind,
    token_program: Option<Pubkey>,
) -> TransferResult<u64> {
    match asset {
        AssetKind::Native => Ok(rpc.get_balance(owner).await?),
        AssetKind::Token { mint, .. } => {
            let program = token_program.unwrap_or(spl_token::ID);
            let ata = derive_associated_token_address(owner, mint, &program);
            match rpc.get_token_account_balance(&ata).await {
                Ok(balance) => balance.amount.parse::<u64>().map_err(|err| {
                    TransferError::VerificationFailed(format!(
                        "解析代币余额 {} 失败: {err}",
                        balance.amount
                    ))
                }),
                Err(err) if is_account_not_found(&err) => Ok(0),
                Err(err) => Err(TransferError::from(err)),
            }
        }
    }
}

fn is_account_not_found(err: &ClientError) -> bool {
    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { message, .. }) => {
            is_account_missing_message(message)
        }
        ClientErrorKind::RpcError(RpcError::ForUser(message)) => {
            is_account_missing_message(message)
        }
        _ => false,
    }
}

fn is_account_missing_message(message: &str) -> bool {
    let normalized = message.to_ascii_lowercase();
    normalized.contains("could not find account")
        || normalized.contains("account does not exist")
        || normalized.contains("invalid param: could not find")
}
