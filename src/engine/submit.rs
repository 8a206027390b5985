use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::rpc::{BlockhashSnapshot, EndpointPool};

use super::builder::TransferPlan;
use super::error::{TransferError, TransferResult};
use super::retry::{
    AttemptOutcome, ConfirmationVerdict, ErrorClass, Phase, RetrySchedule, SubmissionAttempt,
    classify_client_error, resolve_status,
};
use super::signers::SignerSet;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 提交成功时的回执：确认的签名与全部尝试的审计轨迹。
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    pub signature: Signature,
    pub attempts: Vec<SubmissionAttempt>,
}

/// 提交与确认循环的 I/O 驱动。纯状态流转（阶段、退避、错误分级、
/// 超时裁决）都在 `retry` 模块里，这里只负责把它们接到网络上。
pub struct SubmissionLoop {
    pool: Arc<EndpointPool>,
    schedule: RetrySchedule,
    confirm_timeout: Duration,
    blockhash_retries: usize,
    blockhash_retry_delay: Duration,
}

impl SubmissionLoop {
    pub fn new(pool: Arc<EndpointPool>, config: &EngineConfig) -> Self {
        Self {
            pool,
            schedule: RetrySchedule::new(
                Duration::from_millis(config.backoff_base_ms),
                config.max_retries,
            ),
            confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
            blockhash_retries: config.blockhash_retries,
            blockhash_retry_delay: Duration::from_millis(config.blockhash_retry_delay_ms),
        }
    }

    /// 执行完整的提交循环。每次尝试都取新鲜 blockhash 并重新签名，
    /// 过期的 blockhash 不允许跨尝试复用。
    pub async fn run(
        &self,
        plan: &TransferPlan,
        signers: &SignerSet,
    ) -> TransferResult<SubmissionReceipt> {
        let mut attempts: Vec<SubmissionAttempt> = Vec::new();
        let mut last_transient: Option<String> = None;
        let mut attempt_idx = 0usize;

        loop {
            let client = self.pool.current();
            let endpoint = self.pool.current_url().to_string();
            info!(
                target: "engine::submit",
                attempt = attempt_idx,
                endpoint = %endpoint,
                account_setup = plan.requires_account_setup,
                "开始提交尝试"
            );

            let result = self
                .attempt_once(&client, &endpoint, plan, signers, attempt_idx)
                .await;
            match apply_attempt(result, &mut attempts, &mut last_transient) {
                ControlFlow::Break(Ok(signature)) => {
                    return Ok(SubmissionReceipt {
                        signature,
                        attempts,
                    });
                }
                ControlFlow::Break(Err(error)) => return Err(error),
                ControlFlow::Continue(()) => {
                    warn!(
                        target: "engine::submit",
                        attempt = attempt_idx,
                        endpoint = %endpoint,
                        "瞬时故障，轮换端点后重试"
                    );
                    self.pool.rotate();
                }
            }

            attempt_idx += 1;
            if !self.schedule.has_budget(attempt_idx) {
                warn!(
                    target: "engine::submit",
                    max_retries = self.schedule.max_retries(),
                    "重试预算耗尽"
                );
                return Err(exhausted_error(&attempts, last_transient));
            }
            sleep(self.schedule.backoff(attempt_idx - 1)).await;
        }
    }

    async fn attempt_once(
        &self,
        client: &Arc<RpcClient>,
        endpoint: &str,
        plan: &TransferPlan,
        signers: &SignerSet,
        attempt_idx: usize,
    ) -> AttemptResult {
        let mut phase = Phase::Building;
        let simulate = !plan.requires_account_setup;

        // Building: 新鲜 blockhash，端点内部小退避后才轮换
        let snapshot = match self.fetch_fresh_blockhash(client).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return transient_or_fatal(endpoint, Hash::default(), None, err);
            }
        };

        phase = phase.advance(simulate);
        if phase == Phase::Simulating {
            // 模拟失败是逻辑错误而不是网络抖动，不重试不轮换；
            // 含建账指令的交易对不存在的账户模拟不可靠，整体跳过
            let unsigned = Transaction::new_with_payer(
                &plan.instructions,
                Some(&signers.fee_payer()),
            );
            match client
                .simulate_transaction_with_config(
                    &unsigned,
                    RpcSimulateTransactionConfig {
                        sig_verify: false,
                        replace_recent_blockhash: true,
                        commitment: Some(CommitmentConfig::processed()),
                        ..RpcSimulateTransactionConfig::default()
                    },
                )
                .await
            {
                Ok(response) => {
                    if let Some(err) = response.value.err {
                        let logs = response.value.logs.unwrap_or_default().join("; ");
                        return AttemptResult::Fatal {
                            attempt: SubmissionAttempt {
                                endpoint: endpoint.to_string(),
                                blockhash: snapshot.blockhash,
                                signature: None,
                                outcome: AttemptOutcome::Fatal(err.to_string()),
                            },
                            error: TransferError::SimulationRejected(format!("{err}; {logs}")),
                        };
                    }
                }
                Err(err) => {
                    return transient_or_fatal(endpoint, snapshot.blockhash, None, err.into());
                }
            }
            phase = phase.advance(simulate);
        }

        debug_assert_eq!(phase, Phase::Signing);
        let tx = Transaction::new_signed_with_payer(
            &plan.instructions,
            Some(&signers.fee_payer()),
            &signers.signer_refs(),
            snapshot.blockhash,
        );
        phase = phase.advance(simulate);

        debug_assert_eq!(phase, Phase::Submitting);
        let signature = match client
            .send_transaction_with_config(
                &tx,
                RpcSendTransactionConfig {
                    // 显式模拟已完成（或被刻意跳过），节点侧预检是重复动作
                    skip_preflight: true,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await
        {
            Ok(signature) => signature,
            Err(err) => {
                return transient_or_fatal(endpoint, snapshot.blockhash, None, err.into());
            }
        };
        phase = phase.advance(simulate);

        debug_assert_eq!(phase, Phase::Confirming);
        info!(
            target: "engine::submit",
            attempt = attempt_idx,
            signature = %signature,
            blockhash = %snapshot.blockhash,
            "交易已提交，等待确认"
        );

        match self.await_confirmation(client, &signature).await {
            ConfirmationVerdict::Landed => AttemptResult::Confirmed {
                signature,
                attempt: SubmissionAttempt {
                    endpoint: endpoint.to_string(),
                    blockhash: snapshot.blockhash,
                    signature: Some(signature),
                    outcome: AttemptOutcome::Confirmed,
                },
            },
            ConfirmationVerdict::Rejected(reason) => AttemptResult::Fatal {
                attempt: SubmissionAttempt {
                    endpoint: endpoint.to_string(),
                    blockhash: snapshot.blockhash,
                    signature: Some(signature),
                    outcome: AttemptOutcome::Fatal(reason.clone()),
                },
                error: TransferError::LedgerRejected(reason),
            },
            ConfirmationVerdict::Unknown => AttemptResult::Unconfirmed {
                attempt: SubmissionAttempt {
                    endpoint: endpoint.to_string(),
                    blockhash: snapshot.blockhash,
                    signature: Some(signature),
                    outcome: AttemptOutcome::Unconfirmed,
                },
            },
        }
    }

    /// 端点内重试若干次拿 blockhash，端点彻底不可用才交给外层轮换。
    async fn fetch_fresh_blockhash(
        &self,
        client: &Arc<RpcClient>,
    ) -> TransferResult<BlockhashSnapshot> {
        let mut last_err: Option<TransferError> = None;
        for inner in 0..=self.blockhash_retries {
            match client.get_latest_blockhash().await {
                Ok(blockhash) => {
                    return Ok(BlockhashSnapshot {
                        blockhash,
                        slot: None,
                        last_valid_block_height: None,
                    });
                }
                Err(err) => {
                    if classify_client_error(&err) == ErrorClass::Fatal {
                        return Err(err.into());
                    }
                    last_err = Some(err.into());
                    if inner < self.blockhash_retries {
                        sleep(self.blockhash_retry_delay).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| TransferError::NetworkTransient("获取 blockhash 失败".to_string())))
    }

    /// 有限时长内轮询签名状态；本地超时不等于失败，还要带历史再查
    /// 一次：链上已落地按成功处理，真正未知才返回 Unknown。
    async fn await_confirmation(
        &self,
        client: &Arc<RpcClient>,
        signature: &Signature,
    ) -> ConfirmationVerdict {
        let deadline = Instant::now() + self.confirm_timeout;
        while Instant::now() < deadline {
            match client.get_signature_statuses(&[*signature]).await {
                Ok(response) => {
                    if let Some(Some(status)) = response.value.first().cloned() {
                        if let Some(err) = status.err {
                            return ConfirmationVerdict::Rejected(err.to_string());
                        }
                        if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                            return ConfirmationVerdict::Landed;
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "engine::submit",
                        signature = %signature,
                        error = %err,
                        "查询签名状态失败，继续轮询"
                    );
                }
            }
            sleep(CONFIRM_POLL_INTERVAL).await;
        }

        warn!(
            target: "engine::submit",
            signature = %signature,
            timeout_ms = self.confirm_timeout.as_millis() as u64,
            "本地确认超时，带历史复查签名状态"
        );

        match client
            .get_signature_status_with_commitment_and_history(
                signature,
                CommitmentConfig::confirmed(),
                true,
            )
            .await
        {
            Ok(status) => resolve_status(status),
            Err(err) => {
                warn!(
                    target: "engine::submit",
                    signature = %signature,
                    error = %err,
                    "带历史的状态复查失败，结果按未知处理"
                );
                ConfirmationVerdict::Unknown
            }
        }
    }
}

/// 单次尝试结果到循环动作的映射。`Break` 终结循环，
/// `Continue` 表示轮换端点后再试。纯函数，不触网。
fn apply_attempt(
    result: AttemptResult,
    attempts: &mut Vec<SubmissionAttempt>,
    last_transient: &mut Option<String>,
) -> ControlFlow<TransferResult<Signature>> {
    match result {
        AttemptResult::Confirmed { signature, attempt } => {
            attempts.push(attempt);
            ControlFlow::Break(Ok(signature))
        }
        AttemptResult::Fatal { attempt, error } => {
            attempts.push(attempt);
            ControlFlow::Break(Err(error))
        }
        AttemptResult::Unconfirmed { attempt } => {
            // 已有在途签名，状态未知：绝不重发，交由调用方查询
            let signature = attempt.signature;
            attempts.push(attempt);
            ControlFlow::Break(Err(TransferError::TimedOutUnconfirmed { signature }))
        }
        AttemptResult::Transient { attempt, message } => {
            attempts.push(attempt);
            *last_transient = Some(message);
            ControlFlow::Continue(())
        }
    }
}

/// 预算耗尽时的最终错误：只要有过在途签名，结果就按未知处理。
fn exhausted_error(
    attempts: &[SubmissionAttempt],
    last_transient: Option<String>,
) -> TransferError {
    match attempts.iter().rev().find_map(|a| a.signature) {
        Some(signature) => TransferError::TimedOutUnconfirmed {
            signature: Some(signature),
        },
        None => TransferError::NetworkTransient(
            last_transient.unwrap_or_else(|| "重试预算耗尽".to_string()),
        ),
    }
}

enum AttemptResult {
    Confirmed {
        signature: Signature,
        attempt: SubmissionAttempt,
    },
    Transient {
        attempt: SubmissionAttempt,
        message: String,
    },
    Fatal {
        attempt: SubmissionAttempt,
        error: TransferError,
    },
    Unconfirmed {
        attempt: SubmissionAttempt,
    },
}

fn transient_or_fatal(
    endpoint: &str,
    blockhash: Hash,
    signature: Option<Signature>,
    err: TransferError,
) -> AttemptResult {
    let (class, message) = match &err {
        TransferError::Rpc(client_err) => {
            (classify_client_error(client_err), client_err.to_string())
        }
        TransferError::NetworkTransient(message) => (ErrorClass::Transient, message.clone()),
        other => (ErrorClass::Fatal, other.to_string()),
    };

    match class {
        ErrorClass::Transient => AttemptResult::Transient {
            attempt: SubmissionAttempt {
                endpoint: endpoint.to_string(),
                blockhash,
                signature,
                outcome: AttemptOutcome::Transient(message.clone()),
            },
            message,
        },
        // 交易未触达账本，错误原样上抛，不得伪装成链上拒绝
        ErrorClass::Fatal => AttemptResult::Fatal {
            attempt: SubmissionAttempt {
                endpoint: endpoint.to_string(),
                blockhash,
                signature,
                outcome: AttemptOutcome::Fatal(message.clone()),
            },
            error: err,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_client::rpc_request::{RpcError, RpcResponseErrorData};

    fn transient_attempt(endpoint: &str) -> AttemptResult {
        AttemptResult::Transient {
            attempt: SubmissionAttempt {
                endpoint: endpoint.to_string(),
                blockhash: Hash::default(),
                signature: None,
                outcome: AttemptOutcome::Transient("connection refused".to_string()),
            },
            message: "connection refused".to_string(),
        }
    }

    fn confirmed_attempt(endpoint: &str, signature: Signature) -> AttemptResult {
        AttemptResult::Confirmed {
            signature,
            attempt: SubmissionAttempt {
                endpoint: endpoint.to_string(),
                blockhash: Hash::default(),
                signature: Some(signature),
                outcome: AttemptOutcome::Confirmed,
            },
        }
    }

    #[test]
    fn two_transient_failures_then_success_rotates_twice() {
        let urls = (0..3).map(|i| format!("http://node-{i}:8899")).collect();
        let pool = EndpointPool::new(urls, CommitmentConfig::confirmed()).expect("pool");
        let mut attempts = Vec::new();
        let mut last_transient = None;
        let signature = Signature::default();

        let results = [
            transient_attempt("http://node-0:8899"),
            transient_attempt("http://node-1:8899"),
            confirmed_attempt("http://node-2:8899", signature),
        ];
        let mut outcome = None;
        for result in results {
            match apply_attempt(result, &mut attempts, &mut last_transient) {
                ControlFlow::Continue(()) => pool.rotate(),
                ControlFlow::Break(res) => {
                    outcome = Some(res);
                    break;
                }
            }
        }

        assert_eq!(pool.cursor(), 2);
        assert_eq!(attempts.len(), 3);
        assert_eq!(outcome.expect("terminal").expect("confirmed"), signature);
    }

    #[test]
    fn unconfirmed_attempt_stops_loop_with_pending_signature() {
        let signature = Signature::default();
        let mut attempts = Vec::new();
        let mut last_transient = None;
        let result = AttemptResult::Unconfirmed {
            attempt: SubmissionAttempt {
                endpoint: "http://node-0:8899".to_string(),
                blockhash: Hash::default(),
                signature: Some(signature),
                outcome: AttemptOutcome::Unconfirmed,
            },
        };
        match apply_attempt(result, &mut attempts, &mut last_transient) {
            ControlFlow::Break(Err(TransferError::TimedOutUnconfirmed {
                signature: Some(sig),
            })) => assert_eq!(sig, signature),
            other => panic!("预期 TimedOutUnconfirmed，得到 {other:?}"),
        }
    }

    #[test]
    fn exhausted_budget_without_signature_is_transient_error() {
        let mut attempts = Vec::new();
        let mut last_transient = None;
        for _ in 0..3 {
            let flow = apply_attempt(
                transient_attempt("http://node-0:8899"),
                &mut attempts,
                &mut last_transient,
            );
            assert!(matches!(flow, ControlFlow::Continue(())));
        }
        let err = exhausted_error(&attempts, last_transient);
        assert_eq!(err.kind(), "network_transient");
    }

    #[test]
    fn exhausted_budget_with_in_flight_signature_is_unconfirmed() {
        let signature = Signature::default();
        let attempts = vec![
            SubmissionAttempt {
                endpoint: "http://node-0:8899".to_string(),
                blockhash: Hash::default(),
                signature: Some(signature),
                outcome: AttemptOutcome::Transient("timeout".to_string()),
            },
            SubmissionAttempt {
                endpoint: "http://node-1:8899".to_string(),
                blockhash: Hash::default(),
                signature: None,
                outcome: AttemptOutcome::Transient("timeout".to_string()),
            },
        ];
        match exhausted_error(&attempts, Some("timeout".to_string())) {
            TransferError::TimedOutUnconfirmed {
                signature: Some(sig),
            } => assert_eq!(sig, signature),
            other => panic!("预期 TimedOutUnconfirmed，得到 {other:?}"),
        }
    }

    #[test]
    fn pre_submit_fatal_rpc_error_keeps_rpc_kind() {
        // 请求未触达账本时的硬错误不得标成链上拒绝
        let client_err = solana_client::client_error::ClientError::from(
            RpcError::RpcResponseError {
                code: -32602,
                message: "invalid params".to_string(),
                data: RpcResponseErrorData::Empty,
            },
        );
        let result = transient_or_fatal(
            "http://node-0:8899",
            Hash::default(),
            None,
            TransferError::Rpc(client_err),
        );
        match result {
            AttemptResult::Fatal { error, .. } => assert_eq!(error.kind(), "rpc"),
            _ => panic!("预期 Fatal"),
        }
    }
}
