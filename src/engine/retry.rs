//! 提交循环的纯状态部分：阶段流转、退避节奏、错误分级与
//! 超时后的状态裁决。全部不做 I/O，可脱离网络单测。

use std::time::Duration;

use rand::Rng;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_request::RpcError;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::TransactionError;

/// 单次尝试的阶段。模拟阶段只在指令集中不含建账指令时进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Building,
    Simulating,
    Signing,
    Submitting,
    Confirming,
    Confirmed,
    TimedOutUnconfirmed,
    Failed,
}

impl Phase {
    pub fn advance(self, simulate: bool) -> Phase {
        match self {
            Phase::Building => {
                if simulate {
                    Phase::Simulating
                } else {
                    Phase::Signing
                }
            }
            Phase::Simulating => Phase::Signing,
            Phase::Signing => Phase::Submitting,
            Phase::Submitting => Phase::Confirming,
            Phase::Confirming => Phase::Confirmed,
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Confirmed | Phase::TimedOutUnconfirmed | Phase::Failed
        )
    }
}

/// 错误分级决定后续动作：瞬时错误轮换端点后重试，
/// 逻辑错误立即终止，重试不可能成功且有重复副作用风险。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

pub fn classify_client_error(err: &ClientError) -> ErrorClass {
    match err.kind() {
        ClientErrorKind::Io(_) => ErrorClass::Transient,
        ClientErrorKind::Reqwest(_) => ErrorClass::Transient,
        ClientErrorKind::Middleware(_) => ErrorClass::Transient,
        ClientErrorKind::SerdeJson(_) => ErrorClass::Transient,
        ClientErrorKind::RpcError(rpc_err) => match rpc_err {
            // 请求没有到达节点或节点未能应答，属传输层问题
            RpcError::RpcRequestError(_) => ErrorClass::Transient,
            RpcError::ForUser(_) => ErrorClass::Transient,
            RpcError::ParseError(_) => ErrorClass::Transient,
            // 节点收到请求并明确拒绝，重试无意义
            RpcError::RpcResponseError { .. } => ErrorClass::Fatal,
        },
        ClientErrorKind::SigningError(_) => ErrorClass::Fatal,
        ClientErrorKind::TransactionError(_) => ErrorClass::Fatal,
        ClientErrorKind::Custom(_) => ErrorClass::Fatal,
    }
}

/// 指数退避：`base × 2^attempt`，附加最多半个 base 的抖动。
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    base: Duration,
    max_retries: usize,
}

impl RetrySchedule {
    pub fn new(base: Duration, max_retries: usize) -> Self {
        Self { base, max_retries }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn has_budget(&self, attempt: usize) -> bool {
        attempt < self.max_retries
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16) as u32;
        let base = self.base.saturating_mul(factor);
        let jitter_cap = self.base.as_millis() as u64 / 2;
        if jitter_cap == 0 {
            return base;
        }
        let jitter = rand::rng().random_range(0..=jitter_cap);
        base + Duration::from_millis(jitter)
    }
}

/// 本地确认超时后对签名状态轮询结果的裁决。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationVerdict {
    /// 链上已落地且无错误，即便本地超时也按成功处理。
    Landed,
    /// 链上已落地但执行出错，属最终失败。
    Rejected(String),
    /// 状态确实未知，交由调用方后续查询，绝不盲目重发。
    Unknown,
}

pub fn resolve_status(status: Option<Result<(), TransactionError>>) -> ConfirmationVerdict {
    match status {
        Some(Ok(())) => ConfirmationVerdict::Landed,
        Some(Err(err)) => ConfirmationVerdict::Rejected(err.to_string()),
        None => ConfirmationVerdict::Unknown,
    }
}

/// 单次提交尝试的不可变记录，写入后不再修改。
#[derive(Debug, Clone)]
pub struct SubmissionAttempt {
    pub endpoint: String,
    pub blockhash: Hash,
    pub signature: Option<Signature>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Confirmed,
    Transient(String),
    Fatal(String),
    Unconfirmed,
}
