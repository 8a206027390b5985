use solana_client::client_error::ClientError;
use solana_sdk::signature::Signature;
use thiserror::Error;

/// 转账引擎的错误分类。除 `NetworkTransient` 在内部按重试预算消化外，
/// 其余错误一旦出现立即向调用方传播。
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("请求非法: {0}")]
    InvalidRequest(String),
    #[error("余额不足: 可用 {available} atoms，至少需要 {required} atoms")]
    InsufficientBalance { available: u64, required: u64 },
    #[error("配置缺失或非法: {0}")]
    ConfigurationError(String),
    #[error("模拟执行被拒绝: {0}")]
    SimulationRejected(String),
    #[error("网络瞬时故障: {0}")]
    NetworkTransient(String),
    #[error("确认超时，链上状态未知，签名 {signature:?}")]
    TimedOutUnconfirmed { signature: Option<Signature> },
    #[error("交易被链上拒绝: {0}")]
    LedgerRejected(String),
    #[error("余额校验未通过: {0}")]
    VerificationFailed(String),
    #[error("RPC 请求失败: {0}")]
    Rpc(#[from] ClientError),
}

impl TransferError {
    /// 稳定的审计标签，持久化记录与日志均使用该值。
    pub fn kind(&self) -> &'static str {
        match self {
            TransferError::InvalidRequest(_) => "invalid_request",
            TransferError::InsufficientBalance { .. } => "insufficient_balance",
            TransferError::ConfigurationError(_) => "configuration_error",
            TransferError::SimulationRejected(_) => "simulation_rejected",
            TransferError::NetworkTransient(_) => "network_transient",
            TransferError::TimedOutUnconfirmed { .. } => "timed_out_unconfirmed",
            TransferError::LedgerRejected(_) => "ledger_rejected",
            TransferError::VerificationFailed(_) => "verification_failed",
            TransferError::Rpc(_) => "rpc",
        }
    }

    /// 超时且链上状态未知的结果不允许盲目重发，调用方需要据此展示
    /// “处理中，请稍后查询”而不是“失败”。
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TransferError::TimedOutUnconfirmed { .. })
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
