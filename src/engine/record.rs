use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::error::TransferError;
use super::request::{TransferOutcome, TransferRequest};

/// 成功转账后交给持久化协作方的结构化记录。引擎只负责产出数据，
/// 存储与通知由调用方完成。
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub signature: String,
    pub source: String,
    pub destination: String,
    pub gross_atoms: u64,
    pub company_fee_atoms: u64,
    pub net_atoms: u64,
    pub drained: bool,
    pub verified: bool,
    pub category: &'static str,
    pub memo: Option<String>,
    pub timestamp: u64,
}

impl TransferRecord {
    pub fn from_outcome(request: &TransferRequest, outcome: &TransferOutcome) -> Self {
        Self {
            signature: outcome.signature.to_string(),
            source: request.source.to_string(),
            destination: request.destination.to_string(),
            gross_atoms: outcome.fee.gross,
            company_fee_atoms: outcome.fee.company_fee,
            net_atoms: outcome.fee.net_recipient,
            drained: outcome.drained,
            verified: outcome.verified,
            category: request.category.as_str(),
            memo: request.memo.clone(),
            timestamp: unix_timestamp(),
        }
    }
}

/// 失败（或结果未知）时的审计记录。`error_kind` 为稳定标签，
/// `timed_out_unconfirmed` 的记录必须映射为“处理中”而不是“失败”。
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub source: String,
    pub destination: String,
    pub attempted_amount: String,
    pub error_kind: &'static str,
    pub message: String,
    pub pending_signature: Option<String>,
    pub timestamp: u64,
}

impl FailureRecord {
    pub fn from_error(request: &TransferRequest, error: &TransferError) -> Self {
        let pending_signature = match error {
            TransferError::TimedOutUnconfirmed { signature } => {
                signature.map(|sig| sig.to_string())
            }
            _ => None,
        };
        Self {
            source: request.source.to_string(),
            destination: request.destination.to_string(),
            attempted_amount: request.amount.to_string(),
            error_kind: error.kind(),
            message: error.to_string(),
            pending_signature,
            timestamp: unix_timestamp(),
        }
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fee::FeeBreakdown;
    use crate::engine::request::{AssetKind, PriorityTier, TransferCategory};
    use rust_decimal::Decimal;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::Signature;
    use std::str::FromStr;

    fn request() -> TransferRequest {
        TransferRequest {
            source: Pubkey::new_unique(),
            destination: Pubkey::new_unique(),
            amount: Decimal::from_str("10").unwrap(),
            asset: AssetKind::Native,
            memo: Some("dinner".to_string()),
            priority: PriorityTier::Medium,
            category: TransferCategory::Expense,
            sponsored: true,
        }
    }

    #[test]
    fn success_record_carries_fee_breakdown() {
        let request = request();
        let outcome = TransferOutcome {
            signature: Signature::default(),
            fee: FeeBreakdown {
                gross: 10_000_000_000,
                company_fee: 100_000_000,
                net_recipient: 9_900_000_000,
            },
            drained: false,
            verified: true,
            attempts: Vec::new(),
        };
        let record = TransferRecord::from_outcome(&request, &outcome);
        assert_eq!(record.gross_atoms, 10_000_000_000);
        assert_eq!(
            record.company_fee_atoms + record.net_atoms,
            record.gross_atoms
        );
        assert_eq!(record.category, "expense");
        assert!(record.verified);
    }

    #[test]
    fn unconfirmed_failure_keeps_pending_signature() {
        let request = request();
        let sig = Signature::default();
        let error = TransferError::TimedOutUnconfirmed {
            signature: Some(sig),
        };
        let record = FailureRecord::from_error(&request, &error);
        assert_eq!(record.error_kind, "timed_out_unconfirmed");
        assert_eq!(record.pending_signature, Some(sig.to_string()));
    }

    #[test]
    fn plain_failure_has_no_pending_signature() {
        let request = request();
        let error = TransferError::InvalidRequest("bad".to_string());
        let record = FailureRecord::from_error(&request, &error);
        assert_eq!(record.error_kind, "invalid_request");
        assert!(record.pending_signature.is_none());
    }
}
