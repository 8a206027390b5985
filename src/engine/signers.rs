use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};

use super::error::{TransferError, TransferResult};

/// 一笔交易需要的全部签名人，fee payer 恒排在首位，同一账户只出现一次。
#[derive(Debug, Clone)]
pub struct SignerSet {
    fee_payer: Pubkey,
    keys: Vec<Arc<Keypair>>,
}

impl SignerSet {
    pub fn fee_payer(&self) -> Pubkey {
        self.fee_payer
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, account: &Pubkey) -> bool {
        self.keys.iter().any(|key| key.pubkey() == *account)
    }

    /// `Transaction::new_signed_with_payer` 需要的引用列表。
    pub fn signer_refs(&self) -> Vec<&dyn Signer> {
        self.keys
            .iter()
            .map(|key| key.as_ref() as &dyn Signer)
            .collect()
    }
}

/// 根据费用策略的代付决定解析签名人集合。缺失的赞助私钥在
/// 任何网络调用前即报 `ConfigurationError`，不会拖到提交途中才发现。
pub struct SignerCoordinator {
    sender: Arc<Keypair>,
    sponsor: Option<Arc<Keypair>>,
}

impl SignerCoordinator {
    pub fn new(sender: Arc<Keypair>, sponsor: Option<Arc<Keypair>>) -> Self {
        Self { sender, sponsor }
    }

    pub fn sender_pubkey(&self) -> Pubkey {
        self.sender.pubkey()
    }

    pub fn resolve(&self, fee_payer: Pubkey) -> TransferResult<SignerSet> {
        if fee_payer == self.sender.pubkey() {
            return Ok(SignerSet {
                fee_payer,
                keys: vec![Arc::clone(&self.sender)],
            });
        }

        let sponsor = self.sponsor.as_ref().ok_or_else(|| {
            TransferError::ConfigurationError(format!(
                "fee payer {fee_payer} 不是付款账户，且未配置赞助私钥"
            ))
        })?;
        if sponsor.pubkey() != fee_payer {
            return Err(TransferError::ConfigurationError(format!(
                "fee payer {fee_payer} 与配置的赞助账户 {} 不一致",
                sponsor.pubkey()
            )));
        }

        Ok(SignerSet {
            fee_payer,
            keys: vec![Arc::clone(sponsor), Arc::clone(&self.sender)],
        })
    }
}
