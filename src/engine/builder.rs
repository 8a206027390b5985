use std::sync::Arc;

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_system_interface::instruction as system_instruction;
use tracing::debug;

use crate::config::PriorityFeeConfig;

use super::error::{TransferError, TransferResult};
use super::fee::FeeBreakdown;
use super::request::{AssetKind, PriorityTier, TransferRequest};

pub const TOKEN_2022_PROGRAM_ID: Pubkey = spl_token_2022::ID;
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey = spl_associated_token_account::ID;
pub const SYSTEM_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("11111111111111111111111111111111");
pub const MEMO_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");
pub const COMPUTE_BUDGET_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ComputeBudget111111111111111111111111111111");

pub fn derive_associated_token_address(
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Pubkey {
    spl_associated_token_account::get_associated_token_address_with_program_id(
        owner,
        mint,
        token_program,
    )
}

fn build_create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Instruction {
    let associated = derive_associated_token_address(owner, mint, token_program);
    Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(associated, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(*token_program, false),
        ],
        data: vec![1u8],
    }
}

/// transfer_checked 按 mint 实际归属的 token program 构建，
/// token-2022 的 mint 走 spl-token-2022 的指令工厂。
fn build_transfer_checked(
    token_program: &Pubkey,
    source_ata: &Pubkey,
    mint: &Pubkey,
    destination_ata: &Pubkey,
    authority: &Pubkey,
    amount: u64,
    decimals: u8,
) -> TransferResult<Instruction> {
    let result = if *token_program == TOKEN_2022_PROGRAM_ID {
        spl_token_2022::instruction::transfer_checked(
            token_program,
            source_ata,
            mint,
            destination_ata,
            authority,
            &[],
            amount,
            decimals,
        )
    } else {
        spl_token::instruction::transfer_checked(
            token_program,
            source_ata,
            mint,
            destination_ata,
            authority,
            &[],
            amount,
            decimals,
        )
    };
    result.map_err(|err| TransferError::InvalidRequest(format!("构建代币转账指令失败: {err}")))
}

/// 备注指令由 fee payer 签名，链上可据此核对出账主体。
fn build_memo_instruction(text: &str, fee_payer: &Pubkey) -> Instruction {
    Instruction {
        program_id: MEMO_PROGRAM_ID,
        accounts: vec![AccountMeta::new_readonly(*fee_payer, true)],
        data: text.as_bytes().to_vec(),
    }
}

/// 代币转账的目标侧探测结果。
#[derive(Debug, Clone, Copy)]
pub struct TokenDestination {
    pub token_program: Pubkey,
    pub destination_ata_exists: bool,
}

/// 组装完成的指令集。`requires_account_setup` 决定提交时是否跳过模拟：
/// 含建账指令的交易对尚不存在的账户模拟不可靠，必须整体跳过。
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub instructions: Vec<Instruction>,
    pub requires_account_setup: bool,
}

impl TransferPlan {
    pub fn transfer_instruction_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|ix| {
                ix.program_id == SYSTEM_PROGRAM_ID
                    || ix.program_id == spl_token::ID
                    || ix.program_id == TOKEN_2022_PROGRAM_ID
            })
            .count()
    }
}

pub struct TransactionBuilder {
    priority: PriorityFeeConfig,
    collection_account: Option<Pubkey>,
}

impl TransactionBuilder {
    pub fn new(priority: PriorityFeeConfig, collection_account: Option<Pubkey>) -> Self {
        Self {
            priority,
            collection_account,
        }
    }

    pub fn priority_price(&self, tier: PriorityTier) -> u64 {
        match tier {
            PriorityTier::Low => self.priority.low_micro_lamports,
            PriorityTier::Medium => self.priority.medium_micro_lamports,
            PriorityTier::High => self.priority.high_micro_lamports,
        }
    }

    /// 探测代币转账目标账户：一次批量查询拿到 mint 与两种 token program
    /// 下的 ATA，由 mint 的 owner 决定实际归属的 program。
    pub async fn probe_token_destination(
        &self,
        rpc: &Arc<RpcClient>,
        destination: &Pubkey,
        mint: &Pubkey,
    ) -> TransferResult<TokenDestination> {
        let ata_keg = derive_associated_token_address(destination, mint, &spl_token::ID);
        let ata_2022 = derive_associated_token_address(destination, mint, &TOKEN_2022_PROGRAM_ID);
        let accounts = rpc
            .get_multiple_accounts(&[*mint, ata_keg, ata_2022])
            .await?;

        let mint_account = accounts
            .first()
            .and_then(|acc| acc.as_ref())
            .ok_or_else(|| {
                TransferError::InvalidRequest(format!("Mint 账户 {mint} 不存在"))
            })?;

        let (token_program, exists) = if mint_account.owner == TOKEN_2022_PROGRAM_ID {
            (
                TOKEN_2022_PROGRAM_ID,
                accounts.get(2).and_then(|acc| acc.as_ref()).is_some(),
            )
        } else if mint_account.owner == spl_token::ID {
            (
                spl_token::ID,
                accounts.get(1).and_then(|acc| acc.as_ref()).is_some(),
            )
        } else {
            return Err(TransferError::InvalidRequest(format!(
                "Mint {mint} 所属程序 {} 不是已知的 SPL Token Program",
                mint_account.owner
            )));
        };

        debug!(
            target: "engine::builder",
            mint = %mint,
            token_program = %token_program,
            destination_ata_exists = exists,
            "代币目标账户探测完成"
        );

        Ok(TokenDestination {
            token_program,
            destination_ata_exists: exists,
        })
    }

    /// 纯组装：不触网，金额取实时重算后的 `FeeBreakdown`。
    /// 指令顺序固定：优先费 → 建账 → 主转账 → 手续费转账 → 备注。
    pub fn assemble(
        &self,
        request: &TransferRequest,
        breakdown: &FeeBreakdown,
        fee_payer: Pubkey,
        token: Option<TokenDestination>,
    ) -> TransferResult<TransferPlan> {
        let mut instructions: Vec<Instruction> = Vec::with_capacity(5);
        let mut requires_account_setup = false;

        let price = self.priority_price(request.priority);
        if price > 0 {
            instructions.push(ComputeBudgetInstruction::set_compute_unit_price(price));
        }

        match (&request.asset, token) {
            (AssetKind::Native, _) => {
                instructions.push(system_instruction::transfer(
                    &request.source,
                    &request.destination,
                    breakdown.net_recipient,
                ));
                if breakdown.company_fee > 0 {
                    let collection = self.require_collection_account()?;
                    instructions.push(system_instruction::transfer(
                        &request.source,
                        &collection,
                        breakdown.company_fee,
                    ));
                }
            }
            (AssetKind::Token { mint, decimals }, Some(dest)) => {
                if !dest.destination_ata_exists {
                    // 建账费用由 fee payer 承担，账户归收款人所有
                    instructions.push(build_create_associated_token_account_idempotent(
                        &fee_payer,
                        &request.destination,
                        mint,
                        &dest.token_program,
                    ));
                    requires_account_setup = true;
                }

                let source_ata =
                    derive_associated_token_address(&request.source, mint, &dest.token_program);
                let destination_ata = derive_associated_token_address(
                    &request.destination,
                    mint,
                    &dest.token_program,
                );
                instructions.push(build_transfer_checked(
                    &dest.token_program,
                    &source_ata,
                    mint,
                    &destination_ata,
                    &request.source,
                    breakdown.net_recipient,
                    *decimals,
                )?);

                if breakdown.company_fee > 0 {
                    let collection = self.require_collection_account()?;
                    let collection_ata =
                        derive_associated_token_address(&collection, mint, &dest.token_program);
                    instructions.push(build_transfer_checked(
                        &dest.token_program,
                        &source_ata,
                        mint,
                        &collection_ata,
                        &request.source,
                        breakdown.company_fee,
                        *decimals,
                    )?);
                }
            }
            (AssetKind::Token { .. }, None) => {
                return Err(TransferError::InvalidRequest(
                    "代币转账缺少目标账户探测结果".to_string(),
                ));
            }
        }

        if let Some(memo) = request.memo.as_deref().filter(|m| !m.trim().is_empty()) {
            instructions.push(build_memo_instruction(memo, &fee_payer));
        }

        Ok(TransferPlan {
            instructions,
            requires_account_setup,
        })
    }

    fn require_collection_account(&self) -> TransferResult<Pubkey> {
        self.collection_account.ok_or_else(|| {
            TransferError::ConfigurationError(
                "费率大于 0 时必须配置 fee.collection_account".to_string(),
            )
        })
    }
}
