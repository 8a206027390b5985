use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use spl_token::solana_program::program_pack::Pack;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod engine;
mod rpc;

use config::{CONFIG_TEMPLATE, KeplerConfig, WalletConfig, load_config, wallet};
use engine::{
    AssetKind, FailureRecord, FeePolicy, PriorityTier, SignerCoordinator, TransferCategory,
    TransferEngine, TransferRecord, TransferRequest,
};
use rpc::EndpointPool;

#[derive(Parser, Debug)]
#[command(name = "kepler", version, about = "账单分摊链上转账执行引擎")]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径（默认查找 kepler.toml 或 config/kepler.toml）"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行一笔转账并等待确认与余额校验
    Transfer(TransferCmd),
    /// 查询账户余额（原生 SOL 或指定 mint 的代币）
    Balance(BalanceCmd),
    /// 初始化配置模版文件
    Init(InitCmd),
}

#[derive(Args, Debug)]
struct TransferCmd {
    #[arg(long, help = "收款方钱包地址")]
    to: String,
    #[arg(long, help = "转账金额（十进制，按资产精度）")]
    amount: Decimal,
    #[arg(long, help = "代币 Mint 地址；不填表示转原生 SOL")]
    mint: Option<String>,
    #[arg(long, help = "链上备注，随交易记录存档")]
    memo: Option<String>,
    #[arg(long, default_value = "medium", value_parser = parse_priority, help = "优先级档位: low/medium/high")]
    priority: PriorityTier,
    #[arg(long, default_value = "settlement", value_parser = parse_category, help = "转账类别: settlement/expense/refund")]
    category: TransferCategory,
    #[arg(long, help = "由配置的赞助账户代付网络费")]
    sponsored: bool,
}

#[derive(Args, Debug)]
struct BalanceCmd {
    #[arg(long, help = "查询的账户地址，缺省为当前钱包")]
    owner: Option<String>,
    #[arg(long, help = "代币 Mint 地址；不填查询原生 SOL 余额")]
    mint: Option<String>,
}

#[derive(Args, Debug)]
struct InitCmd {
    #[arg(long, value_name = "DIR", help = "可选输出目录（默认当前目录）")]
    output: Option<PathBuf>,
    #[arg(long, help = "若文件存在则覆盖")]
    force: bool,
}

fn parse_priority(raw: &str) -> std::result::Result<PriorityTier, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" => Ok(PriorityTier::Low),
        "medium" => Ok(PriorityTier::Medium),
        "high" => Ok(PriorityTier::High),
        other => Err(format!("未知优先级档位: {other}")),
    }
}

fn parse_category(raw: &str) -> std::result::Result<TransferCategory, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "settlement" => Ok(TransferCategory::Settlement),
        "expense" => Ok(TransferCategory::Expense),
        "refund" => Ok(TransferCategory::Refund),
        other => Err(format!("未知转账类别: {other}")),
    }
}

fn init_tracing(config: &config::LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

/// 加载付款私钥：环境变量优先，其次按配置声明的编码解析。
fn load_sender_keypair(wallet_cfg: &WalletConfig) -> Result<Arc<Keypair>> {
    if let Ok(value) = env::var("KEPLER_PRIVATE_KEY") {
        if !value.trim().is_empty() {
            let keypair = parse_with_policy(value.trim(), wallet_cfg)
                .map_err(|err| anyhow!("环境变量 KEPLER_PRIVATE_KEY 非法: {err}"))?;
            return Ok(Arc::new(keypair));
        }
    }

    if !wallet_cfg.private_key.trim().is_empty() {
        let keypair = parse_with_policy(wallet_cfg.private_key.trim(), wallet_cfg)
            .map_err(|err| anyhow!("配置 global.wallet.private_key 非法: {err}"))?;
        return Ok(Arc::new(keypair));
    }

    bail!("缺少私钥配置，请提供 global.wallet.private_key 或环境变量 KEPLER_PRIVATE_KEY")
}

fn load_sponsor_keypair(wallet_cfg: &WalletConfig) -> Result<Option<Arc<Keypair>>> {
    if let Ok(value) = env::var("KEPLER_SPONSOR_PRIVATE_KEY") {
        if !value.trim().is_empty() {
            let keypair = parse_with_policy(value.trim(), wallet_cfg)
                .map_err(|err| anyhow!("环境变量 KEPLER_SPONSOR_PRIVATE_KEY 非法: {err}"))?;
            return Ok(Some(Arc::new(keypair)));
        }
    }

    match wallet_cfg.sponsor_private_key.as_deref() {
        Some(raw) if !raw.trim().is_empty() => {
            let keypair = parse_with_policy(raw.trim(), wallet_cfg)
                .map_err(|err| anyhow!("配置 global.wallet.sponsor_private_key 非法: {err}"))?;
            Ok(Some(Arc::new(keypair)))
        }
        _ => Ok(None),
    }
}

fn parse_with_policy(raw: &str, wallet_cfg: &WalletConfig) -> Result<Keypair> {
    if wallet_cfg.allow_legacy_key_guess {
        wallet::parse_keypair_compat(raw)
    } else {
        wallet::parse_keypair(raw, wallet_cfg.key_encoding)
    }
}

fn build_pool(config: &KeplerConfig) -> Result<Arc<EndpointPool>> {
    let urls = config.global.rpc_urls().to_vec();
    let pool = EndpointPool::new(urls, CommitmentConfig::confirmed())?;
    Ok(Arc::new(pool))
}

/// 解析 mint 参数为资产描述，同时返回 mint 所属的代币程序。
/// Token-2022 的 ATA 推导依赖后者，不能一律按经典 SPL Token 处理。
async fn resolve_asset(
    pool: &Arc<EndpointPool>,
    mint_arg: Option<&str>,
) -> Result<(AssetKind, Option<Pubkey>)> {
    let Some(raw) = mint_arg else {
        return Ok((AssetKind::Native, None));
    };
    let mint = Pubkey::from_str(raw.trim()).map_err(|err| anyhow!("Mint 地址非法: {err}"))?;
    let account = pool
        .current()
        .get_account(&mint)
        .await
        .map_err(|err| anyhow!("查询 Mint 账户失败: {err}"))?;
    parse_mint_account(mint, account.owner, &account.data)
}

fn parse_mint_account(
    mint: Pubkey,
    account_owner: Pubkey,
    data: &[u8],
) -> Result<(AssetKind, Option<Pubkey>)> {
    // Token-2022 带扩展的 mint 数据比基础布局长，只解析共同前缀
    if data.len() < spl_token::state::Mint::LEN {
        bail!("Mint 账户数据过短: {} 字节", data.len());
    }
    let state = spl_token::state::Mint::unpack_from_slice(&data[..spl_token::state::Mint::LEN])
        .map_err(|err| anyhow!("解析 Mint 账户失败: {err}"))?;
    Ok((
        AssetKind::Token {
            mint,
            decimals: state.decimals,
        },
        Some(account_owner),
    ))
}

async fn run_transfer(config: KeplerConfig, cmd: TransferCmd) -> Result<()> {
    let destination =
        Pubkey::from_str(cmd.to.trim()).map_err(|err| anyhow!("收款地址非法: {err}"))?;

    let sender = load_sender_keypair(&config.global.wallet)?;
    let sponsor = load_sponsor_keypair(&config.global.wallet)?;
    let sponsor_pubkey = sponsor.as_ref().map(|key| key.pubkey());

    let pool = build_pool(&config)?;
    // 代币程序由引擎探测目标账户时重新确认，这里只取资产描述
    let (asset, _) = resolve_asset(&pool, cmd.mint.as_deref()).await?;

    let fee_policy = FeePolicy::from_config(&config.fee, sponsor_pubkey)
        .map_err(|err| anyhow!(err.to_string()))?;
    let coordinator = SignerCoordinator::new(Arc::clone(&sender), sponsor);
    let engine = TransferEngine::new(Arc::clone(&pool), fee_policy, coordinator, &config.engine);

    let request = TransferRequest {
        source: sender.pubkey(),
        destination,
        amount: cmd.amount,
        asset,
        memo: cmd.memo,
        priority: cmd.priority,
        category: cmd.category,
        sponsored: cmd.sponsored,
    };

    match engine.execute(&request).await {
        Ok(outcome) => {
            let record = TransferRecord::from_outcome(&request, &outcome);
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Err(err) => {
            let record = FailureRecord::from_error(&request, &err);
            println!("{}", serde_json::to_string_pretty(&record)?);
            if err.is_ambiguous() {
                // 状态未知不等于失败：按失败重发有双重支付风险
                warn!(
                    target: "kepler",
                    "转账状态未知，请稍后用签名查询链上结果，不要直接重发"
                );
            } else {
                error!(target: "kepler", kind = err.kind(), "转账失败: {err}");
            }
            Err(anyhow!(err.to_string()))
        }
    }
}

async fn run_balance(config: KeplerConfig, cmd: BalanceCmd) -> Result<()> {
    let pool = build_pool(&config)?;
    let owner = match cmd.owner.as_deref() {
        Some(raw) => Pubkey::from_str(raw.trim()).map_err(|err| anyhow!("账户地址非法: {err}"))?,
        None => load_sender_keypair(&config.global.wallet)?.pubkey(),
    };
    let (asset, token_program) = resolve_asset(&pool, cmd.mint.as_deref()).await?;

    let atoms = engine::verify::read_balance(&pool.current(), &owner, &asset, token_program)
        .await
        .map_err(|err| anyhow!(err.to_string()))?;
    let unit = 10u64.checked_pow(asset.decimals()).unwrap_or(u64::MAX);
    let display = Decimal::from(atoms) / Decimal::from(unit);
    info!(
        target: "kepler",
        owner = %owner,
        atoms,
        "余额查询完成"
    );
    println!("{owner}: {display} ({atoms} atoms)");
    Ok(())
}

fn init_configs(args: InitCmd) -> Result<()> {
    let dir = args.output.unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir)?;
    let path = dir.join("kepler.toml");
    if path.exists() && !args.force {
        bail!("{} 已存在，如需覆盖请加 --force", path.display());
    }
    fs::write(&path, CONFIG_TEMPLATE)?;
    println!("已写入配置模版: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint_data(decimals: u8, extra: usize) -> Vec<u8> {
        let state = spl_token::state::Mint {
            decimals,
            is_initialized: true,
            ..Default::default()
        };
        let mut data = vec![0u8; spl_token::state::Mint::LEN + extra];
        state.pack_into_slice(&mut data[..spl_token::state::Mint::LEN]);
        data
    }

    #[test]
    fn token_2022_mint_keeps_its_owner_program() {
        let mint = Pubkey::new_unique();
        // 带扩展的 mint 数据长于基础布局，前缀解析仍要成功
        let data = mint_data(6, 83);
        let (asset, program) =
            parse_mint_account(mint, spl_token_2022::ID, &data).expect("parse");
        assert_eq!(program, Some(spl_token_2022::ID));
        assert!(matches!(asset, AssetKind::Token { decimals: 6, .. }));
    }

    #[test]
    fn classic_mint_resolves_spl_token_program() {
        let mint = Pubkey::new_unique();
        let data = mint_data(9, 0);
        let (_, program) = parse_mint_account(mint, spl_token::ID, &data).expect("parse");
        assert_eq!(program, Some(spl_token::ID));
    }

    #[test]
    fn truncated_mint_data_is_rejected() {
        let err = parse_mint_account(Pubkey::new_unique(), spl_token::ID, &[0u8; 10]).unwrap_err();
        assert!(err.to_string().contains("过短"));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;
    init_tracing(&config.global.logging);

    match cli.command {
        Command::Transfer(cmd) => run_transfer(config, cmd).await,
        Command::Balance(cmd) => run_balance(config, cmd).await,
        Command::Init(args) => init_configs(args),
    }
}
