use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use tracing::info;

/// 表示一次尝试使用的区块哈希快照。
#[derive(Clone, Debug)]
pub struct BlockhashSnapshot {
    pub blockhash: Hash,
    pub slot: Option<u64>,
    pub last_valid_block_height: Option<u64>,
}

/// 多 RPC 端点的游标池。`rotate()` 只是尽力而为的可用性提示，
/// 并发轮换按 last-write-wins 处理，不提供顺序保证。
pub struct EndpointPool {
    clients: Vec<Arc<RpcClient>>,
    urls: Vec<String>,
    cursor: AtomicUsize,
}

impl EndpointPool {
    pub fn new(urls: Vec<String>, commitment: CommitmentConfig) -> Result<Self, anyhow::Error> {
        if urls.is_empty() {
            anyhow::bail!("rpc_urls 不能为空");
        }
        let clients = urls
            .iter()
            .map(|url| Arc::new(RpcClient::new_with_commitment(url.clone(), commitment)))
            .collect();
        Ok(Self {
            clients,
            urls,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed) % self.clients.len()
    }

    pub fn current(&self) -> Arc<RpcClient> {
        Arc::clone(&self.clients[self.cursor()])
    }

    pub fn current_url(&self) -> &str {
        &self.urls[self.cursor()]
    }

    /// 游标前移一位并切换到下一个端点，可重复调用。
    pub fn rotate(&self) {
        let previous = self.cursor.fetch_add(1, Ordering::Relaxed);
        let next = (previous + 1) % self.clients.len();
        info!(
            target: "rpc::pool",
            from = previous % self.clients.len(),
            to = next,
            endpoint = %self.urls[next],
            "RPC 端点已轮换"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> EndpointPool {
        let urls = (0..n).map(|i| format!("http://node-{i}:8899")).collect();
        EndpointPool::new(urls, CommitmentConfig::confirmed()).expect("pool")
    }

    #[test]
    fn empty_url_list_rejected() {
        assert!(EndpointPool::new(Vec::new(), CommitmentConfig::confirmed()).is_err());
    }

    #[test]
    fn rotate_advances_modulo_len() {
        let pool = pool(3);
        assert_eq!(pool.cursor(), 0);
        pool.rotate();
        assert_eq!(pool.cursor(), 1);
        pool.rotate();
        pool.rotate();
        assert_eq!(pool.cursor(), 0);
        assert_eq!(pool.current_url(), "http://node-0:8899");
    }

    #[test]
    fn single_endpoint_rotation_is_noop() {
        let pool = pool(1);
        pool.rotate();
        pool.rotate();
        assert_eq!(pool.cursor(), 0);
    }
}
