use alloy_primitives::{Address, B256};

////////////////////////////////////// RPC Data ////////////////////////////////////////
// A log as delivered by the node subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcLogData {
    pub address: Address,
    pub topics: Vec<B256>,
    pub tx_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
}
