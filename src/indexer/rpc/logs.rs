use alloy_rpc_types_eth::Log;

use crate::models::datasets::logs::RpcLogData;

pub trait LogParser {
    fn parse_log(self) -> RpcLogData;
}

impl LogParser for Log {
    fn parse_log(self) -> RpcLogData {
        RpcLogData {
            address: self.inner.address,
            topics: self.inner.data.topics().to_vec(),
            tx_hash: self.transaction_hash,
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }
}
