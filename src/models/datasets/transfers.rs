use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

////////////////////////////////// Classified Data /////////////////////////////////////
// An accepted ERC-721 transfer, before enrichment. from/to are the raw indexed topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub contract_address: Address,
    pub tx_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub from_address: B256,
    pub to_address: B256,
    pub token_id: U256,
}

/////////////////////////////////// Transformed Data ///////////////////////////////////
// Final output format. Enrichment fields are empty when the lookup failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedTransferData {
    pub contract_address: Address,
    pub transaction_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub from_address: B256,
    pub to_address: B256,
    #[serde(serialize_with = "serialize_decimal")]
    pub token_id: U256,
    #[serde(rename = "tokenURI")]
    pub token_uri: String,
    pub contract_name: String,
    pub contract_symbol: String,
    pub token_metadata: String,
    pub observed_at: DateTime<Utc>,
}

impl EnrichedTransferData {
    pub fn new(
        event: TransferEvent,
        contract_name: String,
        contract_symbol: String,
        token_uri: String,
        token_metadata: String,
    ) -> Self {
        Self {
            contract_address: event.contract_address,
            transaction_hash: event.tx_hash,
            block_number: event.block_number,
            log_index: event.log_index,
            from_address: event.from_address,
            to_address: event.to_address,
            token_id: event.token_id,
            token_uri,
            contract_name,
            contract_symbol,
            token_metadata,
            observed_at: Utc::now(),
        }
    }
}

fn serialize_decimal<S: serde::Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
