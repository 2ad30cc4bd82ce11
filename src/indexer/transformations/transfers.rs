use alloy_primitives::{Address, B256, U256};
use std::collections::HashSet;

use crate::models::common::Config;
use crate::models::datasets::logs::RpcLogData;
use crate::models::datasets::transfers::TransferEvent;

/// Why a log was not classified as an ERC-721 transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ExcludedEmitter,
    TopicCount(usize),
    Signature,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExcludedEmitter => "excluded_emitter",
            Self::TopicCount(_) => "topic_count",
            Self::Signature => "signature",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferClassifier {
    signature: B256,
    excluded: HashSet<Address>,
}

impl TransferClassifier {
    pub fn new(signature: B256, excluded: impl IntoIterator<Item = Address>) -> Self {
        Self {
            signature,
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.transfer_signature,
            config.excluded_addresses.iter().copied(),
        )
    }

    pub fn classify(&self, log: &RpcLogData) -> Option<TransferEvent> {
        self.try_classify(log).ok()
    }

    /// ERC-721 transfers index all three arguments, so the log carries exactly
    /// four topics. ERC-20 transfers share the signature with three.
    pub fn try_classify(&self, log: &RpcLogData) -> Result<TransferEvent, Rejection> {
        if self.excluded.contains(&log.address) {
            return Err(Rejection::ExcludedEmitter);
        }

        let [signature, from, to, token_id] = log.topics.as_slice() else {
            return Err(Rejection::TopicCount(log.topics.len()));
        };

        if *signature != self.signature {
            return Err(Rejection::Signature);
        }

        Ok(TransferEvent {
            contract_address: log.address,
            tx_hash: log.tx_hash,
            block_number: log.block_number,
            log_index: log.log_index,
            from_address: *from,
            to_address: *to,
            token_id: U256::from_be_bytes(token_id.0),
        })
    }
}
