use std::io::{self, Write};
use std::sync::Mutex;
use tracing::error;

use crate::models::common::OutputFormat;
use crate::models::datasets::transfers::EnrichedTransferData;

/// Destination for enriched transfers. Called concurrently from enrichment tasks.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: &EnrichedTransferData);

    /// Side channel for stream-level failures. Carries no record.
    fn error(&self, message: &str);
}

/// Writes records to stdout, one at a time. Nothing else is written to the
/// record stream; logs and stream errors go through `tracing`.
pub struct ConsoleSink<W = io::Stdout> {
    format: OutputFormat,
    out: Mutex<W>,
}

impl ConsoleSink {
    pub fn new(format: OutputFormat) -> Self {
        Self::with_writer(format, io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn with_writer(format: OutputFormat, out: W) -> Self {
        Self {
            format,
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> RecordSink for ConsoleSink<W> {
    fn emit(&self, record: &EnrichedTransferData) {
        let rendered = match render(record, self.format) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!("Failed to serialize transfer record: {}", e);
                return;
            }
        };

        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = out.write_all(rendered.as_bytes()).and_then(|_| out.flush()) {
            error!("Failed to write transfer record: {}", e);
        }
    }

    fn error(&self, message: &str) {
        error!("Error while checking for ERC 721: {}", message);
    }
}

pub fn render(record: &EnrichedTransferData, format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string(record).map(|json| json + "\n"),
        OutputFormat::Text => Ok(render_text(record)),
    }
}

fn render_text(record: &EnrichedTransferData) -> String {
    let transaction_hash = record
        .transaction_hash
        .map(|hash| hash.to_string())
        .unwrap_or_else(|| "pending".to_string());

    format!(
        "ERC 721 transfer found\n\
         contractAddress = {}\n\
         transactionHash = {}\n\
         fromAddress = {}\n\
         toAddress = {}\n\
         tokenId = {}\n\
         tokenURI = {}\n\
         contractName = {}\n\
         contractSymbol = {}\n\
         tokenMetaData = {}\n\n",
        record.contract_address,
        transaction_hash,
        record.from_address,
        record.to_address,
        record.token_id,
        record.token_uri,
        record.contract_name,
        record.contract_symbol,
        record.token_metadata,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasets::transfers::TransferEvent;
    use alloy_primitives::{Address, B256, U256};

    fn record() -> EnrichedTransferData {
        EnrichedTransferData::new(
            TransferEvent {
                contract_address: Address::repeat_byte(0x11),
                tx_hash: Some(B256::repeat_byte(0x22)),
                block_number: Some(100),
                log_index: Some(7),
                from_address: B256::ZERO,
                to_address: B256::repeat_byte(0x33),
                token_id: U256::from(42),
            },
            "Collection".to_string(),
            "COL".to_string(),
            "ipfs://abc".to_string(),
            String::new(),
        )
    }

    #[test]
    fn test_text_output_lists_every_field() {
        let text = render(&record(), OutputFormat::Text).unwrap();
        assert!(text.starts_with("ERC 721 transfer found\n"));
        assert!(text.contains("tokenId = 42\n"));
        assert!(text.contains("tokenURI = ipfs://abc\n"));
        assert!(text.contains("contractName = Collection\n"));
        assert!(text.contains("contractSymbol = COL\n"));
        assert!(text.contains("tokenMetaData = \n"));
        assert!(text.contains(&format!("transactionHash = {}\n", B256::repeat_byte(0x22))));
        assert!(text.contains(&format!("toAddress = 0x{}\n", "33".repeat(32))));
    }

    #[test]
    fn test_json_output_is_one_line() {
        let json = render(&record(), OutputFormat::Json).unwrap();
        assert_eq!(json.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(json.trim_end()).unwrap();
        assert_eq!(value["tokenId"], "42");
        assert_eq!(value["tokenURI"], "ipfs://abc");
        assert_eq!(value["contractSymbol"], "COL");
        assert_eq!(value["tokenMetadata"], "");
        assert_eq!(value["blockNumber"], 100);
        assert_eq!(value["logIndex"], 7);
        assert_eq!(value["toAddress"], format!("0x{}", "33".repeat(32)));
    }

    #[test]
    fn test_json_stream_carries_only_records() {
        let sink = ConsoleSink::with_writer(OutputFormat::Json, Vec::new());
        sink.emit(&record());
        sink.error("subscription closed");
        sink.emit(&record());

        let out = sink.out.lock().unwrap();
        let lines: Vec<&str> = std::str::from_utf8(&out).unwrap().lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["contractName"], "Collection");
        }
    }
}
