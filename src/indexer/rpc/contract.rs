use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_eips::BlockId;
use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{TransactionInput, TransactionRequest};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::indexer::abi::ContractCallRequest;
use crate::metrics::Metrics;
use crate::models::errors::CallError;
use crate::utils::strip_html;

/// Read-only `eth_call` against the latest state.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
}

pub struct RpcNodeClient<P> {
    provider: P,
}

impl<P> RpcNodeClient<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> NodeClient for RpcNodeClient<P>
where
    P: Provider + Send + Sync,
{
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));

        self.provider
            .call(tx)
            .block(BlockId::latest())
            .await
            .map_err(|e| anyhow!("RPC error: {}", e))
    }
}

pub struct ContractReader {
    client: Arc<dyn NodeClient>,
    timeout: Duration,
    metrics: Option<Metrics>,
}

impl ContractReader {
    pub fn new(client: Arc<dyn NodeClient>, timeout: Duration, metrics: Option<Metrics>) -> Self {
        Self {
            client,
            timeout,
            metrics,
        }
    }

    pub async fn name(&self, contract: Address) -> Result<String, CallError> {
        self.read(contract, ContractCallRequest::string_getter("name")).await
    }

    pub async fn symbol(&self, contract: Address) -> Result<String, CallError> {
        self.read(contract, ContractCallRequest::string_getter("symbol")).await
    }

    pub async fn token_uri(&self, contract: Address, token_id: U256) -> Result<String, CallError> {
        self.read_string(contract, "tokenURI", &[DynSolValue::Uint(token_id, 256)])
            .await
    }

    /// Calls `function(args)` on `contract` and decodes a single string return.
    ///
    /// A call that returns no values (e.g. an account without code) yields an
    /// empty string.
    pub async fn read_string(
        &self,
        contract: Address,
        function: &str,
        args: &[DynSolValue],
    ) -> Result<String, CallError> {
        let request = ContractCallRequest::new(function, args.to_vec(), vec![DynSolType::String]);
        self.read(contract, request).await
    }

    async fn read(&self, contract: Address, request: ContractCallRequest) -> Result<String, CallError> {
        let function = request.function.as_str();
        let data = request.encode()?;

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.client.call(contract, data)).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(function, start.elapsed(), !matches!(result, Ok(Ok(_))));
        }

        let raw = match result {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                return Err(CallError::Rpc {
                    contract,
                    function: function.to_string(),
                    message: strip_html(&e.to_string()),
                });
            }
            Err(_) => {
                return Err(CallError::Timeout {
                    contract,
                    function: function.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let values = request.decode(&raw)?;
        debug!(
            "{} on {} returned {} bytes, {} values",
            function,
            contract,
            raw.len(),
            values.len()
        );

        Ok(match values.into_iter().next() {
            Some(DynSolValue::String(value)) => value,
            _ => String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::errors::DecodeError;
    use std::sync::Mutex;

    struct ScriptedNode {
        calls: Mutex<Vec<(Address, Bytes)>>,
        response: fn() -> Result<Bytes>,
    }

    impl ScriptedNode {
        fn new(response: fn() -> Result<Bytes>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                response,
            })
        }
    }

    #[async_trait]
    impl NodeClient for ScriptedNode {
        async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
            self.calls.lock().unwrap().push((to, data));
            (self.response)()
        }
    }

    fn reader(node: Arc<ScriptedNode>) -> ContractReader {
        ContractReader::new(node, Duration::from_secs(1), None)
    }

    fn encoded(value: &str) -> Bytes {
        DynSolValue::Tuple(vec![DynSolValue::String(value.to_string())])
            .abi_encode_params()
            .into()
    }

    #[tokio::test]
    async fn test_read_string_decodes_result() {
        let node = ScriptedNode::new(|| Ok(encoded("Bored Ape Yacht Club")));
        let contract = Address::repeat_byte(0x11);

        let name = reader(node.clone()).name(contract).await.unwrap();
        assert_eq!(name, "Bored Ape Yacht Club");

        let calls = node.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, contract);
        assert_eq!(&calls[0].1[..], &[0x06, 0xfd, 0xde, 0x03]);
    }

    #[tokio::test]
    async fn test_token_uri_encodes_token_id() {
        let node = ScriptedNode::new(|| Ok(encoded("ipfs://abc")));

        let uri = reader(node.clone())
            .token_uri(Address::repeat_byte(0x11), U256::from(42))
            .await
            .unwrap();
        assert_eq!(uri, "ipfs://abc");

        let calls = node.calls.lock().unwrap();
        let data = &calls[0].1;
        assert_eq!(&data[..4], &[0xc8, 0x7b, 0x56, 0xdd]);
        assert_eq!(U256::from_be_slice(&data[4..]), U256::from(42));
    }

    #[tokio::test]
    async fn test_named_getter_matches_read_string() {
        let node = ScriptedNode::new(|| Ok(encoded("BAYC")));
        let reader = reader(node.clone());
        let contract = Address::repeat_byte(0x11);

        let by_getter = reader.symbol(contract).await.unwrap();
        let by_name = reader.read_string(contract, "symbol", &[]).await.unwrap();
        assert_eq!(by_getter, by_name);

        let calls = node.calls.lock().unwrap();
        assert_eq!(calls[0], calls[1]);
        assert_eq!(&calls[0].1[..], &[0x95, 0xd8, 0x9b, 0x41]);
    }

    #[tokio::test]
    async fn test_empty_result_is_empty_string() {
        let node = ScriptedNode::new(|| Ok(Bytes::new()));
        let symbol = reader(node).symbol(Address::ZERO).await.unwrap();
        assert_eq!(symbol, "");
    }

    #[tokio::test]
    async fn test_node_error_is_call_error() {
        let node = ScriptedNode::new(|| Err(anyhow!("execution reverted")));
        let result = reader(node).name(Address::ZERO).await;

        match result {
            Err(CallError::Rpc { function, message, .. }) => {
                assert_eq!(function, "name");
                assert!(message.contains("execution reverted"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_result_is_decode_error() {
        // string offset and a length of 100 bytes, with no string data following
        let node = ScriptedNode::new(|| {
            let mut data = vec![0u8; 64];
            data[31] = 0x20;
            data[63] = 100;
            Ok(Bytes::from(data))
        });
        let result = reader(node).name(Address::ZERO).await;
        assert!(matches!(result, Err(CallError::Decode(DecodeError::Abi(_)))));
    }
}
