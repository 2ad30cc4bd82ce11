pub mod abi;
pub mod metadata;
pub mod rpc;
pub mod transfer_processor;
pub mod transformations;

use alloy_provider::{Provider, ProviderBuilder, WsConnect};
use tracing::warn;

use crate::models::errors::ConnectionError;

/// Opens the websocket connection used for both the log subscription and
/// read-only calls.
pub async fn connect_provider(rpc_ws_url: &str) -> Result<impl Provider + use<>, ConnectionError> {
    ProviderBuilder::new()
        .connect_ws(WsConnect::new(rpc_ws_url))
        .await
        .map_err(|e| {
            warn!("Failed to connect to {}. Error details:\n{:#?}", rpc_ws_url, e);
            ConnectionError::Connect {
                url: rpc_ws_url.to_string(),
                message: e.to_string(),
            }
        })
}
