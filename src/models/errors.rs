use alloy_primitives::Address;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to connect to node at {url}: {message}")]
    Connect { url: String, message: String },
    #[error("Failed to subscribe to transfer logs: {message}")]
    Subscribe { message: String },
    #[error("Log subscription fell behind, {skipped} logs were dropped")]
    Lagged { skipped: u64 },
    #[error("Log subscription was closed by the node")]
    Closed,
}

impl ConnectionError {
    /// Whether the stream can still deliver logs after this error.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Lagged { .. })
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Argument {index} of {function} has no canonical ABI type")]
    UnsupportedArgument { function: String, index: usize },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed return data: {0}")]
    Abi(#[from] alloy_dyn_abi::Error),
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Call to {function} on {contract} failed: {message}")]
    Rpc {
        contract: Address,
        function: String,
        message: String,
    },
    #[error("Call to {function} on {contract} timed out after {timeout:?}")]
    Timeout {
        contract: Address,
        function: String,
        timeout: Duration,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Metadata request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Metadata request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}
