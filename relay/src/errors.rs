use crate::config::ValidationError;
use std::io;

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("failed to bind {transport} listener to {address}: {source}")]
    Bind {
        transport: &'static str,
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),
}
