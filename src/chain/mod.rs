//! Chain access: the data source interface, its Esplora implementation and
//! the retrying gateway episodes go through.

pub mod esplora;
pub mod gateway;
pub mod source;

pub use esplora::EsploraClient;
pub use gateway::{ChainGateway, GatewayError, RetryPolicy};
pub use source::{ChainDataSource, SourceError};

#[cfg(test)]
pub use source::MockChainDataSource;
