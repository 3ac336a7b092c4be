pub mod data_source;
pub mod exchange;
pub mod info_client;
pub mod stream;
pub mod types;

pub use data_source::DataSource;
pub use exchange::{ExchangeClient, OrderRequest, OrderStatus, OrderVenue};
pub use info_client::{InfoClient, InfoProvider};
pub use stream::StreamClient;
