/// Chain Layer
///
/// Everything that touches a blockchain network:
///
/// - Chain identifiers, query descriptors and decoded data types
/// - The chain client collaborator (batched live queries, native events,
///   point fetches) and the factory that opens clients
/// - Connection management with endpoint-specific connect timeouts and
///   hard reset on failure
/// - Watcher configuration
///
/// The wire protocol itself stays behind [`ChainClient`].

pub mod client;
pub mod config;
pub mod connection;
pub mod mock_client;
pub mod types;

pub use client::{BatchStream, ChainClient, ChainClientFactory, EventStream, PushStream};
pub use config::{ChainEndpointConfig, WatchConfig};
pub use connection::ConnectionManager;
pub use mock_client::{MockChainClient, MockClientFactory};
pub use types::{
    AccountBalance, ChainEvent, ChainId, ConnectionStatus, Endpoint, NominatingData, Pallet, PoolCommission,
    PoolMembership, PoolRoles, QueryCall, ReferendumInfo, ReferendumStatus, ValidatorCommission,
};
