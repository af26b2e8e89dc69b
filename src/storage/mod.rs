pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryGateway;
pub use postgres::PostgresGateway;
pub use traits::PersistenceGateway;
