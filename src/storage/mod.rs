pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use traits::{AgentStateRow, Storage};
