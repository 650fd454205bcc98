pub mod memory;
pub mod traits;

pub use memory::InMemoryPubSub;
pub use traits::{OnMessageCallback, PubSub};
