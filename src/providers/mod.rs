pub mod chat;
pub mod mock;
pub mod openai;

pub use chat::{ChatMessage, ChatProvider, ChatResponse, ToolCall};
pub use mock::MockChatProvider;
pub use openai::OpenAIChatProvider;
