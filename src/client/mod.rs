mod list;
mod transport;
mod window;

pub use list::ConversationList;
pub use transport::{ChatApi, ChatSocket, HttpApi};
pub use window::{ChatWindow, TypingDebounce};
