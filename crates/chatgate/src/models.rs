//! These models represent the objects passed between the gateway and its providers
//!
//! There are a few related formats we need to interact with:
//! - the conversation history kept per conversation id
//! - chat-completions messages, sent to the standard provider
//! - a flattened prompt string, sent to the fee-negotiating provider
//!
//! We keep one internal representation and convert at the provider edge.
pub mod message;
pub mod request;
pub mod role;
