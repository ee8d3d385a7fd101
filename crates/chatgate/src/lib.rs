pub mod actions;
pub mod completion;
pub mod conversation;
pub mod errors;
pub mod models;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod stream;
