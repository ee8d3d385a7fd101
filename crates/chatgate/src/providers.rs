pub mod base;
pub mod configs;
pub mod factory;
pub mod fee;
pub mod standard;
pub mod utils;

#[cfg(test)]
pub mod mock;
