pub mod handler;
pub mod message;
pub mod network;
pub mod serde_utils;
pub mod status;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_utils;
