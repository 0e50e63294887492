pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod orders;
pub mod payments;
pub mod signature;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;
