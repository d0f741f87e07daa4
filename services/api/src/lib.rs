pub mod adapters;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod web;

#[cfg(test)]
pub mod test_support;
