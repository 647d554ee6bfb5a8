pub mod config;
mod core;
pub mod error;
pub mod result;
mod routes;
pub mod services;
pub mod start_signer_server;

#[cfg(test)]
mod tests;
