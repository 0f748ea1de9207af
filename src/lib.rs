//! Library crate for cert-recon-rs: TLS leaf-certificate harvesting over
//! hosts, endpoints and CIDR blocks, with a SQLite-backed store.
pub mod error;
pub mod fetch;
pub mod pool;
pub mod ports;
pub mod scanner;
pub mod sink;
pub mod store;
pub mod targets;
pub mod types;
pub mod writer;
