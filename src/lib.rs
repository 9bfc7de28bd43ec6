//! New-connection desk for an electricity utility: the connection request
//! lifecycle, the slab tariff calculator and the identifier generator behind it.

pub mod billing;
pub mod config;
pub mod directory;
pub mod error;
pub mod identifiers;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod service;
pub mod store;
pub mod tariff;
pub mod types;
