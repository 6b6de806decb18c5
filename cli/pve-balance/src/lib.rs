//! pve-balance: balance VM memory across a Proxmox VE cluster.
//!
//! The binary wires the Proxmox API client into the balancing engine of
//! `pvebal-balance`.

pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod output;
