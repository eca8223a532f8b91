//! Catalog subsystem
//!
//! Leaves first: [`config`] and [`container`] locate things, [`store`] opens them,
//! [`catalog`] holds and mutates entries, [`reconcile`] compares them with the container,
//! [`persistence`] writes them back.

pub mod catalog;
pub mod checksum;
pub mod config;
pub mod container;
pub mod error;
pub mod lock;
pub mod persistence;
pub mod reconcile;
pub mod registration;
pub mod store;
