//! Domains module containing business logic organized by bounded contexts.
//!
//! The server has a single domain today: the tool catalog, its service
//! modules and the dispatcher that runs them.

pub mod tools;
