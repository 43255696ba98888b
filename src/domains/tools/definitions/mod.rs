//! Service module definitions.
//!
//! Each file builds one [`ServiceModule`](super::ServiceModule) from a
//! [`ModuleContext`](super::ModuleContext). Backend adapters share the HTTP
//! plumbing in `api_client`.

pub mod api_client;
pub mod digitalocean;
pub mod linear;
pub mod system;

pub use api_client::{ApiClient, Auth};
