//! Tools domain module.
//!
//! Everything between "a client asked for tool X" and "here is the result":
//! tool descriptors and their schemas, service modules, catalog assembly and
//! the invocation dispatcher.
//!
//! ## Architecture
//!
//! - `definitions/` - Service modules (one file per backend)
//! - `descriptor.rs` - Tool descriptors and parameter schema validation
//! - `module.rs` - Service modules and required capabilities
//! - `registry.rs` - Known module factories
//! - `catalog.rs` - Selection policy, catalog build and the live handle
//! - `dispatcher.rs` - Invocation routing, deadlines and error mapping
//! - `handlers.rs` - The handler contract every backend implements
//! - `error.rs` - Declaration-time errors
//!
//! ## Adding a New Service
//!
//! 1. Create a file in `definitions/` exposing `NAME` and `module(ctx)`
//! 2. Declare its tools with `ToolDescriptor::builder` and its secrets with
//!    `Capability::secret`
//! 3. Register the factory in `ModuleRegistry::builtin`

pub mod catalog;
pub mod definitions;
pub mod descriptor;
pub mod dispatcher;
mod error;
pub mod handlers;
pub mod module;
mod registry;

pub use catalog::{
    ActiveCatalog, CatalogBuilder, CatalogError, CatalogHandle, CatalogSummary, CatalogWarning,
    Selection,
};
pub use descriptor::{FieldError, ParameterSchema, ToolDescriptor, ToolListing};
pub use dispatcher::{Dispatcher, ErrorKind, InvocationError, InvocationRequest, InvocationResult};
pub use error::ToolError;
pub use handlers::{HandlerError, ToolArgs, ToolHandler, handler_fn, parse_args};
pub use module::{Capability, ModuleContext, ServiceModule};
pub use registry::{ModuleFactory, ModuleRegistry};
