//! s3db-resource - The Resource (spec §4.3)
//!
//! CRUD, id generation, partition maintenance and the hook/middleware
//! pipelines, layered on [`s3db_blob`], [`s3db_codec`] and
//! [`s3db_catalog`]. The Queue Runtime and Counter Engine are built on
//! top of this crate rather than inside it.

pub mod hooks;
pub mod id;
pub mod middleware;
pub mod partition;
pub mod query;
pub mod resource;

pub use hooks::{global_registry, Hook, HookFactoryRegistry, HookPipeline};
pub use id::{IdGenerator, IdGeneratorConfig, IncrementalMode};
pub use middleware::{CoreOp, Middleware, MiddlewareChain, MiddlewareContext, Next};
pub use resource::{Resource, Validated};
