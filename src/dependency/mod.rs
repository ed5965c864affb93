//! # Entity Dependency Resolution
//!
//! Static import ordering over [`EntityDependency`](crate::models::EntityDependency)
//! rows. The graph is sorted once when the resolver is built; a cycle or a
//! dangling required edge is a configuration error raised at startup.

pub mod resolver;

pub use resolver::DependencyResolver;
