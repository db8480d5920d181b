//! The scheduling and execution engine for end-to-end LLM inference
//! benchmarking: quota-aware deployment lifecycles driven through
//! constant-arrival-rate load scenarios, plus the configuration-feasibility
//! pipeline and result persistence layout that feed it.
//!
//! The inference-endpoint control plane, runtime-config recommender, compute
//! catalog, and load-generator binary are external collaborators; this crate
//! specifies only their contracts (the `CatalogClient`, `RecommenderClient`,
//! and `EndpointDriver` traits) and the coordination logic built on top.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod group;
pub mod planner;
pub mod recommender;
pub mod result;
pub mod scenario;
pub mod scheduler;
pub mod template;
