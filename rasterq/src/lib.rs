//! `rasterq`: the public-facing `Dataset` facade over `rasterq_core`'s actor
//! pipeline, a small CLI, configuration loading, and the in-memory
//! `MockBackend`/`ThreadPool`/`NearestNeighborKernel` external-collaborator
//! implementations used by the CLI and by this crate's own test suite
//! (spec.md §1 "dataset-level facade" and "pool primitives" are explicitly
//! external collaborators; this crate is where they live).

pub mod config;
pub mod dataset;
pub mod kernel;
pub mod mock_backend;
pub mod pool;

pub use config::{Config, ConfigError};
pub use dataset::{Dataset, DatasetBuilder, QueryIter};
pub use kernel::NearestNeighborKernel;
pub use mock_backend::MockBackend;
pub use pool::ThreadPool;
