//! Actor-pipeline query scheduler for tiled raster data.
//!
//! `rasterq_core` turns a query (a list of output footprints) into a
//! stream of ready pixel arrays, fanning each query out across cache-tile
//! reads, resampling and optional user computation, all driven by a
//! single-threaded actor scheduler (see [`scheduler`]).

pub mod actors;
pub mod address;
pub mod array;
pub mod backend;
pub mod cache;
pub mod error;
pub mod footprint;
pub mod messages;
pub mod pool;
pub mod query;
pub mod raster;
pub mod resample;
pub mod scheduler;

pub use array::{DType, PixelArray};
pub use error::QueryError;
pub use footprint::Footprint;
pub use raster::{RasterDescriptor, RasterUid};
pub use scheduler::{Scheduler, SchedulerBuilder};
