//! One module per actor kind (spec.md §4.3-§4.10). Each actor is plain,
//! synchronous, owned-by-the-scheduler-task state; see `crate::scheduler`
//! for how instances are registered and dispatched.

pub mod cache_extractor;
pub mod cache_state;
pub mod computer;
pub mod merger;
pub mod producer;
pub mod queries_handler;
pub mod reader;
pub mod resampler;
pub mod writer;

pub use cache_extractor::CacheExtractor;
pub use cache_state::CacheStateHandler;
pub use computer::Computer;
pub use merger::Merger;
pub use producer::Producer;
pub use queries_handler::QueriesHandler;
pub use reader::Reader;
pub use resampler::Resampler;
pub use writer::Writer;
