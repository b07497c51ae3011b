//! Typed error surfaced to query iterators and `Dataset` callers.
//!
//! Internal actor and pool plumbing uses `anyhow::Result` with `.context(..)`
//! the way `versatiles_pipeline` does; `QueryError` exists only at the
//! boundary where a caller needs to match on *why* a query failed rather
//! than just log it.

use crate::footprint::Footprint;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
	#[error("invalid query: {0}")]
	InvalidInput(String),

	#[error("compute/merge contract violation for cache tile {cache_fp:?}: {reason}")]
	ContractViolation { cache_fp: Footprint, reason: String },

	#[error("I/O error on cache tile {cache_fp:?}: {source}")]
	Io {
		cache_fp: Footprint,
		#[source]
		source: anyhow::Error,
	},

	#[error("internal scheduler invariant violated: {0}")]
	Programmer(String),
}

impl QueryError {
	#[must_use]
	pub fn invalid_input(msg: impl Into<String>) -> Self {
		QueryError::InvalidInput(msg.into())
	}

	#[must_use]
	pub fn contract_violation(cache_fp: Footprint, reason: impl Into<String>) -> Self {
		QueryError::ContractViolation {
			cache_fp,
			reason: reason.into(),
		}
	}

	#[must_use]
	pub fn io(cache_fp: Footprint, source: anyhow::Error) -> Self {
		QueryError::Io { cache_fp, source }
	}

	#[must_use]
	pub fn programmer(msg: impl Into<String>) -> Self {
		QueryError::Programmer(msg.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_cache_fp() {
		let fp = Footprint::new(0.0, 0.0, 1.0, -1.0, 4, 4);
		let err = QueryError::contract_violation(fp, "wrong shape");
		let msg = err.to_string();
		assert!(msg.contains("wrong shape"));
	}
}
