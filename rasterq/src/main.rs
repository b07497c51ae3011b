//! Small CLI exercising the [`rasterq`] facade end to end, mirroring
//! `versatiles`'s `main.rs` shape (a `clap::Parser` root with one
//! subcommand per operation, `env_logger` initialized once in `main`).
//! Real file-backed rasters are out of scope (spec.md §1 Non-goals), so the
//! only data source this binary knows about is the in-memory `MockBackend`,
//! seeded with a flat fill value — enough to drive a query end to end
//! without a GDAL-equivalent dependency this workspace doesn't carry.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rasterq::{Config, Dataset, DatasetBuilder, MockBackend, NearestNeighborKernel, ThreadPool};
use rasterq_core::array::DType;
use rasterq_core::footprint::Footprint;
use rasterq_core::raster::{RasterDescriptor, RasterPools, RasterSource, RasterUid};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, disable_help_subcommand = true)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Repeat for more verbose logging (-v, -vv, -vvv).
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbose: u8,

	/// Optional YAML config file (spec.md §4.12 layered configuration).
	#[arg(long, global = true)]
	config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Query a synthetic mock raster and print the result of each tile.
	Query(QueryArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
	/// Rows in the synthetic raster's full footprint.
	#[arg(long, default_value_t = 16)]
	rows: u32,

	/// Columns in the synthetic raster's full footprint.
	#[arg(long, default_value_t = 16)]
	cols: u32,

	/// Cache-tile edge length (square tiles).
	#[arg(long, default_value_t = 8)]
	tile_size: u32,

	/// Fill value every synthetic cache tile is seeded with.
	#[arg(long, default_value_t = 1.0)]
	fill_value: f64,

	/// Requested footprint: origin_x,origin_y,rows,cols (pixel size fixed at 1.0).
	#[arg(long, value_delimiter = ',', num_args = 4, default_values_t = vec![0.0, 0.0, 4.0, 4.0])]
	fp: Vec<f64>,

	/// Override `max_queue_size` from the loaded config.
	#[arg(long)]
	max_queue_size: Option<usize>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	env_logger::Builder::new()
		.filter_level(match cli.verbose {
			0 => log::LevelFilter::Warn,
			1 => log::LevelFilter::Info,
			2 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		})
		.format_timestamp(None)
		.init();

	let mut config = match &cli.config {
		Some(path) => Config::from_path(path).with_context(|| format!("loading config from {}", path.display()))?,
		None => Config::default(),
	};

	run(cli.command, &mut config)
}

fn run(command: Commands, config: &mut Config) -> Result<()> {
	match command {
		Commands::Query(args) => run_query(args, config),
	}
}

fn run_query(args: QueryArgs, config: &mut Config) -> Result<()> {
	config.override_max_queue_size(args.max_queue_size);

	let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("starting tokio runtime")?;
	runtime.block_on(async_run_query(args, config))
}

async fn async_run_query(args: QueryArgs, config: &Config) -> Result<()> {
	let mut builder = DatasetBuilder::new();
	let io_pool = builder.register_pool(Arc::new(ThreadPool::new(config.io_pool_workers)));

	let full_footprint = Footprint::new(0.0, 0.0, 1.0, -1.0, args.rows, args.cols);
	let descriptor = Arc::new(RasterDescriptor {
		uid: RasterUid::next(),
		dtype: DType::F32,
		channel_count: 1,
		nodata: Some(-9999.0),
		pools: RasterPools { io_pool: Some(io_pool), ..RasterPools::default() },
		full_footprint,
		cache_tile_shape: (args.tile_size, args.tile_size),
		source: RasterSource::Stored,
	});

	let backend = Arc::new(MockBackend::new("mock://cli"));
	seed_every_cache_tile(&backend, &descriptor, args.fill_value);

	builder.register_raster("query_target", Arc::clone(&descriptor), backend, Arc::new(NearestNeighborKernel));
	let dataset = builder.open();

	let &[ox, oy, rows, cols] = args.fp.as_slice() else {
		anyhow::bail!("--fp must give exactly 4 values: origin_x,origin_y,rows,cols");
	};
	let requested = Footprint::new(ox, oy, 1.0, -1.0, rows as u32, cols as u32);

	print_query_result(&dataset, requested, config.max_queue_size).await?;
	dataset.close();
	Ok(())
}

async fn print_query_result(dataset: &Dataset, fp: Footprint, max_queue_size: usize) -> Result<()> {
	let mut it = dataset.iter_data("query_target", vec![fp], &[], max_queue_size)?;
	match it.next() {
		Some(Ok(array)) => {
			let (rows, cols, channels) = array.shape();
			println!("query ok: shape=({rows}, {cols}, {channels})");
			println!("first pixel: {}", array.data()[[0, 0, 0]]);
		}
		Some(Err(e)) => println!("query failed: {e}"),
		None => println!("query produced no tiles"),
	}
	Ok(())
}

fn seed_every_cache_tile(backend: &MockBackend, descriptor: &RasterDescriptor, value: f64) {
	let (full_rows, full_cols) = descriptor.full_footprint.shape();
	let (tile_rows, tile_cols) = descriptor.cache_tile_shape;
	let grid_cols = full_cols.div_ceil(tile_cols);
	let grid_rows = full_rows.div_ceil(tile_rows);
	for row in 0..grid_rows {
		for col in 0..grid_cols {
			let idx = rasterq_core::raster::CacheIndex(u64::from(row) * u64::from(grid_cols) + u64::from(col));
			let fp = descriptor.cache_tile_footprint(idx);
			backend.seed(fp, rasterq_core::array::PixelArray::filled(fp.rows(), fp.cols(), descriptor.channel_count, value, descriptor.dtype));
		}
	}
}
