//! sprd-pp: SPRD display backend pixel post-processing
//!
//! Schedules format conversion, scaling, rotation and cropping jobs on the
//! SPRD image post-processor (IPP) through the DRM IPP ioctls.
//!
//! # Features
//!
//! - **Roadmaps**: conversions beyond one pass's scale ratio are split into
//!   chained steps with intermediate buffers
//! - **Scheduling**: one active task per instance, hardware jobs reused
//!   across commits and paused between steps
//! - **Events**: completions read from the DRM node and routed back to the
//!   issuing instance
//!
//! # Example
//!
//! ```rust,no_run
//! use sprd_pp::{Backend, BackendConfig, PpBackend};
//! use sprd_pp::types::{BufferConfig, ConversionSpec, PixelFormat, Size};
//!
//! #[tokio::main]
//! async fn main() -> sprd_pp::Result<()> {
//!     let mut backend = Backend::open(BackendConfig::default())?;
//!     let id = backend.create_pp()?;
//!
//!     let spec = ConversionSpec::new(
//!         BufferConfig::full(PixelFormat::NV12, Size::FHD_1080P),
//!         BufferConfig::full(PixelFormat::XRGB8888, Size::new(320, 180)),
//!     );
//!     let src = backend.allocator().allocate(spec.src.size, spec.src.format)?;
//!     let dst = backend.allocator().allocate(spec.dst.size, spec.dst.format)?;
//!
//!     let pp = backend.pp(id)?;
//!     pp.set_info(spec)?;
//!     pp.set_done_handler(|_src, dst| println!("converted into {:?}", dst.size()));
//!     pp.attach(src, dst)?;
//!     pp.commit()?;
//!
//!     sprd_pp::event_loop::run(&mut backend, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod event_loop;
pub mod format;
pub mod pp;
pub mod types;

// Re-exports for convenience
pub use backend::{Backend, DispatchStats, PpBackend};
pub use config::{BackendConfig, PpConfig};
pub use error::{Error, ErrorKind, Result};
pub use pp::{PpCapabilities, PpId, PpInstance, Roadmap, SurfaceAllocator, SurfaceRef};
pub use types::{BufferConfig, ConversionSpec, PixelFormat, Rect, Size, Transform};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
