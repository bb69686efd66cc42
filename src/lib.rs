#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # hwc-overlay: video overlay planes for hardware compositors
//!
//! This crate drives the video overlay plane of a display pipe from inside a
//! compositor's hardware abstraction layer. It builds the register image the
//! overlay engine scans out of, submits enable/disable transitions to the
//! display driver, and keeps rotated copies of video content for orientations
//! the overlay engine can not handle on its own.
//!
//! ## Structure of the crate
//!
//! - [`backend::allocator`] describes mapped buffers, device memory and the
//!   metadata video producers attach to their frames.
//! - [`backend::overlay`] contains the overlay plane itself, its register
//!   layout and the rotation buffer provider.
//! - [`utils`] holds geometry helpers and the clock used to timestamp frames.
//!
//! Everything that talks to the outside world (device memory allocation, the
//! rotation engine, the register transport of the display driver) is a trait
//! the compositor implements and injects at construction.
//!
//! ## General principles
//!
//! Planes are driven by a single compositor thread, once per vsync:
//! `set_data_buffer` → `flip` → commit of the context. No operation suspends
//! or retries, failures are reported to the caller, which owns the retry policy.
//!
//! ### Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//! Every plane owns a span carrying its index and device, so per-frame events
//! can be attributed to the right overlay.
//!
//! For release builds it is recommended to limit the log level during compile time,
//! by enabling the corresponding features of [`tracing`] in your binary crate:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod utils;

pub mod reexports;
