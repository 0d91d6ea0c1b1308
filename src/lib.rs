// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Driver for the Sipeed MaixSense A010 time-of-flight depth camera.
//!
//! The A010 streams 100×100 frames of 8-bit depth indices over serial-USB
//! at 115200 baud. This library frames that byte stream, denoises it, and
//! publishes 16-bit depth images in quarter-millimetre units through a
//! triple buffer that never blocks the consumer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌───────────────────────────┐
//! │  Transport  │ ─► │ PacketReader │ ─► │  raw 100×100 depth image  │
//! │ (serial or  │    │ (sync/fill)  │    └─────────────┬─────────────┘
//! │  scripted)  │    └──────────────┘                  │
//! └─────────────┘                        ┌─────────────▼─────────────┐
//!        ▲                               │ AutoRange → AT+UNIT=n     │
//!        └── unit commands ───────────── │ median5x5 → TemporalFilter│
//!                                        │ reformat  → TripleBuffer  │
//!                                        └─────────────┬─────────────┘
//!                                                      │ range()
//!                                              ┌───────▼───────┐
//!                                              │   consumer    │
//!                                              └───────────────┘
//! ```
//!
//! One background worker runs the whole acquisition pipeline; the consumer
//! calls [`TofCam::range`] and gets a frame that stays stable until the
//! next call. The sensor's depth quantization step adapts to the scene
//! automatically, and the temporal filter state is re-scaled whenever the
//! step changes so depth estimates stay continuous in physical units.
//!
//! # Modules
//!
//! - [`driver`]: [`TofCam`] lifecycle, acquisition worker, debug images
//! - [`transport`]: serial and scripted byte sources
//! - [`packet`]: sentinel resync and packet assembly
//! - [`median`]: incremental-histogram 5×5 median
//! - [`temporal`]: per-pixel mean/variance smoothing
//! - [`ranging`]: adaptive depth-resolution selection
//! - [`tof`]: shared constants, errors, and parameters
//!
//! # Example
//!
//! ```ignore
//! use tofpub::TofCam;
//!
//! let mut cam = TofCam::new();
//! cam.start("/dev/ttyUSB0")?;
//!
//! while let Some(depth) = cam.range(true) {
//!     let mm = depth[50 * 100 + 50] as f32 / 4.0;
//!     println!("centre pixel: {mm} mm");
//! }
//! ```

mod buffer;
pub mod driver;
pub mod median;
pub mod packet;
pub mod ranging;
pub mod temporal;
pub mod tof;
pub mod transport;

// Re-exports for convenience
pub use driver::{Snapshot, TofCam};
pub use ranging::Roi;
pub use tof::{Error, IMG_DIM, IMG_PIXELS, INVALID_DEPTH, TofParams};
pub use transport::{LoopingTestTransport, SerialTransport, TestTransport, Transport};
