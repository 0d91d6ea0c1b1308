// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Common types for the MaixSense A010 depth pipeline.
//!
//! The sensor delivers 100×100 frames of 8-bit depth indices; the driver
//! publishes 100×100 frames of 16-bit depth in quarter-millimetre steps.
//! Everything in this module is shared across the pipeline stages.

use std::fmt;

use crate::ranging::Roi;

/// Image width and height in pixels (the A010 is square).
pub const IMG_DIM: usize = 100;

/// Pixels per frame.
pub const IMG_PIXELS: usize = IMG_DIM * IMG_DIM;

/// Output sentinel for pixels with no reliable depth.
pub const INVALID_DEPTH: u16 = 65535;

/// Smallest and largest sensor quantization step in millimetres.
pub const UNIT_MIN: u8 = 1;
pub const UNIT_MAX: u8 = 9;

/// Common error type for driver operations.
///
/// All variants are terminal for the current stream: the acquisition worker
/// exits and subsequent [`range`](crate::driver::TofCam::range) calls return
/// `None`. The sensor resynchronises cleanly only from the start of a packet,
/// so no per-frame recovery is attempted.
#[derive(Debug)]
pub enum Error {
    /// Serial port open or configuration failure
    Serial(serialport::Error),
    /// I/O error on any transport read or write
    Io(std::io::Error),
    /// Sentinel not found within the scan budget (bytes scanned)
    SyncTimeout(usize),
    /// Short read during packet assembly (bytes accumulated)
    PacketTimeout(usize),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Serial(err) => write!(f, "serial port error: {}", err),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::SyncTimeout(n) => write!(f, "no packet sentinel within {} bytes", n),
            Error::PacketTimeout(n) => write!(f, "packet timed out after {} bytes", n),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::Serial(err)
    }
}

/// Tuning parameters for auto-ranging and temporal smoothing.
///
/// Defaults match the sensor's factory-calibrated behaviour; most
/// applications never change them.
#[derive(Clone, Copy, Debug)]
pub struct TofParams {
    /// Max percentage of saturated ROI pixels before the step is coarsened
    pub sat: u8,
    /// Histogram percentile used to estimate the scene's bulk depth
    pub pct: u8,
    /// Target raw index for the bulk depth (desired range span)
    pub ihi: u8,
    /// Central region examined by auto-ranging
    pub roi: Roi,
    /// Temporal filter learning weight, in (0, 1)
    pub f0: f32,
    /// Expected measurement noise variance in index² units
    pub nv: f32,
    /// Variance above which a pixel is masked as flickering
    pub vlim: u8,
}

impl Default for TofParams {
    fn default() -> Self {
        Self {
            sat: 80,
            pct: 50,
            ihi: 150,
            roi: Roi::new(25, 25, 50, 50),
            f0: 0.1,
            nv: 64.0, // 3 bits of sensor noise (8²)
            vlim: 32,
        }
    }
}

/// Lookup table converting 8-bit depth indices to 16-bit quarter-millimetres.
///
/// First index is the current unit − 1, so `row(u)[pel] = 4·u·pel`.
pub struct DepthLut {
    table: Box<[[u16; 256]; 9]>,
}

impl DepthLut {
    pub fn new() -> Self {
        let mut table = Box::new([[0u16; 256]; 9]);
        for u in UNIT_MIN..=UNIT_MAX {
            for pel in 0..256 {
                table[(u - 1) as usize][pel] = 4 * u as u16 * pel as u16;
            }
        }
        Self { table }
    }

    /// Conversion row for the given unit (1..=9).
    #[inline]
    pub fn row(&self, unit: u8) -> &[u16; 256] {
        &self.table[(unit - 1) as usize]
    }
}

impl Default for DepthLut {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lut_law() {
        let lut = DepthLut::new();
        for u in UNIT_MIN..=UNIT_MAX {
            let row = lut.row(u);
            for pel in 0..256usize {
                assert_eq!(row[pel], 4 * u as u16 * pel as u16);
            }
        }
    }

    #[test]
    fn test_lut_max_fits() {
        // deepest representable reading: unit 9, index 254 (255 is reserved)
        let lut = DepthLut::new();
        assert_eq!(lut.row(9)[254], 9144);
        assert!(lut.row(9)[255] < INVALID_DEPTH);
    }

    #[test]
    fn test_default_params() {
        let p = TofParams::default();
        assert_eq!(p.sat, 80);
        assert_eq!(p.pct, 50);
        assert_eq!(p.ihi, 150);
        assert_eq!((p.roi.x0, p.roi.y0, p.roi.w, p.roi.h), (25, 25, 50, 50));
        assert!(p.f0 > 0.0 && p.f0 < 1.0);
    }
}
