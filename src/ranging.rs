// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Adaptive depth-resolution selection.
//!
//! The sensor quantizes depth into 256 steps of `unit` millimetres each, so
//! a small unit gives fine resolution over a short range and a large unit
//! covers a long range coarsely. Auto-ranging histograms a central region
//! of each raw frame and picks the unit that places the scene's bulk depth
//! near a target index, so the 8-bit range is neither wasted nor clipped.
//!
//! Too many saturated pixels mean the scene extends past the current span;
//! in that case the step is coarsened by one even if the percentile vote
//! disagrees, since saturated pixels carry no depth to vote with.

use crate::tof::{IMG_DIM, TofParams, UNIT_MAX, UNIT_MIN};

/// Rectangular region of the raw image, in pixel coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Roi {
    pub x0: usize,
    pub y0: usize,
    pub w: usize,
    pub h: usize,
}

impl Roi {
    pub const fn new(x0: usize, y0: usize, w: usize, h: usize) -> Self {
        Self { x0, y0, w, h }
    }
}

/// Histogram-based unit selector for the acquisition worker.
pub struct AutoRange {
    sat: u8,
    pct: u8,
    ihi: u8,
    roi: Roi,
    hist: [u32; 256],
}

impl AutoRange {
    pub fn new(params: &TofParams) -> Self {
        Self {
            sat: params.sat,
            pct: params.pct,
            ihi: params.ihi,
            roi: params.roi,
            hist: [0u32; 256],
        }
    }

    /// Histogram the ROI of `raw` and return a better unit than `unit` if
    /// one is warranted, `None` when the current unit already fits.
    pub fn evaluate(&mut self, raw: &[u8], unit: u8) -> Option<u8> {
        self.hist.fill(0);
        for y in self.roi.y0..self.roi.y0 + self.roi.h {
            let row = y * IMG_DIM;
            for x in self.roi.x0..self.roi.x0 + self.roi.w {
                self.hist[raw[row + x] as usize] += 1;
            }
        }

        // saturation percentage and the percentile cutoff over the rest
        let area = (self.roi.w * self.roi.h) as f64;
        let clipped = self.hist[255] as f64;
        let miss = (100.0 * clipped / area + 0.5) as i32;
        let stop = (0.01 * self.pct as f64 * (area - clipped) + 0.5) as i32;

        let mut sum = 0i32;
        let mut bulk = 0usize;
        while bulk < 255 {
            sum += self.hist[bulk] as i32;
            if sum >= stop {
                break;
            }
            bulk += 1;
        }

        // step that would put the bulk depth at the target index
        let goal = (unit as i32 * bulk as i32) as f32 / self.ihi as f32 + 0.5;
        let mut goal = (goal as i32).clamp(UNIT_MIN as i32, UNIT_MAX as i32);

        // heavy clipping means the scene runs past the span; coarsen
        if miss > self.sat as i32 && goal <= unit as i32 && unit < UNIT_MAX {
            goal = unit as i32 + 1;
        }

        let goal = goal as u8;
        (goal != unit).then_some(goal)
    }
}
