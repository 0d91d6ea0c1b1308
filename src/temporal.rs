// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Per-pixel Kalman-like temporal smoothing.
//!
//! Each pixel carries a running mean and a variance estimate, both stored
//! as bytes. The underlying model is a random walk in depth index observed
//! through measurement noise: when the recent disagreement `d²` between the
//! median image and the stored mean is large relative to the noise floor,
//! the mixing gain `k` swings toward the new measurement; when the pixel is
//! quiet, the estimate flywheels through sensor noise.
//!
//! All arithmetic is 8.8 fixed point so a full-frame update stays cheap on
//! small boards. The variance image doubles as a flicker detector: the
//! reformat stage masks pixels whose variance exceeds its limit.

use crate::tof::IMG_PIXELS;

/// Running mean and variance images for one sensor stream.
pub struct TemporalFilter {
    mean: Vec<u8>,
    var: Vec<u8>,
    /// Learning weight in 8.8 fixed point, `round(256·f0)`
    fi: i32,
    /// Measurement-noise floor in 8.8 fixed point, `round(256·nv)`
    mn: i32,
}

impl TemporalFilter {
    /// Create an unseeded filter with learning weight `f0` in (0, 1) and
    /// measurement-noise floor `nv` in index² units.
    pub fn new(f0: f32, nv: f32) -> Self {
        Self {
            mean: vec![0u8; IMG_PIXELS],
            var: vec![0u8; IMG_PIXELS],
            fi: (256.0 * f0 + 0.5) as i32,
            mn: (256.0 * nv + 0.5) as i32,
        }
    }

    /// Initialise state from the first frame's median image.
    pub fn seed(&mut self, median: &[u8]) {
        self.mean.copy_from_slice(median);
        self.var.fill(0);
    }

    /// Fold one median image into the running estimates.
    pub fn update(&mut self, median: &[u8]) {
        let cfi = 256 - self.fi;
        for i in 0..IMG_PIXELS {
            let m = median[i] as i32;
            let p = self.mean[i] as i32;
            let v = self.var[i] as i32;

            // projected measurement noise and mixing gain in [0, 256]
            let d = m - p;
            let vm = cfi * v + self.fi * d * d;
            let k = (((vm as i64) << 8) / (vm as i64 + self.mn as i64)) as i32;

            let val = ((p << 8) + k * d + 128) >> 8;
            self.mean[i] = val.clamp(0, 255) as u8;
            let val = ((256 - k) * (vm >> 1) + 16384) >> 15;
            self.var[i] = val.clamp(0, 255) as u8;
        }
    }

    /// Re-express the stored state when the sensor's quantization step
    /// changes from `unit` to `pend` millimetres.
    ///
    /// The mean scales by `unit/pend` and the variance by `(unit/pend)²`,
    /// both through 8.8 lookup tables, so the estimates stay continuous in
    /// physical depth across the step change.
    pub fn rescale(&mut self, unit: u8, pend: u8) {
        let mut sc = [0i32; 256];

        let f = ((unit as i32) << 8) / pend as i32;
        for (i, s) in sc.iter_mut().enumerate() {
            *s = (f * i as i32 + 128) >> 8;
        }
        for p in self.mean.iter_mut() {
            *p = sc[*p as usize].clamp(0, 255) as u8;
        }

        let f = ((unit as i32 * unit as i32) << 8) / (pend as i32 * pend as i32);
        for (i, s) in sc.iter_mut().enumerate() {
            *s = (f * i as i32 + 128) >> 8;
        }
        for v in self.var.iter_mut() {
            *v = sc[*v as usize].clamp(0, 255) as u8;
        }
    }

    /// Smoothed depth-index estimates.
    #[inline]
    pub fn mean(&self) -> &[u8] {
        &self.mean
    }

    /// Per-pixel variance estimates.
    #[inline]
    pub fn variance(&self) -> &[u8] {
        &self.var
    }
}
