// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! 5×5 median filter with an incrementally-maintained histogram.
//!
//! A straightforward 5×5 median sorts 25 samples per pixel. This version
//! keeps a 256-bin histogram of the current window and slides it one column
//! right per pixel: subtract the five samples leaving on the left, add the
//! five arriving on the right, then read the median out of the histogram.
//!
//! Two details keep the histogram scan short:
//!
//! - `bot` tracks the lowest occupied bin, so the rank scan never walks the
//!   empty low end of the histogram.
//! - The rank scan records the first few occupied bins in `lowest`; when a
//!   subtraction empties the `bot` bin, the next candidate comes from that
//!   cache instead of a fresh scan.
//!
//! Borders are handled by clamped replication: rows outside the image clamp
//! to the nearest row, and the window seed weights the leftmost column by
//! three to stand in for the missing x = −2 and x = −1 columns. The column
//! subtracted on a slide clamps to 0 (so the triple-weighted edge column
//! drains one count at a time) and the column added clamps to 99.
//!
//! The median rank is 13 of 25 — the upper median. The slight bias toward
//! farther depth is intentional: over-close readings are usually reflection
//! artefacts.

use crate::tof::{IMG_DIM, IMG_PIXELS};

/// Rank of the reported value among the 25 window samples.
const MEDIAN_RANK: i32 = 13;

/// Apply the 5×5 median to a 100×100 image.
///
/// `src` and `dst` are row-major and must both hold [`IMG_PIXELS`] bytes.
pub fn median5x5(src: &[u8], dst: &mut [u8]) {
    assert_eq!(src.len(), IMG_PIXELS);
    assert_eq!(dst.len(), IMG_PIXELS);

    let mut hist = [0i32; 256];
    let mut lowest = [0usize; 6];

    for y in 0..IMG_DIM {
        // seed the window for x = 0: columns -2 -1 0 +1 +2 map to 0 0 0 1 2
        hist.fill(0);
        let mut bot = 255usize;
        for j in -2i32..=2 {
            let row = row_clamped(y, j);
            let pel = src[row] as usize;
            bot = bot.min(pel);
            hist[pel] += 3;
            for dx in 1..=2usize {
                let pel = src[row + dx] as usize;
                bot = bot.min(pel);
                hist[pel] += 1;
            }
        }

        for x in 0..IMG_DIM {
            // walk bins upward from bot until the cumulative count reaches
            // the median rank, caching occupied bins as bot replacements
            let mut sum = 0i32;
            let mut cached = 0usize;
            let mut hi = bot;
            while hi < 256 {
                let v = hist[hi];
                if v > 0 {
                    if cached < lowest.len() {
                        lowest[cached] = hi;
                        cached += 1;
                    }
                    sum += v;
                    if sum >= MEDIAN_RANK {
                        break;
                    }
                }
                hi += 1;
            }
            dst[y * IMG_DIM + x] = hi as u8;

            if x + 1 >= IMG_DIM {
                continue;
            }

            // subtract the column leaving on the left (clamped to 0)
            let mut used = 0usize;
            let off = x.saturating_sub(2);
            for j in -2i32..=2 {
                let row = row_clamped(y, j);
                let pel = src[row + off] as usize;
                if pel == bot && hist[pel] <= 1 {
                    used += 1;
                    bot = lowest[used];
                }
                hist[pel] -= 1;
            }

            // add the column arriving on the right (clamped to 99)
            let on = (x + 3).min(IMG_DIM - 1);
            for j in -2i32..=2 {
                let row = row_clamped(y, j);
                let pel = src[row + on] as usize;
                bot = bot.min(pel);
                hist[pel] += 1;
            }
        }
    }
}

/// Byte offset of row `y + j` clamped to the image.
#[inline]
fn row_clamped(y: usize, j: i32) -> usize {
    (y as i32 + j).clamp(0, IMG_DIM as i32 - 1) as usize * IMG_DIM
}
