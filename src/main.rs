// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Capture tool for the MaixSense A010: streams depth frames and logs
//! scene statistics. Display and file output live in downstream tools;
//! this binary is for bring-up and health checks.

mod args;

use args::Args;
use clap::Parser as _;
use std::time::Instant;
use tofpub::{INVALID_DEPTH, TofCam};
use tracing::{info, warn};
use tracing_subscriber::{Layer as _, Registry, layer::SubscriberExt as _};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(args.rust_log);
    let subscriber = Registry::default().with(stdout_log);
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut cam = TofCam::new();
    cam.start(&args.port)?;
    info!(port = %args.port, "streaming depth frames");

    let mut count = 0u64;
    let mut window_start = Instant::now();

    loop {
        if !cam.is_healthy() {
            warn!("sensor stream ended");
            break;
        }
        // a None from a live stream is just a half-second lull; retry
        let Some(depth) = cam.range(true) else { continue };

        count += 1;
        let mut stats = None;
        if args.stats_every > 0 && count % args.stats_every == 0 {
            let mut min = u16::MAX;
            let mut max = 0u16;
            let mut invalid = 0usize;
            for &d in depth {
                if d == INVALID_DEPTH {
                    invalid += 1;
                } else {
                    min = min.min(d);
                    max = max.max(d);
                }
            }
            stats = Some((min, max, invalid, depth.len()));
        }

        if let Some((min, max, invalid, total)) = stats {
            let fps = args.stats_every as f64 / window_start.elapsed().as_secs_f64();
            window_start = Instant::now();

            if invalid == total {
                info!(frame = count, fps = %format!("{:.1}", fps), "no valid pixels");
            } else {
                info!(
                    frame = count,
                    unit_mm = cam.unit(),
                    min_mm = min as f64 / 4.0,
                    max_mm = max as f64 / 4.0,
                    invalid_pct = 100 * invalid / total,
                    fps = %format!("{:.1}", fps),
                    "depth frame"
                );
            }
        }

        if args.frames > 0 && count >= args.frames {
            break;
        }
    }

    cam.stop();
    info!(frames = count, "capture finished");
    Ok(())
}
