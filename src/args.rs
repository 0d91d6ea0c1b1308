// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Serial device of the sensor (USB CDC port)
    #[arg(env, default_value = "/dev/ttyUSB0")]
    pub port: String,

    /// Stop after this many frames (0 = run until the stream ends)
    #[arg(long, env, default_value = "0")]
    pub frames: u64,

    /// Log a depth statistics line every N frames
    #[arg(long, env, default_value = "30")]
    pub stats_every: u64,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}
