// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! MaixSense A010 driver: lifecycle, acquisition worker, and frame output.
//!
//! [`TofCam`] owns a background worker that frames packets off the serial
//! link, runs the denoising pipeline, and publishes 16-bit depth frames
//! through a triple buffer. The consumer polls [`TofCam::range`], which
//! hands back the most recent frame and guarantees it stays untouched
//! until the next call.
//!
//! Pipeline per frame, leaves first:
//!
//! 1. sync + fill one 10018-byte packet into the raw image
//! 2. apply a pending unit change if the packet was preceded by stray
//!    acknowledgement bytes
//! 3. auto-range the raw image, possibly commanding a new unit
//! 4. 5×5 median, then per-pixel temporal smoothing
//! 5. mask unreliable pixels, convert to quarter-millimetres, publish
//!
//! Any transport error ends the stream: the worker exits and `range`
//! returns `None` from then on. The sensor only resynchronises cleanly
//! from a packet boundary, so recovery is a fresh [`TofCam::start`].

use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::buffer::TripleBuffer;
use crate::median::median5x5;
use crate::packet::PacketReader;
use crate::ranging::AutoRange;
use crate::temporal::TemporalFilter;
use crate::tof::{DepthLut, Error, IMG_DIM, IMG_PIXELS, INVALID_DEPTH, TofParams};
use crate::transport::{SerialTransport, Transport};

/// Quantization step commanded at startup, in millimetres.
const STARTUP_UNIT: u8 = 2;

/// Frames dropped after start; the sensor emits stale data right after
/// power-on and after a DISP mode change.
const WARMUP_DROP: i32 = 2;

/// Minimum spacing between AT commands.
const CMD_GAP: Duration = Duration::from_millis(50);

/// Poll interval and retry budget for a blocking [`TofCam::range`].
const RANGE_POLL: Duration = Duration::from_millis(1);
const RANGE_RETRIES: u32 = 500;

/// Worker-private image pipeline state.
struct Pipeline {
    raw: Vec<u8>,
    median: Vec<u8>,
    filter: TemporalFilter,
    ranger: AutoRange,
    lut: DepthLut,
    /// Step the most recent frame was captured at
    unit: u8,
    /// Most recently commanded step; equal to `unit` when idle
    pending: u8,
    frame: u64,
    vlim: u8,
}

impl Pipeline {
    fn new(params: &TofParams) -> Self {
        Self {
            raw: vec![0u8; IMG_PIXELS],
            median: vec![0u8; IMG_PIXELS],
            filter: TemporalFilter::new(params.f0, params.nv),
            ranger: AutoRange::new(params),
            lut: DepthLut::new(),
            unit: STARTUP_UNIT,
            pending: STARTUP_UNIT,
            frame: 0,
            vlim: params.vlim,
        }
    }

    /// Register that the commanded unit has taken effect on the sensor,
    /// re-expressing the temporal filter state in the new step.
    fn apply_pending_unit(&mut self) {
        if self.pending != self.unit {
            debug!(from = self.unit, to = self.pending, "depth step changed");
            self.filter.rescale(self.unit, self.pending);
            self.unit = self.pending;
        }
    }

    /// Median then temporal smoothing of the current raw image.
    fn denoise(&mut self) {
        median5x5(&self.raw, &mut self.median);
        if self.frame == 0 {
            self.filter.seed(&self.median);
        } else {
            self.filter.update(&self.median);
        }
    }

    /// Mask unreliable pixels and convert to 16-bit quarter-millimetres.
    fn reformat(&self, out: &mut [u16]) {
        let sc = self.lut.row(self.unit);
        let mean = self.filter.mean();
        let var = self.filter.variance();
        for i in 0..IMG_PIXELS {
            out[i] = if self.raw[i] == 255 || mean[i] == 255 || var[i] > self.vlim {
                INVALID_DEPTH
            } else {
                sc[mean[i] as usize]
            };
        }
    }
}

/// Copies of worker-private images, taken under the pipeline lock.
///
/// These are debugging aids: they reflect whatever frame the worker most
/// recently finished (or is between stages of, if taken mid-frame).
pub struct Snapshot {
    pub unit: u8,
    pub frame: u64,
    pub raw: Array2<u8>,
    pub median: Array2<u8>,
    pub mean: Array2<u8>,
    pub variance: Array2<u8>,
}

/// Driver for the Sipeed MaixSense A010 time-of-flight camera.
///
/// # Example
///
/// ```ignore
/// use tofpub::TofCam;
///
/// let mut cam = TofCam::new();
/// cam.start("/dev/ttyUSB0")?;
/// while let Some(depth) = cam.range(true) {
///     // 100×100 u16 pixels in quarter-millimetres, 65535 = invalid,
///     // right-to-left columns / top-down rows with USB on the left
///     process(depth);
/// }
/// cam.stop();
/// ```
pub struct TofCam {
    params: TofParams,
    port: Option<Arc<Mutex<Box<dyn Transport>>>>,
    pipeline: Arc<Mutex<Pipeline>>,
    rotor: Arc<TripleBuffer>,
    run: Arc<AtomicBool>,
    ok: Arc<AtomicI8>,
    worker: Option<JoinHandle<()>>,
    locked: Option<usize>,
}

impl TofCam {
    pub fn new() -> Self {
        Self::with_params(TofParams::default())
    }

    pub fn with_params(params: TofParams) -> Self {
        Self {
            params,
            port: None,
            pipeline: Arc::new(Mutex::new(Pipeline::new(&params))),
            rotor: Arc::new(TripleBuffer::new(-WARMUP_DROP)),
            run: Arc::new(AtomicBool::new(false)),
            ok: Arc::new(AtomicI8::new(-1)),
            worker: None,
            locked: None,
        }
    }

    /// Open the serial device at `path` and start acquisition.
    pub fn start(&mut self, path: &str) -> Result<(), Error> {
        let transport = SerialTransport::open(path)?;
        self.start_from(Box::new(transport))
    }

    /// Start acquisition over an already-open transport.
    ///
    /// Configures the sensor for live display at the startup step, then
    /// launches the acquisition worker. Idempotent while running.
    pub fn start_from(&mut self, mut transport: Box<dyn Transport>) -> Result<(), Error> {
        if self.ok.load(Ordering::Acquire) > 0 {
            return Ok(());
        }

        transport.send(b"AT+DISP=3\r")?;
        thread::sleep(CMD_GAP);
        transport.send(b"AT+UNIT=2\r")?;

        // fresh shared state every start: a worker stuck in a read from a
        // previous session may still hold the old buffers
        self.pipeline = Arc::new(Mutex::new(Pipeline::new(&self.params)));
        self.rotor = Arc::new(TripleBuffer::new(-WARMUP_DROP));
        self.run = Arc::new(AtomicBool::new(true));
        self.ok = Arc::new(AtomicI8::new(1));
        self.locked = None;
        let port = Arc::new(Mutex::new(transport));
        self.port = Some(port.clone());

        let pipeline = self.pipeline.clone();
        let rotor = self.rotor.clone();
        let run = self.run.clone();
        let ok = self.ok.clone();
        self.worker = Some(
            thread::Builder::new()
                .name("tof-acquire".into())
                .spawn(move || {
                    if let Err(e) = acquisition_loop(&port, &pipeline, &rotor, &run) {
                        warn!("acquisition stopped: {}", e);
                    }
                    ok.store(0, Ordering::Release);
                })?,
        );

        info!("acquisition started");
        Ok(())
    }

    /// Get the most recent 16-bit depth frame.
    ///
    /// Returns `None` if the driver is not running, or (non-blocking) when
    /// no unseen frame is pending. Blocking mode polls for up to half a
    /// second. The returned frame is 100×100 little-endian u16 pixels in
    /// quarter-millimetres with 65535 marking invalid pixels, and stays
    /// unchanged until the next `range` call.
    pub fn range(&mut self, block: bool) -> Option<&[u16]> {
        if self.ok.load(Ordering::Acquire) <= 0 {
            return None;
        }
        let mut waited = 0u32;
        while self.rotor.fresh() <= 0 {
            if !block {
                return None;
            }
            waited += 1;
            if waited > RANGE_RETRIES {
                return None;
            }
            thread::sleep(RANGE_POLL);
        }
        let idx = self.rotor.try_consume()?;
        self.locked = Some(idx);
        // SAFETY: idx is now the lock role, which the worker never writes;
        // the returned borrow of self keeps it claimed until the next call.
        Some(unsafe { self.rotor.read(idx) })
    }

    /// Whether the stream is alive: started and no transport error yet.
    pub fn is_healthy(&self) -> bool {
        self.ok.load(Ordering::Acquire) > 0
    }

    /// Quantization step of the most recent frame, in millimetres.
    pub fn unit(&self) -> u8 {
        lock(&self.pipeline).unit
    }

    /// Copy the worker's intermediate images for inspection.
    pub fn snapshot(&self) -> Snapshot {
        let pl = lock(&self.pipeline);
        Snapshot {
            unit: pl.unit,
            frame: pl.frame,
            raw: image(&pl.raw),
            median: image(&pl.median),
            mean: image(pl.filter.mean()),
            variance: image(pl.filter.variance()),
        }
    }

    /// Render the frame last returned by [`range`](Self::range) as an
    /// 8-bit image where close things are brighter.
    ///
    /// `sh` halves the brightness per step: 0 maps 25 cm full scale, 1
    /// maps 51 cm, and so on. Invalid pixels come out black.
    pub fn night(&self, sh: u8) -> Option<Array2<u8>> {
        let idx = self.locked?;
        // SAFETY: the lock role is never a worker write target
        let depth = unsafe { self.rotor.read(idx) };
        let dn = sh as u32 + 2;
        let pix: Vec<u8> = depth
            .iter()
            .map(|&d| {
                let v = ((d as u32) >> dn).min(255);
                (255 - v) as u8
            })
            .collect();
        Some(image(&pix))
    }

    /// Stop the worker, restore the sensor's idle state, and close the
    /// transport. Idempotent.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.run.store(false, Ordering::Release);
            // the worker notices within one read timeout; give it a second
            let mut waited = 0;
            while !worker.is_finished() && waited < 100 {
                thread::sleep(Duration::from_millis(10));
                waited += 1;
            }
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                // detach; it holds only the previous session's buffers
                warn!("acquisition worker stuck in read, detaching");
            }
        }

        if let Some(port) = self.port.take() {
            let mut port = lock(&port);
            let _ = port.send(b"AT+UNIT=0\r");
            thread::sleep(CMD_GAP);
            let _ = port.send(b"AT+DISP=1\r");
        }

        self.ok.store(-1, Ordering::Release);
    }
}

impl Default for TofCam {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TofCam {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background acquisition and pre-processing loop.
fn acquisition_loop(
    port: &Mutex<Box<dyn Transport>>,
    pipeline: &Mutex<Pipeline>,
    rotor: &TripleBuffer,
    run: &AtomicBool,
) -> Result<(), Error> {
    let mut reader = PacketReader::new();

    while run.load(Ordering::Acquire) {
        let skipped = {
            let mut port = lock(port);
            let skipped = reader.sync(port.as_mut())?;
            reader.fill(port.as_mut())?;
            skipped
        };

        {
            let mut guard = lock(pipeline);
            let pl = &mut *guard;

            // stray bytes before the sentinel after warm-up are the sensor
            // acknowledging an outstanding unit command
            if skipped > 0 && pl.frame > 2 {
                pl.apply_pending_unit();
            }

            pl.raw.copy_from_slice(reader.payload());

            // the first frames carry stale pixels; don't range off them
            if pl.frame >= 2 {
                if let Some(goal) = pl.ranger.evaluate(&pl.raw, pl.unit) {
                    if pl.pending == pl.unit {
                        pl.pending = goal;
                        debug!(unit = pl.unit, goal, "requesting depth step change");
                        let cmd = format!("AT+UNIT={}\r", goal);
                        lock(port).send(cmd.as_bytes())?;
                    }
                }
            }

            pl.denoise();

            // SAFETY: this worker is the sole writer of the fill buffer and
            // the slice is dropped before publish rotates the roles
            let out = unsafe { rotor.fill_mut() };
            pl.reformat(out);
            pl.frame += 1;
        }

        rotor.publish();
    }

    Ok(())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn image(data: &[u8]) -> Array2<u8> {
    Array2::from_shape_vec((IMG_DIM, IMG_DIM), data.to_vec()).expect("100x100 image")
}
