// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Packet framing for the A010 byte stream.
//!
//! In `AT+DISP=3` mode the sensor streams fixed-size image packets:
//!
//! ```text
//! ┌──────────────┬───────────────┬──────────────────┬──────────┐
//! │ 00 FF 20 27  │ 12 byte       │ 10000 byte       │ 2 byte   │
//! │ sentinel     │ header        │ payload          │ trailer  │
//! └──────────────┴───────────────┴──────────────────┴──────────┘
//! ```
//!
//! The length field 0x2720 (10016, little-endian) doubles as half the
//! sentinel, so resync only needs a four byte match. [`PacketReader::sync`]
//! hunts for the sentinel one byte at a time and [`PacketReader::fill`]
//! accumulates the rest of the packet. Command acknowledgements from the
//! sensor show up as stray bytes between packets; `sync` reports how many
//! bytes it had to skip so the driver can detect them.

use crate::tof::Error;
use crate::transport::Transport;
use std::time::Duration;

/// Packet start sentinel: 0x00 0xFF then length 10016 little-endian.
pub const SENTINEL: [u8; 4] = [0x00, 0xFF, 0x20, 0x27];

/// Total packet size in bytes.
pub const PACKET_SIZE: usize = 10_018;

/// Header size including the sentinel.
pub const HEADER_SIZE: usize = 16;

/// Image payload size (100×100 pixels).
pub const PAYLOAD_SIZE: usize = 10_000;

/// Give up syncing after this many bytes without a sentinel.
pub const SYNC_SCAN_LIMIT: usize = 20_000;

/// Pause between short reads while a packet accumulates.
const ACCUMULATE_DELAY: Duration = Duration::from_micros(17_500);

/// Incremental reader that frames packets out of a raw byte stream.
pub struct PacketReader {
    pkt: Box<[u8; PACKET_SIZE]>,
}

impl PacketReader {
    pub fn new() -> Self {
        Self {
            pkt: Box::new([0u8; PACKET_SIZE]),
        }
    }

    /// Scan the stream until the four sentinel bytes match in order.
    ///
    /// A mismatch restarts the match at the next byte; the mismatched byte
    /// is not re-examined. Returns the number of bytes skipped before the
    /// sentinel. Fails with [`Error::SyncTimeout`] once [`SYNC_SCAN_LIMIT`]
    /// bytes have been consumed, or [`Error::Io`] if the stream goes quiet.
    pub fn sync(&mut self, port: &mut dyn Transport) -> Result<usize, Error> {
        let mut scanned = 0usize;
        loop {
            if next_byte(port, &mut scanned)? != SENTINEL[0] {
                continue;
            }
            if next_byte(port, &mut scanned)? != SENTINEL[1] {
                continue;
            }
            if next_byte(port, &mut scanned)? != SENTINEL[2] {
                continue;
            }
            if next_byte(port, &mut scanned)? == SENTINEL[3] {
                break;
            }
        }
        self.pkt[..SENTINEL.len()].copy_from_slice(&SENTINEL);
        Ok(scanned - SENTINEL.len())
    }

    /// Read the remaining 10014 bytes of the packet after a successful sync.
    ///
    /// Short reads pause briefly to let the line catch up; a zero-length
    /// read means the stream died mid-packet.
    pub fn fill(&mut self, port: &mut dyn Transport) -> Result<(), Error> {
        let mut got = SENTINEL.len();
        loop {
            let n = port.recv(&mut self.pkt[got..])?;
            if n == 0 {
                return Err(Error::PacketTimeout(got));
            }
            got += n;
            if got >= PACKET_SIZE {
                break;
            }
            std::thread::sleep(ACCUMULATE_DELAY);
        }
        Ok(())
    }

    /// Image payload of the most recently filled packet.
    ///
    /// Scan order is sensor-native: with USB on the left, right-to-left
    /// columns, top-down within a column.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.pkt[HEADER_SIZE..HEADER_SIZE + PAYLOAD_SIZE]
    }
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new()
    }
}

fn next_byte(port: &mut dyn Transport, scanned: &mut usize) -> Result<u8, Error> {
    if *scanned >= SYNC_SCAN_LIMIT {
        return Err(Error::SyncTimeout(*scanned));
    }
    let mut b = [0u8; 1];
    if port.recv(&mut b)? == 0 {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "sensor stream timed out during sync",
        )));
    }
    *scanned += 1;
    Ok(b[0])
}
