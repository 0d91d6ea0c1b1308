// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! Byte transport abstraction for the sensor's serial link.
//!
//! This module provides a [`Transport`] trait that abstracts the source of
//! the sensor's byte stream, enabling:
//!
//! - **Live operation**: reading from the USB serial port
//! - **Testing**: replaying scripted byte streams without hardware
//!
//! The A010 talks serial-over-USB at 115200 baud. Reads are blocking with a
//! one second timeout; commands are short ASCII strings terminated by CR.
//!
//! # Example
//!
//! ```ignore
//! use tofpub::transport::{TestTransport, Transport};
//!
//! // Script a transport with two packets worth of bytes
//! let mut source = TestTransport::new(vec![packet_a, packet_b]);
//!
//! let mut buf = [0u8; 4096];
//! let len = source.recv(&mut buf)?;
//! ```

use crate::tof::Error;
use std::{
    io::{Read as _, Write as _},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// Trait for sensor byte transports.
///
/// Implementations provide the raw byte stream (serial port, scripted test
/// data) and accept command writes.
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes from the stream.
    ///
    /// # Returns
    /// - `Ok(len)` - number of bytes read, at least 1
    /// - `Ok(0)` - nothing arrived within the transport's timeout
    /// - `Err` - stream broken
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Write a command to the device.
    fn send(&mut self, data: &[u8]) -> Result<(), Error>;
}

/// Live serial transport for the A010's USB CDC port.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open the given device path at the sensor's fixed line settings
    /// (115200 8N1, no flow control, 1 s read timeout).
    pub fn open(path: &str) -> Result<Self, Error> {
        let port = serialport::new(path, 115_200)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open()?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // a quiet line is reported as a zero-length read, not a failure
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.port.write_all(data)?;
        Ok(())
    }
}

struct Script {
    bytes: Vec<u8>,
    pos: usize,
    sent: Vec<Vec<u8>>,
}

impl Script {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            bytes: chunks.concat(),
            pos: 0,
            sent: Vec::new(),
        }
    }
}

/// Scripted transport for unit testing.
///
/// Serves a fixed byte stream and records every command written to it.
/// Handles are cheap clones sharing the same script, so a test can keep one
/// handle for assertions while the driver consumes another.
#[derive(Clone)]
pub struct TestTransport {
    inner: Arc<Mutex<Script>>,
}

impl TestTransport {
    /// Create a test transport serving the given chunks back to back.
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Script::new(chunks))),
        }
    }

    /// Create an exhausted test transport.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Commands written to the transport so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Bytes of script not yet consumed.
    pub fn remaining(&self) -> usize {
        let s = self.lock();
        s.bytes.len() - s.pos
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for TestTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut s = self.lock();
        if s.pos >= s.bytes.len() {
            // a dead script behaves like an unplugged sensor
            return Ok(0);
        }
        let n = buf.len().min(s.bytes.len() - s.pos);
        buf[..n].copy_from_slice(&s.bytes[s.pos..s.pos + n]);
        s.pos += n;
        Ok(n)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.lock().sent.push(data.to_vec());
        Ok(())
    }
}

/// Scripted transport that repeats its byte stream indefinitely.
///
/// Useful for soak tests that need the worker running at its natural rate
/// while the consumer polls.
#[derive(Clone)]
pub struct LoopingTestTransport {
    inner: Arc<Mutex<Script>>,
}

impl LoopingTestTransport {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Script::new(chunks))),
        }
    }

    /// Commands written to the transport so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for LoopingTestTransport {
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut s = self.lock();
        if s.bytes.is_empty() {
            return Ok(0);
        }
        if s.pos >= s.bytes.len() {
            s.pos = 0;
        }
        let n = buf.len().min(s.bytes.len() - s.pos);
        buf[..n].copy_from_slice(&s.bytes[s.pos..s.pos + n]);
        s.pos += n;
        Ok(n)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.lock().sent.push(data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_transport_stream() {
        let mut source = TestTransport::new(vec![vec![1, 2, 3, 4], vec![5, 6]]);
        let mut buf = [0u8; 3];

        // chunk boundaries are invisible: it is one byte stream
        let len = source.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        let len = source.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[4, 5, 6]);

        // exhausted script reads back as a quiet line
        assert_eq!(source.recv(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_test_transport_records_commands() {
        let handle = TestTransport::empty();
        let mut source = handle.clone();

        source.send(b"AT+UNIT=3\r").unwrap();
        source.send(b"AT+DISP=1\r").unwrap();

        let sent = handle.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], b"AT+UNIT=3\r");
        assert_eq!(sent[1], b"AT+DISP=1\r");
    }

    #[test]
    fn test_looping_transport_wraps() {
        let mut source = LoopingTestTransport::new(vec![vec![7, 8, 9]]);
        let mut buf = [0u8; 2];

        for _ in 0..10 {
            assert!(source.recv(&mut buf).unwrap() > 0);
        }

        // still serving after several wraps
        let len = source.recv(&mut buf).unwrap();
        assert!(len > 0);
    }

    #[test]
    fn test_single_byte_reads() {
        let mut source = TestTransport::new(vec![vec![0x00, 0xFF, 0x20, 0x27]]);
        let mut b = [0u8; 1];
        let mut seen = Vec::new();
        while source.recv(&mut b).unwrap() == 1 {
            seen.push(b[0]);
        }
        assert_eq!(seen, vec![0x00, 0xFF, 0x20, 0x27]);
    }
}
