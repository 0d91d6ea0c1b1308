// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Etaoin Systems. All Rights Reserved.

//! End-to-end pipeline tests over scripted transports.
//!
//! These drive the full driver -- framing, auto-ranging, filtering, and the
//! triple-buffer hand-off -- without hardware, using byte streams that
//! mimic the sensor's packet format and command acknowledgements.

use std::thread;
use std::time::{Duration, Instant};
use tofpub::{IMG_DIM, IMG_PIXELS, INVALID_DEPTH, LoopingTestTransport, TestTransport, TofCam};

/// Wrap a payload image in a full 10018-byte sensor packet.
fn packet(payload: &[u8]) -> Vec<u8> {
    assert_eq!(payload.len(), IMG_PIXELS);
    let mut pkt = Vec::with_capacity(10_018);
    pkt.extend_from_slice(&[0x00, 0xFF, 0x20, 0x27]);
    pkt.extend_from_slice(&[0u8; 12]);
    pkt.extend_from_slice(payload);
    pkt.extend_from_slice(&[0u8; 2]);
    pkt
}

fn uniform(v: u8) -> Vec<u8> {
    vec![v; IMG_PIXELS]
}

/// Wait for the acquisition worker to exit (script exhausted or error).
fn wait_stream_end(cam: &TofCam) {
    for _ in 0..400 {
        if !cam.is_healthy() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("worker did not exit");
}

#[test]
fn test_cold_start_publishes_scaled_depth() {
    let transport = LoopingTestTransport::new(vec![packet(&uniform(50))]);
    let mut cam = TofCam::new();
    cam.start_from(Box::new(transport.clone())).unwrap();

    // startup configures live display then the 2mm step
    let depth = cam.range(true).expect("frame after warm-up");
    assert_eq!(depth.len(), IMG_PIXELS);
    // index 50 at unit 2 is 400 quarter-millimetres (100mm)
    assert!(depth.iter().all(|&d| d == 400));

    cam.stop();
    let sent = transport.sent();
    assert_eq!(sent[0], b"AT+DISP=3\r");
    assert_eq!(sent[1], b"AT+UNIT=2\r");
}

#[test]
fn test_saturation_commands_coarser_unit_and_rescales() {
    // 90% of the ROI saturated, the remainder close by at index 30; the
    // scene outside the ROI is uniformly at 30
    let mut scene = uniform(30);
    let mut spared = 250;
    for y in 25..75 {
        for x in 25..75 {
            if spared > 0 {
                spared -= 1;
            } else {
                scene[y * IMG_DIM + x] = 255;
            }
        }
    }

    // three clean packets, then an acknowledgement in front of the fourth
    let chunks = vec![
        packet(&scene),
        packet(&scene),
        packet(&scene),
        b"AT OK\r\n".to_vec(),
        packet(&scene),
    ];
    let transport = TestTransport::new(chunks);
    let mut cam = TofCam::new();
    cam.start_from(Box::new(transport.clone())).unwrap();
    wait_stream_end(&cam);

    // frame 2 ranged and asked for a coarser step
    let sent = transport.sent();
    assert!(
        sent.contains(&b"AT+UNIT=3\r".to_vec()),
        "saturation must coarsen the unit: {:?}",
        sent
    );

    // the ack bytes before packet 4 applied the pending unit
    let snap = cam.snapshot();
    assert_eq!(snap.unit, 3);
    assert_eq!(snap.frame, 4);

    // a quiet pixel held index 30 at 2mm; the re-scaler mapped it through
    // 170/256 to 20, then frame 4's update pulled it toward 30 again:
    // d = 10, vm = 2600, k = 35 -> mean 21, variance 9
    assert_eq!(snap.mean[[10, 10]], 21);
    assert_eq!(snap.variance[[10, 10]], 9);
}

#[test]
fn test_flickering_pixel_masked_invalid() {
    // a 5x5 block oscillates between index 200 and the background 50, so
    // the median at its centre flickers while everything else holds still
    let mut blink = uniform(50);
    for y in 48..53 {
        for x in 48..53 {
            blink[y * IMG_DIM + x] = 200;
        }
    }
    let transport = LoopingTestTransport::new(vec![packet(&blink), packet(&uniform(50))]);
    let mut cam = TofCam::new();
    cam.start_from(Box::new(transport)).unwrap();

    let mut masked = false;
    for _ in 0..100 {
        let Some(depth) = cam.range(true) else { break };
        if depth[50 * IMG_DIM + 50] == INVALID_DEPTH {
            // neighbours outside the blinking block stay valid
            assert_eq!(depth[10 * IMG_DIM + 10], 400);
            masked = true;
            break;
        }
    }
    assert!(masked, "flickering pixel never masked");
    cam.stop();
}

#[test]
fn test_stream_break_kills_worker() {
    let mut partial = packet(&uniform(50));
    partial.truncate(5_000);
    let chunks = vec![
        packet(&uniform(50)),
        packet(&uniform(50)),
        packet(&uniform(50)),
        partial,
    ];
    let mut cam = TofCam::new();
    cam.start_from(Box::new(TestTransport::new(chunks))).unwrap();
    wait_stream_end(&cam);

    // three frames were published before the break, but a dead stream
    // returns nothing regardless
    assert!(cam.range(false).is_none());

    let t0 = Instant::now();
    assert!(cam.range(true).is_none());
    assert!(t0.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_locked_frame_stable_under_contention() {
    // frame content drifts as the filter chases the alternating scene, so
    // a buffer the worker kept writing would be caught out
    let transport =
        LoopingTestTransport::new(vec![packet(&uniform(40)), packet(&uniform(45))]);
    let mut cam = TofCam::new();
    cam.start_from(Box::new(transport)).unwrap();

    // ride out the warm-up drop, then hammer the non-blocking path
    assert!(cam.range(true).is_some());

    let mut seen = 1u32;
    for _ in 0..1000 {
        if let Some(depth) = cam.range(false) {
            let copy = depth.to_vec();
            thread::yield_now();
            // unchanged between two successive reads by the consumer
            assert_eq!(&copy[..], depth);
            // every published frame is internally uniform
            assert!(depth.iter().all(|&d| d == depth[0]));
            seen += 1;
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }
    assert!(seen > 1, "no frames observed in 1000 polls");
    cam.stop();
}

#[test]
fn test_shutdown_restores_sensor_idle_state() {
    // index 150 at unit 2 sits exactly on the ranging target, so no unit
    // commands are sent while running and the command log is deterministic
    let transport = LoopingTestTransport::new(vec![packet(&uniform(150))]);
    let mut cam = TofCam::new();
    cam.start_from(Box::new(transport.clone())).unwrap();

    assert!(cam.range(true).is_some());
    cam.stop();

    let sent = transport.sent();
    assert_eq!(sent.len(), 4, "unexpected commands: {:?}", sent);
    assert_eq!(sent[0], b"AT+DISP=3\r");
    assert_eq!(sent[1], b"AT+UNIT=2\r");
    assert_eq!(sent[2], b"AT+UNIT=0\r");
    assert_eq!(sent[3], b"AT+DISP=1\r");
}

#[test]
fn test_night_renders_locked_frame() {
    let transport = LoopingTestTransport::new(vec![packet(&uniform(50))]);
    let mut cam = TofCam::new();

    // nothing locked before the first range call
    assert!(cam.night(0).is_none());

    cam.start_from(Box::new(transport)).unwrap();
    assert!(cam.range(true).is_some());

    // depth 400 >> 2 = 100, inverted to 155
    let night = cam.night(0).expect("locked frame");
    assert!(night.iter().all(|&p| p == 155));

    // one more shift halves the brightness drop
    let night = cam.night(1).expect("locked frame");
    assert!(night.iter().all(|&p| p == 205));
    cam.stop();
}

#[test]
fn test_lifecycle_is_idempotent() {
    let mut cam = TofCam::new();

    // stop without start is a no-op
    cam.stop();
    assert!(cam.range(false).is_none());
    assert!(!cam.is_healthy());

    let transport = LoopingTestTransport::new(vec![packet(&uniform(50))]);
    cam.start_from(Box::new(transport.clone())).unwrap();

    // second start while running is a no-op, not a reconfiguration
    let other = LoopingTestTransport::new(vec![packet(&uniform(50))]);
    cam.start_from(Box::new(other.clone())).unwrap();
    assert!(other.sent().is_empty());

    cam.stop();
    cam.stop();
    assert!(!cam.is_healthy());
}

#[test]
fn test_restart_after_stream_break() {
    let mut cam = TofCam::new();
    cam.start_from(Box::new(TestTransport::new(vec![packet(&uniform(50))])))
        .unwrap();
    wait_stream_end(&cam);
    assert!(cam.range(true).is_none());

    // a fresh start recovers with clean warm-up state
    let transport = LoopingTestTransport::new(vec![packet(&uniform(60))]);
    cam.start_from(Box::new(transport)).unwrap();
    let depth = cam.range(true).expect("frame after restart");
    assert!(depth.iter().all(|&d| d == 480));
    cam.stop();
}
