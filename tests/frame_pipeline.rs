//! Producer/consumer behaviour of the frame pipeline across threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use panacam::capture::{FramePipeline, PipelineState, PixelFormat};
use panacam::CameraError;

#[test]
fn test_blocking_get_returns_once_a_frame_arrives() {
    let mut pipeline = FramePipeline::new();
    let sink = pipeline.sink();
    pipeline.start();

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sink.on_frame_delivered(&[42; 64], PixelFormat::Yuyv, 8, 4);
    });

    let frame = pipeline.get_next_frame(true).expect("frame delivered");
    assert_eq!(frame.data(), &[42; 64]);
    assert_eq!((frame.width, frame.height), (8, 4));
    drop(frame);
    producer.join().expect("producer thread");
}

#[test]
fn test_closing_the_sink_releases_blocked_consumer() {
    let mut pipeline = FramePipeline::new();
    let sink = pipeline.sink();
    pipeline.start();

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sink.close();
    });

    assert!(matches!(pipeline.get_next_frame(true), Err(CameraError::NoFrame)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    producer.join().expect("producer thread");
}

#[test]
fn test_consumer_sees_latest_frame_under_a_fast_producer() {
    let mut pipeline = FramePipeline::new();
    let sink = pipeline.sink();
    pipeline.start();

    let done = Arc::new(AtomicBool::new(false));
    let producer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for tag in 0..=200u8 {
                sink.on_frame_delivered(&[tag; 256], PixelFormat::Mjpeg, 16, 16);
                thread::sleep(Duration::from_micros(200));
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut last_sequence = 0;
    while !done.load(Ordering::Acquire) {
        if let Ok(frame) = pipeline.get_next_frame_timeout(Duration::from_millis(50)) {
            // Frames are never torn and never go backwards.
            assert!(frame.data().iter().all(|&b| b == frame.data()[0]));
            assert!(frame.sequence > last_sequence);
            last_sequence = frame.sequence;
        }
    }
    producer.join().expect("producer thread");

    if let Ok(frame) = pipeline.get_next_frame(false) {
        assert_eq!(frame.data()[0], 200);
    }

    let stats = pipeline.stats();
    assert_eq!(stats.frames_delivered, 201);
    assert!(stats.frames_consumed >= 1);
    assert!(stats.frames_consumed + stats.frames_dropped <= 201);
}
