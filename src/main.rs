//! PanaCast camera demo: list cameras, dump their controls, capture until Ctrl-C

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};

use panacam::capture::{CaptureFormat, CaptureParams, CaptureSessionManager};
use panacam::control::{CameraControl, PropertyKind, UvcCamera};
use panacam::discovery::{self, RusbHost, VENDOR_ALLOW_LIST};
use panacam::{CameraError, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panacam=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("PanaCam launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    panacam::CONFIG.store(Arc::new(config.clone()));

    let host = RusbHost::new(&config.control)?;
    let cameras = discovery::enumerate(&host, VENDOR_ALLOW_LIST)?;
    for camera in &cameras {
        info!("Camera: {}", camera);
    }
    let camera = cameras
        .first()
        .cloned()
        .ok_or_else(|| eyre!("no PanaCast camera attached"))?;

    match UvcCamera::open(&host, &camera.serial_number, &config.control) {
        Ok(mut control) => {
            for kind in PropertyKind::ALL {
                match control.get_property(kind) {
                    Ok(property) => info!(
                        "{:<12} {} [{}..{}]",
                        kind, property.value, property.min, property.max
                    ),
                    Err(e) => warn!("{}: {}", kind, e),
                }
            }
        }
        Err(e) => warn!("Control interface unavailable: {}", e),
    }

    let manager = CaptureSessionManager::global();
    manager.initialize()?;

    let stop = Arc::new(AtomicBool::new(false));
    let signal_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping capture");
            signal_stop.store(true, Ordering::Release);
        }
    });

    let capture_manager = Arc::clone(&manager);
    let capture = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut session = capture_manager.open_session(&camera, config.capture.exact_pixel_format)?;
        let requested = CaptureFormat::new(
            config.capture.width,
            config.capture.height,
            config.capture.fps,
            config.capture.format,
        );
        let format = session.init(&CaptureParams::new(requested))?;
        info!("Streaming {}", format);

        let timeout = Duration::from_millis(config.pipeline.frame_timeout_ms);
        let started = Instant::now();
        let mut frames = 0u64;

        // Re-check the stop flag between bounded waits.
        while !stop.load(Ordering::Acquire) {
            match session.get_next_frame_timeout(timeout) {
                Ok(frame) => {
                    frames += 1;
                    if frames % 30 == 0 {
                        let fps = frames as f64 / started.elapsed().as_secs_f64();
                        info!(
                            "frame #{} {}x{} {} ({} bytes, {:.1} fps)",
                            frame.sequence, frame.width, frame.height, frame.format, frame.len(), fps
                        );
                    }
                }
                Err(CameraError::TimedOut) => warn!("No frame within {:?}", timeout),
                Err(e) => return Err(e.into()),
            }
        }

        session.stop_capture();
        let stats = session.stats();
        info!(
            "Captured {} frames ({} delivered, {} dropped)",
            frames, stats.frames_delivered, stats.frames_dropped
        );
        Ok(frames)
    });

    let result = capture.await?;
    manager.shutdown();
    if let Err(e) = &result {
        error!("Capture failed: {}", e);
    }
    result?;

    info!("PanaCam shutting down");
    Ok(())
}
