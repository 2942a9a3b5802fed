//! Huecast loopback demo: one session fed with synthetic color bars

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::Result;
use flume::{Receiver, Sender};
use image::{Rgb, RgbImage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huecast::capture::{Frame, TimeBase};
use huecast::display::overlay;
use huecast::session::loopback::{LoopbackOptions, LoopbackTransport};
use huecast::session::{
    ConnectionSession, PeerState, SessionContext, SessionDescription, SessionRegistry,
};
use huecast::{ColorSample, Config, LoopbackConfig};

const DEMO_OFFER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=huecast-loopback\r\nt=0 0\r\n";

const BARS: [ColorSample; 7] = [
    ColorSample::new(192, 192, 192),
    ColorSample::new(192, 192, 0),
    ColorSample::new(0, 192, 192),
    ColorSample::new(0, 192, 0),
    ColorSample::new(192, 0, 192),
    ColorSample::new(192, 0, 0),
    ColorSample::new(0, 0, 192),
];

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huecast=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Huecast Launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let registry = SessionRegistry::new();
    let (transport, remotes) = LoopbackTransport::new(LoopbackOptions {
        buffer: config.session.track_buffer,
        ..LoopbackOptions::default()
    });

    info!("No detector configured, annotating colors only");
    let context = SessionContext::new(&config, None);
    let (session, answer) = ConnectionSession::accept(
        &SessionDescription::offer(DEMO_OFFER),
        &transport,
        context,
        &registry,
    )?;
    info!(session = %session.id(), kind = ?answer.kind, "Negotiated loopback session");

    let remote = remotes.recv_async().await?;
    remote.set_state(PeerState::Connected)?;
    let camera = remote.add_video_track("loopback-camera")?;

    // Spawn producer and consumer tasks
    let producer = tokio::spawn(stream_color_bars(camera, config.loopback.clone()));
    let mut consumer = tokio::spawn(collect_annotated(
        remote.annotated().clone(),
        config.loopback.frames,
    ));

    let collected = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
        done = &mut consumer => Some(done?),
    };

    let report = registry.close_all().await;
    for (id, e) in &report.failed {
        warn!(session = %id, "Session did not close cleanly: {}", e);
    }
    producer.abort();

    let (received, last) = match collected {
        Some(collected) => collected,
        None => consumer.await?,
    };
    info!(received, "Annotated frames received");

    if let (Some(frame), Some(path)) = (last, config.loopback.snapshot.as_ref()) {
        snapshot(&frame).save(path)?;
        info!(path = %path.display(), "Wrote snapshot");
    }

    info!("Huecast shutting down");
    Ok(())
}

/// Color bars with a sweeping dark block, paced at the configured frame rate
async fn stream_color_bars(camera: Sender<Frame>, config: LoopbackConfig) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / config.fps);
    let ticks_per_frame = (TimeBase::VIDEO.den / config.fps) as i64;
    let bar_width = (config.width / BARS.len() as u32).max(1);
    let block = (config.height / 4).max(1);

    let mut sequence = 0u64;
    while config.frames == 0 || sequence < config.frames {
        ticker.tick().await;

        let pts = sequence as i64 * ticks_per_frame;
        let mut frame = Frame::new(config.width, config.height, config.format, pts, TimeBase::VIDEO)
            .with_sequence(sequence);
        for (i, color) in BARS.iter().enumerate() {
            let x = i as i32 * bar_width as i32;
            overlay::fill_rect(&mut frame, x, 0, bar_width, config.height, *color);
        }
        let sweep = (sequence * 4 % config.width.max(1) as u64) as i32;
        overlay::fill_rect(
            &mut frame,
            sweep,
            (config.height / 2) as i32,
            block,
            block,
            ColorSample::new(24, 24, 24),
        );

        if camera.send_async(frame).await.is_err() {
            break;
        }
        sequence += 1;
    }
    info!(frames = sequence, "Camera stream finished");
}

/// Receive until `expected` frames arrived (0 = until the stream closes)
async fn collect_annotated(annotated: Receiver<Frame>, expected: u64) -> (u64, Option<Frame>) {
    let mut received = 0;
    let mut last = None;
    while expected == 0 || received < expected {
        match annotated.recv_async().await {
            Ok(frame) => {
                received += 1;
                last = Some(frame);
            }
            Err(_) => break,
        }
    }
    (received, last)
}

/// RGB copy of a frame, whatever its channel order
fn snapshot(frame: &Frame) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        Rgb(frame.sample(x, y).0)
    })
}
