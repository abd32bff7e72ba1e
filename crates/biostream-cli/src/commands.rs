use std::path::Path;
use std::pin::pin;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::Utc;
use futures::StreamExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};

use biostream_core::sources::{EndpointStreamSource, HttpStreamSource, StaticDeviceProvider};
use biostream_core::{
    Collaborators, FrameExtractor, Modality, StreamConfig, StreamController, TaggedFrame,
    WorkerState,
};

use crate::output::FrameWriter;

pub async fn stream(
    config: StreamConfig,
    modality: Modality,
    output: &Path,
    max_frames: Option<u64>,
) -> Result<()> {
    let devices = StaticDeviceProvider::from_config(&config);
    if devices.is_empty() {
        warn!("No devices configured; add a [devices] table to the config");
    }
    let streams = EndpointStreamSource::new(HttpStreamSource::new()?);
    let controller = StreamController::new(
        Collaborators::new(Arc::new(devices), Arc::new(streams)),
        config,
    );

    let mut writer = FrameWriter::create(output).await?;
    // Unbounded: the writer must see every frame
    let (tx, mut rx) = mpsc::unbounded_channel::<TaggedFrame>();
    controller.start(modality, Arc::new(tx), None).await?;

    let started = Utc::now();
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    loop {
        tokio::select! {
            frame = rx.recv() => {
                // Sender lives in the worker; None means it ended
                let Some(frame) = frame else { break };
                writer.write(&frame).await?;
                if max_frames.is_some_and(|max| writer.written() >= max) {
                    info!(frames = writer.written(), "Frame limit reached");
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    let report = controller.shutdown().await;
    let elapsed = Utc::now() - started;
    info!(
        %modality,
        written = writer.written(),
        bytes = writer.bytes(),
        elapsed_ms = elapsed.num_milliseconds(),
        "Stream finished"
    );

    let Some(report) = report else {
        return Ok(());
    };
    match report.error {
        Some(err) if report.final_state == WorkerState::Error => {
            Err(err).context("device stream failed")
        }
        Some(err) if !err.is_explicit_close() => {
            warn!(error = %err, frames = report.frames, "Device stream ended");
            Ok(())
        }
        _ => Ok(()),
    }
}

pub async fn extract(
    config: &StreamConfig,
    input: &Path,
    output: &Path,
    max_frames: Option<u64>,
) -> Result<()> {
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("failed to open {}", input.display()))?;
    let reader = BufReader::with_capacity(config.read_buffer_size, file);
    let mut frames = pin!(FrameExtractor::new(config.limits).frames(reader));

    let mut writer = FrameWriter::create(output).await?;
    let mut sequence = 0;
    while let Some(frame) = frames.next().await {
        let frame = frame.with_context(|| format!("bad frame at index {sequence}"))?;
        writer.write(&TaggedFrame::new(sequence, frame)).await?;
        sequence += 1;
        if max_frames.is_some_and(|max| sequence >= max) {
            break;
        }
    }

    info!(
        input = %input.display(),
        frames = writer.written(),
        bytes = writer.bytes(),
        "Extraction finished"
    );
    Ok(())
}
