//! linksim: run one data-link scenario over in-memory serial links.
//!
//! The driver wires the core protocol engine to a [`SerialLink`] pair (bus
//! and CSMA modes) or to a three-station ring, sends a few messages and
//! prints the resulting metrics.

mod config;
mod input_gen;

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use linksim_core::bus::{spawn_receiver, BusReceiver, DirectSender};
use linksim_core::csma::{CsmaSender, SendOutcome};
use linksim_core::events::{SharedSink, TracingSink};
use linksim_core::fault::{FaultConfig, RandomFaults};
use linksim_core::metrics::{record, shared, snapshot, SharedMetrics};
use linksim_core::ring_frame::segment;
use linksim_core::scheduler::spawn_ring;
use linksim_core::token_ring::{RingCommand, Station, TokenRing};
use linksim_core::SerialLink;

use config::{Config, Mode};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args).map_err(anyhow::Error::msg)?;
    if config.print_config {
        config.print();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    info!(mode = %config.mode, seed = config.seed, "linksim starting");

    let sink: SharedSink = Arc::new(TracingSink);
    let metrics = shared();

    let max_words = if config.mode == Mode::Ring { 6 } else { 3 };
    let messages = match &config.message {
        Some(message) => vec![message.clone()],
        None => input_gen::generate_messages(config.seed, config.count, max_words),
    };

    match config.mode {
        Mode::Bus | Mode::Csma => run_bus(&config, &messages, sink, metrics.clone()).await?,
        Mode::Ring => run_ring(&config, messages, sink, metrics.clone()).await?,
    }

    record(&metrics, |m| m.complete());
    let summary = snapshot(&metrics);
    println!("{}", summary.status_line(config.link.transfer_rate.baud()));
    if config.print_metrics {
        summary.print_summary();
    }
    Ok(())
}

/// Send every message as a run of bus frames, directly or through CSMA/CD.
async fn run_bus(
    config: &Config,
    messages: &[String],
    sink: SharedSink,
    metrics: SharedMetrics,
) -> Result<()> {
    let link = &config.link;
    let direction = link.direction;
    let codec = link.codec();
    let (sender_port, receiver_port) =
        SerialLink::pair(direction.source_port(), direction.destination_port());

    let mut receiver = BusReceiver::new(direction.destination_port(), codec);
    if link.csma.corruption_probability > 0.0 {
        // Separate stream from the contention draws
        let faults = FaultConfig {
            seed: link.csma.seed.wrapping_add(2),
            ..link.fault_config()
        };
        receiver = receiver.with_faults(Box::new(RandomFaults::new(faults)));
    }

    let cancel = CancellationToken::new();
    let receive_task = spawn_receiver(
        receiver_port,
        receiver,
        sink.clone(),
        metrics.clone(),
        link.receive_poll(),
        cancel.clone(),
    );

    let mut frames = Vec::new();
    for message in messages {
        for block in segment(message, codec.data_length)? {
            frames.push(codec.build(block, direction.destination_address(), direction.source_address())?);
        }
    }
    info!(%direction, frames = frames.len(), "sending");

    if config.mode == Mode::Csma {
        let mut sender = CsmaSender::from_config(sender_port, link, sink, metrics);
        for frame in &frames {
            if let SendOutcome::Dropped { attempts } = sender.send(frame).await? {
                info!(attempts, "frame abandoned");
            }
        }
    } else {
        let mut sender = DirectSender::new(sender_port, sink, metrics);
        for frame in &frames {
            sender.send(frame).await?;
        }
    }

    // Let the receiver drain the last writes
    tokio::time::sleep(link.receive_poll() * 3).await;
    cancel.cancel();
    receive_task.await.context("receive task panicked")??;
    Ok(())
}

/// Circulate the token around A, B and C, sending from whoever holds it.
async fn run_ring(
    config: &Config,
    messages: Vec<String>,
    sink: SharedSink,
    metrics: SharedMetrics,
) -> Result<()> {
    let stations = vec![
        Station::new("A", 0x0A, 1),
        Station::new("B", 0x0B, 1),
        Station::new("C", 0x0C, 2),
    ];
    let ring_faults = FaultConfig {
        busy_probability: 0.0,
        collision_probability: 0.0,
        ..config.link.fault_config()
    };
    let ring = TokenRing::new(stations, &config.link.ring, sink, metrics)?
        .with_faults(Box::new(RandomFaults::new(ring_faults)))
        .with_seed(config.seed);

    let mut channels = spawn_ring(ring, config.link.ring.dwell());
    let mut pending: VecDeque<String> = messages.into();
    let mut delivered = 0usize;

    for _ in 0..config.ring_ticks {
        channels
            .snapshots
            .changed()
            .await
            .context("ring scheduler stopped")?;
        while let Ok(delivery) = channels.deliveries.try_recv() {
            delivered += 1;
            println!(
                "{} <- {:#04x}: {}",
                delivery.station,
                delivery.frame.source,
                delivery.frame.text()
            );
        }

        let state = channels.snapshots.borrow_and_update().clone();
        let Some(holder) = state.holder() else {
            continue;
        };
        // Address the next station along the ring
        let position = state
            .stations
            .iter()
            .position(|s| s.address == holder.address)
            .unwrap_or(0);
        let to = state.stations[(position + 1) % state.stations.len()].address;
        if let Some(message) = pending.pop_front() {
            channels.commands.send(RingCommand::Send {
                from: holder.address,
                to,
                message,
            })?;
        }
    }

    channels.cancel.cancel();
    let ring = channels.join.await.context("ring scheduler panicked")?;
    info!(
        delivered,
        still_queued = ring.queue_depth(),
        unsent = pending.len(),
        "ring stopped"
    );
    Ok(())
}
