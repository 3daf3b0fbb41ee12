// pawtrack - fix pipeline replay and trail comparison
// Licensed under AGPL v3

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use pawtrack::compare;
use pawtrack::config::{CompareArgs, Command, Config, MatchMode, ReplayArgs};
use pawtrack::coordinator::Coordinator;
use pawtrack::export;
use pawtrack::net::{memory_link, ConsumerRelay, ProducerRelay};
use pawtrack::output::{CsvOutput, LogOutput};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_logging(config.verbose);

    match config.command {
        Command::Replay(args) => replay(args, config.verbose).await,
        Command::Compare(args) => compare_logs(args),
    }
}

/// Run a recorded fix log through sensor side, loopback link and display side
async fn replay(args: ReplayArgs, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let policy = args.tracking_policy()?;
    let relay_config = args.relay_config();
    let fixes = export::load_trail(&args.input)?;
    info!(fixes = fixes.len(), policy = policy.name(), "Replaying {}", args.input);

    let sensor = Arc::new(Coordinator::new(&relay_config, policy.clone()));
    let display = Arc::new(Coordinator::new(&relay_config, policy));

    if verbose {
        display.add_observer(Box::new(LogOutput)).await;
    }
    for filename in &args.write_csv {
        match CsvOutput::new(filename) {
            Ok(csv_out) => {
                info!("Writing accepted fixes to {}", filename);
                display.add_observer(Box::new(csv_out)).await;
            }
            Err(e) => error!("Failed to open CSV output file {}: {}", filename, e),
        }
    }

    // Durable side sized so a full replay never backs up the producer
    let (transport, inbound) = memory_link(256, fixes.len().max(1));
    transport.set_reachable(!args.unreachable);
    let pump = inbound.spawn_pump(ConsumerRelay::new(
        Arc::clone(&display),
        relay_config.escalation_threshold,
    ));

    let producer = ProducerRelay::spawn(Arc::new(transport), relay_config);
    sensor.attach_producer(producer).await;

    for fix in fixes {
        sensor.submit(fix).await;
    }

    if let Some(producer) = sensor.detach_producer().await {
        let delivery = producer.stats();
        let unsent = producer.shutdown().await?;
        if !unsent.is_empty() {
            warn!(fixes = unsent.len(), "Fixes left undelivered");
        }
        info!(
            best_effort_sent = delivery.best_effort_sent,
            batches_sent = delivery.batches_sent,
            status_pushes = delivery.status_pushes,
            "Delivery summary"
        );
    }
    // The producer task owned the transport; the link closes once it exits
    let consumer = pump.await?;

    let sent = sensor.stats().await;
    let received = display.stats().await;
    let trail = display.trail().await;
    let drain = display.drain_estimate().await;
    info!(
        accepted = sent.accepted,
        accuracy_rejected = sent.accuracy_rejected,
        jump_rejected = sent.jump_rejected,
        rejection_rate = format!("{:.3}", sent.rejection_rate()),
        "Sensor side"
    );
    info!(
        accepted = received.accepted,
        duplicates = received.duplicates,
        decode_failures = received.decode_failures,
        trail = trail.len(),
        decode_streak = consumer.consecutive_failures(),
        "Display side"
    );
    if let Some(rate) = drain.smoothed_percent_per_hour {
        info!(
            "Battery drain: {:.2} %/h (last interval {:.2} %/h)",
            rate,
            drain.instantaneous_percent_per_hour.unwrap_or(0.0)
        );
    }

    if let Some(path) = &args.write_trail {
        export::save_trail(path, &trail)?;
        info!("Trail written to {}", path);
    }
    if let Some(path) = &args.write_gpx {
        export::save_gpx(path, &args.input, &trail)?;
        info!("GPX written to {}", path);
    }
    Ok(())
}

fn compare_logs(args: CompareArgs) -> Result<(), Box<dyn std::error::Error>> {
    let baseline = export::load_track(&args.baseline)?;
    let test = export::load_track(&args.test)?;
    info!(baseline = baseline.len(), test = test.len(), "Loaded tracks");

    let pairs = match args.match_mode {
        MatchMode::Time => compare::match_by_time(&baseline, &test, args.epsilon_sec),
        MatchMode::Nearest => compare::match_by_nearest(&baseline, &test),
    };
    let distances: Vec<f64> = pairs.iter().map(|p| p.distance_m).collect();
    let s = compare::summarize(&distances);

    println!("Matched points: {}", s.count);
    if s.count > 0 {
        println!("Median error: {:.2} m", s.median);
        println!("P90 error:    {:.2} m", s.p90);
        println!("Max error:    {:.2} m", s.max);
        println!("Mean error:   {:.2} m", s.mean);
    }

    if let Some(path) = &args.csv {
        compare::write_csv(BufWriter::new(File::create(path)?), &pairs)?;
        info!("Per-point errors written to {}", path);
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
