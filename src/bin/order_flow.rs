//! Order pipeline runner
//!
//! Submits N orders (default 500) from a small producer group, drains the
//! pipeline gracefully, and prints the final counts.
//!
//! Usage: order-flow [orders_count]

use order_pipeline::{Order, Pipeline, PipelineConfig};
use std::env;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const PRODUCERS: u64 = 4;

fn parse_args() -> Option<u64> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => Some(500),
        [count] => count.parse().ok(),
        _ => None,
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(total) = parse_args() else {
        eprintln!("Usage: order-flow [orders_count]");
        return ExitCode::from(1);
    };

    let pipeline = Pipeline::new(PipelineConfig::default());
    if let Err(err) = pipeline.start() {
        eprintln!("failed to start pipeline: {err}");
        return ExitCode::from(1);
    }

    let scope = crossbeam::thread::scope(|s| {
        for producer in 0..PRODUCERS {
            let pipeline = &pipeline;
            s.spawn(move |_| {
                let mut id = producer + 1;
                while id <= total {
                    // Backpressure rejections are retried by the caller.
                    while !pipeline.submit(Order::new(id)) {
                        if !pipeline.is_running() {
                            return;
                        }
                    }
                    id += PRODUCERS;
                }
            });
        }
    });
    if scope.is_err() {
        eprintln!("producer thread panicked");
        return ExitCode::from(1);
    }

    pipeline.shutdown();

    let m = pipeline.metrics();
    println!("Accepted: {}", m.accepted_count);
    println!("Processed: {}", m.packed_count);
    println!("Delivered: {}", m.delivered_count);
    println!("Total processing time (ms): {}", m.total_lead_time.as_millis());

    ExitCode::SUCCESS
}
