use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ui_relay::bench::stream_load::{run_stream_load, StreamLoadOptions, StreamLoadReport};
use ui_relay::PipelineConfig;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("relay benchmark failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut options = StreamLoadOptions::default();
    let mut config_path: Option<PathBuf> = None;
    let mut output_path = PathBuf::from("relay_bench_results.json");
    let mut quiet = false;

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(());
        }

        if let Some((flag, value)) = arg.split_once('=') {
            apply_value(&mut options, &mut config_path, &mut output_path, flag, value)?;
            continue;
        }

        match arg.as_str() {
            "--live" => {
                options.live_activity = true;
                continue;
            }
            "--quiet" => {
                quiet = true;
                continue;
            }
            "--sessions" | "--workspaces" | "--messages" | "--fragments" | "--tick-ms" | "--config"
            | "--output" => {
                let value = args
                    .next()
                    .ok_or_else(|| format!("{arg} requires a value"))?;
                apply_value(&mut options, &mut config_path, &mut output_path, &arg, &value)?;
                continue;
            }
            _ => {}
        }

        return Err(format!("unknown argument: {arg}"));
    }

    ui_relay::init_tracing();
    options.config = PipelineConfig::load(config_path.as_deref())
        .map_err(|error| format!("failed to load relay config: {error}"))?;

    let pb = if quiet {
        None
    } else {
        let pb = ProgressBar::new((options.sessions * options.messages_per_session) as u64);
        pb.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .map_err(|error| format!("invalid progress template: {error}"))?
                .progress_chars("#>-"),
        );
        pb.set_message("stream load");
        Some(pb)
    };

    let report = run_stream_load(&options, pb.as_ref())
        .await
        .map_err(|error| error.to_string())?;
    if let Some(pb) = &pb {
        pb.finish_with_message("complete");
    }

    let output_json = serde_json::to_string_pretty(&report)
        .map_err(|error| format!("failed to serialize benchmark output: {error}"))?;
    std::fs::write(&output_path, output_json)
        .map_err(|error| format!("failed to write '{}': {error}", output_path.display()))?;

    print_summary(&report);
    println!("\nSaved benchmark output to {}", output_path.display());

    if !report.inconsistent_sessions.is_empty() {
        return Err(format!(
            "store text diverged for {} session(s): {}",
            report.inconsistent_sessions.len(),
            report.inconsistent_sessions.join(", ")
        ));
    }
    Ok(())
}

fn apply_value(
    options: &mut StreamLoadOptions,
    config_path: &mut Option<PathBuf>,
    output_path: &mut PathBuf,
    flag: &str,
    value: &str,
) -> Result<(), String> {
    match flag {
        "--sessions" => options.sessions = parse_positive_usize(value, flag)?,
        "--workspaces" => options.workspaces = parse_positive_usize(value, flag)?,
        "--messages" => options.messages_per_session = parse_positive_usize(value, flag)?,
        "--fragments" => options.fragments_per_message = parse_positive_usize(value, flag)?,
        "--tick-ms" => options.tick = Duration::from_millis(parse_positive_usize(value, flag)? as u64),
        "--config" => *config_path = Some(PathBuf::from(value)),
        "--output" => *output_path = PathBuf::from(value),
        other => return Err(format!("unknown argument: {other}")),
    }
    Ok(())
}

fn print_help() {
    println!("UI relay stream load benchmark");
    println!();
    println!("Usage:");
    println!("  cargo run --release --bin relay_bench -- [options]");
    println!();
    println!("Options:");
    println!("  --sessions <n>      Concurrent synthetic sessions (default: 8)");
    println!("  --workspaces <n>    Workspaces the sessions are spread over (default: 3)");
    println!("  --messages <n>      Messages streamed per session (default: 4)");
    println!("  --fragments <n>     Deltas per message (default: 200)");
    println!("  --tick-ms <n>       Pause between rounds in ms (default: 2)");
    println!("  --live              Mark every session as running for the whole run");
    println!("  --config <path>     JSON pipeline config; UI_RELAY_* env vars still apply");
    println!("  --output <path>     Output JSON file path (default: relay_bench_results.json)");
    println!("  --quiet             No progress bar");
}

fn parse_positive_usize(value: &str, flag: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|_| format!("{flag} expects a positive integer, got '{value}'"))?;
    if parsed == 0 {
        return Err(format!("{flag} expects a value greater than 0"));
    }
    Ok(parsed)
}

fn print_summary(report: &StreamLoadReport) {
    println!(
        "{:<10} {:>10} {:>12} {:>14} {:>10} {:>10} {:>14} {:>10}",
        "sessions", "events", "elapsed(ms)", "events/sec", "sent", "merged", "notifications", "ratio"
    );
    println!(
        "{:-<10} {:-<10} {:-<12} {:-<14} {:-<10} {:-<10} {:-<14} {:-<10}",
        "", "", "", "", "", "", "", ""
    );
    println!(
        "{:<10} {:>10} {:>12.2} {:>14.2} {:>10} {:>10} {:>14} {:>10.4}",
        report.sessions,
        report.events_emitted,
        report.elapsed_ms,
        report.events_per_sec,
        report.batcher.sent,
        report.batcher.merged,
        report.store_notifications,
        report.notification_ratio,
    );
    println!(
        "\nbatcher: immediate={} batched={} flushes={} dropped={} live_activations={}",
        report.batcher.immediate,
        report.batcher.batched,
        report.batcher.flushes,
        report.batcher.dropped,
        report.batcher.live_activity_activations,
    );
    println!(
        "handler: handled={} malformed={} snapshots skipped={} patched={} replaced={}",
        report.handler.handled,
        report.handler.malformed,
        report.handler.snapshots_skipped,
        report.handler.snapshots_patched,
        report.handler.snapshots_replaced,
    );
    println!(
        "consistency: {}/{} sessions match the streamed text",
        report.consistent_sessions, report.sessions
    );
}
