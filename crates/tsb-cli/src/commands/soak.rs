//! Soak test against a live store.
//!
//! Each cycle behaves like a player filling its time-shift buffer: segments are
//! written until the store reports `NoSpace`, the oldest live segment is
//! deleted to make room, and the write is retried. At the end of the cycle
//! every live segment is read back and checked against the blake3 digest taken
//! when it was written, then the whole store is flushed.

use super::{
    finish_fail, finish_ok, format_bytes, json_pretty, label, open_store, progress_bar,
    shutdown_requested, EXIT_SUCCESS,
};
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tsb_store::{Status, Store, StoreConfig};

#[derive(Debug, Clone, Copy)]
pub struct SoakOptions {
    pub cycles: u32,
    pub segment_size: usize,
    pub segments: usize,
}

#[derive(Debug, Default)]
struct Timings {
    write: Duration,
    verify: Duration,
    flush: Duration,
}

#[derive(Debug, Default, Serialize)]
pub struct SoakReport {
    pub cycles: u32,
    pub segments_written: u64,
    pub bytes_written: u64,
    pub culled: u64,
    pub verified: u64,
    pub interrupted: bool,
    pub write_ms: u64,
    pub verify_ms: u64,
    pub flush_ms: u64,
}

/// A segment still held by the store and the digest of what was written.
struct LiveSegment {
    url: String,
    digest: blake3::Hash,
}

pub fn run(config: &StoreConfig, opts: &SoakOptions, json: bool) -> Result<u8, String> {
    if opts.segment_size == 0 {
        return Err("--segment-size must be at least 1 byte".to_owned());
    }

    let store = open_store(config)?;
    let total = u64::from(opts.cycles) * opts.segments as u64;
    let pb = if json {
        ProgressBar::hidden()
    } else {
        progress_bar(total, "soaking")
    };

    let mut report = SoakReport::default();
    let mut timings = Timings::default();
    for cycle in 0..opts.cycles {
        if shutdown_requested() {
            report.interrupted = true;
            break;
        }
        if let Err(msg) = run_cycle(&store, cycle, opts, &mut report, &mut timings, &pb) {
            finish_fail(&pb, &format!("soak failed in cycle {cycle}"));
            return Err(msg);
        }
    }
    report.interrupted |= shutdown_requested();
    report.write_ms = timings.write.as_millis() as u64;
    report.verify_ms = timings.verify.as_millis() as u64;
    report.flush_ms = timings.flush.as_millis() as u64;
    drop(store);

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        let outcome = if report.interrupted {
            "soak interrupted"
        } else {
            "soak complete"
        };
        finish_ok(&pb, outcome);
        print_summary(&report);
    }
    Ok(EXIT_SUCCESS)
}

fn run_cycle(
    store: &Store,
    cycle: u32,
    opts: &SoakOptions,
    report: &mut SoakReport,
    timings: &mut Timings,
    pb: &ProgressBar,
) -> Result<(), String> {
    let mut live: VecDeque<LiveSegment> = VecDeque::new();
    let mut data = vec![0u8; opts.segment_size];

    let t0 = Instant::now();
    for index in 0..opts.segments {
        if shutdown_requested() {
            break;
        }
        let url = format!("https://soak.tsb/cycle-{cycle}/segment-{index:06}.ts");
        fill_segment(&mut data, cycle, index);
        let digest = blake3::hash(&data);

        loop {
            match store.write(&url, &data) {
                Status::Ok => break,
                Status::NoSpace => {
                    let Some(oldest) = live.pop_front() else {
                        return Err(format!(
                            "cycle {cycle}: a {} segment does not fit in an empty store",
                            format_bytes(data.len() as u64)
                        ));
                    };
                    store.delete(&oldest.url);
                    report.culled += 1;
                }
                other => return Err(format!("cycle {cycle}: write {url}: {other}")),
            }
        }

        live.push_back(LiveSegment { url, digest });
        report.segments_written += 1;
        report.bytes_written += data.len() as u64;
        pb.inc(1);
    }
    timings.write += t0.elapsed();

    let t0 = Instant::now();
    for segment in &live {
        verify_segment(store, segment, &mut data)
            .map_err(|msg| format!("cycle {cycle}: {msg}"))?;
        report.verified += 1;
    }
    timings.verify += t0.elapsed();

    let t0 = Instant::now();
    store.flush();
    timings.flush += t0.elapsed();

    report.cycles += 1;
    Ok(())
}

fn verify_segment(store: &Store, segment: &LiveSegment, buf: &mut Vec<u8>) -> Result<(), String> {
    let size = store.get_size(&segment.url);
    if size == 0 {
        return Err(format!("{} is missing", segment.url));
    }
    buf.resize(size as usize, 0);
    match store.read(&segment.url, buf) {
        Status::Ok => {}
        other => return Err(format!("read {}: {other}", segment.url)),
    }
    if blake3::hash(buf) != segment.digest {
        return Err(format!("{} does not match what was written", segment.url));
    }
    Ok(())
}

/// Deterministic, incompressible segment content.
fn fill_segment(buf: &mut [u8], cycle: u32, index: usize) {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&cycle.to_le_bytes());
    hasher.update(&(index as u64).to_le_bytes());
    hasher.finalize_xof().fill(buf);
}

fn print_summary(report: &SoakReport) {
    println!(
        "{} {} ({} segments, {})",
        label("cycles:"),
        report.cycles,
        report.segments_written,
        format_bytes(report.bytes_written)
    );
    println!(
        "{} {} culled, {} verified",
        label("segments:"),
        report.culled,
        report.verified
    );
    println!(
        "{} write {} ms, verify {} ms, flush {} ms",
        label("timings:"),
        report.write_ms,
        report.verify_ms,
        report.flush_ms
    );
}
