// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Khora runtime demo
// Joins a few fan-out groups on a scheduler and drives an async message bus.
//
// Usage: runtime-demo [path/to/runtime.ron]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use khora_sync::FairMutex;
use khora_threads::{AsyncMessageBus, RuntimeConfig, Scheduler, SchedulerHandle};
use rand::Rng;

/// Published on the bus each time a group's continuation runs.
#[derive(Debug)]
struct GroupJoined {
    label: &'static str,
    units: usize,
}

/// Published by the bus's own `GroupJoined` handler.
#[derive(Debug)]
struct Summary {
    line: String,
}

fn load_config() -> Result<RuntimeConfig> {
    match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::load(&path)
            .with_context(|| format!("could not load runtime config from '{path}'")),
        None => {
            log::info!("No config path given, using defaults.");
            Ok(RuntimeConfig::default())
        }
    }
}

fn run_groups(
    scheduler: &Scheduler,
    bus: &Arc<AsyncMessageBus>,
    timeline: &Arc<FairMutex<Vec<String>>>,
) -> Result<()> {
    let groups = [("single", 1usize), ("small", 5), ("wide", 100)];
    let (joined_tx, joined_rx) = crossbeam_channel::unbounded();
    let handle: SchedulerHandle = scheduler.handle();

    for (label, units) in groups {
        let timeline = Arc::clone(timeline);
        let unit_jobs: Vec<_> = (0..units)
            .map(|index| {
                let timeline = Arc::clone(&timeline);
                move || {
                    let micros = rand::rng().random_range(50..500);
                    thread::sleep(Duration::from_micros(micros));
                    timeline.lock().push(format!("{label}[{index}]"));
                }
            })
            .collect();

        let bus = Arc::clone(bus);
        let joined_tx = joined_tx.clone();
        let group = handle.fan_out(unit_jobs, move || {
            if let Err(err) = bus.publish(GroupJoined { label, units }) {
                log::error!("Could not announce group '{label}': {err}");
            }
            let _ = joined_tx.send(label);
        })?;
        log::info!("Fanned out {units} unit(s) as {group} ('{label}').");
    }
    drop(joined_tx);

    let deadline = Instant::now() + Duration::from_secs(10);
    for _ in groups {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match joined_rx.recv_timeout(remaining) {
            Ok(label) => log::info!("Group '{label}' joined."),
            Err(err) => bail!("fan-out groups did not join in time: {err}"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    log::debug!("Runtime config:\n{}", config.to_ron_string()?);

    let bus = Arc::new(AsyncMessageBus::new(config.bus.clone())?);
    let summaries = Arc::new(FairMutex::new(Vec::new()));

    let republisher = Arc::downgrade(&bus);
    bus.subscribe(move |event: &GroupJoined| {
        // Runs on the bus thread, so this lands in the bus's local cache.
        if let Some(bus) = republisher.upgrade() {
            let line = format!("{} unit(s) joined for '{}'", event.units, event.label);
            if let Err(err) = bus.publish(Summary { line }) {
                log::warn!("Summary dropped: {err}");
            }
        }
    })?;
    let sink = Arc::clone(&summaries);
    bus.subscribe(move |summary: &Summary| sink.lock().push(summary.line.clone()))?;

    let timeline = Arc::new(FairMutex::new(Vec::new()));
    let scheduler = Scheduler::new(config.scheduler.clone())?;
    run_groups(&scheduler, &bus, &timeline)?;
    bus.flush()?;

    let workers = scheduler.worker_handles();
    let executed: u64 = workers.iter().map(|worker| worker.stats().executed).sum();
    log::info!(
        "{} unit(s) ran on {} worker(s); {} task(s) executed so far, {} continuation(s) dispatched.",
        timeline.lock().len(),
        workers.len(),
        executed,
        scheduler.dispatched()
    );
    for line in summaries.lock().iter() {
        log::info!("Bus: {line}");
    }

    drop(scheduler);
    let stats = bus.stats();
    log::info!(
        "Bus delivered {} event(s), {} handler failure(s).",
        stats.delivered,
        stats.failed
    );
    Ok(())
}
