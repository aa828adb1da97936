//! Ticker-driven harvesting of process and host statistics into [`Stats`].

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::stats::{SourceSample, Stats};

/// How often blocked loops wake up to check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

pub struct Sampler {
    stats: Arc<Stats>,
    selection: Vec<String>,
    system: System,
    own_pid: Option<Pid>,
}

impl Sampler {
    pub fn new(stats: Arc<Stats>, selection: Vec<String>) -> Self {
        let own_pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("cannot resolve own pid, runtime metrics will read zero: {e}");
                None
            }
        };

        Sampler {
            stats,
            selection,
            system: System::new(),
            own_pid,
        }
    }

    /// Run sampling ticks until `keep_running` goes false.
    pub fn run(&mut self, interval: Duration, keep_running: &AtomicBool) {
        let ticker = crossbeam_channel::tick(interval);

        while keep_running.load(Relaxed) {
            match ticker.recv_timeout(SHUTDOWN_POLL) {
                Ok(_) => self.sample(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!("sampler stopped");
    }

    /// One tick: refresh the sources and fold the readings into the store.
    pub fn sample(&mut self) {
        let sample = self.harvest();
        self.stats.apply_sample(&self.selection, &sample);
    }

    fn harvest(&mut self) -> SourceSample {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut sample = SourceSample {
            total_memory: self.system.total_memory(),
            free_memory: self.system.free_memory(),
            available_memory: self.system.available_memory(),
            used_memory: self.system.used_memory(),
            total_swap: self.system.total_swap(),
            free_swap: self.system.free_swap(),
            used_swap: self.system.used_swap(),
            per_cpu_percent: self.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect(),
            ..SourceSample::default()
        };

        if let Some(pid) = self.own_pid {
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

            if let Some(process) = self.system.process(pid) {
                let disk = process.disk_usage();
                sample.resident_memory = process.memory();
                sample.virtual_memory = process.virtual_memory();
                sample.process_cpu_percent = process.cpu_usage();
                sample.run_time_seconds = process.run_time();
                sample.start_time_seconds = process.start_time();
                sample.disk_read_bytes = disk.total_read_bytes;
                sample.disk_written_bytes = disk.total_written_bytes;
            }
        }

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::POLL_COUNT;

    #[test]
    fn sample_populates_host_memory_gauges() {
        let stats = Arc::new(Stats::new());
        let mut sampler = Sampler::new(
            stats.clone(),
            vec!["TotalMemory".to_string(), "UsedMemory".to_string()],
        );

        sampler.sample();

        let batch = stats.as_batch();
        let total = batch.iter().find(|m| m.id == "TotalMemory").unwrap();
        assert!(total.value.unwrap() > 0.0);
        assert!(batch.iter().any(|m| m.id == POLL_COUNT));
    }

    #[test]
    fn repeated_sampling_keeps_store_consistent() {
        let stats = Arc::new(Stats::new());
        let mut sampler = Sampler::new(stats.clone(), vec!["ResidentMemory".to_string()]);

        sampler.sample();
        sampler.sample();

        let batch = stats.as_batch();
        let poll = batch.iter().find(|m| m.id == POLL_COUNT).unwrap();
        assert_eq!(poll.delta, Some(2));
    }
}
