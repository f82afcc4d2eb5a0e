use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError, RwLock},
};

use metrics_relay::Metric;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, Pid, ProcessesToUpdate, RefreshKind, System};

const POLL_COUNT: &str = "PollCount";
const RANDOM_VALUE: &str = "RandomValue";

#[derive(Default)]
struct Readings {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

/// Collects host and process measurements on demand.
///
/// Each [`poll`](Sampler::poll) overwrites the gauge set with fresh readings, sets `RandomValue`
/// to a random number in `[0, 1)` and increments the `PollCount` counter. Readers always get
/// copies, never a view into the live state.
pub struct Sampler {
    readings: RwLock<Readings>,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Sampler {
    /// Creates a new `Sampler` with no readings.
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
                .with_memory(MemoryRefreshKind::everything()),
        );

        Self {
            readings: RwLock::new(Readings::default()),
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Takes a new set of readings.
    pub fn poll(&self) {
        let mut gauges = Vec::with_capacity(16);
        {
            let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
            system.refresh_memory();
            system.refresh_cpu_usage();

            gauges.push(("TotalMemory".to_string(), system.total_memory() as f64));
            gauges.push(("FreeMemory".to_string(), system.free_memory() as f64));
            gauges.push(("AvailableMemory".to_string(), system.available_memory() as f64));
            gauges.push(("UsedMemory".to_string(), system.used_memory() as f64));
            gauges.push(("TotalSwap".to_string(), system.total_swap() as f64));
            gauges.push(("UsedSwap".to_string(), system.used_swap() as f64));
            gauges.push(("CPUutilization".to_string(), f64::from(system.global_cpu_usage())));
            for (i, cpu) in system.cpus().iter().enumerate() {
                gauges.push((format!("CPUutilization{}", i + 1), f64::from(cpu.cpu_usage())));
            }

            if let Some(pid) = self.pid {
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                if let Some(process) = system.process(pid) {
                    gauges.push(("ProcessResidentMemory".to_string(), process.memory() as f64));
                    gauges.push((
                        "ProcessVirtualMemory".to_string(),
                        process.virtual_memory() as f64,
                    ));
                }
            }
        }
        gauges.push((RANDOM_VALUE.to_string(), rand::random::<f64>()));

        let mut readings = self.readings.write().unwrap_or_else(PoisonError::into_inner);
        readings.gauges = gauges.into_iter().collect();
        let poll_count = readings.counters.entry(POLL_COUNT.to_string()).or_insert(0);
        *poll_count = poll_count.wrapping_add(1);
    }

    /// Returns a copy of the current gauges.
    pub fn gauges(&self) -> HashMap<String, f64> {
        self.readings.read().unwrap_or_else(PoisonError::into_inner).gauges.clone()
    }

    /// Returns a copy of the current counters.
    pub fn counters(&self) -> HashMap<String, i64> {
        self.readings.read().unwrap_or_else(PoisonError::into_inner).counters.clone()
    }

    /// Returns the number of gauges and counters held.
    pub fn counts(&self) -> (usize, usize) {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        (readings.gauges.len(), readings.counters.len())
    }

    /// Returns every reading as a metric, counters carrying their running total.
    pub fn metrics(&self) -> Vec<Metric> {
        let readings = self.readings.read().unwrap_or_else(PoisonError::into_inner);
        let gauges = readings.gauges.iter().map(|(name, v)| Metric::gauge(name.clone(), *v));
        let counters = readings.counters.iter().map(|(name, v)| Metric::counter(name.clone(), *v));
        gauges.chain(counters).collect()
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use metrics_relay::MetricKind;

    use super::Sampler;

    #[test]
    fn poll_fills_gauges_and_counts() {
        let sampler = Sampler::new();
        assert_eq!(sampler.counts(), (0, 0));

        sampler.poll();
        let gauges = sampler.gauges();
        for name in ["TotalMemory", "FreeMemory", "UsedMemory", "CPUutilization", "RandomValue"] {
            assert!(gauges.contains_key(name), "missing {name}");
        }
        assert!(gauges.keys().any(|k| k == "CPUutilization1"));
        assert_eq!(sampler.counters().get("PollCount"), Some(&1));

        let (gauge_count, counter_count) = sampler.counts();
        assert_eq!(gauge_count, gauges.len());
        assert_eq!(counter_count, 1);

        let metrics = sampler.metrics();
        assert_eq!(metrics.len(), gauge_count + counter_count);
        assert_eq!(metrics.iter().filter(|m| m.kind() == MetricKind::Counter).count(), 1);
    }

    #[test]
    fn random_value_in_unit_interval() {
        let sampler = Sampler::new();
        for _ in 0..20 {
            sampler.poll();
            let value = sampler.gauges()["RandomValue"];
            assert!((0.0..1.0).contains(&value), "{value}");
        }
    }

    #[test]
    fn copies_are_detached() {
        let sampler = Sampler::new();
        sampler.poll();

        let mut gauges = sampler.gauges();
        gauges.clear();
        let mut counters = sampler.counters();
        counters.insert("PollCount".to_string(), 100);

        assert!(!sampler.gauges().is_empty());
        assert_eq!(sampler.counters()["PollCount"], 1);
    }

    #[test]
    fn poll_count_under_concurrency() {
        const POLLERS: usize = 4;
        const POLLS: usize = 25;

        let sampler = Sampler::new();
        thread::scope(|s| {
            for _ in 0..POLLERS {
                s.spawn(|| {
                    for _ in 0..POLLS {
                        sampler.poll();
                    }
                });
            }
            s.spawn(|| {
                let mut last = 0;
                for _ in 0..POLLS {
                    let seen = sampler.counters().get("PollCount").copied().unwrap_or(0);
                    assert!(seen >= last);
                    last = seen;
                }
            });
        });

        assert_eq!(sampler.counters()["PollCount"], (POLLERS * POLLS) as i64);
    }
}
