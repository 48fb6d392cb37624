use crate::config::Config;
use crate::events::EventLog;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A daemon whose resource usage is sampled, keyed by the name used in
/// event names (`mem-<component>-done`).
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub executable: String,
}

impl Component {
    pub fn new(name: &str, executable: &str) -> Component {
        Component {
            name: name.to_string(),
            executable: executable.to_string(),
        }
    }
}

/// Samples memory, CPU and traffic counters from procfs and sysfs.
///
/// Every sampler returns `None` when its target cannot be resolved. A
/// missing daemon is expected (vanilla runs have no snapshotter daemon) and
/// only logged at debug.
#[derive(Debug, Clone)]
pub struct TelemetryCollector {
    proc_root: PathBuf,
    sys_root: PathBuf,
    clock_ticks: u64,
    interface: String,
}

impl TelemetryCollector {
    pub fn new(config: &Config) -> TelemetryCollector {
        TelemetryCollector::with_roots(
            &config.proc_root,
            &config.sys_root,
            config.clock_ticks,
            &config.local_interface,
        )
    }

    pub fn with_roots(proc_root: &Path, sys_root: &Path, clock_ticks: u64, interface: &str) -> Self {
        TelemetryCollector {
            proc_root: proc_root.to_path_buf(),
            sys_root: sys_root.to_path_buf(),
            clock_ticks: clock_ticks.max(1),
            interface: interface.to_string(),
        }
    }

    /// Find the lowest pid whose command name is `executable`.
    ///
    /// # Arguments
    /// * `executable` - The process name as shown in `/proc/<pid>/comm`.
    ///   Names longer than the kernel's 15 character limit are compared on
    ///   their truncated prefix.
    ///
    /// # Returns
    /// The pid, or `None` if no such process is alive.
    pub fn resolve_pid(&self, executable: &str) -> Option<u32> {
        let wanted: String = executable.chars().take(15).collect();
        let entries = fs::read_dir(&self.proc_root).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let pid = entry.file_name().to_str()?.parse::<u32>().ok()?;
                let comm = fs::read_to_string(entry.path().join("comm")).ok()?;
                (comm.trim_end() == wanted).then_some(pid)
            })
            .min()
    }

    /// Peak resident set size of a process.
    ///
    /// # Arguments
    /// * `executable` - The process name to resolve.
    ///
    /// # Returns
    /// `VmHWM` in kB from `/proc/<pid>/status`.
    pub fn memory_peak_kb(&self, executable: &str) -> Option<u64> {
        let pid = self.resolve_pid(executable)?;
        let status = fs::read_to_string(self.proc_root.join(pid.to_string()).join("status")).ok()?;
        parse_vm_hwm(&status)
    }

    /// Cumulative CPU time of a process.
    ///
    /// # Arguments
    /// * `executable` - The process name to resolve.
    ///
    /// # Returns
    /// User plus system time in seconds, from `/proc/<pid>/stat`.
    pub fn cpu_seconds(&self, executable: &str) -> Option<f64> {
        let pid = self.resolve_pid(executable)?;
        let stat = fs::read_to_string(self.proc_root.join(pid.to_string()).join("stat")).ok()?;
        let ticks = parse_cpu_ticks(&stat)?;
        Some(ticks as f64 / self.clock_ticks as f64)
    }

    /// Cumulative packet counters of a network interface.
    ///
    /// # Returns
    /// `(received, transmitted)` packets since the interface came up.
    pub fn packet_counters(&self, interface: &str) -> Option<(u64, u64)> {
        let statistics = self
            .sys_root
            .join("class/net")
            .join(interface)
            .join("statistics");
        let read = |name: &str| -> Option<u64> {
            fs::read_to_string(statistics.join(name))
                .ok()?
                .trim()
                .parse()
                .ok()
        };
        Some((read("rx_packets")?, read("tx_packets")?))
    }

    /// Samples every component and the shaped interface, appending one event
    /// per available value.
    ///
    /// # Arguments
    /// * `log` - The experiment's event log.
    /// * `method` - Strategy and phase context, e.g. `starlight-update`.
    /// * `rtt`, `round` - The trial's network condition and round.
    /// * `checkpoint` - Suffix of the event names, e.g. `done`.
    /// * `components` - The daemons to sample.
    ///
    /// # Returns
    /// The number of events recorded.
    pub fn record(
        &self,
        log: &mut EventLog,
        method: &str,
        rtt: u32,
        round: usize,
        checkpoint: &str,
        components: &[Component],
    ) -> usize {
        let before = log.len();

        for component in components {
            match self.memory_peak_kb(&component.executable) {
                Some(kb) => log.add_event_now(
                    method,
                    &format!("mem-{}-{}", component.name, checkpoint),
                    rtt,
                    round,
                    kb as f64,
                ),
                None => debug!(component = %component.name, "memory usage unavailable"),
            }
            match self.cpu_seconds(&component.executable) {
                Some(seconds) => log.add_event_now(
                    method,
                    &format!("cpu-{}-{}", component.name, checkpoint),
                    rtt,
                    round,
                    seconds,
                ),
                None => debug!(component = %component.name, "cpu time unavailable"),
            }
        }

        self.record_traffic(log, method, rtt, round, checkpoint);

        log.len() - before
    }

    /// Samples only the shaped interface's cumulative packet counters, as
    /// `cum-receive-<checkpoint>` and `cum-sent-<checkpoint>`.
    ///
    /// # Returns
    /// The number of events recorded, 0 or 2.
    pub fn record_traffic(
        &self,
        log: &mut EventLog,
        method: &str,
        rtt: u32,
        round: usize,
        checkpoint: &str,
    ) -> usize {
        match self.packet_counters(&self.interface) {
            Some((received, sent)) => {
                log.add_event_now(method, &format!("cum-receive-{}", checkpoint), rtt, round, received as f64);
                log.add_event_now(method, &format!("cum-sent-{}", checkpoint), rtt, round, sent as f64);
                2
            }
            None => {
                debug!(interface = %self.interface, "traffic counters unavailable");
                0
            }
        }
    }
}

/// `VmHWM:     12345 kB` -> `12345`
pub fn parse_vm_hwm(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmHWM"))?
        .split_whitespace()
        .find_map(|field| field.parse().ok())
}

/// Sum of `utime` and `stime` (fields 14 and 15 of `/proc/<pid>/stat`).
/// The command name may contain spaces, so fields are counted after its
/// closing parenthesis.
pub fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // `rest` starts at field 3 (state).
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}
