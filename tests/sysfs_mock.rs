use residency::config;
use residency::cpu::{CpuNode, NodeKind, Row, TableStyle, TopologyTree};
use residency::cpu::{display_cpu_cstates, display_cpu_pstates};
use residency::detect::HardwareInfo;
use residency::detect::topology::enumerate;
use residency::measure::{MeasurementCycle, Phase};
use residency::sample::SysfsSampler;
use residency::sysfs::SysfsRoot;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CPU_BASE: &str = "sys/devices/system/cpu";

/// Idle states exposed by every CPU of the fixture.
const STATES: [(&str, &str); 4] = [
    ("state0", "POLL"),
    ("state1", "C1"),
    ("state2", "C1E"),
    ("state3", "C6"),
];

/// Frequencies in kHz; the last one is the turbo bin.
const FREQS_KHZ: [u64; 3] = [800_000, 2_400_000, 2_401_000];

fn write_idle(root: &Path, cpu: usize, state: &str, name: &str, usage: u64, time: u64) {
    let dir = root.join(format!("{}/cpu{}/cpuidle/{}", CPU_BASE, cpu, state));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("name"), format!("{}\n", name)).unwrap();
    fs::write(dir.join("usage"), format!("{}\n", usage)).unwrap();
    fs::write(dir.join("time"), format!("{}\n", time)).unwrap();
}

fn write_time_in_state(root: &Path, cpu: usize, ticks: [u64; 3]) {
    let dir = root.join(format!("{}/cpu{}/cpufreq/stats", CPU_BASE, cpu));
    fs::create_dir_all(&dir).unwrap();
    // acpi-cpufreq lists the highest frequency first
    let content: String = FREQS_KHZ
        .iter()
        .zip(ticks)
        .rev()
        .map(|(khz, ticks)| format!("{} {}\n", khz, ticks))
        .collect();
    fs::write(dir.join("time_in_state"), content).unwrap();
}

/// One package, two cores, two SMT siblings per core (CPUs 0/2 and 1/3),
/// every counter at 1000.
fn create_fixture(root: &Path) {
    let cpu_base = root.join(CPU_BASE);
    fs::create_dir_all(cpu_base.join("cpuidle")).unwrap();
    fs::write(cpu_base.join("cpuidle/current_driver"), "intel_idle\n").unwrap();
    fs::write(cpu_base.join("cpuidle/current_governor_ro"), "menu\n").unwrap();
    fs::write(cpu_base.join("online"), "0-3\n").unwrap();

    fs::create_dir_all(root.join("proc")).unwrap();
    fs::write(
        root.join("proc/cpuinfo"),
        "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu family\t: 6\nmodel\t\t: 142\nmodel name\t: Intel(R) Core(TM) i5-8250U CPU @ 1.60GHz\n\n",
    )
    .unwrap();

    for cpu in 0..4 {
        let dir = cpu_base.join(format!("cpu{}", cpu));
        fs::create_dir_all(dir.join("topology")).unwrap();
        fs::create_dir_all(dir.join("cpufreq")).unwrap();
        fs::write(dir.join("topology/physical_package_id"), "0\n").unwrap();
        fs::write(dir.join("topology/core_id"), format!("{}\n", cpu % 2)).unwrap();
        if cpu != 0 {
            fs::write(dir.join("online"), "1\n").unwrap();
        }
        fs::write(dir.join("cpufreq/cpuinfo_max_freq"), "2401000\n").unwrap();
        fs::write(dir.join("cpufreq/scaling_driver"), "acpi-cpufreq\n").unwrap();

        for (state, name) in STATES {
            write_idle(root, cpu, state, name, 1000, 1000);
        }
        write_time_in_state(root, cpu, [1000, 1000, 1000]);
    }
}

struct Fixture {
    tmp: TempDir,
    cycle: MeasurementCycle<SysfsSampler>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        create_fixture(tmp.path());
        let sysfs = SysfsRoot::new(tmp.path());
        let tree = enumerate(&sysfs).unwrap();
        let cycle = MeasurementCycle::new(tree, SysfsSampler::new(sysfs));
        Self { tmp, cycle }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn tree(&self) -> &TopologyTree {
        self.cycle.tree()
    }

    fn thread(&self, cpu: usize) -> &CpuNode {
        let id = self.tree().find_thread(cpu).unwrap();
        self.tree().node(id).unwrap()
    }

    fn package(&self) -> &CpuNode {
        self.tree().node(self.tree().roots()[0]).unwrap()
    }

    fn core(&self, index: usize) -> &CpuNode {
        let id = self.package().children()[index];
        self.tree().node(id).unwrap()
    }

    /// Run one 100 ms interval, applying `between` to the counters while it
    /// is open.
    fn interval(&mut self, between: impl FnOnce(&Path)) {
        let t0 = Instant::now();
        self.cycle.start(t0).unwrap();
        between(self.tmp.path());
        self.cycle.end(t0 + Duration::from_millis(100)).unwrap();
        self.cycle.process().unwrap();
        assert_eq!(self.cycle.phase(), Phase::Durable);
    }
}

/// Typical 100 ms: CPU0 sleeps 50 ms in C6 over 5 entries, CPU1 30 ms
/// over 3, CPUs 2 and 3 stay in C1 for 10 ms. Every CPU spends 50 ms at
/// 800 MHz and 30 ms at 2.4 GHz.
fn typical_interval(root: &Path) {
    write_idle(root, 0, "state3", "C6", 1005, 51_000);
    write_idle(root, 1, "state3", "C6", 1003, 31_000);
    write_idle(root, 2, "state1", "C1", 1010, 11_000);
    write_idle(root, 3, "state1", "C1", 1010, 11_000);
    for cpu in 0..4 {
        write_time_in_state(root, cpu, [1005, 1003, 1000]);
    }
}

#[test]
fn test_topology_from_mock_sysfs() {
    let fx = Fixture::new();
    assert_eq!(fx.tree().len(), 7);
    assert_eq!(fx.package().kind(), NodeKind::Package);
    assert_eq!(fx.package().childcount, 2);

    let siblings: Vec<usize> = fx
        .core(0)
        .children()
        .iter()
        .map(|&id| fx.tree().node(id).unwrap().first_cpu())
        .collect();
    assert_eq!(siblings, vec![0, 2]);
    assert_eq!(fx.core(1).first_cpu(), 1);

    let hw = HardwareInfo::detect(&SysfsRoot::new(fx.root()));
    assert_eq!(hw.online_cpus, 4);
    assert!(hw.cpu.is_intel());
    assert_eq!(hw.cpu.idle_driver.as_deref(), Some("intel_idle"));
}

#[test]
fn test_thread_deltas() {
    let mut fx = Fixture::new();
    fx.interval(typical_interval);

    let cpu0 = fx.thread(0);
    assert_eq!(cpu0.time_factor, 100_000.0);
    let c6 = cpu0.cstate("state3").unwrap();
    assert_eq!(c6.usage_delta, 5);
    assert_eq!(c6.duration_delta, 50_000);
    assert_eq!(c6.line_level, Row::Level(6));
    assert_eq!(cpu0.cstate("state1").unwrap().duration_delta, 0);
    assert_eq!(cpu0.cstate("state2").unwrap().line_level, Row::Level(2));
    assert!((cpu0.active_percent() - 50.0).abs() < 1e-9);

    let slow = cpu0.pstate(800_000_000).unwrap();
    assert_eq!(slow.time_delta, 50_000);
    assert!((slow.display_value - 50.0).abs() < 1e-9);
    assert_eq!(slow.human_name, "800 MHz");
    assert_eq!(cpu0.pstate(2_400_000_000).unwrap().human_name, "2.40 GHz");
    let turbo = cpu0.pstate(2_401_000_000).unwrap();
    assert_eq!(turbo.human_name, "Turbo Mode");
    assert_eq!(turbo.time_delta, 0);
}

#[test]
fn test_aggregation_into_cores_and_package() {
    let mut fx = Fixture::new();
    fx.interval(typical_interval);

    let core0 = fx.core(0);
    assert_eq!(core0.leaves(), 2);
    let c6 = core0.cstate("state3").unwrap();
    assert_eq!(c6.duration_delta, 50_000);
    assert!((core0.residency_percent(c6) - 25.0).abs() < 1e-9);
    assert_eq!(core0.cstate("state1").unwrap().duration_delta, 10_000);

    let core1 = fx.core(1);
    let c6 = core1.cstate("state3").unwrap();
    assert!((core1.residency_percent(c6) - 15.0).abs() < 1e-9);

    let package = fx.package();
    assert_eq!(package.leaves(), 4);
    let c6 = package.cstate("state3").unwrap();
    assert_eq!(c6.duration_delta, 80_000);
    assert_eq!(c6.usage_delta, 8);
    assert_eq!(c6.duration_after, c6.duration_before + c6.duration_delta);
    assert!((package.residency_percent(c6) - 20.0).abs() < 1e-9);

    let slow = package.pstate(800_000_000).unwrap();
    assert_eq!(slow.time_delta, 200_000);
    assert!((slow.display_value - 50.0).abs() < 1e-9);
    assert_eq!(package.max_frequency, 2_401_000_000);
}

#[test]
fn test_rendered_tables() {
    let mut fx = Fixture::new();
    fx.interval(typical_interval);

    let cstates = display_cpu_cstates(fx.tree(), &TableStyle::default());
    let header = cstates.lines().next().unwrap();
    let order: Vec<usize> = ["Package 0", "Core 0", "CPU 0", "CPU 2", "Core 1", "CPU 1", "CPU 3"]
        .iter()
        .map(|label| header.find(label).unwrap())
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]));

    let c6_line = cstates.lines().find(|l| l.contains("C6")).unwrap();
    assert!(c6_line.contains(" 20.0%   10.0 ms"));
    assert!(c6_line.contains(" 25.0%   10.0 ms"));
    assert!(cstates.lines().any(|l| l.contains("C0 active")));

    let pstates = display_cpu_pstates(fx.tree(), &TableStyle::default());
    assert!(pstates.contains("Turbo Mode"));
    let slow_line = pstates.lines().find(|l| l.contains("800 MHz")).unwrap();
    assert!(slow_line.contains(" 50.0%"));
}

#[test]
fn test_effective_frequency_from_residency() {
    let mut fx = Fixture::new();
    fx.interval(typical_interval);

    // every CPU runs 5/8 of its busy time at 800 MHz, 3/8 at 2.4 GHz
    for cpu in 0..4 {
        assert_eq!(fx.thread(cpu).effective_frequency, 1_400_000_000);
    }
    assert_eq!(fx.core(1).effective_frequency, 1_400_000_000);
    assert_eq!(fx.package().effective_frequency, 1_400_000_000);

    let pstates = display_cpu_pstates(fx.tree(), &TableStyle::default());
    let header = pstates.lines().next().unwrap();
    assert!(header.contains("avg 1400 MHz"), "{}", header);
}

#[test]
fn test_unchanged_interval_reads_zero() {
    let mut fx = Fixture::new();
    fx.interval(typical_interval);
    fx.interval(|_| {});

    for node in fx.tree().iter() {
        assert!(node.cstates.iter().all(|s| s.duration_delta == 0));
        assert!(node.pstates.iter().all(|s| s.time_delta == 0));
    }
    assert!((fx.package().active_percent() - 100.0).abs() < 1e-9);
}

#[test]
fn test_counter_regression_on_one_cpu() {
    let mut fx = Fixture::new();
    fx.interval(|root| {
        // CPU2's C6 counter went backwards, the rest moved normally
        write_idle(root, 2, "state3", "C6", 1001, 500);
        write_idle(root, 3, "state3", "C6", 1002, 21_000);
    });

    assert_eq!(fx.thread(2).cstate("state3").unwrap().duration_delta, 0);
    assert_eq!(fx.thread(3).cstate("state3").unwrap().duration_delta, 20_000);
    assert_eq!(fx.package().cstate("state3").unwrap().duration_delta, 20_000);
}

#[test]
fn test_offline_cpu_is_skipped() {
    let tmp = TempDir::new().unwrap();
    create_fixture(tmp.path());
    fs::write(tmp.path().join(format!("{}/cpu3/online", CPU_BASE)), "0\n").unwrap();
    fs::remove_dir_all(tmp.path().join(format!("{}/cpu3/cpuidle", CPU_BASE))).unwrap();

    let sysfs = SysfsRoot::new(tmp.path());
    let mut cycle = MeasurementCycle::new(enumerate(&sysfs).unwrap(), SysfsSampler::new(sysfs));
    assert!(cycle.tree().find_thread(3).is_none());

    let t0 = Instant::now();
    cycle.start(t0).unwrap();
    cycle.end(t0 + Duration::from_millis(10)).unwrap();
    cycle.process().unwrap();

    let core1 = cycle.tree().node(cycle.tree().find_thread(1).unwrap()).unwrap();
    let core1 = cycle.tree().node(core1.parent().unwrap()).unwrap();
    assert_eq!(core1.childcount, 1);
    let cstates = display_cpu_cstates(cycle.tree(), &TableStyle::default());
    assert!(!cstates.contains("Core 1"));
    assert!(cstates.contains("CPU 1"));
}

#[test]
fn test_config_file_drives_table_style() {
    let mut fx = Fixture::new();
    fx.interval(typical_interval);

    let path = fx.root().join("residency.toml");
    fs::write(&path, "[display]\nseparator = \"; \"\nline_start = \"# \"\n").unwrap();
    let config = config::load(Some(&path));

    let table = display_cpu_cstates(fx.tree(), &config.display.table_style());
    assert!(table.lines().all(|l| l.starts_with("# ")));
    assert!(table.contains("; "));
    assert!(!table.contains("| "));
}
