// NETBENCH CPU AFFINITY PLANNER
// PARTITIONS PHYSICAL CORES BETWEEN BENCHMARK ROLES.
//
// POLICY (DETERMINISTIC):
//   1. ONE HARDWARE THREAD PER PHYSICAL CORE FIRST, ASCENDING BY PRIMARY
//   2. CPU 0 IS DEFERRED: IT TAKES INTERRUPTS AND KERNEL HOUSEKEEPING
//   3. CPU 0 BEFORE ANY SMT SIBLING
//   4. SMT SIBLINGS LAST, INCLUDING THOSE OF CORES ANOTHER ROLE ALREADY LEADS
//
// TOPOLOGY COMES FROM SYSFS. A CPU WHOSE SIBLING LIST CANNOT BE READ IS
// TREATED AS ITS OWN CORE. NOTHING HERE RETURNS AN ERROR.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

pub const SYSFS_CPU: &str = "/sys/devices/system/cpu";

// PARSE LINUX CPULIST SYNTAX ("0-3,8,10-11"). None ON ANY MALFORMED PART.
pub fn parse_cpu_list(spec: &str) -> Option<Vec<u32>> {
    let mut out = Vec::new();
    for range in spec.trim().split(',') {
        let range = range.trim();
        if range.is_empty() {
            continue;
        }
        let parts: Vec<&str> = range.split('-').collect();
        match parts.len() {
            1 => out.push(parts[0].trim().parse::<u32>().ok()?),
            2 => {
                let lo = parts[0].trim().parse::<u32>().ok()?;
                let hi = parts[1].trim().parse::<u32>().ok()?;
                if lo <= hi {
                    out.extend(lo..=hi);
                } else {
                    out.extend((hi..=lo).rev());
                }
            }
            _ => return None,
        }
    }
    Some(out)
}

// "2,4,6": THE PIN-LIST FORMAT PASSED TO RECEIVER/CLIENT BINARIES
pub fn format_cpu_list(cpus: &[u32]) -> String {
    cpus.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// CPUS THE CURRENT PROCESS MAY RUN ON. FALLS BACK TO 0..N IF THE MASK IS UNREADABLE.
pub fn available_cpus() -> Vec<u32> {
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) };
    if rc == 0 {
        let cpus: Vec<u32> = (0..libc::CPU_SETSIZE as usize)
            .filter(|&c| unsafe { libc::CPU_ISSET(c, &set) })
            .map(|c| c as u32)
            .collect();
        if !cpus.is_empty() {
            return cpus;
        }
    }
    let n = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (0..n as u32).collect()
}

fn read_thread_siblings(root: &Path, cpu: u32) -> Option<Vec<u32>> {
    let path = root
        .join(format!("cpu{}", cpu))
        .join("topology")
        .join("thread_siblings_list");
    let raw = fs::read_to_string(path).ok()?;
    parse_cpu_list(&raw).filter(|v| !v.is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuTopology {
    available: Vec<u32>,
    // FULL (UNFILTERED) SIBLING LIST PER CPU, ONLY WHERE THE LOOKUP SUCCEEDED
    siblings: BTreeMap<u32, Vec<u32>>,
}

impl CpuTopology {
    pub fn detect() -> Self {
        Self::from_sysfs(Path::new(SYSFS_CPU), &available_cpus())
    }

    pub fn from_sysfs(root: &Path, available: &[u32]) -> Self {
        Self::from_lookup(available, |cpu| read_thread_siblings(root, cpu))
    }

    pub fn from_lookup(available: &[u32], lookup: impl Fn(u32) -> Option<Vec<u32>>) -> Self {
        let available: Vec<u32> = available
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let siblings = available
            .iter()
            .filter_map(|&cpu| lookup(cpu).map(|s| (cpu, s)))
            .collect();
        Self { available, siblings }
    }

    // NO TOPOLOGY DATA AT ALL: EVERY CPU IS ITS OWN CORE
    pub fn flat(available: &[u32]) -> Self {
        Self::from_lookup(available, |_| None)
    }

    pub fn available(&self) -> &[u32] {
        &self.available
    }

    // CORES OVER `avail`, SORTED BY PRIMARY. THE PRIMARY IS THE LOWEST ID IN THE
    // FULL SIBLING LIST, AVAILABLE OR NOT. MEMBERS PARTITION `avail`: AN ID
    // CLAIMED BY AN EARLIER CORE IS NEVER REPEATED.
    fn cores_within(&self, avail: &BTreeSet<u32>) -> Vec<Core> {
        let mut seen = BTreeSet::new();
        let mut by_primary: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for &cpu in avail {
            if seen.contains(&cpu) {
                continue;
            }
            let full = self.siblings.get(&cpu).map(Vec::as_slice).unwrap_or(&[]);
            let primary = full.iter().copied().chain([cpu]).min().unwrap_or(cpu);
            let members = by_primary.entry(primary).or_default();
            for c in full.iter().copied().chain([cpu]) {
                if avail.contains(&c) && seen.insert(c) {
                    members.push(c);
                }
            }
            members.sort_unstable();
        }
        by_primary
            .into_iter()
            .map(|(primary, members)| Core { primary, members })
            .collect()
    }

    pub fn cores(&self) -> Vec<Core> {
        self.cores_within(&self.available.iter().copied().collect())
    }

    // AVAILABLE MEMBERS OF EACH CORE, LOWEST ID FIRST
    pub fn groups(&self) -> Vec<Vec<u32>> {
        self.cores().into_iter().map(|core| core.members).collect()
    }

    pub fn choose_cpus(&self, n: usize, exclude: &[u32]) -> Vec<u32> {
        let avail: BTreeSet<u32> = self
            .available
            .iter()
            .copied()
            .filter(|c| !exclude.contains(c))
            .collect();
        if n == 0 || avail.is_empty() {
            return Vec::new();
        }
        let cores = self.cores_within(&avail);
        let mut order: Vec<u32> = Vec::with_capacity(n);

        // PASS 1: PRIMARIES OF EVERY CORE EXCEPT CPU 0'S. A CORE WHOSE PRIMARY
        // IS TAKEN OR OFFLINE CONTRIBUTES NOTHING HERE
        for core in &cores {
            if order.len() >= n {
                break;
            }
            if core.primary != 0 && avail.contains(&core.primary) {
                order.push(core.primary);
            }
        }

        // PASS 2: CPU 0 BEFORE DOUBLING UP ON ANY CORE
        if order.len() < n && avail.contains(&0) {
            order.push(0);
        }

        // PASS 3: EVERY OTHER AVAILABLE THREAD, CORE BY CORE
        'cores: for core in &cores {
            for &cpu in &core.members {
                if order.len() >= n {
                    break 'cores;
                }
                if cpu != core.primary && !order.contains(&cpu) {
                    order.push(cpu);
                }
            }
        }

        order.truncate(n);
        order
    }
}

/// One physical core. `primary` may be absent from `members` when it lies
/// outside the affinity mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Core {
    pub primary: u32,
    pub members: Vec<u32>,
}
