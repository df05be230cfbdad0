// NETBENCH AFFINITY PLANNER TESTS
// choose_cpus POLICY ON SYNTHETIC TOPOLOGIES AND A FAKE SYSFS TREE
//
// ALL TOPOLOGIES ARE INJECTED. NOTHING DEPENDS ON THE HOST'S CPUS EXCEPT
// THE detect() SMOKE TEST.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use netbench::affinity::CpuTopology;

// TWO CORES, TWO THREADS EACH: {0,1} {2,3}
fn two_by_two() -> CpuTopology {
    CpuTopology::from_lookup(&[0, 1, 2, 3], |cpu| Some(if cpu < 2 { vec![0, 1] } else { vec![2, 3] }))
}

// EIGHT THREADS ON FOUR CORES, LINUX-STYLE NUMBERING: {0,4} {1,5} {2,6} {3,7}
fn four_by_two() -> CpuTopology {
    CpuTopology::from_lookup(&(0..8).collect::<Vec<_>>(), |cpu| Some(vec![cpu % 4, cpu % 4 + 4]))
}

// === REFERENCE CASES ===

#[test]
fn two_cpus_on_two_cores_skip_zero_first() {
    assert_eq!(two_by_two().choose_cpus(2, &[]), vec![2, 0]);
}

#[test]
fn four_cpus_on_two_cores_fill_zero_then_siblings() {
    assert_eq!(two_by_two().choose_cpus(4, &[]), vec![2, 0, 1, 3]);
}

#[test]
fn primaries_before_siblings() {
    let topo = four_by_two();
    assert_eq!(topo.choose_cpus(3, &[]), vec![1, 2, 3]);
    assert_eq!(topo.choose_cpus(4, &[]), vec![1, 2, 3, 0]);
    assert_eq!(topo.choose_cpus(6, &[]), vec![1, 2, 3, 0, 4, 5]);
}

#[test]
fn singleton_zero_taken_before_siblings() {
    // CPU 0 HAS NO SIBLING, SO IT IS TAKEN RIGHT AFTER THE OTHER PRIMARIES
    let topo = CpuTopology::from_lookup(&[0, 1, 2, 3, 4], |cpu| match cpu {
        0 => Some(vec![0]),
        1 | 2 => Some(vec![1, 2]),
        _ => Some(vec![3, 4]),
    });
    assert_eq!(topo.choose_cpus(3, &[]), vec![1, 3, 0]);
}

// === EXCLUSION ===

#[test]
fn excluded_ids_never_chosen() {
    let topo = four_by_two();
    let picked = topo.choose_cpus(8, &[1, 2]);
    assert!(!picked.contains(&1) && !picked.contains(&2));
    assert_eq!(picked.len(), 6);
}

#[test]
fn excluded_primary_keeps_its_core_for_siblings() {
    // 1 AND 2 BELONG TO ANOTHER ROLE: CPU 0 COMES BEFORE THEIR SIBLINGS 5 AND 6
    let topo = four_by_two();
    assert_eq!(topo.choose_cpus(2, &[1, 2]), vec![3, 0]);
    assert_eq!(topo.choose_cpus(4, &[1, 2]), vec![3, 0, 4, 5]);
}

#[test]
fn primary_outside_mask_is_not_replaced() {
    // CPU 2 IS NOT IN THE AFFINITY MASK, SO CORE {2,3} HAS NO PRIMARY TO OFFER
    let topo = CpuTopology::from_lookup(&[0, 1, 3], |cpu| Some(if cpu < 2 { vec![0, 1] } else { vec![2, 3] }));
    assert_eq!(topo.choose_cpus(1, &[]), vec![0]);
    assert_eq!(topo.choose_cpus(3, &[]), vec![0, 1, 3]);
    assert_eq!(topo.groups(), vec![vec![0, 1], vec![3]]);
    let cores = topo.cores();
    assert_eq!((cores[1].primary, cores[1].members.clone()), (2, vec![3]));
}

#[test]
fn everything_excluded_yields_empty() {
    assert!(two_by_two().choose_cpus(2, &[0, 1, 2, 3]).is_empty());
    assert!(two_by_two().choose_cpus(0, &[]).is_empty());
}

// === PROPERTIES ===

#[test]
fn length_uniqueness_and_membership_hold_for_every_n() {
    for topo in [two_by_two(), four_by_two(), CpuTopology::flat(&[0, 3, 5, 9])] {
        let avail: BTreeSet<u32> = topo.available().iter().copied().collect();
        for n in 0..=avail.len() + 2 {
            for exclude in [vec![], vec![0], vec![*avail.iter().last().unwrap()]] {
                let picked = topo.choose_cpus(n, &exclude);
                let unique: BTreeSet<u32> = picked.iter().copied().collect();
                assert_eq!(unique.len(), picked.len(), "duplicates in {:?}", picked);
                assert!(picked.len() <= n);
                assert!(picked.iter().all(|c| avail.contains(c) && !exclude.contains(c)));
                let usable = avail.iter().filter(|c| !exclude.contains(c)).count();
                assert_eq!(picked.len(), n.min(usable));
            }
        }
    }
}

#[test]
fn groups_partition_available() {
    let topo = four_by_two();
    let groups = topo.groups();
    let mut all: Vec<u32> = groups.iter().flatten().copied().collect();
    all.sort_unstable();
    assert_eq!(all, (0..8).collect::<Vec<_>>());
    assert!(groups.iter().all(|g| g[0] == *g.iter().min().unwrap()));
}

#[test]
fn flat_topology_is_ascending_with_zero_last() {
    assert_eq!(CpuTopology::flat(&[0, 1, 2, 3]).choose_cpus(4, &[]), vec![1, 2, 3, 0]);
}

// === SYSFS ===

fn write_siblings(root: &Path, cpu: u32, list: &str) {
    let dir = root.join(format!("cpu{}", cpu)).join("topology");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("thread_siblings_list"), format!("{}\n", list)).unwrap();
}

#[test]
fn sysfs_tree_drives_grouping() {
    let tmp = tempfile::tempdir().unwrap();
    write_siblings(tmp.path(), 0, "0-1");
    write_siblings(tmp.path(), 1, "0-1");
    write_siblings(tmp.path(), 2, "2,3");
    write_siblings(tmp.path(), 3, "2,3");
    let topo = CpuTopology::from_sysfs(tmp.path(), &[0, 1, 2, 3]);
    assert_eq!(topo.groups(), vec![vec![0, 1], vec![2, 3]]);
    assert_eq!(topo.choose_cpus(2, &[]), vec![2, 0]);
}

#[test]
fn unreadable_sysfs_entry_degrades_to_singleton() {
    let tmp = tempfile::tempdir().unwrap();
    write_siblings(tmp.path(), 0, "0,2");
    write_siblings(tmp.path(), 2, "0,2");
    write_siblings(tmp.path(), 3, "garbage");
    // CPU 1 HAS NO ENTRY AT ALL
    let topo = CpuTopology::from_sysfs(tmp.path(), &[0, 1, 2, 3]);
    assert_eq!(topo.groups(), vec![vec![0, 2], vec![1], vec![3]]);
}

#[test]
fn detect_sees_at_least_one_cpu() {
    let topo = CpuTopology::detect();
    assert!(!topo.available().is_empty());
    assert_eq!(topo.choose_cpus(1, &[]).len(), 1);
}
