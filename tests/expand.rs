// NETBENCH SCENARIO EXPANSION TESTS
// SWEEP ORDER, LINKAGES, EXPRESSION GRAMMAR, OVERRIDE LAYERS
//
// ALL TESTS USE PURE-RUST TYPES FROM netbench. NO PROCESSES SPAWNED.

use netbench::config::{self, Overrides};
use netbench::expr::evaluate;
use netbench::params::{ParameterSet, Value};
use netbench::scenario::{Linkage, Mode, Scenario};
use netbench::Error;

fn workers_sweep() -> Scenario {
    Scenario::new("threads", "workers")
        .values([1.0, 2.0, 4.0])
        .implementations(["a", "b"])
        .link("senders", Linkage::formula("workers").unwrap())
}

// === EXPANSION ORDER ===

#[test]
fn six_runs_impl_outer_value_inner() {
    let plans = workers_sweep().expand().unwrap();
    let got: Vec<(&str, f64)> = plans
        .iter()
        .map(|p| (p.implementation.as_str(), p.value))
        .collect();
    assert_eq!(
        got,
        vec![("a", 1.0), ("a", 2.0), ("a", 4.0), ("b", 1.0), ("b", 2.0), ("b", 4.0)]
    );
    for p in &plans {
        assert_eq!(p.params.int("workers").unwrap(), p.value as i64);
        assert_eq!(p.params.int("senders").unwrap(), p.params.int("workers").unwrap());
    }
}

#[test]
fn typed_function_linkage_matches_formula() {
    fn same(p: &ParameterSet) -> f64 {
        p.number("workers").unwrap_or(0.0)
    }
    let sc = workers_sweep().link("senders", Linkage::func("same", same));
    for p in sc.expand().unwrap() {
        assert_eq!(p.params.int("senders").unwrap(), p.value as i64);
    }
}

#[test]
fn linkages_see_snapshot_not_each_other() {
    // conns READS senders FROM THE SNAPSHOT (DEFAULT 1), NOT THE DERIVED VALUE
    let sc = workers_sweep()
        .link("senders", Linkage::formula("workers * 10").unwrap())
        .link("conns", Linkage::formula("senders + 1").unwrap());
    let plans = sc.expand().unwrap();
    assert_eq!(plans[2].params.int("senders").unwrap(), 40);
    assert_eq!(plans[2].params.int("conns").unwrap(), 2);
}

#[test]
fn base_is_never_mutated() {
    let sc = workers_sweep();
    sc.expand().unwrap();
    assert_eq!(sc.fixed().int("workers").unwrap(), 1);
    assert_eq!(sc.fixed().int("senders").unwrap(), 1);
}

#[test]
fn linkage_results_are_coerced() {
    let sc = Scenario::new("s", "msg_size")
        .values([3.0])
        .implementations(["bsd"])
        .link("busy_spin", Linkage::formula("msg_size / 4").unwrap())
        .link("buffer_size", Linkage::formula("msg_size * 2.5").unwrap());
    let p = &sc.expand().unwrap()[0].params;
    // 0.75 ROUNDS TO 1 -> TRUE; 7.5 ROUNDS HALF TO EVEN -> 8
    assert!(p.flag("busy_spin").unwrap());
    assert_eq!(p.int("buffer_size").unwrap(), 8);
}

// === VALIDATION ===

#[test]
fn unknown_linkage_target_fails() {
    let sc = workers_sweep().link("not_a_field", Linkage::formula("1").unwrap());
    assert!(matches!(sc.expand(), Err(Error::UnknownField(f)) if f == "not_a_field"));
}

#[test]
fn unknown_var_key_fails() {
    let sc = Scenario::new("s", "nope").values([1.0]).implementations(["bsd"]);
    assert!(matches!(sc.expand(), Err(Error::UnknownField(_))));
}

#[test]
fn empty_sweep_or_impls_fail() {
    let no_values = Scenario::new("s", "workers").implementations(["bsd"]);
    assert!(matches!(no_values.expand(), Err(Error::InvalidScenario { .. })));
    let no_impls = Scenario::new("s", "workers").values([1.0]);
    assert!(matches!(no_impls.expand(), Err(Error::InvalidScenario { .. })));
}

#[test]
fn formula_referencing_unknown_name_fails_at_expansion() {
    let sc = workers_sweep().link("senders", Linkage::formula("threads * 2").unwrap());
    assert!(matches!(sc.expand(), Err(Error::InvalidExpression { .. })));
}

// === EXPRESSION GRAMMAR ===

#[test]
fn evaluator_accepts_arithmetic_and_allowed_calls() {
    let ctx = ParameterSet::default();
    let eval = |e: &str| evaluate(e, &ctx, "workers", 4.0).unwrap();
    assert_eq!(eval("workers * 2 + 1"), 9.0);
    assert_eq!(eval("min(workers, 3) + max(1, 2)"), 5.0);
    assert_eq!(eval("7 // 2"), 3.0);
    assert_eq!(eval("-7 % 3"), 2.0);
    assert_eq!(eval("2 ** 3 ** 2"), 512.0);
    assert_eq!(eval("-2 ** 2"), -4.0);
    assert_eq!(eval("round(2.5) + floor(1.7) + ceil(1.2) + abs(-1)"), 6.0);
    // BOOLEANS ARE 0/1, STRINGS ARE NOT VISIBLE
    assert_eq!(eval("drain + busy_spin"), 0.0);
}

#[test]
fn evaluator_rejects_everything_else() {
    let ctx = ParameterSet::default();
    for bad in [
        "workers > 2",
        "open('x')",
        "workers.real",
        "'abc'",
        "address",
        "unknown_name",
        "1 / 0",
        "import os",
        "lambda: 1",
        "",
    ] {
        assert!(
            matches!(evaluate(bad, &ctx, "workers", 1.0), Err(Error::InvalidExpression { .. })),
            "accepted: {:?}",
            bad
        );
    }
}

// === OVERRIDES AND BUILT-INS ===

#[test]
fn builtin_threads_scenario_links_senders() {
    let scenarios = config::default_scenarios().unwrap();
    let threads = scenarios
        .iter()
        .find(|s| s.var_key() == "workers")
        .unwrap();
    assert_eq!(threads.run_mode(), Mode::ReceiverClient);
    for p in threads.expand().unwrap() {
        assert_eq!(p.params.int("senders").unwrap(), p.value as i64);
    }
    let pingpong = scenarios.iter().find(|s| s.run_mode() == Mode::Pingpong).unwrap();
    for p in pingpong.expand().unwrap() {
        assert!(p.params.int("buffer_size").unwrap() >= p.params.int("msg_size").unwrap());
    }
}

#[test]
fn override_layers_produce_new_scenarios() {
    let base = vec![workers_sweep()];
    let applied = Overrides::default()
        .global("duration_sec", "3")
        .scoped("threads", "duration_sec", "5")
        .scoped("other", "duration_sec", "7")
        .global("nodelay", "yes")
        .values("threads", vec![8.0])
        .apply(&base)
        .unwrap();
    let sc = &applied[0];
    assert_eq!(sc.fixed().int("duration_sec").unwrap(), 5);
    assert!(sc.fixed().flag("nodelay").unwrap());
    assert_eq!(sc.var_values(), &[8.0]);
    // ORIGINAL UNTOUCHED
    assert_eq!(base[0].fixed().int("duration_sec").unwrap(), 10);
    assert_eq!(base[0].var_values(), &[1.0, 2.0, 4.0]);
}

#[test]
fn override_with_bad_value_fails() {
    let err = Overrides::default()
        .global("workers", "lots")
        .apply(&[workers_sweep()])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidValue { .. }));
}

#[test]
fn explicit_pins_survive_expansion() {
    let mut base = ParameterSet::default();
    base.set("worker_cpus", Value::OptStr(Some("2,3".into()))).unwrap();
    let sc = workers_sweep().base(base);
    for p in sc.expand().unwrap() {
        assert_eq!(p.params.opt_str("worker_cpus").unwrap(), Some("2,3"));
    }
}
