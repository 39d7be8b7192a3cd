mod common;
use basicten::mach::DeviceSel;
use common::*;

#[test]
fn test_breakpoint_on_source_line() {
    let mut built = build("VAR x = 5\nVAR y = 6\nVAR z = 7");
    // break where line 2's code begins
    let asm_line = built.map.asm_lines_for(2)[0];
    built.machine.add_breakpoint(asm_line);
    let snapshot = built.machine.run(100);
    assert!(snapshot.paused);
    assert_eq!(built.var("x"), 5.0);
    // y's store has not run yet
    assert_eq!(built.var("y"), 0.0);
    // the paused pc maps back to the source line for the UI
    assert_eq!(built.map.basic_line_for(snapshot.pc), Some(2));
    built.machine.run(100);
    assert_eq!(built.var("y"), 6.0);
    assert_eq!(built.var("z"), 7.0);
}

#[test]
fn test_yield_loop_advances_one_tick_per_run() {
    let mut built = build("VAR n = 0\nmain:\nn = n + 1\nYIELD\nGOTO main");
    for tick in 1..=3 {
        let snapshot = built.machine.run(1_000);
        assert!(snapshot.yielding);
        assert_eq!(built.var("n"), tick as f64);
    }
}

#[test]
fn test_stack_statements() {
    let built = run("PUSH 10\nPUSH 20\nVAR top = 0\nPEEK top\nVAR b = 0\nPOP b\nVAR a = 0\nPOP a");
    assert_eq!(built.var("top"), 20.0);
    assert_eq!(built.var("b"), 20.0);
    assert_eq!(built.var("a"), 10.0);
}

#[test]
fn test_print_writes_housing_setting() {
    let mut built = build("VAR x = 5\nPRINT x");
    built.machine.run(100);
    assert_eq!(
        built
            .machine
            .get_device_property(&DeviceSel::Housing, "Setting", None),
        5.0
    );
}

#[test]
fn test_sleep_surfaces_duration() {
    let mut built = build("SLEEP 0.5\nVAR x = 1");
    let snapshot = built.machine.run(100);
    assert_eq!(snapshot.sleeping, Some(0.5));
    assert_eq!(built.var("x"), 0.0);
    built.machine.run(100);
    assert_eq!(built.var("x"), 1.0);
}

#[test]
fn test_end_halts_cleanly() {
    let mut built = build("VAR x = 1\nEND\nx = 2");
    let snapshot = built.machine.run(100);
    assert!(snapshot.halted);
    assert!(snapshot.error_message.is_none());
    assert_eq!(built.var("x"), 1.0);
}

#[test]
fn test_arrays_round_trip_through_stack() {
    let built = run(
        "DIM values(10)\nFOR i = 0 TO 9\n  values(i) = i * i\nNEXT i\n\
         VAR probe = values(7)\nvalues(3) += 1\nVAR bumped = values(3)",
    );
    assert_eq!(built.var("probe"), 49.0);
    assert_eq!(built.var("bumped"), 10.0);
}

#[test]
fn test_array_oob_faults_at_runtime() {
    let mut built = build("DIM values(4)\nVAR i = 600\nvalues(i) = 1");
    let snapshot = built.machine.run(100);
    assert!(snapshot.halted);
    assert!(snapshot
        .error_message
        .unwrap()
        .contains("STACK INDEX OUT OF RANGE"));
}

#[test]
fn test_math_builtins() {
    let built = run(
        "VAR a = ABS(-5)\nVAR b = SQRT(16)\nVAR c = MIN(5, 3)\nVAR d = MAX(5, 3)\n\
         VAR e = FLOOR(3.8)\nVAR f = CEIL(3.2)\nVAR g = ROUND(3.5)\nVAR h = TRUNC(3.9)\n\
         VAR i = SGN(-7)\nVAR j = 2 ^ 3",
    );
    assert_eq!(built.var("a"), 5.0);
    assert_eq!(built.var("b"), 4.0);
    assert_eq!(built.var("c"), 3.0);
    assert_eq!(built.var("d"), 5.0);
    assert_eq!(built.var("e"), 3.0);
    assert_eq!(built.var("f"), 4.0);
    assert_eq!(built.var("g"), 4.0);
    assert_eq!(built.var("h"), 3.0);
    assert_eq!(built.var("i"), -1.0);
    assert!((built.var("j") - 8.0).abs() < 1e-9);
}

#[test]
fn test_bitwise_operators() {
    let built = run(
        "VAR a = 1 << 4\nVAR b = 16 >> 2\nVAR c = 5 & 3\nVAR d = 5 | 2\n\
         VAR e = BXOR(5, 3)\nVAR f = ~0",
    );
    assert_eq!(built.var("a"), 16.0);
    assert_eq!(built.var("b"), 4.0);
    assert_eq!(built.var("c"), 1.0);
    assert_eq!(built.var("d"), 7.0);
    assert_eq!(built.var("e"), 6.0);
    assert_eq!(built.var("f"), -1.0);
}

#[test]
fn test_division_by_zero_propagates() {
    let mut built = build("VAR x = 1\nVAR y = x / 0");
    let snapshot = built.machine.run(100);
    // no trap: the simulator mirrors the chip's IEEE behavior
    assert!(snapshot.error_message.is_none());
    assert!(built.var("y").is_infinite());
}
