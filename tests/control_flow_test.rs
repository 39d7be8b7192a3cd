mod common;
use common::*;

#[test]
fn test_for_trip_count() {
    let built = run("VAR count = 0\nFOR i = 1 TO 10\n  count = count + 1\nNEXT i");
    assert_eq!(built.var("count"), 10.0);
}

#[test]
fn test_for_step_three() {
    // 1, 4, 7, 10
    let built = run("VAR count = 0\nFOR i = 1 TO 10 STEP 3\n  count = count + 1\nNEXT i");
    assert_eq!(built.var("count"), 4.0);
}

#[test]
fn test_for_zero_trips_when_start_past_end() {
    let built = run("VAR count = 0\nFOR i = 5 TO 1\n  count = count + 1\nNEXT i");
    assert_eq!(built.var("count"), 0.0);
}

#[test]
fn test_for_countdown() {
    let built = run("VAR count = 0\nFOR j = 10 TO 0 STEP -1\n  count = count + 1\nNEXT j");
    assert_eq!(built.var("count"), 11.0);
}

#[test]
fn test_for_runtime_step_sign() {
    // STEP comes from a variable, so the exit test must pick its
    // direction at run time
    let built = run(
        "VAR s = -2\nVAR count = 0\nFOR i = 10 TO 0 STEP s\n  count = count + 1\nNEXT i",
    );
    assert_eq!(built.var("count"), 6.0);
}

#[test]
fn test_exactly_one_if_arm_runs() {
    for (x, expected) in [(5.0, 1.0), (2.0, 2.0), (0.0, 3.0)] {
        let source = format!(
            "VAR x = {}\nVAR y = 0\nVAR arms = 0\n\
             IF x > 3 THEN\n  y = 1\n  arms = arms + 1\n\
             ELSEIF x > 1 THEN\n  y = 2\n  arms = arms + 1\n\
             ELSE\n  y = 3\n  arms = arms + 1\nENDIF",
            x
        );
        let built = run(&source);
        assert_eq!(built.var("y"), expected, "x = {}", x);
        assert_eq!(built.var("arms"), 1.0, "x = {}", x);
    }
}

#[test]
fn test_single_line_if() {
    let built = run("VAR x = 9\nIF x > 5 THEN x = 0");
    assert_eq!(built.var("x"), 0.0);
}

#[test]
fn test_while_pre_test() {
    let built = run("VAR n = 0\nWHILE n < 5\n  n = n + 1\nWEND");
    assert_eq!(built.var("n"), 5.0);
    // pre-test: a false condition skips the body entirely
    let built = run("VAR n = 9\nVAR ran = 0\nWHILE n < 5\n  ran = 1\nWEND");
    assert_eq!(built.var("ran"), 0.0);
}

#[test]
fn test_do_loop_post_test() {
    // post-test: the body runs once even though the condition already
    // holds
    let built = run("VAR n = 100\nVAR ran = 0\nDO\n  ran = ran + 1\nLOOP UNTIL n > 50");
    assert_eq!(built.var("ran"), 1.0);
    let built = run("VAR n = 0\nDO\n  n = n + 1\nLOOP WHILE n < 3");
    assert_eq!(built.var("n"), 3.0);
}

#[test]
fn test_break_and_continue() {
    let built = run(
        "VAR total = 0\nFOR i = 1 TO 10\n  IF i MOD 2 = 0 THEN CONTINUE\n  IF i > 7 THEN BREAK\n  total = total + i\nNEXT i",
    );
    // odd numbers up to 7: 1 + 3 + 5 + 7
    assert_eq!(built.var("total"), 16.0);
}

#[test]
fn test_select_case() {
    for (mode, expected) in [(0.0, 10.0), (1.0, 20.0), (2.0, 20.0), (9.0, 99.0)] {
        let source = format!(
            "VAR mode = {}\nVAR out = 0\nSELECT CASE mode\nCASE 0\n  out = 10\n\
             CASE 1, 2\n  out = 20\nDEFAULT\n  out = 99\nEND SELECT",
            mode
        );
        let built = run(&source);
        assert_eq!(built.var("out"), expected, "mode = {}", mode);
    }
}

#[test]
fn test_select_without_default_skips() {
    let built = run("VAR mode = 7\nVAR out = 1\nSELECT CASE mode\nCASE 0\n  out = 2\nEND SELECT");
    assert_eq!(built.var("out"), 1.0);
}

#[test]
fn test_goto_and_labels() {
    let built = run("VAR x = 0\nGOTO skip\nx = 99\nskip:\nx = x + 1");
    assert_eq!(built.var("x"), 1.0);
}

#[test]
fn test_ternary_expression() {
    let built = run("VAR a = 3\nVAR b = 7\nVAR hi = a > b ? a : b");
    assert_eq!(built.var("hi"), 7.0);
}

#[test]
fn test_compound_assignment_and_increment() {
    let built = run("VAR x = 10\nx += 5\nx *= 2\nx -= 6\nx /= 4\nx++\n--x\nx++");
    assert_eq!(built.var("x"), 7.0);
}
