mod common;
use common::*;

#[test]
fn test_gosub_and_return() {
    let built = run(
        "VAR t = 0\nGOSUB add5\nGOSUB add5\nEND\nadd5:\nt = t + 5\nRETURN",
    );
    assert_eq!(built.var("t"), 10.0);
}

#[test]
fn test_sub_and_call() {
    let built = run(
        "VAR hits = 0\nCALL Bump\nCALL Bump\nCALL Bump\n\
         SUB Bump\n  hits = hits + 1\nEND SUB",
    );
    assert_eq!(built.var("hits"), 3.0);
}

#[test]
fn test_function_with_arguments_and_return() {
    let built = run(
        "FUNCTION Clamp(v, lo, hi)\n  IF v < lo THEN RETURN lo\n  IF v > hi THEN RETURN hi\n  RETURN v\nEND FUNCTION\n\
         VAR a = Clamp(150, 0, 100)\nVAR b = Clamp(-5, 0, 100)\nVAR c = Clamp(42, 0, 100)",
    );
    assert_eq!(built.var("a"), 100.0);
    assert_eq!(built.var("b"), 0.0);
    assert_eq!(built.var("c"), 42.0);
}

#[test]
fn test_nested_function_calls_preserve_return_address() {
    let built = run(
        "FUNCTION Double(x)\n  RETURN x * 2\nEND FUNCTION\n\
         FUNCTION Quad(x)\n  RETURN Double(Double(x))\nEND FUNCTION\n\
         VAR out = Quad(3)",
    );
    assert_eq!(built.var("out"), 12.0);
}

#[test]
fn test_function_call_in_expression() {
    let built = run(
        "FUNCTION Half(x)\n  RETURN x / 2\nEND FUNCTION\nVAR y = Half(10) + Half(4)",
    );
    assert_eq!(built.var("y"), 7.0);
}

#[test]
fn test_subroutines_do_not_run_unless_called() {
    let built = run("VAR x = 1\nSUB Never\n  x = 99\nEND SUB");
    assert_eq!(built.var("x"), 1.0);
}
