mod common;
use basicten::mach::asm::{self, AsmLine, Instr};
use basicten::mach::{compile, CompileOptions};
use common::*;

/// Branch/jump instruction counts are the control-flow shape the
/// decompiler must preserve through a recompile. Register numbering is
/// allowed to differ.
fn shape(code: &str) -> (usize, usize, usize) {
    let lines = asm::parse(code).unwrap();
    let mut branches = 0;
    let mut jumps = 0;
    let mut calls = 0;
    for line in &lines {
        match line {
            AsmLine::Instr(Instr::Branch(..)) | AsmLine::Instr(Instr::BranchZero(..)) => {
                branches += 1
            }
            AsmLine::Instr(Instr::Jump(..)) => jumps += 1,
            AsmLine::Instr(Instr::JumpAndLink(..)) => calls += 1,
            _ => {}
        }
    }
    (branches, jumps, calls)
}

fn recompiled_shape(source: &str) {
    let first = compile(source, &CompileOptions::default());
    assert!(first.success, "{:?}", first.diagnostics);
    let first_code = first.code.unwrap();

    let basic = basicten::mach::decompile_text(&first_code).unwrap();
    let second = compile(&basic, &CompileOptions::default());
    assert!(
        second.success,
        "recompile failed: {:?}\n--- decompiled ---\n{}",
        second.diagnostics, basic
    );
    let second_code = second.code.unwrap();
    assert_eq!(
        shape(&first_code),
        shape(&second_code),
        "--- first ---\n{}\n--- decompiled ---\n{}\n--- second ---\n{}",
        first_code,
        basic,
        second_code
    );
}

#[test]
fn test_branch_shape_survives_if_chain() {
    recompiled_shape(
        "ALIAS sensor d0\nALIAS heater d1\nVAR t = sensor.Temperature\n\
         IF t < 290 THEN\n  heater.On = 1\nELSEIF t > 300 THEN\n  heater.On = 0\nENDIF",
    );
}

#[test]
fn test_branch_shape_survives_loops() {
    recompiled_shape(
        "VAR total = 0\nFOR i = 1 TO 5\n  total = total + i\nNEXT i\n\
         WHILE total > 0\n  total = total - 2\nWEND",
    );
}

#[test]
fn test_shape_survives_main_loop_program() {
    recompiled_shape(
        "ALIAS panel d0\nmain:\nVAR angle = panel.SolarAngle\npanel.Horizontal = angle\n\
         YIELD\nGOTO main",
    );
}

#[test]
fn test_decompiled_output_executes_equivalently() {
    let source = "VAR n = 0\nVAR total = 0\nWHILE n < 10\n  n = n + 1\n  total = total + n\nWEND";
    let built = run(source);
    assert_eq!(built.var("total"), 55.0);

    let basic = basicten::mach::decompile_text(&built.code).unwrap();
    let second = run(&basic);
    // same registers end with the same values even if names changed
    assert_eq!(second.machine.register("r1"), Some(55.0));
}
