mod common;
use basicten::mach::{compile, CompileOptions, Device, DeviceSel, LINE_LIMIT};
use common::*;

/// The thermostat-with-hysteresis program from the manual, end to end:
/// compile, load, attach devices, run a few ticks.
#[test]
fn test_thermostat_program() {
    let source = "\
ALIAS sensor d0
ALIAS heater d1

CONST TARGET = 293
CONST TOLERANCE = 2

main:
    VAR temp = sensor.Temperature

    IF temp < TARGET - TOLERANCE THEN
        heater.On = 1
    ELSEIF temp > TARGET + TOLERANCE THEN
        heater.On = 0
    ENDIF

    YIELD
    GOTO main
END
";
    let result = compile(source, &CompileOptions::default());
    assert!(result.success, "{:?}", result.diagnostics);
    assert!(result.line_count <= LINE_LIMIT);

    let mut built = build(source);
    built.machine.install(
        0,
        Device::new("StructureGasSensor").with_property("Temperature", 280.0),
    );
    built.machine.install(1, Device::new("StructureWallHeater"));

    built.machine.run(1_000);
    assert_eq!(
        built
            .machine
            .get_device_property(&DeviceSel::Pin(1), "On", None),
        1.0,
        "cold room turns the heater on"
    );

    built
        .machine
        .set_device_property(&DeviceSel::Pin(0), "Temperature", None, 300.0);
    built.machine.run(1_000);
    assert_eq!(
        built
            .machine
            .get_device_property(&DeviceSel::Pin(1), "On", None),
        0.0,
        "hot room turns the heater off"
    );

    // inside the dead band nothing changes
    built
        .machine
        .set_device_property(&DeviceSel::Pin(0), "Temperature", None, 293.0);
    built.machine.run(1_000);
    assert_eq!(
        built
            .machine
            .get_device_property(&DeviceSel::Pin(1), "On", None),
        0.0
    );
}

#[test]
fn test_counter_with_edge_detect() {
    let source = "\
ALIAS display d0
ALIAS button d1

VAR count = 0
VAR lastBtn = 0

main:
    VAR btn = button.Setting

    IF btn = 1 AND lastBtn = 0 THEN
        count += 1
    ENDIF

    lastBtn = btn
    display.Setting = count

    YIELD
    GOTO main
END
";
    let mut built = build(source);
    built.machine.install(0, Device::new("StructureConsole"));
    built.machine.install(1, Device::new("StructureButton"));

    let press = |built: &mut Built, setting: f64| {
        built
            .machine
            .set_device_property(&DeviceSel::Pin(1), "Setting", None, setting);
        built.machine.run(1_000);
    };
    press(&mut built, 1.0);
    press(&mut built, 1.0); // held, not a new press
    press(&mut built, 0.0);
    press(&mut built, 1.0);
    assert_eq!(built.var("count"), 2.0);
    assert_eq!(
        built
            .machine
            .get_device_property(&DeviceSel::Pin(0), "Setting", None),
        2.0
    );
}

#[test]
fn test_source_map_covers_every_code_line() {
    let built = build(
        "ALIAS sensor d0\nVAR t = sensor.Temperature\nIF t > 300 THEN\n  PRINT 1\nENDIF\nYIELD",
    );
    for (index, line) in built.code.lines().enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        assert!(
            built.map.basic_line_for(index + 1).is_some(),
            "unmapped assembly line {}: {}",
            index + 1,
            line
        );
    }
}

#[test]
fn test_debug_comment_mode() {
    let options = CompileOptions {
        emit_debug_comments: true,
        ..CompileOptions::default()
    };
    let result = compile("ALIAS sensor d0\nVAR t = sensor.Temperature", &options);
    let code = result.code.unwrap();
    assert!(code.contains("# registers"));
    assert!(code.contains("t -> r0"));
    assert!(code.contains("sensor -> d0"));
}

#[test]
fn test_register_pressure_warns_but_compiles() {
    let mut source = String::new();
    for i in 0..20 {
        source.push_str(&format!("VAR v{} = {}\n", i, i));
    }
    let result = compile(&source, &CompileOptions::default());
    assert!(result.success);
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.message.contains("register pressure")));
}

#[test]
fn test_meta_directive_survives_preserve_comments() {
    let tokens = basicten::lang::tokenize("#Meta: name Thermostat\nVAR x = 1\n", true).unwrap();
    let comment = tokens
        .iter()
        .find_map(|t| match &t.kind {
            basicten::lang::token::TokenKind::Comment(text) => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert!(comment.starts_with("Meta:"));
}
