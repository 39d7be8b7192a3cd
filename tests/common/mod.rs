use basicten::mach::{compile, CompileOptions, Machine, SourceMap};

pub struct Built {
    pub code: String,
    pub map: SourceMap,
    pub machine: Machine,
}

/// Compile or panic with the diagnostics, load into a fresh machine.
pub fn build(source: &str) -> Built {
    let result = compile(source, &CompileOptions::default());
    assert!(result.success, "compile failed: {:?}", result.diagnostics);
    let code = result.code.unwrap();
    let mut machine = Machine::new();
    let snapshot = machine.load(&code);
    assert!(
        !snapshot.halted,
        "load failed: {:?}\n{}",
        snapshot.error_message, code
    );
    Built {
        code,
        map: result.source_map.unwrap(),
        machine,
    }
}

/// Build and run to completion (or the budget), then return the rig.
pub fn run(source: &str) -> Built {
    let mut built = build(source);
    built.machine.run(10_000);
    assert!(
        built.machine.error().is_none(),
        "runtime fault: {:?}\n{}",
        built.machine.error(),
        built.code
    );
    built
}

impl Built {
    /// Read a BASIC variable's value through the source map.
    pub fn var(&self, name: &str) -> f64 {
        let register = self
            .map
            .register_for(name)
            .unwrap_or_else(|| panic!("no register for {}", name));
        self.machine.register(register).unwrap()
    }
}
