use super::asm::AsmLine;
use super::codegen;
use super::link;
use super::srcmap::SourceMap;
use crate::lang::{parse, tokenize, Diagnostic, Error, Symbols};

/// The chip physically holds this many lines. Advisory: the compiler
/// reports overruns, the execution environment enforces them.
pub const LINE_LIMIT: usize = 128;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 0 keeps comments and annotations, 1+ strips comments and blank
    /// lines from the emitted text. Register reuse and dead-code
    /// elimination are extension points, not implemented here.
    pub optimization_level: u8,
    pub preserve_comments: bool,
    pub emit_debug_comments: bool,
    pub emit_source_line_comments: bool,
}

impl Default for CompileOptions {
    fn default() -> CompileOptions {
        CompileOptions {
            optimization_level: 0,
            preserve_comments: false,
            emit_debug_comments: false,
            emit_source_line_comments: false,
        }
    }
}

#[derive(Debug)]
pub struct Compilation {
    pub success: bool,
    pub code: Option<String>,
    pub line_count: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub source_map: Option<SourceMap>,
}

impl Compilation {
    fn failed(diagnostics: Vec<Diagnostic>, error: &Error) -> Compilation {
        let mut diagnostics = diagnostics;
        diagnostics.push(Diagnostic::from(error));
        Compilation {
            success: false,
            code: None,
            line_count: 0,
            diagnostics,
            source_map: None,
        }
    }
}

/// Source text in, assembly text plus source map and diagnostics out.
/// Pure: no state survives between calls, so concurrent compiles need
/// no coordination.
pub fn compile(source: &str, options: &CompileOptions) -> Compilation {
    let mut diagnostics = vec![];
    let tokens = match tokenize(source, options.preserve_comments) {
        Ok(tokens) => tokens,
        Err(e) => return Compilation::failed(diagnostics, &e),
    };
    let program = match parse(&tokens) {
        Ok(program) => program,
        Err(e) => return Compilation::failed(diagnostics, &e),
    };
    let symbols = match Symbols::collect(&program) {
        Ok(symbols) => symbols,
        Err(e) => return Compilation::failed(diagnostics, &e),
    };
    let assembly = match codegen::generate(&program, &symbols) {
        Ok(assembly) => assembly,
        Err(e) => return Compilation::failed(diagnostics, &e),
    };
    diagnostics.extend(assembly.warnings.iter().cloned());
    if let Err(e) = link::resolve(&assembly.lines, &assembly.source_lines) {
        return Compilation::failed(diagnostics, &e);
    }

    let mut lines: Vec<(AsmLine, Option<usize>)> = assembly
        .lines
        .into_iter()
        .zip(assembly.source_lines)
        .collect();
    if options.optimization_level >= 1 {
        lines.retain(|(line, _)| line.is_code());
    } else if options.emit_debug_comments {
        let mut header = vec![(AsmLine::Comment("registers".to_string()), None)];
        for (name, register) in &assembly.registers {
            header.push((AsmLine::Comment(format!("  {} -> {}", name, register)), None));
        }
        for (name, device) in &assembly.aliases {
            header.push((AsmLine::Comment(format!("  {} -> {}", name, device)), None));
        }
        header.append(&mut lines);
        lines = header;
    }

    let mut map = SourceMap::default();
    for (name, register) in &assembly.registers {
        map.record_register(name, register);
    }
    for (name, device) in &assembly.aliases {
        map.record_alias(name, device);
    }
    let annotate =
        options.emit_source_line_comments && options.optimization_level == 0;
    let mut text = String::new();
    for (index, (line, basic_line)) in lines.iter().enumerate() {
        let asm_line = index + 1;
        if line.is_code() {
            if let Some(basic_line) = basic_line {
                map.record_line(*basic_line, asm_line);
            }
        }
        text.push_str(&line.to_string());
        if annotate && matches!(line, AsmLine::Instr(_)) {
            if let Some(basic_line) = basic_line {
                text.push_str(&format!(" # line {}", basic_line));
            }
        }
        text.push('\n');
    }
    debug_assert!(map.is_consistent());

    let line_count = lines.iter().filter(|(line, _)| line.is_code()).count();
    if line_count > LINE_LIMIT {
        diagnostics.push(Diagnostic::warning(
            None,
            format!(
                "program is {} lines; the chip holds {}",
                line_count, LINE_LIMIT
            ),
        ));
    }
    log::debug!(
        "compiled {} source lines into {} assembly lines",
        source.lines().count(),
        line_count
    );
    Compilation {
        success: true,
        code: Some(text),
        line_count,
        diagnostics,
        source_map: Some(map),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Severity;

    fn compile_ok(source: &str) -> Compilation {
        let result = compile(source, &CompileOptions::default());
        assert!(result.success, "{:?}", result.diagnostics);
        result
    }

    #[test]
    fn test_store_then_read() {
        let result = compile_ok("VAR x = 5\nPRINT x");
        let code = result.code.unwrap();
        assert!(code.contains("move r0 5"));
        assert!(code.contains("s db Setting r0"));
    }

    #[test]
    fn test_undefined_goto_is_rejected() {
        let result = compile("GOTO nowhere", &CompileOptions::default());
        assert!(!result.success);
        assert!(result.code.is_none());
        assert!(result.diagnostics.iter().any(|d| d.severity == Severity::Error));
    }

    #[test]
    fn test_no_partial_output_on_parse_error() {
        let result = compile("WHILE 1\nYIELD", &CompileOptions::default());
        assert!(!result.success);
        assert!(result.code.is_none());
    }

    #[test]
    fn test_deterministic_allocation() {
        let source = "VAR a = 1\nVAR b = 2\nVAR c = a + b\nPRINT c";
        let first = compile_ok(source);
        let second = compile_ok(source);
        assert_eq!(first.code, second.code);
        let map = first.source_map.unwrap();
        assert_eq!(map.register_for("a"), Some("r0"));
        assert_eq!(map.register_for("b"), Some("r1"));
        assert_eq!(map.register_for("c"), Some("r2"));
    }

    #[test]
    fn test_source_map_consistency() {
        let result = compile_ok(
            "ALIAS sensor d0\nVAR t = sensor.Temperature\nIF t > 300 THEN\n  PRINT 1\nENDIF",
        );
        let map = result.source_map.unwrap();
        assert!(map.is_consistent());
        // the IF lowers to more than one assembly line
        assert!(!map.asm_lines_for(3).is_empty());
        assert_eq!(map.device_for("sensor"), Some("d0"));
    }

    #[test]
    fn test_line_limit_is_a_warning() {
        let mut source = String::new();
        for i in 0..130 {
            source.push_str(&format!("PRINT {}\n", i));
        }
        let result = compile(&source, &CompileOptions::default());
        assert!(result.success);
        assert!(result.line_count > LINE_LIMIT);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning));
    }

    #[test]
    fn test_optimization_strips_annotations() {
        let options = CompileOptions {
            optimization_level: 0,
            emit_debug_comments: true,
            emit_source_line_comments: true,
            ..CompileOptions::default()
        };
        let annotated = compile("VAR x = 1\nPRINT x", &options);
        assert!(annotated.code.unwrap().contains("# line 1"));
        let options = CompileOptions {
            optimization_level: 1,
            emit_debug_comments: true,
            ..CompileOptions::default()
        };
        let stripped = compile("VAR x = 1\nPRINT x", &options);
        assert!(!stripped.code.unwrap().contains('#'));
    }

    #[test]
    fn test_const_folds_to_literal() {
        let result = compile_ok("CONST LIMIT = 100\nVAR x = LIMIT + 1\nPRINT x");
        let code = result.code.unwrap();
        assert!(code.contains("move r0 101"));
        // the constant never takes a register
        assert!(result.source_map.unwrap().register_for("LIMIT").is_none());
    }
}
