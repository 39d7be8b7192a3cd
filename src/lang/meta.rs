use super::ast::*;
use super::Error;
use std::collections::HashMap;

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SymbolKind {
    Variable,
    Constant,
    Alias,
    Array(usize),
    Parameter,
    LoopVariable,
    Label,
    Function(usize),
    Sub,
}

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
    pub used: bool,
}

/// Flat symbol table collected from the AST in one walk. The chip has a
/// single namespace, so parameters and locals share it with globals.
/// Consumed by the generator for register assignment and by the
/// unused-symbol analyzer upstream.
#[derive(Debug, Default)]
pub struct Symbols {
    entries: Vec<SymbolEntry>,
    index: HashMap<String, usize>,
    deferred: Vec<String>,
}

impl Symbols {
    pub fn collect(program: &Program) -> Result<Symbols> {
        let mut symbols = Symbols::default();
        symbols.statements(&program.statements)?;
        // references can precede declarations (forward GOTO), so used
        // flags for names unseen at reference time settle here
        for name in std::mem::take(&mut symbols.deferred) {
            if let Some(&i) = symbols.index.get(&name) {
                symbols.entries[i].used = true;
            }
        }
        Ok(symbols)
    }

    pub fn get(&self, name: &str) -> Option<&SymbolEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    pub fn is_array(&self, name: &str) -> bool {
        matches!(self.get(name), Some(entry) if matches!(entry.kind, SymbolKind::Array(_)))
    }

    pub fn is_label(&self, name: &str) -> bool {
        matches!(self.get(name), Some(entry) if entry.kind == SymbolKind::Label)
    }

    /// Declared but never read; the analyzer upstream turns these into
    /// warnings.
    pub fn unused(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.entries.iter().filter(|entry| !entry.used)
    }

    fn declare(&mut self, name: &str, kind: SymbolKind, line: usize, used: bool) -> Result<()> {
        if let Some(&i) = self.index.get(name) {
            let existing = &self.entries[i];
            // implicit assignment to an already-declared variable is fine
            if existing.kind == SymbolKind::Variable && kind == SymbolKind::Variable {
                return Ok(());
            }
            return Err(error!(DuplicateSymbol, line));
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push(SymbolEntry {
            name: name.to_string(),
            kind,
            line,
            used,
        });
        Ok(())
    }

    fn mark_used(&mut self, name: &str) {
        match self.index.get(name) {
            Some(&i) => self.entries[i].used = true,
            None => self.deferred.push(name.to_string()),
        }
    }

    fn statements(&mut self, statements: &[Statement]) -> Result<()> {
        use Statement::*;
        for statement in statements {
            match statement {
                Var(line, name, init) => {
                    if let Some(init) = init {
                        self.expression(init);
                    }
                    self.declare(name, SymbolKind::Variable, *line, false)?;
                }
                Const(line, name, value) => {
                    self.expression(value);
                    self.declare(name, SymbolKind::Constant, *line, false)?;
                }
                Define(line, name, _) => {
                    self.declare(name, SymbolKind::Constant, *line, false)?;
                }
                Alias(line, name, _) | Device(line, name, ..) => {
                    self.declare(name, SymbolKind::Alias, *line, false)?;
                }
                Dim(line, name, size) => {
                    self.declare(name, SymbolKind::Array(*size), *line, false)?;
                }
                Assign(line, target, _, value) => {
                    self.expression(value);
                    self.target(target, *line)?;
                }
                If(_, arms, else_body) => {
                    for (condition, body) in arms {
                        self.expression(condition);
                        self.statements(body)?;
                    }
                    self.statements(else_body)?;
                }
                While(_, condition, body) => {
                    self.expression(condition);
                    self.statements(body)?;
                }
                DoLoop(_, body, test) => {
                    self.statements(body)?;
                    if let Some((_, condition)) = test {
                        self.expression(condition);
                    }
                }
                For(line, var, from, to, step, body) => {
                    self.expression(from);
                    self.expression(to);
                    if let Some(step) = step {
                        self.expression(step);
                    }
                    // the loop variable is implicitly declared and used
                    if self.get(var).is_none() {
                        self.declare(var, SymbolKind::LoopVariable, *line, true)?;
                    } else {
                        self.mark_used(var);
                    }
                    self.statements(body)?;
                }
                Select(_, subject, cases, default) => {
                    self.expression(subject);
                    for (values, body) in cases {
                        for value in values {
                            self.expression(value);
                        }
                        self.statements(body)?;
                    }
                    self.statements(default)?;
                }
                Label(line, name) => self.declare(name, SymbolKind::Label, *line, false)?,
                Goto(_, name) | Gosub(_, name) => self.mark_used(name),
                Return(_, value) => {
                    if let Some(value) = value {
                        self.expression(value);
                    }
                }
                Sub(line, name, body) => {
                    self.declare(name, SymbolKind::Sub, *line, false)?;
                    self.statements(body)?;
                }
                Function(line, name, params, body) => {
                    self.declare(name, SymbolKind::Function(params.len()), *line, false)?;
                    for param in params {
                        self.declare(param, SymbolKind::Parameter, *line, true)?;
                    }
                    self.statements(body)?;
                }
                Call(_, name, args) => {
                    self.mark_used(name);
                    for arg in args {
                        self.expression(arg);
                    }
                }
                Push(_, value) | Print(_, value) | Sleep(_, value) => self.expression(value),
                Pop(line, target) | Peek(line, target) => self.target(target, *line)?,
                BatchWrite(_, hash, _, value) => {
                    self.expression(hash);
                    self.expression(value);
                }
                Break(..) | Continue(..) | Yield(..) | End(..) => {}
            }
        }
        Ok(())
    }

    fn target(&mut self, target: &Target, line: usize) -> Result<()> {
        match target {
            Target::Var(name) => {
                // assignment implicitly declares, BASIC style
                if self.get(name).is_none() {
                    self.declare(name, SymbolKind::Variable, line, false)?;
                }
            }
            Target::Index(name, index) => {
                self.mark_used(name);
                self.expression(index);
            }
            Target::Prop(name, _) => self.mark_used(name),
            Target::SlotProp(name, slot, _) => {
                self.mark_used(name);
                self.expression(slot);
            }
            Target::NamedProp(type_hash, name_hash, _) => {
                self.expression(type_hash);
                self.expression(name_hash);
            }
        }
        Ok(())
    }

    fn expression(&mut self, expression: &Expression) {
        expression.walk(&mut |e| match e {
            Expression::Var(name)
            | Expression::Index(name, _)
            | Expression::Call(name, _)
            | Expression::Prop(name, _)
            | Expression::SlotProp(name, _, _)
            | Expression::PreModify(name, _)
            | Expression::PostModify(name, _) => {
                self.mark_used(name);
            }
            _ => {}
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::{parse, tokenize};
    use super::*;

    fn symbols(source: &str) -> Symbols {
        let tokens = tokenize(source, false).unwrap();
        let program = parse(&tokens).unwrap();
        Symbols::collect(&program).unwrap()
    }

    #[test]
    fn test_kinds_and_used_flags() {
        let s = symbols(
            "ALIAS sensor d0\nVAR temp = sensor.Temperature\nVAR spare\n\
             CONST LIMIT = 100\nIF temp > LIMIT THEN\nYIELD\nENDIF",
        );
        assert_eq!(s.get("sensor").unwrap().kind, SymbolKind::Alias);
        assert!(s.get("sensor").unwrap().used);
        assert!(s.get("temp").unwrap().used);
        assert!(!s.get("spare").unwrap().used);
        assert_eq!(s.get("LIMIT").unwrap().kind, SymbolKind::Constant);
    }

    #[test]
    fn test_loop_variable_implicitly_declared() {
        let s = symbols("FOR i = 1 TO 10\nYIELD\nNEXT i");
        assert_eq!(s.get("i").unwrap().kind, SymbolKind::LoopVariable);
        assert!(s.get("i").unwrap().used);
    }

    #[test]
    fn test_duplicate_symbol() {
        let tokens = tokenize("VAR x = 1\nCONST x = 2", false).unwrap();
        let program = parse(&tokens).unwrap();
        assert!(Symbols::collect(&program).is_err());
    }

    #[test]
    fn test_labels() {
        let s = symbols("main:\nGOTO main");
        assert!(s.is_label("main"));
        assert!(s.get("main").unwrap().used);
    }
}
