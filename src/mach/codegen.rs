use super::asm::{Arith1, Arith2, AsmLine, BranchOp, Dev, Instr, Operand, Reg};
use super::device::{name_hash, DeviceRef};
use super::operation;
use super::reg::Allocator;
use crate::error;
use crate::lang::ast::{
    AssignOp, BinOp, Expression, LoopTest, Program, Statement, Target, UnaryOp,
};
use crate::lang::{Diagnostic, Error, SymbolKind, Symbols};
use std::collections::HashMap;

type Result<T> = std::result::Result<T, Error>;

/// Structured output of generation, before layout finalization. Every
/// emitted line carries the BASIC line that produced it; `compile`
/// numbers the final text and folds these into the source map.
#[derive(Debug)]
pub struct Assembly {
    pub lines: Vec<AsmLine>,
    pub source_lines: Vec<Option<usize>>,
    pub registers: Vec<(String, String)>,
    pub aliases: Vec<(String, String)>,
    pub warnings: Vec<Diagnostic>,
}

pub fn generate(program: &Program, symbols: &Symbols) -> Result<Assembly> {
    Generator::new(symbols).run(program)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ctx {
    Main,
    Sub,
    Function,
}

struct LoopCtx {
    break_label: String,
    continue_label: String,
    break_used: bool,
    continue_used: bool,
}

struct PendingRoutine<'a> {
    line: usize,
    name: &'a str,
    params: &'a [String],
    body: &'a [Statement],
    is_function: bool,
}

struct Generator<'a> {
    symbols: &'a Symbols,
    lines: Vec<AsmLine>,
    source_lines: Vec<Option<usize>>,
    current_line: usize,
    vars: Allocator,
    consts: HashMap<String, f64>,
    devices: HashMap<String, DeviceRef>,
    alias_order: Vec<(String, String)>,
    arrays: HashMap<String, usize>,
    label_seq: usize,
    loop_stack: Vec<LoopCtx>,
    routines: Vec<PendingRoutine<'a>>,
    context: Ctx,
    temp: u8,
    pressure_warned: bool,
    end_label: Option<String>,
    warnings: Vec<Diagnostic>,
}

impl<'a> Generator<'a> {
    fn new(symbols: &'a Symbols) -> Generator<'a> {
        Generator {
            symbols,
            lines: vec![],
            source_lines: vec![],
            current_line: 1,
            vars: Allocator::new(),
            consts: HashMap::new(),
            devices: HashMap::new(),
            alias_order: vec![],
            arrays: HashMap::new(),
            label_seq: 0,
            loop_stack: vec![],
            routines: vec![],
            context: Ctx::Main,
            temp: 0,
            pressure_warned: false,
            end_label: None,
            warnings: vec![],
        }
    }

    fn run(mut self, program: &'a Program) -> Result<Assembly> {
        self.layout_arrays(&program.statements);
        self.statements(&program.statements)?;
        let mut routines = std::mem::take(&mut self.routines);
        if !routines.is_empty() {
            // keep straight-line execution out of the routine bodies
            let end = self.end_label();
            self.emit(Instr::Jump(Operand::Name(end)));
        }
        while !routines.is_empty() {
            for routine in routines {
                self.routine(routine)?;
            }
            routines = std::mem::take(&mut self.routines);
        }
        if let Some(end) = self.end_label.clone() {
            self.emit_label(end);
        }
        if self.vars.clamped() && !self.pressure_warned {
            self.warn_pressure();
        }
        log::debug!(
            "generated {} lines, {} labels pending link",
            self.lines.len(),
            self.label_seq
        );
        let registers = self
            .vars
            .assignments()
            .filter(|(name, _)| !name.contains('.'))
            .map(|(name, reg)| (name.to_string(), reg.to_string()))
            .collect();
        Ok(Assembly {
            lines: self.lines,
            source_lines: self.source_lines,
            registers,
            aliases: self.alias_order,
            warnings: self.warnings,
        })
    }

    /// Arrays live at the bottom of the 512-value stack; `sp` starts
    /// past the reserved block so PUSH/POP stay clear of them.
    fn layout_arrays(&mut self, statements: &[Statement]) {
        fn walk<'a>(out: &mut Vec<(&'a str, usize, usize)>, statements: &'a [Statement]) {
            for statement in statements {
                match statement {
                    Statement::Dim(line, name, size) => out.push((name, *size, *line)),
                    Statement::If(_, arms, else_body) => {
                        for (_, body) in arms {
                            walk(out, body);
                        }
                        walk(out, else_body);
                    }
                    Statement::While(_, _, body)
                    | Statement::DoLoop(_, body, _)
                    | Statement::For(_, _, _, _, _, body)
                    | Statement::Sub(_, _, body)
                    | Statement::Function(_, _, _, body) => walk(out, body),
                    Statement::Select(_, _, cases, default) => {
                        for (_, body) in cases {
                            walk(out, body);
                        }
                        walk(out, default);
                    }
                    _ => {}
                }
            }
        }
        let mut dims = vec![];
        walk(&mut dims, statements);
        if dims.is_empty() {
            return;
        }
        let mut base = 0;
        let first_line = dims[0].2;
        for (name, size, _) in dims {
            self.arrays.insert(name.to_string(), base);
            base += size;
        }
        self.current_line = first_line;
        self.emit(Instr::Move(Reg::Sp, Operand::Num(base as f64)));
    }

    // *** Emission plumbing

    fn emit(&mut self, instr: Instr) {
        self.lines.push(AsmLine::Instr(instr));
        self.source_lines.push(Some(self.current_line));
    }

    fn emit_label(&mut self, name: String) {
        self.lines.push(AsmLine::Label(name));
        self.source_lines.push(Some(self.current_line));
    }

    fn fresh(&mut self, prefix: &str) -> String {
        loop {
            let name = format!("{}_{}", prefix, self.label_seq);
            self.label_seq += 1;
            if self.symbols.get(&name).is_none() {
                return name;
            }
        }
    }

    fn end_label(&mut self) -> String {
        match &self.end_label {
            Some(name) => name.clone(),
            None => {
                let name = self.fresh("end");
                self.end_label = Some(name.clone());
                name
            }
        }
    }

    fn alloc_temp(&mut self) -> Reg {
        let index = 15i16 - self.temp as i16;
        self.temp += 1;
        let floor = self.vars.low_water() as i16;
        if index < floor {
            self.warn_pressure();
            return Reg::R(floor.min(15) as u8);
        }
        Reg::R(index as u8)
    }

    fn warn_pressure(&mut self) {
        if !self.pressure_warned {
            self.pressure_warned = true;
            self.warnings.push(Diagnostic::warning(
                Some(self.current_line),
                "register pressure: variables and temporaries exceed r0-r15",
            ));
        }
    }

    // *** Statements

    fn statements(&mut self, statements: &'a [Statement]) -> Result<()> {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &'a Statement) -> Result<()> {
        self.current_line = statement.line();
        self.temp = 0;
        use Statement::*;
        match statement {
            Var(line, name, init) => self.r#var(*line, name, init.as_ref()),
            Const(line, name, value) => self.r#const(*line, name, value),
            Define(_, name, value) => {
                self.consts.insert(name.clone(), *value);
                Ok(())
            }
            Alias(_, name, target) => {
                let device = match target {
                    crate::lang::ast::AliasTarget::Pin(pin) => DeviceRef::Pin(*pin),
                    crate::lang::ast::AliasTarget::Housing => DeviceRef::Housing,
                };
                self.alias_order.push((name.clone(), device.to_string()));
                self.devices.insert(name.clone(), device);
                Ok(())
            }
            Device(_, name, prefab, label) => {
                let device = match label {
                    Some(label) => DeviceRef::Named(name_hash(prefab), name_hash(label)),
                    None => DeviceRef::Batch(name_hash(prefab)),
                };
                self.alias_order.push((name.clone(), device.to_string()));
                self.devices.insert(name.clone(), device);
                Ok(())
            }
            Dim(..) => Ok(()),
            Assign(line, target, op, value) => self.r#assign(*line, target, *op, value),
            If(line, arms, else_body) => self.r#if(*line, arms, else_body),
            While(line, condition, body) => self.r#while(*line, condition, body),
            DoLoop(line, body, test) => self.r#do(*line, body, test.as_ref()),
            For(line, var, from, to, step, body) => {
                self.r#for(*line, var, from, to, step.as_ref(), body)
            }
            Select(line, subject, cases, default) => {
                self.r#select(*line, subject, cases, default)
            }
            Label(_, name) => {
                self.emit_label(name.clone());
                Ok(())
            }
            Goto(_, name) => {
                self.emit(Instr::Jump(Operand::Name(name.clone())));
                Ok(())
            }
            Gosub(_, name) => {
                self.emit(Instr::JumpAndLink(Operand::Name(name.clone())));
                Ok(())
            }
            Return(line, value) => self.r#return(*line, value.as_ref()),
            Sub(line, name, body) => {
                self.routines.push(PendingRoutine {
                    line: *line,
                    name,
                    params: &[],
                    body,
                    is_function: false,
                });
                Ok(())
            }
            Function(line, name, params, body) => {
                self.routines.push(PendingRoutine {
                    line: *line,
                    name,
                    params,
                    body,
                    is_function: true,
                });
                Ok(())
            }
            Call(line, name, args) => self.r#call(*line, name, args),
            Break(line) => self.r#break(*line),
            Continue(line) => self.r#continue(*line),
            Push(_, value) => {
                let value = self.eval(value)?;
                self.emit(Instr::Push(value));
                Ok(())
            }
            Pop(line, target) => self.stack_read(*line, target, false),
            Peek(line, target) => self.stack_read(*line, target, true),
            Print(_, value) => {
                let value = self.eval(value)?;
                self.emit(Instr::Store(Dev::Db, "Setting".to_string(), value));
                Ok(())
            }
            BatchWrite(_, type_hash, property, value) => {
                let type_hash = self.eval(type_hash)?;
                let value = self.eval(value)?;
                self.emit(Instr::StoreBatch(type_hash, property.clone(), value));
                Ok(())
            }
            Yield(_) => {
                self.emit(Instr::Yield);
                Ok(())
            }
            Sleep(_, seconds) => {
                let seconds = self.eval(seconds)?;
                self.emit(Instr::Sleep(seconds));
                Ok(())
            }
            End(_) => {
                let end = self.end_label();
                self.emit(Instr::Jump(Operand::Name(end)));
                Ok(())
            }
        }
    }

    fn r#var(&mut self, _line: usize, name: &str, init: Option<&'a Expression>) -> Result<()> {
        let reg = self.vars.get_or_assign(name);
        match init {
            Some(init) => self.eval_into(reg, init),
            None => {
                self.emit(Instr::Move(reg, Operand::Num(0.0)));
                Ok(())
            }
        }
    }

    fn r#const(&mut self, _line: usize, name: &str, value: &'a Expression) -> Result<()> {
        match self.fold(value) {
            Some(n) => {
                self.consts.insert(name.to_string(), n);
                Ok(())
            }
            None => {
                // not foldable; the constant takes a register after all
                let reg = self.vars.get_or_assign(name);
                self.eval_into(reg, value)
            }
        }
    }

    fn r#assign(
        &mut self,
        line: usize,
        target: &'a Target,
        op: AssignOp,
        value: &'a Expression,
    ) -> Result<()> {
        match target {
            Target::Var(name) => {
                if self.consts.contains_key(name)
                    || matches!(
                        self.symbols.get(name),
                        Some(entry) if entry.kind == SymbolKind::Constant
                    )
                {
                    return Err(error!(SyntaxError, line; "CANNOT ASSIGN TO CONSTANT"));
                }
                if self.devices.contains_key(name) {
                    return Err(error!(SyntaxError, line; "CANNOT ASSIGN TO DEVICE"));
                }
                let reg = self.vars.get_or_assign(name);
                match op {
                    AssignOp::Set => self.eval_into(reg, value),
                    _ => {
                        let value = self.eval(value)?;
                        self.emit(Instr::Arith2(
                            compound_op(op),
                            reg,
                            Operand::Reg(reg),
                            value,
                        ));
                        Ok(())
                    }
                }
            }
            Target::Index(name, index) => {
                let address = self.array_address(line, name, index)?;
                match op {
                    AssignOp::Set => {
                        let value = self.eval(value)?;
                        self.emit(Instr::Put(address, value));
                    }
                    _ => {
                        let value = self.eval(value)?;
                        let temp = self.alloc_temp();
                        self.emit(Instr::Get(temp, address.clone()));
                        self.emit(Instr::Arith2(
                            compound_op(op),
                            temp,
                            Operand::Reg(temp),
                            value,
                        ));
                        self.emit(Instr::Put(address, Operand::Reg(temp)));
                    }
                }
                Ok(())
            }
            Target::Prop(name, property) => {
                let device = self.device_ref(line, name)?;
                match op {
                    AssignOp::Set => {
                        let value = self.eval(value)?;
                        self.store_property(&device, property, value);
                    }
                    _ => {
                        let value = self.eval(value)?;
                        let temp = self.alloc_temp();
                        self.load_property(temp, &device, property);
                        self.emit(Instr::Arith2(
                            compound_op(op),
                            temp,
                            Operand::Reg(temp),
                            value,
                        ));
                        self.store_property(&device, property, Operand::Reg(temp));
                    }
                }
                Ok(())
            }
            Target::SlotProp(..) => {
                Err(error!(SyntaxError, line; "SLOT PROPERTIES ARE READ ONLY"))
            }
            Target::NamedProp(type_hash, label_hash, property) => {
                if op != AssignOp::Set {
                    // read-modify-write over two network lookups is
                    // never what anyone wants
                    return Err(
                        error!(SyntaxError, line; "COMPOUND ASSIGNMENT NOT SUPPORTED HERE"),
                    );
                }
                let type_hash = self.eval(type_hash)?;
                let label_hash = self.eval(label_hash)?;
                let value = self.eval(value)?;
                self.emit(Instr::StoreBatchNamed(
                    type_hash,
                    label_hash,
                    property.clone(),
                    value,
                ));
                Ok(())
            }
        }
    }

    fn r#if(
        &mut self,
        line: usize,
        arms: &'a [(Expression, Vec<Statement>)],
        else_body: &'a [Statement],
    ) -> Result<()> {
        // IF cond THEN GOTO label needs no synthesized labels at all
        if arms.len() == 1 && else_body.is_empty() {
            if let [Statement::Goto(_, target)] = arms[0].1.as_slice() {
                return self.branch_true(&arms[0].0, target);
            }
        }
        let endif = self.fresh("endif");
        for (index, (condition, body)) in arms.iter().enumerate() {
            self.current_line = line;
            self.temp = 0;
            let more = index + 1 < arms.len() || !else_body.is_empty();
            let next = if more {
                self.fresh("else")
            } else {
                endif.clone()
            };
            self.branch_false(condition, &next)?;
            self.statements(body)?;
            self.current_line = line;
            if more {
                self.emit(Instr::Jump(Operand::Name(endif.clone())));
            }
            if next != endif {
                self.emit_label(next);
            }
        }
        self.statements(else_body)?;
        self.current_line = line;
        self.emit_label(endif);
        Ok(())
    }

    fn r#while(
        &mut self,
        line: usize,
        condition: &'a Expression,
        body: &'a [Statement],
    ) -> Result<()> {
        let top = self.fresh("while");
        let exit = self.fresh("wend");
        self.emit_label(top.clone());
        self.branch_false(condition, &exit)?;
        self.loop_stack.push(LoopCtx {
            break_label: exit.clone(),
            continue_label: top.clone(),
            break_used: false,
            continue_used: false,
        });
        self.statements(body)?;
        self.loop_stack.pop();
        self.current_line = line;
        self.emit(Instr::Jump(Operand::Name(top)));
        self.emit_label(exit);
        Ok(())
    }

    fn r#do(
        &mut self,
        line: usize,
        body: &'a [Statement],
        test: Option<&'a (LoopTest, Expression)>,
    ) -> Result<()> {
        let top = self.fresh("do");
        let exit = self.fresh("loop");
        let test_label = self.fresh("dotest");
        let continue_label = if test.is_some() {
            test_label.clone()
        } else {
            top.clone()
        };
        self.emit_label(top.clone());
        self.loop_stack.push(LoopCtx {
            break_label: exit.clone(),
            continue_label,
            break_used: false,
            continue_used: false,
        });
        self.statements(body)?;
        let ctx = self.loop_stack.pop().expect("loop context");
        self.current_line = line;
        self.temp = 0;
        if ctx.continue_used && test.is_some() {
            self.emit_label(test_label);
        }
        match test {
            // post-test: UNTIL repeats while the condition is false
            Some((LoopTest::Until, condition)) => self.branch_false(condition, &top)?,
            Some((LoopTest::While, condition)) => self.branch_true(condition, &top)?,
            None => self.emit(Instr::Jump(Operand::Name(top))),
        }
        if ctx.break_used {
            self.emit_label(exit);
        }
        Ok(())
    }

    fn r#for(
        &mut self,
        line: usize,
        var: &str,
        from: &'a Expression,
        to: &'a Expression,
        step: Option<&'a Expression>,
        body: &'a [Statement],
    ) -> Result<()> {
        let var_reg = self.vars.get_or_assign(var);
        self.eval_into(var_reg, from)?;
        let to_op = self.loop_operand(to, &format!("{}.to", var))?;
        let step_op = match step {
            Some(step) => self.loop_operand(step, &format!("{}.step", var))?,
            None => Operand::Num(1.0),
        };
        let top = self.fresh("for");
        let exit = self.fresh("next");
        let step_label = self.fresh("step");
        self.emit_label(top.clone());
        self.temp = 0;
        match step_op {
            // the exit comparison follows the sign of STEP
            Operand::Num(n) if n < 0.0 => self.emit(Instr::Branch(
                BranchOp::Blt,
                Operand::Reg(var_reg),
                to_op.clone(),
                Operand::Name(exit.clone()),
            )),
            Operand::Num(_) => self.emit(Instr::Branch(
                BranchOp::Bgt,
                Operand::Reg(var_reg),
                to_op.clone(),
                Operand::Name(exit.clone()),
            )),
            _ => {
                let ascending = self.alloc_temp();
                self.emit(Instr::Arith2(
                    Arith2::Sgt,
                    ascending,
                    step_op.clone(),
                    Operand::Num(0.0),
                ));
                let past_high = self.alloc_temp();
                self.emit(Instr::Arith2(
                    Arith2::Sgt,
                    past_high,
                    Operand::Reg(var_reg),
                    to_op.clone(),
                ));
                let past_low = self.alloc_temp();
                self.emit(Instr::Arith2(
                    Arith2::Slt,
                    past_low,
                    Operand::Reg(var_reg),
                    to_op.clone(),
                ));
                let done = self.alloc_temp();
                self.emit(Instr::Select(
                    done,
                    Operand::Reg(ascending),
                    Operand::Reg(past_high),
                    Operand::Reg(past_low),
                ));
                self.emit(Instr::BranchZero(
                    false,
                    Operand::Reg(done),
                    Operand::Name(exit.clone()),
                ));
            }
        }
        self.loop_stack.push(LoopCtx {
            break_label: exit.clone(),
            continue_label: step_label.clone(),
            break_used: false,
            continue_used: false,
        });
        self.statements(body)?;
        let ctx = self.loop_stack.pop().expect("loop context");
        self.current_line = line;
        if ctx.continue_used {
            self.emit_label(step_label);
        }
        self.emit(Instr::Arith2(
            Arith2::Add,
            var_reg,
            Operand::Reg(var_reg),
            step_op,
        ));
        self.emit(Instr::Jump(Operand::Name(top)));
        self.emit_label(exit);
        Ok(())
    }

    /// TO and STEP are evaluated once, before the loop. Constants and
    /// plain variables are used in place; anything else gets a hidden
    /// register so the body cannot clobber it.
    fn loop_operand(&mut self, e: &'a Expression, hidden: &str) -> Result<Operand> {
        if let Some(n) = self.fold(e) {
            return Ok(Operand::Num(n));
        }
        if let Expression::Var(name) = e {
            if let Ok(op) = self.value_of(self.current_line, name) {
                return Ok(op);
            }
        }
        let reg = self.vars.get_or_assign(hidden);
        self.eval_into(reg, e)?;
        Ok(Operand::Reg(reg))
    }

    fn r#select(
        &mut self,
        line: usize,
        subject: &'a Expression,
        cases: &'a [(Vec<Expression>, Vec<Statement>)],
        default: &'a [Statement],
    ) -> Result<()> {
        let subject = self.eval(subject)?;
        let tests_mark = self.temp;
        let endsel = self.fresh("endsel");
        let labels: Vec<String> = cases.iter().map(|_| self.fresh("case")).collect();
        for ((values, _), label) in cases.iter().zip(&labels) {
            for value in values {
                self.temp = tests_mark;
                let value = self.eval(value)?;
                self.emit(Instr::Branch(
                    BranchOp::Beq,
                    subject.clone(),
                    value,
                    Operand::Name(label.clone()),
                ));
            }
        }
        // no test matched: fall into CASE ELSE (or straight out)
        self.statements(default)?;
        self.current_line = line;
        if !cases.is_empty() {
            self.emit(Instr::Jump(Operand::Name(endsel.clone())));
        }
        for (index, ((_, body), label)) in cases.iter().zip(&labels).enumerate() {
            self.current_line = line;
            self.emit_label(label.clone());
            self.statements(body)?;
            self.current_line = line;
            if index + 1 < cases.len() {
                self.emit(Instr::Jump(Operand::Name(endsel.clone())));
            }
        }
        self.emit_label(endsel);
        Ok(())
    }

    fn r#return(&mut self, line: usize, value: Option<&'a Expression>) -> Result<()> {
        match self.context {
            Ctx::Main => {
                if value.is_some() {
                    return Err(error!(SyntaxError, line; "RETURN VALUE OUTSIDE FUNCTION"));
                }
                self.emit(Instr::Jump(Operand::Reg(Reg::Ra)));
            }
            Ctx::Sub => {
                if value.is_some() {
                    return Err(error!(SyntaxError, line; "RETURN VALUE OUTSIDE FUNCTION"));
                }
                self.emit(Instr::Pop(Reg::Ra));
                self.emit(Instr::Jump(Operand::Reg(Reg::Ra)));
            }
            Ctx::Function => {
                let result = match value {
                    Some(value) => self.eval(value)?,
                    None => Operand::Num(0.0),
                };
                self.emit(Instr::Pop(Reg::Ra));
                self.emit(Instr::Push(result));
                self.emit(Instr::Jump(Operand::Reg(Reg::Ra)));
            }
        }
        Ok(())
    }

    fn routine(&mut self, routine: PendingRoutine<'a>) -> Result<()> {
        self.current_line = routine.line;
        self.temp = 0;
        self.context = if routine.is_function {
            Ctx::Function
        } else {
            Ctx::Sub
        };
        self.emit_label(routine.name.to_string());
        // caller pushed arguments left to right
        for param in routine.params.iter().rev() {
            let reg = self.vars.get_or_assign(param);
            self.emit(Instr::Pop(reg));
        }
        // saved so nested CALLs cannot clobber the way home
        self.emit(Instr::Push(Operand::Reg(Reg::Ra)));
        self.statements(routine.body)?;
        self.current_line = routine.line;
        self.emit(Instr::Pop(Reg::Ra));
        if routine.is_function {
            self.emit(Instr::Push(Operand::Num(0.0)));
        }
        self.emit(Instr::Jump(Operand::Reg(Reg::Ra)));
        self.context = Ctx::Main;
        Ok(())
    }

    fn r#call(&mut self, line: usize, name: &str, args: &'a [Expression]) -> Result<()> {
        match self.symbols.get(name).map(|entry| entry.kind) {
            Some(SymbolKind::Sub) => {
                if !args.is_empty() {
                    return Err(error!(IllegalFunctionCall, line; "SUB TAKES NO ARGUMENTS"));
                }
                self.emit(Instr::JumpAndLink(Operand::Name(name.to_string())));
                Ok(())
            }
            Some(SymbolKind::Function(arity)) => {
                if args.len() != arity {
                    return Err(error!(IllegalFunctionCall, line; "WRONG NUMBER OF ARGUMENTS"));
                }
                for arg in args {
                    let arg = self.eval(arg)?;
                    self.emit(Instr::Push(arg));
                }
                self.emit(Instr::JumpAndLink(Operand::Name(name.to_string())));
                let discard = self.alloc_temp();
                self.emit(Instr::Pop(discard));
                Ok(())
            }
            _ => Err(error!(UndefinedSymbol, line)),
        }
    }

    fn r#break(&mut self, line: usize) -> Result<()> {
        let last = self.loop_stack.len().checked_sub(1);
        match last {
            Some(i) => {
                self.loop_stack[i].break_used = true;
                let label = self.loop_stack[i].break_label.clone();
                self.emit(Instr::Jump(Operand::Name(label)));
                Ok(())
            }
            None => Err(error!(SyntaxError, line; "BREAK OUTSIDE LOOP")),
        }
    }

    fn r#continue(&mut self, line: usize) -> Result<()> {
        let last = self.loop_stack.len().checked_sub(1);
        match last {
            Some(i) => {
                self.loop_stack[i].continue_used = true;
                let label = self.loop_stack[i].continue_label.clone();
                self.emit(Instr::Jump(Operand::Name(label)));
                Ok(())
            }
            None => Err(error!(SyntaxError, line; "CONTINUE OUTSIDE LOOP")),
        }
    }

    fn stack_read(&mut self, line: usize, target: &'a Target, peek: bool) -> Result<()> {
        let instr = |reg| if peek { Instr::Peek(reg) } else { Instr::Pop(reg) };
        match target {
            Target::Var(name) => {
                if self.consts.contains_key(name)
                    || self.devices.contains_key(name)
                    || matches!(
                        self.symbols.get(name),
                        Some(entry) if entry.kind == SymbolKind::Constant
                    )
                {
                    return Err(error!(SyntaxError, line; "EXPECTED VARIABLE"));
                }
                let reg = self.vars.get_or_assign(name);
                self.emit(instr(reg));
                Ok(())
            }
            _ => {
                let temp = self.alloc_temp();
                self.emit(instr(temp));
                let value = Operand::Reg(temp);
                match target {
                    Target::Var(_) => unreachable!(),
                    Target::Index(name, index) => {
                        let address = self.array_address(line, name, index)?;
                        self.emit(Instr::Put(address, value));
                    }
                    Target::Prop(name, property) => {
                        let device = self.device_ref(line, name)?;
                        self.store_property(&device, property, value);
                    }
                    Target::SlotProp(..) => {
                        return Err(error!(SyntaxError, line; "SLOT PROPERTIES ARE READ ONLY"))
                    }
                    Target::NamedProp(type_hash, label_hash, property) => {
                        let type_hash = self.eval(type_hash)?;
                        let label_hash = self.eval(label_hash)?;
                        self.emit(Instr::StoreBatchNamed(
                            type_hash,
                            label_hash,
                            property.clone(),
                            value,
                        ));
                    }
                }
                Ok(())
            }
        }
    }

    // *** Conditions

    /// Jump to `target` when the condition is false. Top-level
    /// comparisons emit a single inverted branch instead of a
    /// compare-set plus `beqz`.
    fn branch_false(&mut self, condition: &'a Expression, target: &str) -> Result<()> {
        if let Some(n) = self.fold(condition) {
            if !operation::truthy(n) {
                self.emit(Instr::Jump(Operand::Name(target.to_string())));
            }
            return Ok(());
        }
        if let Expression::Binary(op, lhs, rhs) = condition {
            if let Some(branch) = comparison_branch(*op) {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.emit(Instr::Branch(
                    branch.inverse(),
                    lhs,
                    rhs,
                    Operand::Name(target.to_string()),
                ));
                return Ok(());
            }
        }
        let condition = self.eval(condition)?;
        self.emit(Instr::BranchZero(
            true,
            condition,
            Operand::Name(target.to_string()),
        ));
        Ok(())
    }

    fn branch_true(&mut self, condition: &'a Expression, target: &str) -> Result<()> {
        if let Some(n) = self.fold(condition) {
            if operation::truthy(n) {
                self.emit(Instr::Jump(Operand::Name(target.to_string())));
            }
            return Ok(());
        }
        if let Expression::Binary(op, lhs, rhs) = condition {
            if let Some(branch) = comparison_branch(*op) {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.emit(Instr::Branch(
                    branch,
                    lhs,
                    rhs,
                    Operand::Name(target.to_string()),
                ));
                return Ok(());
            }
        }
        let condition = self.eval(condition)?;
        self.emit(Instr::BranchZero(
            false,
            condition,
            Operand::Name(target.to_string()),
        ));
        Ok(())
    }

    // *** Expressions

    /// Evaluate to an operand: a literal when foldable, a variable's
    /// register when direct, otherwise a temporary.
    fn eval(&mut self, e: &'a Expression) -> Result<Operand> {
        if let Some(n) = self.fold(e) {
            return Ok(Operand::Num(n));
        }
        match e {
            Expression::Var(name) => self.value_of(self.current_line, name),
            Expression::PreModify(name, delta) => {
                let reg = self.variable_reg(name)?;
                self.emit(Instr::Arith2(
                    Arith2::Add,
                    reg,
                    Operand::Reg(reg),
                    Operand::Num(*delta),
                ));
                Ok(Operand::Reg(reg))
            }
            _ => {
                let mark = self.temp;
                let dest = {
                    let dest = self.alloc_temp();
                    self.eval_into_unfolded(dest, e, mark)?;
                    dest
                };
                self.temp = mark + 1;
                Ok(Operand::Reg(dest))
            }
        }
    }

    /// Evaluate directly into `dest`, avoiding a temporary and a move.
    fn eval_into(&mut self, dest: Reg, e: &'a Expression) -> Result<()> {
        if let Some(n) = self.fold(e) {
            self.emit(Instr::Move(dest, Operand::Num(n)));
            return Ok(());
        }
        match e {
            Expression::Var(name) => {
                let value = self.value_of(self.current_line, name)?;
                if value != Operand::Reg(dest) {
                    self.emit(Instr::Move(dest, value));
                }
                Ok(())
            }
            _ => {
                let mark = self.temp;
                self.eval_into_unfolded(dest, e, mark)?;
                self.temp = mark;
                Ok(())
            }
        }
    }

    /// The shared lowering: operands are evaluated while temporaries
    /// are held, then released before `dest` is written so a single
    /// instruction may safely reuse their registers.
    fn eval_into_unfolded(&mut self, dest: Reg, e: &'a Expression, mark: u8) -> Result<()> {
        match e {
            Expression::Number(_) | Expression::Var(_) => unreachable!("folded earlier"),
            Expression::Index(name, index) => {
                let address = self.array_address(self.current_line, name, index)?;
                self.temp = mark;
                self.emit(Instr::Get(dest, address));
                Ok(())
            }
            Expression::Unary(op, value) => {
                let value = self.eval(value)?;
                self.temp = mark;
                match op {
                    UnaryOp::Neg => {
                        self.emit(Instr::Arith2(Arith2::Sub, dest, Operand::Num(0.0), value))
                    }
                    UnaryOp::Not => self.emit(Instr::Arith1(Arith1::Seqz, dest, value)),
                    UnaryOp::BitNot => {
                        self.emit(Instr::Arith2(Arith2::Nor, dest, value, Operand::Num(0.0)))
                    }
                }
                Ok(())
            }
            Expression::Binary(BinOp::Pow, lhs, rhs) => {
                // no pow instruction: a^b = exp(b * log(a))
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                let scratch = self.alloc_temp();
                self.emit(Instr::Arith1(Arith1::Log, scratch, lhs));
                self.emit(Instr::Arith2(
                    Arith2::Mul,
                    scratch,
                    Operand::Reg(scratch),
                    rhs,
                ));
                self.temp = mark;
                self.emit(Instr::Arith1(Arith1::Exp, dest, Operand::Reg(scratch)));
                Ok(())
            }
            Expression::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                self.temp = mark;
                self.emit(Instr::Arith2(binary_instr(*op), dest, lhs, rhs));
                Ok(())
            }
            Expression::Ternary(condition, then_value, else_value) => {
                let condition = self.eval(condition)?;
                let then_value = self.eval(then_value)?;
                let else_value = self.eval(else_value)?;
                self.temp = mark;
                self.emit(Instr::Select(dest, condition, then_value, else_value));
                Ok(())
            }
            Expression::Call(name, args) => self.call_value(dest, name, args, mark),
            Expression::Prop(name, property) => {
                let device = self.device_ref(self.current_line, name)?;
                self.temp = mark;
                self.load_property(dest, &device, property);
                Ok(())
            }
            Expression::SlotProp(name, slot, property) => {
                let device = self.device_ref(self.current_line, name)?;
                let slot = self.eval(slot)?;
                self.temp = mark;
                match device {
                    DeviceRef::Pin(pin) => self.emit(Instr::LoadSlot(
                        dest,
                        Dev::Pin(pin),
                        slot,
                        property.clone(),
                    )),
                    DeviceRef::Housing => {
                        self.emit(Instr::LoadSlot(dest, Dev::Db, slot, property.clone()))
                    }
                    _ => {
                        return Err(
                            error!(SyntaxError, self.current_line; "SLOT ACCESS REQUIRES A PIN DEVICE"),
                        )
                    }
                }
                Ok(())
            }
            Expression::BatchRead(type_hash, property, mode) => {
                let type_hash = self.eval(type_hash)?;
                let mode = self.eval(mode)?;
                self.temp = mark;
                self.emit(Instr::LoadBatch(dest, type_hash, property.clone(), mode));
                Ok(())
            }
            Expression::NamedRead(type_hash, label_hash, property) => {
                let type_hash = self.eval(type_hash)?;
                let label_hash = self.eval(label_hash)?;
                self.temp = mark;
                self.emit(Instr::LoadBatchNamed(
                    dest,
                    type_hash,
                    label_hash,
                    property.clone(),
                    Operand::Num(0.0),
                ));
                Ok(())
            }
            Expression::PreModify(name, delta) => {
                let reg = self.variable_reg(name)?;
                self.emit(Instr::Arith2(
                    Arith2::Add,
                    reg,
                    Operand::Reg(reg),
                    Operand::Num(*delta),
                ));
                self.temp = mark;
                if dest != reg {
                    self.emit(Instr::Move(dest, Operand::Reg(reg)));
                }
                Ok(())
            }
            Expression::PostModify(name, delta) => {
                let reg = self.variable_reg(name)?;
                self.temp = mark;
                self.emit(Instr::Move(dest, Operand::Reg(reg)));
                self.emit(Instr::Arith2(
                    Arith2::Add,
                    reg,
                    Operand::Reg(reg),
                    Operand::Num(*delta),
                ));
                Ok(())
            }
        }
    }

    fn call_value(
        &mut self,
        dest: Reg,
        name: &str,
        args: &'a [Expression],
        mark: u8,
    ) -> Result<()> {
        let line = self.current_line;
        match self.symbols.get(name).map(|entry| entry.kind) {
            Some(SymbolKind::Function(arity)) => {
                if args.len() != arity {
                    return Err(error!(IllegalFunctionCall, line; "WRONG NUMBER OF ARGUMENTS"));
                }
                // the callee scribbles over the temporary registers;
                // spill any the surrounding expression still holds
                for i in 0..mark {
                    self.emit(Instr::Push(Operand::Reg(Reg::R(15 - i.min(15)))));
                }
                let args_mark = self.temp;
                for arg in args {
                    let arg = self.eval(arg)?;
                    self.emit(Instr::Push(arg));
                    self.temp = args_mark;
                }
                self.temp = mark;
                self.emit(Instr::JumpAndLink(Operand::Name(name.to_string())));
                self.emit(Instr::Pop(dest));
                for i in (0..mark).rev() {
                    self.emit(Instr::Pop(Reg::R(15 - i.min(15))));
                }
                return Ok(());
            }
            Some(SymbolKind::Sub) => {
                return Err(error!(IllegalFunctionCall, line; "SUB RETURNS NO VALUE"))
            }
            _ => {}
        }
        match builtin(name) {
            Some(Builtin::One(op)) => {
                let a = self.one_arg(line, args)?;
                self.temp = mark;
                self.emit(Instr::Arith1(op, dest, a));
                Ok(())
            }
            Some(Builtin::Two(op)) => {
                let (a, b) = self.two_args(line, args)?;
                self.temp = mark;
                self.emit(Instr::Arith2(op, dest, a, b));
                Ok(())
            }
            Some(Builtin::BitNot) => {
                let a = self.one_arg(line, args)?;
                self.temp = mark;
                self.emit(Instr::Arith2(Arith2::Nor, dest, a, Operand::Num(0.0)));
                Ok(())
            }
            Some(Builtin::Rand) => {
                if !args.is_empty() {
                    return Err(error!(IllegalFunctionCall, line; "WRONG NUMBER OF ARGUMENTS"));
                }
                self.temp = mark;
                self.emit(Instr::Rand(dest));
                Ok(())
            }
            None => Err(error!(UndefinedSymbol, line)),
        }
    }

    fn one_arg(&mut self, line: usize, args: &'a [Expression]) -> Result<Operand> {
        if args.len() != 1 {
            return Err(error!(IllegalFunctionCall, line; "WRONG NUMBER OF ARGUMENTS"));
        }
        self.eval(&args[0])
    }

    fn two_args(&mut self, line: usize, args: &'a [Expression]) -> Result<(Operand, Operand)> {
        if args.len() != 2 {
            return Err(error!(IllegalFunctionCall, line; "WRONG NUMBER OF ARGUMENTS"));
        }
        let a = self.eval(&args[0])?;
        let b = self.eval(&args[1])?;
        Ok((a, b))
    }

    // *** Name and device resolution

    fn value_of(&mut self, line: usize, name: &str) -> Result<Operand> {
        if let Some(&n) = self.consts.get(name) {
            return Ok(Operand::Num(n));
        }
        if self.devices.contains_key(name) {
            return Err(error!(SyntaxError, line; "EXPECTED VALUE, FOUND DEVICE"));
        }
        match self.symbols.get(name).map(|entry| entry.kind) {
            Some(SymbolKind::Variable | SymbolKind::LoopVariable | SymbolKind::Parameter) => {
                Ok(Operand::Reg(self.vars.get_or_assign(name)))
            }
            // a register-backed constant exists only after its
            // declaration has executed
            Some(SymbolKind::Constant) => match self.vars.get(name) {
                Some(reg) => Ok(Operand::Reg(reg)),
                None => Err(error!(UndefinedSymbol, line; "CONSTANT USED BEFORE DECLARATION")),
            },
            _ => Err(error!(UndefinedSymbol, line)),
        }
    }

    fn variable_reg(&mut self, name: &str) -> Result<Reg> {
        match self.value_of(self.current_line, name)? {
            Operand::Reg(reg) => Ok(reg),
            _ => Err(error!(SyntaxError, self.current_line; "EXPECTED VARIABLE")),
        }
    }

    fn device_ref(&self, line: usize, name: &str) -> Result<DeviceRef> {
        if let Some(device) = self.devices.get(name) {
            return Ok(device.clone());
        }
        match name {
            "db" => Ok(DeviceRef::Housing),
            _ => {
                if let Some(pin) = name.strip_prefix('d').and_then(|s| s.parse::<u8>().ok()) {
                    if pin < 6 {
                        return Ok(DeviceRef::Pin(pin));
                    }
                }
                Err(error!(UndefinedSymbol, line; "UNKNOWN DEVICE"))
            }
        }
    }

    fn load_property(&mut self, dest: Reg, device: &DeviceRef, property: &str) {
        match device {
            DeviceRef::Pin(pin) => {
                self.emit(Instr::Load(dest, Dev::Pin(*pin), property.to_string()))
            }
            DeviceRef::Housing => self.emit(Instr::Load(dest, Dev::Db, property.to_string())),
            DeviceRef::Batch(type_hash) => self.emit(Instr::LoadBatch(
                dest,
                Operand::Num(*type_hash as f64),
                property.to_string(),
                Operand::Num(0.0),
            )),
            DeviceRef::Named(type_hash, label_hash) => self.emit(Instr::LoadBatchNamed(
                dest,
                Operand::Num(*type_hash as f64),
                Operand::Num(*label_hash as f64),
                property.to_string(),
                Operand::Num(0.0),
            )),
        }
    }

    fn store_property(&mut self, device: &DeviceRef, property: &str, value: Operand) {
        match device {
            DeviceRef::Pin(pin) => {
                self.emit(Instr::Store(Dev::Pin(*pin), property.to_string(), value))
            }
            DeviceRef::Housing => self.emit(Instr::Store(Dev::Db, property.to_string(), value)),
            DeviceRef::Batch(type_hash) => self.emit(Instr::StoreBatch(
                Operand::Num(*type_hash as f64),
                property.to_string(),
                value,
            )),
            DeviceRef::Named(type_hash, label_hash) => self.emit(Instr::StoreBatchNamed(
                Operand::Num(*type_hash as f64),
                Operand::Num(*label_hash as f64),
                property.to_string(),
                value,
            )),
        }
    }

    fn array_address(&mut self, line: usize, name: &str, index: &'a Expression) -> Result<Operand> {
        let base = match self.arrays.get(name) {
            Some(&base) => base,
            None => return Err(error!(UndefinedSymbol, line; "NOT AN ARRAY")),
        };
        if let Some(n) = self.fold(index) {
            return Ok(Operand::Num(base as f64 + n.trunc()));
        }
        let index = self.eval(index)?;
        let address = self.alloc_temp();
        self.emit(Instr::Arith2(
            Arith2::Add,
            address,
            index,
            Operand::Num(base as f64),
        ));
        Ok(Operand::Reg(address))
    }

    // *** Constant folding

    fn fold(&self, e: &Expression) -> Option<f64> {
        match e {
            Expression::Number(n) => Some(*n),
            Expression::Var(name) => self.consts.get(name).copied(),
            Expression::Unary(op, value) => {
                let value = self.fold(value)?;
                Some(match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Not => operation::arith1(Arith1::Seqz, value),
                    UnaryOp::BitNot => operation::arith2(Arith2::Nor, value, 0.0),
                })
            }
            Expression::Binary(op, lhs, rhs) => {
                let lhs = self.fold(lhs)?;
                let rhs = self.fold(rhs)?;
                Some(match op {
                    // folded the same way the emitted exp/log pair
                    // computes it, so constants cannot disagree with
                    // runtime results
                    BinOp::Pow => (rhs * lhs.ln()).exp(),
                    BinOp::And => {
                        if operation::truthy(lhs) && operation::truthy(rhs) {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    BinOp::Or => {
                        if operation::truthy(lhs) || operation::truthy(rhs) {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    _ => operation::arith2(binary_instr(*op), lhs, rhs),
                })
            }
            Expression::Ternary(condition, then_value, else_value) => {
                let condition = self.fold(condition)?;
                if operation::truthy(condition) {
                    self.fold(then_value)
                } else {
                    self.fold(else_value)
                }
            }
            Expression::Call(name, args) => {
                if self.symbols.get(name).is_some() {
                    return None;
                }
                match builtin(name)? {
                    Builtin::One(op) => match args.as_slice() {
                        [a] => Some(operation::arith1(op, self.fold(a)?)),
                        _ => None,
                    },
                    Builtin::Two(op) => match args.as_slice() {
                        [a, b] => Some(operation::arith2(op, self.fold(a)?, self.fold(b)?)),
                        _ => None,
                    },
                    Builtin::BitNot => match args.as_slice() {
                        [a] => Some(operation::arith2(Arith2::Nor, self.fold(a)?, 0.0)),
                        _ => None,
                    },
                    Builtin::Rand => None,
                }
            }
            _ => None,
        }
    }
}

fn compound_op(op: AssignOp) -> Arith2 {
    match op {
        AssignOp::Set => unreachable!("not a compound form"),
        AssignOp::Add => Arith2::Add,
        AssignOp::Sub => Arith2::Sub,
        AssignOp::Mul => Arith2::Mul,
        AssignOp::Div => Arith2::Div,
    }
}

fn binary_instr(op: BinOp) -> Arith2 {
    match op {
        BinOp::Add => Arith2::Add,
        BinOp::Sub => Arith2::Sub,
        BinOp::Mul => Arith2::Mul,
        BinOp::Div => Arith2::Div,
        BinOp::Mod => Arith2::Mod,
        BinOp::Eq => Arith2::Seq,
        BinOp::NotEq => Arith2::Sne,
        BinOp::Lt => Arith2::Slt,
        BinOp::LtEq => Arith2::Sle,
        BinOp::Gt => Arith2::Sgt,
        BinOp::GtEq => Arith2::Sge,
        // comparisons feed these 1/0 values, so the bitwise forms
        // double as the logical ones
        BinOp::And | BinOp::BitAnd => Arith2::And,
        BinOp::Or | BinOp::BitOr => Arith2::Or,
        BinOp::Shl => Arith2::Sll,
        BinOp::Shr => Arith2::Srl,
        BinOp::Pow => unreachable!("lowered via exp/log"),
    }
}

fn comparison_branch(op: BinOp) -> Option<BranchOp> {
    Some(match op {
        BinOp::Eq => BranchOp::Beq,
        BinOp::NotEq => BranchOp::Bne,
        BinOp::Lt => BranchOp::Blt,
        BinOp::LtEq => BranchOp::Ble,
        BinOp::Gt => BranchOp::Bgt,
        BinOp::GtEq => BranchOp::Bge,
        _ => return None,
    })
}

enum Builtin {
    One(Arith1),
    Two(Arith2),
    BitNot,
    Rand,
}

fn builtin(name: &str) -> Option<Builtin> {
    use Arith1::*;
    use Arith2::*;
    Some(match name.to_ascii_uppercase().as_str() {
        "ABS" => Builtin::One(Abs),
        "SQRT" => Builtin::One(Sqrt),
        "CEIL" => Builtin::One(Ceil),
        "FLOOR" => Builtin::One(Floor),
        "ROUND" => Builtin::One(Round),
        "TRUNC" => Builtin::One(Trunc),
        "SGN" => Builtin::One(Sgn),
        "SIN" => Builtin::One(Sin),
        "COS" => Builtin::One(Cos),
        "TAN" => Builtin::One(Tan),
        "ASIN" => Builtin::One(Asin),
        "ACOS" => Builtin::One(Acos),
        "ATAN" => Builtin::One(Atan),
        "EXP" => Builtin::One(Exp),
        "LOG" => Builtin::One(Log),
        "MIN" => Builtin::Two(Min),
        "MAX" => Builtin::Two(Max),
        "ATAN2" => Builtin::Two(Atan2),
        "BAND" => Builtin::Two(And),
        "BOR" => Builtin::Two(Or),
        "BXOR" => Builtin::Two(Xor),
        "SHL" => Builtin::Two(Sll),
        "SHR" => Builtin::Two(Srl),
        "BNOT" => Builtin::BitNot,
        "RND" => Builtin::Rand,
        _ => return None,
    })
}
