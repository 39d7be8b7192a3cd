use super::asm::{self, AliasValue, Arith1, Arith2, AsmLine, BranchOp, Dev, Instr, Operand};
use crate::lang::Error;
use std::collections::HashMap;

/// ## Decompiler
///
/// Recovers BASIC-like text from structured assembly. Best effort, not
/// semantics-preserving: labels come back as `label:`, jumps as GOTO,
/// compare-set plus branch pairs as single-line IFs, device traffic as
/// property statements. Registers that have no alias keep their `rN`
/// names as variables.
pub fn decompile(lines: &[AsmLine]) -> String {
    Decompiler::default().run(lines)
}

/// Parse assembly text first, then decompile it.
pub fn decompile_text(text: &str) -> Result<String, Error> {
    Ok(decompile(&asm::parse(text)?))
}

#[derive(Default)]
struct Decompiler {
    reg_names: HashMap<usize, String>,
    out: Vec<String>,
}

impl Decompiler {
    fn run(mut self, lines: &[AsmLine]) -> String {
        let mut i = 0;
        while i < lines.len() {
            match &lines[i] {
                AsmLine::Blank => self.out.push(String::new()),
                AsmLine::Comment(text) => self.out.push(format!("# {}", text)),
                AsmLine::Label(name) => self.out.push(format!("{}:", name)),
                AsmLine::Instr(instr) => {
                    // a compare-set feeding the next line's beqz/bnez
                    // reads better as one IF
                    if let (Instr::Arith2(op, reg, a, b), Some(AsmLine::Instr(next))) =
                        (instr, lines.get(i + 1))
                    {
                        if let Some(relation) = comparison(*op) {
                            if let Instr::BranchZero(on_zero, Operand::Reg(test), target) = next {
                                if test == reg {
                                    let relation = if *on_zero {
                                        invert(relation)
                                    } else {
                                        relation
                                    };
                                    self.out.push(format!(
                                        "IF {} {} {} THEN GOTO {}",
                                        self.value(a),
                                        relation,
                                        self.value(b),
                                        self.value(target),
                                    ));
                                    i += 2;
                                    continue;
                                }
                            }
                        }
                    }
                    self.instr(instr);
                }
            }
            i += 1;
        }
        let mut text = self.out.join("\n");
        text.push('\n');
        text
    }

    fn instr(&mut self, instr: &Instr) {
        use Instr::*;
        let line = match instr {
            Move(reg, a) => format!("{} = {}", self.reg(reg), self.value(a)),
            Arith2(op, reg, a, b) => {
                format!("{} = {}", self.reg(reg), self.binary(*op, a, b))
            }
            Arith1(op, reg, a) => format!("{} = {}", self.reg(reg), self.unary(*op, a)),
            Rand(reg) => format!("{} = RND()", self.reg(reg)),
            Select(reg, c, a, b) => format!(
                "{} = {} ? {} : {}",
                self.reg(reg),
                self.value(c),
                self.value(a),
                self.value(b)
            ),
            Jump(Operand::Reg(reg)) if reg.index() == 17 => "RETURN".to_string(),
            Jump(Operand::Name(name)) => format!("GOTO {}", name),
            Jump(target) | JumpReg(target) => format!("# j {}", self.value(target)),
            JumpAndLink(Operand::Name(name)) => format!("GOSUB {}", name),
            JumpAndLink(target) => format!("# jal {}", self.value(target)),
            Branch(op, a, b, target) => format!(
                "IF {} {} {} THEN GOTO {}",
                self.value(a),
                comparison(branch_as_set(*op)).expect("comparison"),
                self.value(b),
                self.value(target),
            ),
            BranchZero(on_zero, a, target) => format!(
                "IF {} {} 0 THEN GOTO {}",
                self.value(a),
                if *on_zero { "==" } else { "<>" },
                self.value(target),
            ),
            Load(reg, dev, property) => {
                format!("{} = {}.{}", self.reg(reg), device(dev), property)
            }
            Store(dev, property, a) => {
                format!("{}.{} = {}", device(dev), property, self.value(a))
            }
            LoadSlot(reg, dev, slot, property) => format!(
                "{} = {}.Slot({}).{}",
                self.reg(reg),
                device(dev),
                self.value(slot),
                property
            ),
            LoadBatch(reg, hash, property, mode) => format!(
                "{} = BATCHREAD({}, {}, {})",
                self.reg(reg),
                self.value(hash),
                property,
                self.value(mode)
            ),
            StoreBatch(hash, property, a) => format!(
                "BATCHWRITE({}, {}, {})",
                self.value(hash),
                property,
                self.value(a)
            ),
            LoadBatchNamed(reg, type_hash, label_hash, property, _mode) => format!(
                "{} = IC.Device[{}].Name[{}].{}",
                self.reg(reg),
                self.value(type_hash),
                self.value(label_hash),
                property
            ),
            StoreBatchNamed(type_hash, label_hash, property, a) => format!(
                "IC.Device[{}].Name[{}].{} = {}",
                self.value(type_hash),
                self.value(label_hash),
                property,
                self.value(a)
            ),
            Push(a) => format!("PUSH {}", self.value(a)),
            Pop(reg) => format!("POP {}", self.reg(reg)),
            Peek(reg) => format!("PEEK {}", self.reg(reg)),
            Get(..) | Put(..) => format!("# {}", instr),
            Yield => "YIELD".to_string(),
            Sleep(a) => format!("SLEEP {}", self.value(a)),
            Hcf => "END".to_string(),
            Alias(name, AliasValue::Reg(reg)) => {
                self.reg_names.insert(reg.index(), name.clone());
                return;
            }
            Alias(name, AliasValue::Dev(dev)) => format!("ALIAS {} {}", name, dev),
            Define(name, value) => format!("DEFINE {} {}", name, asm::fmt_num(*value)),
        };
        self.out.push(line);
    }

    fn reg(&self, reg: &asm::Reg) -> String {
        match self.reg_names.get(&reg.index()) {
            Some(name) => name.clone(),
            None => reg.to_string(),
        }
    }

    fn value(&self, operand: &Operand) -> String {
        match operand {
            Operand::Reg(reg) => self.reg(reg),
            _ => operand.to_string(),
        }
    }

    fn binary(&self, op: Arith2, a: &Operand, b: &Operand) -> String {
        use Arith2::*;
        let (a, b) = (self.value(a), self.value(b));
        match op {
            Add => format!("{} + {}", a, b),
            Sub => format!("{} - {}", a, b),
            Mul => format!("{} * {}", a, b),
            Div => format!("{} / {}", a, b),
            Mod => format!("{} MOD {}", a, b),
            Min => format!("MIN({}, {})", a, b),
            Max => format!("MAX({}, {})", a, b),
            Atan2 => format!("ATAN2({}, {})", a, b),
            And => format!("{} & {}", a, b),
            Or => format!("{} | {}", a, b),
            Xor => format!("BXOR({}, {})", a, b),
            Nor if b == "0" => format!("~{}", a),
            Nor => format!("~({} | {})", a, b),
            Sll => format!("{} << {}", a, b),
            Srl | Sra => format!("{} >> {}", a, b),
            Slt => format!("{} < {}", a, b),
            Sle => format!("{} <= {}", a, b),
            Sgt => format!("{} > {}", a, b),
            Sge => format!("{} >= {}", a, b),
            Seq => format!("{} == {}", a, b),
            Sne => format!("{} <> {}", a, b),
        }
    }

    fn unary(&self, op: Arith1, a: &Operand) -> String {
        use Arith1::*;
        let a = self.value(a);
        let call = |name: &str| format!("{}({})", name, a);
        match op {
            Abs => call("ABS"),
            Ceil => call("CEIL"),
            Floor => call("FLOOR"),
            Round => call("ROUND"),
            Trunc => call("TRUNC"),
            Sqrt => call("SQRT"),
            Exp => call("EXP"),
            Log => call("LOG"),
            Sin => call("SIN"),
            Cos => call("COS"),
            Tan => call("TAN"),
            Asin => call("ASIN"),
            Acos => call("ACOS"),
            Atan => call("ATAN"),
            Sgn => call("SGN"),
            Seqz => format!("NOT {}", a),
            Snez => format!("{} <> 0", a),
        }
    }
}

fn device(dev: &Dev) -> String {
    dev.to_string()
}

fn comparison(op: Arith2) -> Option<&'static str> {
    Some(match op {
        Arith2::Slt => "<",
        Arith2::Sle => "<=",
        Arith2::Sgt => ">",
        Arith2::Sge => ">=",
        Arith2::Seq => "==",
        Arith2::Sne => "<>",
        _ => return None,
    })
}

fn invert(relation: &'static str) -> &'static str {
    match relation {
        "<" => ">=",
        "<=" => ">",
        ">" => "<=",
        ">=" => "<",
        "==" => "<>",
        "<>" => "==",
        _ => relation,
    }
}

fn branch_as_set(op: BranchOp) -> Arith2 {
    match op {
        BranchOp::Beq => Arith2::Seq,
        BranchOp::Bne => Arith2::Sne,
        BranchOp::Blt => Arith2::Slt,
        BranchOp::Ble => Arith2::Sle,
        BranchOp::Bgt => Arith2::Sgt,
        BranchOp::Bge => Arith2::Sge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_jumps_and_device_traffic() {
        let text = "main:\nl r0 d0 Temperature\nbgt r0 300 main\ns d1 On 1\nj main";
        let basic = decompile_text(text).unwrap();
        assert!(basic.contains("main:"));
        assert!(basic.contains("r0 = d0.Temperature"));
        assert!(basic.contains("IF r0 > 300 THEN GOTO main"));
        assert!(basic.contains("d1.On = 1"));
        assert!(basic.contains("GOTO main"));
    }

    #[test]
    fn test_compare_branch_pair_folds_into_if() {
        let text = "slt r1 r0 5\nbeqz r1 done\nmove r2 1\ndone:";
        let basic = decompile_text(text).unwrap();
        // beqz inverts the comparison
        assert!(basic.contains("IF r0 >= 5 THEN GOTO done"));
        assert!(!basic.contains("beqz"));
    }

    #[test]
    fn test_return_and_gosub() {
        let basic = decompile_text("jal work\nj 3\nwork:\nj ra").unwrap();
        assert!(basic.contains("GOSUB work"));
        assert!(basic.contains("RETURN"));
    }

    #[test]
    fn test_aliases_apply_to_registers_and_devices() {
        let text = "alias counter r3\nalias heater d1\nadd counter counter 1\ns heater On 1";
        let basic = decompile_text(text).unwrap();
        assert!(basic.contains("counter = counter + 1"));
        assert!(basic.contains("ALIAS heater d1"));
        assert!(basic.contains("heater.On = 1"));
    }

    #[test]
    fn test_malformed_input_errors() {
        assert!(decompile_text("add r0").is_err());
    }
}
