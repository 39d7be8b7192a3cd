use crate::error;
use crate::lang::Error;
use std::fmt;

type Result<T> = std::result::Result<T, Error>;

/// ## IC10 instruction set
///
/// One structured value per physical line. The generator emits these,
/// the linker patches them, the decompiler reads them back and the
/// machine executes them, so the shape is shared by all four.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    R(u8),
    Sp,
    Ra,
}

impl Reg {
    pub fn index(&self) -> usize {
        match self {
            Reg::R(n) => *n as usize,
            Reg::Sp => 16,
            Reg::Ra => 17,
        }
    }

    pub fn from_str(s: &str) -> Option<Reg> {
        match s {
            "sp" => Some(Reg::Sp),
            "ra" => Some(Reg::Ra),
            _ => {
                let n: u8 = s.strip_prefix('r')?.parse().ok()?;
                if n < 16 {
                    Some(Reg::R(n))
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reg::R(n) => write!(f, "r{}", n),
            Reg::Sp => write!(f, "sp"),
            Reg::Ra => write!(f, "ra"),
        }
    }
}

/// Register, literal number, or a symbolic name (label, `define` or
/// register `alias`) resolved at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Num(f64),
    Name(String),
}

impl Operand {
    fn from_str(s: &str) -> Operand {
        if let Some(reg) = Reg::from_str(s) {
            return Operand::Reg(reg);
        }
        if let Ok(n) = s.parse::<f64>() {
            return Operand::Num(n);
        }
        Operand::Name(s.to_string())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(f, "{}", reg),
            Operand::Num(n) => write!(f, "{}", fmt_num(*n)),
            Operand::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Device operand: a pin, the housing, or an alias name.
#[derive(Debug, Clone, PartialEq)]
pub enum Dev {
    Pin(u8),
    Db,
    Name(String),
}

impl Dev {
    fn from_str(s: &str) -> Dev {
        if s == "db" {
            return Dev::Db;
        }
        if let Some(rest) = s.strip_prefix('d') {
            if let Ok(n) = rest.parse::<u8>() {
                if n < 6 {
                    return Dev::Pin(n);
                }
            }
        }
        Dev::Name(s.to_string())
    }
}

impl fmt::Display for Dev {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dev::Pin(n) => write!(f, "d{}", n),
            Dev::Db => write!(f, "db"),
            Dev::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Three-operand ALU forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith2 {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
    Atan2,
    And,
    Or,
    Xor,
    Nor,
    Sll,
    Srl,
    Sra,
    Slt,
    Sle,
    Sgt,
    Sge,
    Seq,
    Sne,
}

/// Two-operand ALU forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith1 {
    Abs,
    Ceil,
    Floor,
    Round,
    Trunc,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sgn,
    Seqz,
    Snez,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOp {
    Beq,
    Bne,
    Blt,
    Ble,
    Bgt,
    Bge,
}

impl BranchOp {
    /// The branch taken when the comparison is false.
    pub fn inverse(&self) -> BranchOp {
        use BranchOp::*;
        match self {
            Beq => Bne,
            Bne => Beq,
            Blt => Bge,
            Ble => Bgt,
            Bgt => Ble,
            Bge => Blt,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AliasValue {
    Reg(Reg),
    Dev(Dev),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Move(Reg, Operand),
    Arith2(Arith2, Reg, Operand, Operand),
    Arith1(Arith1, Reg, Operand),
    Rand(Reg),
    Select(Reg, Operand, Operand, Operand),
    Jump(Operand),
    JumpAndLink(Operand),
    JumpReg(Operand),
    Branch(BranchOp, Operand, Operand, Operand),
    BranchZero(bool, Operand, Operand),
    Load(Reg, Dev, String),
    Store(Dev, String, Operand),
    LoadSlot(Reg, Dev, Operand, String),
    LoadBatch(Reg, Operand, String, Operand),
    StoreBatch(Operand, String, Operand),
    LoadBatchNamed(Reg, Operand, Operand, String, Operand),
    StoreBatchNamed(Operand, Operand, String, Operand),
    Push(Operand),
    Pop(Reg),
    Peek(Reg),
    Get(Reg, Operand),
    Put(Operand, Operand),
    Yield,
    Sleep(Operand),
    Hcf,
    Alias(String, AliasValue),
    Define(String, f64),
}

/// A physical line of assembly text.
#[derive(Debug, Clone, PartialEq)]
pub enum AsmLine {
    Blank,
    Comment(String),
    Label(String),
    Instr(Instr),
}

impl AsmLine {
    /// Counts toward the 128-line budget. Labels do; stripped
    /// comments and blanks do not survive optimization anyway.
    pub fn is_code(&self) -> bool {
        matches!(self, AsmLine::Label(_) | AsmLine::Instr(_))
    }
}

/// Parse assembly text into structured lines. Fails on the first
/// malformed instruction with its 1-based line number.
pub fn parse(text: &str) -> Result<Vec<AsmLine>> {
    let mut lines = vec![];
    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let (content, comment) = match raw.find('#') {
            Some(at) => (&raw[..at], Some(raw[at + 1..].trim())),
            None => (raw, None),
        };
        let content = content.trim();
        if content.is_empty() {
            match comment {
                Some(comment) => lines.push(AsmLine::Comment(comment.to_string())),
                None => lines.push(AsmLine::Blank),
            }
            continue;
        }
        let parts: Vec<&str> = content.split_whitespace().collect();
        if parts.len() == 1 && parts[0].ends_with(':') {
            let name = &parts[0][..parts[0].len() - 1];
            if name.is_empty() {
                return Err(error!(InvalidInstruction, line_number));
            }
            lines.push(AsmLine::Label(name.to_string()));
            continue;
        }
        lines.push(AsmLine::Instr(parse_instr(&parts, line_number)?));
    }
    Ok(lines)
}

fn parse_instr(parts: &[&str], line: usize) -> Result<Instr> {
    let bad = || error!(InvalidInstruction, line);
    let args = &parts[1..];
    let reg = |i: usize| -> Result<Reg> {
        args.get(i)
            .and_then(|s| Reg::from_str(s))
            .ok_or_else(bad)
    };
    let op = |i: usize| -> Result<Operand> {
        args.get(i).map(|s| Operand::from_str(s)).ok_or_else(bad)
    };
    let dev = |i: usize| -> Result<Dev> {
        args.get(i).map(|s| Dev::from_str(s)).ok_or_else(bad)
    };
    let prop = |i: usize| -> Result<String> {
        args.get(i).map(|s| s.to_string()).ok_or_else(bad)
    };
    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(bad())
        }
    };

    let mnemonic = parts[0].to_ascii_lowercase();
    if let Some(a2) = arith2_from_str(&mnemonic) {
        arity(3)?;
        return Ok(Instr::Arith2(a2, reg(0)?, op(1)?, op(2)?));
    }
    if let Some(a1) = arith1_from_str(&mnemonic) {
        arity(2)?;
        return Ok(Instr::Arith1(a1, reg(0)?, op(1)?));
    }
    if let Some(branch) = branch_from_str(&mnemonic) {
        arity(3)?;
        return Ok(Instr::Branch(branch, op(0)?, op(1)?, op(2)?));
    }
    Ok(match mnemonic.as_str() {
        "move" => {
            arity(2)?;
            Instr::Move(reg(0)?, op(1)?)
        }
        "rand" => {
            arity(1)?;
            Instr::Rand(reg(0)?)
        }
        "select" => {
            arity(4)?;
            Instr::Select(reg(0)?, op(1)?, op(2)?, op(3)?)
        }
        "j" => {
            arity(1)?;
            Instr::Jump(op(0)?)
        }
        "jal" => {
            arity(1)?;
            Instr::JumpAndLink(op(0)?)
        }
        "jr" => {
            arity(1)?;
            Instr::JumpReg(op(0)?)
        }
        "beqz" => {
            arity(2)?;
            Instr::BranchZero(true, op(0)?, op(1)?)
        }
        "bnez" => {
            arity(2)?;
            Instr::BranchZero(false, op(0)?, op(1)?)
        }
        "l" => {
            arity(3)?;
            Instr::Load(reg(0)?, dev(1)?, prop(2)?)
        }
        "s" => {
            arity(3)?;
            Instr::Store(dev(0)?, prop(1)?, op(2)?)
        }
        "ls" => {
            arity(4)?;
            Instr::LoadSlot(reg(0)?, dev(1)?, op(2)?, prop(3)?)
        }
        "lb" => {
            arity(4)?;
            Instr::LoadBatch(reg(0)?, op(1)?, prop(2)?, op(3)?)
        }
        "sb" => {
            arity(3)?;
            Instr::StoreBatch(op(0)?, prop(1)?, op(2)?)
        }
        "lbn" => {
            arity(5)?;
            Instr::LoadBatchNamed(reg(0)?, op(1)?, op(2)?, prop(3)?, op(4)?)
        }
        "sbn" => {
            arity(4)?;
            Instr::StoreBatchNamed(op(0)?, op(1)?, prop(2)?, op(3)?)
        }
        "push" => {
            arity(1)?;
            Instr::Push(op(0)?)
        }
        "pop" => {
            arity(1)?;
            Instr::Pop(reg(0)?)
        }
        "peek" => {
            arity(1)?;
            Instr::Peek(reg(0)?)
        }
        "get" => {
            arity(2)?;
            Instr::Get(reg(0)?, op(1)?)
        }
        "put" => {
            arity(2)?;
            Instr::Put(op(0)?, op(1)?)
        }
        "yield" => {
            arity(0)?;
            Instr::Yield
        }
        "sleep" => {
            arity(1)?;
            Instr::Sleep(op(0)?)
        }
        "hcf" => {
            arity(0)?;
            Instr::Hcf
        }
        "alias" => {
            arity(2)?;
            let name = prop(0)?;
            let value = match Reg::from_str(args[1]) {
                Some(reg) => AliasValue::Reg(reg),
                None => match Dev::from_str(args[1]) {
                    dev @ (Dev::Pin(_) | Dev::Db) => AliasValue::Dev(dev),
                    Dev::Name(_) => return Err(bad()),
                },
            };
            Instr::Alias(name, value)
        }
        "define" => {
            arity(2)?;
            let name = prop(0)?;
            let value = args[1].parse::<f64>().map_err(|_| bad())?;
            Instr::Define(name, value)
        }
        _ => return Err(bad()),
    })
}

fn arith2_from_str(s: &str) -> Option<Arith2> {
    use Arith2::*;
    Some(match s {
        "add" => Add,
        "sub" => Sub,
        "mul" => Mul,
        "div" => Div,
        "mod" => Mod,
        "min" => Min,
        "max" => Max,
        "atan2" => Atan2,
        "and" => And,
        "or" => Or,
        "xor" => Xor,
        "nor" => Nor,
        "sll" => Sll,
        "srl" => Srl,
        "sra" => Sra,
        "slt" => Slt,
        "sle" => Sle,
        "sgt" => Sgt,
        "sge" => Sge,
        "seq" => Seq,
        "sne" => Sne,
        _ => return None,
    })
}

fn arith1_from_str(s: &str) -> Option<Arith1> {
    use Arith1::*;
    Some(match s {
        "abs" => Abs,
        "ceil" => Ceil,
        "floor" => Floor,
        "round" => Round,
        "trunc" => Trunc,
        "sqrt" => Sqrt,
        "exp" => Exp,
        "log" => Log,
        "sin" => Sin,
        "cos" => Cos,
        "tan" => Tan,
        "asin" => Asin,
        "acos" => Acos,
        "atan" => Atan,
        "sgn" => Sgn,
        "seqz" => Seqz,
        "snez" => Snez,
        _ => return None,
    })
}

fn branch_from_str(s: &str) -> Option<BranchOp> {
    use BranchOp::*;
    Some(match s {
        "beq" => Beq,
        "bne" => Bne,
        "blt" => Blt,
        "ble" => Ble,
        "bgt" => Bgt,
        "bge" => Bge,
        _ => return None,
    })
}

fn arith2_mnemonic(op: Arith2) -> &'static str {
    use Arith2::*;
    match op {
        Add => "add",
        Sub => "sub",
        Mul => "mul",
        Div => "div",
        Mod => "mod",
        Min => "min",
        Max => "max",
        Atan2 => "atan2",
        And => "and",
        Or => "or",
        Xor => "xor",
        Nor => "nor",
        Sll => "sll",
        Srl => "srl",
        Sra => "sra",
        Slt => "slt",
        Sle => "sle",
        Sgt => "sgt",
        Sge => "sge",
        Seq => "seq",
        Sne => "sne",
    }
}

fn arith1_mnemonic(op: Arith1) -> &'static str {
    use Arith1::*;
    match op {
        Abs => "abs",
        Ceil => "ceil",
        Floor => "floor",
        Round => "round",
        Trunc => "trunc",
        Sqrt => "sqrt",
        Exp => "exp",
        Log => "log",
        Sin => "sin",
        Cos => "cos",
        Tan => "tan",
        Asin => "asin",
        Acos => "acos",
        Atan => "atan",
        Sgn => "sgn",
        Seqz => "seqz",
        Snez => "snez",
    }
}

fn branch_mnemonic(op: BranchOp) -> &'static str {
    use BranchOp::*;
    match op {
        Beq => "beq",
        Bne => "bne",
        Blt => "blt",
        Ble => "ble",
        Bgt => "bgt",
        Bge => "bge",
    }
}

/// Render a number the way the game does: integral values without a
/// fraction part.
pub fn fmt_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Instr::*;
        match self {
            Move(r, a) => write!(f, "move {} {}", r, a),
            Arith2(op, r, a, b) => write!(f, "{} {} {} {}", arith2_mnemonic(*op), r, a, b),
            Arith1(op, r, a) => write!(f, "{} {} {}", arith1_mnemonic(*op), r, a),
            Rand(r) => write!(f, "rand {}", r),
            Select(r, c, a, b) => write!(f, "select {} {} {} {}", r, c, a, b),
            Jump(t) => write!(f, "j {}", t),
            JumpAndLink(t) => write!(f, "jal {}", t),
            JumpReg(t) => write!(f, "jr {}", t),
            Branch(op, a, b, t) => write!(f, "{} {} {} {}", branch_mnemonic(*op), a, b, t),
            BranchZero(true, a, t) => write!(f, "beqz {} {}", a, t),
            BranchZero(false, a, t) => write!(f, "bnez {} {}", a, t),
            Load(r, d, p) => write!(f, "l {} {} {}", r, d, p),
            Store(d, p, a) => write!(f, "s {} {} {}", d, p, a),
            LoadSlot(r, d, slot, p) => write!(f, "ls {} {} {} {}", r, d, slot, p),
            LoadBatch(r, h, p, m) => write!(f, "lb {} {} {} {}", r, h, p, m),
            StoreBatch(h, p, a) => write!(f, "sb {} {} {}", h, p, a),
            LoadBatchNamed(r, th, nh, p, m) => {
                write!(f, "lbn {} {} {} {} {}", r, th, nh, p, m)
            }
            StoreBatchNamed(th, nh, p, a) => write!(f, "sbn {} {} {} {}", th, nh, p, a),
            Push(a) => write!(f, "push {}", a),
            Pop(r) => write!(f, "pop {}", r),
            Peek(r) => write!(f, "peek {}", r),
            Get(r, a) => write!(f, "get {} {}", r, a),
            Put(a, b) => write!(f, "put {} {}", a, b),
            Yield => write!(f, "yield"),
            Sleep(a) => write!(f, "sleep {}", a),
            Hcf => write!(f, "hcf"),
            Alias(name, AliasValue::Reg(r)) => write!(f, "alias {} {}", name, r),
            Alias(name, AliasValue::Dev(d)) => write!(f, "alias {} {}", name, d),
            Define(name, n) => write!(f, "define {} {}", name, fmt_num(*n)),
        }
    }
}

impl fmt::Display for AsmLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AsmLine::Blank => Ok(()),
            AsmLine::Comment(text) => write!(f, "# {}", text),
            AsmLine::Label(name) => write!(f, "{}:", name),
            AsmLine::Instr(instr) => write!(f, "{}", instr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_text() {
        let text = "main:\nmove r0 5\nadd r1 r0 1.5\nl r2 d0 Temperature\nbgt r2 300 main\nyield";
        let lines = parse(text).unwrap();
        let rendered: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        assert_eq!(rendered.join("\n"), text);
    }

    #[test]
    fn test_labels_and_comments() {
        let lines = parse("# header\n\nstart:\nj start # loop forever").unwrap();
        assert_eq!(lines[0], AsmLine::Comment("header".to_string()));
        assert_eq!(lines[1], AsmLine::Blank);
        assert_eq!(lines[2], AsmLine::Label("start".to_string()));
        assert_eq!(
            lines[3],
            AsmLine::Instr(Instr::Jump(Operand::Name("start".to_string())))
        );
    }

    #[test]
    fn test_malformed_instruction() {
        assert!(parse("add r0 r1").is_err());
        assert!(parse("frobnicate r0").is_err());
        assert!(parse("move r16 1").is_err());
    }

    #[test]
    fn test_directives() {
        let lines = parse("alias sensor d0\ndefine LIMIT 300").unwrap();
        assert_eq!(
            lines[0],
            AsmLine::Instr(Instr::Alias(
                "sensor".to_string(),
                AliasValue::Dev(Dev::Pin(0))
            ))
        );
        assert_eq!(
            lines[1],
            AsmLine::Instr(Instr::Define("LIMIT".to_string(), 300.0))
        );
    }
}
