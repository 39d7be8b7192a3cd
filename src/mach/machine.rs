use super::asm::{self, AsmLine, BranchOp, Dev, Instr, Operand, Reg};
use super::device::{name_hash, BatchMode};
use super::operation;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const STACK_SIZE: usize = 512;
pub const PIN_COUNT: usize = 6;

/// A peripheral: a property map queryable and settable by name, with
/// optional slots. The six pins, the housing and the named registry
/// all hold this one shape, so instruction execution never branches on
/// which kind it resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    pub prefab_hash: i32,
    pub label_hash: i32,
    pub label: String,
    pub properties: HashMap<String, f64>,
    pub slots: Vec<HashMap<String, f64>>,
}

impl Device {
    pub fn new(prefab: &str) -> Device {
        Device {
            prefab_hash: name_hash(prefab),
            ..Device::default()
        }
    }

    pub fn named(prefab: &str, label: &str) -> Device {
        Device {
            prefab_hash: name_hash(prefab),
            label_hash: name_hash(label),
            label: label.to_string(),
            ..Device::default()
        }
    }

    pub fn with_property(mut self, property: &str, value: f64) -> Device {
        self.properties.insert(property.to_string(), value);
        self
    }

    pub fn get(&self, property: &str) -> f64 {
        match property {
            "PrefabHash" => self.prefab_hash as f64,
            "NameHash" => self.label_hash as f64,
            _ => self.properties.get(property).copied().unwrap_or(0.0),
        }
    }

    pub fn set(&mut self, property: &str, value: f64) {
        self.properties.insert(property.to_string(), value);
    }

    pub fn get_slot(&self, slot: usize, property: &str) -> Option<f64> {
        Some(self.slots.get(slot)?.get(property).copied().unwrap_or(0.0))
    }
}

/// How the control surface addresses a device: by pin index, the
/// housing, or a named device's label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSel {
    Pin(usize),
    Housing,
    Label(String),
}

/// State snapshot returned by every control-surface call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub pc: usize,
    pub instruction_count: u64,
    pub halted: bool,
    pub paused: bool,
    pub yielding: bool,
    pub sleeping: Option<f64>,
    pub error_message: Option<String>,
    pub registers: BTreeMap<String, f64>,
    pub stack: Vec<f64>,
    pub breakpoints: Vec<usize>,
}

/// ## Virtual machine
///
/// Executes IC10 text one instruction at a time with exact register,
/// stack and device semantics. Runtime faults (stack bounds, invalid
/// targets, unresolved named devices) become state - `halted` plus an
/// error message - and are never surfaced as panics or `Err` across
/// the step boundary, so callers can always inspect failure through
/// the snapshot alone. Instances are independent; one per program.
pub struct Machine {
    lines: Vec<AsmLine>,
    labels: HashMap<String, usize>,
    defines: HashMap<String, f64>,
    reg_aliases: HashMap<String, Reg>,
    dev_aliases: HashMap<String, Dev>,
    registers: [f64; 18],
    stack: [f64; STACK_SIZE],
    pc: usize,
    instruction_count: u64,
    halted: bool,
    paused: bool,
    yielding: bool,
    sleeping: Option<f64>,
    error: Option<String>,
    breakpoints: BTreeSet<usize>,
    skip_break: Option<usize>,
    pins: [Option<Device>; PIN_COUNT],
    housing: Device,
    named: Vec<Device>,
    rng: StdRng,
}

const SP: usize = 16;
const RA: usize = 17;

#[derive(Clone, Copy)]
enum DeviceSlot {
    Pin(usize),
    Housing,
    Named(usize),
}

impl Default for Machine {
    fn default() -> Machine {
        Machine::new()
    }
}

impl Machine {
    pub fn new() -> Machine {
        Machine {
            lines: vec![],
            labels: HashMap::new(),
            defines: HashMap::new(),
            reg_aliases: HashMap::new(),
            dev_aliases: HashMap::new(),
            registers: [0.0; 18],
            stack: [0.0; STACK_SIZE],
            pc: 0,
            instruction_count: 0,
            halted: false,
            paused: false,
            yielding: false,
            sleeping: None,
            error: None,
            breakpoints: BTreeSet::new(),
            skip_break: None,
            pins: Default::default(),
            housing: Device::default(),
            named: vec![],
            rng: StdRng::seed_from_u64(0x1C10),
        }
    }

    /// Parse and load a program, clearing execution state. A malformed
    /// program loads as a halted machine with the parse error set.
    pub fn load(&mut self, text: &str) -> Snapshot {
        self.reset();
        self.lines.clear();
        self.labels.clear();
        self.defines.clear();
        self.reg_aliases.clear();
        self.dev_aliases.clear();
        match asm::parse(text) {
            Ok(lines) => {
                for (index, line) in lines.iter().enumerate() {
                    match line {
                        AsmLine::Label(name) => {
                            self.labels.insert(name.clone(), index);
                        }
                        AsmLine::Instr(Instr::Define(name, value)) => {
                            self.defines.insert(name.clone(), *value);
                        }
                        AsmLine::Instr(Instr::Alias(name, value)) => match value {
                            asm::AliasValue::Reg(reg) => {
                                self.reg_aliases.insert(name.clone(), *reg);
                            }
                            asm::AliasValue::Dev(dev) => {
                                self.dev_aliases.insert(name.clone(), dev.clone());
                            }
                        },
                        _ => {}
                    }
                }
                self.lines = lines;
            }
            Err(e) => self.fault(e.to_string()),
        }
        self.snapshot()
    }

    /// Execute exactly one instruction. Returns false when execution
    /// cannot continue (halted, or paused at a breakpoint that has not
    /// been stepped past yet).
    pub fn step(&mut self) -> bool {
        self.step_once();
        !self.halted && !self.paused
    }

    /// Step until halt, a breakpoint, a yield/sleep, or the
    /// instruction budget runs out. The budget exists because target
    /// programs may loop without yielding; it must not hang the host.
    pub fn run(&mut self, max_instructions: usize) -> Snapshot {
        let mut executed = 0;
        while executed < max_instructions {
            self.step_once();
            if self.halted || self.paused || self.yielding || self.sleeping.is_some() {
                break;
            }
            executed += 1;
        }
        self.snapshot()
    }

    fn step_once(&mut self) {
        if self.halted {
            return;
        }
        self.paused = false;
        self.yielding = false;
        self.sleeping = None;
        let instr = loop {
            if self.pc >= self.lines.len() {
                self.halted = true;
                return;
            }
            let line_number = self.pc + 1;
            if self.breakpoints.contains(&line_number)
                && matches!(self.lines[self.pc], AsmLine::Instr(_))
                && self.skip_break != Some(self.pc)
            {
                // pause before executing; registers reflect the state
                // immediately prior
                self.paused = true;
                self.skip_break = Some(self.pc);
                return;
            }
            match &self.lines[self.pc] {
                AsmLine::Instr(instr) => break instr.clone(),
                _ => self.pc += 1,
            }
        };
        self.skip_break = None;
        self.instruction_count += 1;
        if let Err(message) = self.execute(&instr) {
            self.fault(message);
        }
    }

    /// Clear registers, stack, PC and flags; keep the loaded program,
    /// breakpoints and attached devices.
    pub fn reset(&mut self) {
        self.registers = [0.0; 18];
        self.stack = [0.0; STACK_SIZE];
        self.pc = 0;
        self.instruction_count = 0;
        self.halted = false;
        self.paused = false;
        self.yielding = false;
        self.sleeping = None;
        self.error = None;
        self.skip_break = None;
    }

    pub fn pause(&mut self) -> Snapshot {
        self.paused = true;
        self.snapshot()
    }

    pub fn stop(&mut self) -> Snapshot {
        self.halted = true;
        self.snapshot()
    }

    pub fn set_register(&mut self, name: &str, value: f64) -> Snapshot {
        match Reg::from_str(name) {
            Some(reg) => self.registers[reg.index()] = value,
            None => self.fault(format!("INVALID REGISTER {}", name)),
        }
        self.snapshot()
    }

    pub fn register(&self, name: &str) -> Option<f64> {
        Reg::from_str(name).map(|reg| self.registers[reg.index()])
    }

    // *** Breakpoints (1-based assembly lines)

    pub fn add_breakpoint(&mut self, line: usize) -> Snapshot {
        self.breakpoints.insert(line);
        self.snapshot()
    }

    pub fn remove_breakpoint(&mut self, line: usize) -> Snapshot {
        self.breakpoints.remove(&line);
        self.snapshot()
    }

    pub fn clear_breakpoints(&mut self) -> Snapshot {
        self.breakpoints.clear();
        self.snapshot()
    }

    // *** Devices

    pub fn install(&mut self, pin: usize, device: Device) {
        if pin < PIN_COUNT {
            self.pins[pin] = Some(device);
        }
    }

    pub fn remove(&mut self, pin: usize) {
        if pin < PIN_COUNT {
            self.pins[pin] = None;
        }
    }

    pub fn register_named(&mut self, device: Device) {
        self.named.push(device);
    }

    pub fn housing_mut(&mut self) -> &mut Device {
        &mut self.housing
    }

    fn find_slot(&self, selector: &DeviceSel) -> Option<DeviceSlot> {
        match selector {
            DeviceSel::Pin(pin) => {
                if *pin < PIN_COUNT && self.pins[*pin].is_some() {
                    Some(DeviceSlot::Pin(*pin))
                } else {
                    None
                }
            }
            DeviceSel::Housing => Some(DeviceSlot::Housing),
            DeviceSel::Label(label) => self
                .named
                .iter()
                .position(|d| d.label == *label)
                .map(DeviceSlot::Named),
        }
    }

    fn slot_device_mut(&mut self, slot: DeviceSlot) -> &mut Device {
        match slot {
            DeviceSlot::Pin(pin) => self.pins[pin].as_mut().expect("checked by find_slot"),
            DeviceSlot::Housing => &mut self.housing,
            DeviceSlot::Named(index) => &mut self.named[index],
        }
    }

    pub fn set_device_property(
        &mut self,
        selector: &DeviceSel,
        property: &str,
        slot: Option<usize>,
        value: f64,
    ) -> Snapshot {
        match self.find_slot(selector) {
            Some(found) => {
                let device = self.slot_device_mut(found);
                match slot {
                    None => device.set(property, value),
                    Some(slot) => {
                        if device.slots.len() <= slot {
                            device.slots.resize_with(slot + 1, HashMap::new);
                        }
                        device.slots[slot].insert(property.to_string(), value);
                    }
                }
            }
            None => self.fault(format!("NO DEVICE {:?}", selector)),
        }
        self.snapshot()
    }

    pub fn get_device_property(
        &mut self,
        selector: &DeviceSel,
        property: &str,
        slot: Option<usize>,
    ) -> f64 {
        match self.find_slot(selector) {
            Some(found) => {
                let device = self.slot_device_mut(found);
                match slot {
                    None => device.get(property),
                    Some(slot) => device.get_slot(slot, property).unwrap_or(0.0),
                }
            }
            None => {
                self.fault(format!("NO DEVICE {:?}", selector));
                0.0
            }
        }
    }

    // *** State inspection

    pub fn snapshot(&self) -> Snapshot {
        let mut registers = BTreeMap::new();
        for i in 0..16 {
            registers.insert(format!("r{}", i), self.registers[i]);
        }
        registers.insert("sp".to_string(), self.registers[SP]);
        registers.insert("ra".to_string(), self.registers[RA]);
        let depth = (self.registers[SP].max(0.0) as usize).min(STACK_SIZE);
        Snapshot {
            pc: self.pc + 1,
            instruction_count: self.instruction_count,
            halted: self.halted,
            paused: self.paused,
            yielding: self.yielding,
            sleeping: self.sleeping,
            error_message: self.error.clone(),
            registers,
            stack: self.stack[..depth].to_vec(),
            breakpoints: self.breakpoints.iter().copied().collect(),
        }
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn yielding(&self) -> bool {
        self.yielding
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn fault(&mut self, message: String) {
        log::debug!("fault at line {}: {}", self.pc + 1, message);
        self.halted = true;
        self.error = Some(message);
    }

    // *** Execution

    fn execute(&mut self, instr: &Instr) -> Result<(), String> {
        let mut next_pc = self.pc + 1;
        match instr {
            Instr::Move(reg, a) => {
                self.registers[reg.index()] = self.value(a)?;
            }
            Instr::Arith2(op, reg, a, b) => {
                let a = self.value(a)?;
                let b = self.value(b)?;
                self.registers[reg.index()] = operation::arith2(*op, a, b);
            }
            Instr::Arith1(op, reg, a) => {
                let a = self.value(a)?;
                self.registers[reg.index()] = operation::arith1(*op, a);
            }
            Instr::Rand(reg) => {
                self.registers[reg.index()] = self.rng.gen::<f64>();
            }
            Instr::Select(reg, c, a, b) => {
                let c = self.value(c)?;
                let a = self.value(a)?;
                let b = self.value(b)?;
                self.registers[reg.index()] = if operation::truthy(c) { a } else { b };
            }
            Instr::Jump(t) => next_pc = self.target(t)?,
            Instr::JumpAndLink(t) => {
                self.registers[RA] = (self.pc + 1) as f64;
                next_pc = self.target(t)?;
            }
            Instr::JumpReg(t) => next_pc = self.target(t)?,
            Instr::Branch(op, a, b, t) => {
                let a = self.value(a)?;
                let b = self.value(b)?;
                if branch_taken(*op, a, b) {
                    next_pc = self.target(t)?;
                }
            }
            Instr::BranchZero(on_zero, a, t) => {
                let a = self.value(a)?;
                if (a == 0.0) == *on_zero {
                    next_pc = self.target(t)?;
                }
            }
            Instr::Load(reg, dev, property) => {
                let value = self.device(dev)?.get(property);
                self.registers[reg.index()] = value;
            }
            Instr::Store(dev, property, a) => {
                let value = self.value(a)?;
                self.device_mut(dev)?.set(property, value);
            }
            Instr::LoadSlot(reg, dev, slot, property) => {
                let slot = self.value(slot)?;
                if slot < 0.0 {
                    return Err("INVALID SLOT INDEX".to_string());
                }
                let value = self
                    .device(dev)?
                    .get_slot(slot as usize, property)
                    .ok_or("INVALID SLOT INDEX")?;
                self.registers[reg.index()] = value;
            }
            Instr::LoadBatch(reg, type_hash, property, mode) => {
                let type_hash = self.value(type_hash)? as i64;
                let mode = self.value(mode)?;
                let mode = BatchMode::from_code(mode).ok_or("INVALID BATCH MODE")?;
                let values: Vec<f64> = self
                    .network()
                    .filter(|d| d.prefab_hash as i64 == type_hash)
                    .map(|d| d.get(property))
                    .collect();
                self.registers[reg.index()] = reduce(&values, mode);
            }
            Instr::StoreBatch(type_hash, property, a) => {
                let type_hash = self.value(type_hash)? as i64;
                let value = self.value(a)?;
                for device in self.network_mut() {
                    if device.prefab_hash as i64 == type_hash {
                        device.set(property, value);
                    }
                }
            }
            Instr::LoadBatchNamed(reg, type_hash, label_hash, property, mode) => {
                let type_hash = self.value(type_hash)? as i64;
                let label_hash = self.value(label_hash)? as i64;
                let mode = self.value(mode)?;
                let mode = BatchMode::from_code(mode).ok_or("INVALID BATCH MODE")?;
                let values: Vec<f64> = self
                    .network()
                    .filter(|d| {
                        d.prefab_hash as i64 == type_hash && d.label_hash as i64 == label_hash
                    })
                    .map(|d| d.get(property))
                    .collect();
                if values.is_empty() {
                    return Err(format!("NO DEVICE FOR NAME HASH {}", label_hash));
                }
                self.registers[reg.index()] = reduce(&values, mode);
            }
            Instr::StoreBatchNamed(type_hash, label_hash, property, a) => {
                let type_hash = self.value(type_hash)? as i64;
                let label_hash = self.value(label_hash)? as i64;
                let value = self.value(a)?;
                let mut matched = false;
                for device in self.network_mut() {
                    if device.prefab_hash as i64 == type_hash
                        && device.label_hash as i64 == label_hash
                    {
                        device.set(property, value);
                        matched = true;
                    }
                }
                if !matched {
                    return Err(format!("NO DEVICE FOR NAME HASH {}", label_hash));
                }
            }
            Instr::Push(a) => {
                let value = self.value(a)?;
                let sp = self.registers[SP];
                if !(0.0..STACK_SIZE as f64).contains(&sp) {
                    return Err("STACK OVERFLOW".to_string());
                }
                self.stack[sp as usize] = value;
                self.registers[SP] = sp + 1.0;
            }
            Instr::Pop(reg) => {
                let sp = self.registers[SP] - 1.0;
                if !(0.0..STACK_SIZE as f64).contains(&sp) {
                    return Err("STACK UNDERFLOW".to_string());
                }
                self.registers[reg.index()] = self.stack[sp as usize];
                self.registers[SP] = sp;
            }
            Instr::Peek(reg) => {
                let sp = self.registers[SP] - 1.0;
                if !(0.0..STACK_SIZE as f64).contains(&sp) {
                    return Err("STACK UNDERFLOW".to_string());
                }
                self.registers[reg.index()] = self.stack[sp as usize];
            }
            Instr::Get(reg, a) => {
                let address = self.value(a)?;
                if !(0.0..STACK_SIZE as f64).contains(&address) {
                    return Err("STACK INDEX OUT OF RANGE".to_string());
                }
                self.registers[reg.index()] = self.stack[address as usize];
            }
            Instr::Put(a, b) => {
                let address = self.value(a)?;
                let value = self.value(b)?;
                if !(0.0..STACK_SIZE as f64).contains(&address) {
                    return Err("STACK INDEX OUT OF RANGE".to_string());
                }
                self.stack[address as usize] = value;
            }
            Instr::Yield => {
                self.yielding = true;
            }
            Instr::Sleep(a) => {
                // a timed pause the caller converts to a tick budget;
                // the machine itself never blocks
                let seconds = self.value(a)?;
                self.sleeping = Some(seconds);
            }
            Instr::Hcf => {
                return Err("HALT AND CATCH FIRE".to_string());
            }
            Instr::Alias(..) | Instr::Define(..) => {
                // registered at load time
            }
        }
        self.pc = next_pc;
        Ok(())
    }

    fn value(&self, operand: &Operand) -> Result<f64, String> {
        match operand {
            Operand::Reg(reg) => Ok(self.registers[reg.index()]),
            Operand::Num(n) => Ok(*n),
            Operand::Name(name) => {
                if let Some(&value) = self.defines.get(name) {
                    return Ok(value);
                }
                if let Some(reg) = self.reg_aliases.get(name) {
                    return Ok(self.registers[reg.index()]);
                }
                if let Some(&line) = self.labels.get(name) {
                    return Ok(line as f64);
                }
                Err(format!("UNDEFINED SYMBOL {}", name))
            }
        }
    }

    fn target(&self, operand: &Operand) -> Result<usize, String> {
        let value = match operand {
            Operand::Name(name) => match self.labels.get(name) {
                Some(&line) => return Ok(line),
                None => self.value(operand)?,
            },
            _ => self.value(operand)?,
        };
        if value < 0.0 || value > self.lines.len() as f64 {
            return Err(format!("JUMP OUT OF RANGE {}", asm::fmt_num(value)));
        }
        Ok(value as usize)
    }

    fn device(&self, dev: &Dev) -> Result<&Device, String> {
        match dev {
            Dev::Pin(pin) => self.pins[*pin as usize]
                .as_ref()
                .ok_or(format!("NO DEVICE ON PIN d{}", pin)),
            Dev::Db => Ok(&self.housing),
            Dev::Name(name) => {
                let dev = self
                    .dev_aliases
                    .get(name)
                    .cloned()
                    .ok_or(format!("UNDEFINED DEVICE {}", name))?;
                self.device(&dev)
            }
        }
    }

    fn device_mut(&mut self, dev: &Dev) -> Result<&mut Device, String> {
        match dev {
            Dev::Pin(pin) => self.pins[*pin as usize]
                .as_mut()
                .ok_or(format!("NO DEVICE ON PIN d{}", pin)),
            Dev::Db => Ok(&mut self.housing),
            Dev::Name(name) => {
                let dev = self
                    .dev_aliases
                    .get(name)
                    .cloned()
                    .ok_or(format!("UNDEFINED DEVICE {}", name))?;
                self.device_mut(&dev)
            }
        }
    }

    fn network(&self) -> impl Iterator<Item = &Device> {
        self.pins
            .iter()
            .flatten()
            .chain(std::iter::once(&self.housing))
            .chain(self.named.iter())
    }

    fn network_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.pins
            .iter_mut()
            .flatten()
            .chain(std::iter::once(&mut self.housing))
            .chain(self.named.iter_mut())
    }
}

fn branch_taken(op: BranchOp, a: f64, b: f64) -> bool {
    match op {
        BranchOp::Beq => a == b,
        BranchOp::Bne => a != b,
        BranchOp::Blt => a < b,
        BranchOp::Ble => a <= b,
        BranchOp::Bgt => a > b,
        BranchOp::Bge => a >= b,
    }
}

fn reduce(values: &[f64], mode: BatchMode) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    match mode {
        BatchMode::Average => values.iter().sum::<f64>() / values.len() as f64,
        BatchMode::Sum => values.iter().sum(),
        BatchMode::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
        BatchMode::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(text: &str) -> Machine {
        let mut machine = Machine::new();
        let snapshot = machine.load(text);
        assert!(!snapshot.halted, "{:?}", snapshot.error_message);
        machine
    }

    #[test]
    fn test_step_and_registers() {
        let mut machine = loaded("move r0 5\nadd r1 r0 2");
        assert!(machine.step());
        assert_eq!(machine.register("r0"), Some(5.0));
        assert_eq!(machine.register("r1"), Some(0.0));
        machine.step();
        assert_eq!(machine.register("r1"), Some(7.0));
    }

    #[test]
    fn test_breakpoint_pauses_before_execution() {
        let mut machine = loaded("move r0 1\nmove r0 2\nmove r0 3");
        machine.add_breakpoint(2);
        let snapshot = machine.run(100);
        assert!(snapshot.paused);
        // line 2 has not executed yet
        assert_eq!(machine.register("r0"), Some(1.0));
        assert_eq!(snapshot.pc, 2);
        // resume executes line 2 without re-pausing on it
        let snapshot = machine.run(100);
        assert!(snapshot.halted);
        assert_eq!(machine.register("r0"), Some(3.0));
    }

    #[test]
    fn test_yield_stops_batch_once() {
        let mut machine = loaded("move r0 1\nyield\nmove r0 2");
        let snapshot = machine.run(100);
        assert!(snapshot.yielding);
        assert_eq!(machine.register("r0"), Some(1.0));
        let snapshot = machine.run(100);
        assert!(snapshot.halted);
        assert_eq!(machine.register("r0"), Some(2.0));
        // the yield executed exactly once
        assert_eq!(snapshot.instruction_count, 3);
    }

    #[test]
    fn test_run_budget_bounds_infinite_loop() {
        let mut machine = loaded("loop:\nadd r0 r0 1\nj loop");
        let snapshot = machine.run(50);
        assert!(!snapshot.halted);
        assert_eq!(snapshot.instruction_count, 50);
    }

    #[test]
    fn test_stack_faults_are_state() {
        let mut machine = loaded("pop r0");
        let snapshot = machine.run(10);
        assert!(snapshot.halted);
        assert!(snapshot.error_message.unwrap().contains("UNDERFLOW"));
    }

    #[test]
    fn test_device_load_store() {
        let mut machine = loaded("l r0 d0 Temperature\ns d1 On 1");
        machine.install(0, Device::new("StructureGasSensor").with_property("Temperature", 295.0));
        machine.install(1, Device::new("StructureWallHeater"));
        machine.run(10);
        assert_eq!(machine.register("r0"), Some(295.0));
        assert_eq!(
            machine.get_device_property(&DeviceSel::Pin(1), "On", None),
            1.0
        );
    }

    #[test]
    fn test_missing_pin_faults() {
        let mut machine = loaded("l r0 d3 Temperature");
        let snapshot = machine.run(10);
        assert!(snapshot.halted);
        assert!(snapshot.error_message.unwrap().contains("d3"));
    }

    #[test]
    fn test_batch_average() {
        let mut machine = loaded(&format!(
            "lb r0 {} Temperature 0",
            name_hash("StructureGasSensor")
        ));
        for value in [10.0, 20.0, 30.0] {
            machine
                .register_named(Device::new("StructureGasSensor").with_property("Temperature", value));
        }
        machine.run(10);
        assert_eq!(machine.register("r0"), Some(20.0));
    }

    #[test]
    fn test_unresolved_named_device_halts() {
        let mut machine = loaded(&format!(
            "lbn r0 {} {} On 0",
            name_hash("StructureFurnace"),
            name_hash("Smelter")
        ));
        let snapshot = machine.run(10);
        assert!(snapshot.halted);
        assert!(snapshot.error_message.is_some());
    }

    #[test]
    fn test_named_device_resolves() {
        let mut machine = loaded(&format!(
            "sbn {} {} On 1",
            name_hash("StructureFurnace"),
            name_hash("Smelter")
        ));
        machine.register_named(Device::named("StructureFurnace", "Smelter"));
        let snapshot = machine.run(10);
        assert!(snapshot.halted); // ran off the end cleanly
        assert!(snapshot.error_message.is_none());
        assert_eq!(
            machine.get_device_property(&DeviceSel::Label("Smelter".to_string()), "On", None),
            1.0
        );
    }

    #[test]
    fn test_jal_and_return() {
        let mut machine = loaded("jal sub\nmove r1 1\nj 6\nsub:\nj ra\nmove r2 9");
        machine.run(10);
        assert_eq!(machine.register("r1"), Some(1.0));
        assert_eq!(machine.register("r2"), Some(0.0));
    }

    #[test]
    fn test_reset_preserves_program_and_breakpoints() {
        let mut machine = loaded("move r0 42");
        machine.add_breakpoint(1);
        machine.run(10);
        machine.reset();
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.pc, 1);
        assert_eq!(machine.register("r0"), Some(0.0));
        assert_eq!(snapshot.breakpoints, vec![1]);
        // program still loaded: stepping past the breakpoint works
        machine.run(10);
        machine.run(10);
        assert_eq!(machine.register("r0"), Some(42.0));
    }

    #[test]
    fn test_set_register_invalid_name_faults() {
        let mut machine = loaded("yield");
        let snapshot = machine.set_register("r99", 1.0);
        assert!(snapshot.halted);
        assert!(snapshot.error_message.is_some());
    }

    #[test]
    fn test_sleep_is_recorded_not_blocking() {
        let mut machine = loaded("sleep 2.5\nmove r0 1");
        let snapshot = machine.run(10);
        assert_eq!(snapshot.sleeping, Some(2.5));
        assert_eq!(machine.register("r0"), Some(0.0));
        machine.run(10);
        assert_eq!(machine.register("r0"), Some(1.0));
    }

    #[test]
    fn test_alias_and_define_directives() {
        let mut machine = loaded("alias sensor d0\ndefine LIMIT 300\nl r0 sensor Temperature\nslt r1 r0 LIMIT");
        machine.install(0, Device::new("StructureGasSensor").with_property("Temperature", 250.0));
        machine.run(10);
        assert_eq!(machine.register("r0"), Some(250.0));
        assert_eq!(machine.register("r1"), Some(1.0));
    }
}
