use serde::Serialize;
use std::collections::BTreeMap;

/// ## Source map
///
/// Bidirectional correspondence between BASIC lines/symbols and the
/// emitted assembly lines/registers. Built in one pass when the final
/// line layout is known and immutable afterwards; the simulator's PC is
/// translated back to a source line through nothing but this.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    basic_to_asm: BTreeMap<usize, Vec<usize>>,
    asm_to_basic: BTreeMap<usize, usize>,
    variable_registers: BTreeMap<String, String>,
    alias_devices: BTreeMap<String, String>,
}

impl SourceMap {
    pub fn record_line(&mut self, basic_line: usize, asm_line: usize) {
        self.basic_to_asm
            .entry(basic_line)
            .or_default()
            .push(asm_line);
        self.asm_to_basic.insert(asm_line, basic_line);
    }

    pub fn record_register(&mut self, name: &str, register: &str) {
        self.variable_registers
            .insert(name.to_string(), register.to_string());
    }

    pub fn record_alias(&mut self, name: &str, device: &str) {
        self.alias_devices
            .insert(name.to_string(), device.to_string());
    }

    pub fn basic_line_for(&self, asm_line: usize) -> Option<usize> {
        self.asm_to_basic.get(&asm_line).copied()
    }

    pub fn asm_lines_for(&self, basic_line: usize) -> &[usize] {
        self.basic_to_asm
            .get(&basic_line)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn register_for(&self, name: &str) -> Option<&str> {
        self.variable_registers.get(name).map(|s| s.as_str())
    }

    pub fn device_for(&self, name: &str) -> Option<&str> {
        self.alias_devices.get(name).map(|s| s.as_str())
    }

    /// Forward and reverse maps must agree: every assembly line listed
    /// under a basic line maps back to that same basic line.
    pub fn is_consistent(&self) -> bool {
        self.basic_to_asm.iter().all(|(basic, asm_lines)| {
            asm_lines
                .iter()
                .all(|asm| self.asm_to_basic.get(asm) == Some(basic))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bidirectional_consistency() {
        let mut map = SourceMap::default();
        map.record_line(1, 1);
        map.record_line(1, 2);
        map.record_line(3, 3);
        assert_eq!(map.asm_lines_for(1), &[1, 2]);
        assert_eq!(map.basic_line_for(2), Some(1));
        assert!(map.is_consistent());
    }

    #[test]
    fn test_interchange_shape() {
        let mut map = SourceMap::default();
        map.record_line(1, 1);
        map.record_register("temp", "r0");
        map.record_alias("sensor", "d0");
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["basicToAsm"]["1"][0], 1);
        assert_eq!(json["asmToBasic"]["1"], 1);
        assert_eq!(json["variableRegisters"]["temp"], "r0");
        assert_eq!(json["aliasDevices"]["sensor"], "d0");
    }
}
