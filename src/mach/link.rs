use super::asm::{AsmLine, Instr, Operand};
use crate::error;
use crate::lang::Error;
use std::collections::HashMap;

type Result<T> = std::result::Result<T, Error>;

/// ## Label resolution
///
/// Jumps are emitted with symbolic targets during generation; only once
/// the whole program exists can they be checked. This pass builds the
/// name -> position index and verifies every `j`/`jal`/branch target
/// against it, so an undefined GOTO surfaces exactly once, at the end,
/// and can never reach the machine as a dangling jump. Targets that are
/// already absolute line numbers pass through untouched.
///
/// `source_lines` carries the originating BASIC line per assembly line
/// so errors point at the source, not the assembly.
pub fn resolve(lines: &[AsmLine], source_lines: &[Option<usize>]) -> Result<HashMap<String, usize>> {
    let mut labels: HashMap<String, usize> = HashMap::new();
    for (index, line) in lines.iter().enumerate() {
        if let AsmLine::Label(name) = line {
            if labels.insert(name.clone(), index).is_some() {
                let at = source_line(source_lines, index);
                return Err(error!(DuplicateSymbol, at; "LABEL DEFINED TWICE"));
            }
        }
    }
    let mut defines: Vec<&str> = vec![];
    for line in lines {
        if let AsmLine::Instr(Instr::Define(name, _)) = line {
            defines.push(name);
        }
    }
    for (index, line) in lines.iter().enumerate() {
        let target = match line {
            AsmLine::Instr(Instr::Jump(t))
            | AsmLine::Instr(Instr::JumpAndLink(t))
            | AsmLine::Instr(Instr::Branch(_, _, _, t))
            | AsmLine::Instr(Instr::BranchZero(_, _, t)) => t,
            _ => continue,
        };
        if let Operand::Name(name) = target {
            if !labels.contains_key(name.as_str()) && !defines.contains(&name.as_str()) {
                let at = source_line(source_lines, index);
                return Err(error!(UndefinedLabel, at));
            }
        }
    }
    log::debug!("linked {} labels over {} lines", labels.len(), lines.len());
    Ok(labels)
}

fn source_line(source_lines: &[Option<usize>], index: usize) -> usize {
    source_lines.get(index).copied().flatten().unwrap_or(index + 1)
}

#[cfg(test)]
mod tests {
    use super::super::asm;
    use super::*;

    #[test]
    fn test_undefined_target_is_fatal() {
        let lines = asm::parse("j nowhere").unwrap();
        assert!(resolve(&lines, &[Some(3)]).is_err());
    }

    #[test]
    fn test_forward_and_backward_targets_resolve() {
        let lines = asm::parse("j down\nup:\nmove r0 1\ndown:\nbeqz r0 up").unwrap();
        let labels = resolve(&lines, &[None; 5]).unwrap();
        assert_eq!(labels["up"], 1);
        assert_eq!(labels["down"], 3);
    }

    #[test]
    fn test_duplicate_label() {
        let lines = asm::parse("a:\na:").unwrap();
        assert!(resolve(&lines, &[None; 2]).is_err());
    }

    #[test]
    fn test_numeric_target_passes() {
        let lines = asm::parse("j 0").unwrap();
        assert!(resolve(&lines, &[None]).is_ok());
    }
}
