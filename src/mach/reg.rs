use super::asm::Reg;

/// ## Register allocation
///
/// Variables take registers from r0 upward in first-use order, which
/// makes allocation deterministic across compiles of identical source.
/// Expression temporaries are handed out from r15 downward by the
/// generator; when the two regions meet, further variables clamp to
/// r15 and a register-pressure warning is raised instead of failing
/// (the 128-line budget is almost always the binding constraint first).
#[derive(Debug, Default)]
pub struct Allocator {
    order: Vec<(String, u8)>,
    next: u8,
    clamped: bool,
}

impl Allocator {
    pub fn new() -> Allocator {
        Allocator::default()
    }

    pub fn get(&self, name: &str) -> Option<Reg> {
        self.order
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, r)| Reg::R(r))
    }

    pub fn get_or_assign(&mut self, name: &str) -> Reg {
        if let Some(reg) = self.get(name) {
            return reg;
        }
        let reg = if self.next < 16 {
            self.next
        } else {
            self.clamped = true;
            15
        };
        self.order.push((name.to_string(), reg));
        if self.next < 16 {
            self.next += 1;
        }
        log::debug!("assigned {} -> r{}", name, reg);
        Reg::R(reg)
    }

    /// Count of registers holding variables; temporaries must stay
    /// above this.
    pub fn low_water(&self) -> u8 {
        self.next
    }

    pub fn clamped(&self) -> bool {
        self.clamped
    }

    /// Assignments in first-use order, for the source map.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, Reg)> {
        self.order.iter().map(|(n, r)| (n.as_str(), Reg::R(*r)))
    }
}
