use std::fmt;

/// Stationeers identifies prefab types and device labels by the CRC-32
/// of their name, reinterpreted as a signed 32-bit value.
pub fn name_hash(name: &str) -> i32 {
    crc::crc32::checksum_ieee(name.as_bytes()) as i32
}

/// Batch read reduction, encoded as the integer operand of `lb`/`lbn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Average,
    Sum,
    Minimum,
    Maximum,
}

impl BatchMode {
    pub fn from_code(code: f64) -> Option<BatchMode> {
        match code as i64 {
            0 => Some(BatchMode::Average),
            1 => Some(BatchMode::Sum),
            2 => Some(BatchMode::Minimum),
            3 => Some(BatchMode::Maximum),
            _ => None,
        }
    }

    pub fn code(&self) -> f64 {
        match self {
            BatchMode::Average => 0.0,
            BatchMode::Sum => 1.0,
            BatchMode::Minimum => 2.0,
            BatchMode::Maximum => 3.0,
        }
    }
}

/// Resolved device descriptor attached to ALIAS/DEVICE declarations and
/// to every device access during generation. Named targets stay hashes;
/// they are looked up by the runtime registry, never pinned at compile
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRef {
    Pin(u8),
    Housing,
    Batch(i32),
    Named(i32, i32),
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceRef::Pin(pin) => write!(f, "d{}", pin),
            DeviceRef::Housing => write!(f, "db"),
            DeviceRef::Batch(type_hash) => write!(f, "batch:{}", type_hash),
            DeviceRef::Named(type_hash, label_hash) => {
                write!(f, "named:{}:{}", type_hash, label_hash)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_signed() {
        let h = name_hash("StructureGasSensor");
        assert_eq!(h, name_hash("StructureGasSensor"));
        assert_ne!(h, name_hash("StructureFurnace"));
    }

    #[test]
    fn test_batch_mode_codes() {
        assert_eq!(BatchMode::from_code(0.0), Some(BatchMode::Average));
        assert_eq!(BatchMode::from_code(3.0), Some(BatchMode::Maximum));
        assert_eq!(BatchMode::from_code(4.0), None);
        assert_eq!(BatchMode::Sum.code(), 1.0);
    }
}
