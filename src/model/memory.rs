// src/model/memory.rs

//! The config memory scalar: a byte count that displays in the binary
//! units the server's configuration layer uses.

/// A quantity of memory in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigMemory(pub i64);

impl ConfigMemory {
    pub fn bytes(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ConfigMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const UNITS: [(i64, &str); 4] = [
            (1 << 40, "TiB"),
            (1 << 30, "GiB"),
            (1 << 20, "MiB"),
            (1 << 10, "KiB"),
        ];
        let bytes = self.0;
        for (size, suffix) in UNITS {
            if bytes != 0 && bytes % size == 0 {
                return write!(f, "{}{suffix}", bytes / size);
            }
        }
        write!(f, "{bytes}B")
    }
}
