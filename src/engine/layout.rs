//! Address-range heuristic separating the program's own text from loader and
//! shared-library code.
//!
//! Assumes a non-PIE x86-64 binary linked at the classic low text address;
//! everything mapped at or above `shared_start` (ld.so, libc, vdso) is treated
//! as foreign code. Position-independent executables are not supported.

pub const DEFAULT_TEXT_START: u64 = 0x40_0000;
pub const DEFAULT_SHARED_START: u64 = 0x7000_0000_0000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressLayout {
    pub text_start: u64,
    pub shared_start: u64,
}

impl AddressLayout {
    /// Address belongs to the statically linked program image.
    pub fn is_user_text(&self, addr: u64) -> bool {
        addr >= self.text_start && addr < self.shared_start
    }

    /// Address belongs to dynamically mapped code (loader, shared libraries).
    pub fn is_shared_code(&self, addr: u64) -> bool {
        addr >= self.shared_start
    }
}

impl Default for AddressLayout {
    fn default() -> Self {
        Self {
            text_start: DEFAULT_TEXT_START,
            shared_start: DEFAULT_SHARED_START,
        }
    }
}
