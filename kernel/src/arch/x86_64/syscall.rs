//! x86_64 syscall ABI: `int 0x80`, not `SYSCALL`/`SYSRET`.
//!
//! The `SYSCALL` instruction reserves `rcx`/`r11` for the return
//! `rip`/`rflags`, which collides with this kernel's argument convention
//! (`rdi, rsi, rdx, rcx`). `int 0x80` has no such reservation: it's a
//! normal interrupt gate, so the fourth argument can
//! live in `rcx` like the first three live in `rdi`/`rsi`/`rdx`. The
//! entry stub itself is [`super::trap::syscall_entry`]; this module just
//! names the vector and re-exports it for `idt::init` to install.

pub const SYSCALL_VECTOR: u8 = 0x80;

pub use super::trap::syscall_entry;
