//! Architecture support. x86_64-only per spec §1 — the other arch trees the
//! teacher carried (aarch64, riscv) are gone; `context`/`timer` are declared
//! inside `x86_64` and reach callers as `crate::arch::{context,timer}` through
//! this glob re-export.

pub mod x86_64;
pub use x86_64::*;
