//! Executable file format readers

pub mod elf;
