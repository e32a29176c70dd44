pub mod addressing;
pub mod cpu;
pub mod ifu;
pub mod interrupt;
pub mod io;
pub mod isa;
pub mod loader;
pub mod mmu;
pub mod privilege_level;
pub mod process;
pub mod ram;
pub mod registers;

pub use cpu::{CPUConfig, CPUError, Tick, CPU};
pub use interrupt::Interrupt;
pub use loader::{assemble_image, LoadError};
