#[macro_use]
extern crate bitflags;

pub mod align;
pub mod gpu;

pub use crate::align::*;
