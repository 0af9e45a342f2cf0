//! Driver for the AXI DMA scatter-gather engine found in FPGA soft SoCs.
//!
//! See [`axidma`] for the driver itself. The crate is `no_std` and allocation free; hardware
//! access goes through small traits so the driver runs against memory-mapped registers as well
//! as against simulated hardware on the host.
//!
//! # Features
//!
//! - `log`: log through the `log` crate
//! - `defmt`: log through `defmt`
//! - `cortex-m`: NVIC interrupt control and `dsb` barriers on Cortex-M cores
//! - `dcache`: data cache maintenance through the Cortex-M7 SCB, implies `cortex-m`
#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Must come first so the logging macros are visible to every other module
pub(crate) mod fmt;

pub mod axidma;
pub mod delay;
pub mod prelude;
pub mod time;

mod sealed {
    pub trait Sealed {}
}
pub(crate) use sealed::Sealed;
