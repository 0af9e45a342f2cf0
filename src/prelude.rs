//! Prelude

pub use crate::axidma::{
    CacheMaintenance as _axi_dma_hal_axidma_CacheMaintenance,
    InterruptControl as _axi_dma_hal_axidma_InterruptControl,
    Registers as _axi_dma_hal_axidma_Registers,
};

pub use fugit::{ExtU32 as _, RateExtU32 as _};
