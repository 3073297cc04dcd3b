pub mod bocpd;
pub mod cusum;

pub use bocpd::{BocpdConfig, BocpdDetector, BocpdUpdate};
pub use cusum::{CusumConfig, CusumDetector, CusumUpdate};
