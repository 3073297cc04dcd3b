pub mod calibration;
pub mod changepoint;
pub mod config;
pub mod conformal;
pub mod decay;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod gate;
pub mod indicator;
pub mod model;
pub mod regime;
pub mod replay;
pub mod risk;
