//! Weekly FPL feature capture, reconciliation, and points prediction.

pub mod dataset;
pub mod forest;
pub mod fpl_api;
pub mod http_client;
pub mod modelling;
pub mod pipeline;
pub mod player_info;
pub mod pre_scaler;
pub mod reconcile;
pub mod run;
pub mod scaler;
pub mod store;
