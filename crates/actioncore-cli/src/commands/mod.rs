pub mod metrics;
pub mod run;
pub mod validate;
