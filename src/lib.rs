pub mod catalog;
pub mod constants;
pub mod density;
pub mod estimator;
pub mod snhost_errors;
pub mod surface_brightness;
