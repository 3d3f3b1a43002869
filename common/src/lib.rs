pub mod file_utils;
pub mod log_setup;

pub use file_utils::{field_product_path, field_root, sidecar_path};
