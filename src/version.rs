/// Version of the library in `major.minor.patch` form
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Vendor string reported via device identification
pub fn vendor() -> &'static str {
    "polbus project"
}

/// Product name reported via device identification
pub fn product_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}
