//! Build-time metadata embedded by the build script.

/// `git describe` output at build time, or `"unknown"` outside a checkout.
pub const GIT_HASH: &str = env!("MSGPASS_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("MSGPASS_BUILD_TIMESTAMP");

/// The cargo profile the binary was built with.
pub const BUILD_PROFILE: &str = env!("MSGPASS_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string including the git revision and profile,
/// e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
