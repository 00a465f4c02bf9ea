//! Fixed local ports and host-address resolution for containers.
//!
//! All Lodestar listeners bind loopback only. Ports are compile-time
//! constants: making them configurable would let two half-configured
//! processes talk past each other.

/// Control plane gRPC port.
pub const CONTROL_PLANE_PORT: u16 = 7410;

/// Managed workflow engine gRPC port.
pub const ENGINE_PORT: u16 = 7421;

/// Agent executor service port (inside and outside the container).
pub const EXECUTOR_PORT: u16 = 7430;

/// Host platform as seen by the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    /// Linux with `--network host`: loopback is shared with containers.
    LinuxHostNetwork,
    /// macOS or Windows: containers reach the host via `host.docker.internal`.
    DesktopVm,
}

impl HostPlatform {
    /// Detect the platform of the current build target.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::LinuxHostNetwork
        } else {
            Self::DesktopVm
        }
    }
}

/// Rewrite a host-side address so it is reachable from inside a container.
///
/// Every address handed to the executor container must pass through this
/// function — endpoints, callbacks, anything. On Linux host-network mode
/// loopback passes through unchanged; on macOS/Windows `localhost` and
/// `127.0.0.1` become `host.docker.internal`.
#[must_use]
pub fn resolve_host_address(address: &str, platform: HostPlatform) -> String {
    match platform {
        HostPlatform::LinuxHostNetwork => address.to_owned(),
        HostPlatform::DesktopVm => address
            .replace("127.0.0.1", "host.docker.internal")
            .replace("localhost", "host.docker.internal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_passthrough() {
        let addr = resolve_host_address("http://127.0.0.1:7421", HostPlatform::LinuxHostNetwork);
        assert_eq!(addr, "http://127.0.0.1:7421");
    }

    #[test]
    fn test_desktop_rewrites_loopback() {
        let addr = resolve_host_address("http://127.0.0.1:7421", HostPlatform::DesktopVm);
        assert_eq!(addr, "http://host.docker.internal:7421");
    }

    #[test]
    fn test_desktop_rewrites_localhost() {
        let addr = resolve_host_address("localhost:7410", HostPlatform::DesktopVm);
        assert_eq!(addr, "host.docker.internal:7410");
    }

    #[test]
    fn test_non_loopback_untouched() {
        let addr = resolve_host_address("https://example.com", HostPlatform::DesktopVm);
        assert_eq!(addr, "https://example.com");
    }
}
