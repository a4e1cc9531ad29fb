use crate::state::RekeyLimits;

/// Per-connection settings, passed to [`Session::start`](crate::Session::start).
#[derive(Clone, Debug)]
pub struct Config {
    /// Our identification line, without the trailing CR LF.
    pub identifier: String,
    pub rekey_limits: RekeyLimits,
    /// Largest `packet_length` accepted from the peer.
    pub max_packet_length: usize,
    /// Name of the remote host, used for host key verification and log fields.
    pub host: String,
}

impl Config {
    pub const DEFAULT_IDENTIFIER: &'static str =
        concat!("SSH-2.0-evssh_", env!("CARGO_PKG_VERSION_MAJOR"), ".", env!("CARGO_PKG_VERSION_MINOR"));
    pub const DEFAULT_MAX_PACKET_LENGTH: usize = 256 * 1024;

    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), ..Default::default() }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identifier: Self::DEFAULT_IDENTIFIER.into(),
            rekey_limits: RekeyLimits::default(),
            max_packet_length: Self::DEFAULT_MAX_PACKET_LENGTH,
            host: String::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::new("example.org");
        assert_eq!(c.identifier, "SSH-2.0-evssh_0.1");
        assert_eq!(c.host, "example.org");
        assert_eq!(c.max_packet_length, 256 * 1024);
        assert_eq!(c.rekey_limits.bytes, 1 << 30);
    }
}
