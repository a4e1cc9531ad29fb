//! Protocol version exchange ([RFC 4253 section 4.2]).
//!
//! [RFC 4253 section 4.2]: https://datatracker.ietf.org/doc/html/rfc4253#section-4.2

#[derive(Clone, Copy, Debug)]
pub struct Identifier<'a>(&'a [u8]);

impl<'a> Identifier<'a> {
    pub const MAX_LEN: usize = 255 - b"\r\n".len();

    pub fn new(ident: &'a [u8]) -> Option<Self> {
        (ident.len() <= Self::MAX_LEN
            && ident.starts_with(b"SSH-")
            && !ident.iter().any(|&c| c == b'\r' || c == b'\n'))
        .then(|| Self(ident))
    }
}

impl AsRef<[u8]> for Identifier<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Outcome of scanning buffered input for the peer's identification line.
#[derive(Debug, PartialEq, Eq)]
pub enum Scan<'a> {
    /// No complete `SSH-` line has arrived yet.
    Incomplete,
    Found {
        /// Any lines the peer sent before its identification, line terminators included.
        header: &'a [u8],
        /// The identification line without its line terminator.
        version: &'a [u8],
        /// Number of bytes up to and including the identification line.
        consumed: usize,
    },
}

/// Look for the first complete line starting with `SSH-`.
///
/// Some older implementations terminate the line with a bare `\n`, which is accepted.
pub fn scan(data: &[u8]) -> Scan<'_> {
    let mut start = 0;
    while let Some(i) = data[start..].iter().position(|&c| c == b'\n') {
        let end = start + i;
        let line = &data[start..end];
        if line.starts_with(b"SSH-") {
            return Scan::Found {
                header: &data[..start],
                version: line.strip_suffix(b"\r").unwrap_or(line),
                consumed: end + 1,
            };
        }
        start = end + 1;
    }
    Scan::Incomplete
}

/// Whether the identification line declares protocol 2.0, or 1.99 for servers that
/// also speak the old protocol.
pub fn is_compatible(version: &[u8]) -> bool {
    version.starts_with(b"SSH-2.0-") || version.starts_with(b"SSH-1.99-")
}

/// Split a header into lines, stripping `\r\n` or `\n`.
pub fn header_lines(header: &[u8]) -> impl Iterator<Item = &[u8]> {
    header
        .split(|&c| c == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_banner() {
        assert_eq!(
            scan(b"SSH-2.0-test\r\n"),
            Scan::Found { header: b"", version: b"SSH-2.0-test", consumed: 14 }
        );
        assert!(is_compatible(b"SSH-2.0-test"));
    }

    #[test]
    fn bare_newline() {
        assert_eq!(
            scan(b"SSH-1.99-old\nxyz"),
            Scan::Found { header: b"", version: b"SSH-1.99-old", consumed: 13 }
        );
        assert!(is_compatible(b"SSH-1.99-old"));
    }

    #[test]
    fn old_protocol() {
        let Scan::Found { version, .. } = scan(b"SSH-1.0-test\r\n") else { panic!() };
        assert!(!is_compatible(version));
    }

    #[test]
    fn incomplete() {
        assert_eq!(scan(b""), Scan::Incomplete);
        assert_eq!(scan(b"SSH-2.0-te"), Scan::Incomplete);
        assert_eq!(scan(b"hello\r\nSSH-2.0"), Scan::Incomplete);
    }

    #[test]
    fn header_before_banner() {
        let data = b"Welcome\r\nto the host\nSSH-2.0-OpenSSH_9.0\r\n\0\0\0\x0c";
        let Scan::Found { header, version, consumed } = scan(data) else { panic!() };
        assert_eq!(version, b"SSH-2.0-OpenSSH_9.0");
        assert_eq!(&data[consumed..], b"\0\0\0\x0c");
        let mut lines = header_lines(header);
        assert_eq!(lines.next(), Some(&b"Welcome"[..]));
        assert_eq!(lines.next(), Some(&b"to the host"[..]));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn identifier_validation() {
        assert!(Identifier::new(b"SSH-2.0-evssh").is_some());
        assert!(Identifier::new(b"SSH-2.0-evssh\r\n").is_none());
        assert!(Identifier::new(b"nope").is_none());
        assert!(Identifier::new(&[b'S'; 254]).is_none());
    }
}
