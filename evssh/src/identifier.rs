use crate::error::{Error, Result};
use evssh_core::identifier::{self, Identifier, Scan};
use futures::io::{AsyncWrite, AsyncWriteExt};

/// Give up on a peer that sends this much without an identification line.
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// What the peer sent before its first binary packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerVersion {
    /// The identification line, without the line terminator.
    pub version: String,
    /// Lines sent before the identification line.
    pub header: Vec<String>,
}

impl PeerVersion {
    /// Look for the identification line in `data`.
    ///
    /// Returns the version and the number of bytes it spans, or `None` if more input is
    /// needed.
    pub fn detect(data: &[u8]) -> Result<Option<(Self, usize)>> {
        match identifier::scan(data) {
            Scan::Incomplete if data.len() > MAX_HEADER_LEN => {
                Err(Error::Version("no identification line received".into()))
            }
            Scan::Incomplete => Ok(None),
            Scan::Found { header, version, consumed } => {
                let version = String::from_utf8_lossy(version).into_owned();
                if !identifier::is_compatible(version.as_bytes()) {
                    return Err(Error::Version(version));
                }
                let header = identifier::header_lines(header)
                    .map(|l| String::from_utf8_lossy(l).into_owned())
                    .collect();
                Ok(Some((Self { version, header }, consumed)))
            }
        }
    }
}

/// Write our identification line.
pub async fn send<Io>(identifier: Identifier<'_>, io: &mut Io) -> Result<()>
where
    Io: AsyncWrite + Unpin + ?Sized,
{
    io.write_all(identifier.as_ref()).await?;
    io.write_all(b"\r\n").await?;
    io.flush().await?;
    Ok(())
}
