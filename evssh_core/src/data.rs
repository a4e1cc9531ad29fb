//! SSH data types ([RFC 4251 section 5]).
//!
//! [RFC 4251 section 5]: https://datatracker.ietf.org/doc/html/rfc4251#section-5

use core::{fmt, str};

/// A comma-separated list of algorithm names, e.g. `"aes128-ctr,aes256-ctr"`.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct NameList<'a>(&'a str);

impl<'a> NameList<'a> {
    pub fn iter(&self) -> impl Iterator<Item = &'a str> {
        let s = self.0;
        s.split(',').filter(move |_| !s.is_empty())
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.iter().any(|n| n == name)
    }
}

impl<'a> TryFrom<&'a [u8]> for NameList<'a> {
    type Error = InvalidNameList;

    fn try_from(list: &'a [u8]) -> Result<Self, Self::Error> {
        let s = str::from_utf8(list).map_err(|_| InvalidNameList::NotAscii)?;
        if !s.is_ascii() {
            return Err(InvalidNameList::NotAscii);
        }
        if !s.is_empty() && s.split(',').any(str::is_empty) {
            return Err(InvalidNameList::EmptyName);
        }
        Ok(Self(s))
    }
}

impl<'a, const N: usize> TryFrom<&'a [u8; N]> for NameList<'a> {
    type Error = InvalidNameList;

    fn try_from(list: &'a [u8; N]) -> Result<Self, Self::Error> {
        Self::try_from(&list[..])
    }
}

impl<'a> From<NameList<'a>> for &'a str {
    fn from(s: NameList<'a>) -> Self {
        s.0
    }
}

impl fmt::Debug for NameList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidNameList {
    EmptyName,
    NotAscii,
}

/// Reads SSH data types from the front of a buffer.
pub(crate) struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self(data)
    }

    pub fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let b = self.0.get(..n)?;
        self.0 = &self.0[n..];
        Some(b)
    }

    pub fn array<const N: usize>(&mut self) -> Option<&'a [u8; N]> {
        self.bytes(N)?.try_into().ok()
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|b| b[0])
    }

    pub fn bool(&mut self) -> Option<bool> {
        self.u8().map(|b| b != 0)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.array().map(|b| u32::from_be_bytes(*b))
    }

    pub fn string(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.u32()?).ok()?;
        self.bytes(len)
    }

    pub fn name_list(&mut self) -> Option<Result<NameList<'a>, InvalidNameList>> {
        self.string().map(NameList::try_from)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Writes SSH data types into a fixed buffer. Every method returns `None` once the buffer is
/// full.
pub(crate) struct Writer<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn bytes(&mut self, data: &[u8]) -> Option<()> {
        let end = self.len.checked_add(data.len())?;
        self.buf.get_mut(self.len..end)?.copy_from_slice(data);
        self.len = end;
        Some(())
    }

    pub fn u8(&mut self, value: u8) -> Option<()> {
        self.bytes(&[value])
    }

    pub fn bool(&mut self, value: bool) -> Option<()> {
        self.u8(value.into())
    }

    pub fn u32(&mut self, value: u32) -> Option<()> {
        self.bytes(&value.to_be_bytes())
    }

    pub fn string(&mut self, s: &[u8]) -> Option<()> {
        self.u32(u32::try_from(s.len()).ok()?)?;
        self.bytes(s)
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_list() {
        let list = NameList::try_from(b"foo,bar,baz").unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), ["foo", "bar", "baz"]);
        assert!(list.contains("bar"));
        assert!(!list.contains("ba"));
    }

    #[test]
    fn name_list_empty_name() {
        for l in [&b"foo,,bar"[..], b",foo", b"foo,", b","] {
            assert_eq!(NameList::try_from(l).unwrap_err(), InvalidNameList::EmptyName);
        }
    }

    #[test]
    fn empty_name_list() {
        assert_eq!(NameList::try_from(b"").unwrap().iter().next(), None);
    }

    #[test]
    fn name_list_not_ascii() {
        assert_eq!(
            NameList::try_from(b"foo,\xb5,bar").unwrap_err(),
            InvalidNameList::NotAscii
        );
        assert_eq!(
            NameList::try_from("foo,\u{e9}".as_bytes()).unwrap_err(),
            InvalidNameList::NotAscii
        );
    }

    #[test]
    fn string_length_past_end() {
        assert_eq!(Reader::new(&[0, 0, 0, 3, b'a', b'b']).string(), None);
        assert_eq!(Reader::new(&[0xff, 0xff, 0xff, 0xff]).string(), None);
        let mut r = Reader::new(&[0, 0, 0, 1, b'a', b'b']);
        assert_eq!(r.string(), Some(&b"a"[..]));
        assert_eq!(r.u8(), Some(b'b'));
        assert!(r.is_empty());
    }

    #[test]
    fn writer_full() {
        let mut buf = [0; 6];
        let mut w = Writer::new(&mut buf);
        assert_eq!(w.string(b"ab"), Some(()));
        assert_eq!(w.u8(1), None);
        assert_eq!(w.len(), 6);
        assert_eq!(buf, [0, 0, 0, 2, b'a', b'b']);
    }
}
