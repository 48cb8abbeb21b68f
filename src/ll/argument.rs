//! Argument decomposition for wire payloads.
//!
//! Helper to decompose a payload byte slice into the packed structures of
//! [`super::proto`]. Every wire type is `Unaligned`, so fetching can only
//! fail by running out of data, never on alignment.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// An iterator that fetches typed arguments from a byte slice.
pub(crate) struct ArgumentIterator<'a> {
    data: &'a [u8],
}

impl<'a> ArgumentIterator<'a> {
    /// Create a new argument iterator for the given byte slice.
    pub(crate) fn new(data: &'a [u8]) -> ArgumentIterator<'a> {
        ArgumentIterator { data }
    }

    /// Returns the size of the remaining data.
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Fetch a slice of all remaining bytes.
    pub(crate) fn fetch_all(&mut self) -> &'a [u8] {
        let bytes = self.data;
        self.data = &[];
        bytes
    }

    /// Fetch a typed argument. Returns `None` if there's not enough data left.
    pub(crate) fn fetch<T: FromBytes + KnownLayout + Immutable + Unaligned>(
        &mut self,
    ) -> Option<&'a T> {
        match zerocopy::Ref::<_, T>::from_prefix(self.data) {
            Ok((x, rest)) => {
                self.data = rest;
                Some(zerocopy::Ref::into_ref(x))
            }
            Err(_) => None,
        }
    }

    /// Fetch a slice of typed arguments. Returns `None` if there's not enough
    /// data left.
    pub(crate) fn fetch_slice<T: FromBytes + Immutable + Unaligned>(
        &mut self,
        count: usize,
    ) -> Option<&'a [T]> {
        match zerocopy::Ref::<_, [T]>::from_prefix_with_elems(self.data, count) {
            Ok((x, rest)) => {
                self.data = rest;
                Some(zerocopy::Ref::into_ref(x))
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::proto::CloseRequest;
    use super::super::proto::FilesInfo;
    use super::*;

    const TEST_DATA: [u8; 8] = [0x4b, 0x00, 0x00, 0x01, 0x00, 0x62, 0x61, 0x72];

    #[test]
    fn all_data() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let _: &CloseRequest = it.fetch().unwrap();
        assert_eq!(it.fetch_all(), [0x62, 0x61, 0x72]);
        assert_eq!(it.len(), 0);
    }

    #[test]
    fn generic_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arg: &CloseRequest = it.fetch().unwrap();
        assert_eq!(arg.cmd, 0x4b);
        assert_eq!(arg.fcb.get(), 0x100);
        assert_eq!(it.len(), 3);
    }

    #[test]
    fn out_of_data() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arg: Option<&FilesInfo> = it.fetch();
        assert!(arg.is_none());
        assert_eq!(it.len(), TEST_DATA.len());
    }

    #[test]
    fn typed_slice() {
        let raw = [0u8; 64];
        let mut it = ArgumentIterator::new(&raw);
        let infos: &[FilesInfo] = it.fetch_slice(2).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(it.len(), 0);
        assert!(ArgumentIterator::new(&raw).fetch_slice::<FilesInfo>(3).is_none());
    }
}
