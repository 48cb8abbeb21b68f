//! Guest path translation and 8.3 wildcard matching.
//!
//! Guest paths arrive as a [`NameBuf`]: directory components separated by
//! `0x09`, plus a split main name and extension. Translation to a host path
//! re-encodes the bytes; matching stays entirely in the guest byte space.

use std::path::Path;
use std::path::PathBuf;

use crate::dos::DosError;
use crate::encoding;
use crate::ll::proto::NameBuf;
use crate::ll::proto::PATH_SEPARATOR;

/// Packed search-key length: 18 main-name bytes plus 3 extension bytes.
pub(crate) const KEY_LEN: usize = 21;
const MAIN_LEN: usize = 18;

/// Bytes a guest filename may never contain (beyond control bytes).
const REJECT: &[u8] = b"/\\,;<=>[]|";

/// Assembles the host path for a guest name block under `root`.
///
/// With `full` the flattened file name is appended; without it only the
/// directory path is produced. Re-encoding failure reports `NODIR`.
pub(crate) fn host_path(root: &Path, nb: &NameBuf, full: bool) -> Result<PathBuf, DosError> {
    let mut guest = Vec::with_capacity(88);
    for &b in nb.path_bytes() {
        if b == PATH_SEPARATOR {
            if guest.last() != Some(&b'/') {
                guest.push(b'/');
            }
        } else {
            guest.push(b);
        }
    }
    if full {
        if guest.last() != Some(&b'/') {
            guest.push(b'/');
        }
        guest.extend_from_slice(&flatten_name(nb));
    }
    let rel = encoding::to_host(&guest).ok_or(DosError::NODIR)?;
    let mut path = root.to_path_buf();
    let rel = rel.trim_matches('/');
    if !rel.is_empty() {
        path.push(rel);
    }
    Ok(path)
}

/// Flattens the split name block into `name.ext` guest bytes: trailing
/// `0x00`/`0x20` padding stripped, the dot omitted for an empty extension.
pub(crate) fn flatten_name(nb: &NameBuf) -> Vec<u8> {
    let mut name = Vec::with_capacity(22);
    name.extend_from_slice(&nb.name1);
    name.extend_from_slice(&nb.name2);
    while matches!(name.last(), Some(0x00 | 0x20)) {
        name.pop();
    }
    let mut ext: &[u8] = &nb.ext;
    while matches!(ext.last(), Some(0x00 | 0x20)) {
        ext = &ext[..ext.len() - 1];
    }
    if !ext.is_empty() {
        name.push(b'.');
        name.extend_from_slice(ext);
    }
    name
}

fn zero_padding(region: &mut [u8], pad: &[u8]) {
    for b in region.iter_mut().rev() {
        if *b == 0 || pad.contains(b) {
            *b = 0;
        } else {
            break;
        }
    }
}

/// The 21-byte search key built from a `files` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MatchKey([u8; KEY_LEN]);

impl MatchKey {
    /// Builds and normalizes the key: the short-form wildcard fixup, padding
    /// zeroed, ASCII case folded with 2-byte sequences left alone.
    pub(crate) fn from_namebuf(nb: &NameBuf) -> MatchKey {
        let mut key = [0u8; KEY_LEN];
        key[..8].copy_from_slice(&nb.name1);
        // `1234567?` with an empty extended region means the guest expanded
        // a short-form `*`; the extended region matches anything.
        if nb.name1[7] == b'?' && nb.name2[0] == 0x00 {
            key[8..MAIN_LEN].fill(b'?');
        } else {
            key[8..MAIN_LEN].copy_from_slice(&nb.name2);
        }
        key[MAIN_LEN..].copy_from_slice(&nb.ext);
        zero_padding(&mut key[..MAIN_LEN], &[0x20]);
        zero_padding(&mut key[MAIN_LEN..], &[0x20]);
        encoding::fold_case(&mut key[..MAIN_LEN]);
        encoding::fold_case(&mut key[MAIN_LEN..]);
        MatchKey(key)
    }

    /// True when every position accepts any byte (the `*.*` shape).
    pub(crate) fn is_all_wildcards(&self) -> bool {
        self.0.iter().all(|&b| b == b'?' || b == 0)
    }

    /// Compares the key against a packed candidate, `?` matching any byte
    /// and literals matching case-insensitively in ASCII.
    pub(crate) fn matches(&self, packed: &[u8; KEY_LEN]) -> bool {
        region_matches(&self.0[..MAIN_LEN], &packed[..MAIN_LEN])
            && region_matches(&self.0[MAIN_LEN..], &packed[MAIN_LEN..])
    }
}

fn region_matches(key: &[u8], cand: &[u8]) -> bool {
    let mut trail = false;
    for (&k, &c) in key.iter().zip(cand) {
        // trailing bytes of 2-byte sequences are never case-folded
        let folded = if trail { c } else { c.to_ascii_lowercase() };
        trail = !trail && encoding::is_lead_byte(c);
        if k != b'?' && k != folded {
            return false;
        }
    }
    true
}

/// A host directory entry packed for matching.
#[derive(Debug)]
pub(crate) struct Candidate {
    pub(crate) packed: [u8; KEY_LEN],
    /// `name.ext` guest bytes for the guest-facing directory record.
    pub(crate) display: Vec<u8>,
}

/// Re-encodes a host file name and splits it into the packed 8.3(+10)
/// shape. `None` when the name cannot be offered to the guest: not
/// representable in the guest encoding, containing forbidden bytes, or
/// longer than the guest name fields allow.
pub(crate) fn candidate(host_name: &str) -> Option<Candidate> {
    let guest = encoding::to_guest(host_name)?;
    if guest.is_empty() || guest[0] == b'-' {
        return None;
    }
    if guest.iter().any(|&b| b <= 0x1f || REJECT.contains(&b)) {
        return None;
    }
    let (main, ext) = split_name(&guest);
    if main.is_empty() || main.len() > MAIN_LEN || ext.len() > 3 {
        return None;
    }
    let mut packed = [0u8; KEY_LEN];
    packed[..main.len()].copy_from_slice(main);
    packed[MAIN_LEN..MAIN_LEN + ext.len()].copy_from_slice(ext);
    let mut display = Vec::with_capacity(22);
    display.extend_from_slice(main);
    if !ext.is_empty() {
        display.push(b'.');
        display.extend_from_slice(ext);
    }
    Some(Candidate { packed, display })
}

// The extension starts at the last '.' found within four bytes of the end;
// any earlier dot stays part of the main name.
fn split_name(guest: &[u8]) -> (&[u8], &[u8]) {
    if let Some(dot) = guest.iter().rposition(|&b| b == b'.') {
        if dot + 4 >= guest.len() && dot > 0 {
            return (&guest[..dot], &guest[dot + 1..]);
        }
    }
    (guest, &[])
}
