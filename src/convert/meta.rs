//! Per-directory metadata that has no place in a git tree entry: the raw
//! `svn:mergeinfo`/`svnmerge-integrated` property bytes, `svn:ignore` and
//! `svn:global-ignores` property bytes, and the set of immediate children
//! hidden by a `hide` dump action. Persisted as a blob referenced by the
//! reserved `METADATA_FILE_NAME` entry of every directory's svn tree.

use super::bin_ser_de::{self, DeserializeError};
use super::revrange::RangeSet;
use crate::FHashMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct DirMetadata {
    pub(super) mergeinfo: Vec<u8>,
    pub(super) svnmerge_integrated: Vec<u8>,
    pub(super) ignores: Vec<u8>,
    pub(super) global_ignores: Vec<u8>,
    pub(super) hidden: Vec<Vec<u8>>,
}

impl DirMetadata {
    pub(super) fn from_props(
        props: &FHashMap<Vec<u8>, Option<Vec<u8>>>,
        prev: Option<Self>,
    ) -> Self {
        let mut metadata = prev.unwrap_or_default();

        if let Some(value) = props.get(b"svn:mergeinfo".as_slice()) {
            metadata.mergeinfo = value.clone().unwrap_or_default();
        }
        if let Some(value) = props.get(b"svnmerge-integrated".as_slice()) {
            metadata.svnmerge_integrated = value.clone().unwrap_or_default();
        }
        if let Some(value) = props.get(b"svn:ignore".as_slice()) {
            metadata.ignores = value.clone().unwrap_or_default();
        }
        if let Some(value) = props.get(b"svn:global-ignores".as_slice()) {
            metadata.global_ignores = value.clone().unwrap_or_default();
        }

        metadata
    }

    pub(super) fn hide(&mut self, name: &[u8]) {
        if !self.hidden.iter().any(|n| n == name) {
            self.hidden.push(name.to_vec());
        }
    }

    pub(super) fn unhide(&mut self, name: &[u8]) {
        self.hidden.retain(|n| n != name);
    }

    pub(super) fn is_hidden(&self, name: &[u8]) -> bool {
        self.hidden.iter().any(|n| n == name)
    }

    pub(super) fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        bin_ser_de::serialize_byte_slice_into(&self.mergeinfo, &mut out);
        bin_ser_de::serialize_byte_slice_into(&self.svnmerge_integrated, &mut out);
        bin_ser_de::serialize_byte_slice_into(&self.ignores, &mut out);
        bin_ser_de::serialize_byte_slice_into(&self.global_ignores, &mut out);
        out.extend(self.hidden.len().to_ne_bytes());
        for name in &self.hidden {
            bin_ser_de::serialize_byte_slice_into(name, &mut out);
        }
        out
    }

    pub(super) fn deserialize(src: &[u8]) -> Option<Self> {
        Self::deserialize_inner(src).ok()
    }

    fn deserialize_inner(mut src: &[u8]) -> Result<Self, DeserializeError> {
        let mergeinfo = bin_ser_de::deserialize_byte_slice_from(&mut src)?;
        let svnmerge_integrated = bin_ser_de::deserialize_byte_slice_from(&mut src)?;
        let ignores = bin_ser_de::deserialize_byte_slice_from(&mut src)?;
        let global_ignores = bin_ser_de::deserialize_byte_slice_from(&mut src)?;
        let hidden_len = usize::from_ne_bytes(bin_ser_de::deserialize_byte_array_from(&mut src)?);
        let mut hidden = Vec::with_capacity(hidden_len);
        for _ in 0..hidden_len {
            hidden.push(bin_ser_de::deserialize_byte_slice_from(&mut src)?);
        }
        if !src.is_empty() {
            return Err(DeserializeError);
        }
        Ok(Self {
            mergeinfo,
            svnmerge_integrated,
            ignores,
            global_ignores,
            hidden,
        })
    }
}

/// One merge-source revision range, as `(start, end, non_inheritable)`. A
/// trailing `*` on a `svn:mergeinfo` range marks it non-inheritable: the
/// range applies to the path itself but must not propagate to its children,
/// so it is kept apart from the inheritable ranges rather than folded into
/// the same merged [`RangeSet`].
pub(super) type MergedRevs = Vec<(u32, u32, bool)>;

/// Parses `svn:mergeinfo` (and the legacy `svnmerge-integrated` property, which
/// uses a space-separated `path:revs` grammar instead of mergeinfo's
/// newline-separated one) into a `path -> merged rev-ranges` map. Ranges for
/// the same path coming from either property, or from multiple lines, are
/// merged (not merely concatenated) via [`RangeSet`], so overlapping or
/// adjacent ranges collapse into one.
pub(super) fn parse_mergeinfo(mergeinfo: &[u8], svnmerge_integrated: &[u8]) -> FHashMap<Vec<u8>, MergedRevs> {
    let mut result = FHashMap::default();

    for line in mergeinfo.split(|&c| c == b'\n') {
        if line.is_empty() {
            continue;
        }
        if let Some((path, ranges)) = parse_mergeinfo_line(line) {
            merge_ranges_into(&mut result, path, ranges);
        }
    }

    for entry in svnmerge_integrated.split(|&c| c == b' ') {
        if entry.is_empty() {
            continue;
        }
        if let Some((path, ranges)) = parse_mergeinfo_line(entry) {
            merge_ranges_into(&mut result, path, ranges);
        }
    }

    result
}

fn merge_ranges_into(map: &mut FHashMap<Vec<u8>, MergedRevs>, path: Vec<u8>, ranges: MergedRevs) {
    let entry = map.entry(path).or_default();
    entry.extend(ranges);

    let inheritable = RangeSet::from_ranges(
        entry
            .iter()
            .filter(|&&(_, _, non_inheritable)| !non_inheritable)
            .map(|&(lo, hi, _)| lo..=hi),
    );
    let non_inheritable = RangeSet::from_ranges(
        entry
            .iter()
            .filter(|&&(_, _, non_inheritable)| non_inheritable)
            .map(|&(lo, hi, _)| lo..=hi),
    );

    entry.clear();
    entry.extend(
        inheritable
            .ranges()
            .iter()
            .map(|r| (*r.start(), *r.end(), false)),
    );
    entry.extend(
        non_inheritable
            .ranges()
            .iter()
            .map(|r| (*r.start(), *r.end(), true)),
    );
}

fn parse_mergeinfo_line(line: &[u8]) -> Option<(Vec<u8>, MergedRevs)> {
    let sep_pos = line.iter().rposition(|&c| c == b':')?;
    let (raw_path, raw_ranges) = (&line[..sep_pos], &line[(sep_pos + 1)..]);

    let path = if raw_path.starts_with(b"/") {
        raw_path[1..].to_vec()
    } else {
        raw_path.to_vec()
    };

    let mut ranges = Vec::new();
    for raw_range in raw_ranges.split(|&c| c == b',') {
        if raw_range.is_empty() {
            continue;
        }
        let non_inheritable = raw_range.ends_with(b"*");
        let raw_range = raw_range.strip_suffix(b"*").unwrap_or(raw_range);
        let s = std::str::from_utf8(raw_range).ok()?;
        let (lo, hi) = if let Some((lo, hi)) = s.split_once('-') {
            (lo.parse::<u32>().ok()?, hi.parse::<u32>().ok()?)
        } else {
            let n = s.parse::<u32>().ok()?;
            (n, n)
        };
        if lo > hi {
            return None;
        }
        ranges.push((lo, hi, non_inheritable));
    }

    Some((path, ranges))
}

/// Translates `svn:ignore` / `svn:global-ignores` property bytes (one glob
/// pattern per line) into `.gitignore` lines. `global` patterns apply
/// recursively (`**/pattern`), non-global ones only to immediate children.
pub(super) fn svnignore_to_gitignore(raw: &[u8], global: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for line in raw.split(|&c| c == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if global {
            out.extend(b"**/");
        }
        out.extend(line);
        out.push(b'\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::parse_mergeinfo;

    #[test]
    fn parses_multiple_paths_and_ranges() {
        let result = parse_mergeinfo(b"/branches/feat:4-5,8\n/trunk:1-3\n", b"");
        assert_eq!(
            result[b"branches/feat".as_slice()],
            [(4, 5, false), (8, 8, false)]
        );
        assert_eq!(result[b"trunk".as_slice()], [(1, 3, false)]);
    }

    #[test]
    fn merges_overlapping_ranges_from_both_properties() {
        let result = parse_mergeinfo(b"/trunk:1-5\n", b"/trunk:3-8");
        assert_eq!(result[b"trunk".as_slice()], [(1, 8, false)]);
    }

    #[test]
    fn keeps_non_inheritable_ranges_distinct() {
        let result = parse_mergeinfo(b"/trunk:1-5,9*\n", b"");
        assert_eq!(result[b"trunk".as_slice()], [(1, 5, false), (9, 9, true)]);
    }
}
