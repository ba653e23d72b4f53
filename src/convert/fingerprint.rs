//! Structural content fingerprint, kept deliberately separate from git's own
//! object id. Two objects that end up as distinct git blobs/trees (different
//! delta-base hints, different serialization of the metadata sentinel blob)
//! can still carry the same structural fingerprint when their *meaningful*
//! content — data bytes, versioned properties, child fingerprints — agrees;
//! the intern table then hands back the first git object id ever associated
//! with that fingerprint instead of writing a second, redundant object.
//!
//! Grammar (all lines are plain bytes, no trailing padding):
//!   `["hidden "] <kind-tag> <prop-lines> [<item-lines>] <attr-lines>`
//!   kind-tag  := "OBJECT\n" | "TREE\n" | "BLOB " <len> "\n" <20-byte sha1 of data>
//!   prop-line := "PROP: " <name> " " <len> "\n" <bytes>, sorted by name
//!   item-line := "ITEM: " <name> "\n" <20-byte child fingerprint>, sorted by name
//!   attr-line := "ATTR: " <name> " " <len> "\n" <bytes>, sorted by name
//! The whole byte string is SHA-1 hashed to produce the fingerprint itself.

use sha1::{Digest, Sha1};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(super) struct Fingerprint([u8; 20]);

impl Fingerprint {
    pub(super) fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub(super) fn to_hex(self) -> String {
        let mut s = String::with_capacity(40);
        for b in self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    /// Used only when a referenced object predates fingerprint tracking
    /// (there shouldn't be any in this importer, since every object is
    /// written through [`blob_fingerprint`]/[`tree_fingerprint`], but a
    /// deterministic fallback is safer than panicking on a lookup miss).
    pub(super) fn fallback(oid: gix_hash::ObjectId) -> Self {
        Self(Sha1::digest(oid.as_bytes()).into())
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

fn push_len_prefixed(buf: &mut Vec<u8>, tag: &str, name: &[u8], value: &[u8]) {
    buf.extend_from_slice(tag.as_bytes());
    buf.extend_from_slice(name);
    buf.push(b' ');
    buf.extend_from_slice(value.len().to_string().as_bytes());
    buf.push(b'\n');
    buf.extend_from_slice(value);
}

fn push_props(buf: &mut Vec<u8>, props: &[(Vec<u8>, Vec<u8>)]) {
    let mut sorted: Vec<&(Vec<u8>, Vec<u8>)> = props.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in sorted {
        push_len_prefixed(buf, "PROP: ", name, value);
    }
}

fn push_attrs(buf: &mut Vec<u8>, attrs: &[(Vec<u8>, Vec<u8>)]) {
    let mut sorted: Vec<&(Vec<u8>, Vec<u8>)> = attrs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, value) in sorted {
        push_len_prefixed(buf, "ATTR: ", name, value);
    }
}

/// `items` entries are `(name, child fingerprint, hidden-at-this-site)`; the
/// `hidden` flag is per parent-child edge (a `hide` dump action only hides a
/// name inside one particular directory listing), not per object, so it is
/// folded into the child's fingerprint at the `ITEM:` line rather than
/// stored on `Fingerprint` itself.
pub(super) fn tree_fingerprint(
    props: &[(Vec<u8>, Vec<u8>)],
    items: &[(Vec<u8>, Fingerprint, bool)],
    attrs: &[(Vec<u8>, Vec<u8>)],
) -> Fingerprint {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"TREE\n");
    push_props(&mut buf, props);

    let mut sorted: Vec<&(Vec<u8>, Fingerprint, bool)> = items.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, fp, hidden) in sorted {
        buf.extend_from_slice(b"ITEM: ");
        buf.extend_from_slice(name);
        buf.push(b'\n');
        if *hidden {
            buf.extend_from_slice(&hide(*fp).0);
        } else {
            buf.extend_from_slice(&fp.0);
        }
    }

    push_attrs(&mut buf, attrs);

    Fingerprint(Sha1::digest(&buf).into())
}

pub(super) fn blob_fingerprint(data: &[u8], props: &[(Vec<u8>, Vec<u8>)]) -> Fingerprint {
    let data_sha1 = Sha1::digest(data);

    let mut buf = Vec::new();
    buf.extend_from_slice(format!("BLOB {}\n", data.len()).as_bytes());
    buf.extend_from_slice(&data_sha1);
    push_props(&mut buf, props);
    push_attrs(&mut buf, &[]);

    Fingerprint(Sha1::digest(&buf).into())
}

/// Marks a fingerprint `hidden` where it is referenced (see `tree_fingerprint`
/// above): re-hashes the canonical fingerprint behind the `"hidden "` prefix
/// so a hidden reference to an object never collides with a visible one, yet
/// still changes deterministically with the object it refers to.
fn hide(fp: Fingerprint) -> Fingerprint {
    let mut buf = Vec::with_capacity(7 + 20);
    buf.extend_from_slice(b"hidden ");
    buf.extend_from_slice(&fp.0);
    Fingerprint(Sha1::digest(&buf).into())
}

/// Maps structural fingerprints to the git object id first associated with
/// them. `finalize`/re-finalize always returns the canonical instance
/// (invariant I1): once a fingerprint has an object id, every later request
/// for the same fingerprint gets that same id back instead of writing a
/// fresh, structurally-redundant object.
pub(super) struct InternTable {
    table: crate::FHashMap<Fingerprint, gix_hash::ObjectId>,
}

impl InternTable {
    pub(super) fn new() -> Self {
        Self {
            table: crate::FHashMap::default(),
        }
    }

    #[inline]
    pub(super) fn len(&self) -> usize {
        self.table.len()
    }

    pub(super) fn get(&self, fp: &Fingerprint) -> Option<gix_hash::ObjectId> {
        self.table.get(fp).copied()
    }

    /// Returns the already-interned id for `fp`, or runs `make_oid` to
    /// create one and interns it.
    pub(super) fn finalize(
        &mut self,
        fp: Fingerprint,
        make_oid: impl FnOnce() -> Result<gix_hash::ObjectId, super::ConvertError>,
    ) -> Result<gix_hash::ObjectId, super::ConvertError> {
        if let Some(&oid) = self.table.get(&fp) {
            return Ok(oid);
        }
        let oid = make_oid()?;
        self.table.insert(fp, oid);
        Ok(oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_fingerprint_is_stable() {
        let a = blob_fingerprint(b"hello", &[]);
        let b = blob_fingerprint(b"hello", &[]);
        assert_eq!(a, b);

        let c = blob_fingerprint(b"hello!", &[]);
        assert_ne!(a, c);
    }

    #[test]
    fn blob_fingerprint_depends_on_props() {
        let a = blob_fingerprint(b"hello", &[]);
        let b = blob_fingerprint(b"hello", &[(b"svn:executable".to_vec(), b"*".to_vec())]);
        assert_ne!(a, b);
    }

    // I2: insertion order of tree items/props doesn't affect the fingerprint.
    #[test]
    fn tree_fingerprint_is_order_independent() {
        let fp_a = blob_fingerprint(b"a", &[]);
        let fp_b = blob_fingerprint(b"b", &[]);

        let items_1 = [
            (b"a".to_vec(), fp_a, false),
            (b"b".to_vec(), fp_b, false),
        ];
        let items_2 = [
            (b"b".to_vec(), fp_b, false),
            (b"a".to_vec(), fp_a, false),
        ];

        let props_1 = [
            (b"svn:mergeinfo".to_vec(), b"x".to_vec()),
            (b"svn:ignore".to_vec(), b"y".to_vec()),
        ];
        let props_2 = [
            (b"svn:ignore".to_vec(), b"y".to_vec()),
            (b"svn:mergeinfo".to_vec(), b"x".to_vec()),
        ];

        assert_eq!(
            tree_fingerprint(&props_1, &items_1, &[]),
            tree_fingerprint(&props_2, &items_2, &[]),
        );
    }

    #[test]
    fn hidden_reference_differs_from_visible() {
        let fp = blob_fingerprint(b"hello", &[]);
        let visible = [(b"child".to_vec(), fp, false)];
        let hidden = [(b"child".to_vec(), fp, true)];
        assert_ne!(
            tree_fingerprint(&[], &visible, &[]),
            tree_fingerprint(&[], &hidden, &[]),
        );
    }

    // I1: re-finalizing the same fingerprint returns the canonical instance
    // and never calls `make_oid` again.
    #[test]
    fn intern_table_dedups() {
        let mut table = InternTable::new();
        let fp = blob_fingerprint(b"hello", &[]);

        let mut calls = 0;
        let oid_1 = table
            .finalize(fp, || {
                calls += 1;
                Ok(gix_hash::ObjectId::null(gix_hash::Kind::Sha1))
            })
            .unwrap();
        let oid_2 = table
            .finalize(fp, || {
                calls += 1;
                panic!("should not be called again for the same fingerprint");
            })
            .unwrap();

        assert_eq!(oid_1, oid_2);
        assert_eq!(calls, 1);
        assert_eq!(table.len(), 1);
    }
}
