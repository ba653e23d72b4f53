use gix_hash::ObjectId;
use gix_object::Tree;
use gix_object::tree::{Entry, EntryMode};

use super::{ConvertError, fingerprint, git_wrap, meta};
use crate::FHashMap;

/// Reserved entry name carrying a directory's [`meta::DirMetadata`] blob.
/// A leading NUL byte can never appear in an SVN dump path, so this can
/// never collide with a real tree entry.
pub(super) const METADATA_FILE_NAME: &[u8] = b"\0svn-meta";

/// Builds up the full content tree for one SVN revision incrementally,
/// applying one dump node at a time, then flushes it into real git tree
/// objects. Every directory's tree carries an extra [`METADATA_FILE_NAME`]
/// entry alongside its real children, holding that directory's metadata
/// blob; `stage1::svn_tree_to_git_tree` strips it back out when deriving
/// the final per-branch git tree.
pub(super) struct TreeBuilder {
    root: TreeBuilderRoot,
}

impl TreeBuilder {
    pub(super) fn new(root_metadata: ObjectId) -> Self {
        Self {
            root: TreeBuilderRoot::Loaded(TreeBuilderNode::empty(root_metadata)),
        }
    }

    pub(super) fn with_base(base: ObjectId) -> Self {
        Self {
            root: TreeBuilderRoot::Stored(base),
        }
    }

    pub(super) fn mod_oid(
        &mut self,
        path: &[u8],
        mode: EntryMode,
        oid: ObjectId,
        importer: &mut git_wrap::Importer,
    ) -> Result<(), ConvertError> {
        if path.is_empty() {
            tracing::error!("attempted to modify root directory");
            return Err(ConvertError);
        }

        let Some((node, entry_name)) = self.find_entry(path, true, importer)? else {
            tracing::error!(
                "attempted to modify entry \"{}\" at non-existing parent",
                path.escape_ascii(),
            );
            return Err(ConvertError);
        };

        node.entries
            .insert(entry_name.to_vec(), TreeBuilderEntry::Entry(mode, oid));
        Ok(())
    }

    pub(super) fn mod_inline(
        &mut self,
        path: &[u8],
        mode: EntryMode,
        blob: Vec<u8>,
        delta_base: Option<ObjectId>,
        importer: &mut git_wrap::Importer,
    ) -> Result<ObjectId, ConvertError> {
        let blob_oid = importer.put_blob(blob, delta_base)?;
        self.mod_oid(path, mode, blob_oid, importer)?;
        Ok(blob_oid)
    }

    pub(super) fn mkdir(
        &mut self,
        path: &[u8],
        metadata: ObjectId,
        importer: &mut git_wrap::Importer,
    ) -> Result<(), ConvertError> {
        if path.is_empty() {
            tracing::error!("attempted to create root directory");
            return Err(ConvertError);
        }

        let Some((node, entry_name)) = self.find_entry(path, true, importer)? else {
            tracing::error!(
                "attempted to create directory \"{}\" at non-existing parent",
                path.escape_ascii(),
            );
            return Err(ConvertError);
        };
        match node.entries.entry(entry_name.to_vec()) {
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(TreeBuilderEntry::SubTree(TreeBuilderNode::empty(metadata)));
                Ok(())
            }
            std::collections::hash_map::Entry::Occupied(_) => {
                tracing::error!(
                    "attempted to create directory \"{}\" at existing path",
                    path.escape_ascii(),
                );
                Err(ConvertError)
            }
        }
    }

    pub(super) fn rm(
        &mut self,
        path: &[u8],
        importer: &mut git_wrap::Importer,
    ) -> Result<Option<(EntryMode, ObjectId)>, ConvertError> {
        if path.is_empty() {
            tracing::error!("attempted to remove root directory");
            return Err(ConvertError);
        }

        if let Some((node, entry_name)) = self.find_entry(path, true, importer)? {
            Ok(node.entries.remove(entry_name).and_then(|entry| match entry {
                TreeBuilderEntry::SubTree(sub_node) => sub_node
                    .base_oid
                    .map(|oid| (EntryMode::from(gix_object::tree::EntryKind::Tree), oid)),
                TreeBuilderEntry::Entry(mode, oid) => Some((mode, oid)),
            }))
        } else {
            Ok(None)
        }
    }

    pub(super) fn ls_file(
        &mut self,
        path: &[u8],
        importer: &mut git_wrap::Importer,
    ) -> Result<Option<(EntryMode, ObjectId)>, ConvertError> {
        if path.is_empty() {
            return Ok(None);
        }

        if let Some((node, entry_name)) = self.find_entry(path, false, importer)? {
            match node.entries.get(entry_name) {
                Some(TreeBuilderEntry::SubTree(_)) => Ok(None),
                Some(&TreeBuilderEntry::Entry(mode, oid)) if !mode.is_tree() => {
                    Ok(Some((mode, oid)))
                }
                _ => Ok(None),
            }
        } else {
            Ok(None)
        }
    }

    pub(super) fn ls_metadata(
        &mut self,
        path: &[u8],
        importer: &mut git_wrap::Importer,
    ) -> Result<Option<ObjectId>, ConvertError> {
        if let Some(node) = self.find_node(path, false, importer)? {
            Ok(Some(node.metadata))
        } else {
            Ok(None)
        }
    }

    pub(super) fn mod_metadata(
        &mut self,
        path: &[u8],
        oid: ObjectId,
        importer: &mut git_wrap::Importer,
    ) -> Result<(), ConvertError> {
        let Some(node) = self.find_node(path, true, importer)? else {
            tracing::error!(
                "attempted to modify metadata of non-existing directory \"{}\"",
                path.escape_ascii(),
            );
            return Err(ConvertError);
        };
        node.metadata = oid;
        Ok(())
    }

    /// Marks `child_name` (an immediate child of the directory at `dir_path`)
    /// hidden in that directory's metadata, leaving the underlying entry
    /// itself untouched so later copy-from references still resolve it.
    pub(super) fn hide_child(
        &mut self,
        dir_path: &[u8],
        child_name: &[u8],
        importer: &mut git_wrap::Importer,
    ) -> Result<(), ConvertError> {
        let Some(metadata_oid) = self.ls_metadata(dir_path, importer)? else {
            tracing::error!(
                "attempted to hide \"{}\" in non-existent directory \"{}\"",
                child_name.escape_ascii(),
                dir_path.escape_ascii(),
            );
            return Err(ConvertError);
        };
        let raw_metadata = importer.get_blob(metadata_oid)?;
        let mut metadata = meta::DirMetadata::deserialize(&raw_metadata).ok_or_else(|| {
            tracing::error!("failed to deserialize directory metadata");
            ConvertError
        })?;
        metadata.hide(child_name);
        let new_metadata_oid = importer.put_blob(metadata.serialize(), Some(metadata_oid))?;
        self.mod_metadata(dir_path, new_metadata_oid, importer)
    }

    fn find_node<'a>(
        &'a mut self,
        path: &[u8],
        modify: bool,
        importer: &mut git_wrap::Importer,
    ) -> Result<Option<&'a mut TreeBuilderNode>, ConvertError> {
        if path.is_empty() {
            self.find_node_impl(std::iter::empty(), modify, importer)
        } else {
            self.find_node_impl(path.split(|&c| c == b'/'), modify, importer)
        }
    }

    fn find_entry<'a, 'b>(
        &'a mut self,
        path: &'b [u8],
        modify: bool,
        importer: &mut git_wrap::Importer,
    ) -> Result<Option<(&'a mut TreeBuilderNode, &'b [u8])>, ConvertError> {
        assert!(!path.is_empty());

        let mut components = path.split(|&c| c == b'/');
        let last_component = components.next_back().unwrap();

        let Some(node) = self.find_node_impl(components, modify, importer)? else {
            return Ok(None);
        };
        node.modified |= modify;

        Ok(Some((node, last_component)))
    }

    fn find_node_impl<'a, 'b>(
        &'a mut self,
        components: impl IntoIterator<Item = &'b [u8]>,
        modify: bool,
        importer: &mut git_wrap::Importer,
    ) -> Result<Option<&'a mut TreeBuilderNode>, ConvertError> {
        if let TreeBuilderRoot::Stored(tree_oid) = self.root {
            self.root = TreeBuilderRoot::Loaded(Self::read_tree(tree_oid, importer)?);
        }

        let mut cur_node = match self.root {
            TreeBuilderRoot::Loaded(ref mut node) => node,
            TreeBuilderRoot::Stored(_) => unreachable!(),
        };

        for component in components {
            cur_node.modified |= modify;
            if cur_node.entries.contains_key(component) {
                let entry = cur_node.entries.get_mut(component).unwrap();
                match *entry {
                    TreeBuilderEntry::SubTree(ref mut sub_node) => {
                        cur_node = sub_node;
                    }
                    TreeBuilderEntry::Entry(mode, oid) if mode.is_tree() => {
                        *entry = TreeBuilderEntry::SubTree(Self::read_tree(oid, importer)?);
                        cur_node = match *entry {
                            TreeBuilderEntry::SubTree(ref mut sub_node) => sub_node,
                            TreeBuilderEntry::Entry(..) => unreachable!(),
                        };
                    }
                    TreeBuilderEntry::Entry(..) => {
                        return Ok(None);
                    }
                }
            } else {
                return Ok(None);
            }
        }

        cur_node.modified |= modify;
        Ok(Some(cur_node))
    }

    fn read_tree(
        tree_oid: ObjectId,
        importer: &mut git_wrap::Importer,
    ) -> Result<TreeBuilderNode, ConvertError> {
        let tree = importer.get::<Tree>(tree_oid)?;

        let metadata_oid = tree
            .entries
            .iter()
            .find(|e| e.filename == METADATA_FILE_NAME)
            .map(|e| e.oid)
            .ok_or_else(|| {
                tracing::error!("svn tree {tree_oid} is missing its metadata entry");
                ConvertError
            })?;

        let mut entries =
            FHashMap::with_capacity_and_hasher(tree.entries.len(), Default::default());
        for entry in tree.entries {
            if entry.filename == METADATA_FILE_NAME {
                continue;
            }
            entries.insert(
                entry.filename.into(),
                TreeBuilderEntry::Entry(entry.mode, entry.oid),
            );
        }

        Ok(TreeBuilderNode {
            modified: false,
            base_oid: Some(tree_oid),
            metadata: metadata_oid,
            entries,
        })
    }

    pub(super) fn build(
        self,
        importer: &mut git_wrap::Importer,
        mut cb: impl FnMut(ObjectId, &Tree, Option<ObjectId>, &mut git_wrap::Importer) -> Result<(), ConvertError>,
    ) -> Result<ObjectId, ConvertError> {
        match self.root {
            TreeBuilderRoot::Loaded(node) => Self::build_node(node, importer, &mut cb),
            TreeBuilderRoot::Stored(tree_oid) => Ok(tree_oid),
        }
    }

    fn build_node(
        node: TreeBuilderNode,
        importer: &mut git_wrap::Importer,
        cb: &mut impl FnMut(ObjectId, &Tree, Option<ObjectId>, &mut git_wrap::Importer) -> Result<(), ConvertError>,
    ) -> Result<ObjectId, ConvertError> {
        if !node.modified {
            if let Some(base_oid) = node.base_oid {
                return Ok(base_oid);
            }
        }

        let dir_metadata = meta::DirMetadata::deserialize(&importer.get_blob(node.metadata)?)
            .ok_or_else(|| {
                tracing::error!("failed to deserialize directory metadata");
                ConvertError
            })?;

        let mut entries = Vec::with_capacity(node.entries.len() + 1);
        entries.push(Entry {
            mode: gix_object::tree::EntryKind::Blob.into(),
            filename: METADATA_FILE_NAME.into(),
            oid: node.metadata,
        });

        let mut items = Vec::with_capacity(node.entries.len());

        for (name, entry) in node.entries {
            let oid = match entry {
                TreeBuilderEntry::SubTree(sub_node) => {
                    let sub_tree_oid = Self::build_node(sub_node, importer, cb)?;
                    entries.push(Entry {
                        mode: gix_object::tree::EntryKind::Tree.into(),
                        filename: name.clone().into(),
                        oid: sub_tree_oid,
                    });
                    sub_tree_oid
                }
                TreeBuilderEntry::Entry(mode, oid) => {
                    entries.push(Entry {
                        mode,
                        filename: name.clone().into(),
                        oid,
                    });
                    oid
                }
            };
            let hidden = dir_metadata.is_hidden(&name);
            items.push((name, importer.fingerprint_of(oid), hidden));
        }

        entries.sort();

        let tree = Tree { entries };
        let fp = fingerprint::tree_fingerprint(&dir_props(&dir_metadata), &items, &[]);
        let tree_oid = importer.put_tree_with_fingerprint(tree.clone(), node.base_oid, fp)?;
        cb(tree_oid, &tree, node.base_oid, importer)?;
        Ok(tree_oid)
    }
}

fn dir_props(metadata: &meta::DirMetadata) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut props = Vec::new();
    if !metadata.mergeinfo.is_empty() {
        props.push((b"svn:mergeinfo".to_vec(), metadata.mergeinfo.clone()));
    }
    if !metadata.svnmerge_integrated.is_empty() {
        props.push((
            b"svnmerge-integrated".to_vec(),
            metadata.svnmerge_integrated.clone(),
        ));
    }
    if !metadata.ignores.is_empty() {
        props.push((b"svn:ignore".to_vec(), metadata.ignores.clone()));
    }
    if !metadata.global_ignores.is_empty() {
        props.push((
            b"svn:global-ignores".to_vec(),
            metadata.global_ignores.clone(),
        ));
    }
    props
}

enum TreeBuilderRoot {
    Loaded(TreeBuilderNode),
    Stored(ObjectId),
}

enum TreeBuilderEntry {
    SubTree(TreeBuilderNode),
    Entry(EntryMode, ObjectId),
}

struct TreeBuilderNode {
    modified: bool,
    base_oid: Option<ObjectId>,
    metadata: ObjectId,
    entries: FHashMap<Vec<u8>, TreeBuilderEntry>,
}

impl TreeBuilderNode {
    fn empty(metadata: ObjectId) -> Self {
        Self {
            modified: false,
            base_oid: None,
            metadata,
            entries: FHashMap::default(),
        }
    }
}
