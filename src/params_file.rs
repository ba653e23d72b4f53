use std::collections::HashMap;
use std::path::PathBuf;

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ConvParams {
    #[serde(default = "Vec::new")]
    pub(crate) branches: Vec<String>,
    #[serde(rename = "rename-branches", default = "HashMap::new")]
    pub(crate) rename_branches: HashMap<String, String>,
    #[serde(rename = "keep-deleted-branches", default = "true_")]
    pub(crate) keep_deleted_branches: bool,
    #[serde(default = "Vec::new")]
    pub(crate) tags: Vec<String>,
    #[serde(rename = "rename-tags", default = "HashMap::new")]
    pub(crate) rename_tags: HashMap<String, String>,
    #[serde(rename = "keep-deleted-tags", default = "true_")]
    pub(crate) keep_deleted_tags: bool,
    #[serde(default = "default_head")]
    pub(crate) head: String,
    #[serde(rename = "unbranched-name")]
    pub(crate) unbranched_name: Option<String>,
    #[serde(rename = "enable-merges", default = "true_")]
    pub(crate) enable_merges: bool,
    #[serde(rename = "merge-optional", default = "Vec::new")]
    pub(crate) merge_optional: Vec<String>,
    #[serde(rename = "avoid-fully-reverted-merges", default = "false_")]
    pub(crate) avoid_fully_reverted_merges: bool,
    #[serde(rename = "ignore-merges", default = "Vec::new")]
    pub(crate) ignore_merges: Vec<BranchRev>,
    #[serde(rename = "generate-gitignore", default = "true_")]
    pub(crate) generate_gitignore: bool,
    #[serde(rename = "delete-files", default = "Vec::new")]
    pub(crate) delete_files: Vec<String>,
    #[serde(rename = "user-map-file")]
    pub(crate) user_map_file: Option<PathBuf>,
    #[serde(rename = "user-fallback-template")]
    pub(crate) user_fallback_template: Option<String>,
    #[serde(rename = "commit-msg-template")]
    pub(crate) commit_msg_template: Option<String>,
    #[serde(rename = "tag-msg-template")]
    pub(crate) tag_msg_template: Option<String>,
    #[serde(default = "HashMap::new")]
    pub(crate) vars: HashMap<String, Vec<String>>,
    #[serde(rename = "map-path", default = "Vec::new")]
    pub(crate) map_path: Vec<MapPathSpec>,
    #[serde(rename = "unmap-path", default = "Vec::new")]
    pub(crate) unmap_path: Vec<UnmapPathSpec>,
    #[serde(rename = "map-ref", default = "Vec::new")]
    pub(crate) map_ref: Vec<MapRefSpec>,
    #[serde(default = "Vec::new")]
    pub(crate) replace: Vec<ReplaceSpec>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct MapPathSpec {
    pub(crate) path: String,
    pub(crate) refname: String,
    #[serde(rename = "alt-refname")]
    pub(crate) alt_refname: Option<String>,
    #[serde(rename = "revision-ref")]
    pub(crate) revision_ref: Option<String>,
    #[serde(rename = "block-parent")]
    pub(crate) block_parent: Option<bool>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct UnmapPathSpec {
    pub(crate) path: String,
    #[serde(rename = "block-parent")]
    pub(crate) block_parent: Option<bool>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct MapRefSpec {
    #[serde(rename = "ref")]
    pub(crate) ref_glob: String,
    #[serde(rename = "new-ref")]
    pub(crate) new_ref: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ReplaceSpec {
    pub(crate) chars: String,
    pub(crate) with: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BranchRev {
    pub(crate) path: String,
    pub(crate) rev: u32,
}

#[inline(always)]
fn false_() -> bool {
    false
}

#[inline(always)]
fn true_() -> bool {
    true
}

fn default_head() -> String {
    "trunk".into()
}
