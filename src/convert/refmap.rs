//! Configurable path-to-refname mapping: `$Name` variables, glob compilation
//! with numbered captures, and the `MapPath`/`UnmapPath`/`MapRef` entries that
//! classify an SVN path and expand it into a git refname.
//!
//! Unlike [`crate::path_pattern`], captures here are consumed directly by the
//! refname expansion templates, so globs are compiled to a small hand-rolled
//! token/matcher pair instead of a regex engine: there is no capture-group
//! API to lean on for `$1..$N` extraction.

use crate::FHashMap;

#[derive(Debug)]
pub(crate) enum ConfigParseError {
    UnknownVariable(String),
    CyclicVariable(String),
    UnterminatedAlternation,
    EmptyAlternationBranch,
    InvalidDoubleAsterisk,
    BadCaptureRef(usize),
}

impl std::fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownVariable(name) => write!(f, "unknown variable \"${name}\""),
            Self::CyclicVariable(name) => write!(f, "cyclic variable expansion of \"${name}\""),
            Self::UnterminatedAlternation => write!(f, "unterminated '{{...}}'"),
            Self::EmptyAlternationBranch => write!(f, "empty branch in '{{...}}'"),
            Self::InvalidDoubleAsterisk => write!(f, "invalid '**'"),
            Self::BadCaptureRef(n) => write!(f, "reference to nonexistent capture \"${n}\""),
        }
    }
}

/// Named string-list variables usable as `$Name` inside globs and refname
/// templates. A list desugars to alternation when it appears in a glob.
/// Variables may reference other variables recursively; a variable that
/// (directly or transitively) references itself is a [`ConfigParseError`].
pub(crate) struct Vars {
    raw: FHashMap<String, Vec<String>>,
}

impl Vars {
    fn with_defaults() -> Self {
        let mut raw = FHashMap::default();
        raw.insert("Trunk".to_string(), vec!["trunk".to_string()]);
        raw.insert("Branches".to_string(), vec!["branches".to_string()]);
        raw.insert("Tags".to_string(), vec!["tags".to_string()]);
        raw.insert("MapTrunkTo".to_string(), vec!["main".to_string()]);
        Self { raw }
    }

    pub(crate) fn set(&mut self, name: &str, values: Vec<String>) {
        self.raw.insert(name.to_string(), values);
    }

    fn resolve(&self, name: &str, visiting: &mut Vec<String>) -> Result<Vec<String>, ConfigParseError> {
        if visiting.iter().any(|n| n == name) {
            return Err(ConfigParseError::CyclicVariable(name.to_string()));
        }
        let raw_values = self
            .raw
            .get(name)
            .ok_or_else(|| ConfigParseError::UnknownVariable(name.to_string()))?;

        visiting.push(name.to_string());
        let mut out = Vec::new();
        for raw in raw_values {
            let substituted = self.substitute(raw, visiting)?;
            out.extend(split_top_level_braces(&substituted));
        }
        visiting.pop();

        Ok(out)
    }

    /// Replaces every `$Name` occurrence in `text` with its resolved value
    /// (inlined directly when the variable has a single value, or as a
    /// `{a,b,c}` brace group otherwise, for a downstream glob/literal parser
    /// to pick up).
    fn substitute(&self, text: &str, visiting: &mut Vec<String>) -> Result<String, ConfigParseError> {
        let mut out = String::new();
        let mut rest = text;
        while let Some(dollar) = rest.find('$') {
            out.push_str(&rest[..dollar]);
            let after = &rest[(dollar + 1)..];
            let name_len = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if name_len == 0 {
                return Err(ConfigParseError::UnknownVariable(String::new()));
            }
            let name = &after[..name_len];
            let values = self.resolve(name, visiting)?;
            if values.len() == 1 {
                out.push_str(&values[0]);
            } else {
                out.push('{');
                out.push_str(&values.join(","));
                out.push('}');
            }
            rest = &after[name_len..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Expands `$Name` references in a glob pattern or refname template. For
    /// globs, a multi-value variable becomes a `{a,b,c}` alternation group;
    /// for templates it is meant to carry a single value and is inlined.
    pub(crate) fn expand(&self, text: &str) -> Result<String, ConfigParseError> {
        self.substitute(text, &mut Vec::new())
    }

    /// Expands a refname template: `$1..$N` substitute raw capture bytes,
    /// `$Name` substitutes a variable's (first) value.
    pub(crate) fn expand_template(
        &self,
        template: &str,
        captures: &[Vec<u8>],
    ) -> Result<Vec<u8>, ConfigParseError> {
        let mut out = Vec::new();
        let mut rest = template;
        while let Some(dollar) = rest.find('$') {
            out.extend_from_slice(rest[..dollar].as_bytes());
            let after = &rest[(dollar + 1)..];

            let digit_len = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            if digit_len > 0 {
                let n: usize = after[..digit_len].parse().unwrap();
                let capture = n
                    .checked_sub(1)
                    .and_then(|i| captures.get(i))
                    .ok_or(ConfigParseError::BadCaptureRef(n))?;
                out.extend_from_slice(capture);
                rest = &after[digit_len..];
                continue;
            }

            let name_len = after
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if name_len == 0 {
                return Err(ConfigParseError::UnknownVariable(String::new()));
            }
            let name = &after[..name_len];
            let values = self.resolve(name, &mut Vec::new())?;
            out.extend_from_slice(values.first().map(String::as_bytes).unwrap_or(b""));
            rest = &after[name_len..];
        }
        out.extend_from_slice(rest.as_bytes());
        Ok(out)
    }
}

/// If `s` is, as a whole, `prefix{a,b,c}suffix`, returns one string per
/// branch; otherwise returns `s` unchanged as the sole element.
fn split_top_level_braces(s: &str) -> Vec<String> {
    if let (Some(open), Some(close)) = (s.find('{'), s.rfind('}')) {
        if open < close {
            let prefix = &s[..open];
            let body = &s[(open + 1)..close];
            let suffix = &s[(close + 1)..];
            return body.split(',').map(|b| format!("{prefix}{b}{suffix}")).collect();
        }
    }
    vec![s.to_string()]
}

#[derive(Clone, Debug)]
enum Token {
    Literal(Vec<u8>),
    Star,
    Question,
    Alt(Vec<Vec<u8>>),
    DoubleStarSlash,
    DoubleStarRest,
}

fn is_capturing(token: &Token) -> bool {
    !matches!(token, Token::Literal(_))
}

fn tokenize(pattern: &str) -> Result<Vec<Token>, ConfigParseError> {
    let mut tokens = Vec::new();
    let mut rem = pattern;

    while !rem.is_empty() {
        if rem == "**" {
            tokens.push(Token::DoubleStarRest);
            rem = "";
        } else if let Some(new_rem) = rem.strip_prefix("**/") {
            tokens.push(Token::DoubleStarSlash);
            rem = new_rem;
        } else if rem.starts_with("**") {
            return Err(ConfigParseError::InvalidDoubleAsterisk);
        } else {
            let bytes = rem.as_bytes();
            let mut i = 0;
            loop {
                match bytes.get(i) {
                    None => {
                        if i != 0 {
                            tokens.push(Token::Literal(rem.as_bytes().to_vec()));
                        }
                        rem = "";
                        break;
                    }
                    Some(&b'*') if bytes.get(i + 1) == Some(&b'*') => {
                        // Hand the `**`/`**/` back to the outer loop so it
                        // can tell a trailing `**` from a mid-pattern one.
                        if i != 0 {
                            tokens.push(Token::Literal(bytes[..i].to_vec()));
                        }
                        rem = &rem[i..];
                        break;
                    }
                    Some(&b'*') => {
                        if i != 0 {
                            tokens.push(Token::Literal(bytes[..i].to_vec()));
                        }
                        tokens.push(Token::Star);
                        rem = &rem[(i + 1)..];
                        break;
                    }
                    Some(&b'?') => {
                        if i != 0 {
                            tokens.push(Token::Literal(bytes[..i].to_vec()));
                        }
                        tokens.push(Token::Question);
                        rem = &rem[(i + 1)..];
                        break;
                    }
                    Some(&b'{') => {
                        if i != 0 {
                            tokens.push(Token::Literal(bytes[..i].to_vec()));
                        }
                        let after_brace = &rem[(i + 1)..];
                        let close = after_brace
                            .find('}')
                            .ok_or(ConfigParseError::UnterminatedAlternation)?;
                        let (body, new_rem) = after_brace.split_at(close);
                        let new_rem = &new_rem[1..];

                        let mut branches = Vec::new();
                        for branch in body.split(',') {
                            if branch.is_empty() {
                                return Err(ConfigParseError::EmptyAlternationBranch);
                            }
                            branches.push(branch.as_bytes().to_vec());
                        }
                        tokens.push(Token::Alt(branches));

                        rem = new_rem;
                        break;
                    }
                    Some(_) => i += 1,
                }
            }
        }
    }

    Ok(tokens)
}

pub(crate) struct CompiledGlob {
    tokens: Vec<Token>,
    capture_count: usize,
}

impl CompiledGlob {
    /// Matches the whole of `path` against this glob, returning the captures
    /// (one per non-literal token, in pattern order) on success.
    pub(crate) fn match_path(&self, path: &[u8]) -> Option<Vec<Vec<u8>>> {
        let mut captures = Vec::with_capacity(self.capture_count);
        if match_from(&self.tokens, path, &mut captures) {
            Some(captures)
        } else {
            None
        }
    }
}

fn match_from(tokens: &[Token], path: &[u8], captures: &mut Vec<Vec<u8>>) -> bool {
    let Some((token, rest_tokens)) = tokens.split_first() else {
        return path.is_empty();
    };

    match token {
        Token::Literal(lit) => {
            path.starts_with(lit.as_slice()) && match_from(rest_tokens, &path[lit.len()..], captures)
        }
        Token::Question => match path.first() {
            Some(&b) if b != b'/' => {
                captures.push(vec![b]);
                if match_from(rest_tokens, &path[1..], captures) {
                    true
                } else {
                    captures.pop();
                    false
                }
            }
            _ => false,
        },
        Token::Alt(branches) => {
            for branch in branches {
                if path.starts_with(branch.as_slice()) {
                    captures.push(branch.clone());
                    if match_from(rest_tokens, &path[branch.len()..], captures) {
                        return true;
                    }
                    captures.pop();
                }
            }
            false
        }
        Token::Star => {
            let max = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
            for len in (0..=max).rev() {
                captures.push(path[..len].to_vec());
                if match_from(rest_tokens, &path[len..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        Token::DoubleStarSlash => {
            let mut split_points = vec![0usize];
            let mut i = 0;
            while let Some(off) = path[i..].iter().position(|&c| c == b'/') {
                i += off + 1;
                split_points.push(i);
            }
            for &len in split_points.iter().rev() {
                captures.push(path[..len].to_vec());
                if match_from(rest_tokens, &path[len..], captures) {
                    return true;
                }
                captures.pop();
            }
            false
        }
        Token::DoubleStarRest => {
            debug_assert!(rest_tokens.is_empty());
            captures.push(path.to_vec());
            true
        }
    }
}

pub(crate) fn compile_glob(pattern: &str, vars: &Vars) -> Result<CompiledGlob, ConfigParseError> {
    let expanded = vars.expand(pattern)?;
    let tokens = tokenize(&expanded)?;
    let capture_count = tokens.iter().filter(|t| is_capturing(t)).count();
    Ok(CompiledGlob {
        tokens,
        capture_count,
    })
}

struct MapPathEntry {
    glob: CompiledGlob,
    refname_template: String,
    alt_refname_template: Option<String>,
    revision_ref_template: Option<String>,
    block_parent: bool,
}

struct UnmapPathEntry {
    glob: CompiledGlob,
    block_parent: bool,
}

struct MapRefEntry {
    glob: CompiledGlob,
    new_ref_template: Option<String>,
}

struct ReplaceRule {
    chars: Vec<u8>,
    with: u8,
}

fn default_replace_rules() -> Vec<ReplaceRule> {
    vec![
        ReplaceRule { chars: vec![b' '], with: b'_' },
        ReplaceRule { chars: vec![b':'], with: b'.' },
        ReplaceRule { chars: vec![b'^'], with: b'+' },
    ]
}

/// The outcome of classifying an SVN path against a [`RefMap`]'s configured
/// `MapPath`/`UnmapPath` entries, in declaration order (first match wins).
pub(crate) enum Classification {
    Mapped {
        refname: Vec<u8>,
        alt_refname: Option<Vec<u8>>,
        #[allow(dead_code)]
        revision_ref: Option<Vec<u8>>,
        block_parent: bool,
    },
    Unmapped {
        block_parent: bool,
    },
    NoMatch,
}

pub(crate) struct RefMap {
    vars: Vars,
    map_paths: Vec<MapPathEntry>,
    unmap_paths: Vec<UnmapPathEntry>,
    map_refs: Vec<MapRefEntry>,
    replace: Vec<ReplaceRule>,
}

impl RefMap {
    pub(crate) fn new() -> Self {
        Self {
            vars: Vars::with_defaults(),
            map_paths: Vec::new(),
            unmap_paths: Vec::new(),
            map_refs: Vec::new(),
            replace: default_replace_rules(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map_paths.is_empty() && self.unmap_paths.is_empty()
    }

    pub(crate) fn set_var(&mut self, name: &str, values: Vec<String>) {
        self.vars.set(name, values);
    }

    pub(crate) fn set_replace_rules(&mut self, rules: Vec<(String, char)>) {
        self.replace = rules
            .into_iter()
            .filter(|(chars, _)| chars.is_ascii())
            .map(|(chars, with)| ReplaceRule {
                chars: chars.into_bytes(),
                with: with as u8,
            })
            .collect();
    }

    pub(crate) fn add_map_path(
        &mut self,
        path_glob: &str,
        refname: &str,
        alt_refname: Option<&str>,
        revision_ref: Option<&str>,
        block_parent: Option<bool>,
    ) -> Result<(), ConfigParseError> {
        let implicit_block_parent = path_glob.ends_with("/*") || path_glob.ends_with("/**");
        let glob = compile_glob(path_glob, &self.vars)?;
        self.map_paths.push(MapPathEntry {
            glob,
            refname_template: refname.to_string(),
            alt_refname_template: alt_refname.map(String::from),
            revision_ref_template: revision_ref.map(String::from),
            block_parent: block_parent.unwrap_or(implicit_block_parent),
        });
        Ok(())
    }

    pub(crate) fn add_unmap_path(
        &mut self,
        path_glob: &str,
        block_parent: Option<bool>,
    ) -> Result<(), ConfigParseError> {
        let implicit_block_parent = path_glob.ends_with("/*") || path_glob.ends_with("/**");
        let glob = compile_glob(path_glob, &self.vars)?;
        self.unmap_paths.push(UnmapPathEntry {
            glob,
            block_parent: block_parent.unwrap_or(implicit_block_parent),
        });
        Ok(())
    }

    pub(crate) fn add_map_ref(
        &mut self,
        ref_glob: &str,
        new_ref: Option<&str>,
    ) -> Result<(), ConfigParseError> {
        let glob = compile_glob(ref_glob, &self.vars)?;
        self.map_refs.push(MapRefEntry {
            glob,
            new_ref_template: new_ref.map(String::from),
        });
        Ok(())
    }

    /// Classifies an SVN path (no leading/trailing slash) against the
    /// `UnmapPath` entries, then the `MapPath` entries, in declaration
    /// order. The first match of either kind wins.
    pub(crate) fn classify(&self, svn_path: &[u8]) -> Result<Classification, ConfigParseError> {
        for unmap in &self.unmap_paths {
            if unmap.glob.match_path(svn_path).is_some() {
                return Ok(Classification::Unmapped {
                    block_parent: unmap.block_parent,
                });
            }
        }

        for map in &self.map_paths {
            if let Some(captures) = map.glob.match_path(svn_path) {
                let refname = self.finalize(self.vars.expand_template(&map.refname_template, &captures)?);
                let alt_refname = map
                    .alt_refname_template
                    .as_deref()
                    .map(|t| self.vars.expand_template(t, &captures))
                    .transpose()?
                    .map(|r| self.finalize(r));
                let revision_ref = map
                    .revision_ref_template
                    .as_deref()
                    .map(|t| self.vars.expand_template(t, &captures))
                    .transpose()?
                    .map(|r| self.finalize(r));

                return Ok(Classification::Mapped {
                    refname: self.apply_map_refs(refname),
                    alt_refname: alt_refname.map(|r| self.apply_map_refs(r)),
                    revision_ref,
                    block_parent: map.block_parent,
                });
            }
        }

        Ok(Classification::NoMatch)
    }

    fn apply_map_refs(&self, refname: Vec<u8>) -> Vec<u8> {
        for map_ref in &self.map_refs {
            if let Some(captures) = map_ref.glob.match_path(&refname) {
                if let Some(template) = &map_ref.new_ref_template {
                    if let Ok(new_name) = self.vars.expand_template(template, &captures) {
                        return new_name;
                    }
                }
                return refname;
            }
        }
        refname
    }

    fn finalize(&self, refname: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::with_capacity(refname.len());
        'bytes: for b in refname {
            for rule in &self.replace {
                if rule.chars.contains(&b) {
                    out.push(rule.with);
                    continue 'bytes;
                }
            }
            out.push(b);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{Classification, RefMap, Vars};

    #[test]
    fn trunk_maps_to_main_by_default() {
        let mut refmap = RefMap::new();
        refmap
            .add_map_path("$Trunk", "refs/heads/$MapTrunkTo", None, None, None)
            .unwrap();

        match refmap.classify(b"trunk").unwrap() {
            Classification::Mapped { refname, .. } => assert_eq!(refname, b"refs/heads/main"),
            _ => panic!("expected a match"),
        }
        assert!(matches!(
            refmap.classify(b"branches/feat").unwrap(),
            Classification::NoMatch,
        ));
    }

    #[test]
    fn branches_wildcard_captures_name() {
        let mut refmap = RefMap::new();
        refmap
            .add_map_path("$Branches/*", "refs/heads/$1", None, None, None)
            .unwrap();

        match refmap.classify(b"branches/feat-x").unwrap() {
            Classification::Mapped {
                refname,
                block_parent,
                ..
            } => {
                assert_eq!(refname, b"refs/heads/feat-x");
                assert!(block_parent);
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn unmap_path_suppresses_branching() {
        let mut refmap = RefMap::new();
        refmap.add_unmap_path("$Branches/wip/**", None).unwrap();
        refmap
            .add_map_path("$Branches/*", "refs/heads/$1", None, None, None)
            .unwrap();

        assert!(matches!(
            refmap.classify(b"branches/wip/scratch").unwrap(),
            Classification::Unmapped { .. },
        ));
        match refmap.classify(b"branches/feat").unwrap() {
            Classification::Mapped { refname, .. } => assert_eq!(refname, b"refs/heads/feat"),
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn map_ref_rewrites_generated_refname() {
        let mut refmap = RefMap::new();
        refmap
            .add_map_path("$Branches/*", "refs/heads/$1", None, None, None)
            .unwrap();
        refmap
            .add_map_ref("refs/heads/legacy-*", Some("refs/heads/archive/$1"))
            .unwrap();

        match refmap.classify(b"branches/legacy-foo").unwrap() {
            Classification::Mapped { refname, .. } => {
                assert_eq!(refname, b"refs/heads/archive/foo");
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn replace_rules_apply_to_finalized_refname() {
        let mut refmap = RefMap::new();
        refmap
            .add_map_path("$Branches/*", "refs/heads/$1", None, None, None)
            .unwrap();

        match refmap.classify(b"branches/release 1:2").unwrap() {
            Classification::Mapped { refname, .. } => {
                assert_eq!(refname, b"refs/heads/release_1.2");
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn cyclic_variable_is_rejected_at_compile_time() {
        let mut vars = Vars::with_defaults();
        vars.set("A", vec!["$B".to_string()]);
        vars.set("B", vec!["$A".to_string()]);

        assert!(matches!(
            super::compile_glob("$A", &vars),
            Err(super::ConfigParseError::CyclicVariable(_)),
        ));
    }

    #[test]
    fn list_variable_desugars_to_alternation() {
        let mut vars = Vars::with_defaults();
        vars.set("Envs", vec!["dev".to_string(), "prod".to_string()]);

        let glob = super::compile_glob("envs/$Envs", &vars).unwrap();
        assert!(glob.match_path(b"envs/dev").is_some());
        assert!(glob.match_path(b"envs/prod").is_some());
        assert!(glob.match_path(b"envs/staging").is_none());
    }
}
