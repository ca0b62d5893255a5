//! A [`DocumentStore`] over a directory of markdown and text files.
//!
//! Documents are discovered once when the store is opened and read from
//! disk on every request. Links (`[[wikilinks]]` and relative markdown
//! links) are resolved to document ids; in-links come from a link graph
//! built lazily, in parallel, the first time a document is loaded.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Component, Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    document::{Document, DocumentStore, basename, folder_of},
    error::{Error, Result},
    frontmatter,
};

/// Supported file extensions for document discovery.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

#[derive(Debug, Clone)]
struct DiscoveredFile {
    absolute_path: PathBuf,
}

/// Markdown vault on disk.
#[derive(Debug)]
pub struct FsDocumentStore {
    root: PathBuf,
    files: BTreeMap<String, DiscoveredFile>,
    /// Lowercased file stem to ids, for wikilink resolution.
    stems: HashMap<String, Vec<String>>,
    folder_sizes: HashMap<String, usize>,
    in_links: OnceLock<HashMap<String, BTreeSet<String>>>,
}

impl FsDocumentStore {
    /// Discover every supported file under `root`.
    ///
    /// Skips hidden files and directories (names starting with `.`) and
    /// symlinks that resolve outside the root.
    pub fn open(root: &Path) -> Result<Self> {
        let root = root.canonicalize()?;
        let mut files = BTreeMap::new();
        walk_dir(&root, &root, &mut files)?;

        let mut stems: HashMap<String, Vec<String>> = HashMap::new();
        let mut folder_sizes: HashMap<String, usize> = HashMap::new();
        for id in files.keys() {
            stems
                .entry(basename(id).to_lowercase())
                .or_default()
                .push(id.clone());
            *folder_sizes.entry(folder_of(id).to_string()).or_default() += 1;
        }
        debug!(root = %root.display(), documents = files.len(), "opened vault");

        Ok(Self {
            root,
            files,
            stems,
            folder_sizes,
            in_links: OnceLock::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Map a document id to a path inside the root.
    ///
    /// Ids that are absolute, climb with `..`, or resolve (through
    /// symlinks) outside the root are rejected.
    pub fn resolve_path(&self, id: &str) -> Result<PathBuf> {
        let unsafe_path = || Error::UnsafePath(id.to_string());
        let relative = Path::new(id);
        if id.is_empty()
            || id.contains('\\')
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(unsafe_path());
        }

        let path = self.root.join(relative);
        match path.canonicalize() {
            Ok(resolved) if resolved.starts_with(&self.root) => Ok(resolved),
            Ok(_) => Err(unsafe_path()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, id: &str) -> Result<Option<(String, u64)>> {
        let path = self.resolve_path(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some((content, mtime_of(&path)?)))
    }

    /// Resolve a `[[wikilink]]` target by file stem.
    fn resolve_wikilink(&self, target: &str) -> Option<String> {
        let target = target.trim();
        if let Some(id) = self
            .files
            .keys()
            .find(|id| id.as_str() == target || strip_ext(id) == target)
        {
            return Some(id.clone());
        }
        self.stems
            .get(&basename(target).to_lowercase())
            .and_then(|ids| ids.first().cloned())
    }

    /// Resolve a relative markdown link from the document `from`.
    fn resolve_relative(&self, from: &str, target: &str) -> Option<String> {
        let target = target.replace("%20", " ");
        let mut parts: Vec<&str> = folder_of(from)
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        for part in target.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop()?;
                }
                part => parts.push(part),
            }
        }
        let id = parts.join("/");
        self.files.contains_key(&id).then_some(id)
    }

    /// Document ids linked from `body`, resolved against this vault.
    fn out_links(&self, id: &str, body: &str) -> Vec<String> {
        let mut links = BTreeSet::new();
        for target in wikilink_targets(body) {
            if let Some(resolved) = self.resolve_wikilink(target) {
                links.insert(resolved);
            }
        }
        for target in markdown_link_targets(body) {
            if let Some(resolved) = self.resolve_relative(id, target) {
                links.insert(resolved);
            }
        }
        links.remove(id);
        links.into_iter().collect()
    }

    fn link_graph(&self) -> &HashMap<String, BTreeSet<String>> {
        self.in_links.get_or_init(|| {
            // Read files in parallel; unreadable files simply have no links.
            let edges: Vec<(String, Vec<String>)> = self
                .files
                .par_iter()
                .filter_map(|(id, file)| {
                    let content =
                        std::fs::read_to_string(&file.absolute_path).ok()?;
                    let body = frontmatter::split(&content).body;
                    Some((id.clone(), self.out_links(id, body)))
                })
                .collect();

            let mut graph: HashMap<String, BTreeSet<String>> = HashMap::new();
            for (source, targets) in edges {
                for target in targets {
                    graph.entry(target).or_default().insert(source.clone());
                }
            }
            debug!(documents = graph.len(), "built link graph");
            graph
        })
    }

    /// Parse a file's content into a [`Document`].
    fn parse(&self, id: &str, content: String, modified_at: u64) -> Document {
        let split = frontmatter::split(&content);
        let properties = match split.yaml.map(frontmatter::parse_properties) {
            Some(Ok(properties)) => properties,
            Some(Err(e)) => {
                warn!(id, error = %e, "ignoring malformed front-matter");
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };

        let title = properties
            .get("title")
            .and_then(|v| v.as_text())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| extract_title(split.body, id));

        let mut tags: Vec<String> = frontmatter::declared_tags(&properties);
        tags.extend(inline_tags(split.body));
        tags.sort();
        tags.dedup();

        let headings = headings(split.body);
        let out_links = self.out_links(id, split.body);
        let in_links = self
            .link_graph()
            .get(id)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default();

        Document {
            id: id.to_string(),
            title,
            headings,
            tags,
            properties,
            out_links,
            in_links,
            body: content,
            modified_at,
        }
    }
}

impl DocumentStore for FsDocumentStore {
    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let Some((content, modified_at)) = self.read(id)? else {
            return Ok(None);
        };
        Ok(Some(self.parse(id, content, modified_at)))
    }

    fn list_candidates(
        &self,
        predicate: &dyn Fn(&str) -> bool,
    ) -> Result<Vec<String>> {
        Ok(self
            .files
            .keys()
            .filter(|id| predicate(id))
            .cloned()
            .collect())
    }

    fn modified_at(&self, id: &str) -> Result<Option<u64>> {
        let path = self.resolve_path(id)?;
        match mtime_of(&path) {
            Ok(mtime) => Ok(Some(mtime)),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn folder_size(&self, folder: &str) -> Option<usize> {
        Some(self.folder_sizes.get(folder).copied().unwrap_or(0))
    }
}

fn walk_dir(
    root: &Path,
    current: &Path,
    files: &mut BTreeMap<String, DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            walk_dir(root, &path, files)?;
            continue;
        }

        let resolved = if file_type.is_symlink() {
            match path.canonicalize() {
                Ok(resolved) if resolved.starts_with(root) => resolved,
                // Broken, or pointing outside the root.
                _ => continue,
            }
        } else {
            path.clone()
        };
        if !resolved.is_file() || !is_supported(&path) {
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let Some(id) = path_to_id(relative) else {
            debug!(path = %path.display(), "skipping non-UTF-8 path");
            continue;
        };
        files.insert(
            id,
            DiscoveredFile {
                absolute_path: resolved,
            },
        );
    }
    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

fn path_to_id(relative: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> =
        relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

/// Modification time in milliseconds since the Unix epoch.
fn mtime_of(path: &Path) -> Result<u64> {
    let millis = std::fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    Ok(u64::try_from(millis).unwrap_or(u64::MAX))
}

fn strip_ext(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('/') => stem,
        _ => id,
    }
}

/// Extract a title from file content.
///
/// Looks for the first markdown heading (line starting with `# `).
/// Falls back to the file stem.
fn extract_title(body: &str, id: &str) -> String {
    for line in body.lines() {
        if let Some(heading) = line.trim().strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    basename(id).to_string()
}

/// Lines of `body` outside fenced code blocks.
fn prose_lines(body: &str) -> impl Iterator<Item = &str> {
    let mut in_fence = false;
    body.lines().filter(move |line| {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            return false;
        }
        !in_fence
    })
}

fn headings(body: &str) -> Vec<String> {
    prose_lines(body)
        .filter_map(|line| {
            let trimmed = line.trim();
            let level = trimmed.chars().take_while(|&c| c == '#').count();
            if !(1..=6).contains(&level) {
                return None;
            }
            let text = trimmed[level..].strip_prefix(' ')?.trim();
            let text = text.trim_end_matches('#').trim_end();
            (!text.is_empty()).then(|| text.to_string())
        })
        .collect()
}

/// `#tag` tokens in prose: a `#` at a word start, followed by letters,
/// digits, `_`, `-` or `/`, and not purely numeric.
fn inline_tags(body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    for line in prose_lines(body) {
        let mut prev: Option<char> = None;
        for (i, c) in line.char_indices() {
            let at_word_start = prev.is_none_or(char::is_whitespace);
            prev = Some(c);
            if c != '#' || !at_word_start {
                continue;
            }
            let rest = &line[i + 1..];
            let end = rest
                .find(|ch: char| {
                    !(ch.is_alphanumeric() || matches!(ch, '_' | '-' | '/'))
                })
                .unwrap_or(rest.len());
            let tag = &rest[..end];
            if !tag.is_empty() && !tag.chars().all(|ch| ch.is_ascii_digit()) {
                tags.push(tag.to_string());
            }
        }
    }
    tags
}

/// Targets of `[[target]]`, `[[target|alias]]` and `[[target#heading]]`.
fn wikilink_targets(body: &str) -> Vec<&str> {
    let mut targets = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("[[") {
        rest = &rest[start + 2..];
        let Some(end) = rest.find("]]") else { break };
        let inner = &rest[..end];
        let target = inner
            .split(['|', '#'])
            .next()
            .unwrap_or_default()
            .trim();
        if !target.is_empty() && !inner.contains('\n') {
            targets.push(target);
        }
        rest = &rest[end + 2..];
    }
    targets
}

/// Relative targets of `[text](target)` links; URLs and anchors are
/// ignored.
fn markdown_link_targets(body: &str) -> Vec<&str> {
    let mut targets = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("](") {
        rest = &rest[start + 2..];
        let Some(end) = rest.find(')') else { break };
        let target = rest[..end]
            .split('#')
            .next()
            .unwrap_or_default()
            .trim();
        rest = &rest[end + 1..];
        if target.is_empty()
            || target.contains("://")
            || target.starts_with("mailto:")
            || target.starts_with('/')
        {
            continue;
        }
        targets.push(target);
    }
    targets
}
