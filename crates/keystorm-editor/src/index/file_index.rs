//! File metadata index with name and directory secondary indexes and a
//! compact binary on-disk format.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use keystorm_core::{Error, Result};

const MAGIC: &[u8; 4] = b"KSIX";
const FORMAT_VERSION: u32 = 1;
/// Length-prefixed strings are capped to defeat pathological inputs.
const MAX_STRING_LEN: u32 = 16 * 1024 * 1024;
/// Regex patterns longer than this are rejected to bound compilation cost.
const MAX_PATTERN_LEN: usize = 1000;

const FLAG_IS_DIR: u8 = 1 << 0;
const FLAG_IS_SYMLINK: u8 = 1 << 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub name: String,
    pub size: i64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modtime_ns: i64,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub mode: u32,
}

impl FileInfo {
    pub fn from_metadata(path: PathBuf, metadata: &std::fs::Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let modtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::MetadataExt;
            metadata.mode()
        };
        #[cfg(not(unix))]
        let mode = 0;
        Self {
            path,
            name,
            size: metadata.len() as i64,
            modtime_ns,
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Exact,
    Prefix,
    Suffix,
    Contains,
    Fuzzy,
    Glob,
    Regex,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub kind: QueryKind,
    /// Extension filter, e.g. `rs`.
    pub file_type: Option<String>,
    pub max_results: Option<usize>,
    pub include_dirs: bool,
    pub case_sensitive: bool,
    /// Restrict matches to paths under this prefix.
    pub path_prefix: Option<PathBuf>,
}

impl QueryOptions {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            file_type: None,
            max_results: None,
            include_dirs: false,
            case_sensitive: false,
            path_prefix: None,
        }
    }
}

/// A query hit with a relevance score in [0, 1].
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub info: FileInfo,
    pub score: f64,
}

#[derive(Default, Debug)]
struct Inner {
    files: HashMap<PathBuf, FileInfo>,
    /// Case-folded name -> paths.
    by_name: HashMap<String, Vec<PathBuf>>,
    /// Parent directory -> child paths.
    by_dir: HashMap<PathBuf, Vec<PathBuf>>,
    closed: bool,
}

impl Inner {
    fn unlink_secondary(&mut self, info: &FileInfo) {
        let folded = info.name.to_lowercase();
        if let Some(paths) = self.by_name.get_mut(&folded) {
            paths.retain(|p| p != &info.path);
            if paths.is_empty() {
                self.by_name.remove(&folded);
            }
        }
        if let Some(parent) = info.path.parent() {
            if let Some(children) = self.by_dir.get_mut(parent) {
                children.retain(|p| p != &info.path);
                if children.is_empty() {
                    self.by_dir.remove(parent);
                }
            }
        }
    }

    fn link_secondary(&mut self, info: &FileInfo) {
        self.by_name
            .entry(info.name.to_lowercase())
            .or_default()
            .push(info.path.clone());
        if let Some(parent) = info.path.parent() {
            self.by_dir
                .entry(parent.to_path_buf())
                .or_default()
                .push(info.path.clone());
        }
    }

    fn insert(&mut self, info: FileInfo) {
        if let Some(old) = self.files.remove(&info.path) {
            self.unlink_secondary(&old);
        }
        self.link_secondary(&info);
        self.files.insert(info.path.clone(), info);
    }
}

#[derive(Debug)]
pub struct FileIndex {
    inner: RwLock<Inner>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn check_open(inner: &Inner) -> Result<()> {
        if inner.closed {
            return Err(Error::IndexClosed);
        }
        Ok(())
    }

    /// Add or update an entry; secondary indexes follow.
    pub fn add(&self, info: FileInfo) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        Self::check_open(&inner)?;
        inner.insert(info);
        Ok(())
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        Self::check_open(&inner)?;
        match inner.files.remove(path) {
            Some(old) => {
                inner.unlink_secondary(&old);
                Ok(())
            }
            None => Err(Error::NotFound(path.display().to_string())),
        }
    }

    pub fn get(&self, path: &Path) -> Option<FileInfo> {
        self.inner.read().unwrap().files.get(path).cloned()
    }

    pub fn has(&self, path: &Path) -> bool {
        self.inner.read().unwrap().files.contains_key(path)
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().files.len()
    }

    /// All entries, sorted by path for stable output.
    pub fn all(&self) -> Vec<FileInfo> {
        let mut entries: Vec<FileInfo> =
            self.inner.read().unwrap().files.values().cloned().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        Self::check_open(&inner)?;
        inner.files.clear();
        inner.by_name.clear();
        inner.by_dir.clear();
        Ok(())
    }

    /// Close the index; further mutations and queries fail.
    pub fn close(&self) {
        self.inner.write().unwrap().closed = true;
    }

    /// Case-folded name lookup.
    pub fn get_by_name(&self, name: &str) -> Vec<FileInfo> {
        let inner = self.inner.read().unwrap();
        let mut entries: Vec<FileInfo> = inner
            .by_name
            .get(&name.to_lowercase())
            .into_iter()
            .flatten()
            .filter_map(|p| inner.files.get(p).cloned())
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Direct children of a directory.
    pub fn get_by_directory(&self, dir: &Path) -> Vec<FileInfo> {
        let inner = self.inner.read().unwrap();
        let mut entries: Vec<FileInfo> = inner
            .by_dir
            .get(dir)
            .into_iter()
            .flatten()
            .filter_map(|p| inner.files.get(p).cloned())
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Query by name or path pattern, scored and sorted best-first.
    pub fn query(&self, pattern: &str, opts: &QueryOptions) -> Result<Vec<QueryResult>> {
        let inner = self.inner.read().unwrap();
        Self::check_open(&inner)?;

        let matcher = Matcher::compile(pattern, opts)?;
        let mut results = Vec::new();
        for info in inner.files.values() {
            if info.is_dir && !opts.include_dirs {
                continue;
            }
            if let Some(prefix) = &opts.path_prefix {
                if !info.path.starts_with(prefix) {
                    continue;
                }
            }
            if let Some(file_type) = &opts.file_type {
                let matches_type = info
                    .path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(file_type));
                if !matches_type {
                    continue;
                }
            }
            if let Some(score) = matcher.score(info, opts.case_sensitive) {
                results.push(QueryResult {
                    info: info.clone(),
                    score,
                });
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.info.path.cmp(&b.info.path))
        });
        if let Some(max) = opts.max_results {
            results.truncate(max);
        }
        Ok(results)
    }

    /// Serialize to the compact binary format.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let inner = self.inner.read().unwrap();
        Self::check_open(&inner)?;

        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(inner.files.len() as u32).to_le_bytes())?;

        for info in inner.files.values() {
            write_string(writer, info.path.to_string_lossy().as_bytes())?;
            write_string(writer, info.name.as_bytes())?;
            writer.write_all(&info.size.to_le_bytes())?;
            writer.write_all(&info.modtime_ns.to_le_bytes())?;
            let mut flags = 0u8;
            if info.is_dir {
                flags |= FLAG_IS_DIR;
            }
            if info.is_symlink {
                flags |= FLAG_IS_SYMLINK;
            }
            writer.write_all(&[flags])?;
            writer.write_all(&info.mode.to_le_bytes())?;
        }
        Ok(())
    }

    /// Replace this index's contents from a serialized stream.
    pub fn load_from<R: Read>(&self, reader: &mut R) -> Result<()> {
        let loaded = Self::load(reader)?;
        let mut inner = self.inner.write().unwrap();
        Self::check_open(&inner)?;
        *inner = loaded.inner.into_inner().unwrap();
        Ok(())
    }

    /// Load from the binary format, rebuilding both secondary indexes.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::InvalidFormat(format!(
                "bad magic {:02x?}, expected {:02x?}",
                magic, MAGIC
            )));
        }
        let version = read_u32(reader)?;
        if version != FORMAT_VERSION {
            return Err(Error::VersionMismatch {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        let count = read_u32(reader)?;
        let index = FileIndex::new();
        {
            let mut inner = index.inner.write().unwrap();
            for _ in 0..count {
                let path = PathBuf::from(String::from_utf8_lossy(&read_string(reader)?).into_owned());
                let name = String::from_utf8_lossy(&read_string(reader)?).into_owned();
                let size = read_i64(reader)?;
                let modtime_ns = read_i64(reader)?;
                let mut flags = [0u8; 1];
                reader.read_exact(&mut flags)?;
                let mode = read_u32(reader)?;
                inner.insert(FileInfo {
                    path,
                    name,
                    size,
                    modtime_ns,
                    is_dir: flags[0] & FLAG_IS_DIR != 0,
                    is_symlink: flags[0] & FLAG_IS_SYMLINK != 0,
                    mode,
                });
            }
        }
        Ok(index)
    }
}

impl Default for FileIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn write_string<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    if bytes.len() as u32 > MAX_STRING_LEN {
        return Err(Error::InvalidFormat(format!(
            "string of {} bytes exceeds the {} byte cap",
            bytes.len(),
            MAX_STRING_LEN
        )));
    }
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        return Err(Error::InvalidFormat(format!(
            "string of {len} bytes exceeds the {MAX_STRING_LEN} byte cap"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

enum Matcher {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Fuzzy(String),
    Glob(globset::GlobMatcher),
    Regex(regex::Regex),
}

impl Matcher {
    fn compile(pattern: &str, opts: &QueryOptions) -> Result<Matcher> {
        let folded = if opts.case_sensitive {
            pattern.to_string()
        } else {
            pattern.to_lowercase()
        };
        Ok(match opts.kind {
            QueryKind::Exact => Matcher::Exact(folded),
            QueryKind::Prefix => Matcher::Prefix(folded),
            QueryKind::Suffix => Matcher::Suffix(folded),
            QueryKind::Contains => Matcher::Contains(folded),
            QueryKind::Fuzzy => Matcher::Fuzzy(folded),
            QueryKind::Glob => {
                let glob = globset::GlobBuilder::new(pattern)
                    .case_insensitive(!opts.case_sensitive)
                    .build()
                    .map_err(|e| Error::InvalidQuery(e.to_string()))?;
                Matcher::Glob(glob.compile_matcher())
            }
            QueryKind::Regex => {
                if pattern.len() > MAX_PATTERN_LEN {
                    return Err(Error::PatternTooLong {
                        len: pattern.len(),
                        max: MAX_PATTERN_LEN,
                    });
                }
                let regex = regex::RegexBuilder::new(pattern)
                    .case_insensitive(!opts.case_sensitive)
                    .build()
                    .map_err(|e| Error::InvalidQuery(e.to_string()))?;
                Matcher::Regex(regex)
            }
        })
    }

    fn score(&self, info: &FileInfo, case_sensitive: bool) -> Option<f64> {
        let name = if case_sensitive {
            info.name.clone()
        } else {
            info.name.to_lowercase()
        };
        match self {
            Matcher::Exact(p) => (name == *p).then_some(1.0),
            Matcher::Prefix(p) => name
                .starts_with(p.as_str())
                .then(|| partial_score(p.len(), name.len())),
            Matcher::Suffix(p) => name
                .ends_with(p.as_str())
                .then(|| partial_score(p.len(), name.len())),
            Matcher::Contains(p) => name
                .contains(p.as_str())
                .then(|| partial_score(p.len(), name.len())),
            Matcher::Fuzzy(p) => fuzzy_score(p, &name),
            Matcher::Glob(glob) => glob.is_match(&info.path).then_some(1.0),
            Matcher::Regex(regex) => regex.is_match(&name).then_some(1.0),
        }
    }
}

fn partial_score(pattern_len: usize, name_len: usize) -> f64 {
    if pattern_len == name_len {
        1.0
    } else {
        (pattern_len as f64 / name_len.max(1) as f64).min(0.99)
    }
}

/// Fuzzy subsequence score in [0, 1]. Exactly 1.0 only when the pattern
/// equals the target (after case normalization); otherwise combines the
/// pattern/target length ratio with consecutive-match, word-boundary, and
/// earliest-position bonuses, capped just under 1.0.
pub fn fuzzy_score(pattern: &str, target: &str) -> Option<f64> {
    if pattern.is_empty() {
        return None;
    }
    if pattern == target {
        return Some(1.0);
    }

    let pattern_chars: Vec<char> = pattern.chars().collect();
    let target_chars: Vec<char> = target.chars().collect();

    let mut positions = Vec::with_capacity(pattern_chars.len());
    let mut ti = 0usize;
    for &pc in &pattern_chars {
        let mut found = None;
        while ti < target_chars.len() {
            if target_chars[ti] == pc {
                found = Some(ti);
                ti += 1;
                break;
            }
            ti += 1;
        }
        positions.push(found?);
    }

    let base = pattern_chars.len() as f64 / target_chars.len() as f64;

    let consecutive = positions
        .windows(2)
        .filter(|w| w[1] == w[0] + 1)
        .count() as f64
        / pattern_chars.len() as f64;

    let boundaries = positions
        .iter()
        .filter(|&&pos| {
            pos == 0 || {
                let prev = target_chars[pos - 1];
                prev == '_' || prev == '-' || prev == ' ' || prev == '.' || prev == '/'
            }
        })
        .count() as f64
        / pattern_chars.len() as f64;

    let earliest = 1.0 - positions[0] as f64 / target_chars.len() as f64;

    let score = 0.4 * base + 0.25 * consecutive + 0.2 * boundaries + 0.15 * earliest;
    Some(score.min(0.999))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, size: i64) -> FileInfo {
        let path = PathBuf::from(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        FileInfo {
            path,
            name,
            size,
            modtime_ns: 1_700_000_000_000_000_000,
            is_dir: false,
            is_symlink: false,
            mode: 0o644,
        }
    }

    fn dir_info(path: &str) -> FileInfo {
        let mut info = info(path, 0);
        info.is_dir = true;
        info
    }

    fn sample_index() -> FileIndex {
        let index = FileIndex::new();
        index.add(info("/proj/src/main.rs", 120)).unwrap();
        index.add(info("/proj/src/config.rs", 80)).unwrap();
        index.add(info("/proj/docs/config.md", 40)).unwrap();
        index.add(info("/proj/README.md", 10)).unwrap();
        index.add(dir_info("/proj/src")).unwrap();
        index
    }

    #[test]
    fn test_add_update_remove() {
        let index = FileIndex::new();
        index.add(info("/a/b.txt", 1)).unwrap();
        assert!(index.has(Path::new("/a/b.txt")));
        assert_eq!(index.count(), 1);

        // Update replaces the entry, not duplicates it
        index.add(info("/a/b.txt", 99)).unwrap();
        assert_eq!(index.count(), 1);
        assert_eq!(index.get(Path::new("/a/b.txt")).unwrap().size, 99);
        assert_eq!(index.get_by_name("b.txt").len(), 1);

        index.remove(Path::new("/a/b.txt")).unwrap();
        assert_eq!(index.count(), 0);
        assert!(index.get_by_name("b.txt").is_empty());
        assert!(matches!(
            index.remove(Path::new("/a/b.txt")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_secondary_indexes() {
        let index = sample_index();
        let by_name = index.get_by_name("CONFIG.RS");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].path, PathBuf::from("/proj/src/config.rs"));

        let children = index.get_by_directory(Path::new("/proj/src"));
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.path.starts_with("/proj/src")));
    }

    #[test]
    fn test_query_kinds() {
        let index = sample_index();

        let exact = index
            .query("main.rs", &QueryOptions::new(QueryKind::Exact))
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].score, 1.0);

        let prefix = index
            .query("config", &QueryOptions::new(QueryKind::Prefix))
            .unwrap();
        assert_eq!(prefix.len(), 2);

        let suffix = index
            .query(".md", &QueryOptions::new(QueryKind::Suffix))
            .unwrap();
        assert_eq!(suffix.len(), 2);

        let contains = index
            .query("onfi", &QueryOptions::new(QueryKind::Contains))
            .unwrap();
        assert_eq!(contains.len(), 2);
    }

    #[test]
    fn test_query_filters() {
        let index = sample_index();

        let mut opts = QueryOptions::new(QueryKind::Contains);
        opts.file_type = Some("rs".into());
        let results = index.query("config", &opts).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].info.path, PathBuf::from("/proj/src/config.rs"));

        let mut opts = QueryOptions::new(QueryKind::Contains);
        opts.path_prefix = Some(PathBuf::from("/proj/docs"));
        let results = index.query("config", &opts).unwrap();
        assert_eq!(results.len(), 1);

        let mut opts = QueryOptions::new(QueryKind::Prefix);
        opts.include_dirs = true;
        let results = index.query("src", &opts).unwrap();
        assert!(results.iter().any(|r| r.info.is_dir));

        let mut opts = QueryOptions::new(QueryKind::Contains);
        opts.max_results = Some(1);
        let results = index.query("config", &opts).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_glob_and_regex_queries() {
        let index = sample_index();

        let glob = index
            .query("**/src/*.rs", &QueryOptions::new(QueryKind::Glob))
            .unwrap();
        assert_eq!(glob.len(), 2);

        let regex = index
            .query(r"^config\.(rs|md)$", &QueryOptions::new(QueryKind::Regex))
            .unwrap();
        assert_eq!(regex.len(), 2);

        let err = index
            .query(&"a".repeat(1001), &QueryOptions::new(QueryKind::Regex))
            .unwrap_err();
        assert!(matches!(err, Error::PatternTooLong { .. }));
    }

    #[test]
    fn test_case_sensitivity() {
        let index = FileIndex::new();
        index.add(info("/a/Makefile", 1)).unwrap();

        let insensitive = index
            .query("makefile", &QueryOptions::new(QueryKind::Exact))
            .unwrap();
        assert_eq!(insensitive.len(), 1);

        let mut opts = QueryOptions::new(QueryKind::Exact);
        opts.case_sensitive = true;
        let sensitive = index.query("makefile", &opts).unwrap();
        assert!(sensitive.is_empty());
    }

    #[test]
    fn test_fuzzy_score_bounds() {
        // Exact match is exactly 1.0
        assert_eq!(fuzzy_score("main.rs", "main.rs"), Some(1.0));
        // Anything else is strictly below 1.0
        let close = fuzzy_score("main.r", "main.rs").unwrap();
        assert!(close < 1.0 && close > 0.0);
        // Subsequence matches score lower than tight matches
        let sparse = fuzzy_score("mr", "main.rs").unwrap();
        assert!(sparse < close);
        // Non-subsequence does not match
        assert_eq!(fuzzy_score("zz", "main.rs"), None);
        assert_eq!(fuzzy_score("mainx", "main.rs"), None);
    }

    #[test]
    fn test_fuzzy_prefers_word_boundaries() {
        let boundary = fuzzy_score("fi", "file_index.rs").unwrap();
        let buried = fuzzy_score("fi", "affix.rs").unwrap();
        assert!(boundary > buried);
    }

    #[test]
    fn test_closed_index_rejects_operations() {
        let index = sample_index();
        index.close();
        assert!(matches!(index.add(info("/x", 1)), Err(Error::IndexClosed)));
        assert!(matches!(
            index.query("x", &QueryOptions::new(QueryKind::Exact)),
            Err(Error::IndexClosed)
        ));
        assert!(matches!(index.clear(), Err(Error::IndexClosed)));
    }

    #[test]
    fn test_binary_round_trip_rebuilds_secondary_indexes() {
        let index = sample_index();
        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();

        let loaded = FileIndex::load(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded.all(), index.all());

        for info in index.all() {
            assert_eq!(loaded.get_by_name(&info.name), index.get_by_name(&info.name));
            if let Some(parent) = info.path.parent() {
                assert_eq!(loaded.get_by_directory(parent), index.get_by_directory(parent));
            }
        }
    }

    #[test]
    fn test_binary_header_layout() {
        let index = FileIndex::new();
        index.add(info("/a", 1)).unwrap();
        let mut buf = Vec::new();
        index.save(&mut buf).unwrap();

        assert_eq!(&buf[0..4], b"KSIX");
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 1);
    }

    #[test]
    fn test_load_rejects_bad_magic_and_version() {
        let err = FileIndex::load(&mut &b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00"[..]).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));

        let mut buf = Vec::new();
        buf.extend_from_slice(b"KSIX");
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        let err = FileIndex::load(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            Error::VersionMismatch {
                found: 7,
                expected: 1
            }
        ));
    }

    #[test]
    fn test_load_rejects_oversized_strings() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"KSIX");
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        // Path length claims 32 MiB
        buf.extend_from_slice(&(32u32 * 1024 * 1024).to_le_bytes());
        let err = FileIndex::load(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
