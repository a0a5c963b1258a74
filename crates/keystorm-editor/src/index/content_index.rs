//! Inverted content index: term -> (path -> sorted 1-based line numbers).
//!
//! Tokenization is a maximal run of letter/digit/underscore characters.
//! The per-document term map is computed outside the index lock and merged
//! under it, so indexing contends with searches as little as possible.

use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use keystorm_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Regex patterns longer than this are rejected to bound compilation cost.
const MAX_PATTERN_LEN: usize = 1000;

/// Language-agnostic stop words skipped during indexing unless disabled.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "if", "in", "is",
    "it", "no", "not", "of", "on", "or", "so", "that", "the", "then", "this", "to", "was",
    "we", "with", "you",
];

#[derive(Debug, Clone)]
pub struct ContentIndexConfig {
    pub case_sensitive: bool,
    /// When false, stop-word filtering is bypassed.
    pub filter_stop_words: bool,
    /// Record a SHA-256 of indexed content in the document metadata.
    pub hash_content: bool,
    pub min_term_len: usize,
    pub max_term_len: usize,
}

impl Default for ContentIndexConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            filter_stop_words: true,
            hash_content: false,
            min_term_len: 2,
            max_term_len: 64,
        }
    }
}

/// Per-document metadata kept alongside the postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub path: PathBuf,
    pub size: u64,
    pub line_count: usize,
    pub word_count: usize,
    pub content_hash: Option<[u8; 32]>,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    /// Require every query term (true) or any query term (false).
    pub match_all: bool,
    pub max_results: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            match_all: true,
            max_results: None,
        }
    }
}

/// One matching document.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: PathBuf,
    /// Union of matching line numbers, 1-based, sorted, unique.
    pub line_numbers: Vec<u32>,
    pub score: f64,
    pub meta: DocumentMeta,
}

#[derive(Default, Serialize, Deserialize)]
struct Inner {
    docs: HashMap<PathBuf, DocumentMeta>,
    terms: HashMap<String, HashMap<PathBuf, Vec<u32>>>,
}

pub struct ContentIndex {
    config: ContentIndexConfig,
    inner: RwLock<Inner>,
}

impl ContentIndex {
    pub fn new(config: ContentIndexConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ContentIndexConfig::default())
    }

    fn accepts(&self, term: &str) -> bool {
        let len = term.chars().count();
        if len < self.config.min_term_len || len > self.config.max_term_len {
            return false;
        }
        if self.config.filter_stop_words && STOP_WORDS.contains(&term) {
            return false;
        }
        true
    }

    fn fold(&self, term: &str) -> String {
        if self.config.case_sensitive {
            term.to_string()
        } else {
            term.to_lowercase()
        }
    }

    /// Term -> sorted line set for one document, built without any lock.
    fn tokenize_document(&self, content: &str) -> (HashMap<String, BTreeSet<u32>>, usize) {
        let mut terms: HashMap<String, BTreeSet<u32>> = HashMap::new();
        let mut word_count = 0usize;
        for (line_index, line) in content.lines().enumerate() {
            let line_number = line_index as u32 + 1;
            for token in tokenize(line) {
                word_count += 1;
                let folded = self.fold(token);
                if !self.accepts(&folded) {
                    continue;
                }
                terms.entry(folded).or_default().insert(line_number);
            }
        }
        (terms, word_count)
    }

    /// Index (or re-index) a document. Stale postings for the path are
    /// dropped before the fresh ones are merged, so re-indexing is
    /// equivalent to indexing the newest content once.
    pub fn index_document(&self, path: &Path, content: &str) {
        let (local_terms, word_count) = self.tokenize_document(content);
        let meta = DocumentMeta {
            path: path.to_path_buf(),
            size: content.len() as u64,
            line_count: content.lines().count(),
            word_count,
            content_hash: self.config.hash_content.then(|| {
                let mut hasher = Sha256::new();
                hasher.update(content.as_bytes());
                hasher.finalize().into()
            }),
        };

        let mut inner = self.inner.write().unwrap();
        remove_postings(&mut inner, path);
        inner.docs.insert(path.to_path_buf(), meta);
        for (term, lines) in local_terms {
            inner
                .terms
                .entry(term)
                .or_default()
                .insert(path.to_path_buf(), lines.into_iter().collect());
        }
    }

    /// Remove a document from the metadata and every posting list; terms
    /// with no remaining documents are dropped.
    pub fn remove_document(&self, path: &Path) {
        let mut inner = self.inner.write().unwrap();
        inner.docs.remove(path);
        remove_postings(&mut inner, path);
    }

    pub fn document(&self, path: &Path) -> Option<DocumentMeta> {
        self.inner.read().unwrap().docs.get(path).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.inner.read().unwrap().docs.len()
    }

    pub fn term_count(&self) -> usize {
        self.inner.read().unwrap().terms.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.docs.clear();
        inner.terms.clear();
    }

    /// Search for documents matching the tokenized query.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> Vec<SearchHit> {
        let query_terms: Vec<String> = tokenize(query)
            .map(|t| self.fold(t))
            .filter(|t| self.accepts(t))
            .collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let inner = self.inner.read().unwrap();
        // path -> (matched term count, union of lines)
        let mut matches: HashMap<&PathBuf, (usize, BTreeSet<u32>)> = HashMap::new();
        for term in &query_terms {
            let Some(postings) = inner.terms.get(term) else {
                continue;
            };
            for (path, lines) in postings {
                let entry = matches.entry(path).or_default();
                entry.0 += 1;
                entry.1.extend(lines.iter().copied());
            }
        }

        let mut hits: Vec<SearchHit> = matches
            .into_iter()
            .filter(|(_, (matched, _))| !opts.match_all || *matched == query_terms.len())
            .filter_map(|(path, (matched, lines))| {
                let meta = inner.docs.get(path)?.clone();
                let coverage = matched as f64 / query_terms.len() as f64;
                let occurrences = lines.len() as f64;
                let normalizer = 1.0 / (1.0 + (meta.line_count.max(1) as f64).ln());
                Some(SearchHit {
                    path: path.clone(),
                    line_numbers: lines.into_iter().collect(),
                    score: coverage * occurrences * normalizer,
                    meta,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        if let Some(max) = opts.max_results {
            hits.truncate(max);
        }
        hits
    }

    /// Search by matching the pattern against the term vocabulary and
    /// unioning the postings of every matching term.
    pub fn search_regex(&self, pattern: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(Error::PatternTooLong {
                len: pattern.len(),
                max: MAX_PATTERN_LEN,
            });
        }
        let regex = regex::RegexBuilder::new(pattern)
            .case_insensitive(!self.config.case_sensitive)
            .build()
            .map_err(|e| Error::InvalidQuery(e.to_string()))?;

        let inner = self.inner.read().unwrap();
        let mut matches: HashMap<&PathBuf, BTreeSet<u32>> = HashMap::new();
        for (term, postings) in &inner.terms {
            if !regex.is_match(term) {
                continue;
            }
            for (path, lines) in postings {
                matches.entry(path).or_default().extend(lines.iter().copied());
            }
        }

        let mut hits: Vec<SearchHit> = matches
            .into_iter()
            .filter_map(|(path, lines)| {
                let meta = inner.docs.get(path)?.clone();
                let occurrences = lines.len() as f64;
                let normalizer = 1.0 / (1.0 + (meta.line_count.max(1) as f64).ln());
                Some(SearchHit {
                    path: path.clone(),
                    line_numbers: lines.into_iter().collect(),
                    score: occurrences * normalizer,
                    meta,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        if let Some(max) = opts.max_results {
            hits.truncate(max);
        }
        Ok(hits)
    }

    /// Serialize metadata and postings to a byte sink.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let inner = self.inner.read().unwrap();
        serde_json::to_writer(writer, &*inner).map_err(|e| Error::InvalidFormat(e.to_string()))
    }

    /// Restore from a byte source produced by [`save`](Self::save).
    pub fn load<R: Read>(&self, reader: &mut R) -> Result<()> {
        let loaded: Inner =
            serde_json::from_reader(reader).map_err(|e| Error::InvalidFormat(e.to_string()))?;
        *self.inner.write().unwrap() = loaded;
        Ok(())
    }
}

fn remove_postings(inner: &mut Inner, path: &Path) {
    inner.terms.retain(|_, postings| {
        postings.remove(path);
        !postings.is_empty()
    });
}

/// Split a line into maximal runs of letter/digit/underscore characters.
fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
}
