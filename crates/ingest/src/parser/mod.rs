pub mod jsonl;
pub mod text;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracelens_core::error::{Result, TraceLensError};
use tracelens_core::model::{FileType, Span, TraceFile};

pub use jsonl::JsonlParser;
pub use text::TextLogParser;

/// Turns the contents of one file into spans, skipping records it cannot use.
pub trait SpanParser: Send + Sync {
    fn file_type(&self) -> FileType;

    fn parse_str(&self, content: &str, source_file: &str) -> Vec<Span>;

    /// Fails only when the file itself cannot be read.
    fn parse_path(&self, path: &Path) -> Result<Vec<Span>> {
        let bytes = fs::read(path)
            .map_err(|e| TraceLensError::Io(format!("failed reading {}: {e}", path.display())))?;
        let content = String::from_utf8_lossy(&bytes);
        Ok(self.parse_str(&content, &path.display().to_string()))
    }
}

/// Stateless selector keyed on the file extension.
pub fn select_parser(path: &Path) -> Result<Arc<dyn SpanParser>> {
    match FileType::from_path(path) {
        Some(file_type) => Ok(new_parser(file_type)),
        None => Err(TraceLensError::UnsupportedFile(path.display().to_string())),
    }
}

fn new_parser(file_type: FileType) -> Arc<dyn SpanParser> {
    match file_type {
        FileType::Log => Arc::new(TextLogParser),
        FileType::Jsonl => Arc::new(JsonlParser),
    }
}

/// Caches one parser instance per file type for the lifetime of a session.
#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<FileType, Arc<dyn SpanParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parser_for(&mut self, path: &Path) -> Result<Arc<dyn SpanParser>> {
        let file_type = FileType::from_path(path)
            .ok_or_else(|| TraceLensError::UnsupportedFile(path.display().to_string()))?;
        Ok(self
            .parsers
            .entry(file_type)
            .or_insert_with(|| new_parser(file_type))
            .clone())
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<TraceFile> {
        let parser = self.parser_for(path)?;
        let spans = parser.parse_path(path)?;
        Ok(TraceFile {
            file_path: path.to_path_buf(),
            file_type: parser.file_type(),
            spans,
        })
    }

    pub fn cached(&self) -> usize {
        self.parsers.len()
    }

    pub fn clear(&mut self) {
        self.parsers.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn selector_matches_extensions_case_insensitively() {
        assert_eq!(
            select_parser(Path::new("a.LOG")).unwrap().file_type(),
            FileType::Log
        );
        assert_eq!(
            select_parser(Path::new("a.Jsonl")).unwrap().file_type(),
            FileType::Jsonl
        );
        let err = select_parser(Path::new("a.csv")).err().unwrap();
        assert!(matches!(err, TraceLensError::UnsupportedFile(_)));
    }

    #[test]
    fn registry_caches_and_clears() {
        let mut registry = ParserRegistry::new();
        registry.parser_for(Path::new("a.log")).unwrap();
        registry.parser_for(Path::new("b.log")).unwrap();
        registry.parser_for(Path::new("c.jsonl")).unwrap();
        assert_eq!(registry.cached(), 2);
        registry.clear();
        assert_eq!(registry.cached(), 0);
    }

    #[test]
    fn parse_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spans.log");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(testkit::SAMPLE_LOG_BLOCK.as_bytes()).unwrap();

        let mut registry = ParserRegistry::new();
        let parsed = registry.parse_file(&path).unwrap();
        assert_eq!(parsed.file_type, FileType::Log);
        assert_eq!(parsed.spans.len(), 1);
        assert_eq!(parsed.spans[0].source_file, path.display().to_string());
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut registry = ParserRegistry::new();
        let err = registry
            .parse_file(Path::new("/definitely/not/here.jsonl"))
            .unwrap_err();
        assert!(matches!(err, TraceLensError::Io(_)));
    }
}
