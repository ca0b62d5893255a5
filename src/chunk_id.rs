/// A chunk identifier of the form `"{document_id}#{index}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub document_id: String,
    pub index: u32,
}

impl ChunkId {
    pub fn new(document_id: &str, index: u32) -> Self {
        Self {
            document_id: document_id.to_string(),
            index,
        }
    }

    /// Parse a chunk id. Returns `None` when the suffix after the last `#`
    /// is not a chunk index.
    pub fn parse(id: &str) -> Option<Self> {
        let (document_id, index) = id.rsplit_once('#')?;
        if document_id.is_empty() {
            return None;
        }
        let index = index.parse().ok()?;
        Some(Self::new(document_id, index))
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.document_id, self.index)
    }
}

/// The document a result id belongs to.
///
/// Result ids are either chunk ids or bare document ids (a semantic index
/// may rank whole documents), so anything that does not parse as a chunk id
/// is its own document.
pub fn document_of(id: &str) -> &str {
    match id.rsplit_once('#') {
        Some((document_id, index))
            if !document_id.is_empty() && index.parse::<u32>().is_ok() =>
        {
            document_id
        }
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let id = ChunkId::new("notes/note.md", 2);
        assert_eq!(id.to_string(), "notes/note.md#2");
    }

    #[test]
    fn parse_roundtrip() {
        let id = ChunkId::parse("notes/note.md#12").unwrap();
        assert_eq!(id.document_id, "notes/note.md");
        assert_eq!(id.index, 12);
    }

    #[test]
    fn parse_uses_last_hash() {
        let id = ChunkId::parse("c#/sharp.md#0").unwrap();
        assert_eq!(id.document_id, "c#/sharp.md");
        assert_eq!(id.index, 0);
    }

    #[test]
    fn parse_rejects_non_chunk_ids() {
        assert!(ChunkId::parse("note.md").is_none());
        assert!(ChunkId::parse("note.md#intro").is_none());
        assert!(ChunkId::parse("#3").is_none());
    }

    #[test]
    fn document_of_handles_both_forms() {
        assert_eq!(document_of("a/b.md#3"), "a/b.md");
        assert_eq!(document_of("a/b.md"), "a/b.md");
        assert_eq!(document_of("a/b.md#heading"), "a/b.md#heading");
    }
}
