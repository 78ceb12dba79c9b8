use serde_json::Value;
use std::fmt;

/// Normalized identity of a path: what equality, hashing and ordering use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey {
    pub absolute: bool,
    pub segments: Vec<String>,
}

/// What the store told us about the artifact behind a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub content_type: String,
    pub length: u64,
    pub document_id: String,
}

/// Location of an artifact (or a synthesized directory) inside a run's
/// artifact tree.
#[derive(Clone, Debug)]
pub struct ArtifactPath {
    key: PathKey,
    meta: Option<ArtifactMeta>,
    directory: bool,
}

impl ArtifactPath {
    /// Parses `/a/b/c` (absolute) or `a/b` (relative). Empty and `.` segments
    /// are dropped and `..` removes the previous segment, never climbing above
    /// the first one.
    pub fn parse(path: &str) -> Self {
        let absolute = path.starts_with('/');
        let mut segments: Vec<String> = vec![];
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other.to_string()),
            }
        }
        Self::from_key(PathKey { absolute, segments })
    }

    pub fn root() -> Self {
        let mut root = Self::from_key(PathKey {
            absolute: true,
            segments: vec![],
        });
        root.directory = true;
        root
    }

    fn from_key(key: PathKey) -> Self {
        ArtifactPath {
            key,
            meta: None,
            directory: false,
        }
    }

    /// Builds a path from one entry of a document's `_attachments` map.
    pub fn from_attachment(name: &str, details: &Value, document_id: &str) -> Self {
        let content_type = details
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let length = details.get("length").and_then(Value::as_u64).unwrap_or(0);
        Self::parse(name).to_absolute().with_meta(ArtifactMeta {
            content_type,
            length,
            document_id: document_id.to_string(),
        })
    }

    pub fn with_meta(mut self, meta: ArtifactMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn key(&self) -> &PathKey {
        &self.key
    }

    pub fn meta(&self) -> Option<&ArtifactMeta> {
        self.meta.as_ref()
    }

    pub fn segments(&self) -> &[String] {
        &self.key.segments
    }

    pub fn is_absolute(&self) -> bool {
        self.key.absolute
    }

    pub fn is_root(&self) -> bool {
        self.key.absolute && self.key.segments.is_empty()
    }

    pub fn is_directory(&self) -> bool {
        self.directory || self.is_root()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.key.segments.last().map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.meta.as_ref().map(|meta| meta.content_type.as_str())
    }

    pub fn length(&self) -> u64 {
        self.meta.as_ref().map_or(0, |meta| meta.length)
    }

    /// Drops the last segment; the result is always a directory. The root and
    /// the empty relative path have no parent.
    pub fn parent(&self) -> Option<ArtifactPath> {
        if self.key.segments.is_empty() {
            return None;
        }
        let mut segments = self.key.segments.clone();
        segments.pop();
        let mut parent = Self::from_key(PathKey {
            absolute: self.key.absolute,
            segments,
        });
        parent.directory = true;
        Some(parent)
    }

    /// Parent, grandparent, ... up to and including the root.
    pub fn ancestors(&self) -> impl Iterator<Item = ArtifactPath> {
        std::iter::successors(self.parent(), ArtifactPath::parent)
    }

    pub fn to_absolute(&self) -> ArtifactPath {
        if self.key.absolute {
            return self.clone();
        }
        let mut absolute = self.clone();
        absolute.key.absolute = true;
        absolute
    }

    /// Appends a relative path to this one; an absolute `other` replaces it.
    pub fn resolve(&self, other: &str) -> ArtifactPath {
        if other.starts_with('/') {
            return Self::parse(other);
        }
        let joined = format!("{}/{}", self, other);
        let mut resolved = Self::parse(&joined);
        resolved.key.absolute = self.key.absolute;
        resolved
    }
}

impl PartialEq for ArtifactPath {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ArtifactPath {}

impl std::hash::Hash for ArtifactPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for ArtifactPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArtifactPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.absolute {
            write!(f, "/")?;
        }
        write!(f, "{}", self.key.segments.join("/"))
    }
}

impl From<&str> for ArtifactPath {
    fn from(path: &str) -> Self {
        ArtifactPath::parse(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_normalizes_segments() {
        assert_eq!(ArtifactPath::parse("/a//b/./c").segments(), ["a", "b", "c"]);
        assert_eq!(ArtifactPath::parse("/a/b/../c").to_string(), "/a/c");
        assert_eq!(ArtifactPath::parse("/../a").to_string(), "/a");
        assert_eq!(ArtifactPath::parse("a/b/").to_string(), "a/b");
        assert_eq!(ArtifactPath::parse("/").to_string(), "/");
        assert!(ArtifactPath::parse("/").is_root());
    }

    #[test]
    fn equality_ignores_metadata_but_not_absoluteness() {
        let plain = ArtifactPath::parse("/x/y.txt");
        let described = ArtifactPath::parse("/x/y.txt").with_meta(ArtifactMeta {
            content_type: "text/plain".to_string(),
            length: 3,
            document_id: "doc".to_string(),
        });
        assert_eq!(plain, described);
        assert_ne!(plain, ArtifactPath::parse("x/y.txt"));
        assert_eq!(plain, ArtifactPath::parse("x/y.txt").to_absolute());
    }

    #[test]
    fn parent_is_a_directory() {
        let path = ArtifactPath::parse("/logs/term/screen1.txt");
        let parent = path.parent().unwrap();
        assert_eq!(parent.to_string(), "/logs/term");
        assert!(parent.is_directory());
        assert!(!path.is_directory());
        assert_eq!(ArtifactPath::root().parent(), None);
        assert_eq!(ArtifactPath::parse("a").parent().unwrap().to_string(), "");
    }

    #[test]
    fn ancestors_walk_up_to_the_root() {
        let ancestors: Vec<String> = ArtifactPath::parse("/a/b/c")
            .ancestors()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(ancestors, vec!["/a/b", "/a", "/"]);
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let root = ArtifactPath::root();
        assert_eq!(root.resolve("term/a.txt").to_string(), "/term/a.txt");
        assert_eq!(ArtifactPath::parse("/x").resolve("../y").to_string(), "/y");
        assert_eq!(ArtifactPath::parse("/x").resolve("/z").to_string(), "/z");
    }

    #[test]
    fn attachment_metadata_defaults_when_missing() {
        let described = ArtifactPath::from_attachment(
            "/framework/cps_record.properties",
            &json!({"content_type": "text/plain", "length": 120}),
            "art1",
        );
        assert_eq!(described.content_type(), Some("text/plain"));
        assert_eq!(described.length(), 120);
        assert_eq!(described.meta().unwrap().document_id, "art1");

        let bare = ArtifactPath::from_attachment("run.log", &json!({}), "art2");
        assert!(bare.is_absolute());
        assert_eq!(bare.content_type(), Some("unknown"));
        assert_eq!(bare.length(), 0);
    }
}
