/// Content-addressed object key: `{prefix}/{digest[0:2]}/{digest}/{relative_path}`.
///
/// Identical bytes map to identical digest segments wherever they live
/// locally; the two-character shard bounds fan-out per virtual directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteKey(String);

impl RemoteKey {
    /// Build a key from a hex digest and a `/`-separated relative path.
    /// An empty prefix drops the leading segment.
    pub fn build(prefix: &str, digest: &str, relative_path: &str) -> Self {
        let shard = digest.get(..2).unwrap_or(digest);
        let key = if prefix.is_empty() {
            format!("{}/{}/{}", shard, digest, relative_path)
        } else {
            format!("{}/{}/{}/{}", prefix, shard, digest, relative_path)
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
