const STORAGE_SCHEME: &str = "gs://";
const PUBLIC_HOST: &str = "https://firebasestorage.googleapis.com/v0/b";

/// Rewrites stored animation paths into URLs the client can fetch.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    bucket: String,
}

impl MediaResolver {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into() }
    }

    /// `gs://<anything>/<file>` becomes the public download URL for `<file>`.
    /// Every other path is returned unchanged.
    pub fn resolve(&self, path: &str) -> String {
        match path.strip_prefix(STORAGE_SCHEME) {
            Some(rest) => {
                let file_name = rest.rsplit('/').next().unwrap_or(rest);
                format!("{}/{}/o/{}?alt=media", PUBLIC_HOST, self.bucket, file_name)
            }
            None => path.to_string(),
        }
    }

    pub fn resolve_optional(&self, path: Option<&str>) -> Option<String> {
        path.map(|p| self.resolve(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_path_becomes_public_url() {
        let resolver = MediaResolver::new("lessons.example.app");
        assert_eq!(
            resolver.resolve("gs://lessons.example.app/animations/hello.mp4"),
            "https://firebasestorage.googleapis.com/v0/b/lessons.example.app/o/hello.mp4?alt=media"
        );
        // Deterministic for the same input.
        assert_eq!(
            resolver.resolve("gs://other/x/y/z.gif"),
            resolver.resolve("gs://other/x/y/z.gif")
        );
    }

    #[test]
    fn test_resolved_urls_pass_through() {
        let resolver = MediaResolver::new("bucket");
        let url = "https://firebasestorage.googleapis.com/v0/b/bucket/o/hello.mp4?alt=media";
        assert_eq!(resolver.resolve(url), url);
        assert_eq!(resolver.resolve("/static/local.mp4"), "/static/local.mp4");
        assert_eq!(resolver.resolve_optional(None), None);
    }
}
