//! Template sources and path resolution.

use opencv::{core::Mat, imgcodecs, prelude::*};
use std::path::{Path, PathBuf};

/// A template to match against, from disk or already in memory.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    Path(PathBuf),
    Image(Mat),
}

impl TemplateSource {
    /// Resolve a relative path against `resource_dir`. Absolute paths and
    /// in-memory images pass through unchanged.
    fn resolved_path(path: &Path, resource_dir: Option<&Path>) -> PathBuf {
        match resource_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl From<&str> for TemplateSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<String> for TemplateSource {
    fn from(path: String) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for TemplateSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Mat> for TemplateSource {
    fn from(image: Mat) -> Self {
        Self::Image(image)
    }
}

/// Load every loadable template, skipping the rest.
///
/// A missing or undecodable file is logged and dropped; one bad template
/// never fails the whole match.
pub fn load_templates(sources: &[TemplateSource], resource_dir: Option<&Path>) -> Vec<Mat> {
    let mut templates = Vec::with_capacity(sources.len());
    for source in sources {
        match source {
            TemplateSource::Image(image) => templates.push(image.clone()),
            TemplateSource::Path(path) => {
                let path = TemplateSource::resolved_path(path, resource_dir);
                match imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR) {
                    Ok(image) if !image.empty() => {
                        log::debug!(
                            "template loaded: {} ({}x{})",
                            path.display(),
                            image.cols(),
                            image.rows()
                        );
                        templates.push(image);
                    }
                    Ok(_) => log::warn!("template could not be decoded: {}", path.display()),
                    Err(e) => log::warn!("template could not be read: {}: {e}", path.display()),
                }
            }
        }
    }
    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC3, Scalar};

    #[test]
    fn test_missing_path_is_skipped() {
        let sources = vec![
            TemplateSource::from("definitely/not/here.png"),
            TemplateSource::Image(
                Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::all(0.0)).unwrap(),
            ),
        ];
        let loaded = load_templates(&sources, None);
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_relative_path_resolution() {
        let resolved = TemplateSource::resolved_path(Path::new("btn.png"), Some(Path::new("/res")));
        assert_eq!(resolved, PathBuf::from("/res/btn.png"));

        let absolute = TemplateSource::resolved_path(Path::new("/abs/btn.png"), Some(Path::new("/res")));
        assert_eq!(absolute, PathBuf::from("/abs/btn.png"));
    }
}
