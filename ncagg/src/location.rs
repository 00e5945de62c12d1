//! Location-string normalisation. Scan results and `netcdf@location` both
//! funnel through here before being handed to the dataset loader.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Url(String),
}

impl Location {
    /// Parse a raw `location` attribute value, resolving relative file
    /// paths against `base`.
    pub fn parse(raw: &str, base: Option<&Path>) -> Location {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Location::Url(raw.to_string());
        }

        let raw = raw.strip_prefix("file:").unwrap_or(raw);
        let p = PathBuf::from(raw);
        let p = if p.is_relative() {
            base.map_or(p.clone(), |b| b.join(&p))
        } else {
            p
        };
        Location::File(p)
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Location::File(p) => Some(p),
            Location::Url(_) => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            Location::File(p) => p.to_string_lossy().to_string(),
            Location::Url(u) => u.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_resolves_against_base() {
        let loc = Location::parse("m0.nc", Some(Path::new("/data/agg")));
        assert_eq!(loc.as_path(), Some(Path::new("/data/agg/m0.nc")));
    }

    #[test]
    fn absolute_path_ignores_base() {
        let loc = Location::parse("/abs/m0.nc", Some(Path::new("/data/agg")));
        assert_eq!(loc.as_path(), Some(Path::new("/abs/m0.nc")));
    }

    #[test]
    fn url_is_not_a_path() {
        let loc = Location::parse("https://example.org/m0.nc", None);
        assert_eq!(loc.as_path(), None);
    }
}
