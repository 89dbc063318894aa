//! Locating parameter grids and reading names

use crate::error::{BatchError, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefix of flow direction grid names, `taufdr<HUC>.tif`
pub const FDR_NAME_PREFIX: &str = "taufdr";

fn is_tif(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("tif")
}

/// Parameter grids to process.
///
/// `path` is either a single `.tif` file or a directory searched
/// recursively. Results are sorted.
pub fn discover_parameter_grids(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    if path.is_file() {
        return if is_tif(path) {
            Ok(vec![path.to_path_buf()])
        } else {
            Err(BatchError::Discovery(format!("{} is not a .tif grid", path.display())))
        };
    }
    if !path.is_dir() {
        return Err(BatchError::Discovery(format!(
            "{} is neither a parameter grid nor a directory",
            path.display()
        )));
    }

    let mut builder = WalkBuilder::new(path);
    builder
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false);

    let mut grids: Vec<PathBuf> = builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .filter(|p| is_tif(p))
        .collect();
    grids.sort();

    info!("Found {} parameter grid(s) under {}", grids.len(), path.display());
    Ok(grids)
}

/// HUC code from a flow direction grid named `taufdr<HUC>.tif`
pub fn huc_from_fdr_name(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.split_once(FDR_NAME_PREFIX))
        .map(|(_, huc)| huc.to_string())
        .filter(|huc| !huc.is_empty())
        .ok_or_else(|| {
            BatchError::Discovery(format!(
                "flow direction grid {} is not named {}<HUC>.tif",
                path.display(),
                FDR_NAME_PREFIX
            ))
        })
}

/// File stem of a parameter grid
pub fn param_name(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| BatchError::Discovery(format!("{} has no file name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discover_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("monthly")).unwrap();
        for name in ["precip.tif", "monthly/tmax_01.tif", "notes.txt", "monthly/tmax_01.tif.aux.xml"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let grids = discover_parameter_grids(dir.path()).unwrap();
        assert_eq!(
            grids,
            vec![dir.path().join("monthly/tmax_01.tif"), dir.path().join("precip.tif")]
        );
    }

    #[test]
    fn test_discover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let grid = dir.path().join("precip.tif");
        fs::write(&grid, b"").unwrap();
        assert_eq!(discover_parameter_grids(&grid).unwrap(), vec![grid]);

        let txt = dir.path().join("precip.txt");
        fs::write(&txt, b"").unwrap();
        assert!(matches!(discover_parameter_grids(&txt), Err(BatchError::Discovery(_))));
        assert!(matches!(
            discover_parameter_grids(dir.path().join("missing")),
            Err(BatchError::Discovery(_))
        ));
    }

    #[test]
    fn test_huc_from_fdr_name() {
        assert_eq!(huc_from_fdr_name("data/taufdr1002.tif").unwrap(), "1002");
        assert_eq!(huc_from_fdr_name("taufdr170102030405.tif").unwrap(), "170102030405");
        assert!(huc_from_fdr_name("fdr1002.tif").is_err());
        assert!(huc_from_fdr_name("taufdr.tif").is_err());
    }

    #[test]
    fn test_param_name() {
        assert_eq!(param_name("in/prism_ppt_01_2020.tif").unwrap(), "prism_ppt_01_2020");
    }
}
