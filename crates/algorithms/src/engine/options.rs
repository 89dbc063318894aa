//! Typed engine options
//!
//! Options arrive as `key=value` pairs from the command line or as TOML
//! tables from a batch configuration.

use fcpg_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Option keys accepted by [`NativeOptions`]
pub const NATIVE_OPTION_KEYS: &[&str] = &["threads"];
/// Option keys accepted by [`TaudemOptions`]
pub const TAUDEM_OPTION_KEYS: &[&str] = &["cores", "mpi_call", "mpi_arg"];

/// Split `key=value` strings into pairs
pub fn parse_option_pairs<S: AsRef<str>>(raw: &[S]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|s| {
            let s = s.as_ref();
            s.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| Error::invalid_param("option", s, "expected key=value"))
        })
        .collect()
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::invalid_param(key, value, "could not parse option value"))
}

/// Options of the in-process engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeOptions {
    /// Worker threads; the global rayon pool when `None`
    pub threads: Option<usize>,
}

impl NativeOptions {
    /// Build from `key=value` pairs. Unknown keys are ignored with a warning.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "threads" => {
                    let n: usize = parse_value("threads", value)?;
                    if n == 0 {
                        return Err(Error::invalid_param("threads", n, "must be at least 1"));
                    }
                    options.threads = Some(n);
                }
                other => warn!("Option {} is invalid for the native engine", other),
            }
        }
        Ok(options)
    }
}

/// Options of the TauDEM command-line engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaudemOptions {
    /// MPI processes
    pub cores: usize,
    /// MPI launcher
    pub mpi_call: String,
    /// Launcher flag preceding the process count
    pub mpi_arg: String,
}

impl Default for TaudemOptions {
    fn default() -> Self {
        Self {
            cores: 1,
            mpi_call: "mpiexec".to_string(),
            mpi_arg: "-n".to_string(),
        }
    }
}

impl TaudemOptions {
    /// Build from `key=value` pairs. Unknown keys are ignored with a warning.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "cores" => {
                    options.cores = parse_value("cores", value)?;
                    if options.cores == 0 {
                        return Err(Error::invalid_param("cores", 0, "must be at least 1"));
                    }
                }
                "mpi_call" => options.mpi_call = value.clone(),
                "mpi_arg" => options.mpi_arg = value.clone(),
                other => warn!("Option {} is invalid for the TauDEM engine", other),
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_option_pairs() {
        let pairs = parse_option_pairs(&["cores=4", " mpi_call = srun "]).unwrap();
        assert_eq!(pairs[0], ("cores".to_string(), "4".to_string()));
        assert_eq!(pairs[1], ("mpi_call".to_string(), "srun".to_string()));
        assert!(parse_option_pairs(&["cores"]).is_err());
        assert!(parse_option_pairs(&["=4"]).is_err());
    }

    #[test]
    fn test_taudem_options() {
        let pairs = parse_option_pairs(&["cores=8", "mpi_arg=-np", "colour=blue"]).unwrap();
        let options = TaudemOptions::from_pairs(&pairs).unwrap();
        assert_eq!(options.cores, 8);
        assert_eq!(options.mpi_arg, "-np");
        assert_eq!(options.mpi_call, "mpiexec");

        let bad = parse_option_pairs(&["cores=many"]).unwrap();
        assert!(TaudemOptions::from_pairs(&bad).is_err());
    }

    #[test]
    fn test_native_options() {
        let pairs = parse_option_pairs(&["threads=2"]).unwrap();
        assert_eq!(NativeOptions::from_pairs(&pairs).unwrap().threads, Some(2));
        let zero = parse_option_pairs(&["threads=0"]).unwrap();
        assert!(NativeOptions::from_pairs(&zero).is_err());
    }

    #[test]
    fn test_taudem_options_serde_defaults() {
        let options: TaudemOptions = serde_json::from_str(r#"{"cores": 3}"#).unwrap();
        assert_eq!(options.cores, 3);
        assert_eq!(options.mpi_arg, "-n");
    }
}
