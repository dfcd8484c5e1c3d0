//! Generic parameters functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The parameter file {0:?} does not exist")]
    NotFound(PathBuf),

    #[error("Cannot load the parmeter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file.
///
/// Relative paths are resolved against the current working directory.
pub fn load<P, Q>(param_file_path: Q) -> Result<P, LoadError>
where
    P: DeserializeOwned,
    Q: AsRef<Path>
{
    let path = param_file_path.as_ref();

    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()))
    }

    // Load the file into a string
    let params_str = match read_to_string(path) {
        Ok(s) => s,
        Err(e) => return Err(LoadError::FileLoadError(e))
    };

    from_str(&params_str)
}

/// Parse parameters from a TOML string.
pub fn from_str<P>(params_str: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    match toml::from_str(params_str) {
        Ok(p) => Ok(p),
        Err(e) => Err(LoadError::DeserialiseError(e))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Dummy {
        interval: f64,
        name: String,
    }

    #[test]
    fn test_load_missing_file() {
        let res: Result<Dummy, _> = load("this/file/does/not/exist.toml");
        assert!(matches!(res, Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_from_str() {
        let d: Dummy = from_str("interval = 0.5\nname = \"test\"").unwrap();
        assert_eq!(d.interval, 0.5);
        assert_eq!(d.name, "test");

        let res: Result<Dummy, _> = from_str("interval = 0.5");
        assert!(matches!(res, Err(LoadError::DeserialiseError(_))));
    }
}
