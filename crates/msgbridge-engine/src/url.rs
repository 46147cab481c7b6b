//! Endpoint addresses
//!
//! `inproc://name` and `ipc://path` are both served in-process: the part
//! after the scheme is a key in the engine's address namespace. Network
//! and unknown schemes are refused with `NotSup`.

use core::fmt;
use msgbridge_core::Errno;

const LOCAL_SCHEMES: &[&str] = &["inproc", "ipc"];

/// A parsed, locally servable address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: &'static str,
    path: String,
}

impl Address {
    /// Parse `url`
    pub fn parse(url: &str) -> Result<Self, Errno> {
        let (scheme, path) = url.split_once("://").ok_or(Errno::AddrInval)?;
        if scheme.is_empty() || path.is_empty() {
            return Err(Errno::AddrInval);
        }
        if let Some(local) = LOCAL_SCHEMES.iter().find(|s| **s == scheme) {
            return Ok(Address {
                scheme: local,
                path: path.to_string(),
            });
        }
        Err(Errno::NotSup)
    }

    /// Scheme (`transport` option)
    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Part after `://`
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path)
    }
}
