use crate::descriptor::{self, ENCODED_TOKEN};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::prelude::*;
use std::str::FromStr;

const OPERATION: &str = "unzip";

/// The parameters of an unzip command.
///
/// Parsed from a descriptor of the form
/// `unzip/bucket/<encoded bucket>[/prefix/<encoded prefix>][/overwrite/(0|1)]`, where the
/// encoded values are URL-safe base64.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnzipDescriptor {
    /// Bucket the extracted files are written to
    pub bucket: String,

    /// Prepended verbatim to every entry name to form the object key.  A trailing `/` is not
    /// implied.
    pub prefix: String,

    /// Replace existing objects with the same key
    pub overwrite: bool,
}

impl UnzipDescriptor {
    /// Build the descriptor string for these parameters
    pub fn to_command(&self) -> String {
        let mut cmd = format!("unzip/bucket/{}", descriptor::encode_token(&self.bucket));
        if !self.prefix.is_empty() {
            cmd.push_str("/prefix/");
            cmd.push_str(&descriptor::encode_token(&self.prefix));
        }
        if self.overwrite {
            cmd.push_str("/overwrite/1");
        }

        cmd
    }
}

impl FromStr for UnzipDescriptor {
    type Err = crate::FileOpError;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        static GRAMMAR: Lazy<Regex> = Lazy::new(|| {
            Regex::new(&format!(
                "^unzip/bucket/{ENCODED_TOKEN}(/prefix/{ENCODED_TOKEN})?(/overwrite/(0|1))?$"
            ))
            .expect("BUG: invalid unzip grammar regex")
        });

        ensure!(
            GRAMMAR.is_match(cmd),
            crate::error::InvalidDescriptorSnafu {
                operation: OPERATION,
                cmd
            }
        );

        let bucket = descriptor::decoded_param(OPERATION, cmd, "bucket")?
            .expect("BUG: grammar requires a bucket");
        let prefix = descriptor::decoded_param(OPERATION, cmd, "prefix")?.unwrap_or_default();
        let overwrite = descriptor::flag_param(cmd, "overwrite").unwrap_or(false);

        Ok(Self {
            bucket,
            prefix,
            overwrite,
        })
    }
}
