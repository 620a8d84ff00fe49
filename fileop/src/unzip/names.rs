//! Repair of zip entry names that aren't UTF-8.
//!
//! Zip archives created by Windows tools on Chinese-locale systems store names in the legacy GBK
//! code page without setting the UTF-8 flag.  Those names are transcoded here so they can be used
//! as object keys.
use crate::Result;
use snafu::prelude::*;
use std::borrow::Cow;

/// Decode a raw zip entry name to UTF-8.
///
/// Valid UTF-8 is returned as-is.  Anything else is decoded as GBK, and if that fails too the
/// name is unusable and the whole job must fail.
pub(crate) fn decode_entry_name(raw_name: &[u8]) -> Result<Cow<'_, str>> {
    if let Ok(name) = std::str::from_utf8(raw_name) {
        return Ok(Cow::Borrowed(name));
    }

    encoding_rs::GBK
        .decode_without_bom_handling_and_without_replacement(raw_name)
        .with_context(|| crate::error::NameDecodingSnafu {
            raw_name: String::from_utf8_lossy(raw_name),
        })
}
