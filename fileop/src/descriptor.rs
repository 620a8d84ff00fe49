//! Helpers shared by the command descriptor parsers of every operation.
//!
//! A descriptor is a `/`-separated string starting with the operation name, followed by
//! `name/value` pairs, for example `unzip/bucket/YnVja2V0/overwrite/1`.  Each operation validates
//! the whole string against its own grammar first; the helpers here then pull individual
//! parameters out of an already-validated descriptor.
use crate::Result;
use base64::Engine;
use snafu::prelude::*;

/// URL-safe base64, accepting values both with and without `=` padding
const URL_SAFE_LENIENT: base64::engine::GeneralPurpose = base64::engine::GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    base64::engine::GeneralPurposeConfig::new()
        .with_decode_padding_mode(base64::engine::DecodePaddingMode::Indifferent),
);

/// Character class of an encoded descriptor token
pub(crate) const ENCODED_TOKEN: &str = "[0-9a-zA-Z_=-]+";

/// Get the raw value of the first `name/value` pair with the given name
pub(crate) fn param<'a>(cmd: &'a str, name: &str) -> Option<&'a str> {
    // Skip the operation name; everything after it is alternating names and values
    let mut segments = cmd.split('/').skip(1);

    while let Some(segment) = segments.next() {
        let value = segments.next()?;
        if segment == name {
            return Some(value);
        }
    }

    None
}

/// Get the value of the first `name/value` pair with the given name, decoded from URL-safe base64
pub(crate) fn decoded_param(
    operation: &'static str,
    cmd: &str,
    name: &'static str,
) -> Result<Option<String>> {
    param(cmd, name)
        .map(|value| decode_token(value).context(crate::error::InvalidParameterSnafu { operation, name }))
        .transpose()
}

/// Get the value of a numeric parameter, failing if it's present but not a positive number
pub(crate) fn positive_param(
    operation: &'static str,
    cmd: &str,
    name: &'static str,
) -> Result<Option<u32>> {
    match param(cmd, name) {
        None => Ok(None),
        Some(value) => match value.parse::<u32>() {
            Ok(number) if number > 0 => Ok(Some(number)),
            _ => crate::error::InvalidParameterSnafu { operation, name }.fail(),
        },
    }
}

/// Get the value of a `0|1` flag parameter
pub(crate) fn flag_param(cmd: &str, name: &str) -> Option<bool> {
    param(cmd, name).map(|value| value == "1")
}

/// Encode a value the way descriptor tokens are encoded.
///
/// The inverse of the decoding done by [`decoded_param`], useful to callers building descriptors.
pub fn encode_token(value: impl AsRef<[u8]>) -> String {
    base64::engine::general_purpose::URL_SAFE.encode(value)
}

fn decode_token(value: &str) -> Option<String> {
    let bytes = URL_SAFE_LENIENT.decode(value).ok()?;

    String::from_utf8(bytes).ok()
}
