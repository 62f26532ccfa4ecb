use crate::{Error, Result};

use std::time::Duration;

/// Longest unit name systemd accepts (`UNIT_NAME_MAX - 1`).
const UNIT_NAME_MAX: usize = 255;

/// Length of the `<uuid>.scope` suffix appended to a prefix.
const UUID_SCOPE_SUFFIX_LEN: usize = 36 + ".scope".len();

pub(crate) fn validate_unit_prefix(input: &str) -> Result<()> {
    validate_no_control("unit prefix", input)?;
    if input.is_empty() {
        return Err(Error::invalid_input("unit prefix must not be empty"));
    }
    if input.contains('/') || input.contains('\\') {
        return Err(Error::invalid_input(
            "unit prefix must not contain path separators",
        ));
    }
    if !input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.'))
    {
        return Err(Error::invalid_input(
            "unit prefix may only contain ASCII letters, digits, ':', '-', '_' and '.'",
        ));
    }
    if input.len() + UUID_SCOPE_SUFFIX_LEN > UNIT_NAME_MAX {
        return Err(Error::invalid_input("unit prefix is too long"));
    }
    Ok(())
}

pub(crate) fn validate_slice_name(context: &'static str, input: &str) -> Result<()> {
    validate_no_control(context, input)?;
    if input.contains('/') {
        return Err(Error::invalid_input(format!(
            "{context} must not contain path separators"
        )));
    }
    if !input.ends_with(".slice") {
        return Err(Error::invalid_input(format!(
            "{context} must end with .slice"
        )));
    }
    Ok(())
}

pub(crate) fn validate_no_control(context: &'static str, input: &str) -> Result<()> {
    if input.contains('\0') {
        return Err(Error::invalid_input(format!(
            "{context} must not contain NUL"
        )));
    }
    if input.contains('\n') || input.contains('\r') {
        return Err(Error::invalid_input(format!(
            "{context} must not contain newlines"
        )));
    }
    if input.chars().any(|c| c.is_control()) {
        return Err(Error::invalid_input(format!(
            "{context} must not contain control characters"
        )));
    }
    Ok(())
}

#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
pub(crate) fn duration_to_micros_saturating(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
