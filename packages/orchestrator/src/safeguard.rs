//! The construction-time forbidden-generator safeguard.
//!
//! Rust has no runtime reflection over "which class was bound," so the
//! check this module performs is the closest faithful rendering: the
//! caller passes the `&'static str` name of whichever synthetic-data
//! generator it intends to wire up, and construction fails immediately
//! if that name matches the known-forbidden one.

use capi_demo_agents::synthetic_data::forbidden::FORBIDDEN_MARKER;
use thiserror::Error;

/// Raised by [`crate::Orchestrator::new`] when a forbidden generator
/// name is bound.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SafeguardError {
    /// The generator name matched [`FORBIDDEN_MARKER`].
    #[error("refusing to construct orchestrator with forbidden synthetic-data generator: {0}")]
    ForbiddenGenerator(String),
}

/// Rejects `generator_name` if it names the forbidden synthetic-data
/// generator and `force_llm_data_generation` is enabled.
///
/// `force_llm_data_generation` defaults to `true` and must stay `true`
/// in production; it exists at all only so a development build can
/// intentionally bind the forbidden generator without tripping this
/// safeguard.
///
/// # Errors
///
/// Returns [`SafeguardError::ForbiddenGenerator`] if `generator_name`
/// equals [`FORBIDDEN_MARKER`] and `force_llm_data_generation` is `true`.
pub fn check_generator_name(
    generator_name: &str,
    force_llm_data_generation: bool,
) -> Result<(), SafeguardError> {
    if generator_name == FORBIDDEN_MARKER && force_llm_data_generation {
        return Err(SafeguardError::ForbiddenGenerator(generator_name.to_string()));
    }
    Ok(())
}

/// Reads `FORCE_LLM_DATA_GENERATION` from the environment, defaulting to
/// `true`.
#[must_use]
pub fn force_llm_data_generation_from_env() -> bool {
    std::env::var("FORCE_LLM_DATA_GENERATION")
        .map(|v| !(v.eq_ignore_ascii_case("false") || v == "0"))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_forbidden_marker_when_forced() {
        assert_eq!(
            check_generator_name(FORBIDDEN_MARKER, true),
            Err(SafeguardError::ForbiddenGenerator(FORBIDDEN_MARKER.to_string()))
        );
    }

    #[test]
    fn allows_forbidden_marker_when_not_forced() {
        assert!(check_generator_name(FORBIDDEN_MARKER, false).is_ok());
    }

    #[test]
    fn accepts_the_real_generator() {
        assert!(check_generator_name(capi_demo_agents::synthetic_data::GENERATOR_MARKER, true).is_ok());
    }
}
