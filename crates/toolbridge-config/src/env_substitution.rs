use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::env;
use toolbridge_core::{BridgeError, Result};

// Supports both ${VAR} and ${VAR:-default}
static ENV_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid regex pattern")
});

/// Substitute environment variables in every value of a string map.
///
/// `context` names the owning server and field in error messages.
pub fn substitute_map(values: &mut BTreeMap<String, String>, context: &str) -> Result<()> {
    for (key, value) in values.iter_mut() {
        *value = substitute_in_string(value)
            .map_err(|missing| missing_vars_error(&format!("{context}.{key}"), &missing))?;
    }
    Ok(())
}

/// Substitute environment variables in a single string.
///
/// Returns the names of referenced variables that are unset and carry no
/// default.
pub fn substitute_in_string(input: &str) -> std::result::Result<String, Vec<String>> {
    let mut missing_vars = Vec::new();

    let result = ENV_VAR_REGEX.replace_all(input, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing_vars.push(var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if missing_vars.is_empty() {
        Ok(result.into_owned())
    } else {
        Err(missing_vars)
    }
}

fn missing_vars_error(field: &str, missing: &[String]) -> BridgeError {
    BridgeError::ConfigError(format!(
        "Missing required environment variables for {}: {}",
        field,
        missing.join(", ")
    ))
}
