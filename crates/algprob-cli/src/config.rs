//! Solver settings: optional JSON file, then command-line overrides.

use algprob_proof::SolverConfig;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Flags that, when given, win over the file.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverOverrides {
    pub tolerance: Option<f64>,
    pub max_passes: Option<usize>,
}

pub fn load_solver_config(path: Option<&Path>, overrides: SolverOverrides) -> Result<SolverConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read solver config {}", path.display()))?;
            serde_json::from_str::<SolverConfig>(&text)
                .with_context(|| format!("invalid solver config {}", path.display()))?
        }
        None => SolverConfig::default(),
    };
    if let Some(tolerance) = overrides.tolerance {
        config.tolerance = tolerance;
    }
    if overrides.max_passes.is_some() {
        config.max_passes = overrides.max_passes;
    }
    validate(&config)?;
    Ok(config)
}

fn validate(config: &SolverConfig) -> Result<()> {
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        bail!("tolerance must be a positive number, got {}", config.tolerance);
    }
    if config.max_passes == Some(0) {
        bail!("max_passes must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use algprob_proof::DEFAULT_TOLERANCE;
    use std::io::Write;

    fn config_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let config = load_solver_config(None, SolverOverrides::default()).unwrap();
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.max_passes, None);
    }

    #[test]
    fn file_values_fill_missing_fields_with_defaults() {
        let file = config_file(r#"{"max_passes": 40}"#);
        let config = load_solver_config(Some(file.path()), SolverOverrides::default()).unwrap();
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.max_passes, Some(40));
    }

    #[test]
    fn flags_override_file() {
        let file = config_file(r#"{"tolerance": 0.1, "max_passes": 40}"#);
        let config = load_solver_config(
            Some(file.path()),
            SolverOverrides {
                tolerance: Some(1e-9),
                max_passes: None,
            },
        )
        .unwrap();
        assert_eq!(config.tolerance, 1e-9);
        assert_eq!(config.max_passes, Some(40));
    }

    #[test]
    fn rejects_bad_files_and_values() {
        let file = config_file("{not json");
        let err = load_solver_config(Some(file.path()), SolverOverrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("invalid solver config"));

        let err = load_solver_config(
            Some(Path::new("/nonexistent/solver.json")),
            SolverOverrides::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to read"));

        let zero = SolverOverrides {
            tolerance: Some(0.0),
            max_passes: None,
        };
        assert!(load_solver_config(None, zero).is_err());
        let no_passes = SolverOverrides {
            tolerance: None,
            max_passes: Some(0),
        };
        assert!(load_solver_config(None, no_passes).is_err());
    }
}
