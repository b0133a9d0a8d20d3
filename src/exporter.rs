//! Data export
//!
//! Serializes the four run logs to delimited text files. Pure sink: values
//! are written as-is, one row per tick, newline-terminated, no quoting.

use std::path::PathBuf;

use crate::config::OutputConfig;
use crate::simulation::RunLog;
use crate::SimulationError;

/// Writes the run logs as CSV files into a target directory
/// # Example
/// ```no_run
/// use safe_unicycle::config::OutputConfig;
/// use safe_unicycle::exporter::DataExporter;
/// use safe_unicycle::simulation::RunLog;
/// let exporter = DataExporter::new(&OutputConfig::default());
/// exporter.export(&RunLog::default()).unwrap();
/// ```
pub struct DataExporter {
    directory: PathBuf,
    states: String,
    controls: String,
    errors: String,
    obstacles: String,
}

/// Implementation of the DataExporter
impl DataExporter {
    /// Creates a new exporter from the output configuration
    /// # Arguments
    /// * `config` - The output directory and file names
    /// # Returns
    /// * The new exporter instance
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            directory: PathBuf::from(&config.directory),
            states: config.states.clone(),
            controls: config.controls.clone(),
            errors: config.errors.clone(),
            obstacles: config.obstacles.clone(),
        }
    }

    /// Writes all four logs
    ///
    /// The per-tick logs must have equal lengths; a mismatch fails the call
    /// before any file is touched.
    /// # Arguments
    /// * `log` - The run log to serialize
    /// # Errors
    /// * `InvalidConfiguration` on mismatched log lengths
    /// * `CsvError` / `IoError` on write failures
    pub fn export(&self, log: &RunLog) -> Result<(), SimulationError> {
        if log.controls.len() != log.states.len() || log.errors.len() != log.states.len() {
            return Err(SimulationError::InvalidConfiguration(format!(
                "log lengths differ: {} states, {} controls, {} errors",
                log.states.len(),
                log.controls.len(),
                log.errors.len()
            )));
        }
        std::fs::create_dir_all(&self.directory)?;

        self.write_rows(
            &self.states,
            &["x", "y", "theta", "v"],
            log.states.iter().map(|s| vec![s.x, s.y, s.theta, s.v]),
        )?;
        self.write_rows(
            &self.controls,
            &["acceleration", "angular_velocity"],
            log.controls
                .iter()
                .map(|c| vec![c.acceleration, c.angular_rate]),
        )?;
        self.write_rows(
            &self.errors,
            &["position_error", "angular_error"],
            log.errors
                .iter()
                .map(|e| vec![e.position_error, e.angular_error]),
        )?;
        self.write_rows(
            &self.obstacles,
            &["x", "y", "radius"],
            log.obstacles
                .iter()
                .map(|o| vec![o.center.x, o.center.y, o.radius]),
        )?;
        log::info!(
            "exported {} ticks and {} obstacles to {}",
            log.states.len(),
            log.obstacles.len(),
            self.directory.display()
        );
        Ok(())
    }

    /// Writes one CSV file with a header row and numeric records
    fn write_rows<I>(
        &self,
        filename: &str,
        header: &[&str],
        rows: I,
    ) -> Result<(), SimulationError>
    where
        I: Iterator<Item = Vec<f64>>,
    {
        let path = self.directory.join(filename);
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(header)?;
        for row in rows {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Control;
    use crate::environment::Obstacle;
    use crate::simulation::{SimulationState, TrackingError};
    use nalgebra::Vector2;
    use std::path::Path;

    fn sample_log() -> RunLog {
        RunLog {
            states: vec![
                SimulationState::new(1.0, 1.5, 0.5, 0.1),
                SimulationState::new(1.1, 1.6, 0.5, 0.12),
            ],
            controls: vec![Control::new(0.5, 0.1), Control::new(0.4, 0.05)],
            errors: vec![
                TrackingError {
                    position_error: 1.0,
                    angular_error: 0.2,
                },
                TrackingError {
                    position_error: 0.9,
                    angular_error: 0.1,
                },
            ],
            degraded: vec![false, false],
            obstacles: vec![Obstacle::new(Vector2::new(3.4, 4.5), 0.6)],
        }
    }

    fn exporter_into(dir: &Path) -> DataExporter {
        DataExporter::new(&OutputConfig {
            directory: dir.to_string_lossy().into_owned(),
            ..OutputConfig::default()
        })
    }

    #[test]
    fn test_export_writes_all_files_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        exporter_into(dir.path()).export(&sample_log()).unwrap();

        let states = std::fs::read_to_string(dir.path().join("trajectory.csv")).unwrap();
        let mut lines = states.lines();
        assert_eq!(lines.next().unwrap(), "x,y,theta,v");
        assert_eq!(lines.next().unwrap(), "1,1.5,0.5,0.1");
        assert_eq!(states.lines().count(), 3);

        let controls = std::fs::read_to_string(dir.path().join("controls.csv")).unwrap();
        assert_eq!(controls.lines().next().unwrap(), "acceleration,angular_velocity");
        assert_eq!(controls.lines().count(), 3);

        let errors = std::fs::read_to_string(dir.path().join("errors.csv")).unwrap();
        assert_eq!(errors.lines().next().unwrap(), "position_error,angular_error");

        let obstacles = std::fs::read_to_string(dir.path().join("obstacles.csv")).unwrap();
        assert_eq!(obstacles.lines().next().unwrap(), "x,y,radius");
        assert_eq!(obstacles.lines().nth(1).unwrap(), "3.4,4.5,0.6");
    }

    #[test]
    fn test_mismatched_lengths_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = sample_log();
        log.controls.pop();
        let result = exporter_into(dir.path()).export(&log);
        assert!(matches!(
            result,
            Err(SimulationError::InvalidConfiguration(_))
        ));
        assert!(!dir.path().join("trajectory.csv").exists());
    }
}
