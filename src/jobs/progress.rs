//! Deterministic progress mapping
//!
//! Progress is a pure function of phase and counters, never of wall-clock
//! time: fetch/parse occupies 5–40, import/processing 40–99, completion
//! is exactly 100. Combined with the runner only ever raising the
//! persisted value, job progress is monotone by construction.

use super::types::JobStatus;

/// Floor of the download/parse band
pub const FETCH_BAND_START: u8 = 5;
/// Where import begins
pub const IMPORT_BAND_START: u8 = 40;
/// Import never reports beyond this before completion
pub const IMPORT_BAND_END: u8 = 99;

pub struct ProgressReporter;

impl ProgressReporter {
    /// Map phase + counters to a 0–100 value
    pub fn progress_for(status: JobStatus, processed: u64, total: u64) -> u8 {
        match status {
            JobStatus::Pending => 0,
            JobStatus::Downloading => FETCH_BAND_START,
            JobStatus::Parsing => 25,
            JobStatus::Importing | JobStatus::Processing => {
                if total == 0 {
                    return IMPORT_BAND_START;
                }
                let span = (IMPORT_BAND_END - IMPORT_BAND_START) as u64;
                let done = processed.min(total);
                IMPORT_BAND_START + ((done * span) / total) as u8
            }
            JobStatus::Completed => 100,
            // Failed jobs keep whatever progress they had; callers pass
            // the stored value through
            JobStatus::Failed => 0,
        }
    }

    /// Human-readable status line for the same inputs
    pub fn message_for(status: JobStatus, processed: u64, total: u64) -> String {
        match status {
            JobStatus::Pending => "queued".to_string(),
            JobStatus::Downloading => "downloading source".to_string(),
            JobStatus::Parsing => "parsing source".to_string(),
            JobStatus::Importing => {
                format!("importing {processed}/{total} records")
            }
            JobStatus::Processing => {
                format!("reconciling {processed}/{total} records")
            }
            JobStatus::Completed => format!("completed: {total} records"),
            JobStatus::Failed => "failed".to_string(),
        }
    }
}
