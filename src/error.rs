use std::time::Duration;

/// Why a single recipe ended without publishable output.
///
/// None of these stop the batch; the orchestrator turns each into a status
/// line in the job summary.
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("converter timed out after {attempts} attempt(s)")]
    ConversionTimeout { attempts: u32 },
    #[error("converter exited with {code:?}")]
    ConversionFailed { code: Option<i32> },
    #[error("unable to fetch cached {file}")]
    CacheFetchTimeout { file: String },
    #[error("no output found for {slug}.{ext}")]
    NoOutputProduced { slug: String, ext: String },
    /// Non-fatal: defaults are used instead.
    #[error("unable to read metadata: {0:#}")]
    MetadataParse(anyhow::Error),
    /// Non-fatal: the artifact keeps the converter's cover.
    #[error("unable to generate cover: {0:#}")]
    CoverGeneration(anyhow::Error),
}

/// Failure of one external process invocation.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("{program} expired after {}s", timeout.as_secs())]
    Expired { program: String, timeout: Duration },
    #[error("spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("wait {program}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
