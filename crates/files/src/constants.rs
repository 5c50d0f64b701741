/// Filename of the study manifest handed to the validation job.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Filename of the fixed pipeline configuration handed to the validation job.
pub const PIPELINE_CONFIG_FILE_NAME: &str = "pipeline.json";

/// Directory, relative to a batch directory, where the job writes one result file per study.
pub const RESULTS_DIR_NAME: &str = "results";
