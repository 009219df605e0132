use crate::analyzer::report::Detection;
use crate::error::RuleError;
use crate::parser::document::PipelineDocument;

/// Matrix jobs that leave `fail-fast` at its implicit default.
pub fn matrix_no_failfast(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let jobs: Vec<&str> = doc
        .jobs()
        .iter()
        .filter(|job| job.matrix.is_some() && job.fail_fast().is_none())
        .map(|job| job.id.as_str())
        .collect();

    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::info(format!(
        "Matrix without explicit `fail-fast` in jobs [{}]",
        jobs.join(", ")
    ))])
}

/// Matrices with more than two dimensions multiply runner minutes quickly.
pub fn large_matrix(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let jobs: Vec<String> = doc
        .jobs()
        .iter()
        .filter_map(|job| {
            let matrix = job.matrix.as_ref()?;
            (matrix.dimension_count() > 2).then(|| {
                format!(
                    "{} ({} dimensions, {} combinations)",
                    job.id,
                    matrix.dimension_count(),
                    matrix.total_combinations()
                )
            })
        })
        .collect();

    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::warning(format!(
        "Large matrix in jobs [{}]",
        jobs.join(", ")
    ))])
}

/// Jobs that inherit the 360-minute default timeout.
///
/// Calls to reusable workflows cannot set `timeout-minutes` and are skipped.
pub fn no_timeout(doc: &PipelineDocument) -> Result<Vec<Detection>, RuleError> {
    let jobs: Vec<&str> = doc
        .jobs()
        .iter()
        .filter(|job| !job.is_reusable_call() && !job.has_timeout())
        .map(|job| job.id.as_str())
        .collect();

    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Detection::info(format!(
        "No `timeout-minutes` in jobs [{}] (default is 360 minutes)",
        jobs.join(", ")
    ))])
}
