//! Resident memory of the current process from `/proc/self/statm`.

use serde::Serialize;

use super::CollectError;

const STATM_PATH: &str = "/proc/self/statm";
const PAGE_SIZE: u64 = 4096;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ProcessMetrics {
    pub rss_mb: f64,
    pub virtual_mb: f64,
}

/// Parse `statm` content: `size resident shared text lib data dt`, in pages.
pub fn parse_statm(content: &str, page_size: u64) -> Result<ProcessMetrics, CollectError> {
    let mut fields = content.split_whitespace();
    let mut next = |name: &str| -> Result<u64, CollectError> {
        fields
            .next()
            .ok_or_else(|| CollectError::Parse(format!("statm: missing {name}")))?
            .parse::<u64>()
            .map_err(|e| CollectError::Parse(format!("statm: bad {name}: {e}")))
    };
    let size = next("size")?;
    let resident = next("resident")?;
    let to_mb = |pages: u64| (pages * page_size) as f64 / (1024.0 * 1024.0);
    Ok(ProcessMetrics {
        rss_mb: to_mb(resident),
        virtual_mb: to_mb(size),
    })
}

/// Read the current process's memory usage.
pub fn read_process_metrics() -> Result<ProcessMetrics, CollectError> {
    if !cfg!(target_os = "linux") {
        return Err(CollectError::Unavailable(
            "process memory requires /proc".to_string(),
        ));
    }
    let content = std::fs::read_to_string(STATM_PATH)?;
    parse_statm(&content, PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statm() {
        let m = parse_statm("51200 25600 1000 200 0 30000 0\n", 4096).unwrap();
        assert_eq!(m.virtual_mb, 200.0);
        assert_eq!(m.rss_mb, 100.0);
    }

    #[test]
    fn test_parse_statm_errors() {
        assert!(matches!(parse_statm("", 4096), Err(CollectError::Parse(_))));
        assert!(matches!(parse_statm("12 abc", 4096), Err(CollectError::Parse(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_self() {
        let m = read_process_metrics().unwrap();
        assert!(m.rss_mb > 0.0);
        assert!(m.virtual_mb >= m.rss_mb);
    }
}
