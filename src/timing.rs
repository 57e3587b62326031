//! Wraps the scraper start command with resource timing instrumentation and
//! parses the resulting output file.
//!
//! The wrapper is GNU `time -v`, which writes a block of `Label: value`
//! lines. If the wrapped command never ran (a failed compile, for instance)
//! the file simply never appears and metrics are absent, which is not an
//! error.

use serde::{Deserialize, Serialize};

/// Produces a command line that runs `inner` under the timing wrapper,
/// writing resource-usage data to `output_file`.
pub fn wrap(inner: &str, output_file: &str) -> String {
    format!("/usr/bin/time -v -o {output_file} {inner}")
}

/// Resource usage of a finished scraper run, as reported by GNU `time -v`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingMetrics {
    /// Elapsed wall-clock seconds.
    pub wall_time: f64,
    /// CPU seconds spent in user mode.
    pub user_time: f64,
    /// CPU seconds spent in kernel mode.
    pub system_time: f64,
    /// Peak resident set size in kilobytes.
    pub max_rss_kb: u64,
    pub minor_page_faults: u64,
    pub major_page_faults: u64,
    pub fs_inputs: u64,
    pub fs_outputs: u64,
    pub voluntary_context_switches: u64,
    pub involuntary_context_switches: u64,
    pub page_size_bytes: u64,
}

impl TimingMetrics {
    /// Parses GNU `time -v` output. Returns `None` when the text contains no
    /// recognizable timing lines at all. Individual malformed values are
    /// skipped rather than failing the whole parse.
    pub fn parse(text: &str) -> Option<TimingMetrics> {
        let mut metrics = TimingMetrics::default();
        let mut matched = false;
        for line in text.lines() {
            let Some((label, value)) = line.trim_start().split_once(": ") else {
                continue;
            };
            let value = value.trim();
            let recognized = match label {
                "User time (seconds)" => assign_f64(&mut metrics.user_time, value),
                "System time (seconds)" => assign_f64(&mut metrics.system_time, value),
                "Elapsed (wall clock) time (h:mm:ss or m:ss)" => {
                    match parse_clock(value) {
                        Some(seconds) => {
                            metrics.wall_time = seconds;
                            true
                        }
                        None => false,
                    }
                }
                "Maximum resident set size (kbytes)" => assign_u64(&mut metrics.max_rss_kb, value),
                "Minor (reclaiming a frame) page faults" => {
                    assign_u64(&mut metrics.minor_page_faults, value)
                }
                "Major (requiring I/O) page faults" => {
                    assign_u64(&mut metrics.major_page_faults, value)
                }
                "File system inputs" => assign_u64(&mut metrics.fs_inputs, value),
                "File system outputs" => assign_u64(&mut metrics.fs_outputs, value),
                "Voluntary context switches" => {
                    assign_u64(&mut metrics.voluntary_context_switches, value)
                }
                "Involuntary context switches" => {
                    assign_u64(&mut metrics.involuntary_context_switches, value)
                }
                "Page size (bytes)" => assign_u64(&mut metrics.page_size_bytes, value),
                _ => false,
            };
            matched |= recognized;
        }
        matched.then_some(metrics)
    }
}

fn assign_f64(slot: &mut f64, value: &str) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

fn assign_u64(slot: &mut u64, value: &str) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

/// Parses the wall-clock formats `h:mm:ss` and `m:ss.ff` into seconds.
fn parse_clock(value: &str) -> Option<f64> {
    let parts: Vec<&str> = value.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.parse::<f64>().ok()?),
        [h, m, s] => (
            h.parse::<f64>().ok()?,
            m.parse::<f64>().ok()?,
            s.parse::<f64>().ok()?,
        ),
        _ => return None,
    };
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
\tCommand being timed: \"/start scraper\"
\tUser time (seconds): 1.52
\tSystem time (seconds): 0.21
\tPercent of CPU this job got: 87%
\tElapsed (wall clock) time (h:mm:ss or m:ss): 0:01.98
\tMaximum resident set size (kbytes): 40784
\tMajor (requiring I/O) page faults: 3
\tMinor (reclaiming a frame) page faults: 11941
\tVoluntary context switches: 532
\tInvoluntary context switches: 114
\tFile system inputs: 856
\tFile system outputs: 1264
\tPage size (bytes): 4096
\tExit status: 0
";

    #[test]
    fn wrap_builds_the_time_invocation() {
        assert_eq!(
            wrap("/start scraper", "/app/time.output"),
            "/usr/bin/time -v -o /app/time.output /start scraper"
        );
    }

    #[test]
    fn parses_a_full_report() {
        let metrics = TimingMetrics::parse(SAMPLE).unwrap();
        assert_eq!(metrics.user_time, 1.52);
        assert_eq!(metrics.system_time, 0.21);
        assert!((metrics.wall_time - 1.98).abs() < 1e-9);
        assert_eq!(metrics.max_rss_kb, 40_784);
        assert_eq!(metrics.major_page_faults, 3);
        assert_eq!(metrics.minor_page_faults, 11_941);
        assert_eq!(metrics.voluntary_context_switches, 532);
        assert_eq!(metrics.involuntary_context_switches, 114);
        assert_eq!(metrics.fs_inputs, 856);
        assert_eq!(metrics.fs_outputs, 1264);
        assert_eq!(metrics.page_size_bytes, 4096);
    }

    #[test]
    fn hours_in_the_wall_clock() {
        let metrics =
            TimingMetrics::parse("\tElapsed (wall clock) time (h:mm:ss or m:ss): 1:02:03\n")
                .unwrap();
        assert_eq!(metrics.wall_time, 3723.0);
    }

    #[test]
    fn unrecognizable_text_is_not_a_report() {
        assert_eq!(TimingMetrics::parse(""), None);
        assert_eq!(TimingMetrics::parse("bash: /start: No such file\n"), None);
    }

    #[test]
    fn malformed_values_are_skipped() {
        let text = "\tUser time (seconds): garbage\n\tSystem time (seconds): 0.5\n";
        let metrics = TimingMetrics::parse(text).unwrap();
        assert_eq!(metrics.user_time, 0.0);
        assert_eq!(metrics.system_time, 0.5);
    }
}
