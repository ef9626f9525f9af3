use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, TimeZone};
use reel_postprocess::{ProjectReport, StepOutcome};

pub const SCREEN_FILE: &str = "screen.mov";
pub const CAMERA_FILE: &str = "camera.mov";

/// Creates a fresh project directory under `parent`. Existing directories
/// are never reused; a numeric suffix is added instead.
pub fn create_dir<Tz: TimeZone>(
    parent: &Path,
    name: Option<&str>,
    now: &DateTime<Tz>,
) -> io::Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let base = name
        .map(sanitize)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("Reel {}", now.format("%Y-%m-%d at %H.%M.%S")));

    std::fs::create_dir_all(parent)?;

    let mut attempt = 1;
    loop {
        let candidate = match attempt {
            1 => parent.join(&base),
            n => parent.join(format!("{base} ({n})")),
        };

        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// One line per step that did not simply succeed.
pub fn report_lines(report: &ProjectReport) -> Vec<String> {
    let mut lines = vec![];

    let mut describe = |step: String, outcome: &StepOutcome| match outcome {
        StepOutcome::Done | StepOutcome::Skipped => {}
        StepOutcome::Warning(error) => lines.push(format!("warning: {step} failed: {error}")),
        StepOutcome::Cancelled => lines.push(format!("{step} was cancelled")),
    };

    describe("Master audio mix".to_string(), &report.mixdown);
    describe("Camera alignment".to_string(), &report.alignment);
    for (path, outcome) in &report.cfr {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        describe(format!("Frame rate conversion of {file}"), outcome);
    }

    if report.was_cancelled() {
        lines.push("Cancelled files keep their recorded timing.".to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reel_postprocess::PostProcessError;

    use super::*;

    #[test]
    fn default_name_uses_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let project = create_dir(dir.path(), None, &now).unwrap();

        assert_eq!(project.file_name().unwrap(), "Reel 2024-03-09 at 14.05.07");
        assert!(project.is_dir());
    }

    #[test]
    fn existing_projects_are_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();

        let first = create_dir(dir.path(), Some("Demo"), &now).unwrap();
        let second = create_dir(dir.path(), Some("Demo"), &now).unwrap();

        assert_eq!(first.file_name().unwrap(), "Demo");
        assert_eq!(second.file_name().unwrap(), "Demo (2)");
    }

    #[test]
    fn names_cannot_escape_parent() {
        assert_eq!(sanitize("../etc/passwd"), "-etc-passwd");
        assert_eq!(sanitize(" a:b "), "a-b");
    }

    #[test]
    fn skipped_steps_are_silent() {
        let report = ProjectReport {
            mixdown: StepOutcome::Skipped,
            alignment: StepOutcome::Warning(PostProcessError::Cancelled),
            cfr: vec![(PathBuf::from("/tmp/screen.mov"), StepOutcome::Cancelled)],
        };

        let lines = report_lines(&report);

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("warning: Camera alignment failed"));
        assert_eq!(lines[1], "Frame rate conversion of screen.mov was cancelled");
    }
}
