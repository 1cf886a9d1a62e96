use std::fs;
use std::io::Write;
use std::path::PathBuf;

use segmentation_common::{Result, UserId};
use segmentation_config::ReportsConfig;
use tracing::debug;
use uuid::Uuid;

use crate::models::{HistoryEntry, YearMonth, display_timestamp};

const REPORT_HEADER: [&str; 4] = ["User ID", "Segment Slug", "Operation", "Operation Date"];

/// Writes per-user monthly history reports as CSV files into one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(config: &ReportsConfig) -> Self {
        Self::with_dir(config.dir.clone())
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write the report and return its file name. The file is written under a
    /// unique temporary name and renamed into place, so readers never see a
    /// half-written report and concurrent writers of the same report do not
    /// collide.
    pub fn write(
        &self,
        user_id: UserId,
        year_month: YearMonth,
        entries: &[HistoryEntry],
    ) -> Result<String> {
        fs::create_dir_all(&self.dir)?;

        let file_name = report_file_name(user_id, year_month);
        let final_path = self.dir.join(&file_name);
        let tmp_path = self.dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(render_csv(entries).as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;
        debug!(
            user_id = %user_id,
            rows = entries.len(),
            "report written to {}",
            final_path.display()
        );

        Ok(file_name)
    }

    /// Resolve a previously generated report. Names that do not follow the
    /// report naming scheme are rejected without touching the filesystem.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        is_report_file_name(file_name).then(|| self.dir.join(file_name))
    }
}

pub fn report_file_name(user_id: UserId, year_month: YearMonth) -> String {
    format!("user_{user_id}_report_{year_month}.csv")
}

/// Matches `user_<digits>_report_<YYYY-MM>.csv`.
pub fn is_report_file_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("user_") else {
        return false;
    };
    let Some(rest) = rest.strip_suffix(".csv") else {
        return false;
    };
    let Some((user, year_month)) = rest.split_once("_report_") else {
        return false;
    };

    !user.is_empty()
        && user.bytes().all(|b| b.is_ascii_digit())
        && year_month.parse::<YearMonth>().is_ok()
}

fn render_csv(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    push_record(&mut out, REPORT_HEADER.iter().copied());

    for entry in entries {
        let user_id = entry.user_id.to_string();
        let operation_date = display_timestamp(entry.operation_date);
        push_record(
            &mut out,
            [
                user_id.as_str(),
                entry.segment_slug.as_str(),
                entry.operation.as_str(),
                operation_date.as_str(),
            ],
        );
    }

    out
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(field));
    }
    out.push('\n');
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HistoryOperation;
    use chrono::{TimeZone, Utc};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("segmentation-reports-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn file_name_follows_naming_scheme() {
        let ym: YearMonth = "2023-08".parse().unwrap();
        assert_eq!(
            report_file_name(UserId::new(12), ym),
            "user_12_report_2023-08.csv"
        );
    }

    #[test]
    fn report_names_are_validated() {
        assert!(is_report_file_name("user_1_report_2023-08.csv"));
        assert!(!is_report_file_name("user__report_2023-08.csv"));
        assert!(!is_report_file_name("user_1_report_2023-8.csv"));
        assert!(!is_report_file_name("../user_1_report_2023-08.csv"));
        assert!(!is_report_file_name("user_1_report_2023-08.csv.bak"));
        assert!(!is_report_file_name("config.yml"));
    }

    #[test]
    fn empty_report_contains_only_header() {
        let dir = temp_dir();
        let writer = ReportWriter::with_dir(&dir);

        let name = writer
            .write(UserId::new(3), "2023-08".parse().unwrap(), &[])
            .expect("report should be written");

        let contents = fs::read_to_string(dir.join(&name)).unwrap();
        assert_eq!(contents, "User ID,Segment Slug,Operation,Operation Date\n");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn concurrent_writes_of_same_report_all_succeed() {
        let dir = temp_dir();
        let writer = ReportWriter::with_dir(&dir);
        let ym: YearMonth = "2023-08".parse().unwrap();

        let results: Vec<Result<String>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| writer.write(UserId::new(5), ym, &[])))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("writer thread panicked"))
                .collect()
        });

        for result in results {
            assert_eq!(
                result.expect("concurrent write should succeed"),
                "user_5_report_2023-08.csv"
            );
        }

        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["user_5_report_2023-08.csv".to_string()]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn rows_are_rendered_and_quoted() {
        let entries = vec![
            HistoryEntry {
                user_id: UserId::new(1),
                segment_slug: "PROMO".into(),
                operation: HistoryOperation::Add,
                operation_date: Utc.with_ymd_and_hms(2023, 8, 2, 9, 0, 0).unwrap(),
            },
            HistoryEntry {
                user_id: UserId::new(1),
                segment_slug: "SALE,\"30\"".into(),
                operation: HistoryOperation::Remove,
                operation_date: Utc.with_ymd_and_hms(2023, 8, 3, 9, 0, 0).unwrap(),
            },
        ];

        let csv = render_csv(&entries);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,PROMO,add,2023-08-02T09:00:00Z");
        assert_eq!(lines[2], "1,\"SALE,\"\"30\"\"\",remove,2023-08-03T09:00:00Z");
    }

    #[test]
    fn resolve_rejects_foreign_names() {
        let writer = ReportWriter::with_dir("reports");
        assert_eq!(
            writer.resolve("user_1_report_2023-08.csv"),
            Some(PathBuf::from("reports/user_1_report_2023-08.csv"))
        );
        assert_eq!(writer.resolve("../../etc/passwd"), None);
    }
}
