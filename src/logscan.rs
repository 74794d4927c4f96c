//! Desktop manager log scanner
//!
//! Finds the manager's log files, picks out Kiro-related lines and tallies
//! which sign-in operations they belong to.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{APP_IDENTIFIER, LogsConfig};
use crate::{Error, Result};

/// Timestamp shapes, most specific first
const TIMESTAMP_PATTERNS: [&str; 3] = [
    r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}",
    r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}",
    r"\d{2}:\d{2}:\d{2}",
];

/// Sign-in operation a log line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Manual token entry
    ManualTokenInput,
    /// OAuth login completion
    CompleteOAuth,
    /// Authorization code submission
    SubmitCode,
    /// Authorization URL preparation
    PrepareUrl,
    /// Something failed
    Error,
    /// Something succeeded
    Success,
    /// Kiro-related, but none of the above
    Other,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ManualTokenInput => "Manual Token Input",
            Self::CompleteOAuth => "Complete OAuth",
            Self::SubmitCode => "Submit Code",
            Self::PrepareUrl => "Prepare URL",
            Self::Error => "Errors",
            Self::Success => "Success",
            Self::Other => "Other",
        };
        f.write_str(label)
    }
}

/// Classify a log line. The first matching rule wins.
#[must_use]
pub fn classify_operation(line: &str) -> Operation {
    let lower = line.to_lowercase();
    if lower.contains("manual_kiro_token_input") {
        Operation::ManualTokenInput
    } else if lower.contains("complete_kiro_oauth_login") {
        Operation::CompleteOAuth
    } else if lower.contains("submit_kiro_oauth_code") {
        Operation::SubmitCode
    } else if lower.contains("prepare_kiro_oauth_url") {
        Operation::PrepareUrl
    } else if lower.contains("error") || lower.contains("failed") {
        Operation::Error
    } else if lower.contains("success") || lower.contains("added") {
        Operation::Success
    } else {
        Operation::Other
    }
}

/// One matching log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// 1-based line number
    pub line_no: usize,
    /// Timestamp text as found in the line
    pub timestamp: Option<String>,
    /// Operation the line belongs to
    pub operation: Operation,
    /// Trimmed line content
    pub content: String,
}

/// Matches found in one file
#[derive(Debug, Clone, Serialize)]
pub struct FileScan {
    /// File scanned
    pub path: PathBuf,
    /// Matching lines in file order
    pub entries: Vec<LogEntry>,
}

/// Outcome of a full scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Directories that existed and were searched
    pub searched: Vec<PathBuf>,
    /// Per-file matches
    pub files: Vec<FileScan>,
    /// Files that could not be read, with the reason
    pub unreadable: Vec<(PathBuf, String)>,
    /// Matching lines per operation
    pub counts: BTreeMap<Operation, usize>,
}

impl ScanReport {
    /// Total matching lines
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.files.iter().map(|f| f.entries.len()).sum()
    }
}

/// Keyword scanner over a set of log directories
#[derive(Debug, Clone)]
pub struct LogScanner {
    directories: Vec<PathBuf>,
    keywords: Vec<String>,
    extensions: Vec<String>,
    timestamp_patterns: Vec<Regex>,
}

impl LogScanner {
    /// Create a scanner. Keywords are matched case-insensitively.
    pub fn new(
        directories: Vec<PathBuf>,
        keywords: &[String],
        extensions: &[String],
    ) -> Result<Self> {
        let timestamp_patterns = TIMESTAMP_PATTERNS
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Internal(format!("Invalid timestamp pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            directories,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_string())
                .collect(),
            timestamp_patterns,
        })
    }

    /// Scanner from configuration; an empty directory list means the platform defaults
    pub fn from_config(config: &LogsConfig) -> Result<Self> {
        let directories = if config.directories.is_empty() {
            default_directories()
        } else {
            config.directories.iter().map(PathBuf::from).collect()
        };
        Self::new(directories, &config.keywords, &config.extensions)
    }

    /// Directories this scanner searches
    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Whether a line mentions any keyword
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// First timestamp found, trying each shape in order
    #[must_use]
    pub fn extract_timestamp(&self, line: &str) -> Option<String> {
        self.timestamp_patterns
            .iter()
            .find_map(|re| re.find(line))
            .map(|m| m.as_str().to_string())
    }

    /// Log files in every existing directory
    pub fn find_log_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for dir in self.directories.iter().filter(|d| d.is_dir()) {
            let base = glob::Pattern::escape(&dir.to_string_lossy());
            for ext in &self.extensions {
                let pattern = format!("{base}/*.{ext}");
                match glob::glob(&pattern) {
                    Ok(paths) => files.extend(paths.filter_map(std::result::Result::ok)),
                    Err(e) => warn!(pattern = %pattern, error = %e, "Invalid log glob"),
                }
            }
        }
        files
    }

    /// Matching lines of a single file. Invalid UTF-8 is replaced.
    pub fn scan_file(&self, path: &Path) -> Result<Vec<LogEntry>> {
        let bytes = fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);

        let entries = text
            .lines()
            .enumerate()
            .filter(|(_, line)| self.matches(line))
            .map(|(i, line)| LogEntry {
                line_no: i + 1,
                timestamp: self.extract_timestamp(line),
                operation: classify_operation(line),
                content: line.trim().to_string(),
            })
            .collect();
        Ok(entries)
    }

    /// Scan every log file, continuing past unreadable ones
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport {
            searched: self
                .directories
                .iter()
                .filter(|d| d.is_dir())
                .cloned()
                .collect(),
            ..ScanReport::default()
        };

        for path in self.find_log_files() {
            match self.scan_file(&path) {
                Ok(entries) => {
                    debug!(file = %path.display(), matches = entries.len(), "Scanned log file");
                    for entry in &entries {
                        *report.counts.entry(entry.operation).or_insert(0) += 1;
                    }
                    report.files.push(FileScan { path, entries });
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Failed to read log file");
                    report.unreadable.push((path, e.to_string()));
                }
            }
        }

        report
    }
}

/// Where the desktop manager writes logs on this platform, plus `./logs`
#[must_use]
pub fn default_directories() -> Vec<PathBuf> {
    let mut dirs_out = Vec::new();

    #[cfg(target_os = "windows")]
    {
        if let Some(roaming) = dirs::config_dir() {
            dirs_out.push(roaming.join(APP_IDENTIFIER).join("logs"));
        }
        if let Some(local) = dirs::data_local_dir() {
            dirs_out.push(local.join(APP_IDENTIFIER).join("logs"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            dirs_out.push(home.join("Library/Logs").join(APP_IDENTIFIER));
            dirs_out.push(
                home.join("Library/Application Support")
                    .join(APP_IDENTIFIER)
                    .join("logs"),
            );
        }
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(home) = dirs::home_dir() {
            dirs_out.push(home.join(".local/share").join(APP_IDENTIFIER).join("logs"));
            dirs_out.push(home.join(".cache").join(APP_IDENTIFIER).join("logs"));
        }
    }

    dirs_out.push(PathBuf::from("logs"));
    dirs_out
}
