//! Account Store
//!
//! Persists accounts in the desktop manager's layout:
//!
//! ```text
//! <root>/accounts.json        index of summaries
//! <root>/accounts/<id>.json   one record per account
//! ```
//!
//! Every file is written to a `.tmp` sibling first and renamed into place.
//! Creates commit the record before the index and deletes commit the index
//! before removing the record, so a crash can leave an orphan record but
//! never an index entry pointing at nothing.
//!
//! Account ids become file names and must be a single plain path component.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::model::{Account, AccountIndex, AccountSummary, ExportBundle, ExportEntry, Provider};
use crate::config::APP_IDENTIFIER;
use crate::{Error, Result};

const INDEX_FILE: &str = "accounts.json";
const RECORDS_DIR: &str = "accounts";
const TMP_SUFFIX: &str = "tmp";

/// One index entry as seen by [`AccountStore::list`]
#[derive(Debug, Clone)]
pub enum ListedAccount {
    /// Record loaded
    Loaded(Box<Account>),
    /// Index entry without a record file
    Missing(AccountSummary),
    /// Record file present but not decodable
    Unreadable {
        /// Index entry
        summary: AccountSummary,
        /// Decode or read failure
        reason: String,
    },
}

impl ListedAccount {
    /// Id of the underlying index entry
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Loaded(account) => &account.id,
            Self::Missing(summary) | Self::Unreadable { summary, .. } => &summary.id,
        }
    }
}

/// Result of [`AccountStore::reconcile`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index entries removed because their record file was missing
    pub dropped: Vec<String>,
    /// Record files with no index entry (left on disk)
    pub orphans: Vec<String>,
    /// Leftover temp files deleted
    pub removed_temp: Vec<PathBuf>,
}

impl ReconcileReport {
    /// Whether the store was already consistent
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.orphans.is_empty() && self.removed_temp.is_empty()
    }
}

/// File-backed account store
#[derive(Debug, Clone)]
pub struct AccountStore {
    root: PathBuf,
}

impl AccountStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let records = root.join(RECORDS_DIR);
        if !records.exists() {
            fs::create_dir_all(&records).map_err(|e| {
                Error::Store(format!("Failed to create {}: {e}", records.display()))
            })?;
        }
        debug!(root = %root.display(), "Opened account store");
        Ok(Self { root })
    }

    /// Store in the desktop manager's platform data directory
    pub fn default_location() -> Result<Self> {
        let data = dirs::data_dir()
            .ok_or_else(|| Error::Store("Cannot determine platform data directory".to_string()))?;
        Self::open(data.join(APP_IDENTIFIER))
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the index file
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Path of an account's record file. Rejects ids that would leave the store.
    pub fn record_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(RECORDS_DIR).join(format!("{id}.json")))
    }

    /// Read the index. A missing file is an empty index.
    pub fn load_index(&self) -> Result<AccountIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(AccountIndex::default());
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Store(format!("Corrupt index {}: {e}", path.display())))
    }

    fn save_index(&self, index: &AccountIndex) -> Result<()> {
        write_atomic(&self.index_path(), index)
    }

    /// Load one record
    pub fn load(&self, id: &str) -> Result<Account> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Err(Error::AccountNotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist a new account: record first, then the index entry
    pub fn create(&self, account: &Account) -> Result<()> {
        let path = self.record_path(&account.id)?;
        let mut index = self.load_index()?;
        if index.contains(&account.id) || path.exists() {
            return Err(Error::Store(format!(
                "Account {} already exists",
                account.id
            )));
        }

        write_atomic(&path, account)?;
        index.accounts.push(account.summary());
        self.save_index(&index)?;

        info!(account = %account.id, provider = %account.provider, "Created account");
        Ok(())
    }

    /// Rewrite an existing account and refresh its index summary
    pub fn save(&self, account: &Account) -> Result<()> {
        let path = self.record_path(&account.id)?;
        let mut index = self.load_index()?;
        let Some(pos) = index.accounts.iter().position(|s| s.id == account.id) else {
            return Err(Error::AccountNotFound(account.id.clone()));
        };

        write_atomic(&path, account)?;
        index.accounts[pos] = account.summary();
        self.save_index(&index)?;

        debug!(account = %account.id, "Saved account");
        Ok(())
    }

    /// Enumerate indexed accounts, continuing past bad entries
    pub fn list(&self) -> Result<Vec<ListedAccount>> {
        let index = self.load_index()?;
        let listed = index
            .accounts
            .into_iter()
            .map(|summary| {
                let path = match self.record_path(&summary.id) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(account = %summary.id, error = %e, "Invalid account id in index");
                        return ListedAccount::Unreadable {
                            summary,
                            reason: e.to_string(),
                        };
                    }
                };
                if !path.exists() {
                    warn!(account = %summary.id, "Indexed account has no record file");
                    return ListedAccount::Missing(summary);
                }
                match fs::read_to_string(&path)
                    .map_err(|e| e.to_string())
                    .and_then(|c| serde_json::from_str::<Account>(&c).map_err(|e| e.to_string()))
                {
                    Ok(account) => ListedAccount::Loaded(Box::new(account)),
                    Err(reason) => {
                        warn!(account = %summary.id, error = %reason, "Unreadable account record");
                        ListedAccount::Unreadable { summary, reason }
                    }
                }
            })
            .collect();
        Ok(listed)
    }

    /// Remove the index entry, then the record
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id)?;
        let mut index = self.load_index()?;

        let before = index.accounts.len();
        index.accounts.retain(|s| s.id != id);
        let was_indexed = index.accounts.len() != before;
        let had_file = path.exists();

        if !was_indexed && !had_file {
            return Err(Error::AccountNotFound(id.to_string()));
        }

        if index.current_account_id.as_deref() == Some(id) {
            index.current_account_id = None;
        }
        self.save_index(&index)?;
        if had_file {
            fs::remove_file(&path)?;
        }

        info!(account = %id, "Deleted account");
        Ok(())
    }

    /// Mark an indexed account as current
    pub fn set_current(&self, id: &str) -> Result<()> {
        validate_id(id)?;
        let mut index = self.load_index()?;
        if !index.contains(id) {
            return Err(Error::AccountNotFound(id.to_string()));
        }
        index.current_account_id = Some(id.to_string());
        self.save_index(&index)?;
        info!(account = %id, "Switched current account");
        Ok(())
    }

    /// Repair drift between the index and the record files
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let records_dir = self.root.join(RECORDS_DIR);

        let index_tmp = temp_path(&self.index_path());
        if index_tmp.is_file() {
            fs::remove_file(&index_tmp)?;
            report.removed_temp.push(index_tmp);
        }
        let record_tmp = format!(".json.{TMP_SUFFIX}");
        for entry in read_dir_entries(&records_dir)? {
            let is_record_tmp = entry
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&record_tmp));
            if is_record_tmp {
                fs::remove_file(&entry)?;
                report.removed_temp.push(entry);
            }
        }

        let mut index = self.load_index()?;
        let before = index.accounts.len();
        index.accounts.retain(|summary| {
            let present = self
                .record_path(&summary.id)
                .is_ok_and(|path| path.exists());
            if !present {
                report.dropped.push(summary.id.clone());
            }
            present
        });
        if index.accounts.len() != before {
            if let Some(current) = &index.current_account_id {
                if !index.contains(current) {
                    index.current_account_id = None;
                }
            }
            self.save_index(&index)?;
        }

        for entry in read_dir_entries(&records_dir)? {
            if entry.extension().is_some_and(|ext| ext == "json") {
                if let Some(id) = entry.file_stem().and_then(|s| s.to_str()) {
                    if !index.contains(id) {
                        report.orphans.push(id.to_string());
                    }
                }
            }
        }
        report.orphans.sort();

        if report.is_clean() {
            debug!("Account store is consistent");
        } else {
            warn!(
                dropped = report.dropped.len(),
                orphans = report.orphans.len(),
                temp_files = report.removed_temp.len(),
                "Reconciled account store"
            );
        }
        Ok(report)
    }

    /// Number of record files for a provider
    pub fn count_records(&self, provider: Provider) -> Result<usize> {
        let mut count = 0;
        for entry in read_dir_entries(&self.root.join(RECORDS_DIR))? {
            if entry.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content = fs::read_to_string(&entry)?;
            if let Ok(account) = serde_json::from_str::<Account>(&content) {
                if account.provider == provider {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Number of index entries whose record belongs to a provider
    pub fn count_indexed(&self, provider: Provider) -> Result<usize> {
        Ok(self
            .list()?
            .iter()
            .filter(|entry| matches!(entry, ListedAccount::Loaded(a) if a.provider == provider))
            .count())
    }

    /// Refresh tokens of every loadable account
    pub fn export(&self) -> Result<ExportBundle> {
        let accounts = self
            .list()?
            .into_iter()
            .filter_map(|entry| match entry {
                ListedAccount::Loaded(account) => Some(ExportEntry {
                    email: account.email,
                    refresh_token: account.token.refresh_token,
                    provider: account.provider,
                }),
                _ => None,
            })
            .collect();
        Ok(ExportBundle { accounts })
    }
}

/// Ids are used verbatim as file names
fn validate_id(id: &str) -> Result<()> {
    let plain = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
        && Path::new(id).components().count() == 1;
    if plain {
        Ok(())
    } else {
        Err(Error::Store(format!("Invalid account id: {id:?}")))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension(format!("json.{TMP_SUFFIX}"))
}

/// Serialize to `<path>.tmp`, fsync, then rename over `path`
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = temp_path(path);

    // A stale temp file would keep its old permissions
    if tmp.is_file() {
        fs::remove_file(&tmp)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    // Owner read/write only, before any token bytes land on disk
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    {
        let mut file = options.open(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::Store(format!("Failed to commit {}: {e}", path.display()))
    })
}

fn read_dir_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    Ok(paths)
}
