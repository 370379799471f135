//! Sidecar store for dead properties.
//!
//! Properties are kept in memory, keyed by resource path and by
//! `{namespace}name`. When a backing file is configured every change is
//! written through to it as JSON before it becomes visible.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::davpath::DavPath;
use crate::davxml::prop_key;
use crate::fs::{DavProp, PropUpdate};
use crate::util::write_json_atomic;

type Table = HashMap<String, BTreeMap<String, DavProp>>;

#[derive(Debug)]
pub(crate) struct PropStore {
    file: Option<PathBuf>,
    table: Mutex<Table>,
}

// Map `key` from below `from` to below `to`.
fn rebase_key(key: &str, from: &str, to: &str) -> Option<String> {
    if key == from {
        return Some(to.to_string());
    }
    let rest = if from == "/" {
        key.strip_prefix('/')
    } else {
        key.strip_prefix(from).and_then(|r| r.strip_prefix('/'))
    }?;
    Some(format!("{}/{}", to.trim_end_matches('/'), rest))
}

impl PropStore {
    /// A store that lives in memory only.
    pub(crate) fn ephemeral() -> PropStore {
        PropStore {
            file: None,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Load the store from `file`. A missing file is an empty store.
    pub(crate) fn open(file: impl Into<PathBuf>) -> PropStore {
        let file = file.into();
        let table = match std::fs::read(&file) {
            Ok(data) => match serde_json::from_slice::<Table>(&data) {
                Ok(t) => t,
                Err(e) => {
                    warn!("property store {}: {e}, starting empty", file.display());
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("property store {}: {e}, starting empty", file.display());
                HashMap::new()
            }
        };
        PropStore {
            file: Some(file),
            table: Mutex::new(table),
        }
    }

    // Run `f` on the table and persist. On a failed write the table is
    // restored, so memory and disk never disagree.
    fn update<F>(&self, f: F) -> io::Result<()>
    where
        F: FnOnce(&mut Table) -> bool,
    {
        let mut table = self.table.lock();
        let backup = self.file.as_ref().map(|_| table.clone());
        if !f(&mut table) {
            return Ok(());
        }
        if let (Some(file), Some(backup)) = (&self.file, backup) {
            if let Err(e) = write_json_atomic(file, &*table) {
                *table = backup;
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, path: &DavPath) -> Vec<DavProp> {
        self.table
            .lock()
            .get(&path.as_key())
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn patch(&self, path: &DavPath, patch: Vec<PropUpdate>) -> io::Result<()> {
        let key = path.as_key();
        self.update(|table| {
            let props = table.entry(key.clone()).or_default();
            for p in patch {
                match p {
                    PropUpdate::Set(prop) => {
                        props.insert(prop_key(prop.namespace.as_deref(), &prop.name), prop);
                    }
                    PropUpdate::Remove(prop) => {
                        props.remove(&prop_key(prop.namespace.as_deref(), &prop.name));
                    }
                }
            }
            if props.is_empty() {
                table.remove(&key);
            }
            true
        })
    }

    /// Forget the properties of `path` and everything below it.
    pub(crate) fn remove_tree(&self, path: &DavPath) -> io::Result<()> {
        let from = path.as_key();
        self.update(|table| {
            let before = table.len();
            table.retain(|k, _| rebase_key(k, &from, &from).is_none());
            table.len() != before
        })
    }

    /// Properties below `from` move to below `to`. Whatever was stored
    /// below `to` is dropped, as the resources there have been replaced.
    pub(crate) fn rename_tree(&self, from: &DavPath, to: &DavPath) -> io::Result<()> {
        self.transfer(from, to, true, true)
    }

    /// Properties of `from` are duplicated onto `to`, and with `deep`
    /// those of everything below it as well.
    pub(crate) fn copy_tree(&self, from: &DavPath, to: &DavPath, deep: bool) -> io::Result<()> {
        self.transfer(from, to, false, deep)
    }

    fn transfer(&self, from: &DavPath, to: &DavPath, remove: bool, deep: bool) -> io::Result<()> {
        let (from, to) = (from.as_key(), to.as_key());
        self.update(|table| {
            table.retain(|k, _| rebase_key(k, &to, &to).is_none());
            let moved: Vec<(String, String)> = table
                .keys()
                .filter(|k| deep || **k == from)
                .filter_map(|k| rebase_key(k, &from, &to).map(|n| (k.clone(), n)))
                .collect();
            for (old, new) in moved {
                let props = if remove {
                    table.remove(&old)
                } else {
                    table.get(&old).cloned()
                };
                if let Some(props) = props {
                    table.insert(new, props);
                }
            }
            true
        })
    }
}
