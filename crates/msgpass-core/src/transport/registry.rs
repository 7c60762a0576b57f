//! File-backed service name registry.
//!
//! Each registered name is one TOML file under `<runtime_dir>/names/`
//! holding the channel [`Address`]:
//!
//! ```toml
//! pid = 4711
//! chid = 1
//! ```
//!
//! Entries are published with a hard link from a private temp file, so a
//! resolver never sees a half-written entry and two registrants cannot both
//! win. An entry whose channel no longer accepts connections is stale and
//! may be taken over.

use std::io;
use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tracing::{debug, warn};

use super::unix::socket_path;
use super::{Address, IpcError};

/// Publish attempts before giving up on a contended name.
const PUBLISH_ATTEMPTS: usize = 3;

/// Registry rooted at a runtime directory.
#[derive(Debug, Clone)]
pub struct NameRegistry {
    runtime_dir: PathBuf,
    names_dir: PathBuf,
}

impl NameRegistry {
    pub fn new(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        let names_dir = runtime_dir.join("names");
        Self {
            runtime_dir,
            names_dir,
        }
    }

    /// Directory holding the entries.
    pub fn names_dir(&self) -> &Path {
        &self.names_dir
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, IpcError> {
        if !msgpass_config::is_valid_service_name(name) {
            return Err(IpcError::InvalidName(name.to_string()));
        }
        Ok(self.names_dir.join(name))
    }

    /// Bind `name` to `address`.
    ///
    /// Fails with [`IpcError::NameTaken`] if the name is held by a channel
    /// that still accepts connections.
    pub async fn register(&self, name: &str, address: Address) -> Result<Registration, IpcError> {
        let path = self.entry_path(name)?;
        tokio::fs::create_dir_all(&self.names_dir).await?;

        let staged = self
            .names_dir
            .join(format!(".{name}.{}.{}.tmp", address.pid, address.chid));
        let contents = toml::to_string(&address).map_err(io::Error::other)?;
        tokio::fs::write(&staged, contents).await?;

        let result = self.publish(name, &staged, &path).await;
        tokio::fs::remove_file(&staged).await.ok();
        result?;

        debug!(name, %address, "service name registered");
        Ok(Registration {
            name: name.to_string(),
            path,
            address,
            released: false,
        })
    }

    async fn publish(&self, name: &str, staged: &Path, path: &Path) -> Result<(), IpcError> {
        // Later attempts only happen after a stale entry was evicted or a
        // concurrently published one was put back.
        for _ in 0..PUBLISH_ATTEMPTS {
            match tokio::fs::hard_link(staged, path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let Some(text) = read_entry(path).await? else {
                continue;
            };
            match parse_entry(name, &text) {
                Ok(holder) if self.is_live(holder).await => {
                    return Err(IpcError::NameTaken {
                        name: name.to_string(),
                        address: holder,
                    });
                }
                Ok(holder) => {
                    warn!(name, %holder, "replacing stale registry entry");
                }
                Err(IpcError::CorruptEntry { reason, .. }) => {
                    warn!(name, %reason, "replacing unreadable registry entry");
                }
                Err(e) => return Err(e),
            }
            evict(path, &staged.with_extension("evict"), &text).await?;
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("lost registration race for {name:?}"),
        )
        .into())
    }

    /// Look up the address bound to `name`.
    pub async fn resolve(&self, name: &str) -> Result<Address, IpcError> {
        let path = self.entry_path(name)?;
        match read_entry(&path).await? {
            Some(text) => parse_entry(name, &text),
            None => Err(IpcError::NameNotRegistered(name.to_string())),
        }
    }

    async fn is_live(&self, address: Address) -> bool {
        UnixStream::connect(socket_path(&self.runtime_dir, address))
            .await
            .is_ok()
    }
}

/// Read a registry entry, `None` if it does not exist.
async fn read_entry(path: &Path) -> Result<Option<String>, IpcError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_entry(name: &str, text: &str) -> Result<Address, IpcError> {
    toml::from_str(text).map_err(|e| IpcError::CorruptEntry {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Remove the entry at `path`, but only if it still reads `expected`.
///
/// The entry is renamed to `aside` before it is compared, so an entry
/// published after the caller judged the old one stale is put back rather
/// than deleted.
async fn evict(path: &Path, aside: &Path, expected: &str) -> Result<(), IpcError> {
    match tokio::fs::rename(path, aside).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let result = match tokio::fs::read_to_string(aside).await {
        Ok(text) if text == expected => Ok(()),
        Ok(_) => restore(aside, path).await,
        Err(e) => restore(aside, path).await.and(Err(e.into())),
    };
    tokio::fs::remove_file(aside).await.ok();
    result
}

async fn restore(aside: &Path, path: &Path) -> Result<(), IpcError> {
    match tokio::fs::hard_link(aside, path).await {
        Ok(()) => {
            debug!(path = %path.display(), "restored concurrently published entry");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            warn!(path = %path.display(), "entry republished while restoring, keeping newer");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// A registered name. Removes its entry when unregistered or dropped, unless
/// the entry has since been taken over by another channel.
#[derive(Debug)]
pub struct Registration {
    name: String,
    path: PathBuf,
    address: Address,
    released: bool,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Remove the entry. Subsequent calls do nothing.
    pub fn unregister(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let still_ours = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| toml::from_str::<Address>(&text).ok())
            .is_some_and(|holder| holder == self.address);
        if still_ours {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(name = %self.name, error = %e, "failed to remove registry entry");
                return;
            }
            debug!(name = %self.name, "service name unregistered");
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}
