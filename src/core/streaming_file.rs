// src/core/streaming_file.rs

//! A write-once, multi-reader file: one writer appends bytes while any number
//! of readers tail the growing file, blocking until new bytes arrive or the
//! writer signals completion or abort.

use crate::core::errors::ProxyError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Notify;

/// Shared state guarded by a single mutex, mirroring the mutex+condvar shape:
/// `notify` is the broadcast wake primitive, fired on every write and on
/// every terminal transition.
struct Inner {
    size: u64,
    done: bool,
    err: Option<ProxyError>,
}

/// A single-writer, multi-reader append-only file in progress.
pub struct StreamingFile {
    path: PathBuf,
    state: Mutex<Inner>,
    notify: Notify,
    writer: tokio::sync::Mutex<Option<File>>,
}

impl StreamingFile {
    /// Creates the backing file and opens it for writing.
    pub async fn create(path: PathBuf) -> Result<Arc<Self>, ProxyError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let dir_perms = std::fs::Permissions::from_mode(0o755);
                tokio::fs::set_permissions(parent, dir_perms).await.ok();
            }
        }
        let file = File::create(&path).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o644);
            tokio::fs::set_permissions(&path, perms).await.ok();
        }
        Ok(Arc::new(Self {
            path,
            state: Mutex::new(Inner {
                size: 0,
                done: false,
                err: None,
            }),
            notify: Notify::new(),
            writer: tokio::sync::Mutex::new(Some(file)),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current number of bytes flushed so far.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// Appends `chunk` to the file. Fails if the stream is already done.
    pub async fn write(&self, chunk: &[u8]) -> Result<(), ProxyError> {
        {
            let guard = self.state.lock();
            if guard.done {
                return Err(ProxyError::Aborted);
            }
        }
        let mut writer_guard = self.writer.lock().await;
        let file = writer_guard.as_mut().ok_or(ProxyError::Aborted)?;
        file.write_all(chunk).await?;
        file.flush().await?;
        {
            let mut guard = self.state.lock();
            guard.size += chunk.len() as u64;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Marks the stream complete: size is frozen, readers observe EOF once caught up.
    pub async fn complete(&self) {
        {
            let mut guard = self.state.lock();
            guard.done = true;
        }
        let mut writer_guard = self.writer.lock().await;
        *writer_guard = None;
        self.notify.notify_waiters();
    }

    /// Marks the stream aborted, unlinks the backing file, and wakes every reader.
    pub async fn abort(&self) {
        {
            let mut guard = self.state.lock();
            if guard.done {
                return;
            }
            guard.done = true;
            guard.err = Some(ProxyError::Aborted);
        }
        let mut writer_guard = self.writer.lock().await;
        *writer_guard = None;
        drop(writer_guard);
        tokio::fs::remove_file(&self.path).await.ok();
        self.notify.notify_waiters();
    }

    /// Opens a new tailing reader starting at offset 0.
    pub async fn new_reader(self: &Arc<Self>) -> Result<Reader, ProxyError> {
        let file = File::open(&self.path).await?;
        Ok(Reader {
            sf: Arc::clone(self),
            file,
            offset: 0,
        })
    }
}

/// A single tailing reader over a `StreamingFile`, with its own handle and offset.
pub struct Reader {
    sf: Arc<StreamingFile>,
    file: File,
    offset: u64,
}

impl Reader {
    /// Reads the next chunk. Blocks if caught up to the writer and not yet done.
    /// Returns `Ok(0)` on EOF (writer completed and offset == size).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ProxyError> {
        loop {
            // Register interest before inspecting state, so a write racing with
            // this check still wakes us rather than being missed.
            let notified = self.sf.notify.notified();
            let (size, done, err) = {
                let guard = self.sf.state.lock();
                (guard.size, guard.done, guard.err.clone())
            };
            if self.offset < size {
                self.file.seek(SeekFrom::Start(self.offset)).await?;
                let to_read = std::cmp::min(buf.len() as u64, size - self.offset) as usize;
                let n = self.file.read(&mut buf[..to_read]).await?;
                self.offset += n as u64;
                return Ok(n);
            }
            if self.offset == size {
                if let Some(e) = err {
                    return Err(e);
                }
                if done {
                    return Ok(0);
                }
            }
            notified.await;
        }
    }
}
