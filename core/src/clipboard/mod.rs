//! Clipboard backends and change monitoring

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arboard::{Clipboard as ArboardClipboard, ImageData};
use image::{ImageFormat, RgbaImage};
use tokio::sync::mpsc;

use crate::protocol::constants::{MIME_TYPE_HTML, MIME_TYPE_PNG, MIME_TYPE_TEXT};
use crate::protocol::Snapshot;
use crate::{Error, Result};

/// Platform clipboard access. Calls may block, so async callers run them on
/// a blocking worker.
pub trait ClipboardBackend: Send + Sync {
    /// Current clipboard contents; empty when nothing usable is on it
    fn read(&self) -> Result<Snapshot>;

    /// Replace the clipboard contents. Kinds the platform cannot hold are skipped.
    fn write(&self, snapshot: &Snapshot) -> Result<()>;
}

pub type SharedClipboard = Arc<dyn ClipboardBackend>;

/// The OS clipboard via arboard.
///
/// Reads capture HTML, an image (as PNG) and plain text, in that order.
/// A write applies one representation, since arboard replaces the whole
/// clipboard on every set: HTML with its plain-text alternative, else plain
/// text, else the PNG image.
pub struct SystemClipboard {
    // Kept open so content we set stays owned on platforms that require it
    inner: Mutex<Option<ArboardClipboard>>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    fn with_clipboard<T>(
        &self,
        f: impl FnOnce(&mut ArboardClipboard) -> std::result::Result<T, arboard::Error>,
    ) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Clipboard("clipboard lock poisoned".to_string()))?;

        if guard.is_none() {
            *guard = Some(ArboardClipboard::new().map_err(|e| Error::Clipboard(e.to_string()))?);
        }

        match guard.as_mut() {
            Some(clipboard) => f(clipboard).map_err(|e| Error::Clipboard(e.to_string())),
            None => Err(Error::Clipboard("clipboard unavailable".to_string())),
        }
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardBackend for SystemClipboard {
    fn read(&self) -> Result<Snapshot> {
        let html = self.with_clipboard(|clipboard| available(clipboard.get().html()))?;
        let image = self.with_clipboard(|clipboard| available(clipboard.get_image()))?;
        let text = self.with_clipboard(|clipboard| available(clipboard.get_text()))?;

        let mut snapshot = Snapshot::default();
        if let Some(html) = html.filter(|html| !html.is_empty()) {
            snapshot.push(MIME_TYPE_HTML, html.into_bytes());
        }
        if let Some(image) = image {
            match image_to_png(&image) {
                Ok(png) => snapshot.push(MIME_TYPE_PNG, png),
                Err(e) => tracing::warn!("skipping clipboard image: {}", e),
            }
        }
        if let Some(text) = text.filter(|text| !text.is_empty()) {
            snapshot.push(MIME_TYPE_TEXT, text.into_bytes());
        }
        Ok(snapshot)
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        for item in snapshot.items().iter().filter(|item| !item.is_known_kind()) {
            tracing::debug!("{} cannot go on the system clipboard, skipped", item.kind);
        }

        let text = snapshot.plain_text();
        let html = snapshot
            .get(MIME_TYPE_HTML)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned());

        match (html, text, snapshot.get(MIME_TYPE_PNG)) {
            (Some(html), text, _) => self.with_clipboard(|clipboard| clipboard.set_html(html, text)),
            (None, Some(text), _) => self.with_clipboard(|clipboard| clipboard.set_text(text)),
            (None, None, Some(png)) => {
                let image = png_to_image(png)?;
                self.with_clipboard(|clipboard| clipboard.set_image(image))
            }
            (None, None, None) => {
                tracing::debug!("nothing applicable in snapshot, clipboard left unchanged");
                Ok(())
            }
        }
    }
}

/// `None` when the clipboard holds nothing of the requested kind
fn available<T>(
    result: std::result::Result<T, arboard::Error>,
) -> std::result::Result<Option<T>, arboard::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(arboard::Error::ContentNotAvailable | arboard::Error::ConversionFailure) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Encode arboard's RGBA pixels as PNG
fn image_to_png(image: &ImageData<'_>) -> Result<Vec<u8>> {
    let width = u32::try_from(image.width).map_err(|e| Error::Clipboard(e.to_string()))?;
    let height = u32::try_from(image.height).map_err(|e| Error::Clipboard(e.to_string()))?;
    let rgba = RgbaImage::from_raw(width, height, image.bytes.to_vec()).ok_or_else(|| {
        Error::Clipboard(format!("{}x{} image with {} bytes", width, height, image.bytes.len()))
    })?;

    let mut png = Vec::new();
    rgba.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| Error::Clipboard(format!("PNG encoding failed: {}", e)))?;
    Ok(png)
}

/// Decode PNG into the RGBA pixels arboard takes
fn png_to_image(png: &[u8]) -> Result<ImageData<'static>> {
    let rgba = image::load_from_memory_with_format(png, ImageFormat::Png)
        .map_err(|e| Error::Clipboard(format!("invalid PNG: {}", e)))?
        .to_rgba8();

    Ok(ImageData {
        width: rgba.width() as usize,
        height: rgba.height() as usize,
        bytes: Cow::Owned(rgba.into_raw()),
    })
}

/// In-process clipboard for tests and headless hosts.
///
/// Like an OS clipboard under [`start_monitor`], every change, including our
/// own writes, is reported on the channel returned by [`MemoryClipboard::new`].
/// A write that leaves the contents as they were is not a change.
pub struct MemoryClipboard {
    state: Mutex<MemoryState>,
    changes: mpsc::Sender<Snapshot>,
}

#[derive(Default)]
struct MemoryState {
    current: Snapshot,
    writes: Vec<Snapshot>,
}

impl MemoryClipboard {
    pub fn new() -> (Self, mpsc::Receiver<Snapshot>) {
        let (changes, rx) = mpsc::channel(64);
        (
            Self {
                state: Mutex::new(MemoryState::default()),
                changes,
            },
            rx,
        )
    }

    /// Simulate the user copying something
    pub fn set_local(&self, snapshot: Snapshot) {
        self.lock().current = snapshot.clone();
        self.notify(snapshot);
    }

    /// Every snapshot written through the backend, oldest first
    pub fn writes(&self) -> Vec<Snapshot> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, snapshot: Snapshot) {
        if self.changes.try_send(snapshot).is_err() {
            tracing::warn!("clipboard change dropped, receiver full or gone");
        }
    }
}

impl ClipboardBackend for MemoryClipboard {
    fn read(&self) -> Result<Snapshot> {
        Ok(self.lock().current.clone())
    }

    fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let changed = {
            let mut state = self.lock();
            state.writes.push(snapshot.clone());
            std::mem::replace(&mut state.current, snapshot.clone()) != *snapshot
        };
        if changed {
            self.notify(snapshot.clone());
        }
        Ok(())
    }
}

/// Poll `backend` every `interval` and send each new non-empty snapshot.
///
/// The contents found on the first poll are the baseline and are not
/// reported. The task ends when the receiver is dropped.
pub fn start_monitor(
    backend: SharedClipboard,
    interval: Duration,
) -> (mpsc::Receiver<Snapshot>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);

    let handle = tokio::spawn(async move {
        let mut last_hash: Option<[u8; 32]> = None;
        let mut primed = false;

        loop {
            tokio::time::sleep(interval).await;
            if tx.is_closed() {
                break;
            }

            let reader = backend.clone();
            let snapshot = match tokio::task::spawn_blocking(move || reader.read()).await {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e)) => {
                    tracing::warn!("clipboard read error: {}", e);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("clipboard reader panicked: {}", e);
                    continue;
                }
            };

            let hash = (!snapshot.is_empty()).then(|| snapshot.content_hash());
            if hash == last_hash {
                continue;
            }
            last_hash = hash;

            if !primed {
                primed = true;
                continue;
            }

            if hash.is_some() && tx.send(snapshot).await.is_err() {
                break;
            }
        }
    });

    (rx, handle)
}
