//! Host-side collaborators reached through the device primitives.
//!
//! Everything here is passed by value across the primitive boundary: a
//! collaborator never holds a [`crate::Value`], so reclamation can move or free
//! heap objects without telling it.
use std::{
    collections::{HashMap, VecDeque},
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use parking_lot::{Condvar, Mutex};

/// Seconds between 1901-01-01 and 1970-01-01.
pub const SECONDS_1901_TO_1970: i64 = (69 * 365 + 17) * 86_400;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A Form copied out of the heap: its Bitmap words and geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Form {
    pub bits: Vec<u32>,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
}

/// Fully resolved BitBlt state.
#[derive(Debug, Clone, Default)]
pub struct Blit {
    pub dest: Form,
    pub source: Option<Form>,
    pub halftone: Option<Vec<u32>>,
    pub rule: i32,
    pub dest_rect: Rect,
    pub source_x: i32,
    pub source_y: i32,
    pub clip: Rect,
    pub color_map: Option<Vec<u32>>,
    pub alpha: Option<i32>,
    /// pixel count for the counting rules
    pub bit_count: i32,
}

pub trait Raster {
    /// Composite the source into `blit.dest` and return the touched area.
    fn copy_bits(&mut self, blit: &mut Blit) -> io::Result<Option<Rect>>;
}

pub trait Display {
    fn screen_size(&self) -> (i32, i32);
    fn set_display(&mut self, form: &Form) -> io::Result<()>;
    fn show(&mut self, form: &Form, area: Rect);
    fn set_cursor(&mut self, cursor: &Form, offset: (i32, i32));
    fn reverse(&mut self);
}

pub trait Keyboard {
    fn next(&mut self) -> Option<i32>;
    fn peek(&self) -> Option<i32>;
}

pub trait Mouse {
    fn point(&self) -> (i32, i32);
    fn buttons(&self) -> i32;
}

pub type FileHandle = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    /// seconds since 1901
    pub created: i64,
    pub modified: i64,
    pub is_directory: bool,
    pub size: u64,
}

pub trait FileSystem {
    fn open(&mut self, path: &str, writable: bool) -> io::Result<FileHandle>;
    fn close(&mut self, handle: FileHandle) -> io::Result<()>;
    fn read(&mut self, handle: FileHandle, buffer: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, handle: FileHandle, buffer: &[u8]) -> io::Result<usize>;
    fn position(&mut self, handle: FileHandle) -> io::Result<u64>;
    fn set_position(&mut self, handle: FileHandle, position: u64) -> io::Result<()>;
    fn size(&mut self, handle: FileHandle) -> io::Result<u64>;
    fn at_end(&mut self, handle: FileHandle) -> io::Result<bool> {
        Ok(self.position(handle)? >= self.size(handle)?)
    }
    fn delete(&mut self, path: &str) -> io::Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;
    fn create_directory(&mut self, path: &str) -> io::Result<()>;
    fn delimiter(&self) -> char;
    /// Entry number `index` (1-based) of `directory`, `None` past the end.
    fn lookup(&mut self, directory: &str, index: usize) -> io::Result<Option<DirectoryEntry>>;
}

/// "An external event occurred", raised from input threads and waited on by
/// the yield primitive.
#[derive(Debug, Default)]
pub struct EventFlag {
    raised: Mutex<bool>,
    cv: Condvar,
}

impl EventFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        *self.raised.lock() = true;
        self.cv.notify_all();
    }

    /// Wait until signalled or `timeout` passes; consumes the signal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.cv.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut *raised)
    }
}

/// Key queue fed from any thread; each push raises the event flag.
#[derive(Debug, Clone)]
pub struct KeyboardQueue {
    keys: Arc<Mutex<VecDeque<i32>>>,
    events: Arc<EventFlag>,
}

impl KeyboardQueue {
    pub fn new(events: Arc<EventFlag>) -> Self {
        Self {
            keys: Arc::default(),
            events,
        }
    }

    pub fn push(&self, key: i32) {
        self.keys.lock().push_back(key);
        self.events.signal();
    }
}

impl Keyboard for KeyboardQueue {
    fn next(&mut self) -> Option<i32> {
        self.keys.lock().pop_front()
    }

    fn peek(&self) -> Option<i32> {
        self.keys.lock().front().copied()
    }
}

/// Display, raster and mouse stand-in for running without a window.
#[derive(Debug, Clone)]
pub struct Headless {
    pub size: (i32, i32),
    pub reversed: bool,
    pub cursor: Option<(i32, i32)>,
}

impl Default for Headless {
    fn default() -> Self {
        Self {
            size: (640, 480),
            reversed: false,
            cursor: None,
        }
    }
}

impl Raster for Headless {
    fn copy_bits(&mut self, _blit: &mut Blit) -> io::Result<Option<Rect>> {
        Ok(None)
    }
}

impl Display for Headless {
    fn screen_size(&self) -> (i32, i32) {
        self.size
    }

    fn set_display(&mut self, form: &Form) -> io::Result<()> {
        if form.width != self.size.0 || form.height != self.size.1 {
            log::info!("display is now {}x{}x{}", form.width, form.height, form.depth);
            self.size = (form.width, form.height);
        }
        Ok(())
    }

    fn show(&mut self, _form: &Form, _area: Rect) {}

    fn set_cursor(&mut self, _cursor: &Form, offset: (i32, i32)) {
        self.cursor = Some(offset);
    }

    fn reverse(&mut self) {
        self.reversed = !self.reversed;
    }
}

impl Mouse for Headless {
    fn point(&self) -> (i32, i32) {
        (0, 0)
    }

    fn buttons(&self) -> i32 {
        0
    }
}

fn seconds_1901(time: io::Result<SystemTime>) -> i64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
        + SECONDS_1901_TO_1970
}

fn no_handle(handle: FileHandle) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no open file {handle}"))
}

/// [`FileSystem`] on `std::fs`, with an integer-keyed table of open files.
#[derive(Debug, Default)]
pub struct HostFileSystem {
    files: HashMap<FileHandle, File>,
    next: FileHandle,
}

impl HostFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn file(&mut self, handle: FileHandle) -> io::Result<&mut File> {
        self.files.get_mut(&handle).ok_or_else(|| no_handle(handle))
    }
}

impl FileSystem for HostFileSystem {
    fn open(&mut self, path: &str, writable: bool) -> io::Result<FileHandle> {
        let file = if writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
        } else {
            File::open(path)?
        };
        self.next += 1;
        self.files.insert(self.next, file);
        log::debug!("opened {path} as file {}", self.next);
        Ok(self.next)
    }

    fn close(&mut self, handle: FileHandle) -> io::Result<()> {
        self.files.remove(&handle).map(drop).ok_or_else(|| no_handle(handle))
    }

    fn read(&mut self, handle: FileHandle, buffer: &mut [u8]) -> io::Result<usize> {
        let file = self.file(handle)?;
        let mut total = 0;
        while total < buffer.len() {
            match file.read(&mut buffer[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn write(&mut self, handle: FileHandle, buffer: &[u8]) -> io::Result<usize> {
        self.file(handle)?.write_all(buffer)?;
        Ok(buffer.len())
    }

    fn position(&mut self, handle: FileHandle) -> io::Result<u64> {
        self.file(handle)?.stream_position()
    }

    fn set_position(&mut self, handle: FileHandle, position: u64) -> io::Result<()> {
        self.file(handle)?.seek(SeekFrom::Start(position)).map(drop)
    }

    fn size(&mut self, handle: FileHandle) -> io::Result<u64> {
        Ok(self.file(handle)?.metadata()?.len())
    }

    fn delete(&mut self, path: &str) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_directory(&mut self, path: &str) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn delimiter(&self) -> char {
        std::path::MAIN_SEPARATOR
    }

    fn lookup(&mut self, directory: &str, index: usize) -> io::Result<Option<DirectoryEntry>> {
        let directory = if directory.is_empty() { "." } else { directory };
        let mut names: Vec<_> = fs::read_dir(Path::new(directory))?
            .filter_map(Result::ok)
            .collect();
        names.sort_by_key(|entry| entry.file_name());
        let Some(entry) = index.checked_sub(1).and_then(|i| names.get(i)) else {
            return Ok(None);
        };
        let metadata = entry.metadata()?;
        Ok(Some(DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            created: seconds_1901(metadata.created()),
            modified: seconds_1901(metadata.modified()),
            is_directory: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
        }))
    }
}

/// The collaborator bundle the interpreter owns.
pub struct Devices {
    pub raster: Box<dyn Raster>,
    pub display: Box<dyn Display>,
    pub keyboard: Box<dyn Keyboard>,
    pub mouse: Box<dyn Mouse>,
    pub files: Box<dyn FileSystem>,
    pub events: Arc<EventFlag>,
}

impl Devices {
    /// No window; keys come from a [`KeyboardQueue`] sharing `events`.
    pub fn headless() -> Self {
        let events = Arc::new(EventFlag::new());
        Self {
            raster: Box::new(Headless::default()),
            display: Box::new(Headless::default()),
            keyboard: Box::new(KeyboardQueue::new(events.clone())),
            mouse: Box::new(Headless::default()),
            files: Box::new(HostFileSystem::new()),
            events,
        }
    }
}

impl std::fmt::Debug for Devices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Devices").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn event_flag_wakes_a_waiter_from_another_thread() {
        let flag = Arc::new(EventFlag::new());
        let signaller = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.signal();
        });
        assert!(flag.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(!flag.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn keyboard_queue_is_fifo_and_raises_events() {
        let events = Arc::new(EventFlag::new());
        let mut keys = KeyboardQueue::new(events.clone());
        keys.clone().push(65);
        keys.push(66);
        assert_eq!(keys.peek(), Some(65));
        assert_eq!(keys.next(), Some(65));
        assert_eq!(keys.next(), Some(66));
        assert_eq!(keys.next(), None);
        assert!(events.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn host_file_system_round_trips_a_file() {
        let dir = std::env::temp_dir().join(format!("bluebook-fs-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut files = HostFileSystem::new();
        files.create_directory(dir.to_str().unwrap()).unwrap();
        let path = dir.join("notes.txt");
        let path = path.to_str().unwrap();

        let handle = files.open(path, true).unwrap();
        assert_eq!(files.write(handle, b"hello world").unwrap(), 11);
        assert!(files.at_end(handle).unwrap());
        files.set_position(handle, 6).unwrap();
        let mut buffer = [0; 16];
        assert_eq!(files.read(handle, &mut buffer).unwrap(), 5);
        assert_eq!(&buffer[..5], b"world");
        assert_eq!(files.size(handle).unwrap(), 11);
        files.close(handle).unwrap();
        assert!(files.close(handle).is_err());

        let entry = files.lookup(dir.to_str().unwrap(), 1).unwrap().unwrap();
        assert_eq!(entry.name, "notes.txt");
        assert_eq!(entry.size, 11);
        assert!(!entry.is_directory);
        assert!(entry.modified > SECONDS_1901_TO_1970);
        assert_eq!(files.lookup(dir.to_str().unwrap(), 2).unwrap(), None);

        files.delete(path).unwrap();
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn headless_display_tracks_size_and_reversal() {
        let mut display = Headless::default();
        assert_eq!(display.screen_size(), (640, 480));
        display
            .set_display(&Form {
                bits: vec![],
                width: 800,
                height: 600,
                depth: 1,
            })
            .unwrap();
        assert_eq!(display.screen_size(), (800, 600));
        display.reverse();
        assert!(display.reversed);
    }
}
