//! Random-access reader over the day-sharded series.
//!
//! [`StatStore::open`] scans a directory for `<set>.<DDMMYY>.dat` files
//! and groups them into named sets with sorted day lists. A typed
//! [`Cursor`] then walks one set second by second. Reads never fail:
//! seconds not covered by any file, holes in sparse files, and seconds
//! past a short file's end all come back as zero records. The caller
//! decides when to stop by watching the cursor's time.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::day;
use crate::record::Record;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("can't list statistics dir {dir}: {source}")]
    ListDir {
        dir: PathBuf,
        source: std::io::Error,
    },
}

/// One day file of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayInfo {
    /// DDMMYY code from the file name.
    pub day: u32,
    /// Epoch of the day's 00:00:00 UTC — second 0 of the file.
    pub start: i64,
    /// File length in bytes at discovery time.
    pub len_bytes: u64,
}

impl DayInfo {
    /// Exclusive end of the covered range for records of `rec_size`.
    fn end(&self, rec_size: u64) -> i64 {
        self.start + (self.len_bytes / rec_size) as i64
    }
}

/// All discovered day files of one series.
#[derive(Debug, Clone)]
pub struct SetInfo {
    pub name: String,
    /// Sorted by `start`.
    pub days: Vec<DayInfo>,
}

impl SetInfo {
    pub fn first_second(&self) -> Option<i64> {
        self.days.first().map(|d| d.start)
    }

    /// Exclusive end across all days, for records of `rec_size` bytes.
    pub fn last_second(&self, rec_size: u64) -> Option<i64> {
        self.days.iter().map(|d| d.end(rec_size)).max()
    }
}

/// The discovered contents of a statistics directory.
pub struct StatStore {
    dir: PathBuf,
    sets: Vec<SetInfo>,
}

impl StatStore {
    /// Scan `dir`. Unparseable names are skipped; an empty or absent set
    /// is not an error — its cursor just yields zeros.
    pub fn open(dir: &Path) -> Result<StatStore, StoreError> {
        let entries = fs::read_dir(dir).map_err(|source| StoreError::ListDir {
            dir: dir.to_path_buf(),
            source,
        })?;

        let mut sets: Vec<SetInfo> = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((set_name, code)) = day::parse_file_name(name) else {
                continue;
            };
            let Some(start) = day::day_epoch(code) else {
                continue;
            };
            let len_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);

            let info = DayInfo {
                day: code,
                start,
                len_bytes,
            };
            match sets.iter_mut().find(|s| s.name == set_name) {
                Some(set) => set.days.push(info),
                None => sets.push(SetInfo {
                    name: set_name.to_string(),
                    days: vec![info],
                }),
            }
        }

        for set in &mut sets {
            set.days.sort_by_key(|d| d.start);
        }

        Ok(StatStore {
            dir: dir.to_path_buf(),
            sets,
        })
    }

    pub fn sets(&self) -> &[SetInfo] {
        &self.sets
    }

    pub fn set(&self, name: &str) -> Option<&SetInfo> {
        self.sets.iter().find(|s| s.name == name)
    }

    /// Earliest second covered by any set.
    pub fn first_second(&self) -> Option<i64> {
        self.sets.iter().filter_map(|s| s.first_second()).min()
    }

    /// A cursor over `set`, positioned at `seek_to`. A name with no
    /// files yields an all-zero cursor.
    pub fn cursor<R: Record>(&self, set: &str, seek_to: i64) -> Cursor<'_, R> {
        Cursor {
            dir: &self.dir,
            set: self.set(set),
            t: seek_to,
            file: None,
            day_end: 0,
            _record: PhantomData,
        }
    }
}

/// Sequential typed reader over one set.
///
/// The record at the cursor's current time is returned by [`read`];
/// [`next`] advances one second first. Day files are opened lazily and
/// swapped transparently at day boundaries.
///
/// [`read`]: Cursor::read
/// [`next`]: Cursor::next
pub struct Cursor<'a, R: Record> {
    dir: &'a Path,
    set: Option<&'a SetInfo>,
    t: i64,
    file: Option<File>,
    day_end: i64,
    _record: PhantomData<R>,
}

impl<'a, R: Record> Cursor<'a, R> {
    /// The second the next `read` refers to.
    pub fn time(&self) -> i64 {
        self.t
    }

    /// Reposition to `t`.
    pub fn seek(&mut self, t: i64) {
        self.t = t;
        self.file = None;
        self.day_end = 0;
    }

    /// Record at the current time.
    pub fn read(&mut self) -> R {
        if self.file.is_some() {
            self.read_sequential()
        } else {
            self.fetch()
        }
    }

    /// Advance one second and return the record there.
    pub fn next(&mut self) -> R {
        self.t += 1;
        if self.file.is_some() && self.t >= self.day_end {
            self.file = None;
        }
        self.read()
    }

    /// Locate the day covering `t`, open its file and read at offset.
    fn fetch(&mut self) -> R {
        let Some(set) = self.set else {
            return R::zero();
        };
        let rec_size = R::SIZE as u64;
        let Some(day) = set
            .days
            .iter()
            .find(|d| self.t >= d.start && self.t < d.end(rec_size))
        else {
            return R::zero();
        };

        let path = self.dir.join(day::file_name(&set.name, day.day));
        let Ok(mut file) = File::open(&path) else {
            return R::zero();
        };
        let offset = (self.t - day.start) as u64 * rec_size;
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return R::zero();
        }

        self.day_end = day.end(rec_size);
        self.file = Some(file);
        self.read_sequential()
    }

    /// Read one record from the open file; on short read, drop the file
    /// and yield zero for the rest of this day.
    fn read_sequential(&mut self) -> R {
        let Some(file) = self.file.as_mut() else {
            return R::zero();
        };
        let mut buf = vec![0u8; R::SIZE];
        match file.read_exact(&mut buf) {
            Ok(()) => R::decode(&buf),
            Err(_) => {
                self.file = None;
                R::zero()
            }
        }
    }
}
