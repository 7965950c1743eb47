//! Per-second statistics recorder.
//!
//! The daemon's ticker calls [`Recorder::flush`] once per second with the
//! current timestamp, the traffic bucket, and the per-module weight
//! accumulators. The recorder handles day rollover (close yesterday's
//! files, lazily create today's), the retention sweep, and the sparse
//! positional writes that give every second of a day a fixed offset.
//!
//! I/O failure is contained here: if a day file cannot be opened, the
//! affected series (`stat`, or just `wchart`) is disabled for the rest of
//! the run and the packet path never notices.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::day::{self, SECONDS_PER_DAY};
use crate::record::{Record, StatBucket, WeightAccum, WeightSample};

/// Default retention, in days.
pub const DEFAULT_KEEP_DAYS: u32 = 365;

/// Base name of the traffic series.
pub const TRAFFIC_SET: &str = "dstat";

pub struct Recorder {
    dir: PathBuf,
    keep_days: u32,
    module_names: Vec<String>,

    stat: bool,
    wchart: bool,

    cday: u32,
    daystart: i64,
    traffic_file: Option<File>,
    module_files: Vec<Option<File>>,
}

impl Recorder {
    /// A recorder that writes nothing (statistics disabled by config).
    pub fn disabled() -> Self {
        Recorder {
            dir: PathBuf::new(),
            keep_days: DEFAULT_KEEP_DAYS,
            module_names: Vec::new(),
            stat: false,
            wchart: false,
            cday: 0,
            daystart: 0,
            traffic_file: None,
            module_files: Vec::new(),
        }
    }

    /// A live recorder. `module_names` fixes the weight-series file set;
    /// `wchart` may be on only when `stat` is.
    pub fn new(dir: PathBuf, keep_days: u32, module_names: Vec<String>, wchart: bool) -> Self {
        let n = module_names.len();
        Recorder {
            dir,
            keep_days,
            module_names,
            stat: true,
            wchart,
            cday: 0,
            daystart: 0,
            traffic_file: None,
            module_files: (0..n).map(|_| None).collect(),
        }
    }

    pub fn stat_enabled(&self) -> bool {
        self.stat
    }

    pub fn wchart_enabled(&self) -> bool {
        self.wchart
    }

    /// Record one second: `now` is the shaper's wall-clock counter.
    /// `bucket` and `accums` are drained (zeroed) on success and on
    /// failure alike — a second that could not be written is lost, not
    /// replayed.
    pub fn flush(&mut self, now: i64, bucket: &mut StatBucket, accums: &mut [WeightAccum]) {
        if !self.stat {
            return;
        }

        let Some(today) = day::day_code(now) else {
            return;
        };

        if today != self.cday {
            if !self.roll_over(now, today) {
                return;
            }
        }

        let second = now - self.daystart;
        if let Some(f) = &self.traffic_file {
            let mut buf = [0u8; StatBucket::SIZE];
            bucket.encode(&mut buf);
            if let Err(e) = f.write_all_at(&buf, (second as u64) * StatBucket::SIZE as u64) {
                error!(error = %e, "traffic bucket write failed");
            }
        }
        *bucket = StatBucket::default();

        if self.wchart {
            for (file, accum) in self.module_files.iter().zip(accums.iter_mut()) {
                if let Some(f) = file {
                    let sample = WeightSample(accum.average());
                    let mut buf = [0u8; WeightSample::SIZE];
                    sample.encode(&mut buf);
                    if let Err(e) = f.write_all_at(&buf, (second as u64) * WeightSample::SIZE as u64)
                    {
                        error!(error = %e, "weight sample write failed");
                    }
                }
                accum.reset();
            }
        }
    }

    /// Close any day files; the next flush reopens today's.
    pub fn close(&mut self) {
        self.traffic_file = None;
        for f in &mut self.module_files {
            *f = None;
        }
        self.cday = 0;
    }

    fn roll_over(&mut self, now: i64, today: u32) -> bool {
        self.traffic_file = None;
        for f in &mut self.module_files {
            *f = None;
        }

        let path = self.dir.join(day::file_name(TRAFFIC_SET, today));
        match open_or_create(&path) {
            Ok(f) => self.traffic_file = Some(f),
            Err(e) => {
                error!(path = %path.display(), error = %e, "can't open traffic day file, statistics disabled");
                self.stat = false;
                return false;
            }
        }

        if self.wchart {
            for (name, slot) in self.module_names.iter().zip(self.module_files.iter_mut()) {
                let path = self.dir.join(day::file_name(name, today));
                match open_or_create(&path) {
                    Ok(f) => *slot = Some(f),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "can't open weight day file, weight charts disabled");
                        self.wchart = false;
                        break;
                    }
                }
            }
            if !self.wchart {
                for f in &mut self.module_files {
                    *f = None;
                }
            }
        }

        self.cday = today;
        self.daystart = day::day_start(now);

        self.sweep_old(now);
        true
    }

    /// Delete `*.<DDMMYY>.dat` files older than the retention window.
    fn sweep_old(&self, now: i64) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "can't list statistics dir");
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((_, code)) = day::parse_file_name(name) else {
                continue;
            };
            let Some(file_day) = day::day_epoch(code) else {
                continue;
            };

            let age_days = (now - file_day) / SECONDS_PER_DAY;
            if age_days > self.keep_days as i64 {
                let path = entry.path();
                info!(path = %path.display(), "removing old statistics file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "remove failed");
                }
            }
        }
    }
}

fn open_or_create(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}
