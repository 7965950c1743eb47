//! Chart rendering.
//!
//! An RGB bitmap with a light grid background. The traffic chart stacks
//! green (passed) against red (dropped) columns scaled to the window
//! peak, darkening with line density when many seconds share one pixel
//! column. The weight chart draws one line per module series, coloured
//! deterministically from the module name.

use sluice_stats::cursor::StatStore;
use sluice_stats::record::{Record, StatBucket, WeightSample};
use sluice_stats::recorder::TRAFFIC_SET;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const WHITE: Rgb = Rgb {
    r: 255,
    g: 255,
    b: 255,
};

pub struct Bitmap {
    width: usize,
    height: usize,
    pixels: Vec<Rgb>,
}

impl Bitmap {
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.clamp(16, 4096);
        let height = height.clamp(16, 2048);
        Bitmap {
            width,
            height,
            pixels: vec![WHITE; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn put(&mut self, x: usize, y: usize, color: Rgb) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color;
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Rgb {
        self.pixels[y * self.width + x]
    }

    pub fn horiz_line(&mut self, x1: usize, x2: usize, y: usize, color: Rgb) {
        for x in x1..=x2.min(self.width.saturating_sub(1)) {
            self.put(x, y, color);
        }
    }

    pub fn vert_line(&mut self, x: usize, y1: usize, y2: usize, color: Rgb) {
        for y in y1..y2.min(self.height) {
            self.put(x, y, color);
        }
    }

    /// Light 10-pixel grid, every fifth line slightly darker.
    pub fn draw_grid(&mut self) {
        for i in 0..self.width / 10 {
            let shade = if i % 5 == 0 { 230 } else { 240 };
            self.vert_line(i * 10, 0, self.height, gray(shade));
        }
        for i in 0..self.height / 10 {
            let shade = if i % 5 == 0 { 230 } else { 240 };
            self.horiz_line(0, self.width - 1, i * 10, gray(shade));
        }
    }

    /// Encode as an 8-bit RGB PNG.
    pub fn encode_png(&self) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width as u32, self.height as u32);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = match encoder.write_header() {
                Ok(w) => w,
                Err(_) => return Vec::new(),
            };
            let mut data = Vec::with_capacity(self.width * self.height * 3);
            for p in &self.pixels {
                data.extend_from_slice(&[p.r, p.g, p.b]);
            }
            if writer.write_image_data(&data).is_err() {
                return Vec::new();
            }
        }
        out
    }
}

fn gray(v: u8) -> Rgb {
    Rgb { r: v, g: v, b: v }
}

// ─── Name → colour ──────────────────────────────────────────────────────────

/// CRC-6 over the name bytes, spread over the RGB channels — each series
/// keeps the same colour across runs and machines.
fn crc6(data: &[u8]) -> u8 {
    let mut cs: u8 = 0;
    for &byte in data {
        let mut cst = byte;
        for _ in 0..8 {
            cs >>= 1;
            if ((cs << 6) ^ (cst << 7)) & 0x80 != 0 {
                cs ^= 0xC2;
            }
            cst >>= 1;
        }
    }
    cs >> 2
}

pub fn name_color(name: &str) -> Rgb {
    let c = crc6(name.as_bytes());
    Rgb {
        r: (c & 0x30) << 2,
        g: (c & 0x0c) << 4,
        b: (c & 0x03) << 6,
    }
}

// ─── Traffic chart ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct TrafficParams {
    pub width: usize,
    pub height: usize,
    /// Window start, epoch seconds; 0 means "the whole store".
    pub start: i64,
    /// Window end, epoch seconds (exclusive); ignored when `start` is 0.
    pub end: i64,
    /// Plot octets per second (true) or packets per second.
    pub octets: bool,
}

fn bucket_value(bucket: &StatBucket, octets: bool, pass: bool) -> u32 {
    match (octets, pass) {
        (true, true) => bucket.octets_pass,
        (true, false) => bucket.octets_drop,
        (false, true) => bucket.packets_pass,
        (false, false) => bucket.packets_drop,
    }
}

/// Resolve the requested window against what the store covers.
fn resolve_window(store: &StatStore, start: i64, end: i64) -> Option<(i64, i64)> {
    if start != 0 {
        return (end > start).then_some((start, end));
    }
    let set = store.set(TRAFFIC_SET)?;
    let first = set.first_second()?;
    let last = set.last_second(StatBucket::SIZE as u64)?;
    (last > first).then_some((first, last))
}

/// Render the pass/drop chart. A window with no data comes out as the
/// bare grid, never an error.
pub fn traffic_chart(store: &StatStore, params: &TrafficParams) -> Bitmap {
    let mut bmp = Bitmap::new(params.width, params.height);
    bmp.draw_grid();

    let Some((start, end)) = resolve_window(store, params.start, params.end) else {
        return bmp;
    };

    // First pass: window peak.
    let mut peak = 0u32;
    let mut cur = store.cursor::<StatBucket>(TRAFFIC_SET, start);
    let mut bucket = cur.read();
    while cur.time() < end {
        peak = peak
            .max(bucket_value(&bucket, params.octets, true))
            .max(bucket_value(&bucket, params.octets, false));
        bucket = cur.next();
    }
    if peak == 0 {
        return bmp;
    }

    // Second pass: accumulate per-column pixel counts and flush each
    // column when the cursor moves past it.
    let w = bmp.width() as i64;
    let h = bmp.height();
    let span = end - start;
    let lines_per_row = (span / w + 2) as u32;

    let mut column = vec![PixelInfo::default(); h];
    let mut prev_col: i64 = 0;

    let mut cur = store.cursor::<StatBucket>(TRAFFIC_SET, start);
    let mut bucket = cur.read();
    while cur.time() < end {
        let t = cur.time();
        let h_pass = (bucket_value(&bucket, params.octets, true) as u64 * h as u64
            / (peak as u64 + 1)) as usize;
        let h_drop = (bucket_value(&bucket, params.octets, false) as u64 * h as u64
            / (peak as u64 + 1)) as usize;

        let col_start = w * (t - start) / span;
        let col_end = (w * (t - start + 1) / span).min(w - 1);

        for col in col_start..=col_end {
            if col != prev_col {
                flush_column(&mut bmp, &column, prev_col as usize, lines_per_row);
                column.iter_mut().for_each(|p| *p = PixelInfo::default());
                prev_col = col;
            }
            for p in column.iter_mut().take(h_pass) {
                p.passed += 1;
            }
            for p in column.iter_mut().take(h_drop) {
                p.dropped += 1;
            }
        }
        bucket = cur.next();
    }
    flush_column(&mut bmp, &column, prev_col as usize, lines_per_row);

    bmp
}

#[derive(Debug, Clone, Copy, Default)]
struct PixelInfo {
    passed: u32,
    dropped: u32,
}

const MAX_GREEN: u32 = 150;
const MAX_RED: u32 = 150;

/// Paint one finished pixel column, bottom-up. With several seconds per
/// column the colour darkens with the share of seconds that reached this
/// height.
fn flush_column(bmp: &mut Bitmap, column: &[PixelInfo], x: usize, lines_per_row: u32) {
    let h = column.len();
    let density = lines_per_row.max(2) - 1;

    for (ih, info) in column.iter().enumerate() {
        if info.passed == 0 && info.dropped == 0 {
            break;
        }
        let y = h - ih - 1;

        let shade = |count: u32, max_channel: u32| -> (u32, u32) {
            let bright = (count as f64 / density as f64).min(1.0);
            let main = max_channel + ((255 - max_channel) as f64 * (1.0 - bright)) as u32;
            let side = (200.0 * (1.0 - bright)) as u32;
            (main, side)
        };

        let color = match (info.passed > 0, info.dropped > 0) {
            (true, false) => {
                let (g, side) = shade(info.passed, MAX_GREEN);
                Rgb {
                    r: side as u8,
                    g: g as u8,
                    b: side as u8,
                }
            }
            (false, true) => {
                let (r, side) = shade(info.dropped, MAX_RED);
                Rgb {
                    r: r as u8,
                    g: side as u8,
                    b: side as u8,
                }
            }
            (true, true) => {
                // Red mixes the dropped main with the passed side value;
                // green and blue both halve the dropped side value.
                let (drop_main, drop_side) = shade(info.dropped, MAX_RED);
                let (_, pass_side) = shade(info.passed, MAX_GREEN);
                Rgb {
                    r: ((drop_main + pass_side) / 2) as u8,
                    g: (drop_side / 2) as u8,
                    b: (drop_side / 2) as u8,
                }
            }
            (false, false) => unreachable!(),
        };
        bmp.put(x, y, color);
    }
}

// ─── Weight chart ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct WeightsParams {
    pub width: usize,
    pub height: usize,
    pub start: i64,
    pub end: i64,
}

/// One rendered series and its legend colour.
#[derive(Debug, Clone)]
pub struct LegendEntry {
    pub name: String,
    pub color: Rgb,
}

/// Render per-module weight lines; every set except the traffic series
/// is drawn. Returns the bitmap and the name→colour legend.
pub fn weights_chart(store: &StatStore, params: &WeightsParams) -> (Bitmap, Vec<LegendEntry>) {
    let mut bmp = Bitmap::new(params.width, params.height);
    bmp.draw_grid();

    let names: Vec<String> = store
        .sets()
        .iter()
        .map(|s| s.name.clone())
        .filter(|n| n != TRAFFIC_SET)
        .collect();
    let legend: Vec<LegendEntry> = names
        .iter()
        .map(|n| LegendEntry {
            name: n.clone(),
            color: name_color(n),
        })
        .collect();

    let window = if params.start != 0 {
        (params.end > params.start).then_some((params.start, params.end))
    } else {
        let first = names
            .iter()
            .filter_map(|n| store.set(n)?.first_second())
            .min();
        let last = names
            .iter()
            .filter_map(|n| store.set(n)?.last_second(WeightSample::SIZE as u64))
            .max();
        match (first, last) {
            (Some(f), Some(l)) if l > f => Some((f, l)),
            _ => None,
        }
    };
    let Some((start, end)) = window else {
        return (bmp, legend);
    };

    // Per-series column averages.
    let w = bmp.width();
    let h = bmp.height();
    let span = (end - start) as f64;
    let mut series: Vec<Vec<f64>> = Vec::with_capacity(names.len());
    let mut max_avg = 0.0f64;

    for name in &names {
        let mut sums = vec![0.0f64; w];
        let mut counts = vec![0u32; w];
        let mut cur = store.cursor::<WeightSample>(name, start);
        let mut sample = cur.read();
        while cur.time() < end {
            let col = (((cur.time() - start) as f64 / span) * w as f64) as usize;
            let col = col.min(w - 1);
            sums[col] += sample.0;
            counts[col] += 1;
            sample = cur.next();
        }
        let averages: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
            .collect();
        for &a in &averages {
            max_avg = max_avg.max(a);
        }
        series.push(averages);
    }

    if max_avg <= 0.0 {
        return (bmp, legend);
    }

    for (averages, entry) in series.iter().zip(&legend) {
        let mut prev_y: Option<usize> = None;
        for (x, &avg) in averages.iter().enumerate() {
            let scaled = ((avg / max_avg) * (h as f64 - 1.0)) as usize;
            let y = h - 1 - scaled.min(h - 1);
            match prev_y {
                Some(py) if py != y => {
                    let (lo, hi) = if py < y { (py, y) } else { (y, py) };
                    bmp.vert_line(x, lo, hi + 1, entry.color);
                }
                _ => bmp.put(x, y, entry.color),
            }
            prev_y = Some(y);
        }
    }

    (bmp, legend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_stats::record::WeightAccum;
    use sluice_stats::recorder::Recorder;

    // 2024-01-01 00:00:00 UTC
    const JAN1_2024: i64 = 1_704_067_200;

    #[test]
    fn bitmap_starts_white() {
        let bmp = Bitmap::new(32, 32);
        assert_eq!(bmp.get(0, 0), WHITE);
        assert_eq!(bmp.get(31, 31), WHITE);
    }

    #[test]
    fn bitmap_dimensions_are_clamped() {
        let bmp = Bitmap::new(1, 100_000);
        assert_eq!(bmp.width(), 16);
        assert_eq!(bmp.height(), 2048);
    }

    #[test]
    fn grid_darkens_every_fifth_line() {
        let mut bmp = Bitmap::new(100, 100);
        bmp.draw_grid();
        assert_eq!(bmp.get(0, 1).r, 230);
        assert_eq!(bmp.get(10, 1).r, 240);
        assert_eq!(bmp.get(50, 1).r, 230);
    }

    #[test]
    fn out_of_bounds_put_is_ignored() {
        let mut bmp = Bitmap::new(16, 16);
        bmp.put(1000, 1000, Rgb { r: 1, g: 2, b: 3 });
    }

    #[test]
    fn png_has_magic_header() {
        let bmp = Bitmap::new(20, 20);
        let data = bmp.encode_png();
        assert_eq!(&data[0..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
    }

    #[test]
    fn name_color_is_deterministic_and_distinct() {
        assert_eq!(name_color("entropy"), name_color("entropy"));
        assert_ne!(name_color("entropy"), name_color("bymark"));
    }

    fn store_with_traffic(dir: &std::path::Path, seconds: &[(i64, u32, u32)]) -> StatStore {
        let mut rec = Recorder::new(dir.to_path_buf(), 365, vec![], false);
        for &(t, pass, drop) in seconds {
            let mut bucket = StatBucket::default();
            for _ in 0..pass {
                bucket.add_pass(100);
            }
            for _ in 0..drop {
                bucket.add_drop(100);
            }
            rec.flush(t, &mut bucket, &mut []);
        }
        StatStore::open(dir).unwrap()
    }

    #[test]
    fn traffic_chart_paints_pass_column_green() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_traffic(dir.path(), &[(JAN1_2024, 50, 0)]);

        let bmp = traffic_chart(
            &store,
            &TrafficParams {
                width: 40,
                height: 40,
                start: JAN1_2024,
                end: JAN1_2024 + 40,
                octets: false,
            },
        );
        // The written second lands in the first column; the bottom pixel
        // must be green-dominated.
        let bottom = bmp.get(0, 39);
        assert!(bottom.g > bottom.r, "expected green, got {bottom:?}");
    }

    #[test]
    fn traffic_chart_mixed_column_matches_density_shading() {
        let dir = tempfile::tempdir().unwrap();
        // One second carrying both passed and dropped packets.
        let store = store_with_traffic(dir.path(), &[(JAN1_2024, 50, 30)]);

        let bmp = traffic_chart(
            &store,
            &TrafficParams {
                width: 40,
                height: 40,
                start: JAN1_2024,
                end: JAN1_2024 + 40,
                octets: false,
            },
        );

        // peak = 50, so the column reaches 50·40/51 = 39 pass pixels and
        // 30·40/51 = 23 drop pixels; lines_per_row = 40/40 + 2 = 3 gives
        // a density divisor of 2, i.e. brightness 0.5 for one second:
        // main = 150 + 105·0.5 = 202, side = 200·0.5 = 100.
        //
        // Mixed pixels: red = (202 + 100) / 2, green = blue = 100 / 2.
        let mixed = Rgb {
            r: 151,
            g: 50,
            b: 50,
        };
        assert_eq!(bmp.get(0, 39), mixed, "bottom pixel carries both");
        assert_eq!(bmp.get(0, 40 - 22 - 1), mixed, "last mixed pixel");

        // Above the drop height only the pass shade remains.
        let pass_only = Rgb {
            r: 100,
            g: 202,
            b: 100,
        };
        assert_eq!(bmp.get(0, 40 - 23 - 1), pass_only, "first pass-only pixel");
        assert_eq!(bmp.get(0, 40 - 30 - 1), pass_only);
    }

    #[test]
    fn traffic_chart_empty_store_is_just_grid() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatStore::open(dir.path()).unwrap();
        let bmp = traffic_chart(
            &store,
            &TrafficParams {
                width: 40,
                height: 40,
                start: 0,
                end: 0,
                octets: true,
            },
        );
        let p = bmp.get(5, 5);
        assert!(p.r >= 230, "only background expected, got {p:?}");
    }

    #[test]
    fn weights_chart_colors_follow_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = Recorder::new(
            dir.path().to_path_buf(),
            365,
            vec!["entropy".into()],
            true,
        );
        let mut accums = [WeightAccum::default()];
        accums[0].add(4.0);
        rec.flush(JAN1_2024, &mut StatBucket::default(), &mut accums);

        let store = StatStore::open(dir.path()).unwrap();
        let (bmp, legend) = weights_chart(
            &store,
            &WeightsParams {
                width: 32,
                height: 32,
                start: JAN1_2024,
                end: JAN1_2024 + 32,
            },
        );
        assert_eq!(legend.len(), 1);
        assert_eq!(legend[0].name, "entropy");
        assert_eq!(legend[0].color, name_color("entropy"));
        // The series peak pixel carries the legend colour somewhere in
        // the first column.
        let mut found = false;
        for y in 0..bmp.height() {
            if bmp.get(0, y) == legend[0].color {
                found = true;
            }
        }
        assert!(found, "series pixel not painted");
    }
}
