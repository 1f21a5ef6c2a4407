//! Run-length coding shared by the `.256` and `.16a` sprite formats.
//!
//! A frame is a stream of control units followed by pixel data. The two high
//! bits of a control unit select the run kind:
//!
//! | tag  | `.256` (u8)            | `.16a` (u16)             |
//! |------|------------------------|--------------------------|
//! | `00` | `n & 0x3F` literal px  | `n & 0xFF` literal words |
//! | `01` | skip `n & 0x3F` rows   | skip `n & 0xFF` rows     |
//! | `10` | skip `n & 0x3F` pixels | skip `n & 0xFF` pixels   |
//!
//! Pixel runs that reach the right edge continue on the next row.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RleFormat {
    /// One palette index per pixel, drawn opaque.
    Indexed256,
    /// One word per pixel: `(word >> 1)` holds the index in bits 0-7 and a
    /// 4-bit alpha in bits 8-11.
    Alpha16,
}

enum Run {
    Literal(u32),
    SkipPixels(u32),
    SkipRows(u32),
}

impl RleFormat {
    /// Bytes per control unit and per pixel.
    pub fn unit_size(self) -> usize {
        match self {
            RleFormat::Indexed256 => 1,
            RleFormat::Alpha16 => 2,
        }
    }

    fn max_count(self) -> u32 {
        match self {
            RleFormat::Indexed256 => 0x3F,
            RleFormat::Alpha16 => 0xFF,
        }
    }

    fn decode(self, unit: &[u8]) -> Run {
        let (control, tag_shift) = match self {
            RleFormat::Indexed256 => (unit[0] as u32, 6),
            RleFormat::Alpha16 => (u16::from_le_bytes([unit[0], unit[1]]) as u32, 14),
        };
        let count = control & self.max_count();
        match (control >> tag_shift) & 3 {
            0 => Run::Literal(count),
            t if t & 1 != 0 => Run::SkipRows(count),
            _ => Run::SkipPixels(count),
        }
    }

    fn encode(self, tag: u32, count: u32) -> [u8; 2] {
        match self {
            RleFormat::Indexed256 => [(tag << 6 | count) as u8, 0],
            RleFormat::Alpha16 => ((tag << 14 | count) as u16).to_le_bytes(),
        }
    }
}

/// One piece of a decoded frame. Pixel and skip spans never cross a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span<'a> {
    /// Raw pixel units starting at `(x, y)`.
    Pixels { x: u32, y: u32, data: &'a [u8] },
    Skip { x: u32, y: u32, count: u32 },
    Rows { y: u32, count: u32 },
}

enum Pending<'a> {
    Idle,
    Pixels(&'a [u8]),
    Skip(u32),
}

/// Walks an encoded frame, yielding row-bounded spans in stream order.
pub struct RleWalker<'a> {
    format: RleFormat,
    data: &'a [u8],
    pos: usize,
    width: u32,
    x: u32,
    y: u32,
    pending: Pending<'a>,
    failed: bool,
}

impl<'a> RleWalker<'a> {
    pub fn new(format: RleFormat, data: &'a [u8], width: u32) -> Self {
        Self {
            format,
            data,
            pos: 0,
            width,
            x: 0,
            y: 0,
            pending: Pending::Idle,
            failed: width == 0,
        }
    }

    fn advance(&mut self, count: u32) {
        self.x += count;
        if self.x >= self.width {
            self.x = 0;
            self.y = self.y.saturating_add(1);
        }
    }

    fn fail(&mut self, msg: String) -> Option<Result<Span<'a>>> {
        self.failed = true;
        Some(Err(Error::format(msg)))
    }
}

impl<'a> Iterator for RleWalker<'a> {
    type Item = Result<Span<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let unit = self.format.unit_size();
        loop {
            match std::mem::replace(&mut self.pending, Pending::Idle) {
                Pending::Pixels(data) if !data.is_empty() => {
                    let room = (self.width - self.x) as usize;
                    let n = (data.len() / unit).min(room);
                    let (now, rest) = data.split_at(n * unit);
                    let span = Span::Pixels {
                        x: self.x,
                        y: self.y,
                        data: now,
                    };
                    self.pending = Pending::Pixels(rest);
                    self.advance(n as u32);
                    return Some(Ok(span));
                }
                Pending::Skip(count) if count > 0 => {
                    let n = count.min(self.width - self.x);
                    let span = Span::Skip {
                        x: self.x,
                        y: self.y,
                        count: n,
                    };
                    self.pending = Pending::Skip(count - n);
                    self.advance(n);
                    return Some(Ok(span));
                }
                _ => {}
            }

            if self.failed || self.pos >= self.data.len() {
                return None;
            }
            if self.pos + unit > self.data.len() {
                return self.fail(format!("truncated RLE control at byte {}", self.pos));
            }

            let run = self.format.decode(&self.data[self.pos..self.pos + unit]);
            self.pos += unit;

            match run {
                Run::SkipRows(count) => {
                    let span = Span::Rows { y: self.y, count };
                    self.y = self.y.saturating_add(count);
                    return Some(Ok(span));
                }
                Run::SkipPixels(count) => self.pending = Pending::Skip(count),
                Run::Literal(count) => {
                    let len = count as usize * unit;
                    if self.pos + len > self.data.len() {
                        return self.fail(format!(
                            "RLE literal of {} pixels overruns frame data at byte {}",
                            count, self.pos
                        ));
                    }
                    self.pending = Pending::Pixels(&self.data[self.pos..self.pos + len]);
                    self.pos += len;
                }
            }
        }
    }
}

/// Walks the whole blob once, reporting the first malformed run.
pub fn validate(format: RleFormat, data: &[u8], width: u32) -> Result<()> {
    if data.len() % format.unit_size() != 0 {
        return Err(Error::format(format!(
            "frame data length {} is not a multiple of {}",
            data.len(),
            format.unit_size()
        )));
    }
    RleWalker::new(format, data, width).try_for_each(|span| span.map(|_| ()))
}

/// Encodes rows of optional pixel units (`None` is transparent). Each pixel
/// unit must be `format.unit_size()` bytes.
pub fn encode(format: RleFormat, width: usize, pixels: &[Option<&[u8]>]) -> Vec<u8> {
    let max = format.max_count() as usize;
    let unit = format.unit_size();
    let mut out = Vec::new();
    let push = |out: &mut Vec<u8>, tag: u32, count: usize| {
        out.extend_from_slice(&format.encode(tag, count as u32)[..unit]);
    };

    let rows: Vec<&[Option<&[u8]>]> = if width == 0 {
        Vec::new()
    } else {
        pixels.chunks(width).collect()
    };
    let mut empty_rows = 0;
    for row in rows {
        if row.iter().all(|p| p.is_none()) && row.len() == width {
            empty_rows += 1;
            continue;
        }
        while empty_rows > 0 {
            let n = empty_rows.min(max);
            push(&mut out, 1, n);
            empty_rows -= n;
        }

        let mut x = 0;
        while x < width {
            let transparent = row.get(x).map_or(true, |p| p.is_none());
            let mut n = 1;
            while n < max
                && x + n < width
                && row.get(x + n).map_or(true, |p| p.is_none()) == transparent
            {
                n += 1;
            }
            if transparent {
                push(&mut out, 2, n);
            } else {
                push(&mut out, 0, n);
                for p in row[x..x + n].iter().flatten() {
                    out.extend_from_slice(&p[..unit]);
                }
            }
            x += n;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(format: RleFormat, data: &[u8], width: u32) -> Vec<Span<'_>> {
        RleWalker::new(format, data, width)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    /// Per-row count of drawn + skipped pixels.
    fn row_totals(spans: &[Span], width: u32, unit: usize) -> std::collections::BTreeMap<u32, u32> {
        let mut totals = std::collections::BTreeMap::new();
        for span in spans {
            match *span {
                Span::Pixels { y, data, .. } => *totals.entry(y).or_insert(0) += (data.len() / unit) as u32,
                Span::Skip { y, count, .. } => *totals.entry(y).or_insert(0) += count,
                Span::Rows { y, count } => {
                    for r in y..y + count {
                        *totals.entry(r).or_insert(0) += width;
                    }
                }
            }
        }
        totals
    }

    #[test]
    fn conservation_per_row() {
        // width 5: skip 2, 3 literals | skip 1 row | 5 literals | skip 5
        let data = [0x82, 0x03, 1, 2, 3, 0x41, 0x05, 4, 5, 6, 7, 8, 0x85];
        let spans = spans(RleFormat::Indexed256, &data, 5);
        let totals = row_totals(&spans, 5, 1);
        assert_eq!(totals.len(), 4);
        assert!(totals.values().all(|&t| t == 5), "{:?}", totals);
    }

    #[test]
    fn runs_crossing_the_edge_wrap() {
        // width 4: skip 3, literal 3 -> 1 pixel on row 0, 2 on row 1
        let data = [0x83, 0x03, 9, 8, 7];
        let spans = spans(RleFormat::Indexed256, &data, 4);
        assert_eq!(
            spans,
            vec![
                Span::Skip { x: 0, y: 0, count: 3 },
                Span::Pixels { x: 3, y: 0, data: &[9] },
                Span::Pixels { x: 0, y: 1, data: &[8, 7] },
            ]
        );
    }

    #[test]
    fn alpha16_words() {
        // row skip 2, pixel skip 1, literal of 1 word
        let mut data = Vec::new();
        data.extend_from_slice(&0x4002u16.to_le_bytes());
        data.extend_from_slice(&0x8001u16.to_le_bytes());
        data.extend_from_slice(&0x0001u16.to_le_bytes());
        data.extend_from_slice(&((0x0F00u16 | 0x42) << 1).to_le_bytes());
        let spans = spans(RleFormat::Alpha16, &data, 3);
        assert_eq!(spans[0], Span::Rows { y: 0, count: 2 });
        assert_eq!(spans[1], Span::Skip { x: 0, y: 2, count: 1 });
        assert!(matches!(spans[2], Span::Pixels { x: 1, y: 2, data } if data.len() == 2));
    }

    #[test]
    fn overrun_is_reported() {
        assert!(validate(RleFormat::Indexed256, &[0x05, 1, 2], 8).is_err());
        assert!(validate(RleFormat::Alpha16, &[0x01, 0x00, 0x02], 8).is_err());
        assert!(validate(RleFormat::Indexed256, &[0x02, 1, 2, 0x81], 8).is_ok());
    }

    #[test]
    fn encoded_frames_conserve_width() {
        let a: &[u8] = &[7];
        let rows = [
            None, Some(a), Some(a), None, None, None, None,
            None, None, None, None, None, None, None,
            Some(a), Some(a), Some(a), Some(a), Some(a), Some(a), Some(a),
        ];
        let data = encode(RleFormat::Indexed256, 7, &rows);
        validate(RleFormat::Indexed256, &data, 7).unwrap();

        let spans = spans(RleFormat::Indexed256, &data, 7);
        let totals = row_totals(&spans, 7, 1);
        assert_eq!(totals.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(totals.values().all(|&t| t == 7));

        let drawn: usize = spans
            .iter()
            .map(|s| match s {
                Span::Pixels { data, .. } => data.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(drawn, 9);
    }

    #[test]
    fn long_runs_are_split() {
        let a: &[u8] = &[1, 0];
        let row = vec![Some(a); 300];
        let data = encode(RleFormat::Alpha16, 300, &row);
        let spans = spans(RleFormat::Alpha16, &data, 300);
        assert_eq!(row_totals(&spans, 300, 2).get(&0), Some(&300));
    }
}
