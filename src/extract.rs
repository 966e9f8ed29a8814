use std::io::{Read, Write};

use bstr::{BString, ByteSlice};
use sepval_core::{Flow, Handler, Parser};

use crate::error::{Error, ErrorKind, Result};

/// A field predicate: receives a complete (unescaped) field value.
type Pred = Box<dyn FnMut(&[u8]) -> bool>;

/// How records are classified while their target field value is still
/// unknown. Monotonic within one record: `Unknown` decays to `Include` or
/// `Exclude`, never back.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    Unknown,
    Include,
    Exclude,
}

/// A streaming row filter: writes the *original bytes* of selected records
/// to a sink, each followed by a single `\n` regardless of the input's line
/// endings. No quoting normalization is performed.
///
/// The target field is picked either by matching header names against a
/// predicate (the first match fixes the column) or by a zero-based index;
/// each body record is then included iff the value predicate accepts that
/// column's value. This is a [`Handler`]; drive it with
/// [`extract`](RecordExtractor::extract) or a [`Parser`] of your own.
pub struct RecordExtractor<W> {
    out: W,
    name_pred: Option<Pred>,
    /// The looked-for header name when built from a literal, for error
    /// messages.
    name: Option<BString>,
    value_pred: Pred,
    target_index: Option<u64>,
    /// Records still to include; `None` is unlimited.
    remaining: Option<u64>,

    field_index: u64,
    /// Offset of the current record's begin within the current fill (or of
    /// the fill itself if the record started earlier).
    current_begin: usize,
    /// Accumulated text of the target field, in case it straddles fills.
    field_buf: Vec<u8>,
    /// The current record's bytes from earlier fills, kept while its
    /// inclusion is undecided.
    record_buf: Vec<u8>,
    header_mode: Mode,
    record_mode: Mode,
}

impl<W: Write> RecordExtractor<W> {
    /// Selects the target column by header name equality.
    pub fn with_field_name<N>(
        out: W,
        name: N,
        value_pred: impl FnMut(&[u8]) -> bool + 'static,
    ) -> RecordExtractor<W>
    where
        N: Into<Vec<u8>>,
    {
        let name = BString::from(name.into());
        let wanted = name.clone();
        let mut ex = RecordExtractor::with_name_pred(
            out,
            move |field: &[u8]| field == wanted.as_bytes(),
            value_pred,
        );
        ex.name = Some(name);
        ex
    }

    /// Selects the target column with an arbitrary header-name predicate;
    /// the first matching header field fixes the column.
    pub fn with_name_pred(
        out: W,
        name_pred: impl FnMut(&[u8]) -> bool + 'static,
        value_pred: impl FnMut(&[u8]) -> bool + 'static,
    ) -> RecordExtractor<W> {
        RecordExtractor::build(out, Some(Box::new(name_pred)), None, value_pred)
    }

    /// Selects the target column by zero-based index; no header matching is
    /// performed.
    pub fn with_field_index(
        out: W,
        index: u64,
        value_pred: impl FnMut(&[u8]) -> bool + 'static,
    ) -> RecordExtractor<W> {
        RecordExtractor::build(out, None, Some(index), value_pred)
    }

    fn build(
        out: W,
        name_pred: Option<Pred>,
        target_index: Option<u64>,
        value_pred: impl FnMut(&[u8]) -> bool + 'static,
    ) -> RecordExtractor<W> {
        RecordExtractor {
            out,
            name_pred,
            name: None,
            value_pred: Box::new(value_pred),
            target_index,
            remaining: None,
            field_index: 0,
            current_begin: 0,
            field_buf: Vec::new(),
            record_buf: Vec::new(),
            header_mode: Mode::Include,
            record_mode: Mode::Exclude,
        }
    }

    /// Whether the header record is copied to the sink. Enabled by default.
    pub fn include_header(mut self, yes: bool) -> RecordExtractor<W> {
        self.header_mode = if yes { Mode::Include } else { Mode::Exclude };
        self
    }

    /// Caps the number of included body records. Unlimited by default.
    pub fn max_records(mut self, n: u64) -> RecordExtractor<W> {
        self.remaining = Some(n);
        self
    }

    /// Consumes `rdr` and writes every selected record to the sink.
    ///
    /// Running out of budget is a normal way to finish, not an error.
    pub fn extract<R: Read>(&mut self, rdr: R) -> Result<()> {
        let mut parser = Parser::new(rdr);
        parser.run(self).map_err(Error::from)?;
        Ok(())
    }

    /// Unwraps the extractor, returning the sink.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn is_in_header(&self) -> bool {
        self.header_mode != Mode::Unknown
    }

    /// Runs `test` on the stitched field text: directly on the fragment
    /// when nothing was carried over, on the accumulated buffer otherwise.
    fn with_field_text(
        field_buf: &mut Vec<u8>,
        fragment: &[u8],
        test: &mut Pred,
    ) -> bool {
        if field_buf.is_empty() {
            test(fragment)
        } else {
            field_buf.extend_from_slice(fragment);
            let r = test(field_buf);
            field_buf.clear();
            r
        }
    }

    fn include(&mut self) -> Result<()> {
        self.flush_record_buf()?;
        self.record_mode = Mode::Include;
        Ok(())
    }

    fn exclude(&mut self) {
        self.record_mode = Mode::Exclude;
        self.record_buf.clear();
    }

    fn flush_record_buf(&mut self) -> Result<()> {
        if !self.record_buf.is_empty() {
            self.out.write_all(&self.record_buf)?;
            self.record_buf.clear();
        }
        Ok(())
    }

    /// Closes out the current record at `end`; returns whether it was
    /// written.
    fn flush_record(&mut self, buf: &[u8], end: usize) -> Result<bool> {
        match self.record_mode {
            Mode::Include => {
                self.flush_record_buf()?;
                self.out.write_all(&buf[self.current_begin..end])?;
                self.out.write_all(b"\n")?;
                // Nothing further of this record may reach the sink.
                self.record_mode = Mode::Exclude;
                Ok(true)
            }
            Mode::Exclude => {
                debug_assert!(self.record_buf.is_empty());
                Ok(false)
            }
            Mode::Unknown => {
                // The record ended before the target field appeared.
                self.record_mode = Mode::Exclude;
                self.record_buf.clear();
                Ok(false)
            }
        }
    }

    fn no_matching_field(&self) -> Error {
        Error::new(ErrorKind::NoMatchingField {
            name: self.name.clone(),
            pos: None,
        })
    }
}

impl<W: Write> Handler for RecordExtractor<W> {
    type Error = Error;

    fn start_buffer(&mut self, _buf: &[u8]) -> std::result::Result<(), Error> {
        self.current_begin = 0;
        Ok(())
    }

    fn end_buffer(&mut self, buf: &[u8]) -> std::result::Result<(), Error> {
        match self.record_mode {
            Mode::Include => {
                self.flush_record_buf()?;
                self.out.write_all(&buf[self.current_begin..])?;
            }
            Mode::Unknown => {
                self.record_buf.extend_from_slice(&buf[self.current_begin..]);
            }
            Mode::Exclude => {}
        }
        Ok(())
    }

    fn start_record(
        &mut self,
        _buf: &[u8],
        pos: usize,
    ) -> std::result::Result<Flow, Error> {
        self.current_begin = pos;
        self.record_mode = if self.is_in_header() {
            self.header_mode
        } else {
            Mode::Unknown
        };
        self.field_index = 0;
        debug_assert!(self.record_buf.is_empty());
        Ok(Flow::Continue)
    }

    fn update(
        &mut self,
        buf: &[u8],
        first: usize,
        last: usize,
    ) -> std::result::Result<Flow, Error> {
        let wants = if self.is_in_header() {
            // Header text only matters while a name is still being matched.
            self.target_index.is_none()
        } else {
            Some(self.field_index) == self.target_index
        };
        if wants {
            self.field_buf.extend_from_slice(&buf[first..last]);
        }
        Ok(Flow::Continue)
    }

    fn finalize(
        &mut self,
        buf: &[u8],
        first: usize,
        last: usize,
    ) -> std::result::Result<Flow, Error> {
        let fragment = &buf[first..last];
        if self.is_in_header() {
            if self.target_index.is_none() {
                if let Some(pred) = self.name_pred.as_mut() {
                    if Self::with_field_text(
                        &mut self.field_buf,
                        fragment,
                        pred,
                    ) {
                        self.target_index = Some(self.field_index);
                    }
                }
            }
            self.field_index += 1;
        } else {
            if self.record_mode == Mode::Unknown
                && Some(self.field_index) == self.target_index
            {
                let included = Self::with_field_text(
                    &mut self.field_buf,
                    fragment,
                    &mut self.value_pred,
                );
                if included {
                    self.include()?;
                } else {
                    self.exclude();
                }
            }
            self.field_index += 1;
        }
        Ok(Flow::Continue)
    }

    fn end_record(
        &mut self,
        buf: &[u8],
        pos: usize,
    ) -> std::result::Result<Flow, Error> {
        if self.is_in_header() {
            if self.target_index.is_none() {
                return Err(self.no_matching_field());
            }
            self.flush_record(buf, pos)?;
            if self.remaining == Some(0) {
                return Ok(Flow::Abort);
            }
            self.header_mode = Mode::Unknown;
        } else if self.flush_record(buf, pos)? {
            if self.remaining == Some(1) {
                return Ok(Flow::Abort);
            }
            if let Some(ref mut n) = self.remaining {
                *n -= 1;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Writes to `out` every record of `rdr` whose field named `name` (located
/// via the header record) satisfies `value_pred`, header included.
pub fn extract_records<R, W, N>(
    rdr: R,
    out: W,
    name: N,
    value_pred: impl FnMut(&[u8]) -> bool + 'static,
) -> Result<W>
where
    R: Read,
    W: Write,
    N: Into<Vec<u8>>,
{
    let mut ex = RecordExtractor::with_field_name(out, name, value_pred);
    ex.extract(rdr)?;
    Ok(ex.into_inner())
}
