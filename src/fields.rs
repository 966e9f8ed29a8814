use std::io;

use sepval_core::Position;

use crate::cursor::{CursorState, EventCursor, EventCursorBuilder, EventKind};
use crate::error::Result;

/// What a [`FieldCursor`] currently points at.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldState {
    /// Nothing has been pulled yet.
    BeforeParse,
    /// A complete field value, readable with
    /// [`value`](FieldCursor::value).
    Field,
    /// A record boundary.
    RecordEnd,
    /// The stream is exhausted (or poisoned by an earlier error).
    Eof,
}

/// The current field value: a zero-copy range into the parse buffer while
/// the field lies in one fill, an owned spliced vector otherwise.
///
/// The transition from borrowed to owned happens only when a buffer ends
/// while the field is still open, or when fragments are not adjacent (a
/// `""` escape splits the value around the quote).
#[derive(Debug)]
enum Value {
    None,
    Borrowed { first: usize, last: usize },
    Owned,
}

/// A pull-style cursor yielding one field value or record boundary per
/// advance.
///
/// Built on [`EventCursor`] with the fixed handled set `EndBuffer |
/// EndRecord | EmptyPhysicalLine | Update | Finalize`.
#[derive(Debug)]
pub struct FieldCursor<R> {
    raw: EventCursor<R>,
    state: FieldState,
    value: Value,
    /// Backing storage for values that cannot alias the parse buffer;
    /// reused across fields.
    owned: Vec<u8>,
    /// Record and field indices: how many record boundaries have been
    /// consumed, and how many fields within the current record.
    record_index: u64,
    field_index: u64,
    empty_line_aware: bool,
}

/// Builds a [`FieldCursor`].
#[derive(Clone, Debug, Default)]
pub struct FieldCursorBuilder {
    buffer_size: Option<usize>,
    empty_line_aware: bool,
}

impl FieldCursorBuilder {
    /// Create a new builder.
    pub fn new() -> FieldCursorBuilder {
        FieldCursorBuilder::default()
    }

    /// The capacity of the recognizer's fill buffer, in bytes.
    pub fn buffer_size(&mut self, size: usize) -> &mut FieldCursorBuilder {
        self.buffer_size = Some(size);
        self
    }

    /// When enabled, empty physical lines surface as
    /// [`FieldState::RecordEnd`]; when disabled (the default) they are
    /// suppressed.
    pub fn empty_line_aware(&mut self, yes: bool) -> &mut FieldCursorBuilder {
        self.empty_line_aware = yes;
        self
    }

    /// Build a cursor pulling fields out of `rdr`.
    pub fn from_reader<R: io::Read>(&self, rdr: R) -> FieldCursor<R> {
        let mut builder = EventCursorBuilder::new();
        builder.handled(
            EventKind::EndBuffer
                | EventKind::EndRecord
                | EventKind::EmptyPhysicalLine
                | EventKind::Update
                | EventKind::Finalize,
        );
        if let Some(size) = self.buffer_size {
            builder.buffer_size(size);
        }
        FieldCursor {
            raw: builder.from_reader(rdr),
            state: FieldState::BeforeParse,
            value: Value::None,
            owned: Vec::new(),
            record_index: 0,
            field_index: 0,
            empty_line_aware: self.empty_line_aware,
        }
    }
}

impl<R: io::Read> FieldCursor<R> {
    /// Creates a cursor with the default configuration.
    pub fn new(rdr: R) -> FieldCursor<R> {
        FieldCursorBuilder::new().from_reader(rdr)
    }

    /// What the cursor currently points at.
    pub fn state(&self) -> FieldState {
        self.state
    }

    /// Whether the stream still has fields or boundaries to offer.
    pub fn is_eof(&self) -> bool {
        self.state == FieldState::Eof
    }

    /// Whether empty physical lines surface as record boundaries.
    pub fn is_empty_line_aware(&self) -> bool {
        self.empty_line_aware
    }

    /// See [`FieldCursorBuilder::empty_line_aware`].
    pub fn set_empty_line_aware(&mut self, yes: bool) {
        self.empty_line_aware = yes;
    }

    /// `(record index, field index within the record)`, both zero-based.
    pub fn position(&self) -> (u64, u64) {
        (self.record_index, self.field_index)
    }

    /// The physical position of the underlying parser.
    pub fn physical_position(&self) -> Position {
        self.raw.position()
    }

    /// The current field value.
    ///
    /// Empty unless [`state`](FieldCursor::state) is
    /// [`FieldState::Field`]; valid until the next advance.
    pub fn value(&self) -> &[u8] {
        match self.value {
            Value::None => &[],
            Value::Borrowed { first, last } => &self.raw.buffer()[first..last],
            Value::Owned => &self.owned,
        }
    }

    /// Moves to the next field or record boundary.
    pub fn advance(&mut self) -> Result<FieldState> {
        self.advance_by(0)
    }

    /// With `n == 0`, moves to the next field or record boundary. With
    /// `n >= 1`, skips `n` fields cheaply (their payloads are discarded at
    /// the source) and stops early at a record boundary if one intervenes.
    pub fn advance_by(&mut self, n: usize) -> Result<FieldState> {
        if self.state == FieldState::Eof {
            return Ok(FieldState::Eof);
        }
        self.clear_value();
        match self.state {
            FieldState::Field => self.field_index += 1,
            FieldState::RecordEnd => {
                self.record_index += 1;
                self.field_index = 0;
            }
            _ => {}
        }

        if n == 0 {
            return self.next_field();
        }

        self.raw.set_discarding_data(true);
        let skipped = self.skip_fields(n);
        self.raw.set_discarding_data(false);
        match skipped {
            Ok(true) => self.next_field(),
            Ok(false) => Ok(self.state),
            Err(err) => {
                self.state = FieldState::Eof;
                Err(err)
            }
        }
    }

    /// Advances until the `n + 1`-th record boundary (or EOF), so
    /// `skip_record(0)` skips the rest of the current record.
    pub fn skip_record(&mut self, mut n: usize) -> Result<FieldState> {
        if self.state == FieldState::Eof {
            return Ok(FieldState::Eof);
        }
        self.clear_value();

        self.raw.set_discarding_data(true);
        let result = loop {
            let state = match self.raw.advance() {
                Ok(state) => state,
                Err(err) => break Err(err),
            };
            match state {
                CursorState::Update => {}
                CursorState::Finalize => {
                    if self.state == FieldState::RecordEnd {
                        self.record_index += 1;
                        self.field_index = 0;
                    }
                    self.state = FieldState::Field;
                    self.field_index += 1;
                }
                CursorState::EmptyPhysicalLine if !self.empty_line_aware => {}
                CursorState::EmptyPhysicalLine | CursorState::EndRecord => {
                    if self.state == FieldState::RecordEnd {
                        self.record_index += 1;
                        self.field_index = 0;
                    } else {
                        self.state = FieldState::RecordEnd;
                    }
                    if n == 0 {
                        break Ok(());
                    }
                    n -= 1;
                }
                CursorState::Eof => {
                    if self.state == FieldState::RecordEnd {
                        self.record_index += 1;
                        self.field_index = 0;
                    }
                    self.state = FieldState::Eof;
                    break Ok(());
                }
                _ => {}
            }
        };
        self.raw.set_discarding_data(false);
        match result {
            Ok(()) => Ok(self.state),
            Err(err) => {
                self.state = FieldState::Eof;
                Err(err)
            }
        }
    }

    /// Consumes events until `n` fields have been skipped. Returns `true`
    /// when all `n` were skipped and the next field should be read for
    /// real; `false` when a record boundary or EOF cut the skip short.
    fn skip_fields(&mut self, mut n: usize) -> Result<bool> {
        loop {
            match self.raw.advance()? {
                CursorState::Update => {}
                CursorState::Finalize => {
                    self.field_index += 1;
                    if n == 1 {
                        return Ok(true);
                    }
                    n -= 1;
                }
                CursorState::EmptyPhysicalLine if !self.empty_line_aware => {}
                CursorState::EmptyPhysicalLine | CursorState::EndRecord => {
                    self.state = FieldState::RecordEnd;
                    return Ok(false);
                }
                CursorState::Eof => {
                    self.state = FieldState::Eof;
                    return Ok(false);
                }
                _ => {}
            }
        }
    }

    /// Pulls raw events until the next complete field or boundary.
    ///
    /// On an error the cursor is left at `Eof`: the stream is poisoned.
    fn next_field(&mut self) -> Result<FieldState> {
        loop {
            let state = match self.raw.advance() {
                Ok(state) => state,
                Err(err) => {
                    self.state = FieldState::Eof;
                    return Err(err);
                }
            };
            match state {
                CursorState::Update => {
                    let (first, last) = (self.raw.offset(0), self.raw.offset(1));
                    self.append_fragment(first, last);
                }
                CursorState::Finalize => {
                    let (first, last) = (self.raw.offset(0), self.raw.offset(1));
                    self.append_fragment(first, last);
                    if let Value::None = self.value {
                        // An entirely empty field.
                        self.value = Value::Borrowed { first, last: first };
                    }
                    self.state = FieldState::Field;
                    return Ok(self.state);
                }
                CursorState::EmptyPhysicalLine if !self.empty_line_aware => {}
                CursorState::EmptyPhysicalLine | CursorState::EndRecord => {
                    self.clear_value();
                    self.state = FieldState::RecordEnd;
                    return Ok(self.state);
                }
                CursorState::EndBuffer => {
                    // The fill is about to be replaced; anything borrowed
                    // must move to owned storage now.
                    self.spill();
                }
                CursorState::Eof => {
                    self.clear_value();
                    self.state = FieldState::Eof;
                    return Ok(self.state);
                }
                _ => {}
            }
        }
    }

    fn append_fragment(&mut self, first: usize, last: usize) {
        if first == last {
            return;
        }
        match self.value {
            Value::None => {
                self.value = Value::Borrowed { first, last };
            }
            Value::Borrowed { first: f, last: l } if l == first => {
                // Adjacent in the same fill; just widen the view.
                self.value = Value::Borrowed { first: f, last };
            }
            Value::Borrowed { .. } => {
                self.spill();
                self.owned.extend_from_slice(&self.raw.buffer()[first..last]);
            }
            Value::Owned => {
                self.owned.extend_from_slice(&self.raw.buffer()[first..last]);
            }
        }
    }

    fn spill(&mut self) {
        if let Value::Borrowed { first, last } = self.value {
            self.owned.extend_from_slice(&self.raw.buffer()[first..last]);
            self.value = Value::Owned;
        }
    }

    fn clear_value(&mut self) {
        self.value = Value::None;
        self.owned.clear();
    }
}
