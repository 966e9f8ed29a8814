use std::collections::VecDeque;
use std::convert::Infallible;
use std::io;

use enumflags2::{bitflags, BitFlags};
use sepval_core::{Flow, Handler, Parser, Position, YieldPoint};

use crate::error::{Error, Result};

/// The kinds of recognizer events a cursor can be asked to handle.
///
/// Kinds left out of a cursor's handled set are dropped at the source: they
/// are never queued, so skipping them costs nothing.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// A buffer fill was loaded.
    StartBuffer = 1 << 0,
    /// The current buffer fill was consumed.
    EndBuffer = 1 << 1,
    /// A record began.
    StartRecord = 1 << 2,
    /// A record ended.
    EndRecord = 1 << 3,
    /// A physical line with no characters.
    EmptyPhysicalLine = 1 << 4,
    /// A non-final field fragment.
    Update = 1 << 5,
    /// The final fragment of a field.
    Finalize = 1 << 6,
}

/// What the head of an [`EventCursor`] currently is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorState {
    /// No event has been pulled yet.
    BeforeParse,
    /// See [`EventKind::StartBuffer`]. Payloads: begin and end offsets of
    /// the loaded region (always `0` and its length).
    StartBuffer,
    /// See [`EventKind::EndBuffer`]. Payload: the end offset.
    EndBuffer,
    /// See [`EventKind::StartRecord`]. Payload: offset of the record's
    /// first character.
    StartRecord,
    /// See [`EventKind::EndRecord`]. Payload: offset of the terminator.
    EndRecord,
    /// See [`EventKind::EmptyPhysicalLine`]. Payload: offset of the line.
    EmptyPhysicalLine,
    /// See [`EventKind::Update`]. Payloads: the fragment's `first` and
    /// `last` offsets.
    Update,
    /// See [`EventKind::Finalize`]. Payloads: the fragment's `first` and
    /// `last` offsets.
    Finalize,
    /// The stream is exhausted.
    Eof,
}

/// The queueing handler behind an [`EventCursor`].
///
/// Yields whenever at least one event is pending, so the parser never runs
/// ahead of the consumer by more than a checkpoint.
#[derive(Debug)]
struct EventQueue {
    handled: BitFlags<EventKind>,
    events: VecDeque<(CursorState, u8)>,
    payloads: VecDeque<usize>,
    collecting: bool,
}

impl EventQueue {
    fn new(handled: BitFlags<EventKind>) -> EventQueue {
        EventQueue {
            handled,
            events: VecDeque::new(),
            payloads: VecDeque::new(),
            collecting: true,
        }
    }

    fn push(&mut self, kind: EventKind, state: CursorState, data: &[usize]) {
        if !self.handled.contains(kind) {
            return;
        }
        if self.collecting {
            self.events.push_back((state, data.len() as u8));
            self.payloads.extend(data.iter().copied());
        } else {
            self.events.push_back((state, 0));
        }
    }
}

impl Handler for EventQueue {
    type Error = Infallible;

    fn start_record(
        &mut self,
        _buf: &[u8],
        pos: usize,
    ) -> std::result::Result<Flow, Infallible> {
        self.push(EventKind::StartRecord, CursorState::StartRecord, &[pos]);
        Ok(Flow::Continue)
    }

    fn update(
        &mut self,
        _buf: &[u8],
        first: usize,
        last: usize,
    ) -> std::result::Result<Flow, Infallible> {
        self.push(EventKind::Update, CursorState::Update, &[first, last]);
        Ok(Flow::Continue)
    }

    fn finalize(
        &mut self,
        _buf: &[u8],
        first: usize,
        last: usize,
    ) -> std::result::Result<Flow, Infallible> {
        self.push(EventKind::Finalize, CursorState::Finalize, &[first, last]);
        Ok(Flow::Continue)
    }

    fn end_record(
        &mut self,
        _buf: &[u8],
        pos: usize,
    ) -> std::result::Result<Flow, Infallible> {
        self.push(EventKind::EndRecord, CursorState::EndRecord, &[pos]);
        Ok(Flow::Continue)
    }

    fn empty_physical_line(
        &mut self,
        _buf: &[u8],
        pos: usize,
    ) -> std::result::Result<Flow, Infallible> {
        self.push(
            EventKind::EmptyPhysicalLine,
            CursorState::EmptyPhysicalLine,
            &[pos],
        );
        Ok(Flow::Continue)
    }

    fn start_buffer(&mut self, buf: &[u8]) -> std::result::Result<(), Infallible> {
        self.push(
            EventKind::StartBuffer,
            CursorState::StartBuffer,
            &[0, buf.len()],
        );
        Ok(())
    }

    fn end_buffer(&mut self, buf: &[u8]) -> std::result::Result<(), Infallible> {
        self.push(EventKind::EndBuffer, CursorState::EndBuffer, &[buf.len()]);
        Ok(())
    }

    fn should_yield(&mut self, _at: YieldPoint) -> bool {
        !self.events.is_empty()
    }
}

/// Builds an [`EventCursor`] with a handled-event set and a buffer size.
#[derive(Clone, Debug)]
pub struct EventCursorBuilder {
    handled: BitFlags<EventKind>,
    buffer_size: Option<usize>,
}

impl Default for EventCursorBuilder {
    fn default() -> EventCursorBuilder {
        EventCursorBuilder { handled: BitFlags::all(), buffer_size: None }
    }
}

impl EventCursorBuilder {
    /// Create a new builder. All event kinds are handled by default.
    pub fn new() -> EventCursorBuilder {
        EventCursorBuilder::default()
    }

    /// The set of event kinds to queue; everything else is dropped at the
    /// source.
    pub fn handled(
        &mut self,
        handled: BitFlags<EventKind>,
    ) -> &mut EventCursorBuilder {
        self.handled = handled;
        self
    }

    /// The capacity of the recognizer's fill buffer, in bytes.
    pub fn buffer_size(&mut self, size: usize) -> &mut EventCursorBuilder {
        self.buffer_size = Some(size);
        self
    }

    /// Build a cursor pulling events out of `rdr`.
    pub fn from_reader<R: io::Read>(&self, rdr: R) -> EventCursor<R> {
        let parser = match self.buffer_size {
            Some(size) => Parser::with_buffer_size(size, rdr),
            None => Parser::new(rdr),
        };
        EventCursor {
            parser,
            queue: EventQueue::new(self.handled),
            state: CursorState::BeforeParse,
            data: [0; 2],
            data_len: 0,
        }
    }
}

/// A pull-style cursor over the raw recognizer event stream.
///
/// Events are produced in exactly the order the recognizer emits them. The
/// head event is inspected with [`state`](EventCursor::state) and its
/// payload offsets with [`offset`](EventCursor::offset); payloads index
/// into [`buffer`](EventCursor::buffer) and stay valid until the matching
/// [`CursorState::EndBuffer`] event has been consumed.
#[derive(Debug)]
pub struct EventCursor<R> {
    parser: Parser<R>,
    queue: EventQueue,
    state: CursorState,
    data: [usize; 2],
    data_len: u8,
}

impl<R: io::Read> EventCursor<R> {
    /// Creates a cursor handling every event kind, with the default buffer
    /// size.
    pub fn new(rdr: R) -> EventCursor<R> {
        EventCursorBuilder::new().from_reader(rdr)
    }

    /// The kind of the head event.
    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether the stream still has events to offer.
    pub fn is_eof(&self) -> bool {
        self.state == CursorState::Eof
    }

    /// Discards the head event and pulls the next one, resuming the inner
    /// parser whenever the queue runs dry.
    ///
    /// At [`CursorState::Eof`] this saturates and keeps returning `Eof`.
    pub fn advance(&mut self) -> Result<CursorState> {
        if self.state == CursorState::Eof {
            return Ok(CursorState::Eof);
        }
        loop {
            if let Some((state, n)) = self.queue.events.pop_front() {
                self.state = state;
                self.data_len = n;
                for i in 0..n as usize {
                    self.data[i] = self
                        .queue
                        .payloads
                        .pop_front()
                        .expect("event and payload queues in sync");
                }
                return Ok(state);
            }
            if self.parser.is_done() {
                self.state = CursorState::Eof;
                self.data_len = 0;
                return Ok(CursorState::Eof);
            }
            // The parser yields as soon as at least one event is queued, or
            // finishes; either way the next loop turn makes progress.
            self.parser.run(&mut self.queue).map_err(Error::from)?;
        }
    }

    /// The number of payload offsets carried by the head event.
    ///
    /// Zero while data is being discarded, whatever the event kind.
    pub fn data_len(&self) -> usize {
        self.data_len as usize
    }

    /// The `i`-th payload offset of the head event.
    ///
    /// # Panics
    ///
    /// If `i >= self.data_len()`.
    pub fn offset(&self, i: usize) -> usize {
        assert!(
            i < self.data_len(),
            "payload index {} out of range for {:?}",
            i,
            self.state,
        );
        self.data[i]
    }

    /// The loaded region of the current buffer fill, which payload offsets
    /// index into.
    pub fn buffer(&self) -> &[u8] {
        self.parser.buffer()
    }

    /// The fragment bytes of a head `Update` or `Finalize` event.
    pub fn field_bytes(&self) -> Option<&[u8]> {
        match self.state {
            CursorState::Update | CursorState::Finalize
                if self.data_len == 2 =>
            {
                Some(&self.parser.buffer()[self.data[0]..self.data[1]])
            }
            _ => None,
        }
    }

    /// When enabled, events are still queued but their payloads are
    /// dropped. Higher layers use this to skip fields and records cheaply.
    pub fn set_discarding_data(&mut self, yes: bool) {
        self.queue.collecting = !yes;
    }

    /// Whether payloads are currently being dropped.
    pub fn is_discarding_data(&self) -> bool {
        !self.queue.collecting
    }

    /// The physical position of the inner parser.
    pub fn position(&self) -> Position {
        self.parser.position()
    }
}

#[cfg(test)]
mod tests {
    use enumflags2::BitFlags;

    use super::{CursorState, EventCursor, EventCursorBuilder, EventKind};

    fn drain(cursor: &mut EventCursor<&[u8]>) -> Vec<String> {
        let mut log = Vec::new();
        loop {
            match cursor.advance().unwrap() {
                CursorState::Eof => return log,
                CursorState::Update => {
                    let b = cursor.field_bytes().unwrap();
                    log.push(format!("u:{}", String::from_utf8_lossy(b)));
                }
                CursorState::Finalize => {
                    let b = cursor.field_bytes().unwrap();
                    log.push(format!("f:{}", String::from_utf8_lossy(b)));
                }
                CursorState::StartRecord => log.push("sr".to_string()),
                CursorState::EndRecord => log.push("er".to_string()),
                CursorState::EmptyPhysicalLine => log.push("el".to_string()),
                CursorState::StartBuffer | CursorState::EndBuffer => {}
                CursorState::BeforeParse => unreachable!(),
            }
        }
    }

    #[test]
    fn starts_before_parse() {
        let cursor = EventCursor::new(&b"a"[..]);
        assert_eq!(cursor.state(), CursorState::BeforeParse);
    }

    #[test]
    fn events_in_recognizer_order() {
        let mut cursor = EventCursor::new(&b"a,b\n\nc\n"[..]);
        let log = drain(&mut cursor);
        assert_eq!(
            log,
            vec!["sr", "f:a", "f:b", "er", "el", "sr", "f:c", "er"],
        );
        assert!(cursor.is_eof());
        // Saturates at EOF.
        assert_eq!(cursor.advance().unwrap(), CursorState::Eof);
    }

    #[test]
    fn masked_events_are_never_queued() {
        let mut cursor = EventCursorBuilder::new()
            .handled(EventKind::Finalize | EventKind::EndRecord)
            .from_reader(&b"a,b\nc\n"[..]);
        let log = drain(&mut cursor);
        assert_eq!(log, vec!["f:a", "f:b", "er", "f:c", "er"]);
    }

    #[test]
    fn update_precedes_finalize_for_split_fields() {
        let mut cursor = EventCursorBuilder::new()
            .handled(EventKind::Update | EventKind::Finalize)
            .buffer_size(4)
            .from_reader(&b"abcdefghij,kl\n"[..]);
        let log = drain(&mut cursor);
        let stitched: String = log
            .iter()
            .take_while(|s| s.starts_with("u:"))
            .map(|s| &s[2..])
            .collect();
        assert!(!stitched.is_empty());
        assert!("abcdefghij".starts_with(&stitched));
        assert!(log.iter().any(|s| s.starts_with("f:")));
    }

    #[test]
    fn discarding_drops_payloads_but_keeps_events() {
        let mut cursor = EventCursor::new(&b"a,b\n"[..]);
        cursor.set_discarding_data(true);
        let mut kinds = Vec::new();
        loop {
            let state = cursor.advance().unwrap();
            if state == CursorState::Eof {
                break;
            }
            assert_eq!(cursor.data_len(), 0);
            kinds.push(state);
        }
        assert!(kinds.contains(&CursorState::Finalize));
        assert!(kinds.contains(&CursorState::EndRecord));
    }

    #[test]
    fn payloads_valid_until_end_buffer() {
        let mut cursor = EventCursorBuilder::new()
            .handled(BitFlags::all())
            .buffer_size(6)
            .from_reader(&b"ab,cd\nef\n"[..]);
        let mut fields = Vec::new();
        loop {
            match cursor.advance().unwrap() {
                CursorState::Eof => break,
                CursorState::Finalize => {
                    fields.push(
                        String::from_utf8_lossy(cursor.field_bytes().unwrap())
                            .into_owned(),
                    );
                }
                _ => {}
            }
        }
        assert_eq!(fields, vec!["ab", "cd", "ef"]);
    }
}
