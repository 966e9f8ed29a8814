use std::io::Read;

use crate::buffer::Buffer;
use crate::error::{ParseError, ParseErrorKind, Position, RunError};
use crate::handler::{Flow, Handler, YieldPoint};

/// Default capacity of the fill buffer, in bytes.
const DEFAULT_BUFFER_SIZE: usize = 8 * (1 << 10);

/// How a call to [`Parser::run`] ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunResult {
    /// The input was consumed through EOF and the final record, if any, has
    /// been closed. Further calls return `Complete` again.
    Complete,
    /// The handler requested a pause at a checkpoint. Call
    /// [`Parser::run`] again with the same handler to continue.
    Suspended,
    /// The handler returned [`Flow::Abort`]. The parse is over; further
    /// calls return `Complete`.
    Aborted,
}

/// The recognizer's state, one per quoting/terminator situation.
///
/// The initial state is `AfterLf`, so the first character of the stream
/// starts a physical line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    AfterComma,
    InValue,
    RightOfOpenQuote,
    InQuotedValue,
    InQuotedValueAfterQuote,
    AfterCr,
    AfterLf,
}

/// Where a suspended `run` picks up again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Resume {
    /// Start a new buffer fill.
    Fill,
    /// Enter the step loop at the current reading position.
    Step,
    /// Advance the reading position, then enter the step loop.
    StepAdvance,
    /// The `end_buffer` event is out; account for the consumed fill.
    AfterBuffer,
    /// The stream is complete (or the handler aborted).
    Done,
}

/// Control flow inside the driver: either an abort requested by the
/// handler, or a real error. Both unwind to the top of `run` via `?`.
enum Interrupt<E> {
    Abort,
    Err(RunError<E>),
}

impl<E> From<RunError<E>> for Interrupt<E> {
    fn from(err: RunError<E>) -> Interrupt<E> {
        Interrupt::Err(err)
    }
}

impl<E> From<ParseError> for Interrupt<E> {
    fn from(err: ParseError) -> Interrupt<E> {
        Interrupt::Err(RunError::Parse(err))
    }
}

type Step<T, E> = Result<T, Interrupt<E>>;

/// A push parser for CSV data.
///
/// A `Parser` owns the reader and the fill buffer; the handler is borrowed
/// per [`run`](Parser::run) call, so consumers can keep the handler next to
/// the parser and still observe it between suspensions.
#[derive(Debug)]
pub struct Parser<R> {
    rdr: R,
    buf: Buffer,
    state: State,
    /// Reading position within the current fill.
    p: usize,
    /// Current field slice, `[first, last)`, within the current fill.
    first: usize,
    last: usize,
    record_started: bool,
    eof_reached: bool,
    line: Option<u64>,
    /// Offset within the current fill where the current physical line (or
    /// the fill itself) begins.
    line_origin: usize,
    /// Characters of the current physical line released with earlier fills.
    chars_released: u64,
    /// Position of the quote that opened the current escaped value.
    open_quote: Position,
    resume: Resume,
}

impl<R: Read> Parser<R> {
    /// Creates a parser with the default buffer capacity.
    pub fn new(rdr: R) -> Parser<R> {
        Parser::with_buffer_size(DEFAULT_BUFFER_SIZE, rdr)
    }

    /// Creates a parser with the given buffer capacity, in bytes.
    ///
    /// Any capacity of at least one works; a field longer than the buffer
    /// is delivered in several fragments. A capacity of zero makes the
    /// first `run` fail with
    /// [`ParseErrorKind::BufferTooSmall`].
    pub fn with_buffer_size(size: usize, rdr: R) -> Parser<R> {
        Parser {
            rdr,
            buf: Buffer::with_capacity(size),
            state: State::AfterLf,
            p: 0,
            first: 0,
            last: 0,
            record_started: false,
            eof_reached: false,
            line: None,
            line_origin: 0,
            chars_released: 0,
            open_quote: Position::new(None, 0),
            resume: Resume::Fill,
        }
    }

    /// The current reading position.
    ///
    /// Defined at all times, including while suspended and after an error.
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column())
    }

    /// The loaded region of the current buffer fill.
    ///
    /// Offsets handed to the handler index into this slice until the next
    /// fill replaces it.
    pub fn buffer(&self) -> &[u8] {
        self.buf.loaded()
    }

    /// Whether the parse has finished (completed or aborted).
    pub fn is_done(&self) -> bool {
        self.resume == Resume::Done
    }

    /// Drives the handler with events until the stream completes, the
    /// handler suspends, or the handler aborts.
    ///
    /// Suspension keeps all parser state; calling `run` again resumes at
    /// the exact checkpoint. Errors also leave the parser state in place,
    /// but a parse cannot be meaningfully resumed after one.
    pub fn run<H: Handler>(
        &mut self,
        handler: &mut H,
    ) -> Result<RunResult, RunError<H::Error>> {
        if self.resume == Resume::Done {
            return Ok(RunResult::Complete);
        }
        match self.drive(handler) {
            Ok(result) => Ok(result),
            Err(Interrupt::Abort) => {
                self.resume = Resume::Done;
                Ok(RunResult::Aborted)
            }
            Err(Interrupt::Err(err)) => Err(err),
        }
    }

    fn drive<H: Handler>(&mut self, h: &mut H) -> Step<RunResult, H::Error> {
        loop {
            if self.resume == Resume::Fill {
                if self.buf.capacity() == 0 {
                    return Err(ParseError::new(
                        ParseErrorKind::BufferTooSmall,
                        self.position(),
                    )
                    .into());
                }
                self.eof_reached = self
                    .buf
                    .fill(&mut self.rdr)
                    .map_err(|e| Interrupt::Err(RunError::Io(e)))?;
                self.p = 0;
                self.line_origin = 0;
                self.first = 0;
                self.last = 0;
                self.hook(h.start_buffer(self.buf.loaded()))?;
                self.resume = Resume::Step;
            }

            if let Resume::Step | Resume::StepAdvance = self.resume {
                if self.resume == Resume::StepAdvance {
                    self.p += 1;
                    self.resume = Resume::Step;
                }
                while self.p < self.buf.len() {
                    self.step_normal(h)?;
                    if h.should_yield(YieldPoint::AfterStep) {
                        self.resume = Resume::StepAdvance;
                        return Ok(RunResult::Suspended);
                    }
                    self.p += 1;
                }
                // Underflow: flush the open field fragment before refilling.
                if let State::InValue | State::InQuotedValue = self.state {
                    self.update_ev(h)?;
                }
                if self.eof_reached {
                    self.set_first_last();
                    self.eof_hook(h)?;
                    if self.record_started {
                        self.end_record_ev(h)?;
                    }
                }
                self.hook(h.end_buffer(self.buf.loaded()))?;
                self.resume = Resume::AfterBuffer;
                if h.should_yield(YieldPoint::AfterBuffer) {
                    return Ok(RunResult::Suspended);
                }
            }

            // Resume::AfterBuffer: the fill is consumed; fold the partial
            // line into the released-characters accumulator.
            self.chars_released += (self.p - self.line_origin) as u64;
            self.line_origin = self.p;
            if self.eof_reached {
                self.resume = Resume::Done;
                return Ok(RunResult::Complete);
            }
            self.resume = Resume::Fill;
        }
    }

    /// One dispatch step: handles the character at the reading position
    /// (and, in the value states, the whole run up to the next delimiter).
    fn step_normal<H: Handler>(&mut self, h: &mut H) -> Step<(), H::Error> {
        let loaded = self.buf.len();
        match self.state {
            State::AfterComma => match self.cur() {
                b',' => {
                    self.set_first_last();
                    self.finalize_ev(h)?;
                }
                b'"' => {
                    self.note_open_quote();
                    self.state = State::RightOfOpenQuote;
                }
                b'\r' => {
                    self.set_first_last();
                    self.finalize_ev(h)?;
                    self.end_record_ev(h)?;
                    self.state = State::AfterCr;
                }
                b'\n' => {
                    self.set_first_last();
                    self.finalize_ev(h)?;
                    self.end_record_ev(h)?;
                    self.state = State::AfterLf;
                }
                _ => {
                    self.set_first_last();
                    self.renew_last();
                    self.state = State::InValue;
                }
            },
            State::InValue => {
                while self.p < loaded {
                    match self.cur() {
                        b',' => {
                            self.finalize_ev(h)?;
                            self.state = State::AfterComma;
                            return Ok(());
                        }
                        b'"' => {
                            return Err(ParseError::new(
                                ParseErrorKind::QuoteInValue,
                                self.position(),
                            )
                            .into());
                        }
                        b'\r' => {
                            self.finalize_ev(h)?;
                            self.end_record_ev(h)?;
                            self.state = State::AfterCr;
                            return Ok(());
                        }
                        b'\n' => {
                            self.finalize_ev(h)?;
                            self.end_record_ev(h)?;
                            self.state = State::AfterLf;
                            return Ok(());
                        }
                        _ => {
                            self.renew_last();
                            self.p += 1;
                        }
                    }
                }
                // The fill ran out mid-value; back up one so the driver's
                // increment leaves us at the underflow point.
                self.p -= 1;
            }
            State::RightOfOpenQuote => {
                self.set_first_last();
                if self.cur() == b'"' {
                    self.state = State::InQuotedValueAfterQuote;
                } else {
                    self.renew_last();
                    self.state = State::InQuotedValue;
                }
            }
            State::InQuotedValue => {
                // Everything up to the next quote is literal, record
                // terminators included.
                match memchr::memchr(b'"', &self.buf.loaded()[self.p..]) {
                    Some(i) => {
                        let quote = self.p + i;
                        self.last = quote;
                        self.p = quote;
                        self.update_ev(h)?;
                        self.set_first_last();
                        self.state = State::InQuotedValueAfterQuote;
                    }
                    None => {
                        self.last = loaded;
                        self.p = loaded - 1;
                    }
                }
            }
            State::InQuotedValueAfterQuote => match self.cur() {
                b',' => {
                    self.finalize_ev(h)?;
                    self.state = State::AfterComma;
                }
                b'"' => {
                    // A doubled quote: one literal quotation mark.
                    self.set_first_last();
                    self.renew_last();
                    self.state = State::InQuotedValue;
                }
                b'\r' => {
                    self.finalize_ev(h)?;
                    self.end_record_ev(h)?;
                    self.state = State::AfterCr;
                }
                b'\n' => {
                    self.finalize_ev(h)?;
                    self.end_record_ev(h)?;
                    self.state = State::AfterLf;
                }
                _ => {
                    return Err(ParseError::new(
                        ParseErrorKind::InvalidAfterQuote,
                        self.position(),
                    )
                    .into());
                }
            },
            State::AfterCr => match self.cur() {
                b',' => {
                    self.new_physical_line();
                    self.set_first_last();
                    self.finalize_ev(h)?;
                    self.state = State::AfterComma;
                }
                b'"' => {
                    self.new_physical_line();
                    self.note_open_quote();
                    self.force_start_record(h)?;
                    self.state = State::RightOfOpenQuote;
                }
                b'\r' => {
                    self.new_physical_line();
                    self.empty_line_ev(h)?;
                }
                b'\n' => {
                    // CR-LF is one terminator; the LF is silent.
                    self.state = State::AfterLf;
                }
                _ => {
                    self.new_physical_line();
                    self.set_first_last();
                    self.renew_last();
                    self.state = State::InValue;
                }
            },
            State::AfterLf => match self.cur() {
                b',' => {
                    self.new_physical_line();
                    self.set_first_last();
                    self.finalize_ev(h)?;
                    self.state = State::AfterComma;
                }
                b'"' => {
                    self.new_physical_line();
                    self.note_open_quote();
                    self.force_start_record(h)?;
                    self.state = State::RightOfOpenQuote;
                }
                b'\r' => {
                    self.new_physical_line();
                    self.empty_line_ev(h)?;
                    self.state = State::AfterCr;
                }
                b'\n' => {
                    self.new_physical_line();
                    self.empty_line_ev(h)?;
                }
                _ => {
                    self.new_physical_line();
                    self.set_first_last();
                    self.renew_last();
                    self.state = State::InValue;
                }
            },
        }
        Ok(())
    }

    /// Per-state EOF actions, run once after the final underflow.
    fn eof_hook<H: Handler>(&mut self, h: &mut H) -> Step<(), H::Error> {
        match self.state {
            State::AfterComma
            | State::InValue
            | State::InQuotedValueAfterQuote => self.finalize_ev(h),
            State::RightOfOpenQuote | State::InQuotedValue => {
                Err(ParseError::new(
                    ParseErrorKind::UnclosedQuote,
                    self.open_quote,
                )
                .into())
            }
            State::AfterCr | State::AfterLf => Ok(()),
        }
    }

    fn cur(&self) -> u8 {
        self.buf.loaded()[self.p]
    }

    fn column(&self) -> u64 {
        (self.p - self.line_origin) as u64 + self.chars_released
    }

    fn new_physical_line(&mut self) {
        self.line = Some(match self.line {
            None => 0,
            Some(n) => n + 1,
        });
        self.line_origin = self.p;
        self.chars_released = 0;
    }

    fn note_open_quote(&mut self) {
        self.open_quote = self.position();
    }

    fn set_first_last(&mut self) {
        self.first = self.p;
        self.last = self.p;
    }

    fn renew_last(&mut self) {
        self.last = self.p + 1;
    }

    fn flow<E>(&self, r: Result<Flow, E>) -> Step<(), E> {
        match r {
            Ok(Flow::Continue) => Ok(()),
            Ok(Flow::Abort) => Err(Interrupt::Abort),
            Err(err) => Err(Interrupt::Err(RunError::Handler {
                err,
                pos: self.position(),
            })),
        }
    }

    fn hook<E>(&self, r: Result<(), E>) -> Step<(), E> {
        r.map_err(|err| {
            Interrupt::Err(RunError::Handler { err, pos: self.position() })
        })
    }

    fn start_record_if_needed<H: Handler>(
        &mut self,
        h: &mut H,
    ) -> Step<(), H::Error> {
        if !self.record_started {
            let r = h.start_record(self.buf.loaded(), self.first);
            self.flow(r)?;
            self.record_started = true;
        }
        Ok(())
    }

    fn force_start_record<H: Handler>(
        &mut self,
        h: &mut H,
    ) -> Step<(), H::Error> {
        let r = h.start_record(self.buf.loaded(), self.p);
        self.flow(r)?;
        self.record_started = true;
        Ok(())
    }

    fn update_ev<H: Handler>(&mut self, h: &mut H) -> Step<(), H::Error> {
        self.start_record_if_needed(h)?;
        if self.first < self.last {
            let r = h.update(self.buf.loaded(), self.first, self.last);
            self.flow(r)?;
        }
        Ok(())
    }

    fn finalize_ev<H: Handler>(&mut self, h: &mut H) -> Step<(), H::Error> {
        self.start_record_if_needed(h)?;
        let r = h.finalize(self.buf.loaded(), self.first, self.last);
        self.flow(r)
    }

    fn end_record_ev<H: Handler>(&mut self, h: &mut H) -> Step<(), H::Error> {
        let r = h.end_record(self.buf.loaded(), self.p);
        self.flow(r)?;
        self.record_started = false;
        Ok(())
    }

    fn empty_line_ev<H: Handler>(&mut self, h: &mut H) -> Step<(), H::Error> {
        debug_assert!(!self.record_started);
        let r = h.empty_physical_line(self.buf.loaded(), self.p);
        self.flow(r)
    }
}
