/// Whether the parser should keep going after a handler event.
///
/// Returning [`Flow::Abort`] from an event method makes
/// [`Parser::run`](crate::Parser::run) unwind cleanly and return
/// [`RunResult::Aborted`](crate::RunResult::Aborted). An abort is a normal
/// return path; it raises no error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Keep parsing.
    Continue,
    /// Stop parsing; no further events will be delivered.
    Abort,
}

/// The checkpoint a cooperative suspension was requested at.
///
/// These are the only two points where the parser consults
/// [`Handler::should_yield`]; together with run completion they are the only
/// places [`Parser::run`](crate::Parser::run) can return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum YieldPoint {
    /// After one dispatch step of the recognizer.
    AfterStep,
    /// After the `end_buffer` event, before the buffer is refilled.
    AfterBuffer,
}

/// The event contract between the recognizer and its consumer.
///
/// The four record/field events are required; everything else has a no-op
/// default, so a handler implements only the capabilities it needs.
///
/// Every event receives `buf`, the loaded region of the current buffer fill.
/// Field payloads (`first`, `last`, `pos`) are offsets into `buf`, half-open
/// where they come in pairs. The slice is only valid for the duration of the
/// call; a handler that wants to keep field bytes beyond that either copies
/// them or records the offsets, which stay meaningful until the matching
/// [`end_buffer`](Handler::end_buffer) event.
///
/// Within one record, the field value accumulated so far may be delivered in
/// several [`update`](Handler::update) fragments (one per buffer fill, plus
/// one per `""` escape inside a quoted value); the trailing fragment arrives
/// with [`finalize`](Handler::finalize). Concatenating them yields the
/// field's logical, unescaped value.
pub trait Handler {
    /// The error type of this handler's event methods.
    type Error;

    /// A record begins; `pos` is the offset of its first character.
    fn start_record(
        &mut self,
        buf: &[u8],
        pos: usize,
    ) -> Result<Flow, Self::Error>;

    /// A non-final fragment of the current field value.
    ///
    /// Only delivered with a non-empty `[first, last)` range.
    fn update(
        &mut self,
        buf: &[u8],
        first: usize,
        last: usize,
    ) -> Result<Flow, Self::Error>;

    /// The final (possibly empty) fragment of the current field value.
    fn finalize(
        &mut self,
        buf: &[u8],
        first: usize,
        last: usize,
    ) -> Result<Flow, Self::Error>;

    /// The current record ends; `pos` is the offset of its terminator (or
    /// one past the last character at EOF).
    fn end_record(
        &mut self,
        buf: &[u8],
        pos: usize,
    ) -> Result<Flow, Self::Error>;

    /// A physical line with no characters at all.
    ///
    /// Empty physical lines are not records; no `start_record`/`end_record`
    /// surrounds this event.
    fn empty_physical_line(
        &mut self,
        _buf: &[u8],
        _pos: usize,
    ) -> Result<Flow, Self::Error> {
        Ok(Flow::Continue)
    }

    /// A buffer fill has been loaded; `buf` is stable from here until the
    /// matching `end_buffer`.
    fn start_buffer(&mut self, _buf: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    /// The current buffer fill has been fully consumed.
    fn end_buffer(&mut self, _buf: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Asks whether the parser should suspend at the given checkpoint.
    ///
    /// The default never suspends, so plain handlers are driven to
    /// completion in a single [`Parser::run`](crate::Parser::run) call.
    fn should_yield(&mut self, _at: YieldPoint) -> bool {
        false
    }
}
