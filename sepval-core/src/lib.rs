/*!
`sepval-core` provides a low-level push parser for CSV data.

The centerpiece is [`Parser`], a character-level recognizer that reads bytes
from any [`std::io::Read`], fills an internal buffer and drives a
caller-supplied [`Handler`] with a totally ordered stream of events:
record boundaries, field fragments and buffer boundaries. Field payloads are
offsets into the current buffer fill, so a handler can observe field bytes
without any copying as long as a field fits in one fill; fields that straddle
fills are delivered as multiple `update` fragments followed by a `finalize`.

Handlers opt into capabilities by overriding default trait methods: empty
physical line notification, buffer boundary notification and cooperative
suspension. A handler can pause the parser at well-defined checkpoints by
returning `true` from [`Handler::should_yield`]; the parser then returns
[`RunResult::Suspended`] from [`Parser::run`] and resumes exactly where it
left off on the next call. A handler can also abort the parse by returning
[`Flow::Abort`] from any event method, which is a normal return path, not an
error.

The dialect is fixed: comma separated fields, `"` quoting with `""` escapes,
and `\r`, `\n` or `\r\n` record terminators.

Higher level conveniences (pull cursors, record extraction, typed field
scanning) live in the `sepval` crate.
*/

#![deny(missing_docs)]

pub use crate::error::{ParseError, ParseErrorKind, Position, RunError};
pub use crate::handler::{Flow, Handler, YieldPoint};
pub use crate::parser::{Parser, RunResult};

mod buffer;
mod error;
mod handler;
mod parser;
