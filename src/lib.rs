/*!
Streaming CSV parsing with push, pull and typed scanning layers.

Everything in this crate sits on one low-level recognizer, the
[`Parser`] from `sepval-core`, which pushes events (records, field
fragments, buffer boundaries) into a [`Handler`]. Three progressively
higher-level interfaces are layered on top:

- [`EventCursor`] turns the push stream into a pullable queue of raw
  events, filtered by a handled-event mask.
- [`FieldCursor`] presents a field-at-a-time view, splicing values that
  straddle buffer fills into one contiguous byte string while borrowing
  straight from the parse buffer whenever it can.
- [`RecordExtractor`] and [`TableScanner`] are ready-made handlers: the
  extractor copies selected original records verbatim to a byte sink, and
  the scanner binds per-column typed converters with configurable skip and
  conversion-failure policies.

# Example

Pull fields out of a reader:

```
use sepval::{FieldCursor, FieldState};

# fn main() -> sepval::Result<()> {
let data = "city,pop\nBoston,653833\n";
let mut cursor = FieldCursor::new(data.as_bytes());
let mut fields = Vec::new();
loop {
    match cursor.advance()? {
        FieldState::Field => {
            fields.push(String::from_utf8_lossy(cursor.value()).into_owned())
        }
        FieldState::RecordEnd => {}
        FieldState::Eof => break,
        FieldState::BeforeParse => unreachable!(),
    }
}
assert_eq!(fields, vec!["city", "pop", "Boston", "653833"]);
# Ok(())
# }
```

The dialect is fixed RFC 4180 with the usual relaxations: `,` separators,
`"` quoting with `""` escapes, `\r`, `\n` or `\r\n` terminators (a trailing
terminator is optional), and empty physical lines that are skipped rather
than parsed as empty records.
*/

#![deny(missing_docs)]

pub use sepval_core::{
    Flow, Handler, ParseError, ParseErrorKind, Parser, Position, RunError,
    RunResult, YieldPoint,
};

pub use crate::cursor::{
    CursorState, EventCursor, EventCursorBuilder, EventKind,
};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::extract::{extract_records, RecordExtractor};
pub use crate::fields::{FieldCursor, FieldCursorBuilder, FieldState};
pub use crate::scan::{
    Bindings, ConversionPolicy, ConvertError, FieldTranslator, FromField,
    OnFailure, OnSkipped, TableScanner, Translator,
};

mod cursor;
mod error;
mod extract;
mod fields;
mod scan;
