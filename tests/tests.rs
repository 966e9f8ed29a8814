use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use sepval::{
    extract_records, CursorState, ErrorKind, EventCursor, FieldCursor,
    FieldCursorBuilder, FieldState, Flow, Handler, ParseErrorKind, Parser,
    Position, RecordExtractor, RunResult, TableScanner, Translator,
};

fn s(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap()
}

/// Drains a field cursor into `(value, at_record_end)` tokens.
fn drain_fields(mut cursor: FieldCursor<&[u8]>) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        match cursor.advance().unwrap() {
            FieldState::Field => out.push(s(cursor.value()).to_string()),
            FieldState::RecordEnd => out.push("<rec>".to_string()),
            FieldState::Eof => return out,
            FieldState::BeforeParse => unreachable!(),
        }
    }
}

// S1: the basic event stream, in order.
#[test]
fn scenario_basic_event_stream() {
    let mut cursor = EventCursor::new(&b"a,b,c\nd,e,f\n"[..]);
    let mut log = Vec::new();
    loop {
        match cursor.advance().unwrap() {
            CursorState::Eof => break,
            CursorState::StartRecord => log.push("start".to_string()),
            CursorState::EndRecord => log.push("end".to_string()),
            CursorState::Finalize => {
                log.push(format!("fin:{}", s(cursor.field_bytes().unwrap())))
            }
            CursorState::Update => {
                panic!("no update expected with a large buffer")
            }
            _ => {}
        }
    }
    assert_eq!(
        log,
        vec![
            "start", "fin:a", "fin:b", "fin:c", "end", "start", "fin:d",
            "fin:e", "fin:f", "end",
        ],
    );
}

// S2: a quoted field with an embedded newline is one field of one record.
#[test]
fn scenario_quoted_newline() {
    assert_eq!(
        drain_fields(FieldCursor::new(&b"x,\"y\ny\",z\n"[..])),
        vec!["x", "y\ny", "z", "<rec>"],
    );
}

// S3: CR-LF, CR and LF terminators mix freely.
#[test]
fn scenario_mixed_line_endings() {
    assert_eq!(
        drain_fields(FieldCursor::new(&b"1,2\r\n3,4\r5,6\n"[..])),
        vec!["1", "2", "<rec>", "3", "4", "<rec>", "5", "6", "<rec>"],
    );
}

// S4: a field longer than the buffer arrives in fragments but reads whole.
#[test]
fn scenario_stitching() {
    let cursor = FieldCursorBuilder::new()
        .buffer_size(4)
        .from_reader(&b"abcdefghij,kl\n"[..]);
    assert_eq!(drain_fields(cursor), vec!["abcdefghij", "kl", "<rec>"]);

    // At least one update precedes the finalize of the long field.
    let mut raw = sepval::EventCursorBuilder::new()
        .buffer_size(4)
        .from_reader(&b"abcdefghij,kl\n"[..]);
    let mut updates_before_first_finalize = 0;
    loop {
        match raw.advance().unwrap() {
            CursorState::Update => updates_before_first_finalize += 1,
            CursorState::Finalize | CursorState::Eof => break,
            _ => {}
        }
    }
    assert!(updates_before_first_finalize >= 1);
}

// S5: the record extractor, bit for bit.
#[test]
fn scenario_extractor() {
    let data = "name,age\nalice,30\nbob,41\nalice,22\n";
    let out = extract_records(data.as_bytes(), Vec::new(), "name", |v| {
        v == b"alice"
    })
    .unwrap();
    assert_eq!(s(&out), "name,age\nalice,30\nalice,22\n");
}

// S6: numeric scanning trims whitespace and keeps signs.
#[test]
fn scenario_scanner_numeric() {
    let values = Rc::new(RefCell::new(Vec::new()));
    let out = values.clone();
    let mut scanner = TableScanner::new();
    scanner.set_translator(
        0,
        Translator::new(move |v: i32| out.borrow_mut().push(v)),
    );
    scanner.scan(&b" 40\r\n63\t\n-10\n"[..]).unwrap();
    assert_eq!(*values.borrow(), vec![40, 63, -10]);

    let (_, push) = {
        let store: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let out = store.clone();
        (store, move |v: i32| out.borrow_mut().push(v))
    };
    let mut scanner = TableScanner::new();
    scanner.set_translator(0, Translator::new(push));
    let err = scanner.scan(&b"40x\n"[..]).unwrap_err();
    match err.kind() {
        ErrorKind::FieldInvalidFormat { .. } => {}
        other => panic!("unexpected error: {:?}", other),
    }
}

// S7: EOF inside a quoted value points at the opening quote.
#[test]
fn scenario_unterminated_quote() {
    let mut cursor = FieldCursor::new(&b"a,\"bcd"[..]);
    cursor.advance().unwrap();
    let err = cursor.advance().unwrap_err();
    match err.kind() {
        ErrorKind::Parse(parse) => {
            assert_eq!(parse.kind(), ParseErrorKind::UnclosedQuote);
            assert_eq!(parse.position(), Position::new(Some(0), 2));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let msg = err.to_string();
    assert!(msg.contains("EOF"), "message was: {}", msg);
}

// Boundary: tiny buffers, buffer equal to the input, zero capacity.
#[test]
fn boundary_buffer_sizes() {
    let data = "aa,bb\ncc,\"d\nd\"\n";
    let expected =
        vec!["aa", "bb", "<rec>", "cc", "d\nd", "<rec>"];
    for &size in &[1, 2, data.len(), 1024] {
        let cursor = FieldCursorBuilder::new()
            .buffer_size(size)
            .from_reader(data.as_bytes());
        assert_eq!(drain_fields(cursor), expected, "buffer size {}", size);
    }
}

#[test]
fn boundary_zero_capacity_buffer() {
    let mut parser = Parser::with_buffer_size(0, &b"a"[..]);
    struct Nop;
    impl Handler for Nop {
        type Error = Infallible;
        fn start_record(&mut self, _: &[u8], _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Continue)
        }
        fn update(&mut self, _: &[u8], _: usize, _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Continue)
        }
        fn finalize(&mut self, _: &[u8], _: usize, _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Continue)
        }
        fn end_record(&mut self, _: &[u8], _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Continue)
        }
    }
    match parser.run(&mut Nop) {
        Err(sepval::RunError::Parse(err)) => {
            assert_eq!(err.kind(), ParseErrorKind::BufferTooSmall)
        }
        other => panic!("expected buffer error, got {:?}", other),
    }
}

// Boundary: trailing and leading empty fields, empty record lines.
#[test]
fn boundary_empty_fields_and_lines() {
    assert_eq!(
        drain_fields(FieldCursor::new(&b"a,b,\n"[..])),
        vec!["a", "b", "", "<rec>"],
    );
    assert_eq!(
        drain_fields(FieldCursor::new(&b",a,b\n"[..])),
        vec!["", "a", "b", "<rec>"],
    );
    assert_eq!(
        drain_fields(FieldCursor::new(&b"a\n\nb\n"[..])),
        vec!["a", "<rec>", "b", "<rec>"],
    );
}

// Boundary: a scanned value ending exactly at a fill boundary.
#[test]
fn boundary_scanner_value_at_fill_edge() {
    let values = Rc::new(RefCell::new(Vec::new()));
    for size in 2..10 {
        values.borrow_mut().clear();
        let out = values.clone();
        let mut scanner = TableScanner::new();
        scanner.set_translator(
            1,
            Translator::new(move |v: i64| out.borrow_mut().push(v)),
        );
        scanner
            .scan_with_buffer_size(size, &b"k,1234567\nk,89\n"[..])
            .unwrap();
        assert_eq!(*values.borrow(), vec![1234567, 89], "size {}", size);
    }
}

// The extractor never emits anything for empty physical lines.
#[test]
fn extractor_max_records_and_blank_lines() {
    let data = "name,age\n\nalice,30\n\nalice,22\nalice,5\n";
    let mut ex = RecordExtractor::with_field_name(
        Vec::new(),
        "name",
        |v: &[u8]| v == b"alice",
    )
    .max_records(2);
    let mut parser = Parser::new(data.as_bytes());
    assert_eq!(parser.run(&mut ex).unwrap(), RunResult::Aborted);
    assert_eq!(s(&ex.into_inner()), "name,age\nalice,30\nalice,22\n");
}

// Abort from a plain handler is surfaced as `Aborted`, not an error.
#[test]
fn handler_abort_is_clean() {
    struct StopAtFirstRecord;
    impl Handler for StopAtFirstRecord {
        type Error = Infallible;
        fn start_record(&mut self, _: &[u8], _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Continue)
        }
        fn update(&mut self, _: &[u8], _: usize, _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Continue)
        }
        fn finalize(&mut self, _: &[u8], _: usize, _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Continue)
        }
        fn end_record(&mut self, _: &[u8], _: usize) -> Result<Flow, Infallible> {
            Ok(Flow::Abort)
        }
    }
    let mut parser = Parser::new(&b"a,b\nc,d\n"[..]);
    assert_eq!(
        parser.run(&mut StopAtFirstRecord).unwrap(),
        RunResult::Aborted,
    );
}

// Position is monotone in lines and resets columns per line.
#[test]
fn physical_positions_track_lines() {
    let mut cursor = FieldCursor::new(&b"aa,bb\ncc\n"[..]);
    cursor.advance().unwrap();
    let first = cursor.physical_position();
    assert_eq!(first.line(), Some(0));
    cursor.advance().unwrap(); // bb
    cursor.advance().unwrap(); // record end
    cursor.advance().unwrap(); // cc
    let second = cursor.physical_position();
    assert_eq!(second.line(), Some(1));
}
