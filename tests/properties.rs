use proptest::prelude::*;

use sepval::{
    CursorState, EventCursorBuilder, EventKind, FieldCursorBuilder,
    FieldState,
};

type Record = Vec<Vec<u8>>;

fn needs_quoting(field: &[u8]) -> bool {
    field.iter().any(|&b| matches!(b, b',' | b'"' | b'\r' | b'\n'))
}

/// Encodes records in the canonical RFC 4180 form: quote only where
/// needed, `\n` terminators. A single empty field is quoted so the record
/// does not collapse into an empty physical line.
fn encode(records: &[Record]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        for (i, field) in record.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            let lone_empty = record.len() == 1 && field.is_empty();
            if needs_quoting(field) || lone_empty {
                out.push(b'"');
                for &b in field.iter() {
                    if b == b'"' {
                        out.push(b'"');
                    }
                    out.push(b);
                }
                out.push(b'"');
            } else {
                out.extend_from_slice(field);
            }
        }
        out.push(b'\n');
    }
    out
}

fn decode(bytes: &[u8], buffer_size: usize) -> Vec<Record> {
    let mut cursor = FieldCursorBuilder::new()
        .buffer_size(buffer_size)
        .from_reader(bytes);
    let mut records = Vec::new();
    let mut record = Record::new();
    loop {
        match cursor.advance().unwrap() {
            FieldState::Field => record.push(cursor.value().to_vec()),
            FieldState::RecordEnd => records.push(std::mem::take(&mut record)),
            FieldState::Eof => {
                assert!(record.is_empty(), "unterminated record");
                return records;
            }
            FieldState::BeforeParse => unreachable!(),
        }
    }
}

/// Replays raw cursor events by the field-cursor rules: concatenated
/// `Update` payloads plus the `Finalize` payload form each field value.
/// `None` marks a record boundary.
fn fold_events(bytes: &[u8], buffer_size: usize) -> Vec<Option<Vec<u8>>> {
    let mut cursor = EventCursorBuilder::new()
        .handled(
            EventKind::EndBuffer
                | EventKind::EndRecord
                | EventKind::EmptyPhysicalLine
                | EventKind::Update
                | EventKind::Finalize,
        )
        .buffer_size(buffer_size)
        .from_reader(bytes);
    let mut tokens = Vec::new();
    let mut value = Vec::new();
    loop {
        match cursor.advance().unwrap() {
            CursorState::Update => {
                value.extend_from_slice(cursor.field_bytes().unwrap());
            }
            CursorState::Finalize => {
                value.extend_from_slice(cursor.field_bytes().unwrap());
                tokens.push(Some(std::mem::take(&mut value)));
            }
            CursorState::EndRecord => tokens.push(None),
            CursorState::EmptyPhysicalLine | CursorState::EndBuffer => {}
            CursorState::Eof => return tokens,
            _ => {}
        }
    }
}

fn field_cursor_tokens(
    bytes: &[u8],
    buffer_size: usize,
) -> Vec<Option<Vec<u8>>> {
    let mut cursor = FieldCursorBuilder::new()
        .buffer_size(buffer_size)
        .from_reader(bytes);
    let mut tokens = Vec::new();
    loop {
        match cursor.advance().unwrap() {
            FieldState::Field => tokens.push(Some(cursor.value().to_vec())),
            FieldState::RecordEnd => tokens.push(None),
            FieldState::Eof => return tokens,
            FieldState::BeforeParse => unreachable!(),
        }
    }
}

fn record_strategy() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(
        prop::collection::vec(prop::collection::vec(any::<u8>(), 0..10), 1..5),
        0..8,
    )
}

proptest! {
    // Invariant: decode ∘ encode is the identity on logical records, and
    // another encode/decode round changes nothing.
    #[test]
    fn round_trip(
        records in record_strategy(),
        buffer_size in 1usize..32,
    ) {
        let encoded = encode(&records);
        let decoded = decode(&encoded, buffer_size);
        prop_assert_eq!(&decoded, &records);

        let re_encoded = encode(&decoded);
        prop_assert_eq!(decode(&re_encoded, buffer_size), decoded);
    }

    // Invariant: buffering the raw event stream and applying the
    // field-cursor rules yields exactly the field cursor's output.
    #[test]
    fn cursor_equivalence(
        records in record_strategy(),
        buffer_size in 1usize..32,
    ) {
        let encoded = encode(&records);
        prop_assert_eq!(
            fold_events(&encoded, buffer_size),
            field_cursor_tokens(&encoded, buffer_size),
        );
    }

    // Invariant: the logical fields do not depend on the buffer size.
    #[test]
    fn buffer_size_independence(
        records in record_strategy(),
        size_a in 1usize..16,
        size_b in 16usize..256,
    ) {
        let encoded = encode(&records);
        prop_assert_eq!(
            decode(&encoded, size_a),
            decode(&encoded, size_b),
        );
    }
}

#[test]
fn equivalence_on_a_tricky_input() {
    let data = b"a,\"b\"\"b\",c\r\n\r\nlonger-than-any-buffer,\"x\ry\"\n";
    for size in 1..24 {
        assert_eq!(
            fold_events(data, size),
            field_cursor_tokens(data, size),
            "buffer size {}",
            size,
        );
    }
}
