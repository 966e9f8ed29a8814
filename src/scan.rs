use std::fmt;
use std::io::Read;
use std::mem;
use std::num::IntErrorKind;
use std::str;

use bstr::BString;
use sepval_core::{Flow, Handler, Parser};

use crate::error::{Error, ErrorKind, Result};

/// Why a field's text did not convert to the target type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConvertError {
    /// Nothing but whitespace where digits were needed.
    Empty,
    /// Non-numeric text, or trailing garbage other than whitespace.
    InvalidFormat,
    /// Parsed, but does not fit: `+1` above the upper limit, `-1` below
    /// the lower limit, `0` for a floating point underflow.
    OutOfRange(i32),
}

/// Conversion from a field's raw bytes, used by [`Translator`].
///
/// Numeric implementations trim ASCII whitespace at both ends and then
/// parse the remainder strictly: any other trailing text is an
/// invalid-format error, and integers are range-checked against the
/// target's limits.
pub trait FromField: Sized {
    /// The type name used in error messages.
    const NAME: &'static str;

    /// Convert one field.
    fn from_field(field: &[u8]) -> std::result::Result<Self, ConvertError>;
}

fn trimmed(field: &[u8]) -> std::result::Result<&str, ConvertError> {
    let s = str::from_utf8(field).map_err(|_| ConvertError::InvalidFormat)?;
    let s = s.trim_matches(|c: char| c.is_ascii_whitespace());
    if s.is_empty() {
        Err(ConvertError::Empty)
    } else {
        Ok(s)
    }
}

fn parse_signed(field: &[u8]) -> std::result::Result<i64, ConvertError> {
    let s = trimmed(field)?;
    s.parse::<i64>().map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow => ConvertError::OutOfRange(1),
        IntErrorKind::NegOverflow => ConvertError::OutOfRange(-1),
        _ => ConvertError::InvalidFormat,
    })
}

fn parse_unsigned(field: &[u8]) -> std::result::Result<u64, ConvertError> {
    let s = trimmed(field)?;
    s.parse::<u64>().map_err(|err| match err.kind() {
        IntErrorKind::PosOverflow => ConvertError::OutOfRange(1),
        _ => ConvertError::InvalidFormat,
    })
}

fn spells_infinity(s: &str) -> bool {
    let s = s.strip_prefix('-').or_else(|| s.strip_prefix('+')).unwrap_or(s);
    s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("infinity")
}

/// Whether the mantissa is all zeros, so parsing to `0.0` is exact rather
/// than an underflow.
fn is_zero_text(s: &str) -> bool {
    !s.bytes()
        .take_while(|&b| b != b'e' && b != b'E')
        .any(|b| (b'1'..=b'9').contains(&b))
}

fn parse_float(field: &[u8]) -> std::result::Result<f64, ConvertError> {
    let s = trimmed(field)?;
    let v = s.parse::<f64>().map_err(|_| ConvertError::InvalidFormat)?;
    if v.is_infinite() && !spells_infinity(s) {
        Err(ConvertError::OutOfRange(if v > 0.0 { 1 } else { -1 }))
    } else if v == 0.0 && !is_zero_text(s) {
        Err(ConvertError::OutOfRange(0))
    } else {
        Ok(v)
    }
}

macro_rules! signed_from_field {
    ($($ty:ty),*) => {$(
        impl FromField for $ty {
            const NAME: &'static str = stringify!($ty);

            fn from_field(
                field: &[u8],
            ) -> std::result::Result<$ty, ConvertError> {
                // Parse through the wide type, then fit-check the target.
                let raw = parse_signed(field)?;
                if raw < <$ty>::MIN as i64 {
                    Err(ConvertError::OutOfRange(-1))
                } else if raw > <$ty>::MAX as i64 {
                    Err(ConvertError::OutOfRange(1))
                } else {
                    Ok(raw as $ty)
                }
            }
        }
    )*};
}

macro_rules! unsigned_from_field {
    ($($ty:ty),*) => {$(
        impl FromField for $ty {
            const NAME: &'static str = stringify!($ty);

            fn from_field(
                field: &[u8],
            ) -> std::result::Result<$ty, ConvertError> {
                let raw = parse_unsigned(field)?;
                if raw > <$ty>::MAX as u64 {
                    Err(ConvertError::OutOfRange(1))
                } else {
                    Ok(raw as $ty)
                }
            }
        }
    )*};
}

signed_from_field!(i8, i16, i32, isize);
unsigned_from_field!(u8, u16, u32, usize);

impl FromField for i64 {
    const NAME: &'static str = "i64";

    fn from_field(field: &[u8]) -> std::result::Result<i64, ConvertError> {
        parse_signed(field)
    }
}

impl FromField for u64 {
    const NAME: &'static str = "u64";

    fn from_field(field: &[u8]) -> std::result::Result<u64, ConvertError> {
        parse_unsigned(field)
    }
}

impl FromField for f64 {
    const NAME: &'static str = "f64";

    fn from_field(field: &[u8]) -> std::result::Result<f64, ConvertError> {
        parse_float(field)
    }
}

impl FromField for f32 {
    const NAME: &'static str = "f32";

    fn from_field(field: &[u8]) -> std::result::Result<f32, ConvertError> {
        let wide = parse_float(field)?;
        let narrow = wide as f32;
        if narrow.is_infinite() && wide.is_finite() {
            Err(ConvertError::OutOfRange(if wide > 0.0 { 1 } else { -1 }))
        } else if narrow == 0.0 && wide != 0.0 {
            Err(ConvertError::OutOfRange(0))
        } else {
            Ok(narrow)
        }
    }
}

impl FromField for String {
    const NAME: &'static str = "string";

    fn from_field(field: &[u8]) -> std::result::Result<String, ConvertError> {
        str::from_utf8(field)
            .map(str::to_owned)
            .map_err(|_| ConvertError::InvalidFormat)
    }
}

impl FromField for Vec<u8> {
    const NAME: &'static str = "bytes";

    fn from_field(field: &[u8]) -> std::result::Result<Vec<u8>, ConvertError> {
        Ok(field.to_vec())
    }
}

/// What to do when a bound column does not appear in a short record.
#[derive(Clone, Debug)]
pub enum OnSkipped<T> {
    /// Raise [`ErrorKind::FieldNotFound`].
    Fail,
    /// Deliver this value instead.
    Replace(T),
    /// Deliver nothing.
    Ignore,
}

/// What to do on one branch of a failed conversion.
#[derive(Clone, Debug)]
pub enum OnFailure<T> {
    /// Raise the corresponding error.
    Fail,
    /// Deliver this value instead.
    Replace(T),
    /// Deliver nothing.
    Ignore,
}

/// Per-branch policy for failed conversions. Every branch fails by
/// default.
#[derive(Clone, Debug)]
pub struct ConversionPolicy<T> {
    /// The field was empty (or all whitespace).
    pub on_empty: OnFailure<T>,
    /// The field does not parse at all.
    pub on_invalid: OnFailure<T>,
    /// Parsed above the target's upper limit.
    pub on_above_limit: OnFailure<T>,
    /// Parsed below the target's lower limit.
    pub on_below_limit: OnFailure<T>,
    /// A floating point underflow.
    pub on_underflow: OnFailure<T>,
}

impl<T> Default for ConversionPolicy<T> {
    fn default() -> ConversionPolicy<T> {
        ConversionPolicy {
            on_empty: OnFailure::Fail,
            on_invalid: OnFailure::Fail,
            on_above_limit: OnFailure::Fail,
            on_below_limit: OnFailure::Fail,
            on_underflow: OnFailure::Fail,
        }
    }
}

impl<T: Clone> ConversionPolicy<T> {
    /// Replaces every failure branch with the same value.
    pub fn replace_all(value: T) -> ConversionPolicy<T> {
        ConversionPolicy {
            on_empty: OnFailure::Replace(value.clone()),
            on_invalid: OnFailure::Replace(value.clone()),
            on_above_limit: OnFailure::Replace(value.clone()),
            on_below_limit: OnFailure::Replace(value.clone()),
            on_underflow: OnFailure::Replace(value),
        }
    }
}

/// A per-column consumer of field text, bound into a [`TableScanner`].
pub trait FieldTranslator {
    /// Deliver one field's complete, unescaped bytes.
    fn field_value(&mut self, field: &[u8]) -> Result<()>;

    /// The bound column did not appear in the record.
    fn field_skipped(&mut self) -> Result<()>;
}

/// The canonical [`FieldTranslator`]: converts field text with
/// [`FromField`] and hands values to a sink, honoring skip and
/// conversion-failure policies.
pub struct Translator<T, S> {
    sink: S,
    on_skipped: OnSkipped<T>,
    policy: ConversionPolicy<T>,
}

impl<T, S> Translator<T, S>
where
    T: FromField + Clone,
    S: FnMut(T),
{
    /// A translator that fails on skipped columns and failed conversions.
    pub fn new(sink: S) -> Translator<T, S> {
        Translator {
            sink,
            on_skipped: OnSkipped::Fail,
            policy: ConversionPolicy::default(),
        }
    }

    /// Sets the skipped-column policy.
    pub fn on_skipped(mut self, policy: OnSkipped<T>) -> Translator<T, S> {
        self.on_skipped = policy;
        self
    }

    /// Sets the conversion-failure policy.
    pub fn on_failure(
        mut self,
        policy: ConversionPolicy<T>,
    ) -> Translator<T, S> {
        self.policy = policy;
        self
    }
}

fn conversion_error(
    err: ConvertError,
    field: &[u8],
    target: &'static str,
) -> Error {
    Error::new(match err {
        ConvertError::Empty => ErrorKind::FieldEmpty { target, pos: None },
        ConvertError::InvalidFormat => ErrorKind::FieldInvalidFormat {
            value: BString::from(field),
            target,
            pos: None,
        },
        ConvertError::OutOfRange(sign) => ErrorKind::FieldOutOfRange {
            value: BString::from(field),
            target,
            sign,
            pos: None,
        },
    })
}

impl<T, S> FieldTranslator for Translator<T, S>
where
    T: FromField + Clone,
    S: FnMut(T),
{
    fn field_value(&mut self, field: &[u8]) -> Result<()> {
        match T::from_field(field) {
            Ok(value) => {
                (self.sink)(value);
                Ok(())
            }
            Err(err) => {
                let branch = match err {
                    ConvertError::Empty => &self.policy.on_empty,
                    ConvertError::InvalidFormat => &self.policy.on_invalid,
                    ConvertError::OutOfRange(sign) if sign > 0 => {
                        &self.policy.on_above_limit
                    }
                    ConvertError::OutOfRange(sign) if sign < 0 => {
                        &self.policy.on_below_limit
                    }
                    ConvertError::OutOfRange(_) => &self.policy.on_underflow,
                };
                match *branch {
                    OnFailure::Fail => {
                        Err(conversion_error(err, field, T::NAME))
                    }
                    OnFailure::Replace(ref value) => {
                        let value = value.clone();
                        (self.sink)(value);
                        Ok(())
                    }
                    OnFailure::Ignore => Ok(()),
                }
            }
        }
    }

    fn field_skipped(&mut self) -> Result<()> {
        match self.on_skipped {
            OnSkipped::Fail => {
                Err(Error::new(ErrorKind::FieldNotFound { pos: None }))
            }
            OnSkipped::Replace(ref value) => {
                let value = value.clone();
                (self.sink)(value);
                Ok(())
            }
            OnSkipped::Ignore => Ok(()),
        }
    }
}

/// The column-to-translator table of a [`TableScanner`].
///
/// Kept sorted by column index; lookups are binary searches. Header
/// scanners receive it mutably so they can bind columns while the header
/// is read.
#[derive(Default)]
pub struct Bindings {
    translators: Vec<(u64, Box<dyn FieldTranslator>)>,
}

impl Bindings {
    /// Binds (or rebinds) a zero-based column.
    pub fn set<T>(&mut self, column: u64, translator: T)
    where
        T: FieldTranslator + 'static,
    {
        match self.search(column) {
            Ok(i) => self.translators[i].1 = Box::new(translator),
            Err(i) => {
                self.translators.insert(i, (column, Box::new(translator)))
            }
        }
    }

    /// Unbinds a column; returns whether it was bound.
    pub fn unset(&mut self, column: u64) -> bool {
        match self.search(column) {
            Ok(i) => {
                self.translators.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Whether a column is bound.
    pub fn is_bound(&self, column: u64) -> bool {
        self.search(column).is_ok()
    }

    fn search(&self, column: u64) -> std::result::Result<usize, usize> {
        self.translators.binary_search_by_key(&column, |&(c, _)| c)
    }

    fn get_mut(&mut self, column: u64) -> Option<&mut dyn FieldTranslator> {
        match self.search(column) {
            Ok(i) => Some(&mut *self.translators[i].1),
            Err(_) => None,
        }
    }

    /// Invokes the skipping handler of every bound column at or past
    /// `from`.
    fn skip_from(&mut self, from: u64) -> Result<()> {
        for &mut (column, ref mut translator) in &mut self.translators {
            if column >= from {
                translator.field_skipped()?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let columns: Vec<u64> =
            self.translators.iter().map(|&(c, _)| c).collect();
        f.debug_struct("Bindings").field("columns", &columns).finish()
    }
}

/// A header scanner: called once per header field with `Some(bytes)`, then
/// once with `None` after the record's last field. Returning `Ok(false)`
/// removes the scanner, ending header processing.
type HeaderScanner =
    Box<dyn FnMut(u64, Option<&[u8]>, &mut Bindings) -> Result<bool>>;

/// A record-end scanner: called after every non-header record's last
/// field; [`Flow::Abort`] stops the stream.
type RecordEndScanner = Box<dyn FnMut() -> Result<Flow>>;

/// A [`Handler`] binding per-column typed translators.
///
/// Headers are either skipped by count or walked by a header scanner;
/// every later record dispatches each bound column's text to its
/// translator, stitching values that straddle buffer fills through a
/// reusable owned buffer. Unbound columns cost nothing.
pub struct TableScanner {
    bindings: Bindings,
    remaining_header_records: u64,
    header_scanner: Option<HeaderScanner>,
    record_end_scanner: Option<RecordEndScanner>,
    /// Fields seen so far in the current record.
    field_index: u64,
    /// A first fragment of the current field, still in the fill buffer.
    pending: Option<(usize, usize)>,
    /// Owned storage for values that straddle fills; reused across fields.
    fragmented: Vec<u8>,
}

impl TableScanner {
    /// A scanner with no header records.
    pub fn new() -> TableScanner {
        TableScanner::with_header_records(0)
    }

    /// A scanner that skips the first `n` records.
    pub fn with_header_records(n: u64) -> TableScanner {
        TableScanner {
            bindings: Bindings::default(),
            remaining_header_records: n,
            header_scanner: None,
            record_end_scanner: None,
            field_index: 0,
            pending: None,
            fragmented: Vec::new(),
        }
    }

    /// A scanner that feeds header fields to `scanner` until it returns
    /// `Ok(false)`.
    pub fn with_header_scanner<F>(scanner: F) -> TableScanner
    where
        F: FnMut(u64, Option<&[u8]>, &mut Bindings) -> Result<bool> + 'static,
    {
        let mut this = TableScanner::new();
        this.header_scanner = Some(Box::new(scanner));
        this
    }

    /// The column bindings.
    pub fn bindings(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    /// Binds (or rebinds) a zero-based column.
    pub fn set_translator<T>(&mut self, column: u64, translator: T)
    where
        T: FieldTranslator + 'static,
    {
        self.bindings.set(column, translator);
    }

    /// Installs a hook invoked after every non-header record.
    pub fn set_record_end_scanner<F>(&mut self, scanner: F)
    where
        F: FnMut() -> Result<Flow> + 'static,
    {
        self.record_end_scanner = Some(Box::new(scanner));
    }

    /// Consumes `rdr`, dispatching every bound field.
    pub fn scan<R: Read>(&mut self, rdr: R) -> Result<()> {
        let mut parser = Parser::new(rdr);
        parser.run(self).map_err(Error::from)?;
        Ok(())
    }

    /// Like [`scan`](TableScanner::scan), with an explicit buffer size.
    pub fn scan_with_buffer_size<R: Read>(
        &mut self,
        size: usize,
        rdr: R,
    ) -> Result<()> {
        let mut parser = Parser::with_buffer_size(size, rdr);
        parser.run(self).map_err(Error::from)?;
        Ok(())
    }

    /// Whether the current field has a consumer at all.
    fn wants_current_field(&self) -> bool {
        if self.header_scanner.is_some() {
            true
        } else if self.remaining_header_records > 0 {
            false
        } else {
            self.bindings.is_bound(self.field_index)
        }
    }

    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        let kept = match self.header_scanner {
            Some(ref mut scanner) => {
                Some(scanner(self.field_index, Some(bytes), &mut self.bindings)?)
            }
            None => None,
        };
        match kept {
            Some(true) => Ok(()),
            Some(false) => {
                self.header_scanner = None;
                Ok(())
            }
            None => match self.bindings.get_mut(self.field_index) {
                Some(translator) => translator.field_value(bytes),
                None => Ok(()),
            },
        }
    }
}

impl Default for TableScanner {
    fn default() -> TableScanner {
        TableScanner::new()
    }
}

impl fmt::Debug for TableScanner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TableScanner")
            .field("bindings", &self.bindings)
            .field("remaining_header_records", &self.remaining_header_records)
            .field("has_header_scanner", &self.header_scanner.is_some())
            .field("field_index", &self.field_index)
            .finish()
    }
}

impl Handler for TableScanner {
    type Error = Error;

    fn start_record(
        &mut self,
        _buf: &[u8],
        _pos: usize,
    ) -> std::result::Result<Flow, Error> {
        Ok(Flow::Continue)
    }

    fn update(
        &mut self,
        buf: &[u8],
        first: usize,
        last: usize,
    ) -> std::result::Result<Flow, Error> {
        if self.wants_current_field() && first < last {
            match self.pending.take() {
                Some((b, e)) => {
                    self.fragmented.extend_from_slice(&buf[b..e]);
                    self.fragmented.extend_from_slice(&buf[first..last]);
                }
                None if !self.fragmented.is_empty() => {
                    self.fragmented.extend_from_slice(&buf[first..last]);
                }
                None => self.pending = Some((first, last)),
            }
        }
        Ok(Flow::Continue)
    }

    fn finalize(
        &mut self,
        buf: &[u8],
        first: usize,
        last: usize,
    ) -> std::result::Result<Flow, Error> {
        if self.wants_current_field() {
            enum Src {
                Buf(usize, usize),
                Owned,
            }
            let src = match self.pending.take() {
                Some((b, e)) => {
                    if first == last {
                        Src::Buf(b, e)
                    } else {
                        self.fragmented.extend_from_slice(&buf[b..e]);
                        self.fragmented.extend_from_slice(&buf[first..last]);
                        Src::Owned
                    }
                }
                None => {
                    if self.fragmented.is_empty() {
                        Src::Buf(first, last)
                    } else {
                        self.fragmented.extend_from_slice(&buf[first..last]);
                        Src::Owned
                    }
                }
            };
            match src {
                Src::Buf(b, e) => self.deliver(&buf[b..e])?,
                Src::Owned => {
                    let owned = mem::replace(&mut self.fragmented, Vec::new());
                    let result = self.deliver(&owned);
                    self.fragmented = owned;
                    self.fragmented.clear();
                    result?;
                }
            }
        }
        self.field_index += 1;
        Ok(Flow::Continue)
    }

    fn end_record(
        &mut self,
        _buf: &[u8],
        _pos: usize,
    ) -> std::result::Result<Flow, Error> {
        let flow = if self.header_scanner.is_some() {
            let kept = match self.header_scanner {
                Some(ref mut scanner) => {
                    scanner(self.field_index, None, &mut self.bindings)?
                }
                None => unreachable!(),
            };
            if !kept {
                self.header_scanner = None;
            }
            Flow::Continue
        } else if self.remaining_header_records > 0 {
            self.remaining_header_records -= 1;
            Flow::Continue
        } else {
            self.bindings.skip_from(self.field_index)?;
            match self.record_end_scanner {
                Some(ref mut scanner) => scanner()?,
                None => Flow::Continue,
            }
        };
        self.field_index = 0;
        Ok(flow)
    }

    fn end_buffer(&mut self, buf: &[u8]) -> std::result::Result<(), Error> {
        // Offsets die with the fill; move any held fragment to owned
        // storage.
        if let Some((b, e)) = self.pending.take() {
            self.fragmented.extend_from_slice(&buf[b..e]);
        }
        Ok(())
    }
}
