use crate::error::{ParseError, PdfResult};

pub(crate) const FORM_FEED: u8 = b'\x0C';
pub(crate) const BACKSPACE: u8 = b'\x08';

/// Byte-cursor primitives shared by every scanner in the crate: the
/// dictionary-fragment tokenizer, the xref parsers, the object-stream
/// codec, and the resolver's header scans all build on these.
pub(crate) trait LexBase {
    fn buffer(&self) -> &[u8];
    fn cursor(&self) -> usize;
    fn cursor_mut(&mut self) -> &mut usize;

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            if is_whitespace(b) {
                self.next_byte();
            } else if b == b'%' {
                self.next_byte();
                self.skip_comment();
            } else {
                break;
            }
        }
    }

    /// Assumes the leading `%` has already been consumed
    fn skip_comment(&mut self) {
        while !self.next_is_eol() {
            self.next_byte();
        }
    }

    fn next_is_eol(&self) -> bool {
        match self.peek_byte() {
            Some(b'\r' | b'\n') => true,
            Some(..) => false,
            None => true,
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        self.buffer().get(self.cursor()).copied().map(|b| {
            *self.cursor_mut() += 1;
            b
        })
    }

    fn next_byte_err(&mut self) -> PdfResult<u8> {
        match self.next_byte() {
            Some(b) => Ok(b),
            None => anyhow::bail!(ParseError::UnexpectedEof),
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.buffer().get(self.cursor()).copied()
    }

    /// Does not modify the cursor
    fn next_matches(&mut self, bytes: &[u8]) -> bool {
        let start_pos = self.cursor();

        for &b in bytes {
            if Some(b) != self.next_byte() {
                *self.cursor_mut() = start_pos;
                return false;
            }
        }

        *self.cursor_mut() = start_pos;

        true
    }

    fn expect_byte(&mut self, expected: u8) -> PdfResult<()> {
        match self.next_byte() {
            Some(found) if expected == found => Ok(()),
            found => anyhow::bail!(ParseError::MismatchedByte { expected, found }),
        }
    }

    fn expect_bytes(&mut self, bytes: &[u8]) -> PdfResult<()> {
        for &b in bytes {
            self.expect_byte(b)?;
        }

        Ok(())
    }

    fn lex_whole_number(&mut self) -> String {
        let mut whole_number = String::new();

        while let Some(b) = self.peek_byte() {
            if !b.is_ascii_digit() {
                break;
            }

            self.next_byte();

            whole_number.push(b as char);
        }

        whole_number
    }

    fn expect_unsigned(&mut self) -> PdfResult<usize> {
        let digits = self.lex_whole_number();

        if digits.is_empty() {
            anyhow::bail!(ParseError::MalformedDocument("expected a number"));
        }

        Ok(digits.parse()?)
    }
}

/// Whitespace chars are defined as
///
/// * NUL             0x0
/// * Horizontal tab  0x9
/// * Line feed       0xa
/// * Form feed       0xc
/// * Carriage return 0xd
/// * Space           0x20
pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | 0x9 | b'\n' | FORM_FEED | b'\r' | b' ')
}

pub(crate) fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

pub(crate) fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

/// A plain cursor over a borrowed byte slice
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl LexBase for Cursor<'_> {
    fn buffer(&self) -> &[u8] {
        self.buf
    }

    fn cursor(&self) -> usize {
        self.pos
    }

    fn cursor_mut(&mut self) -> &mut usize {
        &mut self.pos
    }
}
