//! Recursive-descent parser for RFC 1960 filter strings.
//!
//! ```text
//! filter     = "(" filtercomp ")"
//! filtercomp = "&" filter+ | "|" filter+ | "!" filter | item
//! item       = attr ("=" | "~=" | ">=" | "<=") value
//!            | attr "=*"
//!            | attr "=" [initial] "*" *(any "*") [final]
//! ```
//!
//! Whitespace is allowed between tokens. `\` escapes the next character in values.

use super::Node;
use crate::error::FilterError;

pub(super) fn parse(text: &str) -> Result<Node, FilterError> {
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
    };
    let node = parser.filter()?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("extraneous trailing characters"));
    }
    Ok(node)
}

enum Piece {
    Text(String),
    Star,
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn filter(&mut self) -> Result<Node, FilterError> {
        self.skip_ws();
        self.expect(b'(')?;
        let node = self.filtercomp()?;
        self.skip_ws();
        self.expect(b')')?;
        Ok(node)
    }

    fn filtercomp(&mut self) -> Result<Node, FilterError> {
        self.skip_ws();
        match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Ok(Node::And(self.filter_list()?))
            }
            Some(b'|') => {
                self.pos += 1;
                Ok(Node::Or(self.filter_list()?))
            }
            Some(b'!') => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.filter()?)))
            }
            Some(_) => self.item(),
            None => Err(self.error("unexpected end of filter")),
        }
    }

    fn filter_list(&mut self) -> Result<Vec<Node>, FilterError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some(b'(') {
                break;
            }
            nodes.push(self.filter()?);
        }
        if nodes.is_empty() {
            return Err(self.error("missing filter list"));
        }
        Ok(nodes)
    }

    fn item(&mut self) -> Result<Node, FilterError> {
        let attr = self.attr()?;
        self.skip_ws();
        match (self.peek(), self.peek_at(1)) {
            (Some(b'~'), Some(b'=')) => {
                self.pos += 2;
                Ok(Node::Approx {
                    attr,
                    value: self.value()?,
                })
            }
            (Some(b'>'), Some(b'=')) => {
                self.pos += 2;
                Ok(Node::Greater {
                    attr,
                    value: self.value()?,
                })
            }
            (Some(b'<'), Some(b'=')) => {
                self.pos += 2;
                Ok(Node::Less {
                    attr,
                    value: self.value()?,
                })
            }
            (Some(b'='), _) => {
                self.pos += 1;
                self.substring(attr)
            }
            _ => Err(self.error("invalid operator")),
        }
    }

    fn attr(&mut self) -> Result<String, FilterError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'=' | b'<' | b'>' | b'~' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = self.text[start..self.pos].trim_end();
        if attr.is_empty() {
            return Err(self.error_at(start, "missing attribute name"));
        }
        Ok(attr.to_string())
    }

    /// Reads a plain value up to the closing `)`; `*` is literal here.
    fn value(&mut self) -> Result<String, FilterError> {
        let start = self.pos;
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                Some(b')') => break,
                Some(b'(') => return Err(self.error("invalid value")),
                Some(b'\\') => {
                    self.pos += 1;
                    let Some(c) = self.peek() else {
                        return Err(self.error("dangling escape"));
                    };
                    buf.push(c);
                    self.pos += 1;
                }
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error("missing ')'")),
            }
        }
        if buf.is_empty() {
            return Err(self.error_at(start, "missing value"));
        }
        self.utf8(buf, start)
    }

    /// Reads an `=` operand, classifying it as equality, presence or substring.
    fn substring(&mut self, attr: String) -> Result<Node, FilterError> {
        let start = self.pos;
        let mut pieces = Vec::new();
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                Some(b')') => break,
                Some(b'(') => return Err(self.error("invalid value")),
                Some(b'*') => {
                    if !buf.is_empty() {
                        pieces.push(Piece::Text(self.utf8(std::mem::take(&mut buf), start)?));
                    }
                    pieces.push(Piece::Star);
                    self.pos += 1;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let Some(c) = self.peek() else {
                        return Err(self.error("dangling escape"));
                    };
                    buf.push(c);
                    self.pos += 1;
                }
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                }
                None => return Err(self.error("missing ')'")),
            }
        }
        if !buf.is_empty() {
            pieces.push(Piece::Text(self.utf8(buf, start)?));
        }

        if pieces.len() == 1 {
            return match pieces.pop() {
                Some(Piece::Text(value)) => Ok(Node::Equal { attr, value }),
                Some(Piece::Star) => Ok(Node::Present { attr }),
                None => Err(self.error_at(start, "missing value")),
            };
        }
        if pieces.is_empty() {
            return Err(self.error_at(start, "missing value"));
        }

        let len = pieces.len();
        let mut initial = None;
        let mut any = Vec::new();
        let mut last = None;
        for (i, piece) in pieces.into_iter().enumerate() {
            if let Piece::Text(text) = piece {
                if i == 0 {
                    initial = Some(text);
                } else if i == len - 1 {
                    last = Some(text);
                } else {
                    any.push(text);
                }
            }
        }
        Ok(Node::Substring {
            attr,
            initial,
            any,
            last,
        })
    }

    fn utf8(&self, buf: Vec<u8>, start: usize) -> Result<String, FilterError> {
        String::from_utf8(buf).map_err(|_| self.error_at(start, "value is not valid UTF-8"))
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), FilterError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, message: &str) -> FilterError {
        self.error_at(self.pos, message)
    }

    fn error_at(&self, position: usize, message: &str) -> FilterError {
        FilterError {
            filter: self.text.to_string(),
            position,
            message: message.to_string(),
        }
    }
}
