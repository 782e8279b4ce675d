//! Textual filter chain descriptions
//!
//! ```text
//! chain  := filter (',' filter)*
//! filter := name ['=' option (':' option)*]
//! option := [key '='] value
//! ```
//!
//! Values may be single-quoted. A backslash escapes the next character both
//! inside and outside quotes, so `\'`, `\:` and `\\` are literal.

use super::FilterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub name: String,
    pub options: Vec<FilterOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    pub key: Option<String>,
    pub value: String,
}

pub fn parse_chain(description: &str) -> Result<Vec<FilterSpec>, FilterError> {
    if description.trim().is_empty() {
        return Err(FilterError::Empty);
    }
    Parser {
        src: description,
        pos: 0,
    }
    .chain()
}

/// Quote `text` so it survives [`parse_chain`] as a single option value
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::Syntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn ident(&mut self) -> &str {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn chain(&mut self) -> Result<Vec<FilterSpec>, FilterError> {
        let mut filters = Vec::new();
        loop {
            self.skip_ws();
            filters.push(self.filter()?);
            self.skip_ws();
            match self.bump() {
                None => return Ok(filters),
                Some(',') => continue,
                Some(';') => return Err(self.error("only a single linear chain is supported")),
                Some(c) => return Err(self.error(format!("unexpected {c:?}"))),
            }
        }
    }

    fn filter(&mut self) -> Result<FilterSpec, FilterError> {
        if self.peek() == Some('[') {
            return Err(self.error("link labels are not supported"));
        }
        let name = self.ident().to_string();
        if name.is_empty() {
            return Err(self.error("expected a filter name"));
        }
        self.skip_ws();

        let mut options = Vec::new();
        if self.peek() == Some('=') {
            self.bump();
            loop {
                options.push(self.option()?);
                if self.peek() != Some(':') {
                    break;
                }
                self.bump();
            }
        }
        Ok(FilterSpec { name, options })
    }

    fn option(&mut self) -> Result<FilterOption, FilterError> {
        let start = self.pos;
        let key = self.ident().to_string();
        let key = if !key.is_empty() && self.peek() == Some('=') {
            self.bump();
            Some(key)
        } else {
            self.pos = start;
            None
        };
        let value = self.value()?;
        Ok(FilterOption { key, value })
    }

    fn value(&mut self) -> Result<String, FilterError> {
        let mut out = String::new();
        let mut quoted = false;
        loop {
            match self.peek() {
                None | Some(':') | Some(',') | Some(';') => break,
                Some('\'') => {
                    quoted = true;
                    self.bump();
                    loop {
                        match self.bump() {
                            None => return Err(self.error("unterminated quote")),
                            Some('\'') => break,
                            Some('\\') => out.push(self.escaped()?),
                            Some(c) => out.push(c),
                        }
                    }
                }
                Some('\\') => {
                    self.bump();
                    out.push(self.escaped()?);
                }
                Some(c) => {
                    self.bump();
                    out.push(c);
                }
            }
        }
        if quoted {
            Ok(out)
        } else {
            Ok(out.trim().to_string())
        }
    }

    fn escaped(&mut self) -> Result<char, FilterError> {
        self.bump()
            .ok_or_else(|| self.error("dangling escape at end of input"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(key: &str, value: &str) -> FilterOption {
        FilterOption {
            key: Some(key.into()),
            value: value.into(),
        }
    }

    #[test]
    fn parses_keyed_options_and_quotes() {
        let chain =
            parse_chain("drawtext=x=5:y=5:text='%{localtime:%H:%M:%S} IPC'").unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name, "drawtext");
        assert_eq!(
            chain[0].options,
            vec![
                opt("x", "5"),
                opt("y", "5"),
                opt("text", "%{localtime:%H:%M:%S} IPC"),
            ]
        );
    }

    #[test]
    fn parses_multiple_filters() {
        let chain = parse_chain("null , drawtext=text=a\\:b").unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name, "null");
        assert!(chain[0].options.is_empty());
        assert_eq!(chain[1].options, vec![opt("text", "a:b")]);
    }

    #[test]
    fn positional_options_have_no_key() {
        let chain = parse_chain("scale=640:480").unwrap();
        assert_eq!(chain[0].options[0].key, None);
        assert_eq!(chain[0].options[1].value, "480");
    }

    #[test]
    fn quote_round_trips_through_parser() {
        let text = "it's a \\ test: 1,2";
        let chain = parse_chain(&format!("drawtext=text={}", quote(text))).unwrap();
        assert_eq!(chain[0].options[0].value, text);
    }

    #[test]
    fn rejects_malformed_descriptions() {
        assert_eq!(parse_chain("  "), Err(FilterError::Empty));
        assert!(matches!(parse_chain("drawtext=text='open"), Err(FilterError::Syntax { .. })));
        assert!(matches!(parse_chain("[in]null"), Err(FilterError::Syntax { .. })));
        assert!(matches!(parse_chain("null;null"), Err(FilterError::Syntax { .. })));
        assert!(matches!(parse_chain("null,"), Err(FilterError::Syntax { .. })));
        assert!(matches!(parse_chain("drawtext=text=x\\"), Err(FilterError::Syntax { .. })));
    }
}
