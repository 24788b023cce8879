//! Zone description file parser
//!
//! Lexing is longest-match over a priority-ordered matcher list; ties go
//! to the earlier matcher. Blank and comment tokens are dropped from the
//! logical stream by default, and the parenthesized-group grammar re-runs
//! the tokenizer over the block body with a reduced matcher set. The
//! grammar itself is line-oriented: directives (`$ORIGIN`, `$TTL`) or
//! record declarations. Errors carry 1-based line numbers and abort the
//! whole file.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::rdata::{Rdata, TextData};
use crate::record::Record;
use crate::script::ScriptEngine;
use crate::types::{RecordClass, RecordType};
use crate::zone::ZoneData;

#[derive(Debug, Error)]
#[error("line {line}: {message}")]
pub struct ZoneFileError {
    pub line: usize,
    pub message: String,
}

impl ZoneFileError {
    fn new(line: usize, message: impl Into<String>) -> ZoneFileError {
        ZoneFileError { line, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Comment,
    Directive,
    Group,
    ScriptBlock,
    StringData,
    HexData,
    Number,
    NonBlank,
    Eol,
    Blank,
    Eof,
}

impl TokenKind {
    fn name(self) -> &'static str {
        match self {
            TokenKind::Comment => "Comment",
            TokenKind::Directive => "Directive",
            TokenKind::Group => "Group",
            TokenKind::ScriptBlock => "ScriptBlock",
            TokenKind::StringData => "StringData",
            TokenKind::HexData => "HexData",
            TokenKind::Number => "Number",
            TokenKind::NonBlank => "NonBlank",
            TokenKind::Eol => "EOL",
            TokenKind::Blank => "Blank",
            TokenKind::Eof => "EOF",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub line: usize,
}

/// One lexeme recognizer: either an anchored regex (with an optional
/// capture group providing the token value) or a delimited block.
enum Matcher {
    Pattern { kind: TokenKind, expr: Regex, value_group: usize },
    Delimited { kind: TokenKind, start: &'static str, end: &'static str },
}

impl Matcher {
    fn pattern(kind: TokenKind, pattern: &str) -> Matcher {
        Matcher::pattern_group(kind, pattern, 0)
    }

    fn pattern_group(kind: TokenKind, pattern: &str, value_group: usize) -> Matcher {
        Matcher::Pattern {
            kind,
            expr: Regex::new(&format!("^(?:{})", pattern)).unwrap(),
            value_group,
        }
    }

    fn delimited(kind: TokenKind, start: &'static str, end: &'static str) -> Matcher {
        Matcher::Delimited { kind, start, end }
    }

    /// Attempts a match at the start of `input`, returning the token kind,
    /// the raw consumed length, and the token value.
    fn try_match(&self, input: &str) -> Option<(TokenKind, usize, String)> {
        match self {
            Matcher::Pattern { kind, expr, value_group } => {
                let captures = expr.captures(input)?;
                let raw = captures.get(0)?;
                let value = if *value_group == 0 {
                    raw.as_str().to_string()
                } else {
                    captures.get(*value_group)?.as_str().to_string()
                };
                Some((*kind, raw.end(), value))
            }
            Matcher::Delimited { kind, start, end } => {
                let rest = input.strip_prefix(start)?;
                let end_index = rest.find(end)?;
                let raw_len = start.len() + end_index + end.len();
                Some((*kind, raw_len, rest[..end_index].to_string()))
            }
        }
    }
}

lazy_static! {
    /// Matchers for the full zone file, in tie-break order.
    static ref FILE_MATCHERS: Vec<Matcher> = vec![
        Matcher::pattern(TokenKind::Comment, r";[^\n]*"),
        Matcher::pattern(TokenKind::Directive, r"\$[A-Za-z_][A-Za-z0-9_]*"),
        Matcher::delimited(TokenKind::Group, "(", ")"),
        Matcher::delimited(TokenKind::ScriptBlock, "<?lua", "?>"),
        Matcher::delimited(TokenKind::StringData, "\"", "\""),
        Matcher::pattern_group(TokenKind::HexData, r"0x([0-9A-Fa-f]+)", 1),
        Matcher::pattern(TokenKind::Number, r"\d+"),
        Matcher::pattern(TokenKind::NonBlank, r"[^\s]+"),
        Matcher::pattern(TokenKind::Eol, r"\n"),
        Matcher::pattern(TokenKind::Blank, r"[ \t\r]"),
    ];

    /// Reduced set used to re-tokenize parenthesized group bodies.
    static ref GROUP_MATCHERS: Vec<Matcher> = vec![
        Matcher::pattern(TokenKind::Comment, r";[^\n]*"),
        Matcher::pattern(TokenKind::Eol, r"\n"),
        Matcher::pattern(TokenKind::Blank, r"[ \t\r]"),
        Matcher::pattern(TokenKind::Number, r"\d+"),
    ];
}

/// Longest raw match wins; ties break toward the earlier matcher. Blank
/// and comment tokens are filtered out unless a caller asks for them.
fn tokenize(
    matchers: &[Matcher],
    input: &str,
    line_offset: usize,
    skip_blanks: bool,
    skip_comments: bool,
) -> Result<Vec<Token>, ZoneFileError> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    let mut line = line_offset;

    while offset < input.len() {
        let rest = &input[offset..];
        let mut best: Option<(TokenKind, usize, String)> = None;
        for matcher in matchers {
            if let Some(candidate) = matcher.try_match(rest) {
                let longer = match &best {
                    Some((_, best_len, _)) => candidate.1 > *best_len,
                    None => true,
                };
                if longer {
                    best = Some(candidate);
                }
            }
        }

        let Some((kind, raw_len, value)) = best else {
            let tail: String = rest.chars().take(5).collect();
            return Err(ZoneFileError::new(line, format!("unexpected input '{}...'", tail)));
        };

        let ignore = (skip_blanks && kind == TokenKind::Blank)
            || (skip_comments && kind == TokenKind::Comment);
        if !ignore {
            tokens.push(Token { kind, value, line });
        }

        line += input[offset..offset + raw_len].matches('\n').count();
        offset += raw_len;
    }

    Ok(tokens)
}

struct TokenReader {
    tokens: Vec<Token>,
    offset: usize,
    last_line: usize,
}

impl TokenReader {
    fn new(tokens: Vec<Token>) -> TokenReader {
        let last_line = tokens.last().map(|t| t.line).unwrap_or(1);
        TokenReader { tokens, offset: 0, last_line }
    }

    fn eof(&self) -> Token {
        Token { kind: TokenKind::Eof, value: String::new(), line: self.last_line }
    }

    fn peek(&self) -> Token {
        self.tokens.get(self.offset).cloned().unwrap_or_else(|| self.eof())
    }

    fn read(&mut self) -> Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.offset += 1;
        }
        token
    }

    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.read();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ZoneFileError> {
        let token = self.peek();
        if token.kind != kind {
            return Err(ZoneFileError::new(
                token.line,
                format!("expected '{}', found '{}'", kind.name(), token.kind.name()),
            ));
        }
        Ok(self.read())
    }
}

pub struct ZoneParser {
    engine: Arc<dyn ScriptEngine>,
}

impl ZoneParser {
    pub fn new(engine: Arc<dyn ScriptEngine>) -> ZoneParser {
        ZoneParser { engine }
    }

    /// Parses a complete zone description, aborting on the first
    /// structural error.
    pub fn parse(&self, input: &str) -> Result<ZoneData, ZoneFileError> {
        let tokens = tokenize(&FILE_MATCHERS, input, 1, true, true)?;
        let mut reader = TokenReader::new(tokens);
        let mut zone = ZoneData::new();

        loop {
            while reader.consume(TokenKind::Eol) {}

            let token = reader.read();
            match token.kind {
                TokenKind::Directive => self.parse_directive(&mut zone, &mut reader, &token)?,
                TokenKind::NonBlank => {
                    let owner = if token.value == "@" {
                        zone.origin().to_string()
                    } else {
                        token.value.clone()
                    };
                    self.parse_record(&mut zone, &mut reader, owner, token.line)?;
                }
                TokenKind::Eof => break,
                _ => {
                    return Err(ZoneFileError::new(
                        token.line,
                        format!("unexpected input '{}'", token.value),
                    ))
                }
            }

            if !reader.consume(TokenKind::Eol) {
                reader.expect(TokenKind::Eof)?;
            }
        }

        Ok(zone)
    }

    fn parse_directive(
        &self,
        zone: &mut ZoneData,
        reader: &mut TokenReader,
        directive: &Token,
    ) -> Result<(), ZoneFileError> {
        if directive.value.eq_ignore_ascii_case("$ORIGIN") {
            let name = reader.expect(TokenKind::NonBlank)?;
            zone.set_origin(&name.value);
        } else if directive.value.eq_ignore_ascii_case("$TTL") {
            let number = reader.expect(TokenKind::Number)?;
            let ttl = number
                .value
                .parse()
                .map_err(|_| ZoneFileError::new(number.line, format!("invalid TTL '{}'", number.value)))?;
            zone.set_default_ttl(ttl);
        } else {
            return Err(ZoneFileError::new(
                directive.line,
                format!("unknown directive '{}'", directive.value),
            ));
        }
        Ok(())
    }

    fn parse_record(
        &self,
        zone: &mut ZoneData,
        reader: &mut TokenReader,
        owner: String,
        line: usize,
    ) -> Result<(), ZoneFileError> {
        // class 可省略, 省略时按 ANY 处理
        let mut class = RecordClass::ANY;
        if reader.peek().kind == TokenKind::NonBlank {
            if let Some(parsed) = RecordClass::from_name(&reader.peek().value) {
                class = parsed;
                reader.read();
            }
        }

        // TTL 可省略, 0 表示沿用 zone 默认值
        let mut ttl = 0u32;
        if reader.peek().kind == TokenKind::Number {
            let number = reader.read();
            ttl = number
                .value
                .parse()
                .map_err(|_| ZoneFileError::new(number.line, format!("invalid TTL '{}'", number.value)))?;
        }

        let type_token = reader.expect(TokenKind::NonBlank)?;
        let Some(rtype) = RecordType::from_name(&type_token.value) else {
            // 未知类型: 整行丢弃, 继续装载后面的记录
            tracing::warn!(
                "[parser] Ignoring unknown record type '{}' at line {}",
                type_token.value,
                type_token.line
            );
            while !matches!(reader.peek().kind, TokenKind::Eol | TokenKind::Eof) {
                reader.read();
            }
            return Ok(());
        };

        let record = if reader.peek().kind == TokenKind::ScriptBlock {
            let block = reader.read();
            let script = self
                .engine
                .compile(&block.value)
                .map_err(|e| ZoneFileError::new(block.line, e.to_string()))?;
            Record::scripted(zone.origin(), &owner, class, rtype, ttl, script)
                .map_err(|e| ZoneFileError::new(line, e.to_string()))?
        } else {
            let data = self.parse_record_data(reader, rtype, line)?;
            let rdata = Rdata::parse_from_text(rtype, &data)
                .map_err(|e| ZoneFileError::new(line, e.to_string()))?;
            Record::new(zone.origin(), &owner, class, rtype, ttl, rdata)
                .map_err(|e| ZoneFileError::new(line, e.to_string()))?
        };

        zone.add_record(record)
            .map_err(|e| ZoneFileError::new(line, e.to_string()))?;
        Ok(())
    }

    /// Reads the type-specific literal fields of a record line.
    fn parse_record_data(
        &self,
        reader: &mut TokenReader,
        rtype: RecordType,
        line: usize,
    ) -> Result<TextData, ZoneFileError> {
        match rtype {
            RecordType::A | RecordType::AAAA => {
                Ok(TextData::Value(reader.expect(TokenKind::NonBlank)?.value))
            }
            RecordType::NS | RecordType::CNAME | RecordType::PTR => {
                Ok(TextData::Value(reader.expect(TokenKind::NonBlank)?.value))
            }
            RecordType::MX => {
                let preference = reader.expect(TokenKind::Number)?;
                let exchange = reader.expect(TokenKind::NonBlank)?;
                Ok(TextData::List(vec![preference.value, exchange.value]))
            }
            RecordType::SOA => {
                let mname = reader.expect(TokenKind::NonBlank)?;
                let rname = reader.expect(TokenKind::NonBlank)?;
                let group = reader.expect(TokenKind::Group)?;

                let numbers: Vec<String> =
                    tokenize(&GROUP_MATCHERS, &group.value, group.line, true, true)?
                        .into_iter()
                        .filter(|t| t.kind == TokenKind::Number)
                        .map(|t| t.value)
                        .collect();
                if numbers.len() < 5 {
                    return Err(ZoneFileError::new(
                        group.line,
                        format!("SOA needs 5 numeric fields, found {}", numbers.len()),
                    ));
                }

                let mut values = vec![mname.value, rname.value];
                values.extend(numbers.into_iter().take(5));
                Ok(TextData::List(values))
            }
            RecordType::TXT => Ok(TextData::Value(reader.expect(TokenKind::StringData)?.value)),
            RecordType::NULL => Ok(TextData::Value(reader.expect(TokenKind::HexData)?.value)),
            _ => Err(ZoneFileError::new(
                line,
                format!("record type '{}' cannot be declared in a zone file", rtype.name()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::Rdata;
    use crate::script::testing::{StaticScript, StubEngine};
    use crate::script::{NoScriptEngine, ScriptOutput};
    use crate::types::{RecordClass, RecordType};

    fn parser() -> ZoneParser {
        ZoneParser::new(Arc::new(NoScriptEngine))
    }

    #[test]
    fn parses_directives_and_soa_group() {
        let zone = parser()
            .parse(concat!(
                "$ORIGIN example.com.\n",
                "$TTL 3600\n",
                "@ IN SOA ns1 admin ( 2021010100 3600 900 604800 3600 )\n",
            ))
            .unwrap();

        assert_eq!(zone.origin(), "example.com");
        assert_eq!(zone.default_ttl(), 3600);
        assert_eq!(zone.records().len(), 1);

        let record = zone.resolve("example.com", RecordType::SOA, RecordClass::IN).unwrap();
        let query = crate::message::Query {
            name: "example.com".to_string(),
            rtype: RecordType::SOA,
            class: RecordClass::IN,
        };
        let results = record.evaluate(&query, &"198.51.100.2:53".parse().unwrap());
        let [Rdata::SOA(soa)] = results.as_slice() else {
            panic!("expected one SOA payload");
        };
        assert_eq!(soa.serial, 2021010100);
        assert_eq!(soa.minimum, 3600);
    }

    #[test]
    fn parses_a_multiline_soa_group_with_comments() {
        let zone = parser()
            .parse(concat!(
                "$ORIGIN example.com.\n",
                "@ IN SOA ns1 admin ( 1 ; serial\n",
                "              7200  ; refresh\n",
                "              900 604800 3600 )\n",
            ))
            .unwrap();
        assert_eq!(zone.records().len(), 1);
    }

    #[test]
    fn parses_every_literal_record_form() {
        let zone = parser()
            .parse(concat!(
                "$ORIGIN example.com.\n",
                "$TTL 300\n",
                "www IN A 192.0.2.10\n",
                "www IN AAAA 2001:db8::10\n",
                "@ IN NS ns1.example.com.\n",
                "alias IN 600 CNAME www\n",
                "@ IN MX 10 mail.example.com.\n",
                "@ IN TXT \"hello world\"\n",
                "blob IN NULL 0xdeadbeef\n",
                "/^host[0-9]+$/ IN A 192.0.2.99\n",
            ))
            .unwrap();
        assert_eq!(zone.records().len(), 8);

        assert!(zone.resolve("host7.example.com", RecordType::A, RecordClass::IN).is_some());
        assert!(zone.resolve("alias.example.com", RecordType::CNAME, RecordClass::IN).is_some());
    }

    #[test]
    fn class_token_is_optional() {
        let zone = parser()
            .parse("$ORIGIN example.com.\nwww 120 A 192.0.2.1\n")
            .unwrap();
        let record = &zone.records()[0];
        assert_eq!(record.class, RecordClass::ANY);
        assert_eq!(record.effective_ttl(0), 120);
    }

    #[test]
    fn syntax_error_reports_one_based_line() {
        // 第 3 行缺少 MX 的主机字段
        let err = parser()
            .parse("$ORIGIN example.com.\nwww IN A 192.0.2.1\n@ IN MX 10\n")
            .unwrap_err();
        assert_eq!(err.line, 3);

        let err = parser().parse("$BOGUS value\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn unknown_record_types_are_skipped() {
        let zone = parser()
            .parse(concat!(
                "$ORIGIN example.com.\n",
                "old IN WKS 192.0.2.1 6\n",
                "www IN A 192.0.2.2\n",
            ))
            .unwrap();
        assert_eq!(zone.records().len(), 1);
        assert!(zone.resolve("www.example.com", RecordType::A, RecordClass::IN).is_some());
    }

    #[test]
    fn duplicate_records_abort_the_load() {
        let err = parser()
            .parse(concat!(
                "$ORIGIN example.com.\n",
                "www IN A 192.0.2.1\n",
                "www IN A 192.0.2.2\n",
            ))
            .unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("uplicated record"));
    }

    #[test]
    fn script_blocks_compile_through_the_engine() {
        let script = StaticScript::new(ScriptOutput::Single(crate::rdata::TextData::Value(
            "192.0.2.77".to_string(),
        )));
        let engine = StubEngine::new(script);
        let zone = ZoneParser::new(engine)
            .parse(concat!(
                "$ORIGIN example.com.\n",
                "dyn IN A <?lua return remoteAddress ?>\n",
            ))
            .unwrap();
        assert_eq!(zone.records().len(), 1);
        assert!(zone.records()[0].is_script());
    }

    #[test]
    fn script_blocks_fail_without_an_engine() {
        let err = parser()
            .parse("$ORIGIN example.com.\ndyn IN A <?lua return 1 ?>\n")
            .unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let zone = parser()
            .parse(concat!(
                "; leading comment\n",
                "$ORIGIN example.com.\n",
                "\n",
                "www IN A 192.0.2.1 ; trailing comment\n",
                "\n",
            ))
            .unwrap();
        assert_eq!(zone.records().len(), 1);
    }
}
