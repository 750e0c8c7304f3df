//! SQL script tokenizer, dump writer and script replay.
//!
//! The tokenizer reads a script one logical line at a time. Quoted strings,
//! bracketed identifiers and comments are consumed by content readers as one
//! unit, so a separator inside them never ends a statement. Each logical line
//! is then classified by the line-handler table.
//!
//! Separators come in two shapes: a word on a line by itself (`GO`), matched
//! case-insensitively, or a single punctuation terminator (`;`) ending each
//! statement, several of which may share a line.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::traits::{ConnectionProvider, SqlExecutor};
use crate::core::value::{QueryResult, SqlValue};
use crate::error::{MigrateError, Result};

/// Statement separator of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Separator {
    /// A word on its own line, e.g. `GO`.
    Line(String),
    /// A character ending the statement, e.g. `;`.
    Terminator(char),
}

impl Separator {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (None, _) => Err(MigrateError::Config(
                "script separator must not be empty".to_string(),
            )),
            (Some(c), None) if !c.is_alphanumeric() => Ok(Separator::Terminator(c)),
            _ => Ok(Separator::Line(text.to_string())),
        }
    }

    fn is_separator_line(&self, line: &LogicalLine) -> bool {
        match self {
            Separator::Line(word) => line.text.trim().eq_ignore_ascii_case(word),
            Separator::Terminator(_) => false,
        }
    }

    fn terminates(&self, line: &LogicalLine) -> bool {
        match self {
            Separator::Terminator(_) => !line.terminators.is_empty(),
            Separator::Line(_) => false,
        }
    }

    fn is_terminator(&self, c: char) -> bool {
        matches!(self, Separator::Terminator(t) if *t == c)
    }
}

/// One statement and the script lines it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Read position over the script text.
pub struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// 1-based line of the next character.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}

/// What a content reader consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    Code,
    Comment,
}

/// Consumes a delimited span starting at its trigger character, appending
/// it to the buffer. Must consume at least the trigger.
pub type ContentReader = fn(&mut Cursor, &mut String) -> Result<Span>;

fn read_delimited(cursor: &mut Cursor, out: &mut String, close: char) -> Result<Span> {
    let start = cursor.line();
    let open = cursor.bump().unwrap_or(close);
    out.push(open);
    loop {
        match cursor.bump() {
            None => {
                return Err(MigrateError::Script(format!(
                    "unterminated {}...{} starting at line {}",
                    open, close, start
                )))
            }
            Some(c) if c == close => {
                out.push(c);
                if cursor.peek() == Some(close) {
                    cursor.bump();
                    out.push(close);
                } else {
                    return Ok(Span::Code);
                }
            }
            Some(c) => out.push(c),
        }
    }
}

fn read_single_quoted(cursor: &mut Cursor, out: &mut String) -> Result<Span> {
    read_delimited(cursor, out, '\'')
}

fn read_double_quoted(cursor: &mut Cursor, out: &mut String) -> Result<Span> {
    read_delimited(cursor, out, '"')
}

fn read_bracketed(cursor: &mut Cursor, out: &mut String) -> Result<Span> {
    read_delimited(cursor, out, ']')
}

fn read_line_comment(cursor: &mut Cursor, out: &mut String) -> Result<Span> {
    if cursor.peek_at(1) != Some('-') {
        if let Some(c) = cursor.bump() {
            out.push(c);
        }
        return Ok(Span::Code);
    }
    while let Some(c) = cursor.peek() {
        if c == '\n' {
            break;
        }
        cursor.bump();
        out.push(c);
    }
    Ok(Span::Comment)
}

fn read_block_comment(cursor: &mut Cursor, out: &mut String) -> Result<Span> {
    if cursor.peek_at(1) != Some('*') {
        if let Some(c) = cursor.bump() {
            out.push(c);
        }
        return Ok(Span::Code);
    }
    let start = cursor.line();
    let mut depth = 0usize;
    loop {
        match (cursor.peek(), cursor.peek_at(1)) {
            (Some('/'), Some('*')) => {
                cursor.bump();
                cursor.bump();
                out.push_str("/*");
                depth += 1;
            }
            (Some('*'), Some('/')) => {
                cursor.bump();
                cursor.bump();
                out.push_str("*/");
                depth -= 1;
                if depth == 0 {
                    return Ok(Span::Comment);
                }
            }
            (Some(c), _) => {
                cursor.bump();
                out.push(c);
            }
            (None, _) => {
                return Err(MigrateError::Script(format!(
                    "unterminated block comment starting at line {}",
                    start
                )))
            }
        }
    }
}

/// PostgreSQL `$tag$ ... $tag$` strings.
fn read_dollar_quoted(cursor: &mut Cursor, out: &mut String) -> Result<Span> {
    let mut tag = String::from("$");
    let mut offset = 1;
    loop {
        match cursor.peek_at(offset) {
            Some('$') => {
                tag.push('$');
                break;
            }
            Some(c) if c == '_' || c.is_alphabetic() || (offset > 1 && c.is_ascii_digit()) => {
                tag.push(c);
                offset += 1;
            }
            _ => {
                if let Some(c) = cursor.bump() {
                    out.push(c);
                }
                return Ok(Span::Code);
            }
        }
    }
    let start = cursor.line();
    for _ in 0..tag.chars().count() {
        cursor.bump();
    }
    out.push_str(&tag);
    let tag: Vec<char> = tag.chars().collect();
    loop {
        if (0..tag.len()).all(|i| cursor.peek_at(i) == Some(tag[i])) {
            for &c in &tag {
                cursor.bump();
                out.push(c);
            }
            return Ok(Span::Code);
        }
        match cursor.bump() {
            Some(c) => out.push(c),
            None => {
                return Err(MigrateError::Script(format!(
                    "unterminated dollar-quoted string starting at line {}",
                    start
                )))
            }
        }
    }
}

struct LogicalLine {
    text: String,
    start_line: usize,
    end_line: usize,
    has_code: bool,
    /// Byte offset in `text` of the last character outside comments.
    last_code_at: Option<usize>,
    /// Byte offsets in `text` of terminators outside content readers.
    terminators: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineAction {
    Skip,
    Append,
    Flush,
    AppendAndFlush,
}

struct LineHandler {
    matches: fn(&LogicalLine, &Separator, bool) -> bool,
    action: LineAction,
}

/// Evaluated in order; the last entry always matches.
const LINE_HANDLERS: [LineHandler; 5] = [
    LineHandler {
        matches: |line, sep, _| sep.is_separator_line(line),
        action: LineAction::Flush,
    },
    LineHandler {
        matches: |line, sep, _| sep.terminates(line),
        action: LineAction::AppendAndFlush,
    },
    LineHandler {
        matches: |line, _, _| line.text.trim().is_empty(),
        action: LineAction::Skip,
    },
    LineHandler {
        matches: |line, _, buffer_empty| !line.has_code && buffer_empty,
        action: LineAction::Skip,
    },
    LineHandler {
        matches: |_, _, _| true,
        action: LineAction::Append,
    },
];

#[derive(Default)]
struct StatementBuffer {
    lines: Vec<String>,
    start_line: usize,
    end_line: usize,
}

impl StatementBuffer {
    fn push(&mut self, text: String, start_line: usize, end_line: usize) {
        if self.lines.is_empty() {
            self.start_line = start_line;
        }
        self.end_line = end_line;
        self.lines.push(text);
    }

    fn take(&mut self) -> Option<Statement> {
        let sql = self.lines.join("\n").trim().to_string();
        self.lines.clear();
        if sql.is_empty() {
            return None;
        }
        Some(Statement {
            sql,
            start_line: self.start_line,
            end_line: self.end_line,
        })
    }
}

/// Splits scripts into statements.
pub struct ScriptTokenizer {
    separator: Separator,
    readers: Vec<(char, ContentReader)>,
}

impl ScriptTokenizer {
    /// Tokenizer with the standard content readers for quotes, brackets,
    /// comments and dollar-quoted strings.
    pub fn new(separator: &str) -> Result<Self> {
        Ok(Self {
            separator: Separator::parse(separator)?,
            readers: vec![
                ('\'', read_single_quoted as ContentReader),
                ('"', read_double_quoted),
                ('[', read_bracketed),
                ('-', read_line_comment),
                ('/', read_block_comment),
                ('$', read_dollar_quoted),
            ],
        })
    }

    /// Register or replace the content reader for `trigger`.
    pub fn with_content_reader(mut self, trigger: char, reader: ContentReader) -> Self {
        self.readers.retain(|(c, _)| *c != trigger);
        self.readers.push((trigger, reader));
        self
    }

    pub fn separator(&self) -> &Separator {
        &self.separator
    }

    fn reader_for(&self, c: char) -> Option<ContentReader> {
        self.readers
            .iter()
            .find(|(trigger, _)| *trigger == c)
            .map(|(_, reader)| *reader)
    }

    fn next_line(&self, cursor: &mut Cursor) -> Result<Option<LogicalLine>> {
        if cursor.at_end() {
            return Ok(None);
        }
        let mut line = LogicalLine {
            text: String::new(),
            start_line: cursor.line(),
            end_line: cursor.line(),
            has_code: false,
            last_code_at: None,
            terminators: Vec::new(),
        };
        while let Some(c) = cursor.peek() {
            if c == '\n' {
                cursor.bump();
                return Ok(Some(line));
            }
            if c == '\r' && cursor.peek_at(1) == Some('\n') {
                cursor.bump();
                continue;
            }
            match self.reader_for(c) {
                Some(reader) => {
                    let before = cursor.pos;
                    let at = line.text.len();
                    let span = reader(cursor, &mut line.text)?;
                    if cursor.pos == before {
                        return Err(MigrateError::StuckScript {
                            line: cursor.line(),
                        });
                    }
                    // A trigger consumed alone is plain code.
                    if span == Span::Code
                        && cursor.pos == before + 1
                        && self.separator.is_terminator(c)
                    {
                        line.terminators.push(at);
                    }
                    if span == Span::Code {
                        line.has_code = true;
                        line.last_code_at =
                            line.text.trim_end().char_indices().last().map(|(i, _)| i);
                    }
                }
                None => {
                    cursor.bump();
                    if !c.is_whitespace() {
                        line.has_code = true;
                        line.last_code_at = Some(line.text.len());
                    }
                    if self.separator.is_terminator(c) {
                        line.terminators.push(line.text.len());
                    }
                    line.text.push(c);
                }
            }
            line.end_line = cursor.line();
        }
        Ok(Some(line))
    }

    /// Split `text` into statements.
    pub fn split(&self, text: &str) -> Result<Vec<Statement>> {
        let mut cursor = Cursor::new(text);
        let mut buffer = StatementBuffer::default();
        let mut statements = Vec::new();

        loop {
            let before = cursor.line();
            let Some(line) = self.next_line(&mut cursor)? else {
                break;
            };
            let handler = LINE_HANDLERS
                .iter()
                .find(|h| (h.matches)(&line, &self.separator, buffer.lines.is_empty()))
                .map(|h| h.action)
                .unwrap_or(LineAction::Append);

            match handler {
                LineAction::Skip => {}
                LineAction::Append => buffer.push(line.text, line.start_line, line.end_line),
                LineAction::Flush => statements.extend(buffer.take()),
                LineAction::AppendAndFlush => {
                    let mut start = 0;
                    for &at in &line.terminators {
                        buffer.push(line.text[start..at].to_string(), line.start_line, line.end_line);
                        statements.extend(buffer.take());
                        start = at + line.text[at..].chars().next().map_or(1, char::len_utf8);
                    }
                    // Code after the last terminator opens the next statement.
                    if line.last_code_at.map_or(false, |i| i >= start) {
                        buffer.push(line.text[start..].to_string(), line.start_line, line.end_line);
                    }
                }
            }

            if !cursor.at_end() && cursor.line() == before {
                return Err(MigrateError::StuckScript { line: before });
            }
        }
        statements.extend(buffer.take());
        Ok(statements)
    }
}

struct ScriptWriter {
    out: Box<dyn Write + Send>,
    separator: Separator,
    statements: u64,
}

impl ScriptWriter {
    fn write_statement(&mut self, sql: &str) -> Result<()> {
        let sql = sql.trim();
        match &self.separator {
            Separator::Line(word) => write!(self.out, "{}\n{}\n\n", sql, word)?,
            Separator::Terminator(c) => {
                let last_line = sql.lines().last().unwrap_or_default();
                if last_line.contains("--") {
                    write!(self.out, "{}\n{}\n\n", sql, c)?;
                } else {
                    write!(self.out, "{}{}\n\n", sql, c)?;
                }
            }
        }
        self.statements += 1;
        Ok(())
    }
}

/// Destination of a dump. Every connection opened on it appends to the same
/// script, one statement at a time.
#[derive(Clone)]
pub struct ScriptSink {
    writer: Arc<Mutex<ScriptWriter>>,
}

impl ScriptSink {
    pub fn new(out: Box<dyn Write + Send>, separator: &str) -> Result<Self> {
        Ok(Self {
            writer: Arc::new(Mutex::new(ScriptWriter {
                out,
                separator: Separator::parse(separator)?,
                statements: 0,
            })),
        })
    }

    pub fn executor(&self) -> ScriptExecutor {
        ScriptExecutor {
            writer: self.writer.clone(),
        }
    }

    /// Write a `--` comment line.
    pub async fn comment(&self, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        for line in text.lines() {
            writeln!(writer.out, "-- {}", line)?;
        }
        writeln!(writer.out)?;
        Ok(())
    }

    /// Flush the output and return the number of statements written.
    pub async fn finish(&self) -> Result<u64> {
        let mut writer = self.writer.lock().await;
        writer.out.flush()?;
        Ok(writer.statements)
    }
}

#[async_trait]
impl ConnectionProvider for ScriptSink {
    async fn connect(&self, _connection_string: &str) -> Result<Box<dyn SqlExecutor>> {
        Ok(Box::new(self.executor()))
    }

    fn with_database(&self, connection_string: &str, _database: &str) -> Result<String> {
        Ok(connection_string.to_string())
    }

    fn database_name(&self, _connection_string: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// [`SqlExecutor`] that appends statements to a script.
pub struct ScriptExecutor {
    writer: Arc<Mutex<ScriptWriter>>,
}

#[async_trait]
impl SqlExecutor for ScriptExecutor {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        if !params.is_empty() {
            return Err(MigrateError::Script(
                "a script cannot bind parameters; values must be inlined".to_string(),
            ));
        }
        self.writer.lock().await.write_statement(sql)?;
        Ok(0)
    }

    async fn query(&mut self, sql: &str, _params: &[SqlValue]) -> Result<QueryResult> {
        Err(MigrateError::Script(format!(
            "cannot run a query while writing a script: {}",
            sql.lines().next().unwrap_or_default()
        )))
    }

    fn supports_parameters(&self) -> bool {
        false
    }
}

/// Execute `statements` in order, naming the line range of a failure.
pub async fn replay(conn: &mut dyn SqlExecutor, statements: &[Statement]) -> Result<usize> {
    for (i, statement) in statements.iter().enumerate() {
        debug!(
            "Executing statement {} (lines {}-{})",
            i + 1,
            statement.start_line,
            statement.end_line
        );
        conn.execute(&statement.sql, &[]).await.map_err(|e| {
            MigrateError::Script(format!(
                "statement at lines {}-{} failed: {}",
                statement.start_line, statement.end_line, e
            ))
        })?;
    }
    info!("Replayed {} statements", statements.len());
    Ok(statements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::SharedBuffer;

    fn go() -> ScriptTokenizer {
        ScriptTokenizer::new("GO").unwrap()
    }

    fn sqls(statements: &[Statement]) -> Vec<&str> {
        statements.iter().map(|s| s.sql.as_str()).collect()
    }

    #[test]
    fn test_separator_inside_string_is_not_a_separator() {
        let stmts = go().split("INSERT INTO t VALUES ('GO')\nGO\n").unwrap();
        assert_eq!(sqls(&stmts), vec!["INSERT INTO t VALUES ('GO')"]);
    }

    #[test]
    fn test_separator_line_inside_multiline_string() {
        let script = "INSERT INTO t VALUES ('a\nGO\nb')\ngo\nSELECT 1\n";
        let stmts = go().split(script).unwrap();
        assert_eq!(sqls(&stmts), vec!["INSERT INTO t VALUES ('a\nGO\nb')", "SELECT 1"]);
        assert_eq!((stmts[0].start_line, stmts[0].end_line), (1, 3));
        assert_eq!((stmts[1].start_line, stmts[1].end_line), (5, 5));
    }

    #[test]
    fn test_separator_inside_comments_and_brackets() {
        let script = "/* header\nGO\n*/\nCREATE TABLE [GO\nx] (a int) -- GO\nGO\n";
        let stmts = go().split(script).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].sql.starts_with("CREATE TABLE [GO\nx]"));
    }

    #[test]
    fn test_nested_block_comment() {
        let stmts = go().split("/* a /* b */ GO */ SELECT 1\nGO").unwrap();
        assert_eq!(sqls(&stmts), vec!["/* a /* b */ GO */ SELECT 1"]);
    }

    #[test]
    fn test_doubled_quotes_and_crlf() {
        let stmts = go().split("SELECT 'it''s'\r\nGO\r\nSELECT 2\r\n").unwrap();
        assert_eq!(sqls(&stmts), vec!["SELECT 'it''s'", "SELECT 2"]);
    }

    #[test]
    fn test_leading_comment_lines_are_skipped() {
        let stmts = go().split("-- dump\n\n-- more\nSELECT 1\nGO\n\n").unwrap();
        assert_eq!(sqls(&stmts), vec!["SELECT 1"]);
        assert_eq!(stmts[0].start_line, 4);
    }

    #[test]
    fn test_terminator_separator() {
        let tokenizer = ScriptTokenizer::new(";").unwrap();
        let script = "CREATE TABLE t (a text DEFAULT ';');\nINSERT INTO t VALUES ('x;');  -- done;\nSELECT $f$ a; b $f$\n;\n";
        let stmts = tokenizer.split(script).unwrap();
        assert_eq!(
            sqls(&stmts),
            vec![
                "CREATE TABLE t (a text DEFAULT ';')",
                "INSERT INTO t VALUES ('x;')",
                "SELECT $f$ a; b $f$",
            ]
        );
    }

    #[test]
    fn test_terminators_sharing_a_line() {
        let tokenizer = ScriptTokenizer::new(";").unwrap();
        let script = "SELECT 1; SELECT ';'; SELECT
  3;;
SELECT 4; -- trailing; note
SELECT 5";
        let stmts = tokenizer.split(script).unwrap();
        assert_eq!(
            sqls(&stmts),
            vec!["SELECT 1", "SELECT ';'", "SELECT\n  3", "SELECT 4", "SELECT 5"]
        );
        assert_eq!((stmts[2].start_line, stmts[2].end_line), (1, 2));
        assert_eq!((stmts[4].start_line, stmts[4].end_line), (4, 4));
    }

    #[test]
    fn test_unterminated_string_reports_start_line() {
        let err = go().split("SELECT 1\nGO\nSELECT 'abc\n").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{}", err);
    }

    #[test]
    fn test_reader_without_progress_is_stuck() {
        fn idle(_: &mut Cursor, _: &mut String) -> Result<Span> {
            Ok(Span::Code)
        }
        let tokenizer = go().with_content_reader('#', idle);
        let err = tokenizer.split("SELECT 1\nSELECT #\n").unwrap_err();
        assert!(matches!(err, MigrateError::StuckScript { line: 2 }));
    }

    #[test]
    fn test_empty_separator_rejected() {
        assert!(ScriptTokenizer::new("  ").is_err());
        assert_eq!(Separator::parse(";").unwrap(), Separator::Terminator(';'));
        assert_eq!(Separator::parse("go").unwrap(), Separator::Line("go".into()));
    }

    #[tokio::test]
    async fn test_dump_output_tokenizes_back() {
        for separator in ["GO", ";"] {
            let buffer = SharedBuffer::default();
            let sink = ScriptSink::new(Box::new(buffer.clone()), separator).unwrap();
            sink.comment("generated").await.unwrap();
            let mut exec = sink.connect("").await.unwrap();
            assert!(!exec.supports_parameters());
            exec.execute("CREATE TABLE t (a varchar(10))", &[]).await.unwrap();
            exec.execute("INSERT INTO t VALUES ('GO;')", &[]).await.unwrap();
            exec.execute("SELECT 1 -- trailing", &[]).await.unwrap();
            assert!(exec.execute("x", &[SqlValue::I32(1)]).await.is_err());
            assert_eq!(sink.finish().await.unwrap(), 3);

            let stmts = ScriptTokenizer::new(separator)
                .unwrap()
                .split(&buffer.contents())
                .unwrap();
            assert_eq!(
                sqls(&stmts),
                vec![
                    "CREATE TABLE t (a varchar(10))",
                    "INSERT INTO t VALUES ('GO;')",
                    "SELECT 1 -- trailing",
                ],
                "separator {}",
                separator
            );
        }
    }

    #[tokio::test]
    async fn test_replay_names_failing_lines() {
        let engine = crate::testkit::MemoryEngine::new();
        let mut conn = engine.executor();
        let stmts = go()
            .split("CREATE TABLE t (id INT)\nGO\n\nBROKEN\nSTATEMENT\nGO\n")
            .unwrap();
        let err = replay(&mut conn, &stmts).await.unwrap_err();
        assert!(err.to_string().contains("lines 4-5"), "{}", err);
    }
}
