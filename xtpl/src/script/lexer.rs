//! Lexer for compiled artifacts
//!
//! An artifact is literal text with `<?tpl ... ?>` code islands. Text between
//! islands becomes a single [`Token::Text`]; the closing `?>` of an island
//! lexes as a statement terminator.

use crate::error::{ScriptSource, SyntaxError};

/// Opens a code island
pub const OPEN_TAG: &str = "<?tpl";
/// Closes a code island
pub const CLOSE_TAG: &str = "?>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Var(String),
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,
    Colon,
    Question,
    Arrow,
    FatArrow,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DotAssign,

    Eq,
    Ne,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    Inc,
    Dec,
    Not,
    AndAnd,
    OrOr,

    Eof,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Text(_) => "template text".to_string(),
            Token::Var(name) => format!("variable `${name}`"),
            Token::Ident(name) => format!("`{name}`"),
            Token::Int(i) => format!("number `{i}`"),
            Token::Float(f) => format!("number `{f}`"),
            Token::Str(_) => "string".to_string(),
            Token::Semi => "`;` or `?>`".to_string(),
            Token::Eof => "end of template".to_string(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Question => "?",
            Token::Arrow => "->",
            Token::FatArrow => "=>",
            Token::Assign => "=",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::DotAssign => ".=",
            Token::Eq => "==",
            Token::Ne => "!=",
            Token::Identical => "===",
            Token::NotIdentical => "!==",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Dot => ".",
            Token::Inc => "++",
            Token::Dec => "--",
            Token::Not => "!",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

// Longest first so `===` wins over `==` and `=`
const OPERATORS: &[(&str, Token)] = &[
    ("===", Token::Identical),
    ("!==", Token::NotIdentical),
    ("==", Token::Eq),
    ("!=", Token::Ne),
    ("<>", Token::Ne),
    ("<=", Token::Le),
    (">=", Token::Ge),
    ("=>", Token::FatArrow),
    ("->", Token::Arrow),
    ("++", Token::Inc),
    ("--", Token::Dec),
    ("+=", Token::PlusAssign),
    ("-=", Token::MinusAssign),
    ("*=", Token::StarAssign),
    ("/=", Token::SlashAssign),
    (".=", Token::DotAssign),
    ("&&", Token::AndAnd),
    ("||", Token::OrOr),
    ("(", Token::LParen),
    (")", Token::RParen),
    ("{", Token::LBrace),
    ("}", Token::RBrace),
    ("[", Token::LBracket),
    ("]", Token::RBracket),
    (";", Token::Semi),
    (",", Token::Comma),
    (":", Token::Colon),
    ("?", Token::Question),
    ("=", Token::Assign),
    ("<", Token::Lt),
    (">", Token::Gt),
    ("+", Token::Plus),
    ("-", Token::Minus),
    ("*", Token::Star),
    ("/", Token::Slash),
    ("%", Token::Percent),
    (".", Token::Dot),
    ("!", Token::Not),
];

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    in_code: bool,
    source: &'a ScriptSource,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a ScriptSource) -> Self {
        Self {
            input: source.source.as_str(),
            pos: 0,
            in_code: false,
            source,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            let next = if self.in_code {
                self.next_code_token()?
            } else {
                self.next_text_token()
            };
            let Some(spanned) = next else { continue };
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn error(&self, found: impl Into<String>, expected: &str, start: usize) -> SyntaxError {
        let end = (start + 1).min(self.input.len());
        SyntaxError {
            found: found.into(),
            expected: expected.to_string(),
            span: (start, end.saturating_sub(start)).into(),
            src: self.source.named_source(),
        }
    }

    fn spanned(&self, token: Token, start: usize) -> Option<Spanned> {
        Some(Spanned {
            token,
            span: Span {
                start,
                end: self.pos,
            },
        })
    }

    /// Text up to the next island; `None` when an island starts right here
    fn next_text_token(&mut self) -> Option<Spanned> {
        let start = self.pos;
        if start >= self.input.len() {
            return self.spanned(Token::Eof, start);
        }
        match self.rest().find(OPEN_TAG) {
            Some(0) => {
                self.pos += OPEN_TAG.len();
                self.in_code = true;
                None
            }
            Some(idx) => {
                self.pos += idx;
                self.spanned(Token::Text(self.input[start..self.pos].to_string()), start)
            }
            None => {
                self.pos = self.input.len();
                self.spanned(Token::Text(self.input[start..].to_string()), start)
            }
        }
    }

    fn next_code_token(&mut self) -> Result<Option<Spanned>, SyntaxError> {
        self.skip_trivia();
        let start = self.pos;
        let rest = self.rest();
        let Some(c) = rest.chars().next() else {
            return Err(self.error("end of template", "`?>`", start));
        };

        if rest.starts_with(CLOSE_TAG) {
            self.pos += CLOSE_TAG.len();
            self.in_code = false;
            return Ok(self.spanned(Token::Semi, start));
        }

        if c == '$' {
            let name_len = ident_len(&rest[1..]);
            if name_len == 0 {
                return Err(self.error("`$`", "a variable name", start));
            }
            self.pos += 1 + name_len;
            let name = rest[1..1 + name_len].to_string();
            return Ok(self.spanned(Token::Var(name), start));
        }

        if c.is_ascii_digit() {
            return self.lex_number(start).map(Some);
        }

        if c == '\'' || c == '"' {
            return self.lex_string(c, start).map(Some);
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '\\' {
            return Ok(Some(self.lex_ident(start)));
        }

        for (text, token) in OPERATORS {
            if rest.starts_with(text) {
                self.pos += text.len();
                return Ok(self.spanned(token.clone(), start));
            }
        }

        Err(self.error(format!("character `{c}`"), "an expression", start))
    }

    fn skip_trivia(&mut self) {
        loop {
            let rest = self.rest();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("//") || trimmed.starts_with('#') {
                // line comments end at a newline or at the island close
                let end = match (trimmed.find('\n'), trimmed.find(CLOSE_TAG)) {
                    (Some(nl), Some(close)) => nl.min(close),
                    (Some(nl), None) => nl,
                    (None, Some(close)) => close,
                    (None, None) => trimmed.len(),
                };
                self.pos += end;
            } else if let Some(body) = trimmed.strip_prefix("/*") {
                self.pos += body.find("*/").map_or(trimmed.len(), |end| end + 4);
            } else {
                return;
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<Spanned, SyntaxError> {
        let bytes = self.input.as_bytes();
        let mut end = self.pos;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let mut is_float = false;
        if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
            is_float = true;
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
        let text = &self.input[start..end];
        self.pos = end;
        let token = if is_float {
            text.parse().map(Token::Float).ok()
        } else {
            text.parse().map(Token::Int).ok()
        };
        token
            .and_then(|t| self.spanned(t, start))
            .ok_or_else(|| self.error(format!("number `{text}`"), "a valid number", start))
    }

    fn lex_string(&mut self, quote: char, start: usize) -> Result<Spanned, SyntaxError> {
        let mut value = String::new();
        let mut chars = self.input[start + 1..].char_indices();
        while let Some((i, c)) = chars.next() {
            if c == quote {
                self.pos = start + 1 + i + 1;
                return Ok(Spanned {
                    token: Token::Str(value),
                    span: Span {
                        start,
                        end: self.pos,
                    },
                });
            }
            if c != '\\' {
                value.push(c);
                continue;
            }
            let Some((_, escaped)) = chars.next() else {
                break;
            };
            match (quote, escaped) {
                (_, '\\') => value.push('\\'),
                (q, e) if q == e => value.push(e),
                ('"', 'n') => value.push('\n'),
                ('"', 't') => value.push('\t'),
                ('"', 'r') => value.push('\r'),
                ('"', '$') => value.push('$'),
                (_, other) => {
                    value.push('\\');
                    value.push(other);
                }
            }
        }
        Err(self.error("unterminated string", "a closing quote", start))
    }

    /// Identifiers, including `Class::member` and `\Namespaced\Name`
    fn lex_ident(&mut self, start: usize) -> Spanned {
        let bytes = self.input.as_bytes();
        let mut end = self.pos;
        loop {
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_' || bytes[end] == b'\\')
            {
                end += 1;
            }
            if self.input[end..].starts_with("::") {
                let after = &self.input[end + 2..];
                let skip_dollar = usize::from(after.starts_with('$'));
                let len = ident_len(&after[skip_dollar..]);
                if len > 0 {
                    end += 2 + skip_dollar + len;
                    continue;
                }
            }
            break;
        }
        self.pos = end;
        Spanned {
            token: Token::Ident(self.input[start..end].to_string()),
            span: Span { start, end },
        }
    }
}

/// Length of a `[A-Za-z_][A-Za-z0-9_]*` run at the start of `s`
fn ident_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return 0,
    }
    bytes
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<Token> {
        let source = ScriptSource::new("test", src);
        Lexer::new(&source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn text_only() {
        assert_eq!(
            lex("<p>hi</p>"),
            vec![Token::Text("<p>hi</p>".into()), Token::Eof]
        );
    }

    #[test]
    fn island_close_is_a_terminator() {
        assert_eq!(
            lex("a<?tpl echo $__ctx->x ?>b"),
            vec![
                Token::Text("a".into()),
                Token::Ident("echo".into()),
                Token::Var("__ctx".into()),
                Token::Arrow,
                Token::Ident("x".into()),
                Token::Semi,
                Token::Text("b".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn operators_longest_match() {
        assert_eq!(
            lex("<?tpl $a === 1 => .= ?>"),
            vec![
                Token::Var("a".into()),
                Token::Identical,
                Token::Int(1),
                Token::FatArrow,
                Token::DotAssign,
                Token::Semi,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex(r#"<?tpl 'it\'s \n' "a\n\"b" ?>"#),
            vec![
                Token::Str("it's \\n".into()),
                Token::Str("a\n\"b".into()),
                Token::Semi,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn qualified_identifiers_and_numbers() {
        assert_eq!(
            lex("<?tpl Context::getLang(1.5) ?>"),
            vec![
                Token::Ident("Context::getLang".into()),
                Token::LParen,
                Token::Float(1.5),
                Token::RParen,
                Token::Semi,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comments_stop_at_island_close() {
        assert_eq!(
            lex("<?tpl // note ?>x"),
            vec![Token::Semi, Token::Text("x".into()), Token::Eof]
        );
    }

    #[test]
    fn unterminated_island_is_an_error() {
        let source = ScriptSource::new("test", "<?tpl echo 1");
        assert!(Lexer::new(&source).tokenize().is_err());
    }
}
