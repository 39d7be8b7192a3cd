use super::token::*;
use super::Error;

type Result<T> = std::result::Result<T, Error>;

/// Tokenize a whole source text. Comments are dropped unless
/// `preserve_comments` is set (the `#Meta:` extractor upstream wants
/// them). Line and column tracking is exact and 1-based; every
/// downstream error and the source map depend on it.
pub fn tokenize(source: &str, preserve_comments: bool) -> Result<Vec<Token>> {
    Lexer::new(source, preserve_comments).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    preserve_comments: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str, preserve_comments: bool) -> Lexer<'a> {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
            preserve_comments,
            tokens: vec![],
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while let Some(&ch) = self.chars.peek() {
            let (line, column) = (self.line, self.column);
            match ch {
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '\n' => {
                    self.bump();
                    self.push(TokenKind::Newline, line, column);
                }
                '\'' | '#' => {
                    self.bump();
                    self.comment(line, column);
                }
                '"' => self.string(line, column)?,
                '0'..='9' => self.number(line, column)?,
                _ if ch.is_ascii_alphabetic() || ch == '_' => self.alphabetic(line, column),
                _ => self.operator(line, column)?,
            }
        }
        Ok(self.tokens)
    }

    fn comment(&mut self, line: usize, column: usize) {
        let mut text = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.bump();
        }
        if self.preserve_comments {
            self.push(TokenKind::Comment(text.trim().to_string()), line, column);
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<()> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.chars.peek() {
                None | Some('\n') => {
                    return Err(error!(UnterminatedString, line).in_column(column))
                }
                Some('"') => {
                    self.bump();
                    self.push(TokenKind::Str(s), line, column);
                    return Ok(());
                }
                Some(&ch) => {
                    s.push(ch);
                    self.bump();
                }
            }
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<()> {
        let mut s = String::new();
        let mut decimal = false;
        let mut exponent = false;
        while let Some(&ch) = self.chars.peek() {
            match ch {
                '0'..='9' => s.push(ch),
                '.' if !decimal && !exponent => {
                    decimal = true;
                    s.push(ch);
                }
                'e' | 'E' if !exponent && !s.is_empty() => {
                    exponent = true;
                    s.push(ch);
                    self.bump();
                    if let Some(&sign) = self.chars.peek() {
                        if sign == '+' || sign == '-' {
                            s.push(sign);
                            self.bump();
                        }
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }
        match s.parse::<f64>() {
            Ok(n) => {
                self.push(TokenKind::Number(n), line, column);
                Ok(())
            }
            Err(_) => Err(error!(SyntaxError, line; "MALFORMED NUMBER").in_column(column)),
        }
    }

    fn alphabetic(&mut self, line: usize, column: usize) {
        let mut s = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                s.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        if let Some(op) = Operator::from_word(&s) {
            self.push(TokenKind::Operator(op), line, column);
        } else if let Some(word) = Word::from_str(&s) {
            if word == Word::Rem {
                self.comment(line, column);
            } else {
                self.push(TokenKind::Word(word), line, column);
            }
        } else {
            self.push(TokenKind::Ident(s), line, column);
        }
    }

    /// Two-character forms must win before single characters so that
    /// `<=` never splits into `<` then `=`.
    fn operator(&mut self, line: usize, column: usize) -> Result<()> {
        use Operator::*;
        let first = self.bump().expect("peeked");
        let second = self.chars.peek().copied();
        let two = |this: &mut Lexer, op| {
            this.bump();
            Some(op)
        };
        let op = match (first, second) {
            ('=', Some('=')) => two(self, EqEq),
            ('!', Some('=')) => two(self, NotEq),
            ('<', Some('>')) => two(self, NotEq),
            ('<', Some('=')) => two(self, LtEq),
            ('>', Some('=')) => two(self, GtEq),
            ('<', Some('<')) => two(self, Shl),
            ('>', Some('>')) => two(self, Shr),
            ('+', Some('=')) => two(self, AddAssign),
            ('-', Some('=')) => two(self, SubAssign),
            ('*', Some('=')) => two(self, MulAssign),
            ('/', Some('=')) => two(self, DivAssign),
            ('+', Some('+')) => two(self, Incr),
            ('-', Some('-')) => two(self, Decr),
            ('=', _) => Some(Eq),
            ('<', _) => Some(Lt),
            ('>', _) => Some(Gt),
            ('+', _) => Some(Add),
            ('-', _) => Some(Sub),
            ('*', _) => Some(Mul),
            ('/', _) => Some(Div),
            ('^', _) => Some(Pow),
            ('&', _) => Some(BitAnd),
            ('|', _) => Some(BitOr),
            ('~', _) => Some(BitNot),
            _ => None,
        };
        let kind = match op {
            Some(op) => TokenKind::Operator(op),
            None => match first {
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                '.' => TokenKind::Dot,
                '?' => TokenKind::Question,
                _ => return Err(error!(InvalidCharacter, line).in_column(column)),
            },
        };
        self.push(kind, line, column);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, false)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_compound_operators_win() {
        assert_eq!(
            kinds("a <= b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Operator(Operator::LtEq),
                TokenKind::Ident("b".into()),
            ]
        );
        assert_eq!(
            kinds("x <> y"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Operator(Operator::NotEq),
                TokenKind::Ident("y".into()),
            ]
        );
        assert_eq!(kinds("i++")[1], TokenKind::Operator(Operator::Incr));
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = tokenize("VAR x = 1\n  y = 2", false).unwrap();
        let y = tokens.iter().find(|t| t.kind == TokenKind::Ident("y".into()));
        let y = y.unwrap();
        assert_eq!((y.line, y.column), (2, 3));
    }

    #[test]
    fn test_comment_modes() {
        assert!(kinds("# hello\n")
            .iter()
            .all(|k| !matches!(k, TokenKind::Comment(_))));
        let preserved = tokenize("# Meta: name\n", true).unwrap();
        assert_eq!(
            preserved[0].kind,
            TokenKind::Comment("Meta: name".to_string())
        );
        assert!(kinds("rem old school comment").is_empty());
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("DEVICE s \"StructureGas", false).is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("373.15")[0], TokenKind::Number(373.15));
        assert_eq!(kinds("1e3")[0], TokenKind::Number(1000.0));
        assert_eq!(kinds("2E-2")[0], TokenKind::Number(0.02));
    }
}
