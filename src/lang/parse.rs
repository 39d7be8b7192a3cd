use super::ast::*;
use super::token::{Operator, Token, TokenKind, Word};
use super::Error;
use std::collections::HashSet;

type Result<T> = std::result::Result<T, Error>;

/// Parse a token stream into a [`Program`]. Recursive descent with
/// operator-precedence expression parsing; stops at the first
/// structural error. Array declarations are tracked incidentally so
/// `name(expr)` can be told apart from a function call while parsing.
pub fn parse(tokens: &[Token]) -> Result<Program> {
    Parser::new(tokens).run()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    arrays: HashSet<String>,
}

/// Block terminators. Two-word forms (`END SUB`) are matched as a pair.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Ender {
    Endif,
    Else,
    Elseif,
    Wend,
    Next,
    Loop,
    Case,
    Default,
    EndSub,
    EndFunction,
    EndSelect,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Parser<'a> {
        Parser {
            tokens,
            pos: 0,
            arrays: HashSet::new(),
        }
    }

    fn run(mut self) -> Result<Program> {
        let mut statements = vec![];
        loop {
            self.skip_newlines();
            if self.peek().is_none() {
                return Ok(Program { statements });
            }
            statements.push(self.statement()?);
            self.end_of_statement()?;
        }
    }

    // *** Token plumbing

    fn peek(&self) -> Option<&'a TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn line(&self) -> usize {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(token) => token.line,
            None => 1,
        }
    }

    fn skip_newlines(&mut self) {
        while let Some(TokenKind::Newline) | Some(TokenKind::Comment(_)) = self.peek() {
            self.pos += 1;
        }
    }

    fn at_word(&self, word: Word) -> bool {
        self.peek() == Some(&TokenKind::Word(word))
    }

    fn eat_word(&mut self, word: Word) -> bool {
        if self.at_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: Word) -> Result<()> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(error!(SyntaxError, self.line(); "EXPECTED KEYWORD"))
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        if self.peek() == Some(&kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(error!(SyntaxError, self.line(); "UNEXPECTED TOKEN"))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                self.pos += 1;
                Ok(name.clone())
            }
            _ => Err(error!(SyntaxError, self.line(); "EXPECTED IDENTIFIER")),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let negative = matches!(self.peek(), Some(TokenKind::Operator(Operator::Sub)));
        if negative {
            self.pos += 1;
        }
        match self.peek() {
            Some(TokenKind::Number(n)) => {
                self.pos += 1;
                Ok(if negative { -n } else { *n })
            }
            _ => Err(error!(SyntaxError, self.line(); "EXPECTED NUMBER")),
        }
    }

    fn end_of_statement(&mut self) -> Result<()> {
        match self.peek() {
            None | Some(TokenKind::Newline) | Some(TokenKind::Comment(_)) => Ok(()),
            _ => Err(error!(SyntaxError, self.line(); "EXPECTED END OF LINE")),
        }
    }

    // *** Blocks

    /// True when the upcoming token(s) close a block with one of the
    /// given enders. Does not consume.
    fn at_ender(&self, enders: &[Ender]) -> Option<Ender> {
        for &ender in enders {
            let hit = match ender {
                Ender::Endif => self.at_word(Word::Endif),
                Ender::Else => self.at_word(Word::Else),
                Ender::Elseif => self.at_word(Word::Elseif),
                Ender::Wend => self.at_word(Word::Wend),
                Ender::Next => self.at_word(Word::Next),
                Ender::Loop => self.at_word(Word::Loop),
                Ender::Case => self.at_word(Word::Case),
                Ender::Default => self.at_word(Word::Default),
                Ender::EndSub => self.at_end_pair(Word::Sub),
                Ender::EndFunction => self.at_end_pair(Word::Function),
                Ender::EndSelect => self.at_end_pair(Word::Select),
            };
            if hit {
                return Some(ender);
            }
        }
        None
    }

    fn at_end_pair(&self, word: Word) -> bool {
        self.at_word(Word::End) && self.peek_at(1) == Some(&TokenKind::Word(word))
    }

    fn eat_end_pair(&mut self, word: Word) {
        debug_assert!(self.at_end_pair(word));
        self.pos += 2;
    }

    fn block(&mut self, enders: &[Ender]) -> Result<(Vec<Statement>, Ender)> {
        let open_line = self.line();
        let mut statements = vec![];
        loop {
            self.skip_newlines();
            if self.peek().is_none() {
                return Err(error!(UnclosedBlock, open_line));
            }
            if let Some(ender) = self.at_ender(enders) {
                return Ok((statements, ender));
            }
            statements.push(self.statement()?);
            if self.at_ender(enders).is_none() {
                self.end_of_statement()?;
            }
        }
    }

    // *** Statements

    fn statement(&mut self) -> Result<Statement> {
        let line = self.line();
        match self.peek() {
            Some(TokenKind::Word(word)) => {
                let word = *word;
                match word {
                    Word::Var | Word::Let => {
                        self.pos += 1;
                        self.r#var(line)
                    }
                    Word::Const => {
                        self.pos += 1;
                        self.r#const(line)
                    }
                    Word::Define => {
                        self.pos += 1;
                        self.r#define(line)
                    }
                    Word::Alias => {
                        self.pos += 1;
                        self.r#alias(line)
                    }
                    Word::Device => {
                        self.pos += 1;
                        self.r#device(line)
                    }
                    Word::Dim => {
                        self.pos += 1;
                        self.r#dim(line)
                    }
                    Word::If => {
                        self.pos += 1;
                        self.r#if(line)
                    }
                    Word::While => {
                        self.pos += 1;
                        self.r#while(line)
                    }
                    Word::Do => {
                        self.pos += 1;
                        self.r#do(line)
                    }
                    Word::For => {
                        self.pos += 1;
                        self.r#for(line)
                    }
                    Word::Select => {
                        self.pos += 1;
                        self.r#select(line)
                    }
                    Word::Goto => {
                        self.pos += 1;
                        Ok(Statement::Goto(line, self.ident()?))
                    }
                    Word::Gosub => {
                        self.pos += 1;
                        Ok(Statement::Gosub(line, self.ident()?))
                    }
                    Word::Return => {
                        self.pos += 1;
                        self.r#return(line)
                    }
                    Word::Sub => {
                        self.pos += 1;
                        self.r#sub(line)
                    }
                    Word::Function => {
                        self.pos += 1;
                        self.r#function(line)
                    }
                    Word::Call => {
                        self.pos += 1;
                        self.r#call(line)
                    }
                    Word::Break => {
                        self.pos += 1;
                        Ok(Statement::Break(line))
                    }
                    Word::Continue => {
                        self.pos += 1;
                        Ok(Statement::Continue(line))
                    }
                    Word::Push => {
                        self.pos += 1;
                        Ok(Statement::Push(line, self.expression()?))
                    }
                    Word::Pop => {
                        self.pos += 1;
                        let target = self.target()?;
                        Ok(Statement::Pop(line, target))
                    }
                    Word::Peek => {
                        self.pos += 1;
                        let target = self.target()?;
                        Ok(Statement::Peek(line, target))
                    }
                    Word::Print => {
                        self.pos += 1;
                        Ok(Statement::Print(line, self.expression()?))
                    }
                    Word::BatchWrite => {
                        self.pos += 1;
                        self.batch_write(line)
                    }
                    Word::Yield => {
                        self.pos += 1;
                        Ok(Statement::Yield(line))
                    }
                    Word::Sleep => {
                        self.pos += 1;
                        Ok(Statement::Sleep(line, self.expression()?))
                    }
                    Word::Wait => {
                        self.pos += 1;
                        self.expect(TokenKind::LParen)?;
                        let seconds = self.expression()?;
                        self.expect(TokenKind::RParen)?;
                        Ok(Statement::Sleep(line, seconds))
                    }
                    Word::End => {
                        self.pos += 1;
                        Ok(Statement::End(line))
                    }
                    _ => Err(error!(SyntaxError, line; "EXPECTED STATEMENT")),
                }
            }
            Some(TokenKind::Ident(_)) => {
                if self.peek_at(1) == Some(&TokenKind::Colon) {
                    let name = self.ident()?;
                    self.pos += 1;
                    return Ok(Statement::Label(line, name));
                }
                self.assignment(line)
            }
            Some(TokenKind::Operator(Operator::Incr)) => {
                self.pos += 1;
                let name = self.ident()?;
                Ok(Statement::Assign(
                    line,
                    Target::Var(name),
                    AssignOp::Add,
                    Expression::Number(1.0),
                ))
            }
            Some(TokenKind::Operator(Operator::Decr)) => {
                self.pos += 1;
                let name = self.ident()?;
                Ok(Statement::Assign(
                    line,
                    Target::Var(name),
                    AssignOp::Sub,
                    Expression::Number(1.0),
                ))
            }
            _ => Err(error!(SyntaxError, line; "EXPECTED STATEMENT")),
        }
    }

    fn r#var(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        let init = if matches!(
            self.peek(),
            Some(TokenKind::Operator(Operator::Eq | Operator::EqEq))
        ) {
            self.pos += 1;
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Statement::Var(line, name, init))
    }

    fn r#const(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        self.expect(TokenKind::Operator(Operator::Eq))?;
        Ok(Statement::Const(line, name, self.expression()?))
    }

    fn r#define(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        Ok(Statement::Define(line, name, self.number()?))
    }

    fn r#alias(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        if self.eat_word(Word::This) {
            return Ok(Statement::Alias(line, name, AliasTarget::Housing));
        }
        let pin = self.ident()?;
        match parse_pin(&pin) {
            Some(target) => Ok(Statement::Alias(line, name, target)),
            None => Err(error!(SyntaxError, line; "EXPECTED DEVICE PIN")),
        }
    }

    fn r#device(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        let prefab = match self.peek() {
            Some(TokenKind::Str(s)) => {
                self.pos += 1;
                s.clone()
            }
            _ => return Err(error!(SyntaxError, line; "EXPECTED PREFAB NAME")),
        };
        let label = match self.peek() {
            Some(TokenKind::Str(s)) => {
                self.pos += 1;
                Some(s.clone())
            }
            _ => None,
        };
        Ok(Statement::Device(line, name, prefab, label))
    }

    fn r#dim(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        self.expect(TokenKind::LParen)?;
        let size = self.number()?;
        self.expect(TokenKind::RParen)?;
        if size < 1.0 || size.fract() != 0.0 {
            return Err(error!(SyntaxError, line; "ARRAY SIZE MUST BE A POSITIVE INTEGER"));
        }
        self.arrays.insert(name.clone());
        Ok(Statement::Dim(line, name, size as usize))
    }

    fn r#if(&mut self, line: usize) -> Result<Statement> {
        let condition = self.expression()?;
        self.expect_word(Word::Then)?;
        if !matches!(
            self.peek(),
            Some(TokenKind::Newline) | Some(TokenKind::Comment(_)) | None
        ) {
            // single-line form: IF cond THEN statement
            let body = vec![self.statement()?];
            return Ok(Statement::If(line, vec![(condition, body)], vec![]));
        }
        let mut arms = vec![];
        let mut condition = condition;
        let else_body = loop {
            let (body, ender) = self.block(&[Ender::Endif, Ender::Else, Ender::Elseif])?;
            arms.push((condition, body));
            match ender {
                Ender::Endif => {
                    self.pos += 1;
                    break vec![];
                }
                Ender::Elseif => {
                    self.pos += 1;
                    condition = self.expression()?;
                    self.expect_word(Word::Then)?;
                }
                Ender::Else => {
                    self.pos += 1;
                    let (body, _) = self.block(&[Ender::Endif])?;
                    self.pos += 1;
                    break body;
                }
                _ => unreachable!(),
            }
        };
        Ok(Statement::If(line, arms, else_body))
    }

    fn r#while(&mut self, line: usize) -> Result<Statement> {
        let condition = self.expression()?;
        let (body, _) = self.block(&[Ender::Wend])?;
        self.pos += 1;
        Ok(Statement::While(line, condition, body))
    }

    fn r#do(&mut self, line: usize) -> Result<Statement> {
        let (body, _) = self.block(&[Ender::Loop])?;
        self.pos += 1;
        let test = if self.eat_word(Word::Until) {
            Some((LoopTest::Until, self.expression()?))
        } else if self.eat_word(Word::While) {
            Some((LoopTest::While, self.expression()?))
        } else {
            None
        };
        Ok(Statement::DoLoop(line, body, test))
    }

    fn r#for(&mut self, line: usize) -> Result<Statement> {
        let var = self.ident()?;
        self.expect(TokenKind::Operator(Operator::Eq))?;
        let from = self.expression()?;
        self.expect_word(Word::To)?;
        let to = self.expression()?;
        let step = if self.eat_word(Word::Step) {
            Some(self.expression()?)
        } else {
            None
        };
        let (body, _) = self.block(&[Ender::Next])?;
        self.pos += 1;
        if let Some(TokenKind::Ident(name)) = self.peek() {
            if *name != var {
                return Err(error!(SyntaxError, self.line(); "NEXT WITHOUT FOR"));
            }
            self.pos += 1;
        }
        Ok(Statement::For(line, var, from, to, step, body))
    }

    fn r#select(&mut self, line: usize) -> Result<Statement> {
        self.expect_word(Word::Case)?;
        let subject = self.expression()?;
        let mut cases = vec![];
        let mut default = vec![];
        // skip to the first CASE arm
        let (lead, mut ender) = self.block(&[Ender::Case, Ender::Default, Ender::EndSelect])?;
        if !lead.is_empty() {
            return Err(error!(SyntaxError, line; "EXPECTED CASE"));
        }
        loop {
            match ender {
                Ender::EndSelect => {
                    self.eat_end_pair(Word::Select);
                    return Ok(Statement::Select(line, subject, cases, default));
                }
                Ender::Default => {
                    self.pos += 1;
                    let (body, next) =
                        self.block(&[Ender::Case, Ender::Default, Ender::EndSelect])?;
                    if next != Ender::EndSelect {
                        return Err(error!(SyntaxError, self.line(); "CASE AFTER DEFAULT"));
                    }
                    default = body;
                    ender = next;
                }
                Ender::Case => {
                    self.pos += 1;
                    if self.eat_word(Word::Else) {
                        // CASE ELSE is the same arm as DEFAULT
                        let (body, next) =
                            self.block(&[Ender::Case, Ender::Default, Ender::EndSelect])?;
                        if next != Ender::EndSelect {
                            return Err(error!(SyntaxError, self.line(); "CASE AFTER DEFAULT"));
                        }
                        default = body;
                        ender = next;
                        continue;
                    }
                    let mut values = vec![self.expression()?];
                    while self.peek() == Some(&TokenKind::Comma) {
                        self.pos += 1;
                        values.push(self.expression()?);
                    }
                    let (body, next) =
                        self.block(&[Ender::Case, Ender::Default, Ender::EndSelect])?;
                    cases.push((values, body));
                    ender = next;
                }
                _ => unreachable!(),
            }
        }
    }

    fn r#return(&mut self, line: usize) -> Result<Statement> {
        match self.peek() {
            None | Some(TokenKind::Newline) | Some(TokenKind::Comment(_)) => {
                Ok(Statement::Return(line, None))
            }
            _ => Ok(Statement::Return(line, Some(self.expression()?))),
        }
    }

    fn r#sub(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        let (body, _) = self.block(&[Ender::EndSub])?;
        self.eat_end_pair(Word::Sub);
        Ok(Statement::Sub(line, name, body))
    }

    fn r#function(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = vec![];
        if self.peek() != Some(&TokenKind::RParen) {
            loop {
                params.push(self.ident()?);
                if self.peek() == Some(&TokenKind::Comma) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let (body, _) = self.block(&[Ender::EndFunction])?;
        self.eat_end_pair(Word::Function);
        Ok(Statement::Function(line, name, params, body))
    }

    fn r#call(&mut self, line: usize) -> Result<Statement> {
        let name = self.ident()?;
        let mut args = vec![];
        if self.peek() == Some(&TokenKind::LParen) {
            self.pos += 1;
            if self.peek() != Some(&TokenKind::RParen) {
                loop {
                    args.push(self.expression()?);
                    if self.peek() == Some(&TokenKind::Comma) {
                        self.pos += 1;
                        continue;
                    }
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }
        Ok(Statement::Call(line, name, args))
    }

    fn batch_write(&mut self, line: usize) -> Result<Statement> {
        self.expect(TokenKind::LParen)?;
        let type_hash = self.expression()?;
        self.expect(TokenKind::Comma)?;
        let property = self.property_name()?;
        self.expect(TokenKind::Comma)?;
        let value = self.expression()?;
        self.expect(TokenKind::RParen)?;
        Ok(Statement::BatchWrite(line, type_hash, property, value))
    }

    /// Assignment, compound assignment, `x++`/`x--`, or a bare
    /// subroutine/function call in statement position.
    fn assignment(&mut self, line: usize) -> Result<Statement> {
        // bare call: name or name(...) followed by end of line
        if let (Some(TokenKind::Ident(name)), Some(TokenKind::LParen)) =
            (self.peek(), self.peek_at(1))
        {
            if !self.arrays.contains(name) {
                let checkpoint = self.pos;
                if let Ok(statement) = self.r#call(line) {
                    if self.end_of_statement().is_ok() {
                        return Ok(statement);
                    }
                }
                self.pos = checkpoint;
            }
        }
        let target = self.target()?;
        let op = match self.peek() {
            Some(TokenKind::Operator(Operator::Eq | Operator::EqEq)) => AssignOp::Set,
            Some(TokenKind::Operator(Operator::AddAssign)) => AssignOp::Add,
            Some(TokenKind::Operator(Operator::SubAssign)) => AssignOp::Sub,
            Some(TokenKind::Operator(Operator::MulAssign)) => AssignOp::Mul,
            Some(TokenKind::Operator(Operator::DivAssign)) => AssignOp::Div,
            Some(TokenKind::Operator(Operator::Incr)) => {
                self.pos += 1;
                return Ok(Statement::Assign(
                    line,
                    target,
                    AssignOp::Add,
                    Expression::Number(1.0),
                ));
            }
            Some(TokenKind::Operator(Operator::Decr)) => {
                self.pos += 1;
                return Ok(Statement::Assign(
                    line,
                    target,
                    AssignOp::Sub,
                    Expression::Number(1.0),
                ));
            }
            _ => return Err(error!(SyntaxError, line; "EXPECTED ASSIGNMENT")),
        };
        self.pos += 1;
        Ok(Statement::Assign(line, target, op, self.expression()?))
    }

    fn target(&mut self) -> Result<Target> {
        let name = self.ident()?;
        if name == "IC" && self.peek() == Some(&TokenKind::Dot) {
            let (type_hash, name_hash, property) = self.named_device_path()?;
            return Ok(Target::NamedProp(
                Box::new(type_hash),
                Box::new(name_hash),
                property,
            ));
        }
        match self.peek() {
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let index = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(Target::Index(name, Box::new(index)))
            }
            Some(TokenKind::Dot) => {
                self.pos += 1;
                let property = self.property_name()?;
                if property == "Slot" && self.peek() == Some(&TokenKind::LParen) {
                    self.pos += 1;
                    let slot = self.expression()?;
                    self.expect(TokenKind::RParen)?;
                    self.expect(TokenKind::Dot)?;
                    let property = self.property_name()?;
                    return Ok(Target::SlotProp(name, Box::new(slot), property));
                }
                Ok(Target::Prop(name, property))
            }
            _ => Ok(Target::Var(name)),
        }
    }

    fn property_name(&mut self) -> Result<String> {
        match self.peek() {
            Some(TokenKind::Ident(name)) => {
                self.pos += 1;
                Ok(name.clone())
            }
            _ => Err(error!(SyntaxError, self.line(); "EXPECTED PROPERTY NAME")),
        }
    }

    /// `IC.Device[type].Name[label].Property` — the dot and the leading
    /// `IC` are already consumed up to the first Dot.
    fn named_device_path(&mut self) -> Result<(Expression, Expression, String)> {
        self.expect(TokenKind::Dot)?;
        self.expect_word(Word::Device)?;
        self.expect(TokenKind::LBracket)?;
        let type_hash = self.expression()?;
        self.expect(TokenKind::RBracket)?;
        self.expect(TokenKind::Dot)?;
        let name_word = self.property_name()?;
        if name_word != "Name" {
            return Err(error!(SyntaxError, self.line(); "EXPECTED NAME SEGMENT"));
        }
        self.expect(TokenKind::LBracket)?;
        let name_hash = self.expression()?;
        self.expect(TokenKind::RBracket)?;
        self.expect(TokenKind::Dot)?;
        let property = self.property_name()?;
        Ok((type_hash, name_hash, property))
    }

    // *** Expressions

    fn expression(&mut self) -> Result<Expression> {
        let condition = self.binary(0)?;
        if self.peek() == Some(&TokenKind::Question) {
            self.pos += 1;
            let then_value = self.expression()?;
            self.expect(TokenKind::Colon)?;
            let else_value = self.expression()?;
            return Ok(Expression::Ternary(
                Box::new(condition),
                Box::new(then_value),
                Box::new(else_value),
            ));
        }
        Ok(condition)
    }

    fn binary(&mut self, min_precedence: usize) -> Result<Expression> {
        let mut lhs = self.unary()?;
        while let Some(TokenKind::Operator(op)) = self.peek() {
            let (precedence, bin_op) = match binary_op(*op) {
                Some(entry) => entry,
                None => break,
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            // power is right-associative, everything else left
            let next_min = if bin_op == BinOp::Pow {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.binary(next_min)?;
            lhs = Expression::Binary(bin_op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expression> {
        match self.peek() {
            Some(TokenKind::Operator(Operator::Sub)) => {
                self.pos += 1;
                Ok(Expression::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(TokenKind::Operator(Operator::Not)) => {
                self.pos += 1;
                Ok(Expression::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Some(TokenKind::Operator(Operator::BitNot)) => {
                self.pos += 1;
                Ok(Expression::Unary(UnaryOp::BitNot, Box::new(self.unary()?)))
            }
            Some(TokenKind::Operator(Operator::Incr)) => {
                self.pos += 1;
                Ok(Expression::PreModify(self.ident()?, 1.0))
            }
            Some(TokenKind::Operator(Operator::Decr)) => {
                self.pos += 1;
                Ok(Expression::PreModify(self.ident()?, -1.0))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expression> {
        let line = self.line();
        match self.peek() {
            Some(TokenKind::Number(n)) => {
                let n = *n;
                self.pos += 1;
                Ok(Expression::Number(n))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            Some(TokenKind::Word(Word::BatchRead)) => {
                self.pos += 1;
                self.expect(TokenKind::LParen)?;
                let type_hash = self.expression()?;
                self.expect(TokenKind::Comma)?;
                let property = self.property_name()?;
                self.expect(TokenKind::Comma)?;
                let mode = self.expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expression::BatchRead(
                    Box::new(type_hash),
                    property,
                    Box::new(mode),
                ))
            }
            Some(TokenKind::Ident(_)) => self.name_expression(),
            _ => Err(error!(SyntaxError, line; "EXPECTED EXPRESSION")),
        }
    }

    fn name_expression(&mut self) -> Result<Expression> {
        let name = self.ident()?;
        if name == "IC" && self.peek() == Some(&TokenKind::Dot) {
            let (type_hash, name_hash, property) = self.named_device_path()?;
            return Ok(Expression::NamedRead(
                Box::new(type_hash),
                Box::new(name_hash),
                property,
            ));
        }
        match self.peek() {
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let mut args = vec![];
                if self.peek() != Some(&TokenKind::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if self.peek() == Some(&TokenKind::Comma) {
                            self.pos += 1;
                            continue;
                        }
                        break;
                    }
                }
                self.expect(TokenKind::RParen)?;
                if self.arrays.contains(&name) {
                    if args.len() != 1 {
                        return Err(
                            error!(IllegalFunctionCall, self.line(); "EXPECTED ONE SUBSCRIPT"),
                        );
                    }
                    return Ok(Expression::Index(name, Box::new(args.remove(0))));
                }
                Ok(Expression::Call(name, args))
            }
            Some(TokenKind::Dot) => {
                self.pos += 1;
                let property = self.property_name()?;
                if property == "Slot" && self.peek() == Some(&TokenKind::LParen) {
                    self.pos += 1;
                    let slot = self.expression()?;
                    self.expect(TokenKind::RParen)?;
                    self.expect(TokenKind::Dot)?;
                    let property = self.property_name()?;
                    return Ok(Expression::SlotProp(name, Box::new(slot), property));
                }
                Ok(Expression::Prop(name, property))
            }
            Some(TokenKind::Operator(Operator::Incr)) => {
                self.pos += 1;
                Ok(Expression::PostModify(name, 1.0))
            }
            Some(TokenKind::Operator(Operator::Decr)) => {
                self.pos += 1;
                Ok(Expression::PostModify(name, -1.0))
            }
            _ => Ok(Expression::Var(name)),
        }
    }
}

fn parse_pin(name: &str) -> Option<AliasTarget> {
    match name {
        "d0" | "D0" => Some(AliasTarget::Pin(0)),
        "d1" | "D1" => Some(AliasTarget::Pin(1)),
        "d2" | "D2" => Some(AliasTarget::Pin(2)),
        "d3" | "D3" => Some(AliasTarget::Pin(3)),
        "d4" | "D4" => Some(AliasTarget::Pin(4)),
        "d5" | "D5" => Some(AliasTarget::Pin(5)),
        "db" | "DB" => Some(AliasTarget::Housing),
        _ => None,
    }
}

/// Precedence low -> high. `^` gets the highest binary tier and binds
/// right-associatively.
fn binary_op(op: Operator) -> Option<(usize, BinOp)> {
    use Operator::*;
    Some(match op {
        Or => (1, BinOp::Or),
        BitOr => (1, BinOp::BitOr),
        And => (2, BinOp::And),
        BitAnd => (2, BinOp::BitAnd),
        Eq | EqEq => (3, BinOp::Eq),
        NotEq => (3, BinOp::NotEq),
        Lt => (3, BinOp::Lt),
        LtEq => (3, BinOp::LtEq),
        Gt => (3, BinOp::Gt),
        GtEq => (3, BinOp::GtEq),
        Shl => (4, BinOp::Shl),
        Shr => (4, BinOp::Shr),
        Add => (5, BinOp::Add),
        Sub => (5, BinOp::Sub),
        Mul => (6, BinOp::Mul),
        Div => (6, BinOp::Div),
        Mod => (6, BinOp::Mod),
        Pow => (7, BinOp::Pow),
        _ => return None,
    })
}
